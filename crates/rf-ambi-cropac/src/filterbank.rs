//! Time-frequency filterbank
//!
//! The transform itself sits behind [`TimeFrequencyTransform`] so a hybrid
//! filterbank can be dropped in. [`StftTransform`] is the bundled
//! implementation: sqrt-Hann windows, 50% overlap, FFT size of two hops,
//! `hop + 1` bands and one hop of latency, with perfect reconstruction.
//!
//! [`FilterbankAdapter`] cuts a host frame into hops, drives the transform once
//! per hop and owns the per-hop scratch buffers.

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{CropacError, CropacResult};
use crate::subband::SubbandFrame;

/// Per-hop analysis/synthesis transform
pub trait TimeFrequencyTransform: Send {
    /// Number of frequency bands
    fn num_bands(&self) -> usize;

    /// Samples per hop
    fn hop_size(&self) -> usize;

    /// Input (analysis) channel count
    fn in_channels(&self) -> usize;

    /// Output (synthesis) channel count
    fn out_channels(&self) -> usize;

    /// Combined analysis + synthesis delay in samples
    fn delay_samples(&self) -> usize;

    /// Band centre frequencies in Hz
    fn band_frequencies(&self) -> &[f32];

    /// Analyze one hop of `in_channels` signals into `slot` of `output`
    fn forward(&mut self, hop: &[Vec<f32>], output: &mut SubbandFrame, slot: usize);

    /// Synthesize `slot` of `input` into one hop of `out_channels` signals
    fn inverse(&mut self, input: &SubbandFrame, slot: usize, hop: &mut [Vec<f32>]);

    /// Clear all internal history
    fn reset(&mut self);
}

/// STFT transform configuration
#[derive(Debug, Clone, Copy)]
pub struct StftConfig {
    pub hop_size: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub sample_rate: u32,
}

/// Windowed overlap-add STFT
pub struct StftTransform {
    config: StftConfig,
    fft_size: usize,
    /// sqrt of a periodic Hann window, used for analysis and synthesis
    window: Vec<f32>,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
    /// Sliding analysis history per input channel
    input_history: Vec<Vec<f32>>,
    /// Overlap-add accumulator per output channel
    ola_buffers: Vec<Vec<f32>>,
    time_buffer: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch_forward: Vec<Complex32>,
    scratch_inverse: Vec<Complex32>,
    frequencies: Vec<f32>,
}

impl StftTransform {
    /// Create a transform; the hop size must be a positive even number
    pub fn new(config: StftConfig) -> CropacResult<Self> {
        if config.hop_size == 0 || config.hop_size % 2 != 0 {
            return Err(CropacError::InvalidConfig(format!(
                "hop size must be a positive even number, got {}",
                config.hop_size
            )));
        }
        if config.in_channels == 0 || config.out_channels == 0 {
            return Err(CropacError::InvalidConfig(
                "filterbank needs at least one input and one output channel".into(),
            ));
        }
        if config.sample_rate == 0 {
            return Err(CropacError::InvalidConfig("sample rate must be positive".into()));
        }

        let fft_size = config.hop_size * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        let window: Vec<f32> = (0..fft_size)
            .map(|i| (0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos())).sqrt())
            .collect();

        let num_bands = config.hop_size + 1;
        let frequencies = (0..num_bands)
            .map(|k| k as f32 * config.sample_rate as f32 / fft_size as f32)
            .collect();

        Ok(Self {
            scratch_forward: fft_forward.make_scratch_vec(),
            scratch_inverse: fft_inverse.make_scratch_vec(),
            spectrum: fft_forward.make_output_vec(),
            time_buffer: vec![0.0; fft_size],
            input_history: vec![vec![0.0; fft_size]; config.in_channels],
            ola_buffers: vec![vec![0.0; fft_size]; config.out_channels],
            config,
            fft_size,
            window,
            fft_forward,
            fft_inverse,
            frequencies,
        })
    }
}

impl TimeFrequencyTransform for StftTransform {
    fn num_bands(&self) -> usize {
        self.config.hop_size + 1
    }

    fn hop_size(&self) -> usize {
        self.config.hop_size
    }

    fn in_channels(&self) -> usize {
        self.config.in_channels
    }

    fn out_channels(&self) -> usize {
        self.config.out_channels
    }

    fn delay_samples(&self) -> usize {
        self.fft_size - self.config.hop_size
    }

    fn band_frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    fn forward(&mut self, hop: &[Vec<f32>], output: &mut SubbandFrame, slot: usize) {
        let hop_size = self.config.hop_size;
        let norm = 1.0 / self.fft_size as f32;

        for (ch, history) in self.input_history.iter_mut().enumerate() {
            history.copy_within(hop_size.., 0);
            history[hop_size..].copy_from_slice(&hop[ch][..hop_size]);

            for ((t, &x), &w) in self.time_buffer.iter_mut().zip(history.iter()).zip(&self.window) {
                *t = x * w;
            }

            if self
                .fft_forward
                .process_with_scratch(&mut self.time_buffer, &mut self.spectrum, &mut self.scratch_forward)
                .is_err()
            {
                self.spectrum.fill(Complex32::new(0.0, 0.0));
            }

            for (band, bin) in self.spectrum.iter().enumerate() {
                output[(band, ch, slot)] = *bin * norm;
            }
        }
    }

    fn inverse(&mut self, input: &SubbandFrame, slot: usize, hop: &mut [Vec<f32>]) {
        let hop_size = self.config.hop_size;
        let last = self.spectrum.len() - 1;

        for (ch, ola) in self.ola_buffers.iter_mut().enumerate() {
            for (band, bin) in self.spectrum.iter_mut().enumerate() {
                *bin = input[(band, ch, slot)];
            }
            // DC and Nyquist must be real for the inverse real FFT
            self.spectrum[0].im = 0.0;
            self.spectrum[last].im = 0.0;

            if self
                .fft_inverse
                .process_with_scratch(&mut self.spectrum, &mut self.time_buffer, &mut self.scratch_inverse)
                .is_err()
            {
                self.time_buffer.fill(0.0);
            }

            for ((acc, &t), &w) in ola.iter_mut().zip(&self.time_buffer).zip(&self.window) {
                *acc += t * w;
            }

            hop[ch][..hop_size].copy_from_slice(&ola[..hop_size]);
            ola.copy_within(hop_size.., 0);
            ola[hop_size..].fill(0.0);
        }
    }

    fn reset(&mut self) {
        for history in &mut self.input_history {
            history.fill(0.0);
        }
        for ola in &mut self.ola_buffers {
            ola.fill(0.0);
        }
    }
}

/// Frame-level wrapper around a per-hop transform
pub struct FilterbankAdapter {
    transform: Box<dyn TimeFrequencyTransform>,
    frame_size: usize,
    slots: usize,
    hop_in: Vec<Vec<f32>>,
    hop_out: Vec<Vec<f32>>,
}

impl FilterbankAdapter {
    /// Wrap a transform for frames of `frame_size` samples
    pub fn new(transform: Box<dyn TimeFrequencyTransform>, frame_size: usize) -> CropacResult<Self> {
        let hop_size = transform.hop_size();
        if hop_size == 0 || frame_size == 0 || frame_size % hop_size != 0 {
            return Err(CropacError::InvalidConfig(format!(
                "frame size {frame_size} is not a multiple of hop size {hop_size}"
            )));
        }
        let bands = transform.num_bands();
        if bands == 0 || transform.band_frequencies().len() != bands {
            return Err(CropacError::InvalidConfig(format!(
                "transform reports {} band frequencies for {bands} bands",
                transform.band_frequencies().len()
            )));
        }

        Ok(Self {
            frame_size,
            slots: frame_size / hop_size,
            hop_in: vec![vec![0.0; hop_size]; transform.in_channels()],
            hop_out: vec![vec![0.0; hop_size]; transform.out_channels()],
            transform,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.transform.hop_size()
    }

    /// Time slots (hops) per frame
    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn num_bands(&self) -> usize {
        self.transform.num_bands()
    }

    pub fn in_channels(&self) -> usize {
        self.transform.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.transform.out_channels()
    }

    /// Processing delay for host latency compensation
    pub fn delay_samples(&self) -> usize {
        self.transform.delay_samples()
    }

    pub fn band_frequencies(&self) -> &[f32] {
        self.transform.band_frequencies()
    }

    /// `[in_channels][frame_size]` time frame → `[bands][in_channels][slots]`
    pub fn analyze(&mut self, frame: &[&[f32]], output: &mut SubbandFrame) -> CropacResult<()> {
        self.check_time_frame(frame.len(), self.in_channels(), frame.iter().map(|c| c.len()))?;
        output.check_shape(self.num_bands(), self.in_channels(), self.slots)?;

        let hop_size = self.hop_size();
        for slot in 0..self.slots {
            let start = slot * hop_size;
            for (dst, src) in self.hop_in.iter_mut().zip(frame) {
                dst.copy_from_slice(&src[start..start + hop_size]);
            }
            self.transform.forward(&self.hop_in, output, slot);
        }
        Ok(())
    }

    /// `[bands][out_channels][slots]` → `[out_channels][frame_size]` time frame
    pub fn synthesize(&mut self, input: &SubbandFrame, frame: &mut [&mut [f32]]) -> CropacResult<()> {
        self.check_time_frame(frame.len(), self.out_channels(), frame.iter().map(|c| c.len()))?;
        input.check_shape(self.num_bands(), self.out_channels(), self.slots)?;

        let hop_size = self.hop_size();
        for slot in 0..self.slots {
            self.transform.inverse(input, slot, &mut self.hop_out);
            let start = slot * hop_size;
            for (dst, src) in frame.iter_mut().zip(&self.hop_out) {
                dst[start..start + hop_size].copy_from_slice(src);
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.transform.reset();
    }

    fn check_time_frame(
        &self,
        channels: usize,
        expected_channels: usize,
        lengths: impl Iterator<Item = usize>,
    ) -> CropacResult<()> {
        if channels != expected_channels {
            return Err(CropacError::InvalidChannelCount {
                expected: expected_channels,
                got: channels,
            });
        }
        for len in lengths {
            if len != self.frame_size {
                return Err(CropacError::BufferSizeMismatch {
                    expected: self.frame_size,
                    got: len,
                });
            }
        }
        Ok(())
    }
}
