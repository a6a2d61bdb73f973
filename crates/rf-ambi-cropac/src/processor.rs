//! Block processor - the audio-thread side of the decoder
//!
//! Owns the filterbank, the sub-band buffers, the rotator, the CroPaC
//! analyzer and the mixer. Everything is allocated in [`AmbiCropac::new`];
//! [`AmbiCropac::process`] never allocates, locks or logs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::CodecConfig;
use crate::control::CropacControl;
use crate::cropac::{BandEstimate, CropacAnalyzer};
use crate::error::{CropacError, CropacResult};
use crate::filterbank::{FilterbankAdapter, StftConfig, StftTransform, TimeFrequencyTransform};
use crate::hoa::{NUM_SH_SIGNALS, Rotator};
use crate::initializer::CodecInitializer;
use crate::mixer::CovarianceMixer;
use crate::params::UserParameters;
use crate::store::{CodecReader, CodecStore};
use crate::subband::SubbandFrame;
use crate::NUM_EARS;

/// Engine geometry and initial codec settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Host sample rate (Hz)
    pub sample_rate: u32,
    /// Samples per channel per `process` call
    pub frame_size: usize,
    /// Filterbank hop size
    pub hop_size: usize,
    /// Run codec rebuilds on a background thread
    pub background_rebuild: bool,
    /// Codec settings used for the first build
    pub codec: CodecConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_size: 512,
            hop_size: 128,
            background_rebuild: true,
            codec: CodecConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Small frames for low latency
    pub fn low_latency() -> Self {
        Self {
            frame_size: 128,
            hop_size: 64,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> CropacResult<()> {
        if self.sample_rate == 0 {
            return Err(CropacError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if self.hop_size == 0 || self.hop_size % 2 != 0 {
            return Err(CropacError::InvalidConfig(format!(
                "hop size {} must be even and non-zero",
                self.hop_size
            )));
        }
        if self.frame_size == 0 || self.frame_size % self.hop_size != 0 {
            return Err(CropacError::InvalidConfig(format!(
                "frame size {} is not a multiple of hop size {}",
                self.frame_size, self.hop_size
            )));
        }
        self.codec.format.validate()
    }
}

/// Parametric first-order Ambisonic to binaural decoder
pub struct AmbiCropac {
    config: EngineConfig,
    params: Arc<UserParameters>,
    codec: CodecReader,
    filterbank: FilterbankAdapter,
    rotator: Rotator,
    analyzer: CropacAnalyzer,
    mixer: CovarianceMixer,
    sh_in: SubbandFrame,
    sh_rotated: SubbandFrame,
    binaural: SubbandFrame,
}

impl AmbiCropac {
    /// Create the processor with the bundled STFT and its control surface
    pub fn new(config: EngineConfig) -> CropacResult<(Self, CropacControl)> {
        config.validate()?;
        let transform = StftTransform::new(StftConfig {
            hop_size: config.hop_size,
            in_channels: NUM_SH_SIGNALS,
            out_channels: NUM_EARS,
            sample_rate: config.sample_rate,
        })?;
        Self::with_transform(config, Box::new(transform))
    }

    /// Create the processor around a custom time-frequency transform
    pub fn with_transform(
        config: EngineConfig,
        transform: Box<dyn TimeFrequencyTransform>,
    ) -> CropacResult<(Self, CropacControl)> {
        config.validate()?;
        if transform.in_channels() != NUM_SH_SIGNALS {
            return Err(CropacError::InvalidChannelCount {
                expected: NUM_SH_SIGNALS,
                got: transform.in_channels(),
            });
        }
        if transform.out_channels() != NUM_EARS {
            return Err(CropacError::InvalidChannelCount {
                expected: NUM_EARS,
                got: transform.out_channels(),
            });
        }

        let filterbank = FilterbankAdapter::new(transform, config.frame_size)?;
        let bands = filterbank.num_bands();
        let slots = filterbank.slots();

        let params = Arc::new(UserParameters::new(bands));
        params.set_format(config.codec.format)?;
        params.set_max_re(config.codec.max_re);
        if !config.codec.hrir_source.is_default() {
            params.set_personalized_source(config.codec.hrir_source.clone());
            params.set_use_default_hrirs(false);
        }

        let store = Arc::new(CodecStore::new());
        let codec = store.reader()?;
        let initializer = Arc::new(CodecInitializer::new(
            store,
            config.codec.clone(),
            filterbank.band_frequencies().to_vec(),
            config.sample_rate,
        ));

        let control = CropacControl::new(
            Arc::clone(&params),
            initializer,
            config.sample_rate,
            filterbank.delay_samples(),
            config.background_rebuild,
        )?;

        log::info!(
            "CroPaC decoder: {} Hz, frame {}, hop {}, {} bands",
            config.sample_rate,
            config.frame_size,
            config.hop_size,
            bands
        );

        let processor = Self {
            params,
            codec,
            rotator: Rotator::new(),
            analyzer: CropacAnalyzer::new(bands),
            mixer: CovarianceMixer::new(),
            sh_in: SubbandFrame::new(bands, NUM_SH_SIGNALS, slots),
            sh_rotated: SubbandFrame::new(bands, NUM_SH_SIGNALS, slots),
            binaural: SubbandFrame::new(bands, NUM_EARS, slots),
            filterbank,
            config,
        };

        Ok((processor, control))
    }

    /// Decode one frame of first-order Ambisonics to binaural
    ///
    /// `input` holds four ACN channels, `output` two ears, each exactly
    /// `frame_size` samples. Until a codec is published the output is silent.
    pub fn process(&mut self, input: &[&[f32]], output: &mut [&mut [f32]]) -> CropacResult<()> {
        self.check_frame(input.len(), NUM_SH_SIGNALS, input.iter().map(|c| c.len()))?;
        self.check_frame(output.len(), NUM_EARS, output.iter().map(|c| c.len()))?;

        self.codec.refresh();
        let Some(codec) = self.codec.current() else {
            for channel in output.iter_mut() {
                channel.fill(0.0);
            }
            return Ok(());
        };
        if codec.num_bands() != self.filterbank.num_bands() {
            return Err(CropacError::BufferSizeMismatch {
                expected: self.filterbank.num_bands(),
                got: codec.num_bands(),
            });
        }

        self.filterbank.analyze(input, &mut self.sh_in)?;

        for (ch, &gain) in codec.input_gains().iter().enumerate() {
            if gain != 1.0 {
                self.sh_in.scale_channel(ch, gain);
            }
        }

        self.rotator.update(&self.params.rotation_params());
        self.rotator.rotate(&self.sh_in, &mut self.sh_rotated);

        let cov_avg = self.params.cov_avg();
        let decode = codec.decode_matrix();

        for slot in 0..self.sh_rotated.slots() {
            for band in 0..self.sh_rotated.bands() {
                let x = self.sh_rotated.column::<NUM_SH_SIGNALS>(band, slot);
                self.analyzer.update_covariance(band, &x, cov_avg);
                let target = self
                    .analyzer
                    .analyze_band(band, self.params.balance(band), codec);

                let d = decode.get_matrix(band);
                let linear_out = d * x;
                let linear_cov =
                    CovarianceMixer::linear_covariance(d, self.analyzer.covariance(band));
                let mixing =
                    self.mixer
                        .mixing_matrix(&linear_cov, &target, self.params.decode_balance(band));
                let out = self.mixer.mix(&mixing, &linear_out, self.params.eq(band));
                self.binaural.set_column(band, slot, &out);
            }
        }

        self.filterbank.synthesize(&self.binaural, output)
    }

    fn check_frame(
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
            if len != self.config.frame_size {
                return Err(CropacError::BufferSizeMismatch {
                    expected: self.config.frame_size,
                    got: len,
                });
            }
        }
        Ok(())
    }

    /// Processing latency in samples
    pub fn latency_samples(&self) -> usize {
        self.filterbank.delay_samples()
    }

    pub fn num_bands(&self) -> usize {
        self.filterbank.num_bands()
    }

    /// Band centre frequencies (Hz)
    pub fn band_frequencies(&self) -> &[f32] {
        self.filterbank.band_frequencies()
    }

    /// Latest CroPaC estimate of a band
    pub fn band_estimate(&self, band: usize) -> Option<BandEstimate> {
        (band < self.analyzer.num_bands()).then(|| *self.analyzer.estimate(band))
    }

    /// A codec is in use on the audio path
    pub fn is_codec_ready(&self) -> bool {
        self.codec.current().is_some()
    }

    /// Generation of the codec in use, 0 if none
    pub fn codec_generation(&self) -> u64 {
        self.codec.generation()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn params(&self) -> &Arc<UserParameters> {
        &self.params
    }

    /// Clear filterbank and analyzer history
    pub fn reset(&mut self) {
        self.filterbank.reset();
        self.analyzer.reset();
        self.sh_in.fill_zero();
        self.sh_rotated.fill_zero();
        self.binaural.fill_zero();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hoa::{AmbisonicFormat, ChannelOrdering, Normalization};

    fn manual(frame_size: usize, hop_size: usize) -> EngineConfig {
        EngineConfig {
            frame_size,
            hop_size,
            background_rebuild: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::low_latency().validate().is_ok());
        assert!(manual(256, 100).validate().is_err());
        assert!(manual(250, 128).validate().is_err());
        assert!(manual(256, 0).validate().is_err());

        let mut fuma = manual(256, 128);
        fuma.codec.format = AmbisonicFormat {
            normalization: Normalization::FuMa,
            ordering: ChannelOrdering::FuMa,
        };
        assert!(matches!(
            AmbiCropac::new(fuma),
            Err(CropacError::UnsupportedOrdering(ChannelOrdering::FuMa))
        ));
    }

    #[test]
    fn test_geometry() {
        let (engine, control) = AmbiCropac::new(manual(256, 128)).unwrap();
        assert_eq!(engine.num_bands(), 129);
        assert_eq!(engine.latency_samples(), 128);
        assert_eq!(control.processing_delay(), 128);
        assert_eq!(engine.band_frequencies().len(), 129);
        assert!(engine.band_estimate(129).is_none());
    }

    #[test]
    fn test_rejects_wrong_dimensions() {
        let (mut engine, _control) = AmbiCropac::new(manual(256, 128)).unwrap();
        let input = vec![vec![0.0f32; 256]; 4];
        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];

        let three: Vec<&[f32]> = input[..3].iter().map(|c| c.as_slice()).collect();
        let mut out: Vec<&mut [f32]> = vec![left.as_mut_slice(), right.as_mut_slice()];
        assert!(matches!(
            engine.process(&three, &mut out),
            Err(CropacError::InvalidChannelCount { expected: 4, got: 3 })
        ));

        let short = vec![vec![0.0f32; 128]; 4];
        let short: Vec<&[f32]> = short.iter().map(|c| c.as_slice()).collect();
        assert!(matches!(
            engine.process(&short, &mut out),
            Err(CropacError::BufferSizeMismatch { expected: 256, got: 128 })
        ));
    }

    /// STFT that drops the frequency of its last band
    struct MissingBandFrequency(StftTransform);

    impl TimeFrequencyTransform for MissingBandFrequency {
        fn num_bands(&self) -> usize {
            self.0.num_bands()
        }
        fn hop_size(&self) -> usize {
            self.0.hop_size()
        }
        fn in_channels(&self) -> usize {
            self.0.in_channels()
        }
        fn out_channels(&self) -> usize {
            self.0.out_channels()
        }
        fn delay_samples(&self) -> usize {
            self.0.delay_samples()
        }
        fn band_frequencies(&self) -> &[f32] {
            let freqs = self.0.band_frequencies();
            &freqs[..freqs.len() - 1]
        }
        fn forward(&mut self, hop: &[Vec<f32>], output: &mut SubbandFrame, slot: usize) {
            self.0.forward(hop, output, slot)
        }
        fn inverse(&mut self, input: &SubbandFrame, slot: usize, hop: &mut [Vec<f32>]) {
            self.0.inverse(input, slot, hop)
        }
        fn reset(&mut self) {
            self.0.reset()
        }
    }

    #[test]
    fn test_rejects_inconsistent_transform() {
        let stft = StftTransform::new(StftConfig {
            hop_size: 128,
            in_channels: NUM_SH_SIGNALS,
            out_channels: NUM_EARS,
            sample_rate: 48000,
        })
        .unwrap();
        let result = AmbiCropac::with_transform(
            manual(256, 128),
            Box::new(MissingBandFrequency(stft)),
        );
        let Err(err) = result else {
            panic!("transform with 128 frequencies for 129 bands was accepted");
        };
        assert!(matches!(err, CropacError::InvalidConfig(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_manual_mode_builds_on_construction() {
        let (mut engine, control) = AmbiCropac::new(manual(256, 128)).unwrap();
        assert!(control.is_ready());
        assert!(!engine.is_codec_ready());

        engine.codec.refresh();
        assert!(engine.is_codec_ready());
        assert_eq!(engine.codec_generation(), 1);
    }
}
