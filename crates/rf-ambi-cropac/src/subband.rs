//! Sub-band frame container
//!
//! Complex time-frequency data laid out as `[band][channel][slot]`, where a
//! slot is one filterbank hop. Every buffer on the audio path is one of these,
//! allocated once and reused.

use std::ops::{Index, IndexMut};

use nalgebra::SVector;
use num_complex::Complex32;

use crate::error::{CropacError, CropacResult};

/// `[band][channel][slot]` complex buffer
#[derive(Debug, Clone, PartialEq)]
pub struct SubbandFrame {
    bands: usize,
    channels: usize,
    slots: usize,
    data: Vec<Complex32>,
}

impl SubbandFrame {
    /// Allocate a zeroed frame
    pub fn new(bands: usize, channels: usize, slots: usize) -> Self {
        Self {
            bands,
            channels,
            slots,
            data: vec![Complex32::new(0.0, 0.0); bands * channels * slots],
        }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    #[inline]
    fn offset(&self, band: usize, channel: usize, slot: usize) -> usize {
        assert!(
            band < self.bands && channel < self.channels && slot < self.slots,
            "sub-band index ({band}, {channel}, {slot}) out of range ({}, {}, {})",
            self.bands,
            self.channels,
            self.slots
        );
        (band * self.channels + channel) * self.slots + slot
    }

    /// Checked read
    pub fn get(&self, band: usize, channel: usize, slot: usize) -> Option<Complex32> {
        if band < self.bands && channel < self.channels && slot < self.slots {
            Some(self.data[(band * self.channels + channel) * self.slots + slot])
        } else {
            None
        }
    }

    /// Write a single bin
    pub fn set(&mut self, band: usize, channel: usize, slot: usize, value: Complex32) {
        let idx = self.offset(band, channel, slot);
        self.data[idx] = value;
    }

    /// All channels of one band at one slot, as a column vector
    pub fn column<const N: usize>(&self, band: usize, slot: usize) -> SVector<Complex32, N> {
        debug_assert_eq!(N, self.channels);
        SVector::<Complex32, N>::from_fn(|ch, _| self[(band, ch, slot)])
    }

    /// Store a column vector into one band at one slot
    pub fn set_column<const N: usize>(
        &mut self,
        band: usize,
        slot: usize,
        column: &SVector<Complex32, N>,
    ) {
        debug_assert_eq!(N, self.channels);
        for ch in 0..N {
            self[(band, ch, slot)] = column[ch];
        }
    }

    /// Scale one channel across all bands and slots
    pub fn scale_channel(&mut self, channel: usize, gain: f32) {
        for band in 0..self.bands {
            for slot in 0..self.slots {
                self[(band, channel, slot)] *= gain;
            }
        }
    }

    /// Copy contents from a frame of identical shape
    pub fn copy_from(&mut self, other: &SubbandFrame) {
        debug_assert!(self.has_shape(other.bands, other.channels, other.slots));
        self.data.copy_from_slice(&other.data);
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(Complex32::new(0.0, 0.0));
    }

    pub fn has_shape(&self, bands: usize, channels: usize, slots: usize) -> bool {
        self.bands == bands && self.channels == channels && self.slots == slots
    }

    /// Refuse a frame whose geometry differs from the expected one
    pub fn check_shape(&self, bands: usize, channels: usize, slots: usize) -> CropacResult<()> {
        if self.channels != channels {
            return Err(CropacError::InvalidChannelCount {
                expected: channels,
                got: self.channels,
            });
        }
        if self.bands != bands || self.slots != slots {
            return Err(CropacError::BufferSizeMismatch {
                expected: bands * slots,
                got: self.bands * self.slots,
            });
        }
        Ok(())
    }

    /// Total energy of one channel
    pub fn channel_energy(&self, channel: usize) -> f32 {
        let mut energy = 0.0;
        for band in 0..self.bands {
            for slot in 0..self.slots {
                energy += self[(band, channel, slot)].norm_sqr();
            }
        }
        energy
    }

    /// Raw storage
    pub fn as_slice(&self) -> &[Complex32] {
        &self.data
    }
}

impl Index<(usize, usize, usize)> for SubbandFrame {
    type Output = Complex32;

    fn index(&self, (band, channel, slot): (usize, usize, usize)) -> &Complex32 {
        &self.data[self.offset(band, channel, slot)]
    }
}

impl IndexMut<(usize, usize, usize)> for SubbandFrame {
    fn index_mut(&mut self, (band, channel, slot): (usize, usize, usize)) -> &mut Complex32 {
        let idx = self.offset(band, channel, slot);
        &mut self.data[idx]
    }
}
