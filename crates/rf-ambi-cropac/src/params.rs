//! User parameters shared between the control surface and the audio thread
//!
//! All audio-visible fields are relaxed atomics. A reader may observe a
//! bulk update half applied across bands; that is accepted.

use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicF32, AtomicU8, Ordering};

use crate::binaural::HrirSource;
use crate::codec::CodecConfig;
use crate::error::{CropacError, CropacResult};
use crate::hoa::{AmbisonicFormat, ChannelOrdering, Normalization, RotationOrder, RotationParams};

/// Default covariance averaging coefficient
pub const DEFAULT_COV_AVG: f32 = 0.86;

/// Upper limit of the per-band EQ gain
pub const MAX_EQ_GAIN: f32 = 2.0;

/// Rotation angle limits (degrees)
const MAX_YAW: f32 = 180.0;
const MAX_PITCH_ROLL: f32 = 180.0;

fn per_band(bands: usize, value: f32) -> Vec<AtomicF32> {
    (0..bands).map(|_| AtomicF32::new(value)).collect()
}

fn band_slot(slots: &[AtomicF32], band: usize) -> CropacResult<&AtomicF32> {
    slots.get(band).ok_or_else(|| {
        CropacError::InvalidConfig(format!("band {band} out of range (0..{})", slots.len()))
    })
}

/// Per-band and global controls
pub struct UserParameters {
    eq: Vec<AtomicF32>,
    balance: Vec<AtomicF32>,
    decode_balance: Vec<AtomicF32>,
    cov_avg: AtomicF32,
    max_re: AtomicBool,
    use_default_hrirs: AtomicBool,
    ordering: AtomicU8,
    normalization: AtomicU8,
    rotation_enabled: AtomicBool,
    yaw: AtomicF32,
    pitch: AtomicF32,
    roll: AtomicF32,
    flip_yaw: AtomicBool,
    flip_pitch: AtomicBool,
    flip_roll: AtomicBool,
    rotation_order: AtomicU8,
    // control side only
    personalized: Mutex<HrirSource>,
}

impl UserParameters {
    pub fn new(num_bands: usize) -> Self {
        let rotation = RotationParams::default();
        let format = AmbisonicFormat::default();
        Self {
            eq: per_band(num_bands, 1.0),
            balance: per_band(num_bands, 1.0),
            decode_balance: per_band(num_bands, 1.0),
            cov_avg: AtomicF32::new(DEFAULT_COV_AVG),
            max_re: AtomicBool::new(true),
            use_default_hrirs: AtomicBool::new(true),
            ordering: AtomicU8::new(format.ordering.to_u8()),
            normalization: AtomicU8::new(format.normalization.to_u8()),
            rotation_enabled: AtomicBool::new(rotation.enabled),
            yaw: AtomicF32::new(rotation.yaw),
            pitch: AtomicF32::new(rotation.pitch),
            roll: AtomicF32::new(rotation.roll),
            flip_yaw: AtomicBool::new(false),
            flip_pitch: AtomicBool::new(false),
            flip_roll: AtomicBool::new(false),
            rotation_order: AtomicU8::new(0),
            personalized: Mutex::new(HrirSource::Default),
        }
    }

    pub fn num_bands(&self) -> usize {
        self.eq.len()
    }

    // Per-band EQ

    pub fn eq(&self, band: usize) -> f32 {
        self.eq.get(band).map_or(1.0, |v| v.load(Ordering::Relaxed))
    }

    pub fn set_eq(&self, band: usize, gain: f32) -> CropacResult<()> {
        band_slot(&self.eq, band)?
            .store(gain.clamp(0.0, MAX_EQ_GAIN), Ordering::Relaxed);
        Ok(())
    }

    pub fn set_eq_all(&self, gain: f32) {
        let gain = gain.clamp(0.0, MAX_EQ_GAIN);
        for v in &self.eq {
            v.store(gain, Ordering::Relaxed);
        }
    }

    // Per-band direct/diffuse balance, 0 = diffuse, 1 = neutral, 2 = direct

    pub fn balance(&self, band: usize) -> f32 {
        self.balance.get(band).map_or(1.0, |v| v.load(Ordering::Relaxed))
    }

    pub fn set_balance(&self, band: usize, balance: f32) -> CropacResult<()> {
        band_slot(&self.balance, band)?
            .store(balance.clamp(0.0, 2.0), Ordering::Relaxed);
        Ok(())
    }

    pub fn set_balance_all(&self, balance: f32) {
        let balance = balance.clamp(0.0, 2.0);
        for v in &self.balance {
            v.store(balance, Ordering::Relaxed);
        }
    }

    // Per-band decode balance, 0 = linear, 1 = parametric

    pub fn decode_balance(&self, band: usize) -> f32 {
        self.decode_balance
            .get(band)
            .map_or(1.0, |v| v.load(Ordering::Relaxed))
    }

    pub fn set_decode_balance(&self, band: usize, balance: f32) -> CropacResult<()> {
        band_slot(&self.decode_balance, band)?
            .store(balance.clamp(0.0, 1.0), Ordering::Relaxed);
        Ok(())
    }

    pub fn set_decode_balance_all(&self, balance: f32) {
        let balance = balance.clamp(0.0, 1.0);
        for v in &self.decode_balance {
            v.store(balance, Ordering::Relaxed);
        }
    }

    /// Covariance averaging coefficient
    pub fn cov_avg(&self) -> f32 {
        self.cov_avg.load(Ordering::Relaxed)
    }

    /// Must lie strictly between 0 and 1
    pub fn set_cov_avg(&self, coefficient: f32) -> CropacResult<()> {
        if !(coefficient > 0.0 && coefficient < 1.0) {
            return Err(CropacError::InvalidConfig(format!(
                "covariance averaging coefficient {coefficient} outside (0, 1)"
            )));
        }
        self.cov_avg.store(coefficient, Ordering::Relaxed);
        Ok(())
    }

    pub fn max_re(&self) -> bool {
        self.max_re.load(Ordering::Relaxed)
    }

    pub fn set_max_re(&self, enabled: bool) {
        self.max_re.store(enabled, Ordering::Relaxed);
    }

    pub fn use_default_hrirs(&self) -> bool {
        self.use_default_hrirs.load(Ordering::Relaxed)
    }

    pub fn set_use_default_hrirs(&self, use_default: bool) {
        self.use_default_hrirs.store(use_default, Ordering::Relaxed);
    }

    /// Personalized HRIR source, used when the default flag is off
    pub fn personalized_source(&self) -> HrirSource {
        self.personalized.lock().clone()
    }

    pub fn set_personalized_source(&self, source: HrirSource) {
        *self.personalized.lock() = source;
    }

    pub fn format(&self) -> AmbisonicFormat {
        AmbisonicFormat {
            normalization: Normalization::from_u8(self.normalization.load(Ordering::Relaxed)),
            ordering: ChannelOrdering::from_u8(self.ordering.load(Ordering::Relaxed)),
        }
    }

    /// Rejects anything but ACN with N3D or SN3D; the stored format is left
    /// unchanged on error
    pub fn set_format(&self, format: AmbisonicFormat) -> CropacResult<()> {
        format.validate()?;
        self.ordering.store(format.ordering.to_u8(), Ordering::Relaxed);
        self.normalization
            .store(format.normalization.to_u8(), Ordering::Relaxed);
        Ok(())
    }

    // Rotation

    pub fn rotation_params(&self) -> RotationParams {
        RotationParams {
            enabled: self.rotation_enabled.load(Ordering::Relaxed),
            yaw: self.yaw.load(Ordering::Relaxed),
            pitch: self.pitch.load(Ordering::Relaxed),
            roll: self.roll.load(Ordering::Relaxed),
            flip_yaw: self.flip_yaw.load(Ordering::Relaxed),
            flip_pitch: self.flip_pitch.load(Ordering::Relaxed),
            flip_roll: self.flip_roll.load(Ordering::Relaxed),
            order: match self.rotation_order.load(Ordering::Relaxed) {
                1 => RotationOrder::RollPitchYaw,
                _ => RotationOrder::YawPitchRoll,
            },
        }
    }

    pub fn set_rotation(&self, params: &RotationParams) {
        self.rotation_enabled.store(params.enabled, Ordering::Relaxed);
        self.set_yaw(params.yaw);
        self.set_pitch(params.pitch);
        self.set_roll(params.roll);
        self.flip_yaw.store(params.flip_yaw, Ordering::Relaxed);
        self.flip_pitch.store(params.flip_pitch, Ordering::Relaxed);
        self.flip_roll.store(params.flip_roll, Ordering::Relaxed);
        self.set_rotation_order(params.order);
    }

    pub fn set_rotation_enabled(&self, enabled: bool) {
        self.rotation_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_yaw(&self, degrees: f32) {
        self.yaw.store(degrees.clamp(-MAX_YAW, MAX_YAW), Ordering::Relaxed);
    }

    pub fn set_pitch(&self, degrees: f32) {
        self.pitch
            .store(degrees.clamp(-MAX_PITCH_ROLL, MAX_PITCH_ROLL), Ordering::Relaxed);
    }

    pub fn set_roll(&self, degrees: f32) {
        self.roll
            .store(degrees.clamp(-MAX_PITCH_ROLL, MAX_PITCH_ROLL), Ordering::Relaxed);
    }

    pub fn set_flips(&self, yaw: bool, pitch: bool, roll: bool) {
        self.flip_yaw.store(yaw, Ordering::Relaxed);
        self.flip_pitch.store(pitch, Ordering::Relaxed);
        self.flip_roll.store(roll, Ordering::Relaxed);
    }

    pub fn set_rotation_order(&self, order: RotationOrder) {
        let value = match order {
            RotationOrder::YawPitchRoll => 0,
            RotationOrder::RollPitchYaw => 1,
        };
        self.rotation_order.store(value, Ordering::Relaxed);
    }

    /// Codec-relevant subset of the parameters
    pub fn codec_config(&self) -> CodecConfig {
        let hrir_source = if self.use_default_hrirs() {
            HrirSource::Default
        } else {
            self.personalized_source()
        };
        CodecConfig {
            hrir_source,
            max_re: self.max_re(),
            format: self.format(),
        }
    }
}
