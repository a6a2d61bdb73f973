//! Sound-field rotation (yaw, pitch, roll)

use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use super::{ACN_W, NUM_SH_SIGNALS};
use crate::subband::SubbandFrame;

/// Order in which the three elementary rotations are composed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RotationOrder {
    /// `R = Rz(yaw) · Ry(pitch) · Rx(roll)`
    #[default]
    YawPitchRoll,
    /// `R = Rx(roll) · Ry(pitch) · Rz(yaw)`
    RollPitchYaw,
}

/// Rotation settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationParams {
    pub enabled: bool,
    /// Degrees, about +Z (positive = counter-clockwise seen from above)
    pub yaw: f32,
    /// Degrees, about +Y
    pub pitch: f32,
    /// Degrees, about +X
    pub roll: f32,
    pub flip_yaw: bool,
    pub flip_pitch: bool,
    pub flip_roll: bool,
    pub order: RotationOrder,
}

impl Default for RotationParams {
    fn default() -> Self {
        Self {
            enabled: false,
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            flip_yaw: false,
            flip_pitch: false,
            flip_roll: false,
            order: RotationOrder::YawPitchRoll,
        }
    }
}

impl RotationParams {
    /// Enabled rotation with the given angles, default flags and order
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self {
            enabled: true,
            yaw,
            pitch,
            roll,
            ..Default::default()
        }
    }

    /// Cartesian rotation matrix acting on (x, y, z) directions
    pub fn matrix(&self) -> Matrix3<f32> {
        if !self.enabled {
            return Matrix3::identity();
        }

        let sign = |flip: bool| if flip { -1.0 } else { 1.0 };
        let yaw = sign(self.flip_yaw) * self.yaw.to_radians();
        let pitch = sign(self.flip_pitch) * self.pitch.to_radians();
        let roll = sign(self.flip_roll) * self.roll.to_radians();

        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), yaw);
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), pitch);
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), roll);

        let r = match self.order {
            RotationOrder::YawPitchRoll => rz * ry * rx,
            RotationOrder::RollPitchYaw => rx * ry * rz,
        };
        r.into_inner()
    }

    /// First-order SH rotation matrix (ACN)
    pub fn sh_matrix(&self) -> Matrix4<f32> {
        // ACN channel -> cartesian axis: Y, Z, X
        const CART: [usize; NUM_SH_SIGNALS] = [0, 1, 2, 0];

        let r = self.matrix();
        let mut sh = Matrix4::zeros();
        sh[(ACN_W, ACN_W)] = 1.0;
        for a in 1..NUM_SH_SIGNALS {
            for b in 1..NUM_SH_SIGNALS {
                sh[(a, b)] = r[(CART[a], CART[b])];
            }
        }
        sh
    }
}

/// Applies a cached SH rotation to sub-band frames
///
/// Owned by the audio path; the matrix is only recomputed when
/// [`Rotator::update`] sees different settings.
#[derive(Debug, Clone)]
pub struct Rotator {
    params: RotationParams,
    sh: Matrix4<f32>,
    identity: bool,
}

impl Rotator {
    pub fn new() -> Self {
        Self {
            params: RotationParams::default(),
            sh: Matrix4::identity(),
            identity: true,
        }
    }

    /// Adopt new settings, returns true if the matrix was recomputed
    pub fn update(&mut self, params: &RotationParams) -> bool {
        if *params == self.params {
            return false;
        }
        self.params = *params;
        self.sh = params.sh_matrix();
        self.identity = !params.enabled || self.sh == Matrix4::identity();
        true
    }

    pub fn params(&self) -> &RotationParams {
        &self.params
    }

    pub fn sh_matrix(&self) -> &Matrix4<f32> {
        &self.sh
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Rotate every band and slot of `input` into `output`
    pub fn rotate(&self, input: &SubbandFrame, output: &mut SubbandFrame) {
        debug_assert!(output.has_shape(input.bands(), NUM_SH_SIGNALS, input.slots()));

        if self.identity {
            output.copy_from(input);
            return;
        }

        let m = self.sh.map(|v| Complex32::new(v, 0.0));
        for band in 0..input.bands() {
            for slot in 0..input.slots() {
                let x = input.column::<NUM_SH_SIGNALS>(band, slot);
                output.set_column(band, slot, &(m * x));
            }
        }
    }
}

impl Default for Rotator {
    fn default() -> Self {
        Self::new()
    }
}
