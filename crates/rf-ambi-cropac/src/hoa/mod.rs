//! First-order Ambisonics (spherical-harmonic domain) helpers
//!
//! - Real spherical harmonics in ACN ordering, SN3D normalization
//! - Input format validation and N3D → SN3D conversion
//! - Scene rotation
//! - Binaural decoding matrix construction
//!
//! Everything downstream of the input stage works in ACN/SN3D, where a plane
//! wave from direction `d` with pressure `p` is `p · [1, d_y, d_z, d_x]`.

mod decoder;
mod format;
mod rotation;

pub use decoder::{DecodeMatrix, MAGNITUDE_FIT_CUTOFF_HZ, fibonacci_sphere};
pub use format::{AmbisonicFormat, ChannelOrdering, Normalization};
pub use rotation::{RotationOrder, RotationParams, Rotator};

use crate::position::Position3D;

/// Ambisonic order handled by this crate
pub const SH_ORDER: usize = 1;

/// Number of SH channels for [`SH_ORDER`]
pub const NUM_SH_SIGNALS: usize = (SH_ORDER + 1) * (SH_ORDER + 1);

/// ACN channel indices
pub const ACN_W: usize = 0;
pub const ACN_Y: usize = 1;
pub const ACN_Z: usize = 2;
pub const ACN_X: usize = 3;

/// Angular spread constant of the max-rE weights (degrees)
const MAX_RE_SPREAD_DEG: f32 = 137.9;

/// Real SH coefficients (ACN/SN3D) for a direction
pub fn sh_coefficients(direction: &Position3D) -> [f32; NUM_SH_SIGNALS] {
    let d = direction.normalize();
    let mut coeffs = [0.0; NUM_SH_SIGNALS];
    coeffs[ACN_W] = 1.0;
    coeffs[ACN_Y] = d.y;
    coeffs[ACN_Z] = d.z;
    coeffs[ACN_X] = d.x;
    coeffs
}

/// Order (n) of an ACN channel
pub fn acn_order(acn: usize) -> usize {
    (acn as f64).sqrt().floor() as usize
}

/// Per-order max-rE weights, `a_n = P_n(cos(137.9° / (N + 1.51)))`
pub fn max_re_weights() -> [f32; SH_ORDER + 1] {
    let x = (MAX_RE_SPREAD_DEG / (SH_ORDER as f32 + 1.51)).to_radians().cos();
    // P_0 = 1, P_1 = x
    [1.0, x]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_count() {
        assert_eq!(NUM_SH_SIGNALS, 4);
    }

    #[test]
    fn test_acn_order() {
        assert_eq!(acn_order(ACN_W), 0);
        assert_eq!(acn_order(ACN_Y), 1);
        assert_eq!(acn_order(ACN_Z), 1);
        assert_eq!(acn_order(ACN_X), 1);
    }

    #[test]
    fn test_sh_front() {
        let sh = sh_coefficients(&Position3D::front());
        assert!((sh[ACN_W] - 1.0).abs() < 1e-6);
        assert!(sh[ACN_Y].abs() < 1e-6);
        assert!(sh[ACN_Z].abs() < 1e-6);
        assert!((sh[ACN_X] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sh_left() {
        let sh = sh_coefficients(&Position3D::from_spherical(90.0, 0.0, 1.0));
        assert!((sh[ACN_Y] - 1.0).abs() < 1e-6);
        assert!(sh[ACN_X].abs() < 1e-6);
    }

    #[test]
    fn test_max_re_first_order() {
        let w = max_re_weights();
        assert_eq!(w[0], 1.0);
        // close to 1/sqrt(3) for first order
        assert!((w[1] - 0.577).abs() < 0.01);
    }
}
