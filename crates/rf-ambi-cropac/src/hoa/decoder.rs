//! Static SH → binaural decoding matrix
//!
//! Each ear's row is a regularized least-squares fit of first-order spherical
//! harmonics to the HRTF over every direction of the set. Below
//! [`MAGNITUDE_FIT_CUTOFF_HZ`] the complex HRTF (ITD phase included) is fitted.
//! From the cutoff up only the magnitudes are fitted, with the phase left free
//! and a relative-error weighting so quiet far-ear directions keep their level
//! difference.

use nalgebra::{Matrix2x4, Matrix4, SVector, Vector2, Vector4};
use num_complex::{Complex32, Complex64};

use super::{NUM_SH_SIGNALS, acn_order, max_re_weights, sh_coefficients};
use crate::binaural::HrtfFilterbank;
use crate::error::{CropacError, CropacResult};
use crate::position::Position3D;
use crate::NUM_EARS;

/// Bands at or above this frequency (Hz) are fitted on HRTF magnitudes only
pub const MAGNITUDE_FIT_CUTOFF_HZ: f32 = 1500.0;

/// Phase-retrieval passes of the magnitude fit
const MAGNITUDE_FIT_ITERATIONS: usize = 20;
/// Tikhonov term relative to the mean diagonal of the normal equations
const FIT_REGULARIZATION: f64 = 1e-3;
/// Weight floor of the magnitude fit, relative to the loudest direction (-40 dB)
const WEIGHT_FLOOR: f64 = 1e-4;

/// Near-uniform point set on the unit sphere (golden-angle spiral)
pub fn fibonacci_sphere(count: usize) -> Vec<Position3D> {
    let golden_angle = std::f32::consts::PI * (3.0 - 5.0_f32.sqrt());
    (0..count)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let phi = golden_angle * i as f32;
            Position3D::new(r * phi.cos(), r * phi.sin(), z)
        })
        .collect()
}

/// Per-band complex decoding matrix, `[band][ear][SH channel]`
///
/// Built once per codec rebuild and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DecodeMatrix {
    bands: Vec<Matrix2x4<Complex32>>,
    max_re: bool,
}

impl DecodeMatrix {
    /// Fit every band of `hrtf`, optionally tapered with max-rE order weights
    pub fn build(hrtf: &HrtfFilterbank, max_re: bool) -> CropacResult<Self> {
        let num_dirs = hrtf.num_directions();
        if hrtf.num_bands() == 0 || num_dirs == 0 {
            return Err(CropacError::InvalidConfig(
                "decode matrix needs a non-empty HRTF filterbank".into(),
            ));
        }

        let order_weights = if max_re {
            max_re_weights()
        } else {
            [1.0; 2]
        };
        let taper = Vector4::from_fn(|ch, _| order_weights[acn_order(ch)] as f64);

        let sh_rows: Vec<Vector4<f64>> = (0..num_dirs)
            .map(|dir| {
                let sh = sh_coefficients(hrtf.direction(dir));
                Vector4::from_fn(|ch, _| sh[ch] as f64)
            })
            .collect();
        let uniform = vec![1.0; num_dirs];
        let uniform_inverse = normal_inverse(&sh_rows, &uniform)?;

        let mut bands = Vec::with_capacity(hrtf.num_bands());
        for band in 0..hrtf.num_bands() {
            let magnitude_only = hrtf.band_frequency(band) >= MAGNITUDE_FIT_CUTOFF_HZ;
            let mut matrix = Matrix2x4::zeros();
            for ear in 0..NUM_EARS {
                let target: Vec<Complex64> = (0..num_dirs)
                    .map(|dir| {
                        let c = hrtf.coefficient(band, dir, ear);
                        Complex64::new(c.re as f64, c.im as f64)
                    })
                    .collect();
                let mut coeffs = project(&uniform_inverse, &sh_rows, &uniform, &target);
                if magnitude_only {
                    coeffs = fit_magnitudes(&sh_rows, &target, coeffs)?;
                }
                for ch in 0..NUM_SH_SIGNALS {
                    let c = coeffs[ch] * taper[ch];
                    matrix[(ear, ch)] = Complex32::new(c.re as f32, c.im as f32);
                }
            }
            bands.push(matrix);
        }

        if bands.iter().any(|m| m.iter().any(|c| !c.is_finite())) {
            return Err(CropacError::InvalidHrirData(
                "decode matrix contains non-finite coefficients".into(),
            ));
        }

        Ok(Self { bands, max_re })
    }

    /// Matrix of one band
    pub fn get_matrix(&self, band: usize) -> &Matrix2x4<Complex32> {
        &self.bands[band]
    }

    pub fn get(&self, band: usize, ear: usize, channel: usize) -> Complex32 {
        self.bands[band][(ear, channel)]
    }

    pub fn num_bands(&self) -> usize {
        self.bands.len()
    }

    pub fn max_re(&self) -> bool {
        self.max_re
    }

    /// Decode one SH column
    #[inline]
    pub fn apply(
        &self,
        band: usize,
        input: &SVector<Complex32, NUM_SH_SIGNALS>,
    ) -> Vector2<Complex32> {
        self.bands[band] * input
    }
}

/// `(Σ w·y·yᵀ + λI)⁻¹` over the SH rows of the HRTF directions
fn normal_inverse(
    sh_rows: &[Vector4<f64>],
    weights: &[f64],
) -> CropacResult<Matrix4<Complex64>> {
    let mut gram = sh_rows
        .iter()
        .zip(weights)
        .fold(Matrix4::<f64>::zeros(), |acc, (y, &w)| acc + y * y.transpose() * w);
    let lambda = FIT_REGULARIZATION * gram.trace() / 4.0;
    gram += Matrix4::identity() * lambda;
    gram.try_inverse()
        .map(|inv| inv.map(|v| Complex64::new(v, 0.0)))
        .ok_or_else(|| CropacError::InvalidHrirData("singular spherical-harmonic fit".into()))
}

/// Weighted least-squares SH coefficients of `target`
fn project(
    inverse: &Matrix4<Complex64>,
    sh_rows: &[Vector4<f64>],
    weights: &[f64],
    target: &[Complex64],
) -> Vector4<Complex64> {
    let rhs = sh_rows
        .iter()
        .zip(weights)
        .zip(target)
        .fold(Vector4::<Complex64>::zeros(), |acc, ((y, &w), &t)| {
            acc + y.map(|v| Complex64::new(v * w, 0.0)) * t
        });
    inverse * rhs
}

/// Magnitude least squares: refit `|target|` with the phase the current fit
/// produces, weighting each direction by its inverse power
fn fit_magnitudes(
    sh_rows: &[Vector4<f64>],
    target: &[Complex64],
    initial: Vector4<Complex64>,
) -> CropacResult<Vector4<Complex64>> {
    let magnitudes: Vec<f64> = target.iter().map(|t| t.norm()).collect();
    let peak = magnitudes.iter().fold(0.0f64, |acc, &m| acc.max(m));
    if peak <= f64::EPSILON {
        return Ok(initial);
    }
    let floor = WEIGHT_FLOOR * peak * peak;
    let weights: Vec<f64> = magnitudes.iter().map(|m| 1.0 / (m * m + floor)).collect();
    let inverse = normal_inverse(sh_rows, &weights)?;

    let mut coeffs = initial;
    let mut phased = vec![Complex64::new(0.0, 0.0); target.len()];
    for _ in 0..MAGNITUDE_FIT_ITERATIONS {
        for ((p, y), &m) in phased.iter_mut().zip(sh_rows).zip(&magnitudes) {
            let estimate = y
                .iter()
                .zip(coeffs.iter())
                .fold(Complex64::new(0.0, 0.0), |acc, (&v, &c)| acc + c * v);
            let norm = estimate.norm();
            *p = if norm > f64::EPSILON {
                estimate * (m / norm)
            } else {
                Complex64::new(m, 0.0)
            };
        }
        coeffs = project(&inverse, sh_rows, &weights, &phased);
    }
    Ok(coeffs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binaural::{HrirPair, HrirSet, default_hrir_set};

    fn filterbank(bands: usize) -> HrtfFilterbank {
        let freqs: Vec<f32> = (0..bands)
            .map(|k| k as f32 * 24000.0 / (bands - 1) as f32)
            .collect();
        HrtfFilterbank::from_hrirs(&default_hrir_set(48000), &freqs).unwrap()
    }

    #[test]
    fn test_fibonacci_sphere() {
        let points = fibonacci_sphere(64);
        assert_eq!(points.len(), 64);
        let mean_z: f32 = points.iter().map(|p| p.z).sum::<f32>() / 64.0;
        assert!(mean_z.abs() < 1e-5);
        for p in &points {
            assert!((p.magnitude() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_matrix_populated() {
        let hrtf = filterbank(33);
        let decode = DecodeMatrix::build(&hrtf, true).unwrap();
        assert_eq!(decode.num_bands(), 33);
        assert!(decode.max_re());
        for band in 0..33 {
            let m = decode.get_matrix(band);
            assert!(m.iter().all(|c| c.is_finite()));
            // omnidirectional term is present for both ears
            assert!(m[(0, 0)].norm() > 0.0);
            assert!(m[(1, 0)].norm() > 0.0);
        }
    }

    /// Grid directions of the built-in set: the horizontal plane plus a few
    /// elevated ones and the zenith
    const TEST_DIRECTIONS: [[f32; 2]; 16] = [
        [0.0, 0.0],
        [30.0, 0.0],
        [60.0, 0.0],
        [90.0, 0.0],
        [120.0, 0.0],
        [150.0, 0.0],
        [180.0, 0.0],
        [210.0, 0.0],
        [240.0, 0.0],
        [270.0, 0.0],
        [300.0, 0.0],
        [330.0, 0.0],
        [45.0, 20.0],
        [120.0, -40.0],
        [300.0, 20.0],
        [0.0, 90.0],
    ];

    /// Highest band frequency checked against the HRTF level differences
    const ILD_CHECK_MAX_HZ: f32 = 12000.0;
    const ILD_TOLERANCE_DB: f32 = 4.0;

    fn plane_wave(direction: &Position3D) -> SVector<Complex32, NUM_SH_SIGNALS> {
        let sh = sh_coefficients(direction);
        SVector::from_fn(|ch, _| Complex32::new(sh[ch], 0.0))
    }

    fn ild_db(ears: &Vector2<Complex32>) -> f32 {
        20.0 * (ears[0].norm() / ears[1].norm()).log10()
    }

    /// `(band, direction, decoded ILD, HRTF ILD)` for the checked bands
    fn ild_pairs(
        hrtf: &HrtfFilterbank,
        decode: &DecodeMatrix,
    ) -> Vec<(usize, [f32; 2], f32, f32)> {
        let mut pairs = Vec::new();
        for band in 0..hrtf.num_bands() {
            if hrtf.band_frequency(band) > ILD_CHECK_MAX_HZ {
                continue;
            }
            for [az, el] in TEST_DIRECTIONS {
                let dir = hrtf.nearest_direction(&Position3D::from_spherical(az, el, 1.0));
                let decoded = decode.apply(band, &plane_wave(hrtf.direction(dir)));
                pairs.push((band, [az, el], ild_db(&decoded), ild_db(&hrtf.pair(band, dir))));
            }
        }
        pairs
    }

    #[test]
    fn test_decode_ild_matches_hrtf() {
        let hrtf = filterbank(33);
        let decode = DecodeMatrix::build(&hrtf, false).unwrap();

        for (band, [az, el], decoded, expected) in ild_pairs(&hrtf, &decode) {
            assert!(
                (decoded - expected).abs() <= ILD_TOLERANCE_DB,
                "{} Hz, az {az} el {el}: decoded ILD {decoded:.1} dB, HRTF {expected:.1} dB",
                hrtf.band_frequency(band)
            );
        }
    }

    #[test]
    fn test_lateral_ild_above_cutoff() {
        let hrtf = filterbank(33);
        let decode = DecodeMatrix::build(&hrtf, false).unwrap();
        let left = hrtf.nearest_direction(&Position3D::from_spherical(90.0, 0.0, 1.0));

        // 6 kHz, where the ITD phase used to cancel the sum
        let decoded = ild_db(&decode.apply(8, &plane_wave(hrtf.direction(left))));
        let expected = ild_db(&hrtf.pair(8, left));
        assert!(expected > 10.0);
        assert!((decoded - expected).abs() <= ILD_TOLERANCE_DB);
        assert_eq!(decode.get(8, 1, 2), decode.get_matrix(8)[(1, 2)]);
    }

    #[test]
    fn test_max_re_narrows_ild() {
        let hrtf = filterbank(33);
        let decode = DecodeMatrix::build(&hrtf, true).unwrap();

        for (band, [az, el], decoded, expected) in ild_pairs(&hrtf, &decode) {
            if expected.abs() < 1.0 {
                continue;
            }
            let ratio = decoded / expected;
            assert!(
                ratio > 0.35 && decoded.abs() <= expected.abs() + 1.0,
                "{} Hz, az {az} el {el}: decoded ILD {decoded:.1} dB, HRTF {expected:.1} dB",
                hrtf.band_frequency(band)
            );
        }
    }

    #[test]
    fn test_small_set_uses_every_direction() {
        let set = HrirSet {
            sample_rate: 48000,
            directions: vec![[90.0, 0.0], [270.0, 0.0], [0.0, 0.0]],
            hrirs: vec![
                HrirPair::new(vec![1.0, 0.0], vec![0.3, 0.0]),
                HrirPair::new(vec![0.3, 0.0], vec![1.0, 0.0]),
                HrirPair::new(vec![0.6, 0.0], vec![0.6, 0.0]),
            ],
        };
        let hrtf = HrtfFilterbank::from_hrirs(&set, &[0.0, 1000.0, 6000.0]).unwrap();
        let decode = DecodeMatrix::build(&hrtf, false).unwrap();
        for band in 0..3 {
            // the left/right dipole follows the two lateral measurements
            assert!(decode.get(band, 0, 1).norm() > 0.1);
            let y = decode.apply(band, &plane_wave(hrtf.direction(0)));
            assert!(ild_db(&y) > 3.0);
        }
    }
}
