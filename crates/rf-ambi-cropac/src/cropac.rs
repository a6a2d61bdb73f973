//! Cross-Pattern-Coherence (CroPaC) spatial analysis
//!
//! Per band and hop the analyzer keeps an exponentially smoothed SH
//! covariance, estimates the direction of arrival from the active intensity
//! vector, and measures how much of the omnidirectional energy is coherent
//! with a dipole steered toward that direction. The result is a 2×2 target
//! binaural covariance: a directional part rendered through the HRTF of the
//! estimated direction, and a diffuse part taken from the diffuse-field
//! reference.

use nalgebra::{Matrix2, Matrix4, SVector, Vector3};
use num_complex::Complex32;

use crate::codec::CodecParameters;
use crate::hoa::{ACN_W, ACN_X, ACN_Y, ACN_Z, NUM_SH_SIGNALS};
use crate::position::Position3D;

/// Below this omni energy a band is treated as silent
pub const ENERGY_FLOOR: f32 = 1e-14;

/// Covariance entries smaller than this are flushed to zero
const DENORMAL_FLOOR: f32 = 1e-30;

/// Smallest intensity magnitude that still defines a direction
const INTENSITY_FLOOR: f32 = 1e-20;

/// Strategy computing the direct-to-diffuse coherence of a band
pub trait CoherenceEstimator: Send + Sync {
    /// Coherence in `[0, 1]` for SH covariance `cov` and unit direction
    /// `direction`
    fn coherence(&self, cov: &Matrix4<Complex32>, direction: &Vector3<f32>) -> f32;
}

/// Cross-pattern coherence between the omni and a steered dipole
///
/// `G = 2·Re E[W*·D] / (E|W|² + E|D|²)` with `D = d·[X, Y, Z]`, which is 1 for
/// a single plane wave from `d` and 0 for an isotropic diffuse field.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossPatternCoherence;

impl CoherenceEstimator for CrossPatternCoherence {
    fn coherence(&self, cov: &Matrix4<Complex32>, direction: &Vector3<f32>) -> f32 {
        let steer = dipole_weights(direction);

        let omni = cov[(ACN_W, ACN_W)].re;
        let mut cross = Complex32::new(0.0, 0.0);
        let mut dipole = Complex32::new(0.0, 0.0);
        for a in 1..NUM_SH_SIGNALS {
            cross += cov[(a, ACN_W)] * steer[a];
            for b in 1..NUM_SH_SIGNALS {
                dipole += cov[(a, b)] * (steer[a] * steer[b]);
            }
        }

        let denom = omni + dipole.re;
        if denom <= ENERGY_FLOOR {
            return 0.0;
        }
        let g = 2.0 * cross.re / denom;
        if g.is_finite() { g.clamp(0.0, 1.0) } else { 0.0 }
    }
}

/// ACN weights of a first-order dipole pointing along `direction`
fn dipole_weights(direction: &Vector3<f32>) -> [f32; NUM_SH_SIGNALS] {
    let mut w = [0.0; NUM_SH_SIGNALS];
    w[ACN_X] = direction.x;
    w[ACN_Y] = direction.y;
    w[ACN_Z] = direction.z;
    w
}

/// Analysis result of one band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandEstimate {
    /// Direct-to-diffuse coherence in `[0, 1]`
    pub coherence: f32,
    /// Estimated direction of arrival (unit vector)
    pub direction: Position3D,
    /// Smoothed omnidirectional energy
    pub energy: f32,
}

impl Default for BandEstimate {
    fn default() -> Self {
        Self {
            coherence: 0.0,
            direction: Position3D::front(),
            energy: 0.0,
        }
    }
}

/// Per-band CroPaC state
pub struct CropacAnalyzer {
    covariances: Vec<Matrix4<Complex32>>,
    estimates: Vec<BandEstimate>,
    estimator: Box<dyn CoherenceEstimator>,
}

impl CropacAnalyzer {
    pub fn new(num_bands: usize) -> Self {
        Self::with_estimator(num_bands, Box::new(CrossPatternCoherence))
    }

    pub fn with_estimator(num_bands: usize, estimator: Box<dyn CoherenceEstimator>) -> Self {
        Self {
            covariances: vec![Matrix4::zeros(); num_bands],
            estimates: vec![BandEstimate::default(); num_bands],
            estimator,
        }
    }

    pub fn num_bands(&self) -> usize {
        self.covariances.len()
    }

    /// `C ← c·C + (1 − c)·x·xᴴ`
    pub fn update_covariance(
        &mut self,
        band: usize,
        x: &SVector<Complex32, NUM_SH_SIGNALS>,
        averaging: f32,
    ) {
        let c = averaging.clamp(0.0, 1.0);
        let cov = &mut self.covariances[band];
        *cov = *cov * Complex32::new(c, 0.0) + (x * x.adjoint()) * Complex32::new(1.0 - c, 0.0);
        for v in cov.iter_mut() {
            if v.norm_sqr() < DENORMAL_FLOOR || !v.is_finite() {
                *v = Complex32::new(0.0, 0.0);
            }
        }
    }

    /// Estimate direction and coherence of a band from its current covariance
    /// and return the target binaural covariance
    ///
    /// `balance` runs from 0 (diffuse only) through 1 (as analysed) to 2
    /// (direct only).
    pub fn analyze_band(
        &mut self,
        band: usize,
        balance: f32,
        codec: &CodecParameters,
    ) -> Matrix2<Complex32> {
        let cov = &self.covariances[band];
        let energy = cov[(ACN_W, ACN_W)].re.max(0.0);
        let diffuse = *codec.diffuse_covariance(band);

        if energy < ENERGY_FLOOR {
            self.estimates[band] = BandEstimate {
                energy,
                ..BandEstimate::default()
            };
            return diffuse * Complex32::new(energy, 0.0);
        }

        let intensity = Vector3::new(
            cov[(ACN_X, ACN_W)].re,
            cov[(ACN_Y, ACN_W)].re,
            cov[(ACN_Z, ACN_W)].re,
        );
        let direction = if intensity.norm_squared() > INTENSITY_FLOOR {
            intensity.normalize()
        } else {
            Vector3::x()
        };

        let coherence = self.estimator.coherence(cov, &direction);
        let position = Position3D::from(direction);

        let hrtf_dir = codec.direction_table().lookup(&position);
        let h = codec.hrtf().pair(band, hrtf_dir);
        let direct = (h * h.adjoint()) * Complex32::new(coherence * energy, 0.0);
        let diffuse = diffuse * Complex32::new((1.0 - coherence) * energy, 0.0);

        let balance = balance.clamp(0.0, 2.0);
        let direct_weight = balance.min(1.0);
        let diffuse_weight = (2.0 - balance).min(1.0);

        self.estimates[band] = BandEstimate {
            coherence,
            direction: position,
            energy,
        };

        direct * Complex32::new(direct_weight, 0.0) + diffuse * Complex32::new(diffuse_weight, 0.0)
    }

    /// Smoothed SH covariance of a band
    pub fn covariance(&self, band: usize) -> &Matrix4<Complex32> {
        &self.covariances[band]
    }

    /// Latest estimate of a band
    pub fn estimate(&self, band: usize) -> &BandEstimate {
        &self.estimates[band]
    }

    pub fn reset(&mut self) {
        self.covariances.fill(Matrix4::zeros());
        self.estimates.fill(BandEstimate::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecConfig;
    use crate::hoa::sh_coefficients;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn codec(bands: usize) -> CodecParameters {
        let freqs: Vec<f32> = (0..bands)
            .map(|k| k as f32 * 24000.0 / (bands - 1) as f32)
            .collect();
        CodecParameters::build(&CodecConfig::default(), &freqs, 48000, None, 1).unwrap()
    }

    fn gaussian(rng: &mut StdRng) -> Complex32 {
        // Box-Muller
        let u1: f32 = rng.random_range(1e-7..1.0);
        let u2: f32 = rng.random();
        let r = (-2.0 * u1.ln()).sqrt() * std::f32::consts::FRAC_1_SQRT_2;
        let t = 2.0 * std::f32::consts::PI * u2;
        Complex32::new(r * t.cos(), r * t.sin())
    }

    #[test]
    fn test_plane_wave_is_coherent() {
        let codec = codec(9);
        let mut analyzer = CropacAnalyzer::new(9);
        let dir = Position3D::from_spherical(60.0, 20.0, 1.0);
        let sh = sh_coefficients(&dir);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            let p = gaussian(&mut rng);
            let x = SVector::<Complex32, 4>::from_fn(|ch, _| p * sh[ch]);
            analyzer.update_covariance(4, &x, 0.9);
        }
        analyzer.analyze_band(4, 1.0, &codec);

        let est = analyzer.estimate(4);
        assert!(est.coherence > 0.99, "coherence = {}", est.coherence);
        assert!(est.direction.angle_to(&dir) < 5e-3);
    }

    #[test]
    fn test_diffuse_field_is_incoherent() {
        let codec = codec(9);
        let mut analyzer = CropacAnalyzer::new(9);
        let mut rng = StdRng::seed_from_u64(42);
        let dipole_scale = 1.0 / 3.0_f32.sqrt();

        let mut sum = 0.0;
        let hops = 2000;
        for hop in 0..hops {
            let x = SVector::<Complex32, 4>::from_fn(|ch, _| {
                let g = gaussian(&mut rng);
                if ch == ACN_W { g } else { g * dipole_scale }
            });
            analyzer.update_covariance(2, &x, 0.995);
            analyzer.analyze_band(2, 1.0, &codec);
            if hop >= hops / 2 {
                sum += analyzer.estimate(2).coherence;
            }
        }

        let mean = sum / (hops / 2) as f32;
        assert!(mean < 0.15, "mean coherence = {mean}");
    }

    #[test]
    fn test_silence_falls_back_to_diffuse() {
        let codec = codec(9);
        let mut analyzer = CropacAnalyzer::new(9);
        let x = SVector::<Complex32, 4>::zeros();
        analyzer.update_covariance(3, &x, 0.86);
        let target = analyzer.analyze_band(3, 2.0, &codec);

        assert_eq!(analyzer.estimate(3).coherence, 0.0);
        assert!(target.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn test_balance_extremes() {
        let codec = codec(9);
        let mut analyzer = CropacAnalyzer::new(9);
        let sh = sh_coefficients(&Position3D::front());
        let x = SVector::<Complex32, 4>::from_fn(|ch, _| Complex32::new(sh[ch], 0.0));
        for _ in 0..50 {
            analyzer.update_covariance(5, &x, 0.5);
        }

        // fully coherent: diffuse-only balance leaves nothing
        let diffuse_only = analyzer.analyze_band(5, 0.0, &codec);
        assert!(diffuse_only.iter().all(|v| v.norm() < 1e-4));

        let direct_only = analyzer.analyze_band(5, 2.0, &codec);
        assert!(direct_only[(0, 0)].re > 0.0);
    }

    struct Fixed(f32);

    impl CoherenceEstimator for Fixed {
        fn coherence(&self, _cov: &Matrix4<Complex32>, _direction: &Vector3<f32>) -> f32 {
            self.0
        }
    }

    #[test]
    fn test_custom_estimator() {
        let codec = codec(9);
        let mut analyzer = CropacAnalyzer::with_estimator(9, Box::new(Fixed(0.25)));
        let x = SVector::<Complex32, 4>::from_fn(|_, _| Complex32::new(0.5, 0.0));
        analyzer.update_covariance(1, &x, 0.0);
        analyzer.analyze_band(1, 1.0, &codec);
        assert_eq!(analyzer.estimate(1).coherence, 0.25);

        analyzer.reset();
        assert_eq!(analyzer.covariance(1), &Matrix4::zeros());
    }
}
