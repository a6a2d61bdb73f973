//! HRTF filterbank, synthetic HRIRs and lookup tables

use std::f32::consts::PI;

use nalgebra::{Matrix2, Vector2};
use num_complex::Complex32;

use super::{HrirPair, HrirSet};
use crate::error::{CropacError, CropacResult};
use crate::hoa::fibonacci_sphere;
use crate::position::Position3D;

/// Impulse length of the built-in set
pub const DEFAULT_HRIR_LENGTH: usize = 256;

/// Average adult head radius (m)
const HEAD_RADIUS: f32 = 0.0875;
/// Speed of sound (m/s)
const SPEED_OF_SOUND: f32 = 343.0;
/// Leading silence before the earliest arrival (samples)
const ONSET_SAMPLES: f32 = 32.0;
/// Largest interaural lag searched by [`estimate_itd`] (s)
const MAX_ITD_SECONDS: f32 = 0.001;

/// Grid resolution of [`NearestDirectionTable`] (degrees)
const TABLE_RESOLUTION_DEG: f32 = 5.0;
const TABLE_AZIMUTHS: usize = 73;
const TABLE_ELEVATIONS: usize = 37;

/// Points used to integrate the diffuse-field covariance
const DIFFUSE_POINTS: usize = 64;

/// Built-in spherical-head HRIR set at `sample_rate`
///
/// Woodworth arrival times with a Brown-Duda head-shadow filter per ear,
/// sampled every 15° in azimuth and 20° in elevation (±60°), plus both poles.
pub fn default_hrir_set(sample_rate: u32) -> HrirSet {
    let mut directions = Vec::with_capacity(170);
    for el in (-60..=60).step_by(20) {
        for az in (0..360).step_by(15) {
            directions.push([az as f32, el as f32]);
        }
    }
    directions.push([0.0, 90.0]);
    directions.push([0.0, -90.0]);

    let hrirs = directions
        .iter()
        .map(|&[az, el]| spherical_head_hrir(&Position3D::from_spherical(az, el, 1.0), sample_rate))
        .collect();

    HrirSet {
        sample_rate,
        directions,
        hrirs,
    }
}

fn spherical_head_hrir(source: &Position3D, sample_rate: u32) -> HrirPair {
    let left_ear = Position3D::new(0.0, 1.0, 0.0);
    let right_ear = Position3D::new(0.0, -1.0, 0.0);
    HrirPair::new(
        spherical_head_ear(source.angle_to(&left_ear), sample_rate),
        spherical_head_ear(source.angle_to(&right_ear), sample_rate),
    )
}

/// One ear's response for a source `theta` radians away from the ear axis
fn spherical_head_ear(theta: f32, sample_rate: u32) -> Vec<f32> {
    let fs = sample_rate as f32;
    let head_time = HEAD_RADIUS / SPEED_OF_SOUND;

    // Woodworth: shorter path on the near side, creeping wave on the far side
    let arrival = if theta < PI / 2.0 {
        -head_time * theta.cos()
    } else {
        head_time * (theta - PI / 2.0)
    };
    let delay = ONSET_SAMPLES + (head_time + arrival) * fs;

    let mut ir = vec![0.0f32; DEFAULT_HRIR_LENGTH];
    let whole = delay.floor() as usize;
    let frac = delay - delay.floor();
    if whole + 1 < ir.len() {
        ir[whole] = 1.0 - frac;
        ir[whole + 1] = frac;
    }

    // Brown-Duda head shadow, H(s) = (alpha*s + beta) / (s + beta), bilinear
    let alpha = 1.05 + 0.95 * (1.2 * theta).cos();
    let beta = 2.0 * SPEED_OF_SOUND / HEAD_RADIUS;
    let k = 2.0 * fs;
    let a0 = k + beta;
    let b0 = (alpha * k + beta) / a0;
    let b1 = (beta - alpha * k) / a0;
    let a1 = (beta - k) / a0;

    let mut x1 = 0.0f32;
    let mut y1 = 0.0f32;
    for s in ir.iter_mut() {
        let x = *s;
        let y = b0 * x + b1 * x1 - a1 * y1;
        x1 = x;
        y1 = y;
        *s = y;
    }
    ir
}

/// Interaural time difference (`delay_left - delay_right`, seconds)
///
/// Peak of the interaural cross-correlation within ±1 ms.
pub fn estimate_itd(pair: &HrirPair, sample_rate: u32) -> f32 {
    let n = pair.left.len().min(pair.right.len());
    let max_lag = ((MAX_ITD_SECONDS * sample_rate as f32).ceil() as isize).min(n as isize - 1);

    let mut best_lag = 0isize;
    let mut best = f32::NEG_INFINITY;
    for lag in -max_lag..=max_lag {
        // r(lag) = sum left[i] * right[i + lag]
        let mut r = 0.0f32;
        for i in 0..n as isize {
            let j = i + lag;
            if j >= 0 && j < n as isize {
                r += pair.left[i as usize] * pair.right[j as usize];
            }
        }
        if r > best {
            best = r;
            best_lag = lag;
        }
    }

    // positive lag: right ear arrives later
    -(best_lag as f32) / sample_rate as f32
}

/// Per-band binaural transfer functions for every HRIR direction
///
/// Coefficients are stored `[band][direction][ear]`. Magnitudes come from the
/// HRIRs evaluated at each band centre, phases from the estimated ITD.
#[derive(Debug, Clone)]
pub struct HrtfFilterbank {
    band_freqs: Vec<f32>,
    directions: Vec<Position3D>,
    itds: Vec<f32>,
    coeffs: Vec<Complex32>,
}

impl HrtfFilterbank {
    /// Convert an HRIR set for the given band centre frequencies
    pub fn from_hrirs(set: &HrirSet, band_freqs: &[f32]) -> CropacResult<Self> {
        set.validate()?;
        if band_freqs.is_empty() {
            return Err(CropacError::InvalidConfig("no bands".into()));
        }

        let num_dirs = set.num_directions();
        let length = set.length();
        let fs = set.sample_rate() as f32;
        let nyquist = fs / 2.0;

        let directions: Vec<Position3D> = (0..num_dirs).map(|d| set.direction(d)).collect();
        let itds: Vec<f32> = set
            .hrirs
            .iter()
            .map(|pair| estimate_itd(pair, set.sample_rate()))
            .collect();

        let mut coeffs = vec![Complex32::new(0.0, 0.0); band_freqs.len() * num_dirs * 2];
        let mut twiddles = vec![Complex32::new(0.0, 0.0); length];

        for (band, &freq) in band_freqs.iter().enumerate() {
            // beyond the HRIR bandwidth keep the Nyquist magnitude
            let omega = 2.0 * PI * freq.clamp(0.0, nyquist) / fs;
            for (n, tw) in twiddles.iter_mut().enumerate() {
                *tw = Complex32::from_polar(1.0, -omega * n as f32);
            }

            for dir in 0..num_dirs {
                let pair = set.hrir(dir);
                let half_itd = itds[dir] / 2.0;
                for ear in 0..2 {
                    let mag = pair
                        .ear(ear)
                        .iter()
                        .zip(&twiddles)
                        .fold(Complex32::new(0.0, 0.0), |acc, (&h, &tw)| acc + tw * h)
                        .norm();
                    let sign = if ear == 0 { -1.0 } else { 1.0 };
                    let phase = sign * 2.0 * PI * freq * half_itd;
                    coeffs[(band * num_dirs + dir) * 2 + ear] = Complex32::from_polar(mag, phase);
                }
            }
        }

        Ok(Self {
            band_freqs: band_freqs.to_vec(),
            directions,
            itds,
            coeffs,
        })
    }

    pub fn num_bands(&self) -> usize {
        self.band_freqs.len()
    }

    /// Centre frequency of `band` in Hz
    pub fn band_frequency(&self, band: usize) -> f32 {
        self.band_freqs[band]
    }

    pub fn num_directions(&self) -> usize {
        self.directions.len()
    }

    pub fn direction(&self, index: usize) -> &Position3D {
        &self.directions[index]
    }

    /// Per-direction ITD in seconds
    pub fn itds(&self) -> &[f32] {
        &self.itds
    }

    pub fn coefficient(&self, band: usize, direction: usize, ear: usize) -> Complex32 {
        self.coeffs[(band * self.directions.len() + direction) * 2 + ear]
    }

    /// `[left, right]` transfer functions of one direction
    pub fn pair(&self, band: usize, direction: usize) -> Vector2<Complex32> {
        Vector2::new(
            self.coefficient(band, direction, 0),
            self.coefficient(band, direction, 1),
        )
    }

    /// Index of the measurement direction closest to `target`
    pub fn nearest_direction(&self, target: &Position3D) -> usize {
        nearest_index(&self.directions, target)
    }
}

fn nearest_index(directions: &[Position3D], target: &Position3D) -> usize {
    let t = target.normalize();
    directions
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_dot), (i, d)| {
            let dot = d.dot(&t);
            if dot > best_dot { (i, dot) } else { (best, best_dot) }
        })
        .0
}

/// Direction-of-arrival → HRTF direction index on a 5° grid
///
/// Lookup is allocation-free and constant time, so it can be used on the
/// audio path.
#[derive(Debug, Clone)]
pub struct NearestDirectionTable {
    indices: Vec<usize>,
}

impl NearestDirectionTable {
    pub fn new(hrtf: &HrtfFilterbank) -> Self {
        let mut indices = Vec::with_capacity(TABLE_AZIMUTHS * TABLE_ELEVATIONS);
        for el_idx in 0..TABLE_ELEVATIONS {
            for az_idx in 0..TABLE_AZIMUTHS {
                let az = -180.0 + az_idx as f32 * TABLE_RESOLUTION_DEG;
                let el = -90.0 + el_idx as f32 * TABLE_RESOLUTION_DEG;
                let dir = Position3D::from_spherical(az, el, 1.0);
                indices.push(hrtf.nearest_direction(&dir));
            }
        }
        Self { indices }
    }

    pub fn lookup(&self, direction: &Position3D) -> usize {
        let sph = direction.to_spherical();
        let az_idx = ((sph.azimuth + 180.0) / TABLE_RESOLUTION_DEG).round() as usize;
        let el_idx = ((sph.elevation + 90.0) / TABLE_RESOLUTION_DEG).round() as usize;
        let az_idx = az_idx.min(TABLE_AZIMUTHS - 1);
        let el_idx = el_idx.min(TABLE_ELEVATIONS - 1);
        self.indices[el_idx * TABLE_AZIMUTHS + az_idx]
    }
}

/// Binaural covariance of a unit-power diffuse field, per band
pub fn diffuse_field_covariance(hrtf: &HrtfFilterbank) -> Vec<Matrix2<Complex32>> {
    let points: Vec<usize> = fibonacci_sphere(DIFFUSE_POINTS)
        .iter()
        .map(|p| hrtf.nearest_direction(p))
        .collect();
    let norm = 1.0 / DIFFUSE_POINTS as f32;

    (0..hrtf.num_bands())
        .map(|band| {
            points.iter().fold(Matrix2::zeros(), |acc, &dir| {
                let h = hrtf.pair(band, dir);
                acc + h * h.adjoint()
            }) * Complex32::new(norm, 0.0)
        })
        .collect()
}
