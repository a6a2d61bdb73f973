//! Covariance-domain optimal mixing
//!
//! Finds the 2×2 matrix `M` that, applied to the linear binaural decode,
//! yields the target covariance while staying as close as possible to the
//! linear decode itself (Vilkamo, Bäckström, Kuntz 2013, with identity
//! prototype). Decompositions are regularized so ill-conditioned or silent
//! bands degrade gracefully instead of producing NaNs.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2};
use num_complex::Complex32;

use crate::cropac::ENERGY_FLOOR;

/// Global output gain applied after mixing
pub const POST_GAIN_DB: f32 = -9.0;

/// Decode balance at or below this is treated as fully linear
const BYPASS_EPS: f32 = 1e-4;

/// Eigenvalues of `Cx` are floored at this fraction of the largest one
/// before inversion
const REGULARIZATION: f32 = 0.2;

/// Absolute eigenvalue floor
const ABSOLUTE_FLOOR: f32 = 1e-20;

const DECOMPOSITION_EPS: f32 = f32::EPSILON;
const DECOMPOSITION_MAX_ITER: usize = 64;

/// `(K, U, λ)` with `K·Kᴴ = C` and `C = U·diag(λ)·Uᴴ`
type HermitianFactor = (Matrix2<Complex32>, Matrix2<Complex32>, [f32; 2]);

#[inline]
fn cplx(v: f32) -> Complex32 {
    Complex32::new(v, 0.0)
}

fn hermitian_factor(c: &Matrix2<Complex32>) -> Option<HermitianFactor> {
    let eig = c.try_symmetric_eigen(DECOMPOSITION_EPS, DECOMPOSITION_MAX_ITER)?;
    let lambda = [eig.eigenvalues[0].max(0.0), eig.eigenvalues[1].max(0.0)];
    let u = eig.eigenvectors;
    let sqrt = Matrix2::from_diagonal(&Vector2::new(
        cplx(lambda[0].sqrt()),
        cplx(lambda[1].sqrt()),
    ));
    Some((u * sqrt, u, lambda))
}

/// Optimal mixing matrix mapping signals with covariance `cx` to `cy`
///
/// Returns `None` if a decomposition fails or an input is non-finite.
pub fn formulate_mixing_matrix(
    cx: &Matrix2<Complex32>,
    cy: &Matrix2<Complex32>,
) -> Option<Matrix2<Complex32>> {
    if !cx.iter().chain(cy.iter()).all(|v| v.is_finite()) {
        return None;
    }

    let (kx, ux, lambda) = hermitian_factor(cx)?;
    let (ky, _, _) = hermitian_factor(cy)?;

    // regularized Kx⁻¹ = Λ^-1/2 · Uᴴ
    let floor = (lambda[0].max(lambda[1]) * REGULARIZATION).max(ABSOLUTE_FLOOR);
    let inv_sqrt = Matrix2::from_diagonal(&Vector2::new(
        cplx(1.0 / lambda[0].max(floor).sqrt()),
        cplx(1.0 / lambda[1].max(floor).sqrt()),
    ));
    let kx_inv = inv_sqrt * ux.adjoint();

    // energy normalization of the identity prototype
    let g = Matrix2::from_diagonal(&Vector2::new(
        cplx((cy[(0, 0)].re.max(0.0) / cx[(0, 0)].re.max(ABSOLUTE_FLOOR)).sqrt()),
        cplx((cy[(1, 1)].re.max(0.0) / cx[(1, 1)].re.max(ABSOLUTE_FLOOR)).sqrt()),
    ));

    let a = kx.adjoint() * g * ky;
    let svd = a.try_svd(true, true, DECOMPOSITION_EPS, DECOMPOSITION_MAX_ITER)?;
    let u = svd.u?;
    let v_t = svd.v_t?;
    let p = v_t.adjoint() * u.adjoint();

    let m = ky * p * kx_inv;
    if m.iter().all(|v| v.is_finite()) {
        Some(m)
    } else {
        None
    }
}

/// Per-band mixing stage
#[derive(Debug, Clone, Copy)]
pub struct CovarianceMixer {
    post_gain: f32,
}

impl CovarianceMixer {
    pub fn new() -> Self {
        Self {
            post_gain: 10.0_f32.powf(POST_GAIN_DB / 20.0),
        }
    }

    pub fn post_gain(&self) -> f32 {
        self.post_gain
    }

    /// Covariance of the linear decode, `D·Cx·Dᴴ`
    pub fn linear_covariance(
        decode: &Matrix2x4<Complex32>,
        sh_covariance: &Matrix4<Complex32>,
    ) -> Matrix2<Complex32> {
        decode * sh_covariance * decode.adjoint()
    }

    /// Mixing matrix for one band
    ///
    /// The target is `(1 − b)·C_lin + b·C_param` for decode balance `b`.
    /// A fully linear balance or a silent band gives the identity.
    pub fn mixing_matrix(
        &self,
        linear: &Matrix2<Complex32>,
        parametric: &Matrix2<Complex32>,
        decode_balance: f32,
    ) -> Matrix2<Complex32> {
        let balance = decode_balance.clamp(0.0, 1.0);
        if balance <= BYPASS_EPS || linear.trace().re < ENERGY_FLOOR {
            return Matrix2::identity();
        }

        let target = linear * cplx(1.0 - balance) + parametric * cplx(balance);
        formulate_mixing_matrix(linear, &target).unwrap_or_else(Matrix2::identity)
    }

    /// `post_gain · eq · M · y`
    #[inline]
    pub fn mix(
        &self,
        mixing: &Matrix2<Complex32>,
        linear: &Vector2<Complex32>,
        eq: f32,
    ) -> Vector2<Complex32> {
        let gain = cplx(self.post_gain * eq);
        let out = (mixing * linear) * gain;
        if out.iter().all(|v| v.is_finite()) {
            out
        } else {
            linear * gain
        }
    }
}

impl Default for CovarianceMixer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hermitian(a: f32, b: f32, off: Complex32) -> Matrix2<Complex32> {
        Matrix2::new(cplx(a), off, off.conj(), cplx(b))
    }

    fn assert_close(a: &Matrix2<Complex32>, b: &Matrix2<Complex32>, tol: f32) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < tol, "{a} vs {b}");
        }
    }

    #[test]
    fn test_linear_balance_is_identity() {
        let mixer = CovarianceMixer::new();
        let lin = hermitian(1.0, 0.8, Complex32::new(0.3, 0.1));
        let param = hermitian(2.0, 0.1, Complex32::new(0.0, 0.0));
        let m = mixer.mixing_matrix(&lin, &param, 0.0);
        assert_eq!(m, Matrix2::identity());

        let y = Vector2::new(Complex32::new(0.5, -0.2), Complex32::new(-0.1, 0.4));
        let out = mixer.mix(&m, &y, 1.0);
        assert!((out - y * cplx(mixer.post_gain())).norm() < 1e-7);
    }

    #[test]
    fn test_matching_own_covariance_is_identity() {
        let cx = hermitian(1.0, 0.7, Complex32::new(0.2, -0.1));
        let m = formulate_mixing_matrix(&cx, &cx).unwrap();
        assert_close(&m, &Matrix2::identity(), 1e-3);
    }

    #[test]
    fn test_covariance_matching() {
        let cx = hermitian(1.0, 0.6, Complex32::new(0.1, 0.05));
        let cy = hermitian(0.4, 1.3, Complex32::new(-0.2, 0.3));
        let m = formulate_mixing_matrix(&cx, &cy).unwrap();
        let achieved = m * cx * m.adjoint();
        assert_close(&achieved, &cy, 1e-3);
    }

    #[test]
    fn test_singular_input_is_regularized() {
        // rank one: fully coherent ears
        let h = Vector2::new(Complex32::new(1.0, 0.0), Complex32::new(0.3, 0.4));
        let cx = h * h.adjoint();
        let cy = hermitian(0.5, 0.5, Complex32::new(0.0, 0.0));

        let m = formulate_mixing_matrix(&cx, &cy).unwrap();
        assert!(m.iter().all(|v| v.is_finite()));
        // bounded gain
        assert!(m.iter().all(|v| v.norm() < 1e3));
    }

    #[test]
    fn test_non_finite_falls_back() {
        let mixer = CovarianceMixer::new();
        let lin = hermitian(1.0, 1.0, Complex32::new(0.0, 0.0));
        let bad = hermitian(f32::NAN, 1.0, Complex32::new(0.0, 0.0));
        assert!(formulate_mixing_matrix(&lin, &bad).is_none());
        assert_eq!(mixer.mixing_matrix(&lin, &bad, 1.0), Matrix2::identity());

        let silent = Matrix2::zeros();
        assert_eq!(mixer.mixing_matrix(&silent, &lin, 1.0), Matrix2::identity());
    }

    #[test]
    fn test_post_gain() {
        let mixer = CovarianceMixer::new();
        assert!((20.0 * mixer.post_gain().log10() - POST_GAIN_DB).abs() < 1e-4);
    }
}
