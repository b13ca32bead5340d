//! Closed-form intrinsics from plane homographies.
//!
//! Two linear estimators are provided:
//! - [`PlanarIntrinsicsLinearInit::zhang`]: Zhang's method, optionally with the
//!   skew constrained to zero (needs 2 views with zero skew, 3 otherwise)
//! - [`PlanarIntrinsicsLinearInit::with_fixed_center`]: focal lengths only,
//!   principal point held at a known location (works from a single tilted view)
//!
//! Both ignore lens distortion; the result is meant to seed a non-linear
//! refinement.

use crate::math::solve_null_space;
use log::debug;
use nalgebra::{DMatrix, DVector, SVector};
use stereo_core::{FxFyCxCySkew, Mat3, Real};
use thiserror::Error;

/// Failure modes of the linear intrinsics estimators.
#[derive(Debug, Error)]
pub enum IntrinsicsInitError {
    #[error("need at least {required} homographies, got {found}")]
    NotEnoughViews { required: usize, found: usize },
    #[error("degenerate homography configuration: {0}")]
    Degenerate(String),
    #[error("svd failed")]
    SvdFailed,
}

/// Options for Zhang's estimator.
#[derive(Debug, Clone, Copy)]
pub struct ZhangOptions {
    /// Constrain skew to zero (drops `B12` from the unknowns).
    pub zero_skew: bool,
    /// Minimum relative gap between the two smallest singular values of the
    /// constraint matrix.
    pub min_relative_gap: Real,
}

impl Default for ZhangOptions {
    fn default() -> Self {
        Self {
            zero_skew: true,
            min_relative_gap: 1e-8,
        }
    }
}

/// Linear intrinsics initialisation from homographies.
#[derive(Debug, Clone, Copy)]
pub struct PlanarIntrinsicsLinearInit;

/// Zhang's closed-form estimate with default options (zero skew).
pub fn estimate_intrinsics_from_homographies(
    hmtxs: &[Mat3],
) -> Result<FxFyCxCySkew<Real>, IntrinsicsInitError> {
    PlanarIntrinsicsLinearInit::zhang(hmtxs, &ZhangOptions::default())
}

/// v_ij(H) as in Zhang's paper, over (B11, B12, B22, B13, B23, B33).
fn v_ij(hmtx: &Mat3, i: usize, j: usize) -> SVector<Real, 6> {
    let hi = hmtx.column(i);
    let hj = hmtx.column(j);

    SVector::<Real, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Scale that brings pixel-sized homography rows to unit order.
fn conditioning_scale(hmtxs: &[Mat3]) -> Real {
    let mut sum = 0.0;
    let mut count = 0usize;
    for h in hmtxs {
        let top = h.fixed_view::<2, 3>(0, 0).norm();
        let bottom = h.row(2).norm();
        if bottom > Real::EPSILON && top.is_finite() {
            sum += top / bottom;
            count += 1;
        }
    }
    if count == 0 || sum <= 0.0 {
        return 1.0;
    }
    (count as Real) / sum
}

fn conditioned(hmtxs: &[Mat3], pre: &Mat3) -> Result<Vec<Mat3>, IntrinsicsInitError> {
    hmtxs
        .iter()
        .map(|h| {
            let hc = pre * h;
            let norm = hc.norm();
            if !norm.is_finite() || norm <= Real::EPSILON {
                return Err(IntrinsicsInitError::Degenerate(
                    "homography is zero or non-finite".into(),
                ));
            }
            Ok(hc / norm)
        })
        .collect()
}

impl PlanarIntrinsicsLinearInit {
    /// Zhang's closed-form solution.
    pub fn zhang(
        hmtxs: &[Mat3],
        opts: &ZhangOptions,
    ) -> Result<FxFyCxCySkew<Real>, IntrinsicsInitError> {
        let required = if opts.zero_skew { 2 } else { 3 };
        if hmtxs.len() < required {
            return Err(IntrinsicsInitError::NotEnoughViews {
                required,
                found: hmtxs.len(),
            });
        }

        let s = conditioning_scale(hmtxs);
        let pre = Mat3::new(s, 0.0, 0.0, 0.0, s, 0.0, 0.0, 0.0, 1.0);
        let hs = conditioned(hmtxs, &pre)?;

        // columns kept from the full 6-vector
        let cols: &[usize] = if opts.zero_skew {
            &[0, 2, 3, 4, 5]
        } else {
            &[0, 1, 2, 3, 4, 5]
        };

        let m = hs.len();
        let mut vmtx = DMatrix::<Real>::zeros(2 * m, cols.len());
        for (k, hmtx) in hs.iter().enumerate() {
            let v12 = v_ij(hmtx, 0, 1);
            let d = v_ij(hmtx, 0, 0) - v_ij(hmtx, 1, 1);
            for (c, &src) in cols.iter().enumerate() {
                vmtx[(2 * k, c)] = v12[src];
                vmtx[(2 * k + 1, c)] = d[src];
            }
        }

        let ns = solve_null_space(&vmtx).ok_or(IntrinsicsInitError::SvdFailed)?;
        let gap = ns.relative_gap();
        if gap < opts.min_relative_gap {
            return Err(IntrinsicsInitError::Degenerate(format!(
                "constraint matrix is rank deficient (relative gap {:.3e})",
                gap
            )));
        }

        let mut b = [0.0; 6];
        for (c, &dst) in cols.iter().enumerate() {
            b[dst] = ns.vector[c];
        }
        let [b11, b12, b22, b13, b23, b33] = b;

        let denom = b11 * b22 - b12 * b12;
        let denom_norm = b11 * b11 + b22 * b22;
        if denom_norm <= 0.0 || denom.abs() / denom_norm <= 1e-6 {
            return Err(IntrinsicsInitError::Degenerate(
                "B11 B22 - B12^2 vanishes".into(),
            ));
        }

        let v0 = (b12 * b13 - b11 * b23) / denom;
        let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
        if denom <= 0.0 || lambda.signum() != b11.signum() {
            return Err(IntrinsicsInitError::Degenerate(
                "recovered image of the absolute conic is not positive definite".into(),
            ));
        }

        let alpha = (lambda / b11).sqrt();
        let beta = (lambda * b11 / denom).sqrt();
        let gamma = -b12 * alpha * alpha * beta / lambda;
        let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

        let k = FxFyCxCySkew {
            fx: alpha / s,
            fy: beta / s,
            cx: u0 / s,
            cy: v0 / s,
            skew: if opts.zero_skew { 0.0 } else { gamma / s },
        };
        validate(&k)?;
        debug!(
            "zhang init from {} views: fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
            m, k.fx, k.fy, k.cx, k.cy
        );
        Ok(k)
    }

    /// Focal lengths with the principal point fixed at `(cx, cy)` and zero skew.
    ///
    /// Solves `h1' D^-2 h2' = 0` and `h1' D^-2 h1' = h2' D^-2 h2'` for
    /// `D = diag(fx, fy, 1)` after shifting each homography by the principal
    /// point.
    pub fn with_fixed_center(
        hmtxs: &[Mat3],
        cx: Real,
        cy: Real,
    ) -> Result<FxFyCxCySkew<Real>, IntrinsicsInitError> {
        if hmtxs.is_empty() {
            return Err(IntrinsicsInitError::NotEnoughViews {
                required: 1,
                found: 0,
            });
        }

        let shift = Mat3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
        let shifted: Vec<Mat3> = hmtxs.iter().map(|h| shift * h).collect();
        let s = conditioning_scale(&shifted);
        let pre = Mat3::new(s, 0.0, 0.0, 0.0, s, 0.0, 0.0, 0.0, 1.0);
        let hs = conditioned(&shifted, &pre)?;

        let m = hs.len();
        let mut a = DMatrix::<Real>::zeros(2 * m, 2);
        let mut rhs = DVector::<Real>::zeros(2 * m);
        for (k, h) in hs.iter().enumerate() {
            let h1 = h.column(0);
            let h2 = h.column(1);
            a[(2 * k, 0)] = h1[0] * h2[0];
            a[(2 * k, 1)] = h1[1] * h2[1];
            rhs[2 * k] = -h1[2] * h2[2];
            a[(2 * k + 1, 0)] = h1[0] * h1[0] - h2[0] * h2[0];
            a[(2 * k + 1, 1)] = h1[1] * h1[1] - h2[1] * h2[1];
            rhs[2 * k + 1] = -(h1[2] * h1[2] - h2[2] * h2[2]);
        }

        let svd = a.svd(true, true);
        let s_max = svd.singular_values.max();
        let s_min = svd.singular_values.min();
        if s_max <= 0.0 || s_min / s_max < 1e-9 {
            return Err(IntrinsicsInitError::Degenerate(
                "focal length constraints are rank deficient".into(),
            ));
        }
        let sol = svd
            .solve(&rhs, Real::EPSILON)
            .map_err(|_| IntrinsicsInitError::SvdFailed)?;

        let (inv_fx2, inv_fy2) = (sol[0], sol[1]);
        if inv_fx2 <= 0.0 || inv_fy2 <= 0.0 {
            return Err(IntrinsicsInitError::Degenerate(
                "negative squared focal length".into(),
            ));
        }

        let k = FxFyCxCySkew {
            fx: 1.0 / (inv_fx2.sqrt() * s),
            fy: 1.0 / (inv_fy2.sqrt() * s),
            cx,
            cy,
            skew: 0.0,
        };
        validate(&k)?;
        debug!(
            "fixed-centre init from {} views: fx={:.3} fy={:.3}",
            m, k.fx, k.fy
        );
        Ok(k)
    }
}

fn validate(k: &FxFyCxCySkew<Real>) -> Result<(), IntrinsicsInitError> {
    let finite = [k.fx, k.fy, k.cx, k.cy, k.skew].iter().all(|v| v.is_finite());
    if !finite || k.fx <= 0.0 || k.fy <= 0.0 {
        return Err(IntrinsicsInitError::Degenerate(format!(
            "invalid intrinsics fx={} fy={} cx={} cy={}",
            k.fx, k.fy, k.cx, k.cy
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Rotation3, Vector3};

    fn gt() -> FxFyCxCySkew<Real> {
        FxFyCxCySkew {
            fx: 900.0,
            fy: 880.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        }
    }

    fn synthetic_homography(kmtx: &Mat3, rot: Rotation3<Real>, t: Vector3<Real>) -> Mat3 {
        let r_mat = rot.matrix();
        let mut hmtx = Matrix3::zeros();
        hmtx.set_column(0, &(kmtx * r_mat.column(0)));
        hmtx.set_column(1, &(kmtx * r_mat.column(1)));
        hmtx.set_column(2, &(kmtx * t));
        hmtx
    }

    fn tilted_views(kmtx: &Mat3) -> Vec<Mat3> {
        vec![
            synthetic_homography(
                kmtx,
                Rotation3::from_euler_angles(0.3, 0.0, 0.05),
                Vector3::new(0.1, -0.05, 1.0),
            ),
            synthetic_homography(
                kmtx,
                Rotation3::from_euler_angles(-0.05, 0.35, -0.1),
                Vector3::new(-0.05, 0.1, 1.2),
            ),
            synthetic_homography(
                kmtx,
                Rotation3::from_euler_angles(0.2, -0.25, 0.0),
                Vector3::new(0.0, 0.0, 0.9),
            ),
        ]
    }

    fn assert_close(est: &FxFyCxCySkew<Real>, gt: &FxFyCxCySkew<Real>, tol: Real) {
        assert!((est.fx - gt.fx).abs() < tol, "fx {} vs {}", est.fx, gt.fx);
        assert!((est.fy - gt.fy).abs() < tol, "fy {} vs {}", est.fy, gt.fy);
        assert!((est.cx - gt.cx).abs() < tol, "cx {} vs {}", est.cx, gt.cx);
        assert!((est.cy - gt.cy).abs() < tol, "cy {} vs {}", est.cy, gt.cy);
    }

    #[test]
    fn zhang_recovers_kmtx_from_three_views() {
        let intr = gt();
        let hs = tilted_views(&intr.k_matrix());
        let opts = ZhangOptions {
            zero_skew: false,
            ..ZhangOptions::default()
        };
        let est = PlanarIntrinsicsLinearInit::zhang(&hs, &opts).unwrap();
        assert_close(&est, &intr, 1e-4);
        assert!(est.skew.abs() < 1e-6);
    }

    #[test]
    fn zero_skew_zhang_needs_only_two_views() {
        let intr = gt();
        let hs = tilted_views(&intr.k_matrix());
        let est = estimate_intrinsics_from_homographies(&hs[..2]).unwrap();
        assert_close(&est, &intr, 1e-4);
        assert_eq!(est.skew, 0.0);
    }

    #[test]
    fn fixed_center_from_single_view() {
        let intr = gt();
        let kmtx = intr.k_matrix();
        let h = synthetic_homography(
            &kmtx,
            Rotation3::from_euler_angles(0.3, 0.2, 0.1),
            Vector3::new(0.05, -0.02, 1.1),
        );
        let est = PlanarIntrinsicsLinearInit::with_fixed_center(&[h], intr.cx, intr.cy).unwrap();
        assert_close(&est, &intr, 1e-4);
    }

    #[test]
    fn fronto_parallel_views_are_degenerate() {
        let intr = gt();
        let kmtx = intr.k_matrix();
        let hs: Vec<Mat3> = (0..3)
            .map(|i| {
                synthetic_homography(
                    &kmtx,
                    Rotation3::from_euler_angles(0.0, 0.0, 0.2 * i as Real),
                    Vector3::new(0.05 * i as Real, 0.0, 1.0),
                )
            })
            .collect();

        assert!(matches!(
            estimate_intrinsics_from_homographies(&hs),
            Err(IntrinsicsInitError::Degenerate(_))
        ));
        assert!(matches!(
            PlanarIntrinsicsLinearInit::with_fixed_center(&hs, intr.cx, intr.cy),
            Err(IntrinsicsInitError::Degenerate(_))
        ));
    }

    #[test]
    fn too_few_views_is_reported() {
        let intr = gt();
        let hs = tilted_views(&intr.k_matrix());
        assert!(matches!(
            estimate_intrinsics_from_homographies(&hs[..1]),
            Err(IntrinsicsInitError::NotEnoughViews {
                required: 2,
                found: 1
            })
        ));
    }
}
