//! Two-view linear triangulation (DLT).
//!
//! For projection matrices `P_A`, `P_B` and pixels `(x_A, y_A)`, `(x_B, y_B)`
//! the homogeneous point `X` satisfies `A X = 0` with
//!
//! ```text
//! A = [ y_A P_A[2] - P_A[1]
//!       P_A[0] - x_A P_A[2]
//!       y_B P_B[2] - P_B[1]
//!       P_B[0] - x_B P_B[2] ]
//! ```
//!
//! `X` is the right singular vector of the smallest singular value.
//!
//! Every row of `A` is orthogonal to the optical centre of its camera, so when
//! the centres coincide that centre is an exact null vector and the singular
//! gap alone says nothing once the pixels carry noise. The solution is
//! therefore also checked against the baseline (parallax) and for positive
//! depth in both cameras.

use nalgebra::{Matrix4, RowVector4};
use serde::{Deserialize, Serialize};
use stereo_core::{smallest_two_indices, Mat34, Pt2, Pt3, Real};
use thiserror::Error;

/// Thresholds used to reject ill-posed triangulations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationOptions {
    /// Minimum `(s_2 - s_1) / s_max` over the singular values of `A`.
    pub min_singular_gap: Real,
    /// Minimum `|w|` of the unit-norm homogeneous solution.
    pub min_abs_w: Real,
    /// Minimum baseline over the larger camera-to-point distance.
    pub min_parallax: Real,
}

impl Default for TriangulationOptions {
    fn default() -> Self {
        Self {
            // numerical rank tolerance, about sqrt(eps)
            min_singular_gap: 1e-8,
            min_abs_w: 1e-12,
            // ~0.06 degrees between the two rays
            min_parallax: 1e-3,
        }
    }
}

/// Depth below this fraction of the point distance counts as on the image plane.
const MIN_RELATIVE_DEPTH: Real = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TriangulationError {
    #[error("camera centres coincide (baseline {baseline:.3e})")]
    CoincidentCentres { baseline: Real },
    #[error("degenerate triangulation: relative singular value gap {gap:.3e}")]
    Degenerate { gap: Real },
    #[error("triangulated point is at infinity (w = {w:.3e})")]
    PointAtInfinity { w: Real },
    #[error("insufficient parallax: baseline is {ratio:.3e} of the point distance")]
    LowParallax { ratio: Real },
    #[error("point is not in front of both cameras (depths {depth_a:.3e}, {depth_b:.3e})")]
    BehindCamera { depth_a: Real, depth_b: Real },
    #[error("projection matrix has no finite optical centre")]
    InfiniteCamera,
    #[error("svd failed during triangulation")]
    SvdFailed,
}

impl TriangulationError {
    /// True for failures caused by the viewing geometry rather than bad input.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            Self::CoincidentCentres { .. }
                | Self::Degenerate { .. }
                | Self::LowParallax { .. }
                | Self::BehindCamera { .. }
        )
    }
}

/// Successful triangulation with its conditioning diagnostic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoViewPoint {
    pub point: Pt3,
    /// Relative gap between the two smallest singular values of `A`.
    pub singular_gap: Real,
    /// Baseline over the larger camera-to-point distance.
    pub parallax: Real,
}

/// Optical centre `C = -M^-1 p_4` of `P = [M | p_4]`.
pub fn camera_centre(p: &Mat34) -> Option<Pt3> {
    let m = p.fixed_columns::<3>(0).into_owned();
    let c = -(m.try_inverse()? * p.column(3));
    c.iter().all(|v| v.is_finite()).then(|| Pt3::from(c))
}

/// Signed depth of `x` along the principal axis of `P`.
pub fn point_depth(p: &Mat34, x: &Pt3) -> Real {
    let m3 = p.fixed_view::<1, 3>(2, 0);
    let sign = p.fixed_columns::<3>(0).determinant().signum();
    let w = (m3 * x.coords)[0] + p[(2, 3)];
    sign * w / m3.norm()
}

/// Build the 4x4 DLT system for one point seen by two cameras.
pub fn dlt_system(p_a: &Mat34, x_a: &Pt2, p_b: &Mat34, x_b: &Pt2) -> Matrix4<Real> {
    let rows: [RowVector4<Real>; 4] = [
        x_a.y * p_a.row(2) - p_a.row(1),
        p_a.row(0) - x_a.x * p_a.row(2),
        x_b.y * p_b.row(2) - p_b.row(1),
        p_b.row(0) - x_b.x * p_b.row(2),
    ];
    Matrix4::from_rows(&rows)
}

/// Triangulate one point from two views.
pub fn triangulate_two_view(
    p_a: &Mat34,
    x_a: &Pt2,
    p_b: &Mat34,
    x_b: &Pt2,
    opts: &TriangulationOptions,
) -> Result<TwoViewPoint, TriangulationError> {
    let centre_a = camera_centre(p_a).ok_or(TriangulationError::InfiniteCamera)?;
    let centre_b = camera_centre(p_b).ok_or(TriangulationError::InfiniteCamera)?;
    let baseline = (centre_b - centre_a).norm();
    let centre_scale = centre_a.coords.norm().max(centre_b.coords.norm());
    if baseline <= Real::EPSILON * centre_scale {
        return Err(TriangulationError::CoincidentCentres { baseline });
    }

    let a = dlt_system(p_a, x_a, p_b, x_b);
    if !a.iter().all(|v| v.is_finite()) {
        return Err(TriangulationError::SvdFailed);
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(TriangulationError::SvdFailed)?;
    let s = svd.singular_values;
    let (i_min, i_second) =
        smallest_two_indices(s.as_slice()).ok_or(TriangulationError::SvdFailed)?;

    let s_max = s.max();
    let gap = if s_max > 0.0 {
        (s[i_second] - s[i_min]) / s_max
    } else {
        0.0
    };
    if !(gap >= opts.min_singular_gap) {
        return Err(TriangulationError::Degenerate { gap });
    }

    let x_h = v_t.row(i_min);
    let w = x_h[3];
    if w.abs() <= opts.min_abs_w {
        return Err(TriangulationError::PointAtInfinity { w });
    }
    let point = Pt3::new(x_h[0] / w, x_h[1] / w, x_h[2] / w);

    let range = (point - centre_a).norm().max((point - centre_b).norm());
    let parallax = if range > 0.0 { baseline / range } else { 0.0 };
    if !(range > 0.0 && parallax >= opts.min_parallax) {
        return Err(TriangulationError::LowParallax { ratio: parallax });
    }

    let depth_a = point_depth(p_a, &point);
    let depth_b = point_depth(p_b, &point);
    let min_depth = MIN_RELATIVE_DEPTH * range;
    if !(depth_a > min_depth && depth_b > min_depth) {
        return Err(TriangulationError::BehindCamera { depth_a, depth_b });
    }

    Ok(TwoViewPoint {
        point,
        singular_gap: gap,
        parallax,
    })
}

/// Triangulate one point with default thresholds.
pub fn triangulate_point(
    p_a: &Mat34,
    x_a: &Pt2,
    p_b: &Mat34,
    x_b: &Pt2,
) -> Result<Pt3, TriangulationError> {
    triangulate_two_view(p_a, x_a, p_b, x_b, &TriangulationOptions::default()).map(|r| r.point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Vector2, Vector3};
    use stereo_core::{project_with_matrix, projection_matrix_from_rt, Mat3};

    fn kmtx() -> Mat3 {
        Mat3::new(800.0, 0.0, 320.0, 0.0, 780.0, 240.0, 0.0, 0.0, 1.0)
    }

    #[test]
    fn exact_point_is_recovered() {
        let k = kmtx();
        let p_a = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::zeros());
        let r = Rotation3::from_euler_angles(0.0, -0.2, 0.0).into_inner();
        let p_b = projection_matrix_from_rt(&k, &r, &Vector3::new(-0.3, 0.0, 0.05));

        let x = Pt3::new(0.1, -0.2, 2.5);
        let x_a = project_with_matrix(&p_a, &x).unwrap();
        let x_b = project_with_matrix(&p_b, &x).unwrap();

        let res = triangulate_two_view(&p_a, &x_a, &p_b, &x_b, &TriangulationOptions::default())
            .unwrap();
        assert!((res.point - x).norm() < 1e-9);
        assert!(res.singular_gap > 1e-6);
    }

    #[test]
    fn rows_follow_cross_product_elimination() {
        let k = kmtx();
        let p = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::zeros());
        let x_a = Pt2::new(10.0, 20.0);
        let a = dlt_system(&p, &x_a, &p, &x_a);
        let expected_row0 = 20.0 * p.row(2) - p.row(1);
        let expected_row1 = p.row(0) - 10.0 * p.row(2);
        assert_eq!(a.row(0), expected_row0);
        assert_eq!(a.row(1), expected_row1);
    }

    fn camera_b(k: &Mat3, baseline: Real) -> Mat34 {
        let r = Rotation3::from_euler_angles(0.05, 0.3, -0.1).into_inner();
        let centre = Vector3::new(-baseline, 0.0, 0.0);
        projection_matrix_from_rt(k, &r, &(-(r * centre)))
    }

    #[test]
    fn coincident_centres_are_degenerate() {
        let k = kmtx();
        let p_a = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::zeros());
        let p_b = camera_b(&k, 0.0);

        let x = Pt3::new(0.2, 0.1, 3.0);
        let x_a = project_with_matrix(&p_a, &x).unwrap();
        let x_b = project_with_matrix(&p_b, &x).unwrap();

        let err = triangulate_two_view(&p_a, &x_a, &p_b, &x_b, &TriangulationOptions::default())
            .unwrap_err();
        assert!(matches!(err, TriangulationError::CoincidentCentres { .. }), "{err:?}");
    }

    #[test]
    fn coincident_centres_with_pixel_noise_are_degenerate() {
        let k = kmtx();
        let p_a = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::zeros());
        let p_b = camera_b(&k, 0.0);
        let x = Pt3::new(0.2, 0.1, 3.0);
        let x_a = project_with_matrix(&p_a, &x).unwrap();
        let x_b = project_with_matrix(&p_b, &x).unwrap() + Vector2::new(0.3, 0.0);

        // the shared centre is an exact null vector of A
        let gap = {
            let s = dlt_system(&p_a, &x_a, &p_b, &x_b).singular_values();
            let (i, j) = smallest_two_indices(s.as_slice()).unwrap();
            (s[j] - s[i]) / s.max()
        };
        assert!(gap > TriangulationOptions::default().min_singular_gap);

        let err = triangulate_two_view(&p_a, &x_a, &p_b, &x_b, &TriangulationOptions::default())
            .unwrap_err();
        assert!(matches!(err, TriangulationError::CoincidentCentres { .. }), "{err:?}");
    }

    #[test]
    fn near_zero_baselines_with_pixel_noise_are_degenerate() {
        let k = kmtx();
        let p_a = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::zeros());
        let x = Pt3::new(0.2, 0.1, 3.0);
        let x_a = project_with_matrix(&p_a, &x).unwrap();
        let offsets = [
            Vector2::new(0.3, 0.0),
            Vector2::new(0.0, 0.3),
            Vector2::new(0.2, -0.2),
            Vector2::new(-0.3, 0.1),
        ];

        for baseline in [1e-9, 1e-7, 1e-5] {
            let p_b = camera_b(&k, baseline);
            for offset in &offsets {
                let x_b = project_with_matrix(&p_b, &x).unwrap() + *offset;
                let res =
                    triangulate_two_view(&p_a, &x_a, &p_b, &x_b, &TriangulationOptions::default());
                assert!(
                    matches!(&res, Err(e) if e.is_degenerate()),
                    "baseline {baseline}, offset {offset:?}: {res:?}"
                );
            }
        }
    }

    #[test]
    fn noisy_pixels_with_real_baseline_still_triangulate() {
        let k = kmtx();
        let p_a = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::zeros());
        let p_b = camera_b(&k, 0.3);
        let x = Pt3::new(0.2, 0.1, 3.0);
        let x_a = project_with_matrix(&p_a, &x).unwrap();
        let x_b = project_with_matrix(&p_b, &x).unwrap() + Vector2::new(0.3, 0.0);

        let res = triangulate_two_view(&p_a, &x_a, &p_b, &x_b, &TriangulationOptions::default())
            .unwrap();
        assert!((res.point - x).norm() < 0.05);
        assert!(res.parallax > 0.05);
    }

    #[test]
    fn point_behind_both_cameras_is_rejected() {
        let k = kmtx();
        let p_a = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::zeros());
        let p_b = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::new(-0.3, 0.0, 0.0));
        let x = Pt3::new(0.1, -0.2, -2.5);
        let x_a = project_with_matrix(&p_a, &x).unwrap();
        let x_b = project_with_matrix(&p_b, &x).unwrap();

        let err = triangulate_point(&p_a, &x_a, &p_b, &x_b).unwrap_err();
        match err {
            TriangulationError::BehindCamera { depth_a, depth_b } => {
                assert!((depth_a + 2.5).abs() < 1e-9);
                assert!((depth_b + 2.5).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn camera_centre_inverts_the_extrinsics() {
        let k = kmtx();
        let p_b = camera_b(&k, 0.25);
        let c = camera_centre(&p_b).unwrap();
        assert!((c - Pt3::new(-0.25, 0.0, 0.0)).norm() < 1e-12);
        assert!(point_depth(&p_b, &c).abs() < 1e-12);
    }

    #[test]
    fn parallel_rays_give_point_at_infinity() {
        let k = kmtx();
        let p_a = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::zeros());
        let p_b = projection_matrix_from_rt(&k, &Mat3::identity(), &Vector3::new(-0.2, 0.0, 0.0));
        // same pixel in both cameras: rays are parallel
        let px = Pt2::new(400.0, 260.0);
        let err = triangulate_point(&p_a, &px, &p_b, &px).unwrap_err();
        assert!(matches!(err, TriangulationError::PointAtInfinity { .. }), "{err:?}");
    }
}
