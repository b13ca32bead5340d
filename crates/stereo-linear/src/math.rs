//! Mathematical utilities shared by the linear solvers.
//!
//! - **Hartley normalization** for 2D points (numerical conditioning)
//! - **Null-space extraction** from an SVD, with the singular values needed
//!   to judge how well-determined the solution is
//!
//! # References
//!
//! Hartley & Zisserman, "Multiple View Geometry in Computer Vision", 2nd ed.,
//! Algorithm 4.2 (Normalized DLT)

use nalgebra::{DMatrix, DVector};
use stereo_core::{smallest_two_indices, Mat3, Pt2, Real};

/// Hartley normalization for 2D points.
///
/// Centers points at the origin and scales so that the mean distance from
/// the origin is `√2`.
///
/// Returns the normalized points and the 3x3 transform `T` such that
/// `p_norm = T * p_homogeneous`, or `None` if the input is empty or all
/// points coincide.
///
/// ```
/// use stereo_linear::math::normalize_points_2d;
/// use stereo_core::Pt2;
///
/// let points = vec![Pt2::new(100.0, 200.0), Pt2::new(150.0, 250.0), Pt2::new(120.0, 220.0)];
/// let (normalized, _t) = normalize_points_2d(&points).unwrap();
/// assert_eq!(normalized.len(), 3);
/// ```
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as Real;
    let (mut cx, mut cy) = (0.0, 0.0);
    for p in points {
        cx += p.x;
        cy += p.y;
    }
    cx /= n;
    cy /= n;

    let mut mean_dist = 0.0;
    for p in points {
        let dx = p.x - cx;
        let dy = p.y - cy;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;

    if mean_dist <= Real::EPSILON {
        return None;
    }

    let scale = (2.0 as Real).sqrt() / mean_dist;
    let t = Mat3::new(
        scale,
        0.0,
        -scale * cx,
        0.0,
        scale,
        -scale * cy,
        0.0,
        0.0,
        1.0,
    );

    let norm = points
        .iter()
        .map(|p| Pt2::new((p.x - cx) * scale, (p.y - cy) * scale))
        .collect();

    Some((norm, t))
}

/// Right null vector of `a` together with the two smallest singular values.
#[derive(Debug, Clone)]
pub struct NullSpace {
    /// Unit right singular vector of the smallest singular value.
    pub vector: DVector<Real>,
    /// Smallest singular value.
    pub smallest: Real,
    /// Second smallest singular value.
    pub second_smallest: Real,
    /// Largest singular value.
    pub largest: Real,
}

impl NullSpace {
    /// Gap between the two smallest singular values relative to the largest.
    ///
    /// A value near zero means the null space is (numerically) at least two
    /// dimensional and the solution is not unique.
    pub fn relative_gap(&self) -> Real {
        if self.largest <= 0.0 {
            return 0.0;
        }
        (self.second_smallest - self.smallest) / self.largest
    }
}

/// Solve `A x = 0` in the least-squares sense via SVD.
///
/// Wide matrices are padded with zero rows so the full `V^T` is available.
/// Returns `None` if the decomposition fails or `A` has fewer than 2 columns.
pub fn solve_null_space(a: &DMatrix<Real>) -> Option<NullSpace> {
    let cols = a.ncols();
    if cols < 2 {
        return None;
    }
    let a_work = if a.nrows() < cols {
        let mut a_pad = DMatrix::<Real>::zeros(cols, cols);
        a_pad.view_mut((0, 0), (a.nrows(), cols)).copy_from(a);
        a_pad
    } else {
        a.clone()
    };

    let svd = a_work.svd(false, true);
    let v_t = svd.v_t?;
    let values: Vec<Real> = svd.singular_values.iter().copied().collect();
    let (i_min, i_second) = smallest_two_indices(&values)?;
    let largest = values.iter().copied().fold(0.0, Real::max);

    Some(NullSpace {
        vector: v_t.row(i_min).transpose(),
        smallest: values[i_min],
        second_smallest: values[i_second],
        largest,
    })
}
