//! Scalar and matrix aliases plus small homogeneous-coordinate helpers.

use nalgebra::{Isometry3, Matrix3, Matrix3x4, Point2, Point3, Vector2, Vector3};

/// Scalar type used throughout the workspace (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 3×4 camera projection matrix `P = K [R | t]`.
pub type Mat34 = Matrix3x4<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;

/// Convert a 2D point in Euclidean coordinates into homogeneous coordinates.
///
/// Given a point `p = (x, y)`, returns the homogeneous vector `(x, y, 1)`.
pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

/// Convert a 3D homogeneous vector back to a 2D point.
///
/// Returns `None` when the vector lies on the line at infinity.
pub fn from_homogeneous(v: &Vec3) -> Option<Pt2> {
    if v.z.abs() <= Real::EPSILON {
        return None;
    }
    Some(Pt2::new(v.x / v.z, v.y / v.z))
}

/// Indices of the smallest and second-smallest entries of a singular value
/// vector.
///
/// nalgebra does not promise an ordering for every decomposition path, so
/// null-space extraction goes through this helper instead of assuming the
/// last row of `V^T` is the right one.
pub fn smallest_two_indices(values: &[Real]) -> Option<(usize, usize)> {
    if values.len() < 2 {
        return None;
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    Some((order[0], order[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homogeneous_roundtrip() {
        let p = Pt2::new(3.0, -2.0);
        let h = to_homogeneous(&p) * 4.0;
        assert_eq!(from_homogeneous(&h), Some(p));
        assert!(from_homogeneous(&Vec3::new(1.0, 1.0, 0.0)).is_none());
    }

    #[test]
    fn smallest_two_handles_unsorted_input() {
        let (a, b) = smallest_two_indices(&[3.0, 0.5, 9.0, 0.1]).unwrap();
        assert_eq!((a, b), (3, 1));
        assert!(smallest_two_indices(&[1.0]).is_none());
    }
}
