//! Conditioning diagnostics for solved least-squares problems.

use nalgebra::DMatrix;
use stereo_core::Real;

/// Ratio of smallest to largest singular value of the column-normalised Jacobian.
///
/// Column normalisation removes the effect of parameter units (pixels versus
/// radians versus metres), so the ratio reflects how close the parameters are
/// to being jointly unobservable. An all-zero column yields `0.0`.
pub fn normalized_condition(j: &DMatrix<Real>) -> Real {
    if j.ncols() == 0 || j.nrows() < j.ncols() {
        return 0.0;
    }

    let mut jn = j.clone();
    for mut col in jn.column_iter_mut() {
        let norm = col.norm();
        if !norm.is_finite() || norm <= Real::EPSILON {
            return 0.0;
        }
        col /= norm;
    }

    let sv = jn.singular_values();
    let s_max = sv.max();
    if !(s_max > 0.0) {
        return 0.0;
    }
    sv.min() / s_max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_conditioned_after_column_scaling() {
        // columns differ in scale by 1e6 but are orthogonal
        let j = DMatrix::from_row_slice(3, 2, &[1e6, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!((normalized_condition(&j) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn collinear_columns_are_flagged() {
        let j = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        assert!(normalized_condition(&j) < 1e-12);
        let zero = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(normalized_condition(&zero), 0.0);
    }
}
