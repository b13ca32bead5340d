//! Homography estimation (plane-induced projective transform).
//!
//! The homography `H` maps **board points** on the `Z = 0` plane to **image
//! points**: `x' ~ H x`. Inputs are Hartley-normalized internally and the
//! returned matrix is de-normalized.

use crate::math::{normalize_points_2d, solve_null_space};
use nalgebra::DMatrix;
use stereo_core::{from_homogeneous, to_homogeneous, Mat3, Pt2, Real};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {board} board / {image} image points")]
    NotEnoughPoints { board: usize, image: usize },
    #[error("{0} points are degenerate for normalization")]
    DegeneratePoints(&'static str),
    #[error("svd failed")]
    SvdFailed,
    #[error("homography has non-finite entries")]
    NonFinite,
}

/// High-level entry point for homography estimation.
#[derive(Debug, Clone, Copy)]
pub struct HomographySolver;

/// Estimate `H` such that `x' ~ H x` using normalized DLT.
///
/// `board` are planar points in the calibration target frame, and `image`
/// are their coordinates in the image (pixels or normalized coordinates).
/// The returned homography is scaled so that `H[2,2] == 1` when possible.
pub fn dlt_homography(board: &[Pt2], image: &[Pt2]) -> Result<Mat3, HomographyError> {
    HomographySolver::dlt(board, image)
}

impl HomographySolver {
    /// Estimate a homography with the normalized DLT.
    pub fn dlt(board: &[Pt2], image: &[Pt2]) -> Result<Mat3, HomographyError> {
        let n = board.len();
        if n < 4 || image.len() != n {
            return Err(HomographyError::NotEnoughPoints {
                board: n,
                image: image.len(),
            });
        }

        let (board_n, t_b) = normalize_points_2d(board)
            .ok_or(HomographyError::DegeneratePoints("board"))?;
        let (image_n, t_i) = normalize_points_2d(image)
            .ok_or(HomographyError::DegeneratePoints("image"))?;

        let mut a = DMatrix::<Real>::zeros(2 * n, 9);
        for (i, (pb, pi)) in board_n.iter().zip(image_n.iter()).enumerate() {
            let (x, y) = (pb.x, pb.y);
            let (u, v) = (pi.x, pi.y);
            let r0 = 2 * i;
            let r1 = r0 + 1;

            a[(r0, 0)] = -x;
            a[(r0, 1)] = -y;
            a[(r0, 2)] = -1.0;
            a[(r0, 6)] = u * x;
            a[(r0, 7)] = u * y;
            a[(r0, 8)] = u;

            a[(r1, 3)] = -x;
            a[(r1, 4)] = -y;
            a[(r1, 5)] = -1.0;
            a[(r1, 6)] = v * x;
            a[(r1, 7)] = v * y;
            a[(r1, 8)] = v;
        }

        let ns = solve_null_space(&a).ok_or(HomographyError::SvdFailed)?;
        let h = &ns.vector;
        let mut h_mat = Mat3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let t_i_inv = t_i
            .try_inverse()
            .ok_or(HomographyError::DegeneratePoints("image"))?;
        h_mat = t_i_inv * h_mat * t_b;

        let scale = h_mat[(2, 2)];
        if scale.abs() > Real::EPSILON {
            h_mat /= scale;
        }
        if !h_mat.iter().all(|v| v.is_finite()) {
            return Err(HomographyError::NonFinite);
        }

        Ok(h_mat)
    }
}

/// Map a board point through `H`. Returns `None` for points at infinity.
pub fn apply_homography(h: &Mat3, point: &Pt2) -> Option<Pt2> {
    from_homogeneous(&(h * to_homogeneous(point)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ground_truth() -> Mat3 {
        Mat3::new(
            820.0, 15.0, 310.0, //
            -12.0, 790.0, 250.0, //
            0.0002, -0.0001, 1.0,
        )
    }

    #[test]
    fn dlt_recovers_exact_homography() {
        let h_gt = ground_truth();
        let board: Vec<Pt2> = (0..5)
            .flat_map(|i| (0..4).map(move |j| Pt2::new(i as Real * 0.03, j as Real * 0.03)))
            .collect();
        let image: Vec<Pt2> = board
            .iter()
            .map(|p| apply_homography(&h_gt, p).unwrap())
            .collect();

        let h = dlt_homography(&board, &image).unwrap();
        for (pb, pi) in board.iter().zip(&image) {
            let proj = apply_homography(&h, pb).unwrap();
            assert!((proj - pi).norm() < 1e-6, "reprojection {:?} vs {:?}", proj, pi);
        }
        assert!((h[(2, 2)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn minimal_four_points_work() {
        let h_gt = ground_truth();
        let board = vec![
            Pt2::new(0.0, 0.0),
            Pt2::new(0.1, 0.0),
            Pt2::new(0.1, 0.1),
            Pt2::new(0.0, 0.1),
        ];
        let image: Vec<Pt2> = board
            .iter()
            .map(|p| apply_homography(&h_gt, p).unwrap())
            .collect();
        let h = dlt_homography(&board, &image).unwrap();
        let proj = apply_homography(&h, &Pt2::new(0.05, 0.05)).unwrap();
        let expected = apply_homography(&h_gt, &Pt2::new(0.05, 0.05)).unwrap();
        assert!((proj - expected).norm() < 1e-6);
    }

    #[test]
    fn too_few_points_fails() {
        let pts = vec![Pt2::new(0.0, 0.0), Pt2::new(1.0, 0.0), Pt2::new(0.0, 1.0)];
        assert!(dlt_homography(&pts, &pts).is_err());
    }
}
