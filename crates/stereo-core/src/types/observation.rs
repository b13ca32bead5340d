//! Observation types for calibration data.
//!
//! Canonical storage for 2D-3D point correspondences used throughout the
//! calibration pipeline.

use crate::{Pt2, Pt3, Real};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// A single view containing 2D-3D point correspondences.
///
/// - `points_3d`: 3D points in target (pattern) coordinates
/// - `points_2d`: corresponding pixel observations
///
/// # Example
///
/// ```
/// use stereo_core::{CorrespondenceView, Pt3, Pt2};
///
/// let points_3d = vec![Pt3::new(0.0, 0.0, 0.0), Pt3::new(0.1, 0.0, 0.0)];
/// let points_2d = vec![Pt2::new(320.0, 240.0), Pt2::new(400.0, 240.0)];
/// let view = CorrespondenceView::new(points_3d, points_2d).unwrap();
///
/// assert_eq!(view.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrespondenceView {
    /// 3D points in target frame.
    pub points_3d: Vec<Pt3>,
    /// Corresponding 2D pixel observations.
    pub points_2d: Vec<Pt2>,
}

impl CorrespondenceView {
    /// Construct a view, checking that both point lists have the same length.
    pub fn new(points_3d: Vec<Pt3>, points_2d: Vec<Pt2>) -> Result<Self> {
        ensure!(
            points_3d.len() == points_2d.len(),
            "3D / 2D point counts must match: {} vs {}",
            points_3d.len(),
            points_2d.len()
        );
        Ok(Self {
            points_3d,
            points_2d,
        })
    }

    /// Target points projected onto the Z=0 plane.
    pub fn planar_points(&self) -> Vec<Pt2> {
        self.points_3d
            .iter()
            .map(|p3| Pt2::new(p3.x, p3.y))
            .collect()
    }

    /// Number of point correspondences in this view.
    #[inline]
    pub fn len(&self) -> usize {
        self.points_3d.len()
    }

    /// Returns true if this view has no correspondences.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points_3d.is_empty()
    }

    /// Iterate over (3D point, 2D point) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Pt3, &Pt2)> {
        self.points_3d.iter().zip(self.points_2d.iter())
    }
}

/// Summary statistics for reprojection errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionStats {
    /// Mean reprojection error in pixels.
    pub mean: Real,
    /// Root mean square error in pixels.
    pub rms: Real,
    /// Maximum reprojection error in pixels.
    pub max: Real,
    /// Number of points evaluated.
    pub count: usize,
}

impl ReprojectionStats {
    /// Compute statistics from a collection of per-point errors (pixels).
    pub fn from_errors(errors: &[Real]) -> Self {
        if errors.is_empty() {
            return Self {
                mean: 0.0,
                rms: 0.0,
                max: 0.0,
                count: 0,
            };
        }

        let sum: Real = errors.iter().sum();
        let sum_sq: Real = errors.iter().map(|e| e * e).sum();
        let max = errors.iter().cloned().fold(0.0, Real::max);
        let n = errors.len() as Real;

        Self {
            mean: sum / n,
            rms: (sum_sq / n).sqrt(),
            max,
            count: errors.len(),
        }
    }

    /// Compute statistics from a stacked `[dx0, dy0, dx1, dy1, ...]` residual vector.
    pub fn from_residual_pairs(residuals: &[Real]) -> Self {
        let errors: Vec<Real> = residuals
            .chunks_exact(2)
            .map(|r| (r[0] * r[0] + r[1] * r[1]).sqrt())
            .collect();
        Self::from_errors(&errors)
    }
}
