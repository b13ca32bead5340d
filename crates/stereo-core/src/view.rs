//! Per-frame calibration samples.
//!
//! A sample ties the correspondences observed in one sampled frame to that
//! frame's index. Mono samples feed intrinsic calibration; stereo samples hold
//! the pair of views from a frame in which both cameras saw the pattern.

use crate::CorrespondenceView;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View<Meta> {
    pub obs: CorrespondenceView,
    pub meta: Meta,
}

/// Metadata recorded for every sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Index of the frame in the synchronized streams.
    pub frame_index: usize,
}

/// One camera's correspondences for one sampled frame.
pub type CalibrationSample = View<FrameMeta>;

/// Both cameras' correspondences for one sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoObs {
    pub cam0: CorrespondenceView,
    pub cam1: CorrespondenceView,
}

impl StereoObs {
    /// Pair two views of the same pattern.
    ///
    /// Both views must list the same pattern points in the same order.
    pub fn new(cam0: CorrespondenceView, cam1: CorrespondenceView) -> Result<Self> {
        ensure!(
            cam0.points_3d == cam1.points_3d,
            "stereo views must share the same target points ({} vs {})",
            cam0.len(),
            cam1.len()
        );
        Ok(Self { cam0, cam1 })
    }

    /// Target points shared by both views.
    pub fn points_3d(&self) -> &[crate::Pt3] {
        &self.cam0.points_3d
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoView<Meta> {
    pub obs: StereoObs,
    pub meta: Meta,
}

/// A frame in which both cameras detected the pattern.
pub type StereoSample = StereoView<FrameMeta>;
