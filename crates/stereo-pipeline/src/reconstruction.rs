//! Per-frame landmark triangulation over a [`LandmarkTable`].

use crate::error::CameraId;
use crate::landmarks::{LandmarkFrame, LandmarkTable, ObservationFilter};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use stereo_core::{Mat34, Pt3, Real, StereoRig};
use stereo_linear::{triangulate_two_view, TriangulationError, TriangulationOptions};

/// A landmark position recovered from one observation per camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangulatedPoint {
    pub name: String,
    pub frame_index: usize,
    pub position: Pt3,
}

/// A landmark seen in both cameras whose triangulation was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFailure {
    pub frame_index: usize,
    pub name: String,
    pub error: TriangulationError,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameReconstruction {
    pub frame_index: usize,
    pub timestamp: Option<Real>,
    /// Ordered by landmark name.
    pub points: Vec<TriangulatedPoint>,
    pub failures: Vec<LandmarkFailure>,
}

impl FrameReconstruction {
    pub fn point(&self, name: &str) -> Option<&Pt3> {
        self.points
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.position)
    }
}

/// Triangulates every landmark of a table with two fixed projection
/// matrices. Frames are independent of each other, so iteration is
/// restartable and may run in parallel.
#[derive(Debug, Clone)]
pub struct Reconstruction<'a> {
    projections: [Mat34; 2],
    table: &'a LandmarkTable,
    filter: ObservationFilter,
    options: TriangulationOptions,
}

impl<'a> Reconstruction<'a> {
    pub fn new(projections: [Mat34; 2], table: &'a LandmarkTable) -> Self {
        Self {
            projections,
            table,
            filter: ObservationFilter::default(),
            options: TriangulationOptions::default(),
        }
    }

    pub fn from_rig(rig: &StereoRig, table: &'a LandmarkTable) -> Self {
        Self::new([*rig.projection(0), *rig.projection(1)], table)
    }

    pub fn with_filter(mut self, filter: ObservationFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_options(mut self, options: TriangulationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn projection(&self, camera: CameraId) -> &Mat34 {
        &self.projections[camera.index()]
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Triangulate all landmarks usable in both cameras of one frame.
    pub fn reconstruct_frame(&self, frame: &LandmarkFrame) -> FrameReconstruction {
        let mut out = FrameReconstruction {
            frame_index: frame.frame_index,
            timestamp: frame.timestamp,
            ..Default::default()
        };
        let usable = |camera: CameraId, name: &str| {
            frame
                .observation(camera, name)
                .filter(|obs| self.filter.accepts(obs))
        };

        for name in self.table.names() {
            let (Some(obs0), Some(obs1)) = (usable(CameraId::Camera0, name), usable(CameraId::Camera1, name))
            else {
                continue;
            };
            match triangulate_two_view(
                &self.projections[0],
                &obs0.point,
                &self.projections[1],
                &obs1.point,
                &self.options,
            ) {
                Ok(tp) => out.points.push(TriangulatedPoint {
                    name: name.to_string(),
                    frame_index: frame.frame_index,
                    position: tp.point,
                }),
                Err(error) => {
                    debug!("frame {} landmark `{name}`: {error}", frame.frame_index);
                    out.failures.push(LandmarkFailure {
                        frame_index: frame.frame_index,
                        name: name.to_string(),
                        error,
                    });
                }
            }
        }
        out
    }

    /// Lazy per-frame results in table order. Each call starts from the
    /// first frame again.
    pub fn iter(&self) -> impl Iterator<Item = FrameReconstruction> + '_ {
        self.table
            .frames()
            .iter()
            .map(move |frame| self.reconstruct_frame(frame))
    }

    /// Reconstruct all frames on the rayon pool, returned in frame order.
    pub fn par_collect(&self) -> Vec<FrameReconstruction> {
        self.table
            .frames()
            .par_iter()
            .map(|frame| self.reconstruct_frame(frame))
            .collect()
    }
}
