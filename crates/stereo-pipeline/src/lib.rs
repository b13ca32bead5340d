//! Stereo calibration and landmark reconstruction workflow.
//!
//! ```no_run
//! use stereo_pipeline::{
//!     run_stereo_calibration, CalibrationSettings, PipelineOptions, RecordedDetections,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = CalibrationSettings::from_file("calibration_settings.yaml")?;
//! let detections = RecordedDetections::from_json_file("detections.json")?;
//! let set = detections.accumulate(&settings)?;
//!
//! let calib = run_stereo_calibration(&set, &PipelineOptions::default())?;
//! calib.save_json("calibration.json")?;
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod config;
pub mod error;
pub mod intrinsics;
pub mod io;
pub mod landmarks;
pub mod reconstruction;
pub mod stereo;

pub use accumulator::{
    accumulate_correspondences, CameraSamples, CorrespondenceAccumulator, CorrespondenceSet,
    PatternDetector, RecordedDetection, RecordedDetections, RecordedFrame, ReplayDetector,
};
pub use config::{CalibrationSettings, ImageSize, PatternSize};
pub use error::{CalibrationError, CalibrationPhase, CameraId, ConfigError};
pub use intrinsics::{calibrate_intrinsics, IntrinsicCalibration, IntrinsicsOptions};
pub use io::{CameraCalibration, PersistenceError, StereoCalibration, StereoExtrinsics};
pub use landmarks::{
    ColumnPrefixes, LandmarkFrame, LandmarkObservation, LandmarkTable, LandmarkTableError,
    ObservationFilter,
};
pub use reconstruction::{FrameReconstruction, LandmarkFailure, Reconstruction, TriangulatedPoint};
pub use stereo::{calibrate_stereo, StereoCalibrationResult, StereoOptions};

use log::info;
use serde::{Deserialize, Serialize};

/// Options for both calibration phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub intrinsics: IntrinsicsOptions,
    pub stereo: StereoOptions,
}

/// Calibrate both cameras independently, then their relative pose.
pub fn run_stereo_calibration(
    set: &CorrespondenceSet,
    opts: &PipelineOptions,
) -> Result<StereoCalibration, CalibrationError> {
    set.ensure_usable()?;

    let mut cameras = Vec::with_capacity(2);
    for id in CameraId::BOTH {
        let samples = set.camera(id);
        let image_size = samples
            .image_size
            .ok_or(CalibrationError::InsufficientData {
                phase: CalibrationPhase::Intrinsics,
                camera: Some(id),
                required: 1,
                found: 0,
            })?;
        cameras.push(calibrate_intrinsics(
            id,
            &samples.samples,
            image_size,
            &opts.intrinsics,
        )?);
    }
    let (cam0, cam1) = (&cameras[0], &cameras[1]);

    let stereo = calibrate_stereo(&set.stereo, &cam0.camera, &cam1.camera, &opts.stereo)?;
    info!(
        "calibration done: rms camera0 {:.4} px, camera1 {:.4} px, stereo {:.4} px, baseline {:.4}",
        cam0.rms,
        cam1.rms,
        stereo.rms,
        stereo.cam1_from_cam0.translation().norm()
    );

    Ok(StereoCalibration {
        camera0: CameraCalibration::from(cam0),
        camera1: CameraCalibration::from(cam1),
        extrinsics: StereoExtrinsics::from(&stereo),
    })
}
