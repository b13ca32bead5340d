//! Error taxonomy of the calibration and reconstruction phases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One of the two cameras of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CameraId {
    /// Reference camera (identity pose).
    Camera0,
    Camera1,
}

impl CameraId {
    pub const BOTH: [CameraId; 2] = [CameraId::Camera0, CameraId::Camera1];

    pub fn index(self) -> usize {
        match self {
            CameraId::Camera0 => 0,
            CameraId::Camera1 => 1,
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera{}", self.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationPhase {
    Intrinsics,
    Stereo,
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationPhase::Intrinsics => f.write_str("intrinsic calibration"),
            CalibrationPhase::Stereo => f.write_str("stereo calibration"),
        }
    }
}

/// Missing or invalid calibration configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("checkerboard must have at least 2 rows and 2 columns, got {rows}x{columns}")]
    InvalidPatternSize { rows: usize, columns: usize },
    #[error("checkerboard square size must be finite and positive, got {0}")]
    InvalidSquareSize(f64),
    #[error("frame sampling interval must be at least 1")]
    ZeroFrameInterval,
    #[error("failed to read settings file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse settings file {path}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

fn camera_suffix(camera: &Option<CameraId>) -> String {
    camera.map(|c| format!(" for {c}")).unwrap_or_default()
}

/// Fatal failure of a calibration phase.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("{phase}{}: insufficient samples (need at least {required}, found {found})", camera_suffix(.camera))]
    InsufficientData {
        phase: CalibrationPhase,
        camera: Option<CameraId>,
        required: usize,
        found: usize,
    },
    #[error("{phase}{}: numerical degeneracy: {reason}", camera_suffix(.camera))]
    NumericalDegeneracy {
        phase: CalibrationPhase,
        camera: Option<CameraId>,
        reason: String,
    },
}

impl CalibrationError {
    pub(crate) fn degenerate(
        phase: CalibrationPhase,
        camera: Option<CameraId>,
        reason: impl fmt::Display,
    ) -> Self {
        CalibrationError::NumericalDegeneracy {
            phase,
            camera,
            reason: reason.to_string(),
        }
    }

    /// Phase that failed, if the error belongs to one.
    pub fn phase(&self) -> Option<CalibrationPhase> {
        match self {
            CalibrationError::Configuration(_) => None,
            CalibrationError::InsufficientData { phase, .. }
            | CalibrationError::NumericalDegeneracy { phase, .. } => Some(*phase),
        }
    }

    /// Camera that failed, if the error is camera specific.
    pub fn camera(&self) -> Option<CameraId> {
        match self {
            CalibrationError::Configuration(_) => None,
            CalibrationError::InsufficientData { camera, .. }
            | CalibrationError::NumericalDegeneracy { camera, .. } => *camera,
        }
    }
}
