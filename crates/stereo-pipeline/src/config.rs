//! Calibration settings.
//!
//! The settings file is YAML or JSON with the keys of the capture setup:
//!
//! ```yaml
//! checkerboard_rows: 6
//! checkerboard_columns: 9
//! checkerboard_box_size_scale: 2.5
//! video_frame_interval: 30
//! ```
//!
//! Unknown keys are ignored.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use stereo_core::synthetic::planar::grid_points;
use stereo_core::{Pt3, Real};

fn default_frame_interval() -> usize {
    30
}

/// Inner-corner layout of the calibration checkerboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSize {
    pub rows: usize,
    pub columns: usize,
}

impl PatternSize {
    pub fn corner_count(&self) -> usize {
        self.rows * self.columns
    }
}

/// Pixel dimensions of a camera's images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Geometric image centre in pixels.
    pub fn center(&self) -> (Real, Real) {
        (
            Real::from(self.width) * 0.5,
            Real::from(self.height) * 0.5,
        )
    }
}

fn read_settings(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    pub checkerboard_rows: usize,
    pub checkerboard_columns: usize,
    /// Physical size of one checkerboard square; sets the unit of every
    /// reconstructed coordinate.
    pub checkerboard_box_size_scale: Real,
    /// Only every Nth frame pair is run through the detector.
    #[serde(default = "default_frame_interval")]
    pub video_frame_interval: usize,
}

impl CalibrationSettings {
    pub fn new(rows: usize, columns: usize, square_size: Real) -> Self {
        Self {
            checkerboard_rows: rows,
            checkerboard_columns: columns,
            checkerboard_box_size_scale: square_size,
            video_frame_interval: default_frame_interval(),
        }
    }

    pub fn with_frame_interval(mut self, interval: usize) -> Self {
        self.video_frame_interval = interval;
        self
    }

    /// Read and validate a settings file, YAML for `.yaml`/`.yml` and JSON
    /// otherwise.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::from_yaml_file(path)
            }
            _ => Self::from_json_file(path),
        }
    }

    /// Read and validate a JSON settings file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read_settings(path)?;
        let settings: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and validate a YAML settings file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read_settings(path)?;
        let settings: Self =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseYaml {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checkerboard_rows < 2 || self.checkerboard_columns < 2 {
            return Err(ConfigError::InvalidPatternSize {
                rows: self.checkerboard_rows,
                columns: self.checkerboard_columns,
            });
        }
        let scale = self.checkerboard_box_size_scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ConfigError::InvalidSquareSize(scale));
        }
        if self.video_frame_interval == 0 {
            return Err(ConfigError::ZeroFrameInterval);
        }
        Ok(())
    }

    pub fn pattern_size(&self) -> PatternSize {
        PatternSize {
            rows: self.checkerboard_rows,
            columns: self.checkerboard_columns,
        }
    }

    /// Board corners in board coordinates (`Z = 0`), scaled by the square size.
    ///
    /// The row index runs fastest, matching the corner order returned by
    /// checkerboard detectors for a `(rows, columns)` pattern.
    pub fn object_points(&self) -> Vec<Pt3> {
        grid_points(
            self.checkerboard_rows,
            self.checkerboard_columns,
            self.checkerboard_box_size_scale,
        )
    }
}
