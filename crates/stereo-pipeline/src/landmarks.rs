//! Per-frame named 2D landmark observations for both cameras.
//!
//! The on-disk form is a CSV table with one row per frame and columns
//! `{prefix}_{landmark}_x`, `{prefix}_{landmark}_y` and optionally
//! `{prefix}_{landmark}_c` (confidence), one prefix per camera. An optional
//! `absolute_time` column becomes the frame timestamp.

use crate::error::CameraId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use stereo_core::{Pt2, Real};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LandmarkTableError {
    #[error("cannot open landmark table {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("no landmark columns found for prefixes `{0}` / `{1}`")]
    NoLandmarks(String, String),
}

/// A named pixel observation in one camera at one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObservation {
    pub name: String,
    pub camera: CameraId,
    pub frame_index: usize,
    pub point: Pt2,
    #[serde(default)]
    pub confidence: Option<Real>,
}

/// Decides which observations are usable for triangulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationFilter {
    /// Observations whose confidence is below this are dropped. Observations
    /// without a confidence value are always kept.
    pub min_confidence: Real,
}

impl Default for ObservationFilter {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
        }
    }
}

impl ObservationFilter {
    pub fn accepts(&self, obs: &LandmarkObservation) -> bool {
        obs.point.x.is_finite()
            && obs.point.y.is_finite()
            && obs.confidence.map_or(true, |c| c >= self.min_confidence)
    }
}

/// Column prefixes identifying each camera in the CSV header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPrefixes {
    pub camera0: String,
    pub camera1: String,
}

impl Default for ColumnPrefixes {
    fn default() -> Self {
        Self {
            camera0: "front".to_string(),
            camera1: "side".to_string(),
        }
    }
}

impl ColumnPrefixes {
    fn get(&self, id: CameraId) -> &str {
        match id {
            CameraId::Camera0 => &self.camera0,
            CameraId::Camera1 => &self.camera1,
        }
    }
}

/// Observations of a single frame, keyed by landmark name per camera.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkFrame {
    pub frame_index: usize,
    pub timestamp: Option<Real>,
    observations: [BTreeMap<String, LandmarkObservation>; 2],
}

impl LandmarkFrame {
    pub fn new(frame_index: usize) -> Self {
        Self {
            frame_index,
            ..Self::default()
        }
    }

    /// Add (or replace) an observation. The frame index of `obs` is
    /// overwritten with this frame's index.
    pub fn insert(&mut self, mut obs: LandmarkObservation) {
        obs.frame_index = self.frame_index;
        self.observations[obs.camera.index()].insert(obs.name.clone(), obs);
    }

    pub fn observation(&self, camera: CameraId, name: &str) -> Option<&LandmarkObservation> {
        self.observations[camera.index()].get(name)
    }

    pub fn observations(&self, camera: CameraId) -> impl Iterator<Item = &LandmarkObservation> {
        self.observations[camera.index()].values()
    }
}

/// Time series of landmark observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkTable {
    names: BTreeSet<String>,
    frames: Vec<LandmarkFrame>,
}

struct LandmarkColumns {
    x: usize,
    y: usize,
    c: Option<usize>,
}

fn parse_cell(record: &csv::StringRecord, idx: usize) -> Option<Real> {
    record
        .get(idx)
        .and_then(|s| s.trim().parse::<Real>().ok())
        .filter(|v| v.is_finite())
}

impl LandmarkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame; its landmark names join the table's name set.
    pub fn push_frame(&mut self, frame: LandmarkFrame) {
        for id in CameraId::BOTH {
            self.names
                .extend(frame.observations[id.index()].keys().cloned());
        }
        self.frames.push(frame);
    }

    /// Landmark names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn frames(&self) -> &[LandmarkFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn from_csv_path(
        path: impl AsRef<Path>,
        prefixes: &ColumnPrefixes,
    ) -> Result<Self, LandmarkTableError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| LandmarkTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_csv_reader(file, prefixes)
    }

    /// Parse the per-frame CSV layout. Frame indices are row numbers
    /// starting at zero. Empty or non-numeric cells are treated as absent.
    pub fn from_csv_reader<R: Read>(
        reader: R,
        prefixes: &ColumnPrefixes,
    ) -> Result<Self, LandmarkTableError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        let index: BTreeMap<&str, usize> =
            headers.iter().enumerate().map(|(i, h)| (h, i)).collect();

        let mut columns: [BTreeMap<String, LandmarkColumns>; 2] = Default::default();
        for id in CameraId::BOTH {
            let prefix = format!("{}_", prefixes.get(id));
            for header in headers.iter() {
                let Some(name) = header
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix("_x"))
                else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                let col = |suffix: &str| index.get(format!("{prefix}{name}_{suffix}").as_str()).copied();
                if let (Some(x), Some(y)) = (col("x"), col("y")) {
                    columns[id.index()].insert(name.to_string(), LandmarkColumns { x, y, c: col("c") });
                }
            }
        }
        if columns.iter().all(BTreeMap::is_empty) {
            return Err(LandmarkTableError::NoLandmarks(
                prefixes.camera0.clone(),
                prefixes.camera1.clone(),
            ));
        }
        let time_col = index.get("absolute_time").copied();

        let mut table = Self::new();
        for id in CameraId::BOTH {
            table.names.extend(columns[id.index()].keys().cloned());
        }
        for (frame_index, record) in rdr.records().enumerate() {
            let record = record?;
            let mut frame = LandmarkFrame::new(frame_index);
            frame.timestamp = time_col.and_then(|i| parse_cell(&record, i));
            for id in CameraId::BOTH {
                for (name, cols) in &columns[id.index()] {
                    let (Some(x), Some(y)) = (parse_cell(&record, cols.x), parse_cell(&record, cols.y))
                    else {
                        continue;
                    };
                    frame.insert(LandmarkObservation {
                        name: name.clone(),
                        camera: id,
                        frame_index,
                        point: Pt2::new(x, y),
                        confidence: cols.c.and_then(|i| parse_cell(&record, i)),
                    });
                }
            }
            table.frames.push(frame);
        }
        Ok(table)
    }
}
