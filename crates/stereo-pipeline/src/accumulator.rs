//! Correspondence accumulation from synchronized frame streams.
//!
//! Every `video_frame_interval`-th frame pair is handed to a
//! [`PatternDetector`]. A camera whose detection succeeds gets a
//! [`CalibrationSample`]; when both succeed on the same frame the pair is
//! also added to the stereo list. A miss only excludes the frame.

use crate::config::{CalibrationSettings, ImageSize, PatternSize};
use crate::error::{CalibrationError, CalibrationPhase, CameraId, ConfigError};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use stereo_core::{
    CalibrationSample, CorrespondenceView, FrameMeta, Pt2, Pt3, StereoObs, StereoSample, View,
};

/// External corner detector.
///
/// Returns the refined corners of a `rows x columns` pattern in detector
/// order, or `None` if the pattern was not found.
pub trait PatternDetector {
    type Frame;

    fn frame_size(&self, frame: &Self::Frame) -> ImageSize;
    fn detect(&self, frame: &Self::Frame, pattern: &PatternSize) -> Option<Vec<Pt2>>;
}

/// One camera's accumulated samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraSamples {
    pub samples: Vec<CalibrationSample>,
    /// Size of the first sampled frame.
    pub image_size: Option<ImageSize>,
    /// Sampled frames on which detection failed.
    pub misses: usize,
}

impl CameraSamples {
    /// Correspondence views of all samples, in frame order.
    pub fn views(&self) -> Vec<CorrespondenceView> {
        self.samples.iter().map(|s| s.obs.clone()).collect()
    }
}

/// Output of the accumulator: per-camera and stereo sample lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrespondenceSet {
    pub cameras: [CameraSamples; 2],
    pub stereo: Vec<StereoSample>,
    pub frames_scanned: usize,
    pub frames_sampled: usize,
}

impl CorrespondenceSet {
    pub fn camera(&self, id: CameraId) -> &CameraSamples {
        &self.cameras[id.index()]
    }

    /// Fail if either camera list or the stereo list is empty.
    pub fn ensure_usable(&self) -> Result<(), CalibrationError> {
        for id in CameraId::BOTH {
            let found = self.camera(id).samples.len();
            if found == 0 {
                return Err(CalibrationError::InsufficientData {
                    phase: CalibrationPhase::Intrinsics,
                    camera: Some(id),
                    required: 1,
                    found,
                });
            }
        }
        if self.stereo.is_empty() {
            return Err(CalibrationError::InsufficientData {
                phase: CalibrationPhase::Stereo,
                camera: None,
                required: 1,
                found: 0,
            });
        }
        Ok(())
    }
}

/// Incremental accumulator with explicit configuration.
#[derive(Debug, Clone)]
pub struct CorrespondenceAccumulator {
    pattern: PatternSize,
    object_points: Vec<Pt3>,
    stride: usize,
    set: CorrespondenceSet,
}

impl CorrespondenceAccumulator {
    pub fn new(settings: &CalibrationSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            pattern: settings.pattern_size(),
            object_points: settings.object_points(),
            stride: settings.video_frame_interval,
            set: CorrespondenceSet::default(),
        })
    }

    pub fn is_sampled(&self, frame_index: usize) -> bool {
        frame_index % self.stride == 0
    }

    fn detect_one<D: PatternDetector>(
        &mut self,
        detector: &D,
        camera: CameraId,
        frame_index: usize,
        frame: &D::Frame,
    ) -> Option<CorrespondenceView> {
        let size = detector.frame_size(frame);
        let entry = &mut self.set.cameras[camera.index()];
        match entry.image_size {
            None => entry.image_size = Some(size),
            Some(prev) if prev != size => warn!(
                "{camera} frame {frame_index}: size {}x{} differs from {}x{}",
                size.width, size.height, prev.width, prev.height
            ),
            Some(_) => {}
        }

        let corners = match detector.detect(frame, &self.pattern) {
            Some(c) if c.len() == self.pattern.corner_count() => c,
            Some(c) => {
                debug!(
                    "{camera} frame {frame_index}: expected {} corners, detector returned {}",
                    self.pattern.corner_count(),
                    c.len()
                );
                entry.misses += 1;
                return None;
            }
            None => {
                debug!("{camera} frame {frame_index}: checkerboard not detected");
                entry.misses += 1;
                return None;
            }
        };

        let view = CorrespondenceView::new(self.object_points.clone(), corners).ok()?;
        entry.samples.push(View {
            obs: view.clone(),
            meta: FrameMeta { frame_index },
        });
        Some(view)
    }

    /// Process one synchronized frame pair.
    pub fn push_frame_pair<D: PatternDetector>(
        &mut self,
        detector: &D,
        frame_index: usize,
        frame0: &D::Frame,
        frame1: &D::Frame,
    ) {
        self.set.frames_scanned += 1;
        if !self.is_sampled(frame_index) {
            return;
        }
        self.set.frames_sampled += 1;

        let v0 = self.detect_one(detector, CameraId::Camera0, frame_index, frame0);
        let v1 = self.detect_one(detector, CameraId::Camera1, frame_index, frame1);
        if let (Some(cam0), Some(cam1)) = (v0, v1) {
            // both views carry the same object points
            if let Ok(obs) = StereoObs::new(cam0, cam1) {
                self.set.stereo.push(StereoSample {
                    obs,
                    meta: FrameMeta { frame_index },
                });
            }
        }
    }

    pub fn finish(self) -> CorrespondenceSet {
        let set = self.set;
        info!(
            "accumulated {} / {} / {} samples (camera0 / camera1 / stereo) from {} sampled of {} frames",
            set.cameras[0].samples.len(),
            set.cameras[1].samples.len(),
            set.stereo.len(),
            set.frames_sampled,
            set.frames_scanned
        );
        set
    }
}

/// Scan two synchronized streams; stops at the end of the shorter one.
pub fn accumulate_correspondences<D, I0, I1>(
    settings: &CalibrationSettings,
    detector: &D,
    frames0: I0,
    frames1: I1,
) -> Result<CorrespondenceSet, ConfigError>
where
    D: PatternDetector,
    I0: IntoIterator<Item = D::Frame>,
    I1: IntoIterator<Item = D::Frame>,
{
    let mut acc = CorrespondenceAccumulator::new(settings)?;
    for (frame_index, (f0, f1)) in frames0.into_iter().zip(frames1).enumerate() {
        acc.push_frame_pair(detector, frame_index, &f0, &f1);
    }
    Ok(acc.finish())
}

/// A frame whose detection result is already known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub image_size: ImageSize,
    pub corners: Option<Vec<Pt2>>,
}

/// Detector that returns the corners stored in a [`RecordedFrame`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayDetector;

impl PatternDetector for ReplayDetector {
    type Frame = RecordedFrame;

    fn frame_size(&self, frame: &RecordedFrame) -> ImageSize {
        frame.image_size
    }

    fn detect(&self, frame: &RecordedFrame, _pattern: &PatternSize) -> Option<Vec<Pt2>> {
        frame.corners.clone()
    }
}

/// Corner detections of one frame index for both cameras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedDetection {
    pub frame_index: usize,
    #[serde(default)]
    pub camera0: Option<Vec<Pt2>>,
    #[serde(default)]
    pub camera1: Option<Vec<Pt2>>,
}

/// Previously detected checkerboard corners for two synchronized videos.
///
/// Frames not listed are treated as detection misses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedDetections {
    pub image_size: [ImageSize; 2],
    /// Total number of frames per stream; defaults to one past the last listed index.
    #[serde(default)]
    pub frame_count: Option<usize>,
    pub frames: Vec<RecordedDetection>,
}

impl RecordedDetections {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detections {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse detections {}", path.display()))
    }

    fn frame_count(&self) -> usize {
        let listed = self
            .frames
            .iter()
            .map(|f| f.frame_index + 1)
            .max()
            .unwrap_or(0);
        self.frame_count.unwrap_or(listed).max(listed)
    }

    /// Expand into one dense frame stream per camera.
    pub fn streams(&self) -> [Vec<RecordedFrame>; 2] {
        let n = self.frame_count();
        let mut streams = [0, 1].map(|cam| {
            vec![
                RecordedFrame {
                    image_size: self.image_size[cam],
                    corners: None,
                };
                n
            ]
        });
        for det in &self.frames {
            streams[0][det.frame_index].corners = det.camera0.clone();
            streams[1][det.frame_index].corners = det.camera1.clone();
        }
        streams
    }

    /// Run the accumulator over the recorded streams.
    pub fn accumulate(
        &self,
        settings: &CalibrationSettings,
    ) -> Result<CorrespondenceSet, ConfigError> {
        let [s0, s1] = self.streams();
        accumulate_correspondences(settings, &ReplayDetector, s0, s1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame = (image size, whether the pattern is visible).
    struct FlagDetector;

    impl PatternDetector for FlagDetector {
        type Frame = (ImageSize, bool);

        fn frame_size(&self, frame: &Self::Frame) -> ImageSize {
            frame.0
        }

        fn detect(&self, frame: &Self::Frame, pattern: &PatternSize) -> Option<Vec<Pt2>> {
            frame.1.then(|| {
                (0..pattern.corner_count())
                    .map(|i| Pt2::new(10.0 + i as f64, 20.0))
                    .collect()
            })
        }
    }

    fn frames(flags: &[bool]) -> Vec<(ImageSize, bool)> {
        flags.iter().map(|&f| (ImageSize::new(640, 480), f)).collect()
    }

    #[test]
    fn samples_every_nth_frame_and_keeps_asymmetric_lists() {
        let settings = CalibrationSettings::new(3, 4, 1.0).with_frame_interval(2);
        // sampled indices 0, 2, 4
        let cam0 = frames(&[true, true, true, true, false]);
        let cam1 = frames(&[true, true, false, true, true]);
        let set = accumulate_correspondences(&settings, &FlagDetector, cam0, cam1).unwrap();

        assert_eq!(set.frames_scanned, 5);
        assert_eq!(set.frames_sampled, 3);
        assert_eq!(set.cameras[0].samples.len(), 2);
        assert_eq!(set.cameras[1].samples.len(), 2);
        assert_eq!(set.cameras[0].misses, 1);
        assert_eq!(set.stereo.len(), 1);
        assert_eq!(set.stereo[0].meta.frame_index, 0);
        let idx1: Vec<usize> = set.cameras[1]
            .samples
            .iter()
            .map(|s| s.meta.frame_index)
            .collect();
        assert_eq!(idx1, vec![0, 4]);
        assert_eq!(set.cameras[0].image_size, Some(ImageSize::new(640, 480)));
        assert_eq!(set.cameras[0].samples[0].obs.len(), 12);
        assert!(set.ensure_usable().is_ok());
    }

    #[test]
    fn stops_at_shorter_stream() {
        let settings = CalibrationSettings::new(2, 2, 1.0).with_frame_interval(1);
        let set = accumulate_correspondences(
            &settings,
            &FlagDetector,
            frames(&[true; 5]),
            frames(&[true; 3]),
        )
        .unwrap();
        assert_eq!(set.frames_scanned, 3);
        assert_eq!(set.stereo.len(), 3);
    }

    #[test]
    fn empty_stereo_list_is_insufficient() {
        let settings = CalibrationSettings::new(2, 2, 1.0).with_frame_interval(1);
        let set = accumulate_correspondences(
            &settings,
            &FlagDetector,
            frames(&[true, false]),
            frames(&[false, true]),
        )
        .unwrap();
        assert_eq!(set.cameras[0].samples.len(), 1);
        assert_eq!(set.cameras[1].samples.len(), 1);
        assert!(matches!(
            set.ensure_usable(),
            Err(CalibrationError::InsufficientData {
                phase: CalibrationPhase::Stereo,
                ..
            })
        ));

        let none = accumulate_correspondences(
            &settings,
            &FlagDetector,
            frames(&[false]),
            frames(&[true]),
        )
        .unwrap();
        assert!(matches!(
            none.ensure_usable(),
            Err(CalibrationError::InsufficientData {
                camera: Some(CameraId::Camera0),
                ..
            })
        ));
    }

    #[test]
    fn wrong_corner_count_is_a_miss() {
        let settings = CalibrationSettings::new(2, 2, 1.0).with_frame_interval(1);
        let recorded = RecordedDetections {
            image_size: [ImageSize::new(100, 100); 2],
            frame_count: None,
            frames: vec![RecordedDetection {
                frame_index: 0,
                camera0: Some(vec![Pt2::new(1.0, 1.0); 3]),
                camera1: Some(vec![Pt2::new(1.0, 1.0); 4]),
            }],
        };
        let set = recorded.accumulate(&settings).unwrap();
        assert_eq!(set.cameras[0].samples.len(), 0);
        assert_eq!(set.cameras[0].misses, 1);
        assert_eq!(set.cameras[1].samples.len(), 1);
        assert!(set.stereo.is_empty());
    }

    #[test]
    fn recorded_detections_parse_sparse_frames() {
        let json = r#"{
            "image_size": [{"width": 640, "height": 480}, {"width": 800, "height": 600}],
            "frame_count": 61,
            "frames": [
                {"frame_index": 30, "camera0": [[1.0, 2.0]], "camera1": null},
                {"frame_index": 60, "camera1": [[3.0, 4.0]]}
            ]
        }"#;
        let rec: RecordedDetections = serde_json::from_str(json).unwrap();
        let [s0, s1] = rec.streams();
        assert_eq!(s0.len(), 61);
        assert_eq!(s0[30].corners.as_deref(), Some(&[Pt2::new(1.0, 2.0)][..]));
        assert!(s1[30].corners.is_none());
        assert_eq!(s1[60].image_size, ImageSize::new(800, 600));
    }
}
