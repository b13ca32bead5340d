//! Calibration persistence.
//!
//! Two layouts are supported:
//! - a single JSON document ([`StereoCalibration`])
//! - the plain-text `camera_parameters` directory with
//!   `camera{0,1}_intrinsics.dat` and `camera{0,1}_rot_trans.dat`
//!
//! Numbers are written with the shortest representation that parses back to
//! the same `f64`.

use crate::config::ImageSize;
use crate::error::CameraId;
use crate::intrinsics::IntrinsicCalibration;
use crate::stereo::StereoCalibrationResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use stereo_core::{
    BrownConrady5, Camera, CameraPose, FxFyCxCySkew, Mat3, Pinhole, PinholeCamera, Real,
    StereoRig, Vec3,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}:{line}: {message}")]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("invalid calibration: {0}")]
    Invalid(String),
}

/// One camera's intrinsic parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub intrinsics: FxFyCxCySkew<Real>,
    /// `[k1, k2, p1, p2, k3]`.
    pub distortion: [Real; 5],
    /// RMS reprojection error of the intrinsic solve, in pixels.
    #[serde(default)]
    pub rms: Option<Real>,
    #[serde(default)]
    pub image_size: Option<ImageSize>,
    #[serde(default)]
    pub sample_count: usize,
}

impl CameraCalibration {
    pub fn from_camera(camera: &PinholeCamera) -> Self {
        Self {
            intrinsics: camera.k,
            distortion: camera.dist.to_opencv(),
            rms: None,
            image_size: None,
            sample_count: 0,
        }
    }

    pub fn camera(&self) -> PinholeCamera {
        Camera::new(
            Pinhole,
            BrownConrady5::from_opencv(self.distortion),
            self.intrinsics,
        )
    }

    pub fn k_matrix(&self) -> Mat3 {
        self.intrinsics.k_matrix()
    }
}

impl From<&IntrinsicCalibration> for CameraCalibration {
    fn from(calib: &IntrinsicCalibration) -> Self {
        Self {
            rms: Some(calib.rms),
            image_size: Some(calib.image_size),
            sample_count: calib.sample_count,
            ..Self::from_camera(&calib.camera)
        }
    }
}

/// Pose of camera 1 relative to camera 0 (`x_1 = R x_0 + T`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoExtrinsics {
    /// Row-major rotation matrix.
    pub rotation: [[Real; 3]; 3],
    pub translation: [Real; 3],
    /// Joint RMS reprojection error of the stereo solve, in pixels.
    #[serde(default)]
    pub rms: Option<Real>,
    #[serde(default)]
    pub sample_count: usize,
}

impl StereoExtrinsics {
    pub fn from_pose(pose: &CameraPose) -> Self {
        let r = pose.rotation();
        let t = pose.translation();
        Self {
            rotation: [
                [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
            ],
            translation: [t.x, t.y, t.z],
            rms: None,
            sample_count: 0,
        }
    }

    pub fn rotation_matrix(&self) -> Mat3 {
        let r = &self.rotation;
        Mat3::new(
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
        )
    }

    pub fn translation_vector(&self) -> Vec3 {
        Vec3::from(self.translation)
    }

    pub fn pose(&self) -> Result<CameraPose, PersistenceError> {
        CameraPose::from_rt(&self.rotation_matrix(), &self.translation_vector())
            .map_err(|e| PersistenceError::Invalid(e.to_string()))
    }
}

impl From<&StereoCalibrationResult> for StereoExtrinsics {
    fn from(result: &StereoCalibrationResult) -> Self {
        Self {
            rms: Some(result.rms),
            sample_count: result.sample_count,
            ..Self::from_pose(&result.cam1_from_cam0)
        }
    }
}

/// Everything triangulation needs, plus calibration diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibration {
    pub camera0: CameraCalibration,
    pub camera1: CameraCalibration,
    pub extrinsics: StereoExtrinsics,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl StereoCalibration {
    pub fn camera(&self, id: CameraId) -> &CameraCalibration {
        match id {
            CameraId::Camera0 => &self.camera0,
            CameraId::Camera1 => &self.camera1,
        }
    }

    /// Build the rig (cameras, relative pose, projection matrices).
    pub fn rig(&self) -> Result<StereoRig, PersistenceError> {
        Ok(StereoRig::new(
            self.camera0.camera(),
            self.camera1.camera(),
            self.extrinsics.pose()?,
        ))
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|source| PersistenceError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(io_err(path))
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(io_err(path))?;
        serde_json::from_str(&text).map_err(|source| PersistenceError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the four `.dat` files into `dir` (created if missing).
    pub fn write_dat_dir(&self, dir: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(io_err(dir))?;

        for id in CameraId::BOTH {
            let cam = self.camera(id);
            let path = dir.join(format!("{id}_intrinsics.dat"));
            fs::write(&path, format_intrinsics(cam)).map_err(io_err(&path))?;
        }

        let identity = StereoExtrinsics {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
            rms: None,
            sample_count: 0,
        };
        for (id, ext) in [(CameraId::Camera0, &identity), (CameraId::Camera1, &self.extrinsics)] {
            let path = dir.join(format!("{id}_rot_trans.dat"));
            fs::write(&path, format_rot_trans(ext)).map_err(io_err(&path))?;
        }
        Ok(())
    }

    /// Read a `.dat` directory back. Diagnostics (RMS, sample counts) are not
    /// part of that format and come back empty.
    pub fn read_dat_dir(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref();
        let camera0 = parse_intrinsics(&dir.join("camera0_intrinsics.dat"))?;
        let camera1 = parse_intrinsics(&dir.join("camera1_intrinsics.dat"))?;
        let pose0 = parse_rot_trans(&dir.join("camera0_rot_trans.dat"))?.pose()?;
        let pose1 = parse_rot_trans(&dir.join("camera1_rot_trans.dat"))?.pose()?;

        // camera0 is normally the identity; compose in case it is not
        let relative = CameraPose::from_iso3(pose1.iso3() * pose0.iso3().inverse());
        Ok(Self {
            camera0,
            camera1,
            extrinsics: StereoExtrinsics::from_pose(&relative),
        })
    }
}

fn push_row(out: &mut String, values: &[Real]) {
    let row: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    let _ = writeln!(out, "{}", row.join(" "));
}

fn format_intrinsics(cam: &CameraCalibration) -> String {
    let k = cam.k_matrix();
    let mut out = String::from("Intrinsic:\n");
    for r in 0..3 {
        push_row(&mut out, &[k[(r, 0)], k[(r, 1)], k[(r, 2)]]);
    }
    out.push_str("Distortion:\n");
    push_row(&mut out, &cam.distortion);
    out
}

fn format_rot_trans(ext: &StereoExtrinsics) -> String {
    let mut out = String::from("R:\n");
    for row in &ext.rotation {
        push_row(&mut out, row);
    }
    out.push_str("T:\n");
    push_row(&mut out, &ext.translation);
    out
}

/// Line-oriented reader over the non-empty lines of a `.dat` file.
struct DatReader<'a> {
    path: &'a Path,
    lines: Vec<(usize, &'a str)>,
    pos: usize,
}

impl<'a> DatReader<'a> {
    fn new(path: &'a Path, text: &'a str) -> Self {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty())
            .collect();
        Self {
            path,
            lines,
            pos: 0,
        }
    }

    fn error(&self, line: usize, message: impl Into<String>) -> PersistenceError {
        PersistenceError::Format {
            path: self.path.to_path_buf(),
            line,
            message: message.into(),
        }
    }

    fn next_line(&mut self) -> Result<(usize, &'a str), PersistenceError> {
        let last = self.lines.last().map_or(0, |(n, _)| *n);
        let item = self
            .lines
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error(last + 1, "unexpected end of file"))?;
        self.pos += 1;
        Ok(item)
    }

    fn header(&mut self, name: &str) -> Result<(), PersistenceError> {
        let (n, line) = self.next_line()?;
        if line != name {
            return Err(self.error(n, format!("expected `{name}`, found `{line}`")));
        }
        Ok(())
    }

    fn row(&mut self, min: usize, max: usize) -> Result<Vec<Real>, PersistenceError> {
        let (n, line) = self.next_line()?;
        // numpy may wrap rows in brackets
        let cleaned = line.replace(['[', ']'], " ");
        let values = cleaned
            .split_whitespace()
            .map(|tok| {
                tok.parse::<Real>()
                    .map_err(|_| self.error(n, format!("invalid number `{tok}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() < min || values.len() > max {
            return Err(self.error(
                n,
                format!("expected {min}..={max} values, found {}", values.len()),
            ));
        }
        Ok(values)
    }
}

fn parse_intrinsics(path: &Path) -> Result<CameraCalibration, PersistenceError> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    let mut rd = DatReader::new(path, &text);

    rd.header("Intrinsic:")?;
    let mut k = Mat3::zeros();
    for r in 0..3 {
        let row = rd.row(3, 3)?;
        for c in 0..3 {
            k[(r, c)] = row[c];
        }
    }
    rd.header("Distortion:")?;
    let d = rd.row(4, 5)?;
    let mut distortion = [0.0; 5];
    distortion[..d.len()].copy_from_slice(&d);

    let intrinsics = FxFyCxCySkew::try_from_k_matrix(&k, 1e-12).ok_or_else(|| {
        PersistenceError::Invalid(format!("{}: not an upper-triangular camera matrix", path.display()))
    })?;
    Ok(CameraCalibration {
        intrinsics,
        distortion,
        rms: None,
        image_size: None,
        sample_count: 0,
    })
}

fn parse_rot_trans(path: &Path) -> Result<StereoExtrinsics, PersistenceError> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    let mut rd = DatReader::new(path, &text);

    rd.header("R:")?;
    let mut rotation = [[0.0; 3]; 3];
    for row in rotation.iter_mut() {
        row.copy_from_slice(&rd.row(3, 3)?);
    }
    rd.header("T:")?;
    let t = rd.row(3, 3)?;
    Ok(StereoExtrinsics {
        rotation,
        translation: [t[0], t[1], t[2]],
        rms: None,
        sample_count: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};
    use stereo_core::Iso3;

    fn sample_calibration() -> StereoCalibration {
        let pose = CameraPose::from_iso3(Iso3::from_parts(
            Translation3::new(-124.13846774, -20.27274023, 14.12344011),
            UnitQuaternion::from_euler_angles(0.3, -1.2, 0.7),
        ));
        StereoCalibration {
            camera0: CameraCalibration {
                intrinsics: FxFyCxCySkew {
                    fx: 229.75032642,
                    fy: 169.79368238,
                    cx: 200.44588524,
                    cy: 246.51861282,
                    skew: 0.0,
                },
                distortion: [-0.14493007, 0.03117784, 0.09789049, -0.290851, 0.17057335],
                rms: Some(0.41),
                image_size: Some(ImageSize::new(400, 500)),
                sample_count: 12,
            },
            camera1: CameraCalibration {
                intrinsics: FxFyCxCySkew {
                    fx: 185.66584519,
                    fy: 159.65919947,
                    cx: 206.46116634,
                    cy: 216.49924977,
                    skew: 0.0,
                },
                distortion: [-0.04283384, 0.04385798, -0.05661369, 0.03800788, -0.02296988],
                rms: Some(0.37),
                image_size: Some(ImageSize::new(400, 500)),
                sample_count: 10,
            },
            extrinsics: StereoExtrinsics {
                rms: Some(0.8),
                sample_count: 9,
                ..StereoExtrinsics::from_pose(&pose)
            },
        }
    }

    #[test]
    fn json_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let calib = sample_calibration();
        calib.save_json(&path).unwrap();
        assert_eq!(StereoCalibration::load_json(&path).unwrap(), calib);
    }

    #[test]
    fn dat_directory_round_trip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let calib = sample_calibration();
        calib.write_dat_dir(dir.path()).unwrap();

        let text = fs::read_to_string(dir.path().join("camera0_intrinsics.dat")).unwrap();
        assert!(text.starts_with("Intrinsic:\n229.75032642 0 200.44588524\n"), "{text}");
        let text = fs::read_to_string(dir.path().join("camera0_rot_trans.dat")).unwrap();
        assert_eq!(text, "R:\n1 0 0\n0 1 0\n0 0 1\nT:\n0 0 0\n");

        let back = StereoCalibration::read_dat_dir(dir.path()).unwrap();
        assert_eq!(back.camera0.intrinsics, calib.camera0.intrinsics);
        assert_eq!(back.camera1.distortion, calib.camera1.distortion);
        assert_eq!(back.extrinsics.translation, calib.extrinsics.translation);
        let dr = back.extrinsics.rotation_matrix() - calib.extrinsics.rotation_matrix();
        assert!(dr.norm() < 1e-12);
        assert!(back.camera0.rms.is_none());
    }

    #[test]
    fn malformed_dat_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera0_intrinsics.dat");
        fs::write(&path, "Intrinsic:\n1 0 2\n0 1 x\n0 0 1\n").unwrap();
        let err = parse_intrinsics(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::Format { line: 3, .. }), "{err}");
    }

    #[test]
    fn rig_uses_stored_pose() {
        let calib = sample_calibration();
        let rig = calib.rig().unwrap();
        let t = rig.cam1_from_cam0().translation();
        assert!((t.x + 124.13846774).abs() < 1e-9);
        assert_eq!(rig.projection(0).ncols(), 4);
    }
}
