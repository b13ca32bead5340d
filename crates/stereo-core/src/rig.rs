//! Camera poses, projection matrices and the two-camera rig.
//!
//! Conventions:
//! - a [`CameraPose`] maps points from the reference frame into the camera
//!   frame (`X_c = R X_ref + T`);
//! - camera0 is the reference, so its pose is the identity;
//! - `P = K [R | T]` is always derived, never stored independently of its
//!   inputs.

use crate::{Iso3, Mat3, Mat34, PinholeCamera, Pt2, Pt3, Real, Vec3};
use anyhow::{ensure, Result};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// Rigid transform from the reference frame into a camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    cam_from_ref: Iso3,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::identity()
    }
}

impl CameraPose {
    /// Pose of the reference camera (`R = I`, `T = 0`).
    pub fn identity() -> Self {
        Self {
            cam_from_ref: Iso3::identity(),
        }
    }

    pub fn from_iso3(cam_from_ref: Iso3) -> Self {
        Self { cam_from_ref }
    }

    /// Build a pose from a rotation matrix and translation vector.
    ///
    /// The rotation must be orthonormal with determinant +1 (within `1e-6`).
    pub fn from_rt(rotation: &Mat3, translation: &Vec3) -> Result<Self> {
        let ortho_err = (rotation.transpose() * rotation - Mat3::identity()).norm();
        ensure!(
            ortho_err < 1e-6,
            "rotation is not orthonormal (|R^T R - I| = {ortho_err:.3e})"
        );
        let det = rotation.determinant();
        ensure!(
            (det - 1.0).abs() < 1e-6,
            "rotation must have determinant +1, got {det:.6}"
        );
        let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*rotation));
        Ok(Self {
            cam_from_ref: Iso3::from_parts(Translation3::from(*translation), rot),
        })
    }

    pub fn iso3(&self) -> &Iso3 {
        &self.cam_from_ref
    }

    /// Rotation `R` as a 3×3 matrix.
    pub fn rotation(&self) -> Mat3 {
        *self.cam_from_ref.rotation.to_rotation_matrix().matrix()
    }

    /// Translation `T`.
    pub fn translation(&self) -> Vec3 {
        self.cam_from_ref.translation.vector
    }

    /// Position of the camera's optical centre in the reference frame.
    pub fn center(&self) -> Pt3 {
        self.cam_from_ref.inverse() * Pt3::origin()
    }

    /// Map a reference-frame point into the camera frame.
    pub fn transform_point(&self, p_ref: &Pt3) -> Pt3 {
        self.cam_from_ref.transform_point(p_ref)
    }
}

/// Build `P = K [R | T]`.
pub fn projection_matrix(k: &Mat3, pose: &CameraPose) -> Mat34 {
    projection_matrix_from_rt(k, &pose.rotation(), &pose.translation())
}

/// Build `P = K [R | T]` from raw matrices.
pub fn projection_matrix_from_rt(k: &Mat3, r: &Mat3, t: &Vec3) -> Mat34 {
    let mut rt = Mat34::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    rt.set_column(3, t);
    k * rt
}

/// Project a 3D point through a projection matrix (no distortion).
///
/// Returns `None` when the point maps to the line at infinity.
pub fn project_with_matrix(p: &Mat34, point: &Pt3) -> Option<Pt2> {
    let x = p * point.to_homogeneous();
    if x.z.abs() <= Real::EPSILON {
        return None;
    }
    Some(Pt2::new(x.x / x.z, x.y / x.z))
}

/// Calibrated two-camera rig with derived projection matrices.
#[derive(Debug, Clone)]
pub struct StereoRig {
    cameras: [PinholeCamera; 2],
    cam1_from_cam0: CameraPose,
    projections: [Mat34; 2],
}

impl StereoRig {
    pub fn new(cam0: PinholeCamera, cam1: PinholeCamera, cam1_from_cam0: CameraPose) -> Self {
        let projections = [
            projection_matrix(&cam0.k.k_matrix(), &CameraPose::identity()),
            projection_matrix(&cam1.k.k_matrix(), &cam1_from_cam0),
        ];
        Self {
            cameras: [cam0, cam1],
            cam1_from_cam0,
            projections,
        }
    }

    /// Camera `idx` (0 or 1).
    pub fn camera(&self, idx: usize) -> &PinholeCamera {
        &self.cameras[idx]
    }

    pub fn cam1_from_cam0(&self) -> &CameraPose {
        &self.cam1_from_cam0
    }

    /// Pose of camera `idx` relative to the reference camera.
    pub fn pose(&self, idx: usize) -> CameraPose {
        if idx == 0 {
            CameraPose::identity()
        } else {
            self.cam1_from_cam0
        }
    }

    /// Projection matrix of camera `idx`.
    pub fn projection(&self, idx: usize) -> &Mat34 {
        &self.projections[idx]
    }

    /// Replace the relative pose, recomputing the projection matrices.
    pub fn set_cam1_from_cam0(&mut self, pose: CameraPose) {
        *self = Self::new(self.cameras[0].clone(), self.cameras[1].clone(), pose);
    }

    /// Distance between the two optical centres.
    pub fn baseline(&self) -> Real {
        self.cam1_from_cam0.translation().norm()
    }
}
