//! Stereo extrinsics initialization.
//!
//! Estimates the relative pose `T_C1_C0` of a two-camera rig from per-view
//! board poses observed by both cameras.

use anyhow::Result;
use log::debug;
use nalgebra::{Quaternion, Translation3, UnitQuaternion, Vector4};
use stereo_core::{Iso3, Real, Vec3};

/// Board poses seen by both cameras in one synchronized view.
#[derive(Debug, Clone, Copy)]
pub struct StereoBoardPoses {
    /// `T_C0_B`: board frame into camera 0.
    pub cam0_from_board: Iso3,
    /// `T_C1_B`: board frame into camera 1.
    pub cam1_from_board: Iso3,
}

impl StereoBoardPoses {
    /// Relative pose implied by this single view: `T_C1_B * T_C0_B^-1`.
    pub fn cam1_from_cam0(&self) -> Iso3 {
        self.cam1_from_board * self.cam0_from_board.inverse()
    }
}

/// Simple SE(3) averaging:
/// - translations are averaged arithmetically
/// - rotations are averaged in quaternion space (with hemisphere correction)
///
/// Only suitable as an initial guess; refine downstream.
pub fn average_isometries(poses: &[Iso3]) -> Result<Iso3> {
    if poses.is_empty() {
        anyhow::bail!("cannot average an empty set of poses");
    }

    let mut t_sum = Vec3::zeros();
    for iso in poses {
        t_sum += iso.translation.vector;
    }
    let t_avg = Translation3::from(t_sum / (poses.len() as Real));

    let q0 = poses[0].rotation;
    let mut acc = Vector4::<Real>::zeros();
    for iso in poses {
        let coords = iso.rotation.coords;
        // same hemisphere as the first sample
        let sign = if q0.coords.dot(&coords) < 0.0 { -1.0 } else { 1.0 };
        acc += coords * sign;
    }

    if acc.norm_squared() == 0.0 {
        return Ok(Iso3::from_parts(t_avg, UnitQuaternion::identity()));
    }

    // `UnitQuaternion` stores (i, j, k, w), matching `Quaternion::from_vector`.
    let q = Quaternion::from_vector(acc / (poses.len() as Real)).normalize();
    Ok(Iso3::from_parts(t_avg, UnitQuaternion::from_quaternion(q)))
}

/// Linear initialisation of the stereo relative pose.
#[derive(Debug, Clone, Copy)]
pub struct StereoExtrinsicsInit;

impl StereoExtrinsicsInit {
    /// Average the per-view relative poses `T_C1_B * T_C0_B^-1`.
    pub fn from_board_poses(views: &[StereoBoardPoses]) -> Result<Iso3> {
        if views.is_empty() {
            anyhow::bail!("need at least one stereo view to initialise extrinsics");
        }
        let relative: Vec<Iso3> = views.iter().map(StereoBoardPoses::cam1_from_cam0).collect();
        let avg = average_isometries(&relative)?;
        debug!(
            "stereo init from {} views: baseline {:.6}, rotation {:.4} rad",
            views.len(),
            avg.translation.vector.norm(),
            avg.rotation.angle()
        );
        Ok(avg)
    }
}

/// Estimate the stereo relative pose from per-view board poses.
pub fn estimate_stereo_extrinsics(views: &[StereoBoardPoses]) -> Result<Iso3> {
    StereoExtrinsicsInit::from_board_poses(views)
}
