//! Synthetic planar target helpers.
//!
//! Build planar point grids (Z=0), generate board poses, and project the
//! target into one or two cameras to produce [`CorrespondenceView`]s.

use crate::{
    models::{DistortionModel, IntrinsicsModel, ProjectionModel},
    Camera, CameraPose, CorrespondenceView, Iso3, Pt2, Pt3, Real, StereoObs,
};
use anyhow::Result;
use nalgebra::{Translation3, UnitQuaternion, Vector3};

/// Generate a planar grid of 3D points (Z=0) with `nx * ny` points.
///
/// Points are ordered row-major (Y major): `(x = 0..nx-1, y = 0..ny-1)`.
pub fn grid_points(nx: usize, ny: usize, spacing: Real) -> Vec<Pt3> {
    let mut points = Vec::with_capacity(nx.saturating_mul(ny));
    for j in 0..ny {
        for i in 0..nx {
            points.push(Pt3::new(i as Real * spacing, j as Real * spacing, 0.0));
        }
    }
    points
}

/// Generate `n_views` board poses (`cam_from_board`) on a ring of tilts.
///
/// Each pose tilts the board by `tilt_rad` about an axis in the board plane
/// whose direction rotates with the view index, adds a small in-plane spin,
/// and places the board centre roughly `distance` in front of the camera.
/// This gives the orientation diversity intrinsic calibration needs.
pub fn poses_tilted_ring(n_views: usize, distance: Real, tilt_rad: Real) -> Vec<Iso3> {
    (0..n_views)
        .map(|view_idx| {
            let phase = 2.0 * std::f64::consts::PI * view_idx as Real / n_views.max(1) as Real;
            let axis = Vector3::new(phase.cos(), phase.sin(), 0.0);
            let tilt = UnitQuaternion::from_scaled_axis(axis * tilt_rad);
            let spin = UnitQuaternion::from_scaled_axis(Vector3::z() * (0.1 * phase.sin()));
            let rotation = tilt * spin;
            let translation = Vector3::new(
                -0.1 + 0.03 * phase.cos(),
                -0.08 + 0.03 * phase.sin(),
                distance + 0.05 * (view_idx % 3) as Real,
            );
            Iso3::from_parts(Translation3::from(translation), rotation)
        })
        .collect()
}

/// Project a planar target into the camera, requiring every point to be projectable.
///
/// `cam_from_target` must map target-frame points into the camera frame.
pub fn project_view_all<P, D, K>(
    camera: &Camera<Real, P, D, K>,
    cam_from_target: &Iso3,
    target_points: &[Pt3],
) -> Result<CorrespondenceView>
where
    P: ProjectionModel<Real>,
    D: DistortionModel<Real>,
    K: IntrinsicsModel<Real>,
{
    let mut pixels = Vec::with_capacity(target_points.len());
    for (idx, pw) in target_points.iter().enumerate() {
        let pc = cam_from_target.transform_point(pw);
        let Some(uv) = camera.project_point(&pc) else {
            anyhow::bail!("point {idx} not projectable (z={:.6})", pc.z);
        };
        pixels.push(Pt2::from(uv));
    }

    CorrespondenceView::new(target_points.to_vec(), pixels)
}

/// Project multiple views, requiring every point to be projectable in every view.
pub fn project_views_all<P, D, K>(
    camera: &Camera<Real, P, D, K>,
    target_points: &[Pt3],
    cam_from_target: &[Iso3],
) -> Result<Vec<CorrespondenceView>>
where
    P: ProjectionModel<Real>,
    D: DistortionModel<Real>,
    K: IntrinsicsModel<Real>,
{
    cam_from_target
        .iter()
        .map(|pose| project_view_all(camera, pose, target_points))
        .collect()
}

/// Project the target into both cameras of a rig.
///
/// `cam0_from_target` holds the board poses in the reference camera; camera1
/// sees `cam1_from_cam0 * cam0_from_target`.
pub fn project_stereo_views_all<P, D, K>(
    cam0: &Camera<Real, P, D, K>,
    cam1: &Camera<Real, P, D, K>,
    cam1_from_cam0: &CameraPose,
    target_points: &[Pt3],
    cam0_from_target: &[Iso3],
) -> Result<Vec<StereoObs>>
where
    P: ProjectionModel<Real>,
    D: DistortionModel<Real>,
    K: IntrinsicsModel<Real>,
{
    cam0_from_target
        .iter()
        .map(|pose0| {
            let pose1 = cam1_from_cam0.iso3() * pose0;
            let v0 = project_view_all(cam0, pose0, target_points)?;
            let v1 = project_view_all(cam1, &pose1, target_points)?;
            StereoObs::new(v0, v1)
        })
        .collect()
}
