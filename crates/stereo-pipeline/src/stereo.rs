//! Stereo (relative pose) calibration with both cameras' intrinsics fixed.

use crate::error::{CalibrationError, CalibrationPhase};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use stereo_core::{
    CameraPose, CorrespondenceView, Iso3, PinholeCamera, Pt2, Real, ReprojectionStats, StereoObs,
    StereoSample,
};
use stereo_linear::{
    dlt_homography, estimate_planar_pose_from_h, estimate_stereo_extrinsics, StereoBoardPoses,
};
use stereo_optim::{optimize_stereo_extrinsics, SolveOptions, SolveReport, StereoExtrinsicsInit};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoOptions {
    pub solver: SolveOptions,
    /// Minimum smallest/largest singular value ratio of the column-normalised
    /// Jacobian at the solution.
    pub min_condition: Real,
    /// Minimum baseline as a fraction of the mean camera-to-board distance.
    pub min_baseline_ratio: Real,
}

impl Default for StereoOptions {
    fn default() -> Self {
        Self {
            solver: SolveOptions::default(),
            min_condition: 1e-8,
            min_baseline_ratio: 1e-3,
        }
    }
}

/// Relative pose of camera 1 with respect to camera 0.
#[derive(Debug, Clone)]
pub struct StereoCalibrationResult {
    /// `T_C1_C0`: maps camera-0 coordinates into camera 1.
    pub cam1_from_cam0: CameraPose,
    /// Joint RMS reprojection error over both cameras, in pixels.
    pub rms: Real,
    pub stats: ReprojectionStats,
    pub report: SolveReport,
    pub sample_count: usize,
}

fn undistorted_view(camera: &PinholeCamera, view: &CorrespondenceView) -> Vec<Pt2> {
    view.points_2d
        .iter()
        .map(|p| Pt2::from(camera.undistort_pixel(&p.coords)))
        .collect()
}

fn board_pose(camera: &PinholeCamera, view: &CorrespondenceView) -> anyhow::Result<Iso3> {
    let h = dlt_homography(&view.planar_points(), &undistorted_view(camera, view))?;
    estimate_planar_pose_from_h(&camera.k.k_matrix(), &h)
}

/// Solve for `T_C1_C0` from frames in which both cameras saw the pattern.
pub fn calibrate_stereo(
    samples: &[StereoSample],
    cam0: &PinholeCamera,
    cam1: &PinholeCamera,
    opts: &StereoOptions,
) -> Result<StereoCalibrationResult, CalibrationError> {
    let phase = CalibrationPhase::Stereo;
    let degenerate = |reason: String| CalibrationError::degenerate(phase, None, reason);

    if samples.is_empty() {
        return Err(CalibrationError::InsufficientData {
            phase,
            camera: None,
            required: 1,
            found: 0,
        });
    }

    let board_poses = samples
        .iter()
        .map(|s| {
            let frame = s.meta.frame_index;
            let cam0_from_board = board_pose(cam0, &s.obs.cam0)
                .map_err(|e| degenerate(format!("camera0 board pose of frame {frame}: {e}")))?;
            let cam1_from_board = board_pose(cam1, &s.obs.cam1)
                .map_err(|e| degenerate(format!("camera1 board pose of frame {frame}: {e}")))?;
            Ok(StereoBoardPoses {
                cam0_from_board,
                cam1_from_board,
            })
        })
        .collect::<Result<Vec<_>, CalibrationError>>()?;

    let rel0 = estimate_stereo_extrinsics(&board_poses).map_err(|e| degenerate(e.to_string()))?;
    debug!(
        "stereo seed: t = [{:.6}, {:.6}, {:.6}]",
        rel0.translation.vector.x, rel0.translation.vector.y, rel0.translation.vector.z
    );

    let views: Vec<StereoObs> = samples.iter().map(|s| s.obs.clone()).collect();
    let init = StereoExtrinsicsInit {
        cam1_from_cam0: rel0,
        cam0_from_board: board_poses.iter().map(|p| p.cam0_from_board).collect(),
    };
    let result = optimize_stereo_extrinsics(cam0, cam1, &views, &init, &opts.solver)
        .map_err(|e| degenerate(format!("{e:#}")))?;

    if !result.report.converged {
        warn!(
            "stereo solver stopped without meeting tolerances ({}) after {} evaluations",
            result.report.termination, result.report.iterations
        );
    }

    let baseline = result.cam1_from_cam0.translation.vector.norm();
    let mean_distance = result
        .cam0_from_board
        .iter()
        .map(|p| p.translation.vector.norm())
        .sum::<Real>()
        / result.cam0_from_board.len() as Real;
    if !(baseline > opts.min_baseline_ratio * mean_distance) {
        return Err(degenerate(format!(
            "camera centres coincide (baseline {baseline:.3e}, mean board distance {mean_distance:.3e})"
        )));
    }
    if !(result.condition >= opts.min_condition) {
        return Err(degenerate(format!(
            "normal equations are ill-conditioned (normalised singular value ratio {:.3e})",
            result.condition
        )));
    }

    info!(
        "stereo calibration RMS: {:.6} px over {} pairs, baseline {:.6}",
        result.stats.rms,
        samples.len(),
        baseline
    );

    Ok(StereoCalibrationResult {
        cam1_from_cam0: CameraPose::from_iso3(result.cam1_from_cam0),
        rms: result.stats.rms,
        stats: result.stats,
        report: result.report,
        sample_count: samples.len(),
    })
}
