//! Per-camera intrinsic calibration.
//!
//! Linear seed from plane homographies, then joint LM refinement of
//! intrinsics, distortion and per-sample board poses.

use crate::config::ImageSize;
use crate::error::{CalibrationError, CalibrationPhase, CameraId};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use stereo_core::{
    BrownConrady5, CalibrationSample, Camera, CorrespondenceView, FxFyCxCySkew, Iso3, Mat3,
    Pinhole, PinholeCamera, Real, ReprojectionStats,
};
use stereo_linear::{
    dlt_homography, estimate_planar_pose_from_h, PlanarIntrinsicsLinearInit, ZhangOptions,
};
use stereo_optim::{
    optimize_planar_intrinsics, PlanarIntrinsicsInit, PlanarIntrinsicsSolveOptions, SolveOptions,
    SolveReport,
};

/// Samples needed to determine focal lengths and principal point together.
/// A planar view constrains only two intrinsic degrees of freedom.
const FREE_PRINCIPAL_POINT_MIN_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrinsicsOptions {
    /// Hold `k3` at zero.
    pub fix_k3: bool,
    /// Hold `p1`, `p2` at zero.
    pub fix_tangential: bool,
    /// Keep the principal point at the image centre. Lets a camera be
    /// calibrated from fewer samples.
    pub fix_principal_point: bool,
    pub solver: SolveOptions,
    /// Minimum smallest/largest singular value ratio of the column-normalised
    /// Jacobian at the solution.
    pub min_condition: Real,
}

impl Default for IntrinsicsOptions {
    fn default() -> Self {
        Self {
            fix_k3: false,
            fix_tangential: false,
            fix_principal_point: false,
            solver: SolveOptions::default(),
            min_condition: 1e-8,
        }
    }
}

impl IntrinsicsOptions {
    /// Fewest samples that determine the free intrinsics.
    pub fn min_samples(&self) -> usize {
        if self.fix_principal_point {
            1
        } else {
            FREE_PRINCIPAL_POINT_MIN_SAMPLES
        }
    }
}

/// Result of calibrating one camera.
#[derive(Debug, Clone)]
pub struct IntrinsicCalibration {
    pub camera_id: CameraId,
    pub camera: PinholeCamera,
    /// Refined `T_C_B` per sample; only needed inside the solve.
    pub poses: Vec<Iso3>,
    /// RMS reprojection error in pixels.
    pub rms: Real,
    pub stats: ReprojectionStats,
    pub report: SolveReport,
    pub image_size: ImageSize,
    pub sample_count: usize,
}

impl IntrinsicCalibration {
    pub fn k_matrix(&self) -> Mat3 {
        self.camera.k.k_matrix()
    }
}

fn principal_point_inside(k: &FxFyCxCySkew<Real>, size: &ImageSize) -> bool {
    k.cx > 0.0 && k.cy > 0.0 && k.cx < Real::from(size.width) && k.cy < Real::from(size.height)
}

/// Linear intrinsics seed.
///
/// Zhang's closed form (zero skew) when the principal point is free and it
/// lands inside the image; otherwise focal lengths only, with the principal
/// point at the image centre.
fn seed_intrinsics(
    camera_id: CameraId,
    homographies: &[Mat3],
    image_size: &ImageSize,
    fix_principal_point: bool,
) -> Result<FxFyCxCySkew<Real>, CalibrationError> {
    if !fix_principal_point && homographies.len() >= FREE_PRINCIPAL_POINT_MIN_SAMPLES {
        match PlanarIntrinsicsLinearInit::zhang(homographies, &ZhangOptions::default()) {
            Ok(k) if principal_point_inside(&k, image_size) => return Ok(k),
            Ok(k) => debug!(
                "{camera_id}: zhang principal point ({:.1}, {:.1}) outside image, using centre",
                k.cx, k.cy
            ),
            Err(e) => debug!("{camera_id}: zhang seed failed ({e}), using centre"),
        }
    }

    let (cx, cy) = image_size.center();
    PlanarIntrinsicsLinearInit::with_fixed_center(homographies, cx, cy).map_err(|e| {
        CalibrationError::degenerate(CalibrationPhase::Intrinsics, Some(camera_id), e)
    })
}

/// Calibrate one camera from its accumulated samples.
pub fn calibrate_intrinsics(
    camera_id: CameraId,
    samples: &[CalibrationSample],
    image_size: ImageSize,
    opts: &IntrinsicsOptions,
) -> Result<IntrinsicCalibration, CalibrationError> {
    let phase = CalibrationPhase::Intrinsics;
    let degenerate = |reason: String| CalibrationError::degenerate(phase, Some(camera_id), reason);

    let required = opts.min_samples();
    if samples.len() < required {
        return Err(CalibrationError::InsufficientData {
            phase,
            camera: Some(camera_id),
            required,
            found: samples.len(),
        });
    }

    let views: Vec<CorrespondenceView> = samples.iter().map(|s| s.obs.clone()).collect();
    let homographies = samples
        .iter()
        .map(|s| {
            dlt_homography(&s.obs.planar_points(), &s.obs.points_2d).map_err(|e| {
                degenerate(format!("homography of frame {}: {e}", s.meta.frame_index))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let k0 = seed_intrinsics(camera_id, &homographies, &image_size, opts.fix_principal_point)?;
    debug!(
        "{camera_id}: linear seed fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
        k0.fx, k0.fy, k0.cx, k0.cy
    );

    let kmtx = k0.k_matrix();
    let poses0 = samples
        .iter()
        .zip(&homographies)
        .map(|(s, h)| {
            estimate_planar_pose_from_h(&kmtx, h).map_err(|e| {
                degenerate(format!("board pose of frame {}: {e}", s.meta.frame_index))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let init = PlanarIntrinsicsInit {
        camera: Camera::new(Pinhole, BrownConrady5::from_opencv([0.0; 5]), k0),
        poses: poses0,
    };
    let solve_opts = PlanarIntrinsicsSolveOptions {
        fix_k3: opts.fix_k3,
        fix_tangential: opts.fix_tangential,
        fix_principal_point: opts.fix_principal_point,
        solver: opts.solver,
    };
    let result = optimize_planar_intrinsics(&views, &init, &solve_opts)
        .map_err(|e| degenerate(format!("{e:#}")))?;

    if !result.report.converged {
        warn!(
            "{camera_id}: solver stopped without meeting tolerances ({}) after {} evaluations",
            result.report.termination, result.report.iterations
        );
    }
    let k = result.camera.k;
    if !(k.fx > 0.0 && k.fy > 0.0) {
        return Err(degenerate(format!(
            "non-positive focal length (fx={}, fy={})",
            k.fx, k.fy
        )));
    }
    if !(result.condition >= opts.min_condition) {
        return Err(degenerate(format!(
            "normal equations are ill-conditioned (normalised singular value ratio {:.3e})",
            result.condition
        )));
    }

    info!(
        "{camera_id} intrinsic calibration RMS: {:.6} px over {} samples",
        result.stats.rms,
        samples.len()
    );

    Ok(IntrinsicCalibration {
        camera_id,
        camera: result.camera,
        poses: result.poses,
        rms: result.stats.rms,
        stats: result.stats,
        report: result.report,
        image_size,
        sample_count: samples.len(),
    })
}
