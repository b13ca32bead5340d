//! Stereo extrinsics refinement with fixed intrinsics.
//!
//! Parameter vector: `T_C1_C0` followed by one `T_C0_B` block per stereo
//! view, all as `[wx, wy, wz, tx, ty, tz]`. Every view contributes the
//! reprojection residuals of camera 0 and then camera 1.

use crate::conditioning::normalized_condition;
use crate::params::pose_se3::{pack_pose, unpack_pose, POSE_DIM};
use crate::problems::planar_intrinsics::push_reprojection_residuals;
use crate::{LmBackend, NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use anyhow::{ensure, Result};
use log::debug;
use nalgebra::DVector;
use stereo_core::{Iso3, PinholeCamera, Real, ReprojectionStats, StereoObs};

/// Initial guess for the stereo problem.
#[derive(Debug, Clone)]
pub struct StereoExtrinsicsInit {
    pub cam1_from_cam0: Iso3,
    /// `T_C0_B` per stereo view.
    pub cam0_from_board: Vec<Iso3>,
}

#[derive(Debug, Clone)]
pub struct StereoExtrinsicsResult {
    pub cam1_from_cam0: Iso3,
    pub cam0_from_board: Vec<Iso3>,
    pub report: SolveReport,
    /// Statistics over the points of both cameras.
    pub stats: ReprojectionStats,
    /// Smallest over largest singular value of the column-normalised Jacobian.
    pub condition: Real,
}

/// Joint reprojection problem of a two-camera rig.
#[derive(Debug, Clone)]
pub struct StereoExtrinsicsProblem<'a> {
    cameras: [&'a PinholeCamera; 2],
    views: &'a [StereoObs],
}

impl<'a> StereoExtrinsicsProblem<'a> {
    pub fn new(
        cam0: &'a PinholeCamera,
        cam1: &'a PinholeCamera,
        views: &'a [StereoObs],
    ) -> Result<Self> {
        ensure!(!views.is_empty(), "need at least one stereo view");
        for (i, v) in views.iter().enumerate() {
            ensure!(
                v.cam0.len() >= 4 && v.cam1.len() >= 4,
                "stereo view {} has too few points (need >=4)",
                i
            );
        }
        Ok(Self {
            cameras: [cam0, cam1],
            views,
        })
    }

    pub fn pack(&self, init: &StereoExtrinsicsInit) -> DVector<Real> {
        let mut x = DVector::zeros(self.num_params());
        pack_pose(&init.cam1_from_cam0, &mut x.as_mut_slice()[..POSE_DIM]);
        for (i, pose) in init.cam0_from_board.iter().enumerate() {
            let off = POSE_DIM * (i + 1);
            pack_pose(pose, &mut x.as_mut_slice()[off..off + POSE_DIM]);
        }
        x
    }

    /// Decode into `(T_C1_C0, [T_C0_B])`.
    pub fn unpack(&self, x: &DVector<Real>) -> Result<(Iso3, Vec<Iso3>)> {
        ensure!(
            x.len() == self.num_params(),
            "parameter vector has length {}, expected {}",
            x.len(),
            self.num_params()
        );
        let s = x.as_slice();
        let relative = unpack_pose(&s[..POSE_DIM])?;
        let boards = (0..self.views.len())
            .map(|i| {
                let off = POSE_DIM * (i + 1);
                unpack_pose(&s[off..off + POSE_DIM])
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((relative, boards))
    }
}

impl NllsProblem for StereoExtrinsicsProblem<'_> {
    fn num_params(&self) -> usize {
        POSE_DIM * (1 + self.views.len())
    }

    fn num_residuals(&self) -> usize {
        self.views
            .iter()
            .map(|v| 2 * (v.cam0.len() + v.cam1.len()))
            .sum()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let Ok((cam1_from_cam0, boards)) = self.unpack(x) else {
            return DVector::from_element(self.num_residuals(), Real::NAN);
        };
        let mut r = Vec::with_capacity(self.num_residuals());
        for (view, cam0_from_board) in self.views.iter().zip(&boards) {
            let cam1_from_board = cam1_from_cam0 * cam0_from_board;
            push_reprojection_residuals(self.cameras[0], cam0_from_board, &view.cam0, &mut r);
            push_reprojection_residuals(self.cameras[1], &cam1_from_board, &view.cam1, &mut r);
        }
        DVector::from_vec(r)
    }
}

/// Refine the relative pose `T_C1_C0` (and nuisance board poses) with LM.
pub fn optimize_stereo_extrinsics(
    cam0: &PinholeCamera,
    cam1: &PinholeCamera,
    views: &[StereoObs],
    init: &StereoExtrinsicsInit,
    opts: &SolveOptions,
) -> Result<StereoExtrinsicsResult> {
    ensure!(
        init.cam0_from_board.len() == views.len(),
        "board pose count ({}) must match number of stereo views ({})",
        init.cam0_from_board.len(),
        views.len()
    );
    let problem = StereoExtrinsicsProblem::new(cam0, cam1, views)?;
    let x0 = problem.pack(init);

    let (x_opt, report) = LmBackend.solve(&problem, x0, opts);
    debug!(
        "stereo extrinsics LM: {} evaluations, cost {:.6e}, {}",
        report.iterations, report.final_cost, report.termination
    );
    ensure!(
        x_opt.iter().all(|v| v.is_finite()),
        "solver produced non-finite parameters"
    );

    let residuals = problem.residuals(&x_opt);
    let stats = ReprojectionStats::from_residual_pairs(residuals.as_slice());
    let condition = normalized_condition(&problem.jacobian(&x_opt));
    let (cam1_from_cam0, cam0_from_board) = problem.unpack(&x_opt)?;

    Ok(StereoExtrinsicsResult {
        cam1_from_cam0,
        cam0_from_board,
        report,
        stats,
        condition,
    })
}
