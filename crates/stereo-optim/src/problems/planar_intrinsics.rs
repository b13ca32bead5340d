//! Planar intrinsics refinement.
//!
//! Parameter vector: the free subset of `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`
//! followed by one `[wx, wy, wz, tx, ty, tz]` block per view (`T_C_B`).
//! Each observed corner contributes two residuals `observed - projected`.
//! Skew is held at zero.

use crate::conditioning::normalized_condition;
use crate::params::pose_se3::{pack_pose, unpack_pose, POSE_DIM};
use crate::{LmBackend, NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use anyhow::{ensure, Result};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use stereo_core::{
    BrownConrady5, Camera, CorrespondenceView, FxFyCxCySkew, Iso3, Pinhole, PinholeCamera, Real,
    ReprojectionStats,
};

/// Residual assigned to each coordinate of a point that lands behind the camera.
pub(crate) const BEHIND_CAMERA_RESIDUAL: Real = 1e4;

const N_INTRINSICS: usize = 9;

/// Which intrinsic coefficients are optimised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarIntrinsicsSolveOptions {
    /// Hold `k3` at zero.
    pub fix_k3: bool,
    /// Hold `p1` and `p2` at zero.
    pub fix_tangential: bool,
    /// Keep `cx`, `cy` at their initial values.
    pub fix_principal_point: bool,
    pub solver: SolveOptions,
}

impl Default for PlanarIntrinsicsSolveOptions {
    fn default() -> Self {
        Self {
            fix_k3: false,
            fix_tangential: false,
            fix_principal_point: false,
            solver: SolveOptions::default(),
        }
    }
}

impl PlanarIntrinsicsSolveOptions {
    fn free_intrinsics(&self) -> Vec<usize> {
        let mut free = vec![0, 1];
        if !self.fix_principal_point {
            free.extend([2, 3]);
        }
        free.extend([4, 5]);
        if !self.fix_tangential {
            free.extend([6, 7]);
        }
        if !self.fix_k3 {
            free.push(8);
        }
        free
    }
}

/// Initial guess: camera and per-view board poses.
#[derive(Debug, Clone)]
pub struct PlanarIntrinsicsInit {
    pub camera: PinholeCamera,
    pub poses: Vec<Iso3>,
}

/// Optimization result for planar intrinsics.
#[derive(Debug, Clone)]
pub struct PlanarIntrinsicsResult {
    pub camera: PinholeCamera,
    /// Refined `T_C_B` per view.
    pub poses: Vec<Iso3>,
    pub report: SolveReport,
    pub stats: ReprojectionStats,
    /// Smallest over largest singular value of the column-normalised Jacobian.
    pub condition: Real,
}

fn camera_to_array(camera: &PinholeCamera) -> [Real; N_INTRINSICS] {
    let k = &camera.k;
    let d = &camera.dist;
    [k.fx, k.fy, k.cx, k.cy, d.k1, d.k2, d.p1, d.p2, d.k3]
}

fn camera_from_array(v: &[Real; N_INTRINSICS], undistort_iters: u32) -> PinholeCamera {
    Camera::new(
        Pinhole,
        BrownConrady5 {
            k1: v[4],
            k2: v[5],
            k3: v[8],
            p1: v[6],
            p2: v[7],
            iters: undistort_iters,
        },
        FxFyCxCySkew {
            fx: v[0],
            fy: v[1],
            cx: v[2],
            cy: v[3],
            skew: 0.0,
        },
    )
}

/// Append `observed - projected` for every point of `view`.
pub(crate) fn push_reprojection_residuals(
    camera: &PinholeCamera,
    cam_from_board: &Iso3,
    view: &CorrespondenceView,
    out: &mut Vec<Real>,
) {
    for (pw, uv) in view.iter() {
        let p_c = cam_from_board.transform_point(pw);
        match camera.project_point(&p_c) {
            Some(proj) if p_c.z > 0.0 => {
                out.push(uv.x - proj.x);
                out.push(uv.y - proj.y);
            }
            _ => {
                out.push(BEHIND_CAMERA_RESIDUAL);
                out.push(BEHIND_CAMERA_RESIDUAL);
            }
        }
    }
}

/// Non-linear refinement problem for planar intrinsics and per-view poses.
#[derive(Debug, Clone)]
pub struct PlanarIntrinsicsProblem<'a> {
    views: &'a [CorrespondenceView],
    free: Vec<usize>,
    template: [Real; N_INTRINSICS],
    undistort_iters: u32,
}

impl<'a> PlanarIntrinsicsProblem<'a> {
    pub fn new(
        views: &'a [CorrespondenceView],
        init: &PlanarIntrinsicsInit,
        opts: &PlanarIntrinsicsSolveOptions,
    ) -> Result<Self> {
        ensure!(!views.is_empty(), "need at least one view for calibration");
        ensure!(
            views.len() == init.poses.len(),
            "pose count ({}) must match number of views ({})",
            init.poses.len(),
            views.len()
        );
        for (i, v) in views.iter().enumerate() {
            ensure!(v.len() >= 4, "view {} has too few points (need >=4)", i);
        }

        let mut template = camera_to_array(&init.camera);
        if opts.fix_tangential {
            template[6] = 0.0;
            template[7] = 0.0;
        }
        if opts.fix_k3 {
            template[8] = 0.0;
        }

        Ok(Self {
            views,
            free: opts.free_intrinsics(),
            template,
            undistort_iters: init.camera.dist.iters,
        })
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    fn pose_offset(&self, view: usize) -> usize {
        self.free.len() + POSE_DIM * view
    }

    /// Pack intrinsics and poses into a parameter vector.
    pub fn pack(&self, camera: &PinholeCamera, poses: &[Iso3]) -> DVector<Real> {
        let mut x = DVector::zeros(self.num_params());
        let all = camera_to_array(camera);
        for (slot, &idx) in self.free.iter().enumerate() {
            x[slot] = all[idx];
        }
        for (i, pose) in poses.iter().enumerate() {
            let off = self.pose_offset(i);
            pack_pose(pose, &mut x.as_mut_slice()[off..off + POSE_DIM]);
        }
        x
    }

    /// Decode a parameter vector into camera + per-view poses.
    pub fn unpack(&self, x: &DVector<Real>) -> Result<(PinholeCamera, Vec<Iso3>)> {
        ensure!(
            x.len() == self.num_params(),
            "parameter vector has length {}, expected {}",
            x.len(),
            self.num_params()
        );
        let mut all = self.template;
        for (slot, &idx) in self.free.iter().enumerate() {
            all[idx] = x[slot];
        }
        let camera = camera_from_array(&all, self.undistort_iters);

        let poses = (0..self.num_views())
            .map(|i| {
                let off = self.pose_offset(i);
                unpack_pose(&x.as_slice()[off..off + POSE_DIM])
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((camera, poses))
    }
}

impl NllsProblem for PlanarIntrinsicsProblem<'_> {
    fn num_params(&self) -> usize {
        self.free.len() + POSE_DIM * self.num_views()
    }

    fn num_residuals(&self) -> usize {
        self.views.iter().map(|v| 2 * v.len()).sum()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let Ok((camera, poses)) = self.unpack(x) else {
            return DVector::from_element(self.num_residuals(), Real::NAN);
        };
        let mut r = Vec::with_capacity(self.num_residuals());
        for (view, pose) in self.views.iter().zip(&poses) {
            push_reprojection_residuals(&camera, pose, view, &mut r);
        }
        DVector::from_vec(r)
    }
}

/// Refine camera intrinsics, distortion and per-view poses with LM.
pub fn optimize_planar_intrinsics(
    views: &[CorrespondenceView],
    init: &PlanarIntrinsicsInit,
    opts: &PlanarIntrinsicsSolveOptions,
) -> Result<PlanarIntrinsicsResult> {
    let problem = PlanarIntrinsicsProblem::new(views, init, opts)?;
    let x0 = problem.pack(&init.camera, &init.poses);

    let (x_opt, report) = LmBackend.solve(&problem, x0, &opts.solver);
    debug!(
        "planar intrinsics LM: {} evaluations, cost {:.6e}, {}",
        report.iterations, report.final_cost, report.termination
    );
    ensure!(
        x_opt.iter().all(|v| v.is_finite()),
        "solver produced non-finite parameters"
    );

    let residuals = problem.residuals(&x_opt);
    let stats = ReprojectionStats::from_residual_pairs(residuals.as_slice());
    let condition = normalized_condition(&problem.jacobian(&x_opt));
    let (camera, poses) = problem.unpack(&x_opt)?;

    Ok(PlanarIntrinsicsResult {
        camera,
        poses,
        report,
        stats,
        condition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_core::synthetic::planar;

    fn make_camera(k: FxFyCxCySkew<Real>, dist: BrownConrady5<Real>) -> PinholeCamera {
        Camera::new(Pinhole, dist, k)
    }

    fn gt_camera() -> PinholeCamera {
        make_camera(
            FxFyCxCySkew {
                fx: 800.0,
                fy: 790.0,
                cx: 640.0,
                cy: 360.0,
                skew: 0.0,
            },
            BrownConrady5::from_opencv([-0.12, 0.03, 0.001, -0.0005, 0.0]),
        )
    }

    #[test]
    fn pack_unpack_respects_fixed_coefficients() {
        let views = vec![CorrespondenceView::new(
            planar::grid_points(3, 2, 0.1),
            vec![stereo_core::Pt2::origin(); 6],
        )
        .unwrap()];
        let init = PlanarIntrinsicsInit {
            camera: gt_camera(),
            poses: vec![Iso3::identity()],
        };
        let opts = PlanarIntrinsicsSolveOptions {
            fix_k3: true,
            fix_tangential: true,
            ..Default::default()
        };
        let problem = PlanarIntrinsicsProblem::new(&views, &init, &opts).unwrap();
        assert_eq!(problem.num_params(), 6 + POSE_DIM);

        let x = problem.pack(&init.camera, &init.poses);
        let (camera, _) = problem.unpack(&x).unwrap();
        assert_eq!(camera.dist.p1, 0.0);
        assert_eq!(camera.dist.k3, 0.0);
        assert_eq!(camera.dist.k1, init.camera.dist.k1);
    }

    #[test]
    fn fixed_principal_point_is_not_a_parameter() {
        let views = vec![CorrespondenceView::new(
            planar::grid_points(3, 2, 0.1),
            vec![stereo_core::Pt2::origin(); 6],
        )
        .unwrap()];
        let init = PlanarIntrinsicsInit {
            camera: gt_camera(),
            poses: vec![Iso3::identity()],
        };
        let opts = PlanarIntrinsicsSolveOptions {
            fix_principal_point: true,
            ..Default::default()
        };
        let problem = PlanarIntrinsicsProblem::new(&views, &init, &opts).unwrap();
        assert_eq!(problem.num_params(), 7 + POSE_DIM);

        let mut x = problem.pack(&init.camera, &init.poses);
        x[1] += 5.0;
        let (camera, _) = problem.unpack(&x).unwrap();
        assert_eq!(camera.k.cx, 640.0);
        assert_eq!(camera.k.cy, 360.0);
        assert_eq!(camera.k.fy, init.camera.k.fy + 5.0);
    }

    #[test]
    fn synthetic_planar_intrinsics_refinement_converges() {
        let cam_gt = gt_camera();
        let board = planar::grid_points(8, 6, 0.03);
        let poses_gt = planar::poses_tilted_ring(6, 0.7, 0.3);
        let views = planar::project_views_all(&cam_gt, &board, &poses_gt).unwrap();

        // perturbed start
        let cam_init = make_camera(
            FxFyCxCySkew {
                fx: 770.0,
                fy: 815.0,
                cx: 630.0,
                cy: 370.0,
                skew: 0.0,
            },
            BrownConrady5::from_opencv([0.0; 5]),
        );
        let poses_init: Vec<Iso3> = poses_gt
            .iter()
            .map(|p| {
                let mut q = *p;
                q.translation.vector.z *= 1.03;
                q
            })
            .collect();

        let result = optimize_planar_intrinsics(
            &views,
            &PlanarIntrinsicsInit {
                camera: cam_init,
                poses: poses_init,
            },
            &PlanarIntrinsicsSolveOptions::default(),
        )
        .unwrap();

        let k = result.camera.k;
        assert!((k.fx - 800.0).abs() < 1e-2, "fx {}", k.fx);
        assert!((k.fy - 790.0).abs() < 1e-2, "fy {}", k.fy);
        assert!((k.cx - 640.0).abs() < 1e-2, "cx {}", k.cx);
        assert!((k.cy - 360.0).abs() < 1e-2, "cy {}", k.cy);
        assert!((result.camera.dist.k1 + 0.12).abs() < 1e-3);
        assert!(result.stats.rms < 1e-5, "rms {}", result.stats.rms);
        assert!(result.condition > 1e-8, "condition {}", result.condition);
    }
}
