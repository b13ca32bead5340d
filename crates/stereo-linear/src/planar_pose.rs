use anyhow::Result;
use nalgebra::{Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};
use stereo_core::{Iso3, Mat3, Real};

/// Linear pose initialisation from a homography and intrinsics.
///
/// Decomposes a plane-induced homography `H` into a rotation and translation,
/// assuming the target lies on the plane `Z = 0` in its own coordinates.
#[derive(Debug, Clone, Copy)]
pub struct PlanarPoseSolver;

/// Estimate pose of a planar board (Z=0) relative to camera, given intrinsics K
/// and homography H (plane -> image).
///
/// Returns an Iso3 that maps board coordinates into camera coordinates.
pub fn estimate_planar_pose_from_h(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3> {
    PlanarPoseSolver::from_homography(kmtx, hmtx)
}

impl PlanarPoseSolver {
    /// Decompose a homography into a pose `T_C_B` given intrinsics `K`.
    ///
    /// The sign of the scale is chosen so that the board origin lies in front
    /// of the camera.
    pub fn from_homography(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3> {
        let k_inv = kmtx
            .try_inverse()
            .ok_or_else(|| anyhow::anyhow!("camera matrix is not invertible"))?;

        let k_inv_h1 = k_inv * hmtx.column(0);
        let k_inv_h2 = k_inv * hmtx.column(1);
        let k_inv_h3 = k_inv * hmtx.column(2);

        let mean_norm = (k_inv_h1.norm() + k_inv_h2.norm()) * 0.5;
        if mean_norm <= Real::EPSILON {
            anyhow::bail!("homography columns vanish after applying K^-1");
        }
        let mut lambda = 1.0 / mean_norm;
        if lambda * k_inv_h3.z < 0.0 {
            lambda = -lambda;
        }

        let r1 = lambda * k_inv_h1;
        let r2 = lambda * k_inv_h2;
        let r3 = r1.cross(&r2);

        let mut r_mat = Matrix3::<Real>::zeros();
        r_mat.set_column(0, &r1);
        r_mat.set_column(1, &r2);
        r_mat.set_column(2, &r3);

        // closest rotation in the Frobenius sense
        let svd = r_mat.svd(true, true);
        let mut u = svd.u.ok_or_else(|| anyhow::anyhow!("svd failed"))?;
        let v_t = svd.v_t.ok_or_else(|| anyhow::anyhow!("svd failed"))?;
        if (u * v_t).determinant() < 0.0 {
            u.column_mut(2).neg_mut();
        }
        let r_orth = u * v_t;

        let t_vec: Vector3<Real> = lambda * k_inv_h3;
        if !t_vec.iter().all(|v| v.is_finite()) {
            anyhow::bail!("non-finite translation from homography");
        }

        let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
        Ok(Iso3::from_parts(Translation3::from(t_vec), rot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Isometry3;

    fn make_kmtx() -> Mat3 {
        Mat3::new(800.0, 0.0, 640.0, 0.0, 780.0, 360.0, 0.0, 0.0, 1.0)
    }

    fn homography_for(kmtx: &Mat3, iso: &Iso3) -> Mat3 {
        let r_mat = iso.rotation.to_rotation_matrix().into_inner();
        let mut hmtx = Mat3::zeros();
        hmtx.set_column(0, &(kmtx * r_mat.column(0)));
        hmtx.set_column(1, &(kmtx * r_mat.column(1)));
        hmtx.set_column(2, &(kmtx * iso.translation.vector));
        hmtx
    }

    #[test]
    fn planar_pose_from_h_recovers_pose() {
        let kmtx = make_kmtx();
        let rot = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        let iso_gt = Isometry3::from_parts(
            Translation3::new(0.1, -0.05, 1.0),
            UnitQuaternion::from_rotation_matrix(&rot),
        );

        let hmtx = homography_for(&kmtx, &iso_gt);
        let iso_est = estimate_planar_pose_from_h(&kmtx, &hmtx).unwrap();

        let dt = (iso_est.translation.vector - iso_gt.translation.vector).norm();
        let dr = iso_est.rotation.angle_to(&iso_gt.rotation);
        assert!(dt < 1e-9, "translation error {}", dt);
        assert!(dr < 1e-9, "rotation error {}", dr);
    }

    #[test]
    fn negated_homography_gives_same_pose() {
        let kmtx = make_kmtx();
        let iso_gt = Isometry3::from_parts(
            Translation3::new(-0.2, 0.1, 2.0),
            UnitQuaternion::from_euler_angles(-0.2, 0.15, 0.0),
        );
        let hmtx = -homography_for(&kmtx, &iso_gt) * 3.0;
        let iso_est = estimate_planar_pose_from_h(&kmtx, &hmtx).unwrap();
        assert!(iso_est.translation.vector.z > 0.0);
        assert!((iso_est.translation.vector - iso_gt.translation.vector).norm() < 1e-9);
    }
}
