//! SE(3) parameter blocks as `[wx, wy, wz, tx, ty, tz]`.
//!
//! The rotation is stored as a scaled axis (axis * angle), which keeps the
//! block minimal and free of normalisation constraints.

use anyhow::{ensure, Result};
use nalgebra::{Translation3, UnitQuaternion, Vector3};
use stereo_core::{Iso3, Real};

/// Number of scalars in one pose block.
pub const POSE_DIM: usize = 6;

/// Write `pose` into `out[..6]`.
pub fn pack_pose(pose: &Iso3, out: &mut [Real]) {
    let w = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    out[..POSE_DIM].copy_from_slice(&[w.x, w.y, w.z, t.x, t.y, t.z]);
}

/// Read a pose from `v[..6]`.
pub fn unpack_pose(v: &[Real]) -> Result<Iso3> {
    ensure!(
        v.len() >= POSE_DIM,
        "expected pose block of length {}, got {}",
        POSE_DIM,
        v.len()
    );
    let rot = UnitQuaternion::from_scaled_axis(Vector3::new(v[0], v[1], v[2]));
    Ok(Iso3::from_parts(Translation3::new(v[3], v[4], v[5]), rot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_block_round_trip() {
        let pose = Iso3::from_parts(
            Translation3::new(0.1, -0.2, 1.5),
            UnitQuaternion::from_euler_angles(0.3, -0.1, 2.0),
        );
        let mut buf = [0.0; POSE_DIM];
        pack_pose(&pose, &mut buf);
        let back = unpack_pose(&buf).unwrap();
        assert!((back.translation.vector - pose.translation.vector).norm() < 1e-12);
        assert!(back.rotation.angle_to(&pose.rotation) < 1e-12);
        assert!(unpack_pose(&buf[..3]).is_err());
    }
}
