//! Central projection of camera-frame directions onto the normalized plane.

use nalgebra::{RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub trait ProjectionModel<S: RealField + Copy> {
    /// `None` for directions at or behind the image plane.
    fn project_dir(&self, dir_c: &Vector3<S>) -> Option<Vector2<S>>;
    /// Direction (not normalised) through normalized coordinates `n`.
    fn unproject_dir(&self, n: &Vector2<S>) -> Vector3<S>;
}

/// Ideal pinhole: `(x, y, z) -> (x / z, y / z)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pinhole;

impl<S: RealField + Copy> ProjectionModel<S> for Pinhole {
    fn project_dir(&self, dir_c: &Vector3<S>) -> Option<Vector2<S>> {
        (dir_c.z > S::zero()).then(|| dir_c.xy() / dir_c.z)
    }

    fn unproject_dir(&self, n: &Vector2<S>) -> Vector3<S> {
        n.push(S::one())
    }
}
