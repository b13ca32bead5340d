//! Closed-form solvers for stereo calibration and triangulation.
//!
//! Everything here is linear algebra without iteration: the results either
//! seed the non-linear refinement in `stereo-optim` or, for triangulation,
//! are the final answer.

mod extrinsics;
mod homography;
pub mod math;
mod planar_pose;
mod triangulation;
mod zhang_intrinsics;

pub use extrinsics::*;
pub use homography::*;
pub use planar_pose::*;
pub use triangulation::*;
pub use zhang_intrinsics::*;
