//! Non-linear least-squares refinement for stereo calibration.
//!
//! Problems implement [`NllsProblem`] over a dense parameter vector and are
//! solved with the Levenberg–Marquardt backend in [`LmBackend`]. Jacobians are
//! numeric (central differences).

mod backend_lm;
pub mod conditioning;
pub mod params;
pub mod problems;
mod traits;

pub use backend_lm::LmBackend;
pub use problems::planar_intrinsics::{
    optimize_planar_intrinsics, PlanarIntrinsicsInit, PlanarIntrinsicsProblem,
    PlanarIntrinsicsResult, PlanarIntrinsicsSolveOptions,
};
pub use problems::stereo_extrinsics::{
    optimize_stereo_extrinsics, StereoExtrinsicsInit, StereoExtrinsicsProblem,
    StereoExtrinsicsResult,
};
pub use traits::*;
