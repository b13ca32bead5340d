//! Camera model building blocks.
//!
//! A camera is composed of three stages:
//!
//! 1. `ProjectionModel`: map a 3D direction to normalized coordinates (pinhole).
//! 2. `DistortionModel`: apply radial/tangential distortion in normalized space.
//! 3. `IntrinsicsModel`: map normalized coordinates to pixels (K matrix).
//!
//! The combined mapping is:
//! `pixel = intrinsics(distortion(projection(dir)))`

mod camera;
mod distortion;
mod intrinsics;
mod projection;

pub use camera::*;
pub use distortion::*;
pub use intrinsics::*;
pub use projection::*;
