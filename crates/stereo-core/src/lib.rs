//! Core math and geometry primitives for two-view calibration and
//! triangulation.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Pt2`, `Pt3`, `Mat34`, ...),
//! - the camera model (pinhole projection + Brown–Conrady distortion + `K`),
//! - correspondence views and per-frame calibration samples,
//! - camera poses, projection matrices and the calibrated [`StereoRig`],
//! - deterministic synthetic data helpers.
//!
//! Camera pipeline:
//! `pixel = K ∘ distortion ∘ projection(dir)`

/// Linear algebra type aliases and helpers.
pub mod math;
/// Camera models and distortion utilities.
pub mod models;
/// Poses, projection matrices and the stereo rig.
pub mod rig;
/// Synthetic data generation for tests.
pub mod synthetic;
/// Observation types.
pub mod types;
/// Per-frame calibration samples.
pub mod view;

pub use math::*;
pub use models::*;
pub use rig::*;
pub use types::*;
pub use view::*;
