//! Deterministic synthetic data generation helpers.
//!
//! Small building blocks for constructing synthetic calibration problems used
//! in tests:
//! - planar target point grids,
//! - board pose generators,
//! - projection helpers producing [`crate::CorrespondenceView`].
//!
//! # Example
//!
//! ```
//! use stereo_core::{synthetic::planar, BrownConrady5, Camera, FxFyCxCySkew, Pinhole};
//!
//! let k = FxFyCxCySkew { fx: 800.0, fy: 800.0, cx: 640.0, cy: 360.0, skew: 0.0 };
//! let cam = Camera::new(Pinhole, BrownConrady5::default(), k);
//!
//! let board = planar::grid_points(6, 5, 0.04);
//! let poses = planar::poses_tilted_ring(6, 0.6, 0.25);
//! let views = planar::project_views_all(&cam, &board, &poses).unwrap();
//! assert_eq!(views.len(), 6);
//! ```

pub mod planar;
