//! Parameter block packing shared by the calibration problems.

pub mod pose_se3;
