pub mod planar_intrinsics;
pub mod stereo_extrinsics;
