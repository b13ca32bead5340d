//! Observation and statistics types shared by the solvers.

mod observation;

pub use observation::*;
