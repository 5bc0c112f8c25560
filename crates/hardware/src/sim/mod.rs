//! Simulation driving: trace readers, the cooperative tick loop, warmup,
//! heartbeat, and deadlock detection.

/// Trace CPUs, the driver loop, and run options.
pub mod driver;

/// Trace-file parsing.
pub mod trace;

pub use driver::{RunOptions, Simulator};
pub use trace::{TraceFormat, TraceReader};
