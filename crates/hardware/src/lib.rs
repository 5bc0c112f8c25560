//! Hybrid-memory hierarchy simulator library.
//!
//! This crate implements a cycle-level simulator of a hybrid main memory (a
//! small fast 3D-stacked tier in front of a large slow DDR-class tier) with
//! the following:
//! 1. **Placement policies:** OS-transparent migration at line (CAMEO), page
//!    (MemPod), and variable power-of-two region granularity.
//! 2. **Address translation:** every demand request is rewritten from its
//!    physical address to the tier location currently holding the line.
//! 3. **Swapping unit:** migrations execute as buffered line-pair exchanges,
//!    atomic with respect to in-flight demand traffic.
//! 4. **Memory model:** per-tier banked DRAM timing with bounded queues and
//!    fractional clock scaling against the CPU frequency.
//! 5. **Simulation:** trace-replaying CPUs, warmup, heartbeat, deadlock
//!    detection, and text/JSON statistics.

/// Common types and constants (addresses, packets, bit helpers, errors).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// Memory side: tier back-ends, swapping unit, hybrid controller.
pub mod mem;
/// Placement policies (CAMEO, MemPod, variable granularity).
pub mod policy;
/// Simulation: driver loop, trace readers, run options.
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// The hybrid memory controller; owns the tiers, the policy, and the
/// swapping unit.
pub use crate::mem::HybridController;
/// Top-level simulator; owns the trace CPUs and the controller.
pub use crate::sim::Simulator;
/// Aggregated statistics; print as text sections or export as JSON.
pub use crate::stats::SimStats;
