//! The memory side of the simulator: tier back-ends, the swapping unit,
//! and the hybrid controller that glues them to the placement policies.
//!
//! 1. **Back-ends:** a `MemoryBackend` trait and the banked DRAM timing
//!    model, one instance per tier.
//! 2. **Swapping unit:** executes queued migrations as buffered line-pair
//!    exchanges, atomically with respect to demand traffic.
//! 3. **Controller:** address translation, activity tracking, routing, tier
//!    clocks, and statistics.

/// Tier back-end trait and DRAM model.
pub mod backend;

/// Hybrid memory controller.
pub mod controller;

/// Swapping unit.
pub mod swap;

pub use backend::{DramModel, MemoryBackend};
pub use controller::{AddResult, HybridController};
pub use swap::{SwapCheck, SwapStatus, SwapUnit};
