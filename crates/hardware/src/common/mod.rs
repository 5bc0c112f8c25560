//! Common utilities and types used throughout the hybrid-memory simulator.
//!
//! This module provides fundamental building blocks that are shared across
//! all components. It includes:
//! 1. **Address types:** Strong types for physical and hardware addresses.
//! 2. **Bit helpers:** Field extraction/splicing for packed location tables.
//! 3. **Constants:** Line/page geometry, swap-buffer dimensions, thresholds.
//! 4. **Data:** Demand packets, access kinds, and 64-byte line payloads.
//! 5. **Errors:** The loud-failure error enum.

/// Address type definitions (physical and hardware addresses).
pub mod addr;

/// Bit-field manipulation helpers for packed tables.
pub mod bits;

/// Common constants used throughout the simulator.
pub mod constants;

/// Demand packets, access kinds, and line payloads.
pub mod data;

/// Error types.
pub mod error;

pub use addr::{HwAddr, PhysAddr};
pub use data::{AccessKind, Line, Packet};
pub use error::SimError;
