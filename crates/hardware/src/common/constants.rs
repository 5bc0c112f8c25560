//! Global simulator constants.
//!
//! This module defines system-wide constants used across the simulator. It includes:
//! 1. **Geometry:** Cache-line and page sizes, swap-buffer dimensions.
//! 2. **Timing:** CPU frequency and the MemPod epoch length.
//! 3. **Backpressure:** The queue-busy threshold that gates migration traffic.

/// Cache line size in bytes; the smallest unit the swapping unit moves.
pub const LINE_BYTES: u64 = 64;

/// Number of address bits covered by one cache line.
pub const LINE_OFFSET_BITS: u32 = 6;

/// Page size in bytes (4 KiB); the variable-granularity management unit.
pub const PAGE_BYTES: u64 = 4096;

/// Number of address bits covered by one 4 KiB page.
pub const PAGE_OFFSET_BITS: u32 = 12;

/// Number of line-pair entries in the swapping unit's buffer.
///
/// One entry per cache line of the largest supported migration (4 KiB).
pub const SWAP_BUFFER_ENTRIES: usize = 64;

/// Number of segments per swap-buffer entry (the two sides of a swap).
pub const SWAP_SEGMENTS: usize = 2;

/// Relative occupancy of the per-tier queues above which placement policies
/// stop enqueueing new remapping requests.
pub const QUEUE_BUSY_THRESHOLD: f64 = 0.8;

/// Simulated CPU core frequency in MHz.
pub const CPU_FREQUENCY_MHZ: f64 = 4000.0;

/// Number of cycles without forward progress before the driver declares a
/// deadlock, dumps every component's state, and aborts.
pub const DEADLOCK_CYCLE_THRESHOLD: u64 = 2_000_000;

/// Number of retired accesses between heartbeat progress lines.
pub const HEARTBEAT_INTERVAL: u64 = 10_000_000;
