//! Simulator error types.
//!
//! Two classes of failure exist in the memory model. Resource exhaustion
//! (full queues, no fast-tier space) is not an error: callers observe it
//! through return values and retry, and statistics surface the degradation.
//! The variants here are the loud failures: programmer errors and broken
//! internal invariants, which the driver reports and then aborts on.

use thiserror::Error;

/// Errors surfaced by the simulator core.
#[derive(Debug, Error)]
pub enum SimError {
    /// A physical address beyond the configured total capacity reached the
    /// translator or a policy. Always a programming error upstream.
    #[error("physical address {addr:#x} out of range (total capacity {limit:#x})")]
    AddressOutOfRange {
        /// The faulting physical address.
        addr: u64,
        /// The configured total capacity in bytes.
        limit: u64,
    },

    /// A placement policy detected a broken internal invariant. The message
    /// carries the diagnostic dump.
    #[error("placement policy invariant violated: {0}")]
    PolicyInvariant(String),

    /// The configuration is unusable (non-power-of-two capacity, congruence
    /// group too large, malformed tier file).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A trace line could not be parsed.
    #[error("trace parse error at line {line}: {reason}")]
    TraceParse {
        /// 1-based line number in the trace file.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// No operable made forward progress for the deadlock threshold.
    #[error("deadlock: no forward progress for {cycles} cycles")]
    Deadlock {
        /// Number of cycles without progress.
        cycles: u64,
    },

    /// Underlying I/O failure (trace files, config files, stats sinks).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file deserialization failure.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
