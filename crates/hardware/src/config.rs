//! Configuration system for the hybrid-memory simulator.
//!
//! This module defines all configuration structures and enums used to
//! parameterize the simulator. It provides:
//! 1. **Defaults:** Baseline hardware constants (tier geometry, DRAM timing,
//!    queue lengths, policy knobs).
//! 2. **Structures:** Hierarchical config for the two memory tiers, the
//!    placement policy, and the simulation driver.
//! 3. **Validation:** Power-of-two capacity checks and the congruence-group
//!    bound required by the set-indexed policies.
//!
//! Configuration is supplied via JSON tier files on the command line, or use
//! `Config::default()` for tests.

use serde::Deserialize;

use crate::common::SimError;

/// Default configuration constants for the simulator.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden in JSON configuration files.
mod defaults {
    /// Fast-tier (HBM-class) capacity in bytes (256 MiB).
    pub const FAST_CAPACITY: u64 = 256 * 1024 * 1024;

    /// Slow-tier (DDR-class) capacity in bytes (768 MiB).
    pub const SLOW_CAPACITY: u64 = 768 * 1024 * 1024;

    /// Fast-tier I/O frequency in MHz (HBM-class).
    pub const FAST_IO_FREQ_MHZ: f64 = 3200.0;

    /// Slow-tier I/O frequency in MHz (DDR-class).
    pub const SLOW_IO_FREQ_MHZ: f64 = 1600.0;

    /// Per-tier read queue length.
    pub const READ_QUEUE_LEN: usize = 64;

    /// Per-tier write queue length.
    pub const WRITE_QUEUE_LEN: usize = 64;

    /// Number of banks modeled per tier.
    pub const BANKS: usize = 16;

    /// Row-buffer width in bytes.
    pub const ROW_BYTES: u64 = 2048;

    /// Column access latency in memory cycles.
    pub const T_CAS: u64 = 14;

    /// Row activation latency in memory cycles.
    pub const T_RAS: u64 = 14;

    /// Precharge latency in memory cycles.
    pub const T_PRE: u64 = 14;

    /// Hotness threshold: accesses before a block is marked hot.
    pub const HOTNESS_THRESHOLD: u8 = 1;

    /// MemPod epoch length in microseconds of simulated time.
    pub const EPOCH_US: u64 = 50;

    /// Number of entries in MemPod's MEA counter set.
    pub const MEA_ENTRIES: usize = 16;

    /// Saturation value of one MEA counter.
    pub const MEA_MAX: u8 = 4;

    /// Variable-granularity decay interval in controller ticks.
    pub const DECAY_INTERVAL: u64 = 1_000_000;

    /// Remapping-queue length for the line-location policies.
    pub const REMAP_QUEUE_LEN: usize = 64;

    /// Remapping-queue length for MemPod (epochs enqueue in bulk).
    pub const MEMPOD_REMAP_QUEUE_LEN: usize = 4096;

    /// Maximum outstanding reads per trace CPU.
    pub const MAX_OUTSTANDING: usize = 16;
}

/// Placement-policy variants.
///
/// Exactly one is active per simulation; blends are not expressible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Line-granularity congruence-group remapping.
    #[default]
    Cameo,
    /// Epoch-based 2 KiB page swaps driven by an MEA counter set.
    Mempod,
    /// Power-of-two region migration with per-set placement tables.
    VariableGranularity,
}

/// Configuration of one memory tier's DRAM model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierConfig {
    /// Tier capacity in bytes; must be a power of two.
    pub capacity_bytes: u64,
    /// Tier I/O frequency in MHz; sets the controller clock scale.
    pub io_freq_mhz: f64,
    /// Read queue length.
    pub read_queue_len: usize,
    /// Write queue length.
    pub write_queue_len: usize,
    /// Number of banks.
    pub banks: usize,
    /// Row-buffer width in bytes.
    pub row_bytes: u64,
    /// Column access latency in memory cycles.
    pub t_cas: u64,
    /// Row activation latency in memory cycles.
    pub t_ras: u64,
    /// Precharge latency in memory cycles.
    pub t_pre: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: defaults::FAST_CAPACITY,
            io_freq_mhz: defaults::FAST_IO_FREQ_MHZ,
            read_queue_len: defaults::READ_QUEUE_LEN,
            write_queue_len: defaults::WRITE_QUEUE_LEN,
            banks: defaults::BANKS,
            row_bytes: defaults::ROW_BYTES,
            t_cas: defaults::T_CAS,
            t_ras: defaults::T_RAS,
            t_pre: defaults::T_PRE,
        }
    }
}

impl TierConfig {
    /// A slow-tier default (larger, lower I/O frequency).
    pub fn slow_default() -> Self {
        Self {
            capacity_bytes: defaults::SLOW_CAPACITY,
            io_freq_mhz: defaults::SLOW_IO_FREQ_MHZ,
            ..Self::default()
        }
    }
}

/// Configuration of the active placement policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Which policy runs.
    pub kind: PolicyKind,
    /// Accesses before a block is considered hot (CAMEO, VG).
    pub hotness_threshold: u8,
    /// Remapping-queue length; `None` selects the policy default
    /// (64 for CAMEO/VG, 4096 for MemPod).
    pub queue_len: Option<usize>,
    /// MemPod epoch length in microseconds of simulated time.
    pub epoch_us: u64,
    /// MEA counter-set size (MemPod).
    pub mea_entries: usize,
    /// MEA counter saturation value (MemPod).
    pub mea_max: u8,
    /// Clear the MEA set at every epoch boundary (MemPod).
    pub mea_reset_each_epoch: bool,
    /// Hotness-decay interval in controller ticks (VG).
    pub decay_interval: u64,
    /// Keep the line-location metadata co-located in fast memory; the
    /// controller then issues a metadata read before slow-tier accesses
    /// (CAMEO).
    pub colocated_metadata: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::default(),
            hotness_threshold: defaults::HOTNESS_THRESHOLD,
            queue_len: None,
            epoch_us: defaults::EPOCH_US,
            mea_entries: defaults::MEA_ENTRIES,
            mea_max: defaults::MEA_MAX,
            mea_reset_each_epoch: false,
            decay_interval: defaults::DECAY_INTERVAL,
            colocated_metadata: false,
        }
    }
}

impl PolicyConfig {
    /// Effective remapping-queue length for the selected policy.
    pub fn effective_queue_len(&self) -> usize {
        self.queue_len.unwrap_or(match self.kind {
            PolicyKind::Mempod => defaults::MEMPOD_REMAP_QUEUE_LEN,
            PolicyKind::Cameo | PolicyKind::VariableGranularity => defaults::REMAP_QUEUE_LEN,
        })
    }
}

/// Driver-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Simulated CPU frequency in MHz.
    pub cpu_freq_mhz: f64,
    /// Maximum outstanding reads per trace CPU.
    pub max_outstanding: usize,
    /// Cycles without progress before the driver aborts.
    pub deadlock_threshold: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cpu_freq_mhz: crate::common::constants::CPU_FREQUENCY_MHZ,
            max_outstanding: defaults::MAX_OUTSTANDING,
            deadlock_threshold: crate::common::constants::DEADLOCK_CYCLE_THRESHOLD,
        }
    }
}

/// One tier configuration file: the tier itself plus optional policy and
/// driver sections. Sections from the first (fast-tier) file win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierFile {
    /// The tier's DRAM model parameters.
    pub tier: TierConfig,
    /// Placement-policy section (fast-tier file only).
    pub policy: Option<PolicyConfig>,
    /// Driver section (fast-tier file only).
    pub sim: Option<SimConfig>,
}

/// Root configuration type; use `Config::default()` or assemble from two
/// JSON tier files with [`Config::from_tier_files`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Fast-tier (HBM-class) memory.
    pub fast: TierConfig,
    /// Slow-tier (DDR-class) memory.
    pub slow: TierConfig,
    /// Placement policy selection and knobs.
    pub policy: PolicyConfig,
    /// Driver knobs.
    pub sim: SimConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fast: TierConfig::default(),
            slow: TierConfig::slow_default(),
            policy: PolicyConfig::default(),
            sim: SimConfig::default(),
        }
    }
}

impl Config {
    /// Assembles a configuration from two parsed tier files.
    ///
    /// The fast-tier file may carry `policy` and `sim` sections; the same
    /// sections in the slow-tier file are rejected to avoid silent
    /// precedence surprises.
    pub fn from_tier_files(fast: TierFile, slow: TierFile) -> Result<Self, SimError> {
        if slow.policy.is_some() || slow.sim.is_some() {
            return Err(SimError::InvalidConfig(
                "policy/sim sections belong in the fast-tier config file".into(),
            ));
        }
        let config = Self {
            fast: fast.tier,
            slow: slow.tier,
            policy: fast.policy.unwrap_or_default(),
            sim: fast.sim.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Total capacity of both tiers in bytes.
    pub fn total_capacity(&self) -> u64 {
        self.fast.capacity_bytes + self.slow.capacity_bytes
    }

    /// Checks the structural constraints the placement policies rely on.
    pub fn validate(&self) -> Result<(), SimError> {
        if !self.fast.capacity_bytes.is_power_of_two() {
            return Err(SimError::InvalidConfig(format!(
                "fast-tier capacity {:#x} is not a power of two",
                self.fast.capacity_bytes
            )));
        }
        if self.slow.capacity_bytes % self.fast.capacity_bytes != 0 {
            return Err(SimError::InvalidConfig(format!(
                "slow-tier capacity {:#x} is not a multiple of the fast tier's {:#x}",
                self.slow.capacity_bytes, self.fast.capacity_bytes
            )));
        }
        // Set-indexed policies encode the congruence-group member index in a
        // 3-bit field; five members at most.
        let group = self.total_capacity() / self.fast.capacity_bytes;
        if matches!(
            self.policy.kind,
            PolicyKind::Cameo | PolicyKind::VariableGranularity
        ) && group > 5
        {
            return Err(SimError::InvalidConfig(format!(
                "congruence group of {group} members exceeds the supported 5"
            )));
        }
        if self.policy.hotness_threshold == 0 {
            return Err(SimError::InvalidConfig(
                "hotness threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_group_bound_enforced() {
        let mut config = Config::default();
        config.slow.capacity_bytes = config.fast.capacity_bytes * 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_section_rejected_in_slow_file() {
        let fast = TierFile::default();
        let slow = TierFile {
            policy: Some(PolicyConfig::default()),
            ..TierFile::default()
        };
        assert!(Config::from_tier_files(fast, slow).is_err());
    }

    #[test]
    fn test_effective_queue_len_per_policy() {
        let mut policy = PolicyConfig::default();
        assert_eq!(policy.effective_queue_len(), 64);
        policy.kind = PolicyKind::Mempod;
        assert_eq!(policy.effective_queue_len(), 4096);
        policy.queue_len = Some(128);
        assert_eq!(policy.effective_queue_len(), 128);
    }
}
