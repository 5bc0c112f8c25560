//! Simulation statistics collection and reporting.
//!
//! This module tracks the metrics the simulator exposes. It provides:
//! 1. **Summary:** Cycles, retired accesses, and host-time throughput.
//! 2. **Memory:** Per-tier demand counts and row-buffer behavior.
//! 3. **Swapping:** Migration counts, traffic bytes, queue congestion.
//! 4. **Policy:** Per-policy diagnostic counters (epochs, eviction and
//!    free-space outcomes).
//!
//! Output goes to stdout (or any writer) as sectioned text tables, and to a
//! JSON sink via [`SimStats::to_json`].

use std::io::Write;
use std::time::Instant;

use crate::mem::controller::ControllerStats;
use crate::policy::PolicyStats;

/// Section names for selective stats output.
///
/// Valid section identifiers: `"summary"`, `"memory"`, `"swapping"`,
/// `"policy"`. Pass an empty slice to `print_sections` to print all.
pub const STATS_SECTIONS: &[&str] = &["summary", "memory", "swapping", "policy"];

/// Aggregated simulation statistics.
#[derive(Clone, Debug)]
pub struct SimStats {
    start_time: Instant,
    /// Total simulator cycles elapsed.
    pub cycles: u64,
    /// Demand accesses retired (reads and writes).
    pub accesses: u64,
    /// Demand reads retired.
    pub reads: u64,
    /// Demand writes retired.
    pub writes: u64,
    /// Accesses fast-forwarded during warmup.
    pub warmup_accesses: u64,

    /// Demand reads sent to the fast tier.
    pub read_fast: u64,
    /// Demand reads sent to the slow tier.
    pub read_slow: u64,
    /// Demand writes sent to the fast tier.
    pub write_fast: u64,
    /// Demand writes sent to the slow tier.
    pub write_slow: u64,
    /// Co-located metadata lookups sent to the fast tier.
    pub metadata_reads: u64,
    /// Fast-tier row-buffer hits.
    pub fast_row_hits: u64,
    /// Fast-tier row-buffer misses.
    pub fast_row_misses: u64,
    /// Slow-tier row-buffer hits.
    pub slow_row_hits: u64,
    /// Slow-tier row-buffer misses.
    pub slow_row_misses: u64,

    /// Lines moved by the swapping unit (both directions).
    pub swap_count: u64,
    /// Bytes of migration traffic.
    pub swap_traffic_bytes: u64,

    /// Placement-policy diagnostic counters.
    pub policy: PolicyStats,
}

impl Default for SimStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            accesses: 0,
            reads: 0,
            writes: 0,
            warmup_accesses: 0,
            read_fast: 0,
            read_slow: 0,
            write_fast: 0,
            write_slow: 0,
            metadata_reads: 0,
            fast_row_hits: 0,
            fast_row_misses: 0,
            slow_row_hits: 0,
            slow_row_misses: 0,
            swap_count: 0,
            swap_traffic_bytes: 0,
            policy: PolicyStats::default(),
        }
    }
}

impl SimStats {
    /// Folds the controller's counters into this aggregate.
    pub fn absorb_controller(
        &mut self,
        stats: ControllerStats,
        swap: (u64, u64),
        rows: ((u64, u64), (u64, u64)),
        policy: PolicyStats,
    ) {
        self.read_fast = stats.read_fast;
        self.read_slow = stats.read_slow;
        self.write_fast = stats.write_fast;
        self.write_slow = stats.write_slow;
        self.metadata_reads = stats.metadata_reads;
        self.swap_count = swap.0;
        self.swap_traffic_bytes = swap.1;
        ((self.fast_row_hits, self.fast_row_misses), (self.slow_row_hits, self.slow_row_misses)) =
            rows;
        self.policy = policy;
    }

    /// Writes only the requested statistics sections.
    ///
    /// Each element of `sections` should be one of `"summary"`, `"memory"`,
    /// `"swapping"`, or `"policy"`. Pass an empty slice for all sections.
    pub fn write_sections<W: Write>(&self, out: &mut W, sections: &[String]) -> std::io::Result<()> {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let seconds = self.start_time.elapsed().as_secs_f64();
        let cyc = if self.cycles == 0 { 1 } else { self.cycles };

        if want("summary") {
            let apc = self.accesses as f64 / cyc as f64;
            let khz = (self.cycles as f64 / seconds) / 1000.0;
            writeln!(out, "\n==========================================================")?;
            writeln!(out, "HYBRID MEMORY SIMULATION STATISTICS")?;
            writeln!(out, "==========================================================")?;
            writeln!(out, "host_seconds             {seconds:.4} s")?;
            writeln!(out, "sim_cycles               {}", self.cycles)?;
            writeln!(out, "sim_freq                 {khz:.2} kHz")?;
            writeln!(out, "sim_accesses             {}", self.accesses)?;
            writeln!(out, "sim_reads                {}", self.reads)?;
            writeln!(out, "sim_writes               {}", self.writes)?;
            writeln!(out, "sim_accesses_per_cycle   {apc:.4}")?;
            writeln!(out, "warmup_accesses          {}", self.warmup_accesses)?;
            writeln!(out, "----------------------------------------------------------")?;
        }
        if want("memory") {
            let tier = |out: &mut W, name: &str, reads, writes, hits: u64, misses: u64| {
                let total = hits + misses;
                let hit_rate = if total > 0 {
                    (hits as f64 / total as f64) * 100.0
                } else {
                    0.0
                };
                writeln!(
                    out,
                    "  {name:<5} reads: {reads:<10} | writes: {writes:<10} | row_hit: {hit_rate:.2}%"
                )
            };
            writeln!(out, "MEMORY TIERS")?;
            tier(
                out,
                "fast",
                self.read_fast,
                self.write_fast,
                self.fast_row_hits,
                self.fast_row_misses,
            )?;
            tier(
                out,
                "slow",
                self.read_slow,
                self.write_slow,
                self.slow_row_hits,
                self.slow_row_misses,
            )?;
            writeln!(out, "  metadata_reads         {}", self.metadata_reads)?;
            writeln!(out, "----------------------------------------------------------")?;
        }
        if want("swapping") {
            writeln!(out, "SWAPPING UNIT")?;
            writeln!(out, "  swap.lines             {}", self.swap_count)?;
            writeln!(out, "  swap.traffic_bytes     {}", self.swap_traffic_bytes)?;
            writeln!(
                out,
                "  swap.queue_congestion  {}",
                self.policy.queue_congestion
            )?;
            writeln!(out, "----------------------------------------------------------")?;
        }
        if want("policy") {
            writeln!(out, "PLACEMENT POLICY")?;
            writeln!(out, "  epochs                 {}", self.policy.epochs)?;
            writeln!(
                out,
                "  unexpandable.no_group  {}",
                self.policy.unexpandable_no_invalid_group
            )?;
            writeln!(
                out,
                "  unexpandable.start     {}",
                self.policy.unexpandable_start_address
            )?;
            writeln!(
                out,
                "  migrate.no_free_space  {}",
                self.policy.no_free_space_for_migration
            )?;
            writeln!(
                out,
                "  migrate.no_group_slot  {}",
                self.policy.no_invalid_group_for_migration
            )?;
            writeln!(out, "  evict.success          {}", self.policy.eviction_success)?;
            writeln!(out, "  evict.failure          {}", self.policy.eviction_failure)?;
        }
        writeln!(out, "==========================================================")?;
        Ok(())
    }

    /// Prints all statistics sections to stdout.
    pub fn print(&self) {
        let mut stdout = std::io::stdout();
        let _ = self.write_sections(&mut stdout, &[]);
    }

    /// Renders the statistics as a JSON value for the `--json` sink.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "summary": {
                "cycles": self.cycles,
                "accesses": self.accesses,
                "reads": self.reads,
                "writes": self.writes,
                "warmup_accesses": self.warmup_accesses,
            },
            "memory": {
                "fast": {
                    "reads": self.read_fast,
                    "writes": self.write_fast,
                    "row_hits": self.fast_row_hits,
                    "row_misses": self.fast_row_misses,
                },
                "slow": {
                    "reads": self.read_slow,
                    "writes": self.write_slow,
                    "row_hits": self.slow_row_hits,
                    "row_misses": self.slow_row_misses,
                },
                "metadata_reads": self.metadata_reads,
            },
            "swapping": {
                "lines": self.swap_count,
                "traffic_bytes": self.swap_traffic_bytes,
                "queue_congestion": self.policy.queue_congestion,
            },
            "policy": {
                "epochs": self.policy.epochs,
                "unexpandable_no_invalid_group": self.policy.unexpandable_no_invalid_group,
                "unexpandable_start_address": self.policy.unexpandable_start_address,
                "no_free_space_for_migration": self.policy.no_free_space_for_migration,
                "no_invalid_group_for_migration": self.policy.no_invalid_group_for_migration,
                "eviction_success": self.policy.eviction_success,
                "eviction_failure": self.policy.eviction_failure,
            },
        })
    }
}
