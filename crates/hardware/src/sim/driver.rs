//! Simulation driver: trace CPUs, the tick loop, and deadlock detection.
//!
//! Scheduling is single-threaded and cooperative: every cycle, each trace
//! CPU is stepped once in a fixed order, then the memory controller. Each
//! step runs to a natural quiescence (one access offered, one controller
//! tick), so ordering is deterministic across runs.
//!
//! A trace CPU replays one access per step, retrying when the controller
//! reports backpressure and holding a bounded window of outstanding reads.
//! If nothing in the system makes forward progress for the configured
//! number of cycles, every component dumps its state and the run aborts
//! with a deadlock error.

use std::collections::HashSet;

use tracing::{error, info};

use crate::common::constants::HEARTBEAT_INTERVAL;
use crate::common::{AccessKind, Packet, PhysAddr, SimError};
use crate::config::Config;
use crate::mem::controller::{AddResult, HybridController, MemoryTrace};
use crate::sim::trace::TraceReader;
use crate::stats::SimStats;

/// Run-control options resolved from the command line.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Accesses fast-forwarded before measurement starts.
    pub warmup_accesses: u64,
    /// Stop after this many measured accesses; `None` runs to trace end.
    pub simulation_accesses: Option<u64>,
    /// Suppress periodic progress lines.
    pub hide_heartbeat: bool,
}

/// One trace-replaying CPU.
struct TraceCpu {
    cpu: usize,
    reader: TraceReader,
    exhausted: bool,
    pending: Option<Packet>,
    outstanding: HashSet<u64>,
    max_outstanding: usize,
    next_id: u64,
    /// Accesses retired (writes on acceptance, reads on completion).
    retired: u64,
    reads_retired: u64,
    writes_retired: u64,
}

impl TraceCpu {
    fn new(cpu: usize, reader: TraceReader, max_outstanding: usize) -> Self {
        Self {
            cpu,
            reader,
            exhausted: false,
            pending: None,
            outstanding: HashSet::new(),
            max_outstanding,
            next_id: 0,
            retired: 0,
            reads_retired: 0,
            writes_retired: 0,
        }
    }

    fn done(&self) -> bool {
        self.exhausted && self.pending.is_none() && self.outstanding.is_empty()
    }

    /// Offers at most one access to the controller. Returns true when the
    /// CPU made forward progress this cycle.
    fn step(&mut self, controller: &mut HybridController) -> Result<bool, SimError> {
        if self.pending.is_none() {
            if self.exhausted || self.outstanding.len() >= self.max_outstanding {
                return Ok(false);
            }
            match self.reader.next_record()? {
                Some(record) => {
                    // the id packs the cpu index so completions route back
                    let id = (self.cpu as u64) << 48 | self.next_id;
                    self.next_id += 1;
                    let mut packet = Packet::new(PhysAddr(record.addr), record.kind, self.cpu, id);
                    if record.kind == AccessKind::Write {
                        packet.data = id;
                    }
                    self.pending = Some(packet);
                }
                None => {
                    self.exhausted = true;
                    return Ok(false);
                }
            }
        }

        let Some(packet) = self.pending.take() else {
            return Ok(false);
        };
        let result = match packet.kind {
            AccessKind::Read => controller.add_read(packet)?,
            AccessKind::Write => controller.add_write(packet)?,
        };
        match result {
            AddResult::Accepted(_) | AddResult::Forwarded => {
                match packet.kind {
                    AccessKind::Read => {
                        // completion (possibly already queued, for forwarded
                        // reads) retires it
                        let _ = self.outstanding.insert(packet.id);
                    }
                    AccessKind::Write => {
                        self.retired += 1;
                        self.writes_retired += 1;
                    }
                }
                Ok(true)
            }
            AddResult::Full => {
                self.pending = Some(packet);
                Ok(false)
            }
        }
    }

    /// Retires a completed read.
    fn complete(&mut self, id: u64) -> bool {
        if self.outstanding.remove(&id) {
            self.retired += 1;
            self.reads_retired += 1;
            true
        } else {
            false
        }
    }
}

/// Top-level simulator: owns the trace CPUs and the memory controller.
pub struct Simulator {
    cpus: Vec<TraceCpu>,
    controller: HybridController,
    options: RunOptions,
    deadlock_threshold: u64,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("cpus", &self.cpus.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Simulator {
    /// Builds a simulator over one trace reader per CPU.
    pub fn new(
        config: &Config,
        traces: Vec<TraceReader>,
        options: RunOptions,
    ) -> Result<Self, SimError> {
        if traces.is_empty() {
            return Err(SimError::InvalidConfig("at least one trace is required".into()));
        }
        let controller = HybridController::new(config)?;
        let cpus = traces
            .into_iter()
            .enumerate()
            .map(|(cpu, reader)| TraceCpu::new(cpu, reader, config.sim.max_outstanding))
            .collect();
        Ok(Self {
            cpus,
            controller,
            options,
            deadlock_threshold: config.sim.deadlock_threshold,
        })
    }

    /// Installs a memory-trace sink on the controller.
    pub fn set_memory_trace(&mut self, trace: MemoryTrace) {
        self.controller.set_memory_trace(trace);
    }

    fn total_retired(&self) -> u64 {
        self.cpus.iter().map(|cpu| cpu.retired).sum()
    }

    /// Runs the simulation to completion and returns the statistics.
    ///
    /// A deadlock (no forward progress for the configured threshold) dumps
    /// every component's state and returns an error; the caller aborts.
    pub fn run(&mut self) -> Result<SimStats, SimError> {
        let mut stats = SimStats::default();
        let warming = self.options.warmup_accesses > 0;
        self.controller.set_warmup(warming);
        let mut warming = warming;

        let mut cycle: u64 = 0;
        let mut last_progress: u64 = 0;
        let mut next_heartbeat = HEARTBEAT_INTERVAL;

        loop {
            let mut progress = false;
            for cpu in &mut self.cpus {
                progress |= cpu.step(&mut self.controller)?;
            }
            self.controller.operate()?;
            for packet in self.controller.pop_completed() {
                if let Some(cpu) = self.cpus.get_mut(packet.cpu) {
                    progress |= cpu.complete(packet.id);
                }
            }
            cycle += 1;

            let retired = self.total_retired();
            if warming && retired >= self.options.warmup_accesses {
                info!(retired, cycle, "warmup complete");
                stats.warmup_accesses = retired;
                self.controller.set_warmup(false);
                warming = false;
            }
            if !self.options.hide_heartbeat && retired >= next_heartbeat {
                info!(retired, cycle, "heartbeat");
                next_heartbeat += HEARTBEAT_INTERVAL;
            }

            if self.cpus.iter().all(TraceCpu::done) {
                break;
            }
            if let Some(limit) = self.options.simulation_accesses {
                if retired.saturating_sub(stats.warmup_accesses) >= limit {
                    break;
                }
            }

            if progress {
                last_progress = cycle;
            } else if cycle - last_progress > self.deadlock_threshold {
                error!(cycle, "deadlock detected; dumping state");
                self.controller.dump_state();
                for cpu in &self.cpus {
                    error!(
                        cpu = cpu.cpu,
                        retired = cpu.retired,
                        outstanding = cpu.outstanding.len(),
                        pending = cpu.pending.is_some(),
                        "trace cpu: dump"
                    );
                }
                return Err(SimError::Deadlock {
                    cycles: cycle - last_progress,
                });
            }
        }

        stats.cycles = cycle;
        let retired = self.total_retired();
        stats.accesses = retired.saturating_sub(stats.warmup_accesses);
        stats.reads = self.cpus.iter().map(|cpu| cpu.reads_retired).sum();
        stats.writes = self.cpus.iter().map(|cpu| cpu.writes_retired).sum();
        stats.absorb_controller(
            self.controller.stats(),
            self.controller.swap_stats(),
            self.controller.row_stats(),
            self.controller.policy_stats(),
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyKind;
    use crate::sim::trace::TraceFormat;
    use std::io::Cursor;

    const MIB: u64 = 1024 * 1024;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.fast.capacity_bytes = 4 * MIB;
        config.slow.capacity_bytes = 12 * MIB;
        config.policy.kind = PolicyKind::Cameo;
        config.policy.hotness_threshold = 1;
        config.sim.deadlock_threshold = 100_000;
        config
    }

    fn trace(text: &str) -> TraceReader {
        TraceReader::from_reader(Box::new(Cursor::new(text.to_owned())), TraceFormat::Plain)
    }

    #[test]
    fn test_run_to_trace_end() {
        let text = "0x1000 R\n0x2000 W\n0x400000 R\n";
        let mut sim =
            Simulator::new(&test_config(), vec![trace(text)], RunOptions::default()).unwrap();
        let stats = sim.run().unwrap();
        assert_eq!(stats.accesses, 3);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.writes, 1);
        assert!(stats.cycles > 0);
    }

    #[test]
    fn test_warmup_is_excluded_from_measurement() {
        let text = "0x1000 R\n0x1040 R\n0x1080 R\n0x10C0 R\n";
        let options = RunOptions {
            warmup_accesses: 2,
            ..RunOptions::default()
        };
        let mut sim = Simulator::new(&test_config(), vec![trace(text)], options).unwrap();
        let stats = sim.run().unwrap();
        assert_eq!(stats.warmup_accesses, 2);
        assert_eq!(stats.accesses, 2);
    }

    #[test]
    fn test_simulation_limit_stops_early() {
        let mut text = String::new();
        for i in 0..100 {
            text.push_str(&format!("{:#x} R\n", 0x1000 + i * 64));
        }
        let options = RunOptions {
            simulation_accesses: Some(10),
            ..RunOptions::default()
        };
        let mut sim = Simulator::new(&test_config(), vec![trace(&text)], options).unwrap();
        let stats = sim.run().unwrap();
        assert!(stats.accesses >= 10);
        assert!(stats.accesses < 100);
    }

    #[test]
    fn test_multiple_cpus_share_the_controller() {
        let a = trace("0x1000 R\n0x400000 R\n");
        let b = trace("0x2000 W\n0x800000 R\n");
        let mut sim =
            Simulator::new(&test_config(), vec![a, b], RunOptions::default()).unwrap();
        let stats = sim.run().unwrap();
        assert_eq!(stats.accesses, 4);
    }

    #[test]
    fn test_empty_trace_list_rejected() {
        assert!(Simulator::new(&test_config(), Vec::new(), RunOptions::default()).is_err());
    }
}
