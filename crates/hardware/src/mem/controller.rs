//! Hybrid memory controller.
//!
//! The controller fronts the two memory tiers behind one flat hardware
//! address space. For every demand request it:
//! 1. Translates the physical address through the active placement policy.
//! 2. Feeds the access to the policy's activity tracking.
//! 3. Interposes the swapping unit (requests to in-flight swap windows are
//!    served from the buffer or backpressured).
//! 4. Routes to the fast tier when `HA < F`, else to the slow tier at
//!    `HA - F`, tagging the request so the response can be rebased.
//!
//! Per tick it steps the swapping unit, starts/updates/commits remapping
//! requests according to its state, runs the policy's epoch hook, and
//! advances each tier's clock through a fractional accumulator that models
//! the CPU-to-DRAM frequency ratio.

use std::io::Write;

use tracing::debug;

use crate::common::{AccessKind, Packet, SimError};
use crate::config::Config;
use crate::mem::backend::{DramModel, MemRequest, MemResponse, MemoryBackend, Requester};
use crate::mem::swap::{SwapCheck, SwapStatus, SwapUnit};
use crate::policy::{PlacementPolicy, PolicyStats, build_policy};

/// Tag of the fast tier in responses.
pub const MEMORY_ID_FAST: u8 = 0;
/// Tag of the slow tier in responses.
pub const MEMORY_ID_SLOW: u8 = 1;

/// Outcome of offering a demand request to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddResult {
    /// Accepted by a tier queue; carries the queue occupancy after insert.
    Accepted(usize),
    /// Rejected: a queue is full or the address is mid-swap without data.
    /// The upstream retries next cycle.
    Full,
    /// Completed without touching a tier (warmup fast-forward or serviced
    /// from the swap buffer). Reads appear in the completion queue.
    Forwarded,
}

/// Per-memory demand counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerStats {
    /// Demand reads sent to the fast tier.
    pub read_fast: u64,
    /// Demand reads sent to the slow tier.
    pub read_slow: u64,
    /// Demand writes sent to the fast tier.
    pub write_fast: u64,
    /// Demand writes sent to the slow tier.
    pub write_slow: u64,
    /// Metadata lookups sent to the fast tier.
    pub metadata_reads: u64,
}

/// Memory-trace sink: one `0x<hex> R|W` line per routed demand request.
pub struct MemoryTrace {
    writer: Box<dyn Write>,
    /// Emit hardware addresses instead of physical ones.
    pub hardware: bool,
}

impl std::fmt::Debug for MemoryTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTrace")
            .field("hardware", &self.hardware)
            .finish_non_exhaustive()
    }
}

impl MemoryTrace {
    /// Creates a trace sink over any writer.
    pub fn new(writer: Box<dyn Write>, hardware: bool) -> Self {
        Self { writer, hardware }
    }

    fn record(&mut self, packet: &Packet) {
        let addr = if self.hardware {
            packet.h_addr.val()
        } else {
            packet.addr.val()
        };
        let kind = match packet.kind {
            AccessKind::Read => 'R',
            AccessKind::Write => 'W',
        };
        let _ = writeln!(self.writer, "{addr:#x} {kind}");
    }
}

/// The hybrid memory controller.
pub struct HybridController {
    fast: Box<dyn MemoryBackend>,
    slow: Box<dyn MemoryBackend>,
    policy: Box<dyn PlacementPolicy>,
    swap: SwapUnit,
    fast_capacity: u64,
    total_capacity: u64,
    clock_scale_fast: f64,
    clock_scale_slow: f64,
    leap_fast: f64,
    leap_slow: f64,
    warmup: bool,
    completed: Vec<Packet>,
    stats: ControllerStats,
    trace: Option<MemoryTrace>,
}

impl HybridController {
    /// Builds the controller, its two tier models, and the configured
    /// policy.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let policy = build_policy(config)?;
        let fast = Box::new(DramModel::new(MEMORY_ID_FAST, &config.fast));
        let slow = Box::new(DramModel::new(MEMORY_ID_SLOW, &config.slow));
        Ok(Self {
            fast,
            slow,
            policy,
            swap: SwapUnit::new(),
            fast_capacity: config.fast.capacity_bytes,
            total_capacity: config.total_capacity(),
            clock_scale_fast: config.sim.cpu_freq_mhz / config.fast.io_freq_mhz,
            clock_scale_slow: config.sim.cpu_freq_mhz / config.slow.io_freq_mhz,
            leap_fast: 0.0,
            leap_slow: 0.0,
            warmup: false,
            completed: Vec::new(),
            stats: ControllerStats::default(),
            trace: None,
        })
    }

    /// Enables or disables warmup fast-forwarding.
    pub fn set_warmup(&mut self, warmup: bool) {
        self.warmup = warmup;
    }

    /// Installs a memory-trace sink.
    pub fn set_memory_trace(&mut self, trace: MemoryTrace) {
        self.trace = Some(trace);
    }

    /// Occupancy ratio of the queue a hardware address would land in.
    fn busy_degree(&self, kind: AccessKind, h_addr: u64) -> f64 {
        let backend = if h_addr < self.fast_capacity {
            &self.fast
        } else {
            &self.slow
        };
        backend.queue_occupancy(kind) as f64 / backend.queue_size(kind) as f64
    }

    /// Routes one demand request to the owning tier. Returns the occupancy
    /// of the target queue on acceptance.
    fn route_demand(&mut self, packet: Packet) -> Option<usize> {
        let h = packet.h_addr.val();
        let request = MemRequest {
            addr: h,
            kind: packet.kind,
            requester: Requester::Demand(packet),
            line: match packet.kind {
                AccessKind::Write => Some(crate::common::Line::from_word(packet.data)),
                AccessKind::Read => None,
            },
        };
        if h < self.fast_capacity {
            if !self.fast.send(request) {
                return None;
            }
            match packet.kind {
                AccessKind::Read => self.stats.read_fast += 1,
                AccessKind::Write => self.stats.write_fast += 1,
            }
            Some(self.fast.queue_occupancy(packet.kind))
        } else {
            if !self.slow.send(MemRequest {
                addr: h - self.fast_capacity,
                ..request
            }) {
                return None;
            }
            match packet.kind {
                AccessKind::Read => self.stats.read_slow += 1,
                AccessKind::Write => self.stats.write_slow += 1,
            }
            Some(self.slow.queue_occupancy(packet.kind))
        }
    }

    /// Shared entry path for reads and writes.
    fn add_request(&mut self, mut packet: Packet) -> Result<AddResult, SimError> {
        if self.warmup {
            // warmup traffic completes instantly and is invisible to the
            // policy and the statistics
            if packet.kind == AccessKind::Read {
                self.completed.push(packet);
            }
            return Ok(AddResult::Forwarded);
        }

        if packet.addr.val() >= self.total_capacity {
            return Err(SimError::AddressOutOfRange {
                addr: packet.addr.val(),
                limit: self.total_capacity,
            });
        }

        self.policy.translate_packet(&mut packet);

        let busy = self.busy_degree(packet.kind, packet.h_addr.val());
        self.policy.track(packet.addr, packet.kind, busy)?;

        match self
            .swap
            .check_request(packet.h_addr.val(), packet.kind, packet.data)
        {
            SwapCheck::MustWait => return Ok(AddResult::Full),
            SwapCheck::ServicedRead(word) => {
                packet.data = word;
                self.completed.push(packet);
                return Ok(AddResult::Forwarded);
            }
            SwapCheck::ServicedWrite => return Ok(AddResult::Forwarded),
            SwapCheck::NotInSwap => {}
        }

        // Co-located tables: a slow-tier access pays for the metadata
        // lookup in fast memory first.
        if let Some(meta) = packet.h_addr_meta {
            if packet.h_addr.val() >= self.fast_capacity {
                let accepted = self.fast.send(MemRequest {
                    addr: meta.val(),
                    kind: AccessKind::Read,
                    requester: Requester::Metadata,
                    line: None,
                });
                if !accepted {
                    return Ok(AddResult::Full);
                }
                self.stats.metadata_reads += 1;
            }
        }

        let Some(occupancy) = self.route_demand(packet) else {
            return Ok(AddResult::Full);
        };
        if let Some(trace) = self.trace.as_mut() {
            trace.record(&packet);
        }
        Ok(AddResult::Accepted(occupancy))
    }

    /// Offers a demand read.
    pub fn add_read(&mut self, packet: Packet) -> Result<AddResult, SimError> {
        debug_assert_eq!(packet.kind, AccessKind::Read);
        self.add_request(packet)
    }

    /// Offers a demand write.
    pub fn add_write(&mut self, packet: Packet) -> Result<AddResult, SimError> {
        debug_assert_eq!(packet.kind, AccessKind::Write);
        self.add_request(packet)
    }

    /// Advances the controller by one CPU cycle.
    pub fn operate(&mut self) -> Result<(), SimError> {
        self.policy.tick();

        let status = self.swap.step(self.fast.as_mut(), self.slow.as_mut());
        match status {
            SwapStatus::Idle => {
                if let Some(request) = self.policy.issue_remapping() {
                    let _ = self.swap.start_swap(
                        request.fast_ha,
                        request.slow_ha,
                        request.size_lines,
                    );
                }
            }
            SwapStatus::Busy => {
                let Some(request) = self.policy.issue_remapping() else {
                    return Err(SimError::PolicyInvariant(
                        "remapping queue empty while a swap is active".into(),
                    ));
                };
                let _ = self.swap.update_swap(
                    request.fast_ha,
                    request.slow_ha,
                    request.size_lines,
                );
            }
            SwapStatus::JustFinished => {
                let Some(request) = self.policy.issue_remapping() else {
                    return Err(SimError::PolicyInvariant(
                        "remapping queue empty while a swap is finishing".into(),
                    ));
                };
                // the head request may have been widened mid-flight; in
                // that case the swap resumes instead of committing
                let updated = self.swap.update_swap(
                    request.fast_ha,
                    request.slow_ha,
                    request.size_lines,
                );
                if !updated {
                    self.policy.commit_remapping()?;
                    self.swap.reset();
                    debug!(
                        fast_ha = format_args!("{:#x}", request.fast_ha),
                        slow_ha = format_args!("{:#x}", request.slow_ha),
                        size = request.size_lines,
                        "swap committed"
                    );
                }
            }
        }

        self.policy.epoch_check(status)?;

        // Fractional tier clocks: each tier ticks at its own I/O rate.
        if self.leap_fast >= 1.0 {
            self.leap_fast -= 1.0;
        } else {
            self.fast.tick();
            self.leap_fast += self.clock_scale_fast - 1.0;
        }
        if self.leap_slow >= 1.0 {
            self.leap_slow -= 1.0;
        } else {
            self.slow.tick();
            self.leap_slow += self.clock_scale_slow - 1.0;
        }

        let fast_responses = self.fast.drain_responses();
        let slow_responses = self.slow.drain_responses();
        for response in fast_responses {
            self.deliver(response, 0);
        }
        for response in slow_responses {
            self.deliver(response, self.fast_capacity);
        }
        Ok(())
    }

    /// Rebases a tier response into the flat space and hands it to its
    /// originator.
    fn deliver(&mut self, response: MemResponse, rebase: u64) {
        let global = response.addr + rebase;
        match response.requester {
            Requester::Demand(mut packet) => {
                packet.data = response.line.word();
                self.completed.push(packet);
            }
            Requester::Swap => self.swap.complete_read(global, response.line),
            Requester::Metadata => {}
        }
    }

    /// Takes all demand reads completed since the last call.
    pub fn pop_completed(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.completed)
    }

    /// Demand counters.
    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    /// Swap count and traffic bytes accumulated by the swapping unit.
    pub fn swap_stats(&self) -> (u64, u64) {
        (self.swap.swap_count, self.swap.traffic_bytes)
    }

    /// Diagnostic counters of the active policy.
    pub fn policy_stats(&self) -> PolicyStats {
        self.policy.stats()
    }

    /// Row-buffer statistics, `(fast, slow)`, each `(hits, misses)`.
    pub fn row_stats(&self) -> ((u64, u64), (u64, u64)) {
        (self.fast.row_stats(), self.slow.row_stats())
    }

    /// Dumps every component's state on deadlock.
    pub fn dump_state(&self) {
        self.swap.dump_state();
        self.policy.dump_state();
        tracing::error!(
            fast_rq = self.fast.queue_occupancy(AccessKind::Read),
            fast_wq = self.fast.queue_occupancy(AccessKind::Write),
            slow_rq = self.slow.queue_occupancy(AccessKind::Read),
            slow_wq = self.slow.queue_occupancy(AccessKind::Write),
            completed = self.completed.len(),
            "controller: dump"
        );
    }
}

impl std::fmt::Debug for HybridController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridController")
            .field("fast_capacity", &self.fast_capacity)
            .field("total_capacity", &self.total_capacity)
            .field("warmup", &self.warmup)
            .finish_non_exhaustive()
    }
}
