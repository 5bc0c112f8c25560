//! MemPod: epoch-based 2 KiB page swaps.
//!
//! Accesses update a small Misses-Estimating-Accesses (MEA) counter set, a
//! Misra–Gries heavy-hitters sketch over physical pages. At every epoch
//! boundary (50 µs of simulated time by default) the policy drops all
//! not-yet-started swaps, pairs each hot slow-tier page with the next unused
//! fast-tier frame, and enqueues full-page swaps. An explicit page remapping
//! table (and its fast-tier inverse) backs translation.
//!
//! The MEA set tracks pages by physical address, so hotness follows the data
//! across migrations.

use std::collections::HashMap;

use tracing::error;

use crate::common::bits::lg2;
use crate::common::constants::LINE_BYTES;
use crate::common::{AccessKind, HwAddr, PhysAddr, SimError};
use crate::config::Config;
use crate::policy::{PlacementPolicy, PolicyStats, RemapQueue, RemappingRequest};
use crate::mem::swap::SwapStatus;

/// MemPod's management granularity in bytes.
const PAGE_BYTES: u64 = 2048;

/// MemPod placement policy state.
pub struct MemPod {
    total_capacity: u64,
    total_pages: u64,
    fast_pages: u64,
    page_offset_bits: u32,
    /// Lines per 2 KiB page; the size of every enqueued swap.
    swap_lines: u8,

    mea: HashMap<u64, u8>,
    mea_entries: usize,
    mea_max: u8,
    mea_reset_each_epoch: bool,

    /// Physical page -> hardware page, total over the address space.
    remap: HashMap<u64, u64>,
    /// Hardware page -> physical page, restricted to the fast tier.
    invert: HashMap<u64, u64>,

    queue: RemapQueue,

    cycle: u64,
    interval_cycles: f64,
    next_interval: f64,
    epochs: u64,
    /// Round-robin cursor over fast-tier frames for pairing.
    swap_frame_cursor: u64,
}

impl MemPod {
    /// Builds the policy from the validated configuration.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let total_capacity = config.total_capacity();
        let page_offset_bits = lg2(PAGE_BYTES);
        let total_pages = total_capacity >> page_offset_bits;
        let fast_pages = config.fast.capacity_bytes >> page_offset_bits;
        if config.policy.mea_entries == 0 {
            return Err(SimError::InvalidConfig("MEA set must have entries".into()));
        }

        let mut remap = HashMap::with_capacity(total_pages as usize);
        let mut invert = HashMap::with_capacity(fast_pages as usize);
        for page in 0..total_pages {
            let _ = remap.insert(page, page);
        }
        for page in 0..fast_pages {
            let _ = invert.insert(page, page);
        }

        let interval_cycles =
            config.sim.cpu_freq_mhz * config.policy.epoch_us as f64;

        Ok(Self {
            total_capacity,
            total_pages,
            fast_pages,
            page_offset_bits,
            swap_lines: (PAGE_BYTES / LINE_BYTES) as u8,
            mea: HashMap::with_capacity(config.policy.mea_entries),
            mea_entries: config.policy.mea_entries,
            mea_max: config.policy.mea_max,
            mea_reset_each_epoch: config.policy.mea_reset_each_epoch,
            remap,
            invert,
            queue: RemapQueue::new(config.policy.effective_queue_len()),
            cycle: 0,
            interval_cycles,
            next_interval: interval_cycles,
            epochs: 0,
            swap_frame_cursor: 0,
        })
    }

    /// Misra–Gries update for one page access.
    fn update_mea(&mut self, page: u64) {
        if let Some(count) = self.mea.get_mut(&page) {
            if *count < self.mea_max {
                *count += 1;
            }
        } else if self.mea.len() >= self.mea_entries {
            // A miss against a full set decrements every counter; entries
            // reaching zero are evicted.
            self.mea.retain(|_, count| {
                *count -= 1;
                *count > 0
            });
        } else {
            let _ = self.mea.insert(page, 1);
        }
    }

    /// Runs one epoch: pair hot slow pages with free fast frames.
    fn run_epoch(&mut self) -> Result<(), SimError> {
        let mut hot_pages: Vec<u64> = self.mea.keys().copied().collect();
        hot_pages.sort_unstable();

        let mut hot_in_fast: Vec<u64> = Vec::new();
        let mut hot_in_slow: Vec<(u64, u64)> = Vec::new(); // (hardware, physical)
        for page in hot_pages {
            let hw = self.remap.get(&page).copied().unwrap_or(page);
            if hw < self.fast_pages {
                hot_in_fast.push(hw);
            } else if hw < self.total_pages {
                hot_in_slow.push((hw, page));
            } else {
                return Err(SimError::PolicyInvariant(format!(
                    "page {page:#x} remapped beyond the address space to {hw:#x}"
                )));
            }
        }
        hot_in_fast.sort_unstable();
        hot_in_slow.sort_unstable();

        for (hw_slow, pa_slow) in hot_in_slow {
            // Skip fast frames that are themselves hot; evicting them would
            // thrash this epoch's own working set.
            while hot_in_fast.binary_search(&self.swap_frame_cursor).is_ok() {
                self.swap_frame_cursor += 1;
            }
            let frame = self.swap_frame_cursor;
            let pa_fast = self.invert.get(&frame).copied().unwrap_or(frame);

            let request = RemappingRequest {
                fast_ha: frame << self.page_offset_bits,
                slow_ha: hw_slow << self.page_offset_bits,
                fast_pa: pa_fast << self.page_offset_bits,
                slow_pa: pa_slow << self.page_offset_bits,
                fast_loc: 0,
                slow_loc: 1,
                size_lines: self.swap_lines,
            };
            let _ = self.queue.try_enqueue(request)?;

            self.swap_frame_cursor = (self.swap_frame_cursor + 1) % self.fast_pages;
        }
        Ok(())
    }
}

impl PlacementPolicy for MemPod {
    fn track(
        &mut self,
        addr: PhysAddr,
        _kind: AccessKind,
        _queue_busy: f64,
    ) -> Result<(), SimError> {
        let raw = addr.val();
        if raw >= self.total_capacity {
            return Err(SimError::AddressOutOfRange {
                addr: raw,
                limit: self.total_capacity,
            });
        }
        self.update_mea(raw >> self.page_offset_bits);
        Ok(())
    }

    fn translate(&self, addr: PhysAddr) -> HwAddr {
        let page = addr.val() >> self.page_offset_bits;
        let offset = addr.val() & (PAGE_BYTES - 1);
        let hw = self.remap.get(&page).copied().unwrap_or(page);
        HwAddr((hw << self.page_offset_bits) + offset)
    }

    fn issue_remapping(&self) -> Option<RemappingRequest> {
        self.queue.peek().copied()
    }

    fn commit_remapping(&mut self) -> Result<(), SimError> {
        let Some(request) = self.queue.pop() else {
            return Err(SimError::PolicyInvariant(
                "commit with an empty remapping queue".into(),
            ));
        };

        let pa_fast = request.fast_pa >> self.page_offset_bits;
        let pa_slow = request.slow_pa >> self.page_offset_bits;
        let hw_fast = request.fast_ha >> self.page_offset_bits;
        let hw_slow = request.slow_ha >> self.page_offset_bits;
        if hw_fast == hw_slow {
            return Err(SimError::PolicyInvariant(format!(
                "degenerate page swap of hardware page {hw_fast:#x}"
            )));
        }

        let _ = self.remap.insert(pa_slow, hw_fast);
        let _ = self.remap.insert(pa_fast, hw_slow);
        let _ = self.invert.insert(hw_fast, pa_slow);
        Ok(())
    }

    fn tick(&mut self) {
        self.cycle += 1;
    }

    fn epoch_check(&mut self, status: SwapStatus) -> Result<(), SimError> {
        if (self.cycle as f64) < self.next_interval {
            return Ok(());
        }

        // Pending swaps from the closing epoch are stale; only the one the
        // swapping unit already started is allowed to finish.
        self.queue.cancel_pending(status == SwapStatus::Busy);

        self.run_epoch()?;

        self.next_interval += self.interval_cycles;
        self.epochs += 1;
        if self.mea_reset_each_epoch {
            self.mea.clear();
        }
        Ok(())
    }

    fn stats(&self) -> PolicyStats {
        PolicyStats {
            queue_congestion: self.queue.congestion,
            epochs: self.epochs,
            ..PolicyStats::default()
        }
    }

    fn dump_state(&self) {
        error!(
            cycle = self.cycle,
            epochs = self.epochs,
            queued = self.queue.len(),
            mea_entries = self.mea.len(),
            cursor = self.swap_frame_cursor,
            "mempod: dump"
        );
    }
}
