//! Swapping unit: executes migrations atomically against demand traffic.
//!
//! One migration is active at a time, decomposed into line pairs. Each
//! buffer entry reads both sides of its pair, then writes each side with the
//! other's data. While a pair is in flight the buffer is authoritative for
//! both addresses: demand reads are served from it and demand writes merge
//! into it (re-dirtying the entry so the write is re-issued to memory).
//! The policy's address tables change only after the whole migration
//! finishes, so no access ever observes a half-exchanged pair.

use tracing::{error, warn};

use crate::common::constants::{LINE_BYTES, LINE_OFFSET_BITS, SWAP_BUFFER_ENTRIES, SWAP_SEGMENTS};
use crate::common::{AccessKind, Line};
use crate::mem::backend::{MemRequest, MemoryBackend, Requester};

/// Result of one swapping-unit step, as reported to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapStatus {
    /// No active swap; a new one may be started.
    Idle,
    /// A swap is active with unfinished entries.
    Busy,
    /// Every entry of the active swap finished this step; the controller
    /// commits the remapping (unless the swap is widened) and resets.
    JustFinished,
}

/// Disposition of a demand request against the active swap window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapCheck {
    /// The address is not under swap; proceed to the back-end.
    NotInSwap,
    /// A read was served from the buffer; the payload is returned and the
    /// back-end must be skipped.
    ServicedRead(u64),
    /// A write was merged into the buffer; the back-end must be skipped.
    ServicedWrite,
    /// The address is under swap but its data is not yet buffered; the
    /// caller retries next cycle.
    MustWait,
}

/// In-flight state of one line pair.
#[derive(Clone, Copy, Debug, Default)]
struct SwapEntry {
    finished: bool,
    data: [Line; SWAP_SEGMENTS],
    read_issued: [bool; SWAP_SEGMENTS],
    read_done: [bool; SWAP_SEGMENTS],
    write_done: [bool; SWAP_SEGMENTS],
    dirty: [bool; SWAP_SEGMENTS],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SwapState {
    Idle,
    Swapping,
}

/// The swapping unit. Lives inside the memory controller.
pub struct SwapUnit {
    entries: Vec<SwapEntry>,
    /// Base line index (hardware address / 64) of each segment.
    base_line: [u64; SWAP_SEGMENTS],
    active_entries: usize,
    finished_count: usize,
    state: SwapState,
    /// Lines swapped (both directions) over the whole run.
    pub swap_count: u64,
    /// Bytes of migration traffic over the whole run.
    pub traffic_bytes: u64,
}

impl SwapUnit {
    /// Creates an idle swapping unit.
    pub fn new() -> Self {
        Self {
            entries: vec![SwapEntry::default(); SWAP_BUFFER_ENTRIES],
            base_line: [0; SWAP_SEGMENTS],
            active_entries: 0,
            finished_count: 0,
            state: SwapState::Idle,
            swap_count: 0,
            traffic_bytes: 0,
        }
    }

    /// Returns true when no swap is active.
    pub fn is_idle(&self) -> bool {
        self.state == SwapState::Idle
    }

    /// Starts a swap of `size_lines` line pairs between two hardware
    /// addresses. Rejected while a swap is active.
    pub fn start_swap(&mut self, fast_ha: u64, slow_ha: u64, size_lines: u8) -> bool {
        let size = size_lines as usize;
        if size == 0 || size > self.entries.len() {
            error!(size, "swap size out of range");
            return false;
        }
        if self.state != SwapState::Idle {
            return false;
        }
        self.state = SwapState::Swapping;
        self.base_line[0] = fast_ha >> LINE_OFFSET_BITS;
        self.base_line[1] = slow_ha >> LINE_OFFSET_BITS;
        self.active_entries = size;
        true
    }

    /// Widens the active swap to `size_lines` entries. Only accepted for the
    /// same base pair and a strictly larger size; re-arms a just-finished
    /// swap.
    pub fn update_swap(&mut self, fast_ha: u64, slow_ha: u64, size_lines: u8) -> bool {
        let size = size_lines as usize;
        if size > self.entries.len() {
            error!(size, "swap size out of range");
            return false;
        }
        if self.base_line[0] != fast_ha >> LINE_OFFSET_BITS
            || self.base_line[1] != slow_ha >> LINE_OFFSET_BITS
        {
            return false;
        }
        if size > self.active_entries {
            self.active_entries = size;
            if self.state == SwapState::Idle {
                self.state = SwapState::Swapping;
            }
            return true;
        }
        false
    }

    /// Routes one swap request to the tier owning `addr`.
    fn route(
        fast: &mut dyn MemoryBackend,
        slow: &mut dyn MemoryBackend,
        addr: u64,
        kind: AccessKind,
        line: Option<Line>,
    ) -> bool {
        let fast_capacity = fast.capacity();
        let request = MemRequest {
            addr,
            kind,
            requester: Requester::Swap,
            line,
        };
        if addr < fast_capacity {
            fast.send(request)
        } else {
            slow.send(MemRequest {
                addr: addr - fast_capacity,
                ..request
            })
        }
    }

    /// Advances the active swap: issues reads, then cross-writes, and
    /// reports the unit's state.
    pub fn step(
        &mut self,
        fast: &mut dyn MemoryBackend,
        slow: &mut dyn MemoryBackend,
    ) -> SwapStatus {
        if self.state == SwapState::Idle {
            return SwapStatus::Idle;
        }

        // Issue reads.
        for i in 0..self.active_entries {
            if self.entries[i].finished {
                continue;
            }
            for segment in 0..SWAP_SEGMENTS {
                if self.entries[i].read_issued[segment] {
                    continue;
                }
                let addr = (self.base_line[segment] + i as u64) << LINE_OFFSET_BITS;
                if Self::route(fast, slow, addr, AccessKind::Read, None) {
                    self.entries[i].read_issued[segment] = true;
                }
            }
        }

        // Issue writes once both reads of a pair are home.
        for i in 0..self.active_entries {
            let entry = self.entries[i];
            if entry.finished {
                continue;
            }
            if entry.read_done[0] && entry.read_done[1] {
                for segment in 0..SWAP_SEGMENTS {
                    if entry.write_done[segment] && !entry.dirty[segment] {
                        continue;
                    }
                    let addr = (self.base_line[segment] + i as u64) << LINE_OFFSET_BITS;
                    let line = self.entries[i].data[segment];
                    if Self::route(fast, slow, addr, AccessKind::Write, Some(line)) {
                        self.entries[i].write_done[segment] = true;
                        self.entries[i].dirty[segment] = false;
                    }
                }
            }
            if self.entries[i].write_done[0] && self.entries[i].write_done[1] {
                self.entries[i].finished = true;
                self.finished_count += 1;
            }
        }

        if self.finished_count == self.active_entries {
            self.state = SwapState::Idle;
            return SwapStatus::JustFinished;
        }
        SwapStatus::Busy
    }

    /// Accepts a returned swap read. The data read from one segment is the
    /// payload destined for the other, so it is stored under the opposite
    /// index.
    pub fn complete_read(&mut self, h_addr: u64, line: Line) {
        if self.state == SwapState::Idle && self.active_entries == 0 {
            warn!(addr = format_args!("{h_addr:#x}"), "swap data returned after reset");
            return;
        }
        let line_addr = h_addr >> LINE_OFFSET_BITS;
        let (segment, index) = if (self.base_line[0]..self.base_line[0] + self.active_entries as u64)
            .contains(&line_addr)
        {
            (1, (line_addr - self.base_line[0]) as usize)
        } else if (self.base_line[1]..self.base_line[1] + self.active_entries as u64)
            .contains(&line_addr)
        {
            (0, (line_addr - self.base_line[1]) as usize)
        } else {
            error!(
                addr = format_args!("{h_addr:#x}"),
                "swap data returned outside the active window"
            );
            return;
        };

        let entry = &mut self.entries[index];
        if !entry.finished && !entry.write_done[segment] && !entry.dirty[segment] {
            entry.data[segment] = line;
            entry.read_done[segment] = true;
        }
    }

    /// Checks a demand request against the active swap window.
    ///
    /// `data` is the packet's write payload; ignored for reads.
    pub fn check_request(&mut self, h_addr: u64, kind: AccessKind, data: u64) -> SwapCheck {
        let line_addr = h_addr >> LINE_OFFSET_BITS;
        let (segment, index) = if (self.base_line[0]..self.base_line[0] + self.active_entries as u64)
            .contains(&line_addr)
        {
            (0, (line_addr - self.base_line[0]) as usize)
        } else if (self.base_line[1]..self.base_line[1] + self.active_entries as u64)
            .contains(&line_addr)
        {
            (1, (line_addr - self.base_line[1]) as usize)
        } else {
            return SwapCheck::NotInSwap;
        };

        let entry = &mut self.entries[index];
        match kind {
            AccessKind::Read => {
                if entry.finished
                    || entry.read_done[segment]
                    || entry.write_done[segment]
                    || entry.dirty[segment]
                {
                    return SwapCheck::ServicedRead(entry.data[segment].word());
                }
                SwapCheck::MustWait
            }
            AccessKind::Write => {
                if entry.read_done[0] && entry.read_done[1] {
                    entry.data[segment].set_word(data);
                    entry.dirty[segment] = true;
                    if entry.finished {
                        entry.finished = false;
                        self.finished_count -= 1;
                    }
                    return SwapCheck::ServicedWrite;
                }
                SwapCheck::MustWait
            }
        }
    }

    /// Clears the buffer after the policy committed, accumulating traffic
    /// statistics for the completed swap.
    pub fn reset(&mut self) {
        self.swap_count += self.active_entries as u64 * 2;
        self.traffic_bytes += self.active_entries as u64 * 2 * LINE_BYTES;
        self.state = SwapState::Idle;
        for entry in &mut self.entries {
            *entry = SwapEntry::default();
        }
        self.base_line = [0; SWAP_SEGMENTS];
        self.active_entries = 0;
        self.finished_count = 0;
    }

    /// Dumps the unit's state on deadlock.
    pub fn dump_state(&self) {
        error!(
            state = ?self.state,
            base_fast = format_args!("{:#x}", self.base_line[0] << LINE_OFFSET_BITS),
            base_slow = format_args!("{:#x}", self.base_line[1] << LINE_OFFSET_BITS),
            active = self.active_entries,
            finished = self.finished_count,
            "swap unit: dump"
        );
    }
}

impl Default for SwapUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;
    use crate::mem::backend::{DramModel, MemResponse};

    const FAST_CAPACITY: u64 = 1 << 20;

    fn tiers() -> (DramModel, DramModel) {
        let fast = TierConfig {
            capacity_bytes: FAST_CAPACITY,
            t_cas: 1,
            t_ras: 1,
            t_pre: 1,
            ..TierConfig::default()
        };
        let slow = TierConfig {
            capacity_bytes: FAST_CAPACITY * 3,
            t_cas: 2,
            t_ras: 2,
            t_pre: 2,
            ..TierConfig::default()
        };
        (DramModel::new(0, &fast), DramModel::new(1, &slow))
    }

    /// Runs tier clocks and feeds returned swap reads back into the unit.
    fn pump(unit: &mut SwapUnit, fast: &mut DramModel, slow: &mut DramModel) {
        fast.tick();
        slow.tick();
        let mut feed = |responses: Vec<MemResponse>| {
            for response in responses {
                let global = if response.memory_id == 1 {
                    response.addr + FAST_CAPACITY
                } else {
                    response.addr
                };
                unit.complete_read(global, response.line);
            }
        };
        feed(fast.drain_responses());
        feed(slow.drain_responses());
    }

    fn seed_line(tier: &mut DramModel, addr: u64, word: u64) {
        assert!(tier.send(MemRequest {
            addr,
            kind: AccessKind::Write,
            requester: Requester::Swap,
            line: Some(Line::from_word(word)),
        }));
        for _ in 0..8 {
            tier.tick();
        }
    }

    #[test]
    fn test_start_rejected_while_busy() {
        let mut unit = SwapUnit::new();
        assert!(unit.start_swap(0, FAST_CAPACITY, 1));
        assert!(!unit.start_swap(0x40, FAST_CAPACITY + 0x40, 1));
    }

    #[test]
    fn test_update_requires_same_pair_and_growth() {
        let mut unit = SwapUnit::new();
        assert!(unit.start_swap(0, FAST_CAPACITY, 2));
        assert!(!unit.update_swap(0x40, FAST_CAPACITY, 4));
        assert!(!unit.update_swap(0, FAST_CAPACITY, 2));
        assert!(unit.update_swap(0, FAST_CAPACITY, 4));
    }

    #[test]
    fn test_full_swap_exchanges_lines() {
        let (mut fast, mut slow) = tiers();
        seed_line(&mut fast, 0, 111);
        seed_line(&mut slow, 0, 222); // global FAST_CAPACITY

        let mut unit = SwapUnit::new();
        assert!(unit.start_swap(0, FAST_CAPACITY, 1));

        let mut finished = false;
        for _ in 0..64 {
            if unit.step(&mut fast, &mut slow) == SwapStatus::JustFinished {
                finished = true;
                break;
            }
            pump(&mut unit, &mut fast, &mut slow);
        }
        assert!(finished);
        unit.reset();
        assert_eq!(unit.swap_count, 2);
        assert_eq!(unit.traffic_bytes, 2 * LINE_BYTES);

        // drain the cross-writes, then observe the exchange
        for _ in 0..16 {
            fast.tick();
            slow.tick();
        }
        seed_read(&mut fast, 0, 222);
        seed_read(&mut slow, 0, 111);
    }

    /// Issues a read and asserts the returned word.
    fn seed_read(tier: &mut DramModel, addr: u64, expected: u64) {
        assert!(tier.send(MemRequest {
            addr,
            kind: AccessKind::Read,
            requester: Requester::Swap,
            line: None,
        }));
        for _ in 0..8 {
            tier.tick();
        }
        let responses = tier.drain_responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].line.word(), expected);
    }

    #[test]
    fn test_read_forwarded_from_buffer_mid_swap() {
        let (mut fast, mut slow) = tiers();
        seed_line(&mut fast, 0, 111);
        seed_line(&mut slow, 0, 222);

        let mut unit = SwapUnit::new();
        assert!(unit.start_swap(0, FAST_CAPACITY, 1));

        // pump until both reads are buffered but before the writes land
        let _ = unit.step(&mut fast, &mut slow);
        for _ in 0..16 {
            pump(&mut unit, &mut fast, &mut slow);
            if unit.entries[0].read_done[0] && unit.entries[0].read_done[1] {
                break;
            }
        }
        assert!(unit.entries[0].read_done[0] && unit.entries[0].read_done[1]);
        assert!(!unit.entries[0].write_done[0]);

        // a read of the fast side returns the incoming (slow) data
        match unit.check_request(0, AccessKind::Read, 0) {
            SwapCheck::ServicedRead(word) => assert_eq!(word, 222),
            other => panic!("expected serviced read, got {other:?}"),
        }
        // and the slow side returns the incoming (fast) data
        match unit.check_request(FAST_CAPACITY, AccessKind::Read, 0) {
            SwapCheck::ServicedRead(word) => assert_eq!(word, 111),
            other => panic!("expected serviced read, got {other:?}"),
        }
    }

    #[test]
    fn test_read_must_wait_before_data_arrives() {
        let mut unit = SwapUnit::new();
        assert!(unit.start_swap(0, FAST_CAPACITY, 1));
        assert_eq!(unit.check_request(0, AccessKind::Read, 0), SwapCheck::MustWait);
        assert_eq!(
            unit.check_request(0x4000, AccessKind::Read, 0),
            SwapCheck::NotInSwap
        );
    }

    #[test]
    fn test_demand_write_merges_into_buffer() {
        let (mut fast, mut slow) = tiers();
        seed_line(&mut fast, 0, 111);
        seed_line(&mut slow, 0, 222);

        let mut unit = SwapUnit::new();
        assert!(unit.start_swap(0, FAST_CAPACITY, 1));

        // pump until both reads are buffered but before any write issues
        let _ = unit.step(&mut fast, &mut slow);
        for _ in 0..16 {
            pump(&mut unit, &mut fast, &mut slow);
            if unit.entries[0].read_done[0] && unit.entries[0].read_done[1] {
                break;
            }
        }

        // a write before the reads complete has nothing to merge into
        let mut early = SwapUnit::new();
        assert!(early.start_swap(0, FAST_CAPACITY, 1));
        assert_eq!(
            early.check_request(0, AccessKind::Write, 5),
            SwapCheck::MustWait
        );

        // the demand write merges into the fast-side payload
        assert_eq!(
            unit.check_request(0, AccessKind::Write, 999),
            SwapCheck::ServicedWrite
        );
        assert!(unit.entries[0].dirty[0]);

        let mut finished = false;
        for _ in 0..64 {
            if unit.step(&mut fast, &mut slow) == SwapStatus::JustFinished {
                finished = true;
                break;
            }
            pump(&mut unit, &mut fast, &mut slow);
        }
        assert!(finished);

        for _ in 0..16 {
            fast.tick();
            slow.tick();
        }
        // the merged data landed at the fast side; the old fast line went to
        // the slow side untouched
        seed_read(&mut fast, 0, 999);
        seed_read(&mut slow, 0, 111);
    }
}
