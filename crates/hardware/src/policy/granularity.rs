//! Variable-granularity region migration.
//!
//! Data is managed in 4 KiB blocks, but migrated at any power-of-two size
//! from one cache line to the whole block. A 64-bit access bitmap per block
//! records which lines were touched; when a block turns hot, the bounding
//! box of its touched lines (rounded up to a power of two) decides the
//! migration size. Each fast-tier 4 KiB set carries a placement entry of up
//! to five groups `{tag, start, granularity}` describing which fragments of
//! which congruence-group members currently occupy it; groups are packed
//! contiguously in occupation order and a cursor points at the next free
//! slot.
//!
//! Fast-tier lines displaced by a migration live at the migrated fragment's
//! home location in slow memory, and are recovered there when the fragment
//! is evicted.

use tracing::error;

use crate::common::bits::{lg2, replace_bits, splice_bits};
use crate::common::constants::{LINE_OFFSET_BITS, PAGE_OFFSET_BITS, QUEUE_BUSY_THRESHOLD};
use crate::common::{AccessKind, HwAddr, PhysAddr, SimError};
use crate::config::Config;
use crate::policy::{PlacementPolicy, PolicyStats, RemapQueue, RemappingRequest};

/// Groups per placement entry.
const GROUPS_PER_ENTRY: usize = 5;

/// Lines per 4 KiB management block.
const LINES_PER_BLOCK: u8 = 64;

/// Width of the congruence tag field in a byte address, above the fast-tier
/// offset bits.
const TAG_FIELD_BITS: u32 = 6;

/// One occupied fragment of a fast-tier set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Group {
    /// Congruence-group member the data belongs to (0 = native fast block).
    tag: u8,
    /// First line of the fragment within its home block.
    start: u8,
    /// Fragment length in lines; 0 marks an invalid group.
    granularity: u8,
}

/// Placement entry: the occupation state of one fast-tier 4 KiB set.
#[derive(Clone, Copy, Debug, Default)]
struct PlacementEntry {
    /// Next free group slot; groups `0..cursor` are valid and contiguous.
    cursor: u8,
    groups: [Group; GROUPS_PER_ENTRY],
}

impl PlacementEntry {
    /// Lines of the set not covered by any valid group.
    fn free_lines(&self) -> i16 {
        let mut free = i16::from(LINES_PER_BLOCK);
        for group in &self.groups[..self.cursor as usize] {
            free -= i16::from(group.granularity);
        }
        free
    }
}

/// Variable-granularity placement policy state.
pub struct VariableGranularity {
    hotness_threshold: u8,
    total_capacity: u64,
    fast_blocks: u64,
    total_blocks: u64,
    fast_offset_bit: u32,
    /// Most significant bit of the tag field in a byte address.
    set_msb: u32,
    counters: Vec<u8>,
    hot: Vec<bool>,
    /// Per-block access bitmap; bit i set means line i was touched.
    access: Vec<u64>,
    placement: Vec<PlacementEntry>,
    queue: RemapQueue,
    decay_interval: u64,
    cycle: u64,
    stats: PolicyStats,
}

/// Rounds the inclusive line range `[start, end]` up to the next
/// power-of-two migration size.
fn calculate_granularity(start: u8, end: u8) -> Result<u8, SimError> {
    if start > end {
        return Err(SimError::PolicyInvariant(format!(
            "migration bounding box inverted: start {start}, end {end}"
        )));
    }
    Ok((u64::from(end - start) + 1).next_power_of_two() as u8)
}

/// Shrinks `granularity` until the fragment fits inside the block, and
/// returns the updated end line.
fn adjust_granularity(start: u8, granularity: &mut u8) -> u8 {
    while start + *granularity - 1 >= LINES_PER_BLOCK {
        *granularity /= 2;
    }
    start + *granularity - 1
}

impl VariableGranularity {
    /// Builds the policy from the validated configuration.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let total_capacity = config.total_capacity();
        let fast_capacity = config.fast.capacity_bytes;
        let total_blocks = total_capacity >> PAGE_OFFSET_BITS;
        let fast_blocks = fast_capacity >> PAGE_OFFSET_BITS;
        let group = total_capacity / fast_capacity;
        if group > GROUPS_PER_ENTRY as u64 {
            return Err(SimError::InvalidConfig(format!(
                "congruence group of {group} members exceeds {GROUPS_PER_ENTRY}"
            )));
        }
        let fast_offset_bit = lg2(fast_capacity);
        Ok(Self {
            hotness_threshold: config.policy.hotness_threshold,
            total_capacity,
            fast_blocks,
            total_blocks,
            fast_offset_bit,
            set_msb: TAG_FIELD_BITS + fast_offset_bit - 1,
            counters: vec![0; total_blocks as usize],
            hot: vec![false; total_blocks as usize],
            access: vec![0; total_blocks as usize],
            placement: vec![PlacementEntry::default(); fast_blocks as usize],
            queue: RemapQueue::new(config.policy.effective_queue_len()),
            decay_interval: config.policy.decay_interval,
            cycle: 0,
            stats: PolicyStats::default(),
        })
    }

    /// Splices `tag` into the congruence field of a set-relative byte
    /// address, producing the member's home address.
    fn splice_tag(&self, base: u64, tag: u8) -> u64 {
        replace_bits(
            base,
            u64::from(tag) << self.fast_offset_bit,
            self.set_msb,
            self.fast_offset_bit,
        )
    }

    fn dump_entry(&self, set: u64) -> String {
        let entry = &self.placement[set as usize];
        let mut out = format!("set {set:#x} cursor {}:", entry.cursor);
        for (i, group) in entry.groups[..entry.cursor as usize].iter().enumerate() {
            out.push_str(&format!(
                " [{}] tag {} start {} granularity {};",
                i, group.tag, group.start, group.granularity
            ));
        }
        out
    }

    /// Enqueues `request` unless an equivalent one is queued; equivalent
    /// requests for the identical address pair are widened instead.
    fn enqueue_dedup(&mut self, request: RemappingRequest) -> Result<bool, SimError> {
        let set = (request.fast_ha >> PAGE_OFFSET_BITS) % self.fast_blocks;
        let mut duplicated = false;
        for queued in self.queue.iter_mut() {
            let queued_set = (queued.fast_ha >> PAGE_OFFSET_BITS) % self.fast_blocks;
            if queued_set != set {
                continue;
            }
            duplicated = true;
            if request.fast_loc == 0 && queued.fast_loc == 0 {
                // slow-to-fast: one request per set keeps the displaced
                // block-0 data consistent; identical pairs widen.
                if queued.fast_ha == request.fast_ha && queued.slow_ha == request.slow_ha {
                    if request.size_lines > queued.size_lines {
                        queued.size_lines = request.size_lines;
                    }
                    return Ok(true);
                }
            } else if request.slow_loc == 0 && queued.slow_loc == 0 {
                // fast-to-slow evictions of different fragments may coexist.
                if queued.fast_ha == request.fast_ha && queued.slow_ha == request.slow_ha {
                    if request.size_lines > queued.size_lines {
                        queued.size_lines = request.size_lines;
                    }
                    return Ok(true);
                } else if queued.fast_ha != request.fast_ha {
                    duplicated = false;
                    continue;
                }
            }
            break;
        }
        if duplicated {
            return Ok(false);
        }
        self.queue.try_enqueue(request)
    }

    /// Tries to evict one cold fragment from the set `source_addr` maps to,
    /// recovering the displaced native fast lines.
    fn cold_data_eviction(
        &mut self,
        source_addr: u64,
        queue_busy: f64,
    ) -> Result<(), SimError> {
        let block = source_addr >> PAGE_OFFSET_BITS;
        let set = block % self.fast_blocks;
        let base = set << PAGE_OFFSET_BITS;
        let tag = (block / self.fast_blocks) as u8;

        let entry = self.placement[set as usize];
        let mut candidate = None;
        let mut used_space = 0u8;
        for i in 0..entry.cursor as usize {
            let group = entry.groups[i];
            if group.granularity == 0 {
                return Err(SimError::PolicyInvariant(format!(
                    "zero-sized group inside cursor range: {}",
                    self.dump_entry(set)
                )));
            }
            used_space += group.granularity;
            if group.tag == tag || group.tag == 0 {
                // never evict the fragment the access is heading for
                continue;
            }
            let evict_base = self.splice_tag(base, group.tag);
            let evict_block = evict_base >> PAGE_OFFSET_BITS;
            if !self.hot[evict_block as usize] {
                used_space -= group.granularity;
                candidate = Some((i, used_space));
                break;
            }
        }

        let Some((occupied, mut used_space)) = candidate else {
            return Ok(());
        };

        let victim_tag = entry.groups[occupied].tag;
        for i in occupied..entry.cursor as usize {
            let group = entry.groups[i];
            if group.tag == victim_tag {
                let fast_ha =
                    self.splice_tag(base + (u64::from(used_space) << LINE_OFFSET_BITS), 0);
                let slow_ha = self
                    .splice_tag(base + (u64::from(group.start) << LINE_OFFSET_BITS), victim_tag);
                let request = RemappingRequest {
                    fast_ha,
                    slow_ha,
                    fast_pa: fast_ha,
                    slow_pa: slow_ha,
                    fast_loc: victim_tag,
                    slow_loc: 0,
                    size_lines: group.granularity,
                };
                let enqueued = if queue_busy <= QUEUE_BUSY_THRESHOLD {
                    self.enqueue_dedup(request)?
                } else {
                    false
                };
                if enqueued {
                    self.stats.eviction_success += 1;
                } else {
                    self.stats.eviction_failure += 1;
                }
            }
            used_space += group.granularity;
        }
        Ok(())
    }

    /// Hot slow-tier block: compute the migration fragment and enqueue it.
    fn track_hot_slow(
        &mut self,
        raw: u64,
        block: u64,
        set: u64,
        base: u64,
        tag: u8,
        queue_busy: f64,
    ) -> Result<(), SimError> {
        let entry = self.placement[set as usize];
        let free_space = entry.free_lines();
        if free_space < 0 {
            return Err(SimError::PolicyInvariant(format!(
                "placement overflow: {}",
                self.dump_entry(set)
            )));
        }
        let free_space = free_space as u8;

        let bitmap = self.access[block as usize];
        let mut start = bitmap.trailing_zeros() as u8;
        let mut end = (63 - bitmap.leading_zeros()) as u8;
        let mut granularity = calculate_granularity(start, end)?;
        end = adjust_granularity(start, &mut granularity);

        let mut is_expanded = false;
        for i in 0..entry.cursor as usize {
            let group = entry.groups[i];
            if group.tag != tag {
                continue;
            }
            let existing_start = group.start;
            let existing_end = group.start + group.granularity - 1;

            if i != entry.cursor as usize - 1 {
                // the group cannot grow: another group sits behind it
                self.cold_data_eviction(raw, queue_busy)?;
                self.stats.unexpandable_no_invalid_group += 1;
                return Ok(());
            }

            if start < existing_start {
                // growing backwards would break the contiguous layout
                self.stats.unexpandable_start_address += 1;
                return Ok(());
            }
            start = existing_start;
            if existing_end >= end {
                // fully contained: already in fast memory
                return Ok(());
            }
            granularity = calculate_granularity(start, end)?;
            end = adjust_granularity(start, &mut granularity);
            if group.granularity >= granularity {
                // rounding collapsed the growth; nothing to migrate
                return Ok(());
            }
            let remaining = granularity - group.granularity;
            if remaining <= free_space {
                is_expanded = true;
                granularity = remaining;
                start = (end + 1) - remaining;
                break;
            }
            self.cold_data_eviction(raw, queue_busy)?;
            self.stats.no_free_space_for_migration += 1;
            return Ok(());
        }

        if granularity == 0 {
            return Err(SimError::PolicyInvariant(format!(
                "computed migration granularity of zero for block {block:#x}"
            )));
        }

        if !is_expanded {
            if granularity <= free_space {
                if entry.cursor as usize == GROUPS_PER_ENTRY {
                    self.cold_data_eviction(raw, queue_busy)?;
                    self.stats.no_invalid_group_for_migration += 1;
                    return Ok(());
                }
            } else {
                self.cold_data_eviction(raw, queue_busy)?;
                self.stats.no_free_space_for_migration += 1;
                return Ok(());
            }
        }

        // native fast data displaced by the fragment is parked at the
        // fragment's home location, so the request swaps equal-size pieces
        let start_in_fm = LINES_PER_BLOCK - free_space;
        let fast_ha = self.splice_tag(base + (u64::from(start_in_fm) << LINE_OFFSET_BITS), 0);
        let slow_ha = self.splice_tag(base + (u64::from(start) << LINE_OFFSET_BITS), tag);
        let request = RemappingRequest {
            fast_ha,
            slow_ha,
            fast_pa: fast_ha,
            slow_pa: slow_ha,
            fast_loc: 0,
            slow_loc: tag,
            size_lines: granularity,
        };

        if queue_busy <= QUEUE_BUSY_THRESHOLD {
            let _ = self.enqueue_dedup(request)?;
        }
        Ok(())
    }

    /// Native fast-tier block: if its slot is occupied by a migrated
    /// fragment, enqueue the recovery swap.
    fn track_native(
        &mut self,
        set: u64,
        base: u64,
        line_pos: u8,
        queue_busy: f64,
    ) -> Result<(), SimError> {
        let entry = self.placement[set as usize];
        let mut occupied = None;
        let mut used_space = 0u8;
        for i in 0..entry.cursor as usize {
            let group = entry.groups[i];
            used_space += group.granularity;
            let accumulated_end = used_space - 1;
            if line_pos <= accumulated_end {
                if group.tag == 0 {
                    break;
                }
                used_space -= group.granularity;
                occupied = Some((i, used_space));
                break;
            }
        }

        let Some((occupied, start_in_fm)) = occupied else {
            return Ok(());
        };
        let group = entry.groups[occupied];
        let fast_ha =
            self.splice_tag(base + (u64::from(start_in_fm) << LINE_OFFSET_BITS), 0);
        let slow_ha =
            self.splice_tag(base + (u64::from(group.start) << LINE_OFFSET_BITS), group.tag);
        let request = RemappingRequest {
            fast_ha,
            slow_ha,
            fast_pa: fast_ha,
            slow_pa: slow_ha,
            fast_loc: group.tag,
            slow_loc: 0,
            size_lines: group.granularity,
        };
        if queue_busy <= QUEUE_BUSY_THRESHOLD {
            let _ = self.enqueue_dedup(request)?;
        }
        Ok(())
    }

    /// Commit of a slow-to-fast migration: insert or extend a group.
    fn commit_promote(&mut self, request: &RemappingRequest, set: u64) -> Result<(), SimError> {
        let tag = request.slow_loc;
        let start = ((request.slow_ha >> LINE_OFFSET_BITS) % u64::from(LINES_PER_BLOCK)) as u8;

        let entry = self.placement[set as usize];
        let cursor = entry.cursor as usize;
        let mut expanded = None;
        if cursor > 0 && entry.groups[cursor - 1].tag == tag {
            if entry.groups[cursor - 1].start <= start {
                expanded = Some(cursor - 1);
            } else {
                return Err(SimError::PolicyInvariant(format!(
                    "extension starts before its group (start {start}): {}",
                    self.dump_entry(set)
                )));
            }
        }

        if let Some(position) = expanded {
            self.placement[set as usize].groups[position].granularity += request.size_lines;
            let merged = self.placement[set as usize].groups[position].granularity;
            if !(merged >= 2 && merged <= LINES_PER_BLOCK && merged.is_power_of_two()) {
                return Err(SimError::PolicyInvariant(format!(
                    "merged granularity {merged} not a power of two: {}",
                    self.dump_entry(set)
                )));
            }
        } else {
            if cursor >= GROUPS_PER_ENTRY {
                return Err(SimError::PolicyInvariant(format!(
                    "no group slot left on commit: {}",
                    self.dump_entry(set)
                )));
            }
            self.placement[set as usize].groups[cursor] = Group {
                tag,
                start,
                granularity: request.size_lines,
            };
            self.placement[set as usize].cursor += 1;
            if self.placement[set as usize].free_lines() < 0 {
                return Err(SimError::PolicyInvariant(format!(
                    "placement overflow on commit: {}",
                    self.dump_entry(set)
                )));
            }
        }
        Ok(())
    }

    /// Commit of a fast-to-slow eviction: retract the evicted group.
    fn commit_evict(&mut self, request: &RemappingRequest, set: u64) -> Result<(), SimError> {
        let start_in_fm =
            ((request.fast_ha >> LINE_OFFSET_BITS) % u64::from(LINES_PER_BLOCK)) as u8;

        let entry = self.placement[set as usize];
        let mut found = None;
        let mut used_space = 0u8;
        for i in 0..entry.cursor as usize {
            used_space += entry.groups[i].granularity;
            let accumulated_end = used_space - 1;
            if start_in_fm <= accumulated_end && entry.groups[i].tag == request.fast_loc {
                if entry.groups[i].granularity != request.size_lines {
                    return Err(SimError::PolicyInvariant(format!(
                        "evicted granularity {} does not match request {}: {}",
                        entry.groups[i].granularity,
                        request.size_lines,
                        self.dump_entry(set)
                    )));
                }
                found = Some(i);
                break;
            }
        }
        let Some(occupied) = found else {
            return Err(SimError::PolicyInvariant(format!(
                "no group found for eviction at fast line {start_in_fm}: {}",
                self.dump_entry(set)
            )));
        };

        let entry = &mut self.placement[set as usize];
        entry.groups[occupied] = Group {
            tag: 0,
            start: start_in_fm,
            granularity: request.size_lines,
        };

        // a retracted tail group frees its slot; earlier tombstones free up
        // once everything behind them is gone
        if occupied + 1 == entry.cursor as usize {
            entry.groups[occupied].granularity = 0;
            entry.cursor = occupied as u8;
            for i in (0..occupied).rev() {
                if entry.groups[i].tag == 0 {
                    entry.groups[i].granularity = 0;
                    entry.cursor = i as u8;
                } else {
                    break;
                }
            }
        }

        if self.placement[set as usize].free_lines() < 0 {
            return Err(SimError::PolicyInvariant(format!(
                "placement overflow on eviction commit: {}",
                self.dump_entry(set)
            )));
        }
        Ok(())
    }
}

impl PlacementPolicy for VariableGranularity {
    fn track(
        &mut self,
        addr: PhysAddr,
        _kind: AccessKind,
        queue_busy: f64,
    ) -> Result<(), SimError> {
        let raw = addr.val();
        if raw >= self.total_capacity {
            return Err(SimError::AddressOutOfRange {
                addr: raw,
                limit: self.total_capacity,
            });
        }

        let block = raw >> PAGE_OFFSET_BITS;
        let set = block % self.fast_blocks;
        let base = set << PAGE_OFFSET_BITS;
        let tag = (block / self.fast_blocks) as u8;
        let line_pos = ((raw >> LINE_OFFSET_BITS) % u64::from(LINES_PER_BLOCK)) as u8;

        self.access[block as usize] |= 1 << line_pos;

        let counter = &mut self.counters[block as usize];
        *counter = counter.saturating_add(1);
        if *counter >= self.hotness_threshold {
            self.hot[block as usize] = true;
        }

        if tag != 0 {
            if self.hot[block as usize] {
                return self.track_hot_slow(raw, block, set, base, tag, queue_busy);
            }
            // a cold slow block that misses fast memory makes room for
            // future hot data instead of migrating
            let entry = self.placement[set as usize];
            let hit = entry.groups[..entry.cursor as usize].iter().any(|group| {
                group.tag == tag
                    && group.start <= line_pos
                    && line_pos <= group.start + group.granularity - 1
            });
            if !hit {
                self.cold_data_eviction(raw, queue_busy)?;
            }
            return Ok(());
        }

        self.track_native(set, base, line_pos, queue_busy)
    }

    fn translate(&self, addr: PhysAddr) -> HwAddr {
        let raw = addr.val();
        let block = raw >> PAGE_OFFSET_BITS;
        let set = block % self.fast_blocks;
        let base = set << PAGE_OFFSET_BITS;
        let tag = (block / self.fast_blocks) as u8;
        let line_pos = ((raw >> LINE_OFFSET_BITS) % u64::from(LINES_PER_BLOCK)) as u8;

        let entry = &self.placement[set as usize];
        if tag != 0 {
            // slow-tier block: in fast memory only if a group covers the line
            let mut used_space = 0u8;
            for group in &entry.groups[..entry.cursor as usize] {
                if group.tag == tag
                    && group.start <= line_pos
                    && line_pos <= group.start + group.granularity - 1
                {
                    let fast_line = used_space + line_pos - group.start;
                    let ha = self
                        .splice_tag(base + (u64::from(fast_line) << LINE_OFFSET_BITS), 0);
                    return HwAddr(splice_bits(ha, raw, LINE_OFFSET_BITS));
                }
                used_space += group.granularity;
            }
            return HwAddr(raw);
        }

        // native fast block: displaced if a foreign group covers its slot
        let mut used_space = 0u8;
        for group in &entry.groups[..entry.cursor as usize] {
            used_space += group.granularity;
            let accumulated_end = used_space - 1;
            if line_pos <= accumulated_end {
                if group.tag == 0 {
                    return HwAddr(raw);
                }
                used_space -= group.granularity;
                let slow_line = group.start + line_pos - used_space;
                let ha = self.splice_tag(
                    base + (u64::from(slow_line) << LINE_OFFSET_BITS),
                    group.tag,
                );
                return HwAddr(splice_bits(ha, raw, LINE_OFFSET_BITS));
            }
        }
        HwAddr(raw)
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
        let set = (request.fast_ha >> PAGE_OFFSET_BITS) % self.fast_blocks;

        if request.fast_loc == 0 {
            self.commit_promote(&request, set)
        } else if request.slow_loc == 0 {
            self.commit_evict(&request, set)
        } else {
            Err(SimError::PolicyInvariant(format!(
                "request with neither side native: fast_loc {} slow_loc {}",
                request.fast_loc, request.slow_loc
            )))
        }
    }

    fn tick(&mut self) {
        if self.cycle % self.decay_interval == 0 {
            for block in 0..self.total_blocks as usize {
                self.counters[block] >>= 1;
                if self.counters[block] == 0 {
                    self.hot[block] = false;
                    self.access[block] = 0;
                }
            }
        }
        self.cycle += 1;
    }

    fn stats(&self) -> PolicyStats {
        PolicyStats {
            queue_congestion: self.queue.congestion,
            ..self.stats
        }
    }

    fn dump_state(&self) {
        error!(
            cycle = self.cycle,
            queued = self.queue.len(),
            congestion = self.queue.congestion,
            "variable-granularity: dump"
        );
        if let Some(head) = self.queue.peek() {
            let set = (head.fast_ha >> PAGE_OFFSET_BITS) % self.fast_blocks;
            error!(
                fast_ha = format_args!("{:#x}", head.fast_ha),
                slow_ha = format_args!("{:#x}", head.slow_ha),
                size = head.size_lines,
                entry = self.dump_entry(set),
                "variable-granularity: head remapping request"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::LINE_BYTES;
    use crate::config::PolicyKind;

    const KIB: u64 = 1024;

    /// 4 sets of 4 KiB in fast memory, 4-member congruence groups.
    fn test_config(threshold: u8) -> Config {
        let mut config = Config::default();
        config.fast.capacity_bytes = 16 * KIB;
        config.slow.capacity_bytes = 48 * KIB;
        config.policy.kind = PolicyKind::VariableGranularity;
        config.policy.hotness_threshold = threshold;
        config.policy.decay_interval = 8;
        config
    }

    /// Byte address of `line` within the block `tag` maps onto `set`.
    fn addr_of(set: u64, tag: u64, line: u64) -> PhysAddr {
        PhysAddr((tag * 4 + set) * 4096 + line * LINE_BYTES)
    }

    #[rstest::rstest]
    #[case(0, 0, 1)]
    #[case(0, 1, 2)]
    #[case(0, 3, 4)]
    #[case(0, 4, 8)]
    #[case(10, 12, 4)]
    #[case(0, 31, 32)]
    #[case(0, 32, 64)]
    #[case(0, 63, 64)]
    fn test_granularity_rounding(#[case] start: u8, #[case] end: u8, #[case] expected: u8) {
        assert_eq!(calculate_granularity(start, end).unwrap(), expected);
    }

    #[test]
    fn test_inverted_bounding_box_is_an_error() {
        assert!(calculate_granularity(5, 2).is_err());
    }

    #[test]
    fn test_adjust_shrinks_out_of_block_fragments() {
        let mut granularity = 64;
        let end = adjust_granularity(40, &mut granularity);
        assert_eq!(granularity, 16);
        assert_eq!(end, 55);
    }

    #[test]
    fn test_hot_region_enqueues_bounded_fragment() {
        let mut vg = VariableGranularity::new(&test_config(4)).unwrap();
        for line in 0..4 {
            vg.track(addr_of(0, 1, line), AccessKind::Read, 0.0).unwrap();
        }
        let request = vg.issue_remapping().unwrap();
        assert_eq!(request.size_lines, 4);
        assert_eq!(request.fast_ha, 0); // set 0, free set, fragment at line 0
        assert_eq!(request.slow_ha, addr_of(0, 1, 0).val());
        assert_eq!(request.slow_loc, 1);
    }

    #[test]
    fn test_commit_installs_group_and_translates() {
        let mut vg = VariableGranularity::new(&test_config(4)).unwrap();
        for line in 0..4 {
            vg.track(addr_of(0, 1, line), AccessKind::Read, 0.0).unwrap();
        }
        vg.commit_remapping().unwrap();

        let entry = vg.placement[0];
        assert_eq!(entry.cursor, 1);
        assert_eq!(entry.groups[0], Group { tag: 1, start: 0, granularity: 4 });

        // migrated lines now resolve into the fast set
        assert_eq!(vg.translate(addr_of(0, 1, 2)).val(), 2 * LINE_BYTES);
        // unmigrated lines of the block stay home
        assert_eq!(
            vg.translate(addr_of(0, 1, 9)).val(),
            addr_of(0, 1, 9).val()
        );
        // displaced native lines resolve to the fragment's home
        assert_eq!(
            vg.translate(addr_of(0, 0, 1)).val(),
            addr_of(0, 1, 1).val()
        );
        // native lines beyond the fragment are untouched
        assert_eq!(
            vg.translate(addr_of(0, 0, 10)).val(),
            addr_of(0, 0, 10).val()
        );
    }

    #[test]
    fn test_group_growth_extends_tail_group() {
        let mut vg = VariableGranularity::new(&test_config(4)).unwrap();
        for line in 0..4 {
            vg.track(addr_of(0, 1, line), AccessKind::Read, 0.0).unwrap();
        }
        vg.commit_remapping().unwrap();

        // a later touch further into the block grows the bounding box; the
        // tail group absorbs the extension chunk and stays a power of two
        vg.track(addr_of(0, 1, 10), AccessKind::Read, 0.0).unwrap();
        let request = vg.issue_remapping().unwrap();
        assert_eq!(request.size_lines, 12);
        assert_eq!(request.fast_ha, 4 * LINE_BYTES);
        vg.commit_remapping().unwrap();

        let entry = vg.placement[0];
        assert_eq!(entry.cursor, 1);
        assert_eq!(entry.groups[0].granularity, 16);
        assert_eq!(vg.translate(addr_of(0, 1, 10)).val(), 10 * LINE_BYTES);
    }

    #[test]
    fn test_second_tag_appends_second_group() {
        let mut vg = VariableGranularity::new(&test_config(1)).unwrap();
        vg.track(addr_of(0, 1, 0), AccessKind::Read, 0.0).unwrap();
        vg.commit_remapping().unwrap();
        vg.track(addr_of(0, 2, 5), AccessKind::Read, 0.0).unwrap();
        vg.commit_remapping().unwrap();

        let entry = vg.placement[0];
        assert_eq!(entry.cursor, 2);
        assert_eq!(entry.groups[0], Group { tag: 1, start: 0, granularity: 1 });
        assert_eq!(entry.groups[1], Group { tag: 2, start: 5, granularity: 1 });
        // the second fragment sits behind the first in the fast set
        assert_eq!(vg.translate(addr_of(0, 2, 5)).val(), LINE_BYTES);
    }

    #[test]
    fn test_duplicate_request_widened_not_duplicated() {
        let mut vg = VariableGranularity::new(&test_config(1)).unwrap();
        vg.track(addr_of(0, 1, 0), AccessKind::Read, 0.0).unwrap();
        assert_eq!(vg.queue.len(), 1);
        // growing bounding box, same pair: widen in place
        vg.track(addr_of(0, 1, 1), AccessKind::Read, 0.0).unwrap();
        assert_eq!(vg.queue.len(), 1);
        assert_eq!(vg.issue_remapping().unwrap().size_lines, 2);
    }

    #[test]
    fn test_cold_eviction_on_conflict() {
        let mut vg = VariableGranularity::new(&test_config(1)).unwrap();
        // fill set 0 entirely with tag 1's block
        vg.track(addr_of(0, 1, 0), AccessKind::Read, 0.0).unwrap();
        vg.track(addr_of(0, 1, 63), AccessKind::Read, 0.0).unwrap();
        assert_eq!(vg.issue_remapping().unwrap().size_lines, 64);
        vg.commit_remapping().unwrap();
        assert_eq!(vg.placement[0].free_lines(), 0);

        // decay until tag 1 cools off
        for _ in 0..16 {
            vg.tick();
        }
        assert!(!vg.hot[4]);

        // a new hot tag conflicts: eviction first, no promotion this tick
        vg.track(addr_of(0, 2, 0), AccessKind::Read, 0.0).unwrap();
        let request = vg.issue_remapping().unwrap();
        assert_eq!(request.slow_loc, 0);
        assert_eq!(request.fast_loc, 1);
        assert_eq!(request.size_lines, 64);
        assert_eq!(vg.queue.len(), 1);
        assert_eq!(vg.stats.eviction_success, 1);
        assert_eq!(vg.stats.no_free_space_for_migration, 1);
        vg.commit_remapping().unwrap();
        assert_eq!(vg.placement[0].cursor, 0);

        // with the set empty again, the next access migrates
        vg.track(addr_of(0, 2, 0), AccessKind::Read, 0.0).unwrap();
        let request = vg.issue_remapping().unwrap();
        assert_eq!(request.slow_loc, 2);
        assert_eq!(request.fast_loc, 0);
    }

    #[test]
    fn test_native_access_recovers_displaced_lines() {
        let mut vg = VariableGranularity::new(&test_config(1)).unwrap();
        vg.track(addr_of(0, 1, 0), AccessKind::Read, 0.0).unwrap();
        vg.commit_remapping().unwrap();

        // native line 0 is displaced; touching it requests the recovery swap
        vg.track(addr_of(0, 0, 0), AccessKind::Read, 0.0).unwrap();
        let request = vg.issue_remapping().unwrap();
        assert_eq!(request.fast_loc, 1);
        assert_eq!(request.slow_loc, 0);
        assert_eq!(request.size_lines, 1);
        vg.commit_remapping().unwrap();
        assert_eq!(vg.placement[0].cursor, 0);
        assert_eq!(vg.translate(addr_of(0, 0, 0)).val(), 0);
    }

    #[test]
    fn test_decay_clears_cold_bitmaps() {
        let mut vg = VariableGranularity::new(&test_config(2)).unwrap();
        vg.track(addr_of(1, 1, 3), AccessKind::Read, 0.0).unwrap();
        let block = (1 * 4 + 1) as usize;
        assert_eq!(vg.access[block], 1 << 3);
        for _ in 0..16 {
            vg.tick();
        }
        assert_eq!(vg.counters[block], 0);
        assert_eq!(vg.access[block], 0);
    }
}
