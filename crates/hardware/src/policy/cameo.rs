//! CAMEO: line-granularity congruence-group remapping.
//!
//! Every fast-tier line slot anchors a congruence group of up to five cache
//! lines (one per capacity multiple of the fast tier). At any instant
//! exactly one member of each group occupies the fast slot; the others sit
//! in their slow-tier positions. A packed line-location table (LLT) entry
//! per group records the current permutation in 3-bit fields, and a
//! saturating counter per line drives promote-on-threshold migration.

use tracing::error;

use crate::common::bits::{get_bits, lg2, replace_bits, splice_bits};
use crate::common::constants::{LINE_OFFSET_BITS, QUEUE_BUSY_THRESHOLD};
use crate::common::{AccessKind, HwAddr, PhysAddr, SimError};
use crate::config::Config;
use crate::policy::{PlacementPolicy, PolicyStats, RemapQueue, RemappingRequest};

/// Width in bits of one location field in an LLT entry.
const LOCATION_FIELD_BITS: u32 = 3;

/// Most significant bit of a packed LLT entry.
const ENTRY_MSB: u32 = 15;

/// Maximum congruence-group members a 16-bit entry can describe.
const GROUP_MEMBERS_MAX: u8 = 5;

/// Identity permutation for a five-member group:
/// `000_001_010_011_100_0`: member i at location i, member 0 in fast tier.
const ENTRY_IDENTITY: u16 = 0x0538;

/// Bit range `[msb, lsb]` of member `i`'s location field.
const fn field_range(i: u8) -> (u32, u32) {
    let msb = ENTRY_MSB - LOCATION_FIELD_BITS * i as u32;
    (msb, msb - (LOCATION_FIELD_BITS - 1))
}

/// CAMEO placement policy state.
pub struct Cameo {
    hotness_threshold: u8,
    total_capacity: u64,
    fast_blocks: u64,
    /// `lg2` of the fast-tier capacity; location fields splice in above it.
    fast_offset_bit: u32,
    /// Most significant bit of the congruence-group member index in a byte
    /// address.
    group_msb: u32,
    counters: Vec<u8>,
    hot: Vec<bool>,
    /// One packed entry per fast-tier line slot.
    llt: Vec<u16>,
    queue: RemapQueue,
    colocated: bool,
    cycle: u64,
}

impl Cameo {
    /// Builds the policy from the validated configuration.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let total_capacity = config.total_capacity();
        let fast_capacity = config.fast.capacity_bytes;
        let total_blocks = total_capacity >> LINE_OFFSET_BITS;
        let fast_blocks = fast_capacity >> LINE_OFFSET_BITS;
        let group = total_capacity / fast_capacity;
        if group > u64::from(GROUP_MEMBERS_MAX) {
            return Err(SimError::InvalidConfig(format!(
                "congruence group of {group} members exceeds {GROUP_MEMBERS_MAX}"
            )));
        }
        let fast_offset_bit = lg2(fast_capacity);
        Ok(Self {
            hotness_threshold: config.policy.hotness_threshold,
            total_capacity,
            fast_blocks,
            fast_offset_bit,
            group_msb: LOCATION_FIELD_BITS + fast_offset_bit - 1,
            counters: vec![0; total_blocks as usize],
            hot: vec![false; total_blocks as usize],
            llt: vec![ENTRY_IDENTITY; fast_blocks as usize],
            queue: RemapQueue::new(config.policy.effective_queue_len()),
            colocated: config.policy.colocated_metadata,
            cycle: 0,
        })
    }

    /// Current location of group member `member` in the entry at `index`.
    fn location_of(&self, index: u64, member: u8) -> u8 {
        let (msb, lsb) = field_range(member);
        get_bits(u64::from(self.llt[index as usize]), msb, lsb) as u8
    }

    /// Assembles the byte hardware address of `location` within the group
    /// anchored at LLT `index`.
    fn group_address(&self, index: u64, location: u8) -> u64 {
        replace_bits(
            index << LINE_OFFSET_BITS,
            u64::from(location) << self.fast_offset_bit,
            self.group_msb,
            self.fast_offset_bit,
        )
    }
}

impl PlacementPolicy for Cameo {
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

        let block = raw >> LINE_OFFSET_BITS;
        let index = block % self.fast_blocks;
        let member = (block / self.fast_blocks) as u8;
        if member >= GROUP_MEMBERS_MAX {
            return Err(SimError::PolicyInvariant(format!(
                "group member {member} out of range for address {raw:#x}"
            )));
        }
        let location = self.location_of(index, member);

        let counter = &mut self.counters[block as usize];
        *counter = counter.saturating_add(1);
        if *counter >= self.hotness_threshold {
            self.hot[block as usize] = true;
        }

        // A hot line sitting outside the fast slot is a promotion candidate:
        // swap it with whatever currently occupies location zero.
        if self.hot[block as usize] && location != 0 {
            let fast_member = (0..GROUP_MEMBERS_MAX)
                .find(|&i| self.location_of(index, i) == 0);
            let Some(fast_member) = fast_member else {
                return Err(SimError::PolicyInvariant(format!(
                    "LLT entry {index:#x} has no member in the fast slot: {:#06x}",
                    self.llt[index as usize]
                )));
            };

            let fast_ha = self.group_address(index, 0);
            let slow_ha = self.group_address(index, location);
            let request = RemappingRequest {
                fast_ha,
                slow_ha,
                fast_pa: fast_ha,
                slow_pa: slow_ha,
                fast_loc: fast_member,
                slow_loc: member,
                size_lines: 1,
            };

            // One request per congruence group at a time: a second swap for
            // the same set would race the first one's commit.
            let duplicate = self.queue.iter().any(|queued| {
                (queued.fast_ha >> LINE_OFFSET_BITS) % self.fast_blocks == index
            });

            if !duplicate && queue_busy <= QUEUE_BUSY_THRESHOLD {
                let _ = self.queue.try_enqueue(request)?;
            }
        }

        Ok(())
    }

    fn translate(&self, addr: PhysAddr) -> HwAddr {
        let block = addr.val() >> LINE_OFFSET_BITS;
        let index = block % self.fast_blocks;
        let member = (block / self.fast_blocks) as u8;
        let location = self.location_of(index, member);
        let base = self.group_address(index, location);
        HwAddr(splice_bits(base, addr.val(), LINE_OFFSET_BITS))
    }

    fn translate_meta(&self, addr: PhysAddr) -> Option<HwAddr> {
        if !self.colocated {
            return None;
        }
        // The location entry and data (LEAD) for a group live at its fast
        // slot; the controller reads it before routing a slow-tier access.
        let block = addr.val() >> LINE_OFFSET_BITS;
        let index = block % self.fast_blocks;
        let base = self.group_address(index, 0);
        Some(HwAddr(splice_bits(base, addr.val(), LINE_OFFSET_BITS)))
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

        let block = request.fast_ha >> LINE_OFFSET_BITS;
        let index = (block % self.fast_blocks) as usize;

        let (fast_msb, fast_lsb) = field_range(request.fast_loc);
        let (slow_msb, slow_lsb) = field_range(request.slow_loc);
        let entry = u64::from(self.llt[index]);
        let fast_location = get_bits(entry, fast_msb, fast_lsb);
        let slow_location = get_bits(entry, slow_msb, slow_lsb);
        if fast_location == slow_location {
            return Err(SimError::PolicyInvariant(format!(
                "LLT entry {index:#x} already maps both swap members to \
                 location {fast_location}: {entry:#06x}"
            )));
        }

        let entry = replace_bits(entry, fast_location << slow_lsb, slow_msb, slow_lsb);
        let entry = replace_bits(entry, slow_location << fast_lsb, fast_msb, fast_lsb);
        self.llt[index] = entry as u16;
        Ok(())
    }

    fn tick(&mut self) {
        self.cycle += 1;
    }

    fn stats(&self) -> PolicyStats {
        PolicyStats {
            queue_congestion: self.queue.congestion,
            ..PolicyStats::default()
        }
    }

    fn dump_state(&self) {
        error!(
            cycle = self.cycle,
            queued = self.queue.len(),
            congestion = self.queue.congestion,
            "cameo: dump"
        );
        if let Some(head) = self.queue.peek() {
            error!(
                fast_ha = format_args!("{:#x}", head.fast_ha),
                slow_ha = format_args!("{:#x}", head.slow_ha),
                size = head.size_lines,
                "cameo: head remapping request"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::data::AccessKind;
    use crate::config::PolicyKind;

    const MIB: u64 = 1024 * 1024;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.fast.capacity_bytes = 256 * MIB;
        config.slow.capacity_bytes = 768 * MIB;
        config.policy.kind = PolicyKind::Cameo;
        config.policy.hotness_threshold = 1;
        config
    }

    #[test]
    fn test_identity_translation_before_any_swap() {
        let cameo = Cameo::new(&test_config()).unwrap();
        for addr in [0u64, 0x40, 256 * MIB, 512 * MIB + 0x1C0] {
            assert_eq!(cameo.translate(PhysAddr(addr)).val(), addr);
        }
    }

    #[test]
    fn test_promote_on_threshold() {
        let mut cameo = Cameo::new(&test_config()).unwrap();
        // set 0, member 1, line offset 0
        cameo.track(PhysAddr(0x1000_0000), AccessKind::Read, 0.0).unwrap();

        let request = cameo.issue_remapping().unwrap();
        assert_eq!(request.fast_ha, 0x0000_0000);
        assert_eq!(request.slow_ha, 0x1000_0000);
        assert_eq!(request.size_lines, 1);
        assert_eq!(request.fast_loc, 0);
        assert_eq!(request.slow_loc, 1);
    }

    #[test]
    fn test_commit_swaps_translation() {
        let mut cameo = Cameo::new(&test_config()).unwrap();
        cameo.track(PhysAddr(0x1000_0000), AccessKind::Read, 0.0).unwrap();
        cameo.commit_remapping().unwrap();

        assert_eq!(cameo.translate(PhysAddr(0x1000_0000)).val(), 0x0000_0000);
        assert_eq!(cameo.translate(PhysAddr(0x0000_0000)).val(), 0x1000_0000);
        // line offsets are spliced through untouched
        assert_eq!(cameo.translate(PhysAddr(0x1000_0008)).val(), 0x8);
        assert!(cameo.issue_remapping().is_none());
    }

    #[test]
    fn test_duplicate_set_not_enqueued_twice() {
        let mut cameo = Cameo::new(&test_config()).unwrap();
        cameo.track(PhysAddr(0x1000_0000), AccessKind::Read, 0.0).unwrap();
        // member 2 of the same congruence group
        cameo.track(PhysAddr(0x2000_0000), AccessKind::Read, 0.0).unwrap();
        let _ = cameo.issue_remapping().unwrap();
        cameo.commit_remapping().unwrap();
        assert!(cameo.issue_remapping().is_none());
    }

    #[test]
    fn test_backpressure_suppresses_enqueue() {
        let mut cameo = Cameo::new(&test_config()).unwrap();
        cameo.track(PhysAddr(0x1000_0000), AccessKind::Read, 0.95).unwrap();
        assert!(cameo.issue_remapping().is_none());
    }

    #[test]
    fn test_out_of_range_address_fails_loudly() {
        let mut cameo = Cameo::new(&test_config()).unwrap();
        let err = cameo.track(PhysAddr(1 << 40), AccessKind::Read, 0.0);
        assert!(matches!(err, Err(SimError::AddressOutOfRange { .. })));
    }

    #[test]
    fn test_colocated_metadata_address() {
        let mut config = test_config();
        config.policy.colocated_metadata = true;
        let cameo = Cameo::new(&config).unwrap();
        // the metadata for any group member lives at the group's fast slot
        assert_eq!(
            cameo.translate_meta(PhysAddr(0x1000_0040)).unwrap().val(),
            0x40
        );
        assert_eq!(cameo.translate_meta(PhysAddr(0x40)).unwrap().val(), 0x40);
    }
}
