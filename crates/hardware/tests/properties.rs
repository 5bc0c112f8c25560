//! Property tests: data fidelity under arbitrary access interleavings and
//! translation bijectivity under arbitrary migration histories.

use std::collections::HashMap;

use proptest::prelude::*;

use tiersim_core::common::data::{AccessKind, Packet};
use tiersim_core::common::PhysAddr;
use tiersim_core::config::{Config, PolicyKind};
use tiersim_core::mem::controller::AddResult;
use tiersim_core::mem::HybridController;
use tiersim_core::policy::build_policy;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

fn small_config(kind: PolicyKind) -> Config {
    let mut config = Config::default();
    config.fast.capacity_bytes = MIB;
    config.slow.capacity_bytes = 3 * MIB;
    config.policy.kind = kind;
    config.policy.hotness_threshold = 1;
    config
}

/// One randomly generated access.
#[derive(Clone, Copy, Debug)]
enum Op {
    Read(u64),
    Write(u64, u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // a handful of line addresses spread over both tiers and sharing
    // congruence groups, to force migrations to collide with traffic
    let addrs = prop_oneof![
        (0u64..16).prop_map(|i| i * 64),
        (0u64..16).prop_map(|i| MIB + i * 64),
        (0u64..16).prop_map(|i| 2 * MIB + i * 64),
    ];
    prop_oneof![
        addrs.clone().prop_map(Op::Read),
        (addrs, 1u64..u64::MAX).prop_map(|(addr, data)| Op::Write(addr, data)),
    ]
}

/// Applies one access, retrying through backpressure, and returns the data
/// for reads.
fn apply(controller: &mut HybridController, op: Op, id: u64) -> Option<u64> {
    let packet = match op {
        Op::Read(addr) => Packet::new(PhysAddr(addr), AccessKind::Read, 0, id),
        Op::Write(addr, data) => {
            let mut packet = Packet::new(PhysAddr(addr), AccessKind::Write, 0, id);
            packet.data = data;
            packet
        }
    };
    for _ in 0..100_000 {
        let result = match packet.kind {
            AccessKind::Read => controller.add_read(packet).unwrap(),
            AccessKind::Write => controller.add_write(packet).unwrap(),
        };
        match result {
            AddResult::Full => controller.operate().unwrap(),
            AddResult::Forwarded | AddResult::Accepted(_) => {
                if packet.kind == AccessKind::Write {
                    return None;
                }
                for _ in 0..100_000 {
                    for done in controller.pop_completed() {
                        if done.id == id {
                            return Some(done.data);
                        }
                    }
                    controller.operate().unwrap();
                }
                panic!("read {id} did not complete");
            }
        }
    }
    panic!("request starved");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Reads always return the most recently written value, no matter how
    /// migrations interleave with the traffic.
    #[test]
    fn reads_observe_latest_writes(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        for kind in [PolicyKind::Cameo, PolicyKind::VariableGranularity] {
            let mut controller = HybridController::new(&small_config(kind)).unwrap();
            let mut model: HashMap<u64, u64> = HashMap::new();
            for (i, &op) in ops.iter().enumerate() {
                match op {
                    Op::Write(addr, data) => {
                        let _ = apply(&mut controller, op, i as u64);
                        let _ = model.insert(addr, data);
                        // let the write land before the next operation so
                        // the model stays a valid oracle
                        for _ in 0..64 {
                            controller.operate().unwrap();
                        }
                    }
                    Op::Read(addr) => {
                        let data = apply(&mut controller, op, i as u64).unwrap();
                        let expected = model.get(&addr).copied().unwrap_or(0);
                        prop_assert_eq!(data, expected, "PA {:#x} under {:?}", addr, kind);
                    }
                }
            }
        }
    }

    /// Translation stays a bijection over the line space regardless of the
    /// migration history.
    #[test]
    fn translation_remains_bijective(
        accesses in proptest::collection::vec(0u64..(256 * KIB / 64), 1..80)
    ) {
        let mut config = small_config(PolicyKind::Cameo);
        config.fast.capacity_bytes = 64 * KIB;
        config.slow.capacity_bytes = 192 * KIB;
        let mut policy = build_policy(&config).unwrap();

        for &line in &accesses {
            policy.track(PhysAddr(line * 64), AccessKind::Read, 0.0).unwrap();
            // commit immediately, as a zero-latency swapping unit would
            while policy.issue_remapping().is_some() {
                policy.commit_remapping().unwrap();
            }
        }

        let mut seen = HashMap::new();
        for line in 0..(256 * KIB / 64) {
            let hw = policy.translate(PhysAddr(line * 64)).val();
            prop_assert_eq!(hw % 64, 0);
            let previous = seen.insert(hw, line);
            prop_assert!(
                previous.is_none(),
                "lines {:?} and {} both translate to {:#x}",
                previous,
                line,
                hw
            );
        }
    }
}
