// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Tier 3 Property-Based Tests: Membership State
//!
//! These tests use the `proptest` framework to drive an instance with
//! generated report sequences and check the resulting state against the set
//! algebra of the protocol.
//!
//! # Coverage
//!
//! - **Exclude mode:** with no time passing, a sequence of IS_EX reports
//!   leaves exactly the intersection of their source sets blocked.
//! - **Include to Exclude:** IS_EX(A) on an Include group with sources B
//!   blocks A - B at once, keeps A * B running on their old timers and
//!   drops B - A.
//! - **Include mode:** every source ever reported is forwarded.
//! - **Notification coalescing:** an undrained client holds at most one
//!   notification per channel, and draining yields each channel once.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gmp_router::logging::{Logger, MemorySink, Severity};
use gmp_router::protocols::router::{
    ClientOptions, DefaultHooks, Instance, InstanceParams, IntfId, IntfRegistry, NotificationType,
};
use gmp_router::protocols::{GroupRecord, Packet, Proto, RecordType, Version};
use proptest::prelude::*;

const INTF: IntfId = IntfId(1);

fn instance(now: Instant) -> Instance {
    let logger = Logger::memory(Arc::new(MemorySink::new(64)), Severity::Warning);
    let mut inst = Instance::new(
        Proto::Igmp,
        InstanceParams::default(),
        IntfRegistry::new(),
        Box::new(DefaultHooks),
        logger,
        now,
    );
    inst.attach_intf(INTF, now).unwrap();
    inst.update_intf_state(INTF, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))), now)
        .unwrap();
    inst
}

fn source(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 0, 2, n))
}

fn group(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(232, 0, 0, n))
}

fn report(rec_type: RecordType, group: IpAddr, sources: &BTreeSet<u8>) -> Packet {
    Packet::report(
        Version::Sources,
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 20)),
        vec![GroupRecord::new(
            rec_type,
            group,
            sources.iter().map(|n| source(*n)).collect(),
        )],
    )
}

fn source_sets() -> impl Strategy<Value = Vec<BTreeSet<u8>>> {
    prop::collection::vec(prop::collection::btree_set(1u8..8, 0..5), 1..6)
}

proptest! {
    /// **Property:** IS_EX reports without elapsed time block the
    /// intersection of their source sets and forward everything else.
    #[test]
    fn test_exclude_blocks_intersection(sets in source_sets()) {
        let now = Instant::now();
        let mut inst = instance(now);
        let g = IpAddr::V4(Ipv4Addr::new(239, 0, 0, 1));
        for set in &sets {
            inst.receive_packet(INTF, &report(RecordType::IsExclude, g, set), now).unwrap();
        }
        let blocked = sets
            .iter()
            .skip(1)
            .fold(sets[0].clone(), |acc, s| acc.intersection(s).copied().collect());
        for n in 1u8..8 {
            let s = source(n);
            prop_assert_eq!(inst.sg_is_excluded(INTF, g, s).unwrap(), blocked.contains(&n));
            prop_assert_eq!(
                inst.is_forwarding_channel(INTF, Some(s), g, false).unwrap(),
                !blocked.contains(&n)
            );
        }
        prop_assert!(inst.is_forwarding_channel(INTF, None, g, false).unwrap());
    }

    /// **Property:** Switching an Include group to Exclude splits its
    /// sources by the new report.
    #[test]
    fn test_include_to_exclude_splits_sources(
        a in prop::collection::btree_set(1u8..8, 0..5),
        b in prop::collection::btree_set(1u8..8, 1..5),
    ) {
        let start = Instant::now();
        let mut inst = instance(start);
        let g = IpAddr::V4(Ipv4Addr::new(239, 0, 0, 2));
        inst.receive_packet(INTF, &report(RecordType::IsInclude, g, &b), start).unwrap();

        let switch = start + Duration::from_secs(10);
        inst.run_timers(switch);
        inst.receive_packet(INTF, &report(RecordType::IsExclude, g, &a), switch).unwrap();
        for n in 1u8..8 {
            let blocked = a.contains(&n) && !b.contains(&n);
            prop_assert_eq!(inst.sg_is_excluded(INTF, g, source(n)).unwrap(), blocked);
            prop_assert_eq!(
                inst.is_forwarding_channel(INTF, Some(source(n)), g, false).unwrap(),
                !blocked
            );
        }

        // The intersection still runs on the timers of the Include report:
        // once they lapse, with the group timer still running, every source
        // of A is blocked and nothing else is
        let gmi = Duration::from_secs(260);
        inst.run_timers(start + gmi);
        for n in 1u8..8 {
            prop_assert_eq!(inst.sg_is_excluded(INTF, g, source(n)).unwrap(), a.contains(&n));
        }
        prop_assert!(inst.is_forwarding_channel(INTF, None, g, false).unwrap());
    }

    /// **Property:** Include mode forwards the union of reported sources.
    #[test]
    fn test_include_forwards_union(sets in source_sets()) {
        let now = Instant::now();
        let mut inst = instance(now);
        let g = group(1);
        let mut wanted = BTreeSet::new();
        for (i, set) in sets.iter().enumerate() {
            let rec_type = if i % 2 == 0 { RecordType::IsInclude } else { RecordType::AllowNew };
            inst.receive_packet(INTF, &report(rec_type, g, set), now).unwrap();
            wanted.extend(set.iter().copied());
        }
        for n in 1u8..8 {
            prop_assert_eq!(
                inst.is_forwarding_channel(INTF, Some(source(n)), g, true).unwrap(),
                wanted.contains(&n)
            );
        }
        prop_assert!(!inst.is_forwarding_channel(INTF, None, g, false).unwrap());
    }

    /// **Property:** Notifications coalesce to one per channel.
    #[test]
    fn test_notifications_coalesce_per_channel(
        reports in prop::collection::vec((1u8..4, prop::collection::btree_set(1u8..6, 1..4)), 1..12)
    ) {
        let now = Instant::now();
        let mut inst = instance(now);
        let client = inst.register_client(ClientOptions::default(), now).unwrap();
        inst.run_timers(now);

        let mut channels = BTreeSet::new();
        for (g, sources) in &reports {
            inst.receive_packet(INTF, &report(RecordType::IsInclude, group(*g), sources), now)
                .unwrap();
            channels.extend(sources.iter().map(|s| (group(*g), source(*s))));
        }
        prop_assert_eq!(inst.pending_notifications(client).unwrap(), channels.len());

        let mut seen = BTreeSet::new();
        let mut prev = None;
        while let Some(notification) = inst.get_notification(client, prev.take()).unwrap() {
            prop_assert_eq!(notification.kind, NotificationType::AllowSource);
            let channel = (notification.group.unwrap(), notification.source.unwrap());
            prop_assert!(seen.insert(channel));
            prev = Some(notification);
        }
        prop_assert_eq!(seen, channels);
        prop_assert_eq!(inst.pending_notifications(client).unwrap(), 0);
    }
}
