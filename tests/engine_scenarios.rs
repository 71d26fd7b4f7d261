// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Membership scenarios driven end to end through the driver.
//!
//! Each test feeds reports and queries into a [`GmpDriver`] in virtual time
//! and checks what comes out: transmitted queries, client notifications and
//! the forwarding state visible through the introspection calls.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gmp_router::config::Config;
use gmp_router::logging::{Logger, MemorySink, Severity};
use gmp_router::protocols::router::{
    ClientId, ClientNotification, ClientOptions, HostNotificationType, Instance, IntfGroupInfo,
    IntfId, IntfRegistry, LimitState, NotificationType, QueryPacket, RouterEvent,
};
use gmp_router::protocols::{FilterMode, GroupRecord, Packet, QueryBody, RecordType, Version};
use gmp_router::supervisor::{GmpDriver, Response, SupervisorCommand, SupervisorOutput};

const INTF: IntfId = IntfId(1);

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// A driver plus a virtual clock
struct Harness {
    driver: GmpDriver,
    now: Instant,
    outputs: Vec<SupervisorOutput>,
}

impl Harness {
    fn new(config: &str) -> Self {
        let config = Config::parse(config).unwrap();
        let now = Instant::now();
        let logger = Logger::memory(Arc::new(MemorySink::new(1024)), Severity::Info);
        let driver = GmpDriver::from_config(&config, IntfRegistry::new(), logger, now).unwrap();
        Self {
            driver,
            now,
            outputs: Vec::new(),
        }
    }

    fn with_intf() -> Self {
        Self::new(r#"{ interfaces: [{ id: 1, address: "10.0.0.1" }] }"#)
    }

    /// Apply a command and settle anything due right now
    fn command(&mut self, command: SupervisorCommand) -> Response {
        let (outputs, _) = self.driver.handle(command, self.now);
        let mut outputs = outputs.into_iter();
        let response = match outputs.next() {
            Some(SupervisorOutput::Response { response }) => response,
            other => panic!("expected a response first, got {:?}", other),
        };
        self.outputs.extend(outputs);
        self.advance(Duration::ZERO);
        response
    }

    fn register(&mut self, options: ClientOptions) -> ClientId {
        match self.command(SupervisorCommand::RegisterClient { options }) {
            Response::Client { client } => client,
            other => panic!("registration failed: {:?}", other),
        }
    }

    fn report(&mut self, host: &str, rec_type: RecordType, group: IpAddr, sources: &[IpAddr]) {
        let packet = Packet::report(
            Version::Sources,
            ip(host),
            vec![GroupRecord::new(rec_type, group, sources.to_vec())],
        );
        let response = self.command(SupervisorCommand::ReceivePacket { intf: INTF, packet });
        assert_eq!(response, Response::Success);
    }

    /// Run every timer due within `by`, each at its own deadline
    fn advance(&mut self, by: Duration) {
        let target = self.now + by;
        while let Some(deadline) = self.driver.next_deadline() {
            if deadline > target {
                break;
            }
            self.now = self.now.max(deadline);
            let outputs = self.driver.tick(deadline);
            self.outputs.extend(outputs);
        }
        self.now = target;
    }

    fn take_notifications(&mut self) -> Vec<ClientNotification> {
        let mut taken = Vec::new();
        self.outputs.retain(|o| match o {
            SupervisorOutput::Notification { notification, .. } => {
                taken.push(notification.clone());
                false
            }
            _ => true,
        });
        taken
    }

    fn take_queries(&mut self) -> Vec<QueryPacket> {
        let mut taken = Vec::new();
        self.outputs.retain(|o| match o {
            SupervisorOutput::Transmit { packet } => {
                taken.push(packet.clone());
                false
            }
            _ => true,
        });
        taken
    }

    /// Group-specific and group-and-source queries for one group
    fn take_group_queries(&mut self, group: IpAddr) -> Vec<QueryPacket> {
        self.take_queries()
            .into_iter()
            .filter(|q| q.group == Some(group))
            .collect()
    }

    fn flag(&mut self, command: SupervisorCommand) -> bool {
        match self.command(command) {
            Response::Flag { value } => value,
            other => panic!("expected a flag, got {:?}", other),
        }
    }

    fn forwarding(&mut self, source: Option<IpAddr>, group: IpAddr) -> bool {
        self.flag(SupervisorCommand::IsForwardingChannel {
            intf: INTF,
            source,
            group,
            exact: false,
        })
    }

    fn groups(&mut self) -> Vec<IntfGroupInfo> {
        match self.command(SupervisorCommand::GetIntfGroups { intf: INTF }) {
            Response::Groups { groups } => groups,
            other => panic!("expected groups, got {:?}", other),
        }
    }
}

fn kinds(notifications: &[ClientNotification]) -> Vec<(NotificationType, Option<IpAddr>)> {
    notifications.iter().map(|n| (n.kind, n.source)).collect()
}

#[test]
fn test_include_block_queries_then_drops_source() {
    let mut h = Harness::with_intf();
    h.register(ClientOptions::default());
    let g = ip("232.1.1.1");
    let (s1, s2) = (ip("192.0.2.1"), ip("192.0.2.2"));

    h.report("10.0.0.20", RecordType::IsInclude, g, &[s1, s2]);
    assert_eq!(
        kinds(&h.take_notifications()),
        vec![
            (NotificationType::AllowSource, Some(s1)),
            (NotificationType::AllowSource, Some(s2)),
        ]
    );

    h.advance(Duration::from_secs(1));
    h.take_queries();
    h.report("10.0.0.20", RecordType::BlockOld, g, &[s1]);

    // Last member query count (robustness 2) queries, one per second
    h.advance(Duration::from_millis(1500));
    let queries = h.take_group_queries(g);
    assert_eq!(queries.len(), 2);
    for query in &queries {
        assert_eq!(query.group, Some(g));
        assert_eq!(query.sources, vec![s1]);
        assert!(!query.suppress);
    }
    assert!(h.take_notifications().is_empty());
    assert!(h.forwarding(Some(s1), g));

    // Nobody answered within the last member query time
    h.advance(Duration::from_secs(1));
    assert_eq!(
        kinds(&h.take_notifications()),
        vec![(NotificationType::BlockSource, Some(s1))]
    );
    assert!(!h.forwarding(Some(s1), g));
    assert!(h.forwarding(Some(s2), g));
    assert_eq!(
        h.groups(),
        vec![IntfGroupInfo {
            group: g,
            filter_mode: FilterMode::Include,
            sources: vec![s2],
        }]
    );
}

#[test]
fn test_repeated_report_is_idempotent() {
    let mut h = Harness::with_intf();
    h.register(ClientOptions::default());
    let g = ip("232.1.1.2");
    let s = ip("192.0.2.10");

    h.report("10.0.0.20", RecordType::IsInclude, g, &[s]);
    assert_eq!(h.take_notifications().len(), 1);
    h.report("10.0.0.20", RecordType::IsInclude, g, &[s]);
    h.report("10.0.0.21", RecordType::AllowNew, g, &[s]);
    assert!(h.take_notifications().is_empty());
    assert!(h.take_queries().is_empty());
}

#[test]
fn test_exclude_leave_times_out_group() {
    let mut h = Harness::with_intf();
    h.register(ClientOptions::default());
    let g = ip("239.1.1.1");

    h.report("10.0.0.20", RecordType::IsExclude, g, &[]);
    let notifications = h.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationType::GroupAddExclude);
    assert_eq!(notifications[0].group, Some(g));
    assert!(h.forwarding(None, g));

    h.advance(Duration::from_secs(3));
    h.take_queries();
    h.report("10.0.0.20", RecordType::ToInclude, g, &[]);

    h.advance(Duration::from_millis(1500));
    let queries = h.take_group_queries(g);
    assert_eq!(queries.len(), 2);
    assert!(queries.iter().all(|q| q.sources.is_empty()));
    assert!(h.take_notifications().is_empty());

    h.advance(Duration::from_secs(1));
    let notifications = h.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationType::GroupDelete);
    assert!(!h.forwarding(None, g));
    assert!(h.groups().is_empty());
}

#[test]
fn test_exclude_to_exclude_replaces_blocked_set() {
    let mut h = Harness::with_intf();
    h.register(ClientOptions::default());
    let g = ip("239.1.1.2");
    let (s1, s2) = (ip("192.0.2.1"), ip("192.0.2.2"));

    h.report("10.0.0.20", RecordType::IsExclude, g, &[s1]);
    assert_eq!(
        kinds(&h.take_notifications()),
        vec![
            (NotificationType::GroupAddExclude, None),
            (NotificationType::BlockSource, Some(s1)),
        ]
    );
    assert!(h.flag(SupervisorCommand::SgIsExcluded {
        intf: INTF,
        group: g,
        source: s1
    }));

    h.report("10.0.0.20", RecordType::ToExclude, g, &[s2]);
    // s1 is wanted again at once; s2 is only blocked once its query goes
    // unanswered
    assert!(h.forwarding(Some(s1), g));
    assert!(h.forwarding(Some(s2), g));
    let queries = h.take_queries();
    assert!(queries
        .iter()
        .any(|q| q.group == Some(g) && q.sources == vec![s2]));

    h.advance(Duration::from_secs(3));
    assert!(!h.forwarding(Some(s2), g));
    assert!(h.forwarding(Some(s1), g));
    assert!(h.flag(SupervisorCommand::SgIsExcluded {
        intf: INTF,
        group: g,
        source: s2
    }));
    let last = h.take_notifications().pop().unwrap();
    assert_eq!(last.kind, NotificationType::BlockSource);
    assert_eq!(last.source, Some(s2));
    assert!(last.last_sg);
}

#[test]
fn test_fast_leave_drops_group_without_queries() {
    let mut h = Harness::new(
        r#"{ interfaces: [{ id: 1, address: "10.0.0.1", fast_leave: true }] }"#,
    );
    let client = h.register(ClientOptions {
        host_notifications: true,
        ..ClientOptions::default()
    });
    let g = ip("239.1.1.3");

    h.report("10.0.0.21", RecordType::IsExclude, g, &[]);
    h.report("10.0.0.22", RecordType::IsExclude, g, &[]);
    match h.command(SupervisorCommand::GetIntfHosts { intf: INTF }) {
        Response::Hosts { hosts } => assert_eq!(hosts.len(), 2),
        other => panic!("expected hosts, got {:?}", other),
    }
    h.advance(Duration::from_secs(3));
    h.take_notifications();
    h.take_queries();

    h.report("10.0.0.21", RecordType::ToInclude, g, &[]);
    assert!(h.forwarding(None, g));
    assert!(h.take_notifications().is_empty());

    h.report("10.0.0.22", RecordType::ToInclude, g, &[]);
    assert!(!h.forwarding(None, g));
    let notifications = h.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationType::GroupDelete);
    assert!(h.take_queries().iter().all(|q| q.group != Some(g)));

    let host_events: Vec<_> = h
        .outputs
        .iter()
        .filter_map(|o| match o {
            SupervisorOutput::HostNotification {
                client: c,
                notification,
            } if *c == client => Some((notification.kind, notification.host)),
            _ => None,
        })
        .collect();
    assert!(host_events.contains(&(HostNotificationType::Join, ip("10.0.0.21"))));
    assert!(host_events.contains(&(HostNotificationType::Leave, ip("10.0.0.21"))));
}

#[test]
fn test_lower_address_takes_over_as_querier() {
    let mut h = Harness::new(r#"{ interfaces: [{ id: 1, address: "10.0.0.5" }] }"#);
    h.advance(Duration::from_secs(3));
    assert_eq!(h.take_queries().len(), 2);

    let query = Packet::query(
        Version::Sources,
        ip("10.0.0.2"),
        QueryBody {
            max_resp: Duration::from_secs(10),
            qrv: 2,
            qqi: Duration::from_secs(125),
            ..QueryBody::default()
        },
    );
    h.command(SupervisorCommand::ReceivePacket {
        intf: INTF,
        packet: query,
    });
    assert_eq!(
        h.command(SupervisorCommand::GetQuerier { intf: INTF }),
        Response::Querier {
            querier: false,
            address: Some(ip("10.0.0.2")),
            limit_state: LimitState::BelowThreshold,
        }
    );

    // Other querier present interval: 2 * 125s + 10s / 2
    h.advance(Duration::from_secs(254));
    assert!(h.take_queries().is_empty());

    h.advance(Duration::from_secs(2));
    let queries = h.take_queries();
    assert!(!queries.is_empty());
    assert!(queries.iter().all(|q| q.group.is_none()));
    assert_eq!(
        h.command(SupervisorCommand::GetQuerier { intf: INTF }),
        Response::Querier {
            querier: true,
            address: Some(ip("10.0.0.5")),
            limit_state: LimitState::BelowThreshold,
        }
    );
}

#[test]
fn test_channel_limit_refuses_new_groups() {
    let mut h = Harness::new(
        r#"{ interfaces: [{ id: 1, address: "10.0.0.1", channel_limit: 2 }] }"#,
    );
    h.register(ClientOptions::default());
    let (g1, g2) = (ip("232.1.1.1"), ip("232.1.1.2"));
    let sources = [ip("192.0.2.1"), ip("192.0.2.2")];

    h.report("10.0.0.20", RecordType::IsInclude, g1, &sources);
    h.report("10.0.0.20", RecordType::IsInclude, g2, &[ip("192.0.2.3")]);

    assert!(!h.forwarding(Some(ip("192.0.2.3")), g2));
    assert_eq!(h.groups().len(), 1);
    assert!(h.outputs.iter().any(|o| matches!(
        o,
        SupervisorOutput::Event {
            event: RouterEvent::GroupLimitExceeded { count: 2, limit: 2, .. }
        }
    )));
    match h.command(SupervisorCommand::GetIntfStats { intf: INTF }) {
        Response::Stats { stats } => assert_eq!(stats.chan_limit_drops, 1),
        other => panic!("expected stats, got {:?}", other),
    }
    assert!(h.flag(SupervisorCommand::ChkGrpLimit { intf: INTF }));
}

#[test]
fn test_deleted_source_outlives_slow_client() {
    let mut h = Harness::with_intf();
    let now = h.now;
    let inst = h.driver.instance_mut();
    let fast = inst.register_client(ClientOptions::default(), now).unwrap();
    let slow = inst.register_client(ClientOptions::default(), now).unwrap();
    inst.run_timers(now);

    let g = ip("232.1.2.1");
    let s = ip("192.0.2.7");
    let report = |rec_type, sources: Vec<IpAddr>| {
        Packet::report(
            Version::Sources,
            ip("10.0.0.20"),
            vec![GroupRecord::new(rec_type, g, sources)],
        )
    };
    inst.receive_packet(INTF, &report(RecordType::IsInclude, vec![s]), now)
        .unwrap();
    inst.receive_packet(INTF, &report(RecordType::ToInclude, vec![]), now)
        .unwrap();
    let later = now + Duration::from_secs(3);
    inst.run_timers(later);

    // The allow was superseded in place; a group delete follows
    assert_eq!(inst.pending_notifications(fast).unwrap(), 2);
    assert_eq!(inst.pending_notifications(slow).unwrap(), 2);

    let drain = |inst: &mut Instance, client| {
        let block = inst.get_notification(client, None).unwrap().unwrap();
        assert_eq!(block.kind, NotificationType::BlockSource);
        assert_eq!(block.source, Some(s));
        assert!(block.last_sg);
        let delete = inst.get_notification(client, Some(block)).unwrap().unwrap();
        assert_eq!(delete.kind, NotificationType::GroupDelete);
        assert_eq!(delete.group, Some(g));
        assert_eq!(inst.get_notification(client, Some(delete)).unwrap(), None);
    };

    // The first client is done; the deleted source must still describe
    // itself to the second
    drain(inst, fast);
    assert_eq!(inst.pending_notifications(fast).unwrap(), 0);
    assert_eq!(inst.pending_notifications(slow).unwrap(), 2);
    drain(inst, slow);
    assert_eq!(inst.pending_notifications(slow).unwrap(), 0);
    assert!(!inst.is_forwarding_channel(INTF, Some(s), g, false).unwrap());
    assert!(inst.get_intf_groups(INTF).unwrap().is_empty());
}

#[test]
fn test_refresh_replays_state() {
    let mut h = Harness::with_intf();
    let client = h.register(ClientOptions::default());
    let g = ip("239.1.1.9");
    h.report("10.0.0.20", RecordType::IsExclude, g, &[]);
    h.take_notifications();

    assert_eq!(
        h.command(SupervisorCommand::Refresh {
            client,
            flush: true
        }),
        Response::Success
    );
    assert_eq!(
        kinds(&h.take_notifications()),
        vec![
            (NotificationType::GroupAddExclude, None),
            (NotificationType::RefreshEnd, None),
        ]
    );
}
