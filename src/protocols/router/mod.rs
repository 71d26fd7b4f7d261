// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Router-side group membership engine
//!
//! One [`Instance`] serves one protocol (IGMP or MLD). It owns its attached
//! interfaces, the per-interface input groups learned from reports, the
//! output groups that describe actual forwarding state (after any interface
//! remapping), optional per-host tracking, and the registered clients with
//! their pending notification queues.
//!
//! The instance is sans-IO. Embedders feed it decoded packets and the current
//! time, run its timers, pull queries to transmit with [`Instance::xmit`], and
//! drain [`RouterEvent`]s with [`Instance::take_events`]. All entry points are
//! expected to run serialized on one task.
//!
//! ## Flow
//!
//! ```text
//! receive_packet ─► report/query processing ─► input group state
//!                                                   │
//!                        OIF mapping (hooks) ◄──────┘
//!                                │
//!                  output group state ─► client queues ─► NotificationsReady
//!
//! run_timers ─► group/source/query expiries ─► xmit flags ─► StartXmit ─► xmit
//! ```

pub mod client;
mod engine;
pub mod group;
pub mod hooks;
pub mod host;
pub mod intf;
mod introspect;
pub mod oif;
pub mod registry;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{Facility, Logger, Severity};
use crate::protocols::addr::{AddrCatalog, Ordinal};
use crate::protocols::timers::TimerQueue;
use crate::protocols::{Proto, Version};
use crate::{log_debug, log_info};

pub use client::{
    ClientNotification, ClientOptions, HostNotification, HostNotificationType, NotificationType,
};
pub use hooks::{DefaultHooks, OifRule, PolicyRule, RouterHooks, StaticHooks};
pub use intf::{IntfParams, LimitState};
pub use introspect::{HostGroupInfo, IntfGroupInfo, IntfHostInfo, IntfListMode, IntfStats};
pub use registry::IntfRegistry;

use client::Client;
use host::Host;
use intf::Intf;

/// Interface identifier, assigned by the embedder
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IntfId(pub u32);

impl fmt::Display for IntfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered client handle (a small dense ordinal)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instance identifier, handed out by the interface registry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors returned to callers of the instance API
///
/// Protocol problems in received packets are never errors; they are dropped
/// or harmonized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GmpError {
    #[error("interface {0} is already attached")]
    IntfExists(IntfId),
    #[error("interface {0} is not attached to this instance")]
    UnknownIntf(IntfId),
    #[error("client {0} is not registered")]
    UnknownClient(ClientId),
    #[error("client limit of {0} reached")]
    TooManyClients(usize),
    #[error("address {addr} does not belong to protocol {proto}")]
    AddressFamily { proto: Proto, addr: IpAddr },
    #[error("prefix length {0} is out of range")]
    BadPrefix(u8),
}

/// Instance-wide tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceParams {
    /// Maximum number of registered clients
    pub max_clients: usize,
    /// Startup bursts beyond this many interfaces use the normal query interval
    pub many_intfs_threshold: usize,
    /// Period of the general query smear
    pub smear_interval: Duration,
    /// Smear delay after an interface starts a query burst
    pub quick_smear_interval: Duration,
}

pub const DEFAULT_MAX_CLIENTS: usize = 32;
pub const DEFAULT_MANY_INTFS: usize = 100;
pub const DEFAULT_SMEAR_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_QUICK_SMEAR_INTERVAL: Duration = Duration::from_secs(10);

impl Default for InstanceParams {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            many_intfs_threshold: DEFAULT_MANY_INTFS,
            smear_interval: DEFAULT_SMEAR_INTERVAL,
            quick_smear_interval: DEFAULT_QUICK_SMEAR_INTERVAL,
        }
    }
}

/// Side effects the embedder must act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouterEvent {
    /// The client's notification queue went from empty to non-empty
    NotificationsReady { client: ClientId },
    /// Same, for the host notification queue
    HostNotificationsReady { client: ClientId },
    /// Querier status changed on an interface
    QuerierChange {
        client: ClientId,
        intf: IntfId,
        querier: bool,
        querier_addr: Option<IpAddr>,
    },
    /// The interface has something to send; call `xmit` until it returns `None`
    StartXmit { intf: IntfId },
    /// A query was heard with a version other than the configured one
    VersionMismatch {
        intf: IntfId,
        configured: Version,
        received: Version,
        src: IpAddr,
    },
    GroupLimitExceeded { intf: IntfId, count: u32, limit: u32 },
    GroupThresholdExceeded {
        intf: IntfId,
        count: u32,
        threshold: u32,
        limit: u32,
    },
    GroupLimitBelow { intf: IntfId, count: u32, limit: u32 },
}

/// A query the engine wants transmitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPacket {
    pub intf: IntfId,
    pub version: Version,
    /// `None` for a general query
    pub group: Option<IpAddr>,
    pub sources: Vec<IpAddr>,
    #[serde(with = "crate::protocols::duration_ms", rename = "max_resp_ms")]
    pub max_resp: Duration,
    pub qrv: u32,
    #[serde(with = "crate::protocols::duration_ms", rename = "qqi_ms")]
    pub qqi: Duration,
    pub suppress: bool,
}

/// Every timer the engine arms, keyed by what it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerType {
    GeneralQuery { intf: IntfId },
    OtherQuerierPresent { intf: IntfId },
    QuerySmear,
    GroupMembership { intf: IntfId, group: IpAddr },
    GroupQuery { intf: IntfId, group: IpAddr },
    SourceQuery { intf: IntfId, group: IpAddr },
    BasicHostPresent { intf: IntfId, group: IpAddr },
    LeavesHostPresent { intf: IntfId, group: IpAddr },
    Source { intf: IntfId, group: IpAddr, source: Ordinal },
    ClientStartup { client: ClientId },
    HostGroup { intf: IntfId, host: IpAddr, group: IpAddr },
    HostSource { intf: IntfId, host: IpAddr, group: IpAddr, source: Ordinal },
}

impl TimerType {
    /// Interface a timer belongs to, if any
    fn intf(&self) -> Option<IntfId> {
        match self {
            TimerType::GeneralQuery { intf }
            | TimerType::OtherQuerierPresent { intf }
            | TimerType::GroupMembership { intf, .. }
            | TimerType::GroupQuery { intf, .. }
            | TimerType::SourceQuery { intf, .. }
            | TimerType::BasicHostPresent { intf, .. }
            | TimerType::LeavesHostPresent { intf, .. }
            | TimerType::Source { intf, .. }
            | TimerType::HostGroup { intf, .. }
            | TimerType::HostSource { intf, .. } => Some(*intf),
            TimerType::QuerySmear | TimerType::ClientStartup { .. } => None,
        }
    }
}

/// One protocol instance
pub struct Instance {
    pub(super) id: InstanceId,
    pub(super) proto: Proto,
    pub(super) params: InstanceParams,
    pub(super) registry: IntfRegistry,
    pub(super) hooks: Box<dyn RouterHooks>,
    pub(super) logger: Logger,
    pub(super) addrs: AddrCatalog,
    pub(super) intfs: BTreeMap<IntfId, Intf>,
    /// Group address to the interfaces holding an output group for it
    pub(super) global_groups: BTreeMap<IpAddr, BTreeSet<IntfId>>,
    pub(super) clients: BTreeMap<ClientId, Client>,
    pub(super) host_tracking: bool,
    pub(super) timers: TimerQueue<TimerType>,
    pub(super) events: Vec<RouterEvent>,
    /// Interfaces in a startup query burst, most recent first
    pub(super) startup_intfs: VecDeque<IntfId>,
    pub(super) smear_accelerated: bool,
    pub(super) next_entry_id: u64,
}

impl Instance {
    /// Create an instance and claim an id from the registry
    pub fn new(
        proto: Proto,
        params: InstanceParams,
        registry: IntfRegistry,
        hooks: Box<dyn RouterHooks>,
        logger: Logger,
        now: Instant,
    ) -> Self {
        let id = registry.next_instance_id();
        let mut timers = TimerQueue::new();
        timers.start(TimerType::QuerySmear, now, params.smear_interval);
        log_info!(logger, Facility::Instance, "Created {} instance {}", proto, id);
        Self {
            id,
            proto,
            params,
            registry,
            hooks,
            logger,
            addrs: AddrCatalog::new(),
            intfs: BTreeMap::new(),
            global_groups: BTreeMap::new(),
            clients: BTreeMap::new(),
            host_tracking: false,
            timers,
            events: Vec::new(),
            startup_intfs: VecDeque::new(),
            smear_accelerated: false,
            next_entry_id: 0,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn proto(&self) -> Proto {
        self.proto
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Whether per-host tracking is on
    pub fn host_tracking(&self) -> bool {
        self.host_tracking
    }

    /// Turn per-host tracking on instance-wide
    pub fn enable_host_tracking(&mut self) {
        self.host_tracking = true;
    }

    /// Tear down all interfaces and clients
    pub fn destroy(mut self, now: Instant) {
        let clients: Vec<ClientId> = self.clients.keys().copied().collect();
        for client in clients {
            let _ = self.detach_client(client);
        }
        let intfs: Vec<IntfId> = self.intfs.keys().copied().collect();
        for intf in intfs {
            let _ = self.detach_intf(intf, now);
        }
        log_info!(
            self.logger,
            Facility::Instance,
            "Destroyed {} instance {}",
            self.proto,
            self.id
        );
    }

    /// Drain pending side effects
    pub fn take_events(&mut self) -> Vec<RouterEvent> {
        std::mem::take(&mut self.events)
    }

    /// Earliest time at which `run_timers` has work to do
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at or before `now`
    pub fn run_timers(&mut self, now: Instant) {
        while let Some(timer) = self.timers.pop_expired(now) {
            log_debug!(self.logger, Facility::Timer, "Timer expired: {:?}", timer);
            self.dispatch_timer(timer, now);
        }
    }

    fn dispatch_timer(&mut self, timer: TimerType, now: Instant) {
        match timer {
            TimerType::GeneralQuery { intf } => self.query_timer_expiry(intf, now),
            TimerType::OtherQuerierPresent { intf } => self.other_querier_expiry(intf, now),
            TimerType::QuerySmear => self.smear_expiry(now),
            TimerType::GroupMembership { intf, group } => {
                self.group_timer_expiry(intf, group, now)
            }
            TimerType::GroupQuery { intf, group } => {
                self.group_query_timer_expiry(intf, group, now)
            }
            TimerType::SourceQuery { intf, group } => {
                self.gss_query_timer_expiry(intf, group, now)
            }
            TimerType::BasicHostPresent { intf, group }
            | TimerType::LeavesHostPresent { intf, group } => {
                self.host_present_expiry(intf, group, now)
            }
            TimerType::Source {
                intf,
                group,
                source,
            } => self.source_timer_expiry(intf, group, source, now),
            TimerType::ClientStartup { client } => self.client_startup_expiry(client, now),
            TimerType::HostGroup { intf, host, group } => {
                self.host_group_expiry(intf, host, group, now)
            }
            TimerType::HostSource {
                intf,
                host,
                group,
                source,
            } => self.host_source_expiry(intf, host, group, source, now),
        }
    }

    /// Map trace facilities onto per-facility debug logging
    ///
    /// Facilities not listed go back to the global level.
    pub fn set_trace_facilities(&self, facilities: &[Facility]) {
        for facility in Facility::ALL {
            if facilities.contains(&facility) {
                self.logger.set_facility_level(facility, Severity::Debug);
            } else {
                self.logger.clear_facility_level(facility);
            }
        }
    }

    pub(super) fn check_family(&self, addr: &IpAddr) -> Result<(), GmpError> {
        if self.proto.matches(addr) {
            Ok(())
        } else {
            Err(GmpError::AddressFamily {
                proto: self.proto,
                addr: *addr,
            })
        }
    }

    pub(super) fn alloc_entry_id(&mut self) -> u64 {
        let id = self.next_entry_id;
        self.next_entry_id += 1;
        id
    }

    pub(super) fn push_event(&mut self, event: RouterEvent) {
        self.events.push(event);
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.registry.release_instance(self.proto, self.id);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("proto", &self.proto)
            .field("intfs", &self.intfs.len())
            .field("clients", &self.clients.len())
            .field("host_tracking", &self.host_tracking)
            .finish()
    }
}
