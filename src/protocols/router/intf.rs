// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Interface state: configured parameters, derived timer values, querier
//! election, the startup query burst and the general query smear.

use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::group::Group;
use super::host::Host;
use super::introspect::IntfStats;
use super::oif::OutputGroup;
use super::{GmpError, Instance, IntfId, RouterEvent, TimerType};
use crate::logging::Facility;
use crate::protocols::addr::prefix_contains;
use crate::protocols::{duration_ms, Proto, Version};
use crate::{log_debug, log_info, log_warning};

pub const DEFAULT_ROBUSTNESS: u32 = 2;
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(125);
pub const DEFAULT_QUERY_RESPONSE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_LMQ_INTERVAL: Duration = Duration::from_secs(1);

/// Gap between startup queries after the first
const STARTUP_QUERY_INTERVAL: Duration = Duration::from_secs(2);
/// Delay before the first startup query
const FIRST_QUERY_DELAY: Duration = Duration::from_millis(100);

/// Per-interface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntfParams {
    /// Highest protocol version spoken on the interface
    pub version: Version,
    pub robustness: u32,
    #[serde(with = "duration_ms", rename = "query_interval_ms")]
    pub query_interval: Duration,
    #[serde(with = "duration_ms", rename = "query_response_interval_ms")]
    pub query_response_interval: Duration,
    #[serde(with = "duration_ms", rename = "last_member_query_interval_ms")]
    pub last_member_query_interval: Duration,
    pub fast_leave: bool,
    /// Maximum number of channels; zero means unlimited
    pub channel_limit: u32,
    /// Warning threshold as a percentage of the limit
    pub channel_threshold: u32,
    /// Minimum spacing of repeated limit log messages; zero reports each event
    #[serde(with = "duration_ms", rename = "log_interval_ms")]
    pub log_interval: Duration,
    pub suppress_general_query: bool,
    pub suppress_gs_query: bool,
    /// Ignore every received packet
    pub passive_receive: bool,
    /// Send version 1 general queries when elected
    pub querier_enabled: bool,
}

impl Default for IntfParams {
    fn default() -> Self {
        Self {
            version: Version::Sources,
            robustness: DEFAULT_ROBUSTNESS,
            query_interval: DEFAULT_QUERY_INTERVAL,
            query_response_interval: DEFAULT_QUERY_RESPONSE_INTERVAL,
            last_member_query_interval: DEFAULT_LMQ_INTERVAL,
            fast_leave: false,
            channel_limit: 0,
            channel_threshold: 100,
            log_interval: Duration::ZERO,
            suppress_general_query: false,
            suppress_gs_query: false,
            passive_receive: false,
            querier_enabled: true,
        }
    }
}

/// Channel limit state of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitState {
    #[default]
    BelowThreshold,
    AboveThreshold,
    AboveLimit,
}

/// An attached interface
#[derive(Debug)]
pub(crate) struct Intf {
    pub(super) id: IntfId,
    pub(super) version: Version,
    pub(super) up: bool,
    pub(super) local_addr: Option<IpAddr>,
    pub(super) querier: bool,
    pub(super) querier_addr: Option<IpAddr>,
    pub(super) querier_enabled: bool,

    pub(super) local_robustness: u32,
    pub(super) local_query_ivl: Duration,
    pub(super) local_query_resp_ivl: Duration,
    pub(super) min_max_resp: Duration,

    pub(super) robustness: u32,
    pub(super) query_ivl: Duration,
    pub(super) query_resp_ivl: Duration,
    pub(super) lmq_ivl: Duration,
    pub(super) lmq_count: u32,
    pub(super) gmi: Duration,
    pub(super) other_querier_ivl: Duration,
    pub(super) lmqt: Duration,

    pub(super) fast_leave: bool,
    pub(super) passive_receive: bool,
    pub(super) suppress_gen_query: bool,
    pub(super) suppress_gs_query: bool,

    pub(super) channel_limit: u32,
    pub(super) channel_threshold: u32,
    pub(super) log_interval: Duration,
    pub(super) limit_state: LimitState,
    pub(super) last_limit_log: Option<Instant>,
    pub(super) channel_count: u32,
    pub(super) stats: IntfStats,

    pub(super) groups: BTreeMap<IpAddr, Group>,
    pub(super) ogroups: BTreeMap<IpAddr, OutputGroup>,
    pub(super) hosts: BTreeMap<IpAddr, Host>,

    /// Groups with group or group-and-source queries to send, in order
    pub(super) xmit_groups: VecDeque<IpAddr>,
    pub(super) send_gen_query: bool,
    pub(super) xmit_pending: bool,
    pub(super) startup_query_count: u32,
    pub(super) first_query_pending: bool,
    pub(super) gen_query_requested: bool,
}

impl Intf {
    fn new(id: IntfId, proto: Proto) -> Self {
        let mut intf = Self {
            id,
            version: Version::Sources,
            up: false,
            local_addr: None,
            querier: false,
            querier_addr: None,
            querier_enabled: true,
            local_robustness: DEFAULT_ROBUSTNESS,
            local_query_ivl: DEFAULT_QUERY_INTERVAL,
            local_query_resp_ivl: DEFAULT_QUERY_RESPONSE_INTERVAL,
            min_max_resp: proto.min_max_resp(),
            robustness: DEFAULT_ROBUSTNESS,
            query_ivl: DEFAULT_QUERY_INTERVAL,
            query_resp_ivl: DEFAULT_QUERY_RESPONSE_INTERVAL,
            lmq_ivl: DEFAULT_LMQ_INTERVAL,
            lmq_count: DEFAULT_ROBUSTNESS,
            gmi: Duration::ZERO,
            other_querier_ivl: Duration::ZERO,
            lmqt: Duration::ZERO,
            fast_leave: false,
            passive_receive: false,
            suppress_gen_query: false,
            suppress_gs_query: false,
            channel_limit: 0,
            channel_threshold: 0,
            log_interval: Duration::ZERO,
            limit_state: LimitState::BelowThreshold,
            last_limit_log: None,
            channel_count: 0,
            stats: IntfStats::default(),
            groups: BTreeMap::new(),
            ogroups: BTreeMap::new(),
            hosts: BTreeMap::new(),
            xmit_groups: VecDeque::new(),
            send_gen_query: false,
            xmit_pending: false,
            startup_query_count: 0,
            first_query_pending: false,
            gen_query_requested: false,
        };
        intf.update_lmqt();
        intf.update_gmi();
        intf.update_other_querier_ivl();
        intf
    }

    fn update_gmi(&mut self) {
        self.gmi = self.query_ivl * self.robustness + self.query_resp_ivl;
    }

    fn update_other_querier_ivl(&mut self) {
        self.other_querier_ivl = self.query_ivl * self.robustness + self.query_resp_ivl / 2;
    }

    fn update_lmqt(&mut self) {
        self.lmqt = self.lmq_ivl * self.lmq_count + self.lmq_ivl / 2;
    }

    /// Adopt a robustness value; zero selects the configured one
    pub(super) fn update_robustness(&mut self, robustness: u32) {
        let robustness = if robustness == 0 {
            self.local_robustness
        } else {
            robustness
        };
        self.robustness = robustness;
        self.lmq_count = robustness;
        self.update_lmqt();
        self.update_gmi();
        self.update_other_querier_ivl();
    }

    /// Response interval must stay below the query interval
    fn update_query_resp_ivl(&mut self) {
        let ceiling = if self.query_ivl > Duration::from_secs(1) {
            self.query_ivl - Duration::from_secs(1)
        } else {
            self.query_ivl / 2
        };
        self.query_resp_ivl = self
            .local_query_resp_ivl
            .min(ceiling)
            .max(self.min_max_resp);
    }

    /// Adopt a query interval; zero selects the protocol default
    pub(super) fn update_query_ivl(&mut self, ivl: Duration) {
        self.query_ivl = if ivl.is_zero() {
            DEFAULT_QUERY_INTERVAL
        } else {
            ivl
        };
        self.update_query_resp_ivl();
        self.update_gmi();
        self.update_other_querier_ivl();
    }

    /// Channels above this count raise the threshold warning
    pub(super) fn threshold_count(&self, count: u32) -> bool {
        u64::from(count) * 100 > u64::from(self.channel_threshold) * u64::from(self.channel_limit)
    }
}

impl Instance {
    pub(super) fn intf(&self, id: IntfId) -> Result<&Intf, GmpError> {
        self.intfs.get(&id).ok_or(GmpError::UnknownIntf(id))
    }

    pub(super) fn intf_mut(&mut self, id: IntfId) -> Result<&mut Intf, GmpError> {
        self.intfs.get_mut(&id).ok_or(GmpError::UnknownIntf(id))
    }

    /// Attach an interface with default parameters
    ///
    /// The interface starts down; a startup query burst is scheduled and runs
    /// once it comes up with an address.
    pub fn attach_intf(&mut self, id: IntfId, now: Instant) -> Result<(), GmpError> {
        if self.registry.claim(self.proto, id, self.id).is_err() {
            return Err(GmpError::IntfExists(id));
        }
        let intf = Intf::new(id, self.proto);
        let robustness = intf.robustness;
        self.intfs.insert(id, intf);
        self.setup_initial_queries(id, robustness, now);
        log_info!(self.logger, Facility::Interface, "Attached interface {}", id);
        Ok(())
    }

    /// Detach an interface, discarding all of its state
    pub fn detach_intf(&mut self, id: IntfId, now: Instant) -> Result<(), GmpError> {
        self.intf(id)?;
        self.destroy_intf_groups(id, now);
        self.destroy_intf_hosts(id);
        self.timers.stop_matching(|t| t.intf() == Some(id));
        self.startup_intfs.retain(|i| *i != id);
        self.intfs.remove(&id);
        self.registry.release(self.proto, id);
        log_info!(self.logger, Facility::Interface, "Detached interface {}", id);
        Ok(())
    }

    /// Apply a new parameter set to an interface
    pub fn set_intf_params(
        &mut self,
        id: IntfId,
        params: &IntfParams,
        now: Instant,
    ) -> Result<(), GmpError> {
        let version_changed = self.intf(id)?.version != params.version;
        if version_changed {
            self.intf_mut(id)?.version = params.version;
            let groups: Vec<IpAddr> = self.intf(id)?.groups.keys().copied().collect();
            for group in groups {
                self.evaluate_group_version(id, group);
            }
        }

        let intf = self.intf_mut(id)?;
        let mut send_query = intf.suppress_gen_query != params.suppress_general_query;
        intf.querier_enabled = params.querier_enabled;
        intf.local_query_resp_ivl = params.query_response_interval;
        intf.lmq_ivl = params.last_member_query_interval;
        intf.fast_leave = params.fast_leave;
        intf.channel_limit = params.channel_limit;
        if params.channel_limit != 0 {
            intf.channel_threshold = params.channel_threshold;
            intf.log_interval = params.log_interval;
        } else {
            intf.channel_threshold = 0;
            intf.log_interval = Duration::ZERO;
        }
        intf.passive_receive = params.passive_receive;
        intf.suppress_gen_query = params.suppress_general_query;
        intf.suppress_gs_query = params.suppress_gs_query;
        intf.local_robustness = if params.robustness == 0 {
            DEFAULT_ROBUSTNESS
        } else {
            params.robustness
        };

        let old_robustness = intf.robustness;
        intf.update_robustness(params.robustness);
        if intf.local_query_ivl != params.query_interval {
            send_query = true;
        }
        intf.local_query_ivl = params.query_interval;
        intf.update_query_ivl(params.query_interval);
        let robustness = intf.robustness;
        let fast_leave = intf.fast_leave;

        let limit = intf.channel_limit;
        let count = intf.channel_count;
        let over_limit = limit != 0 && count > limit;
        if over_limit {
            intf.limit_state = LimitState::AboveLimit;
        } else if limit != 0 && intf.threshold_count(count) {
            intf.limit_state = LimitState::AboveThreshold;
        } else {
            intf.limit_state = LimitState::BelowThreshold;
        }
        if params.suppress_general_query {
            intf.startup_query_count = 0;
        }

        if fast_leave {
            self.host_tracking = true;
        }
        if over_limit {
            log_warning!(
                self.logger,
                Facility::Interface,
                "Interface {} holds {} channels above new limit {}, timing out groups",
                id,
                count,
                limit
            );
            self.push_event(RouterEvent::GroupLimitExceeded {
                intf: id,
                count,
                limit,
            });
            let groups: Vec<IpAddr> = self.intf(id)?.groups.keys().copied().collect();
            for group in groups {
                self.timeout_group(id, group, now);
            }
            send_query = true;
        }

        if robustness != old_robustness {
            self.setup_initial_queries(id, robustness, now);
        } else if send_query {
            self.setup_initial_queries(id, 1, now);
        }
        log_debug!(
            self.logger,
            Facility::Interface,
            "Interface {} parameters updated: {:?}",
            id,
            params
        );
        Ok(())
    }

    /// Report the interface address; `None` means the interface is down
    pub fn update_intf_state(
        &mut self,
        id: IntfId,
        addr: Option<IpAddr>,
        now: Instant,
    ) -> Result<(), GmpError> {
        if let Some(addr) = &addr {
            self.check_family(addr)?;
        }
        let intf = self.intf_mut(id)?;
        let was_up = intf.up;
        match addr {
            Some(addr) => {
                intf.up = true;
                if !was_up || intf.local_addr != Some(addr) {
                    intf.local_addr = Some(addr);
                    self.update_querier(id, Some(addr), true);
                }
            }
            None => {
                intf.up = false;
                intf.querier = false;
                intf.local_addr = None;
            }
        }
        let up = self.intf(id)?.up;
        if up == was_up {
            return Ok(());
        }
        log_info!(
            self.logger,
            Facility::Interface,
            "Interface {} is {}",
            id,
            if up { "up" } else { "down" }
        );
        self.update_intf_output_groups(id);
        if up {
            let robustness = self.intf(id)?.robustness;
            self.setup_initial_queries(id, robustness, now);
            self.kick_xmit(id);
        } else {
            let groups: Vec<IpAddr> = self.intf(id)?.groups.keys().copied().collect();
            for group in groups {
                self.timeout_group(id, group, now);
            }
            self.intf_mut(id)?.xmit_pending = false;
        }
        self.alert_clients();
        Ok(())
    }

    /// Record a querier change and tell interested clients
    pub(super) fn update_querier(&mut self, id: IntfId, addr: Option<IpAddr>, querier: bool) {
        let Some(intf) = self.intfs.get_mut(&id) else {
            return;
        };
        if intf.querier == querier && (addr.is_none() || addr == intf.querier_addr) {
            return;
        }
        intf.querier = querier;
        if addr.is_some() {
            intf.querier_addr = addr;
        }
        if querier {
            let local = intf.local_query_ivl;
            intf.update_query_ivl(local);
        }
        let querier_addr = intf.querier_addr;
        log_info!(
            self.logger,
            Facility::Querier,
            "Interface {} querier {:?}, local router {}",
            id,
            querier_addr,
            if querier { "is querier" } else { "is not querier" }
        );
        let clients: Vec<_> = self
            .clients
            .values()
            .filter(|c| c.opts.querier_notifications)
            .map(|c| c.id)
            .collect();
        for client in clients {
            self.push_event(RouterEvent::QuerierChange {
                client,
                intf: id,
                querier,
                querier_addr,
            });
        }
    }

    pub(super) fn other_querier_expiry(&mut self, id: IntfId, now: Instant) {
        let Some(local) = self.intfs.get(&id).map(|i| i.local_addr) else {
            return;
        };
        log_info!(
            self.logger,
            Facility::Querier,
            "Other querier on interface {} timed out",
            id
        );
        self.update_querier(id, local, true);
        self.timers
            .start(TimerType::GeneralQuery { intf: id }, now, Duration::ZERO);
    }

    /// Re-arm the general query timer for the current startup phase
    fn restart_query_timer(&mut self, id: IntfId, now: Instant) {
        let crowded = self.startup_intfs.len() > self.params.many_intfs_threshold;
        let Some(intf) = self.intfs.get_mut(&id) else {
            return;
        };
        let key = TimerType::GeneralQuery { intf: id };
        if intf.suppress_gen_query && !intf.gen_query_requested {
            intf.startup_query_count = 0;
            intf.first_query_pending = false;
            self.timers.stop(&key);
            self.startup_intfs.retain(|i| *i != id);
            return;
        }
        let ivl = if intf.first_query_pending {
            intf.first_query_pending = false;
            if crowded {
                intf.query_ivl
            } else {
                FIRST_QUERY_DELAY
            }
        } else if intf.startup_query_count > 0 {
            STARTUP_QUERY_INTERVAL
        } else {
            intf.query_ivl
        };
        self.timers.start(key, now, ivl);
    }

    /// Begin (or extend) a burst of `count` general queries
    pub(super) fn setup_initial_queries(&mut self, id: IntfId, count: u32, now: Instant) {
        let Some(intf) = self.intfs.get_mut(&id) else {
            return;
        };
        if intf.startup_query_count >= count {
            return;
        }
        intf.startup_query_count = count;
        intf.first_query_pending = true;
        self.startup_intfs.retain(|i| *i != id);
        self.startup_intfs.push_front(id);
        self.restart_query_timer(id, now);
        self.accelerate_smear(now);
    }

    pub(super) fn query_timer_expiry(&mut self, id: IntfId, now: Instant) {
        let Some(intf) = self.intfs.get_mut(&id) else {
            return;
        };
        intf.send_gen_query = true;
        if intf.startup_query_count > 0 {
            intf.startup_query_count -= 1;
        }
        if intf.startup_query_count == 0 {
            intf.gen_query_requested = false;
            self.startup_intfs.retain(|i| *i != id);
        }
        self.kick_xmit(id);
        self.restart_query_timer(id, now);
    }

    /// Ask the embedder to start pulling queries
    pub(super) fn kick_xmit(&mut self, id: IntfId) {
        let Some(intf) = self.intfs.get_mut(&id) else {
            return;
        };
        if intf.xmit_pending || !intf.up {
            return;
        }
        intf.xmit_pending = true;
        self.push_event(RouterEvent::StartXmit { intf: id });
    }

    /// Spread general queries of many querier interfaces over the interval
    pub(super) fn smear_expiry(&mut self, now: Instant) {
        let candidates: Vec<(IntfId, Duration)> = self
            .intfs
            .values()
            .filter(|i| i.querier && !self.startup_intfs.contains(&i.id))
            .map(|i| (i.id, i.query_ivl))
            .collect();
        if !candidates.is_empty() && candidates.len() >= self.params.many_intfs_threshold {
            let n = candidates.len() as u32;
            for (slot, (id, ivl)) in candidates.into_iter().enumerate() {
                let offset = ivl * (slot as u32 + 1) / n;
                self.timers
                    .start(TimerType::GeneralQuery { intf: id }, now, offset);
            }
            log_debug!(self.logger, Facility::Querier, "Smeared {} interfaces", n);
        }
        self.timers
            .start(TimerType::QuerySmear, now, self.params.smear_interval);
        self.smear_accelerated = false;
    }

    fn accelerate_smear(&mut self, now: Instant) {
        if self.smear_accelerated {
            return;
        }
        self.smear_accelerated = true;
        self.timers
            .start(TimerType::QuerySmear, now, self.params.quick_smear_interval);
    }

    /// Send a full startup burst of general queries, even when suppressed
    pub fn force_general_queries(&mut self, id: IntfId, now: Instant) -> Result<(), GmpError> {
        self.queue_general_queries(id, true, false, now)
    }

    /// Send a startup burst of general queries unless suppressed
    pub fn request_general_queries(&mut self, id: IntfId, now: Instant) -> Result<(), GmpError> {
        self.queue_general_queries(id, false, false, now)
    }

    pub fn force_one_general_query(&mut self, id: IntfId, now: Instant) -> Result<(), GmpError> {
        self.queue_general_queries(id, true, true, now)
    }

    pub fn request_one_general_query(&mut self, id: IntfId, now: Instant) -> Result<(), GmpError> {
        self.queue_general_queries(id, false, true, now)
    }

    fn queue_general_queries(
        &mut self,
        id: IntfId,
        force: bool,
        one: bool,
        now: Instant,
    ) -> Result<(), GmpError> {
        let intf = self.intf_mut(id)?;
        intf.gen_query_requested = force;
        let count = if one { 1 } else { intf.robustness };
        self.setup_initial_queries(id, count, now);
        Ok(())
    }

    /// Drop host state on an interface; tracking stops when no interface
    /// needs it for fast leave
    pub fn disable_host_tracking(&mut self, id: IntfId) -> Result<(), GmpError> {
        self.intf(id)?;
        self.destroy_intf_hosts(id);
        if !self.intfs.values().any(|i| i.fast_leave) {
            self.host_tracking = false;
        }
        Ok(())
    }

    /// Evaluate the channel limit now; returns whether the interface is at
    /// or above its limit
    pub fn chk_grp_limit(&mut self, id: IntfId, now: Instant) -> Result<bool, GmpError> {
        self.intf(id)?;
        Ok(self.check_grp_limit(id, false, now))
    }

    /// Time out every group inside `prefix/len`, optionally followed by an
    /// immediate general query
    pub fn timeout_group_range(
        &mut self,
        id: IntfId,
        prefix: IpAddr,
        len: u8,
        send_query: bool,
        now: Instant,
    ) -> Result<(), GmpError> {
        self.check_family(&prefix)?;
        let width = if prefix.is_ipv4() { 32 } else { 128 };
        if len > width {
            return Err(GmpError::BadPrefix(len));
        }
        let groups: Vec<IpAddr> = self
            .intf(id)?
            .groups
            .keys()
            .filter(|g| prefix_contains(&prefix, len, g))
            .copied()
            .collect();
        log_debug!(
            self.logger,
            Facility::Interface,
            "Timing out {} groups in {}/{} on interface {}",
            groups.len(),
            prefix,
            len,
            id
        );
        for group in groups {
            self.timeout_group(id, group, now);
        }
        if send_query {
            self.timers
                .start(TimerType::GeneralQuery { intf: id }, now, Duration::ZERO);
        }
        Ok(())
    }

    /// Attached interface ids
    pub fn intf_ids(&self) -> Vec<IntfId> {
        self.intfs.keys().copied().collect()
    }

    /// Whether the interface is currently the querier
    pub fn is_querier(&self, id: IntfId) -> Result<bool, GmpError> {
        Ok(self.intf(id)?.querier)
    }

    /// Current querier address on the interface
    pub fn querier_addr(&self, id: IntfId) -> Result<Option<IpAddr>, GmpError> {
        Ok(self.intf(id)?.querier_addr)
    }

    /// Current channel limit state
    pub fn limit_state(&self, id: IntfId) -> Result<LimitState, GmpError> {
        Ok(self.intf(id)?.limit_state)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::protocols::{GroupRecord, Packet, RecordType};

    #[test]
    fn test_derived_intervals() {
        let intf = Intf::new(IntfId(1), Proto::Igmp);
        assert_eq!(intf.gmi, Duration::from_secs(260));
        assert_eq!(intf.other_querier_ivl, Duration::from_secs(255));
        assert_eq!(intf.lmqt, Duration::from_millis(2500));
    }

    #[test]
    fn test_query_response_capped_below_interval() {
        let mut intf = Intf::new(IntfId(1), Proto::Igmp);
        intf.update_query_ivl(Duration::from_secs(5));
        assert_eq!(intf.query_resp_ivl, Duration::from_secs(4));
        intf.update_query_ivl(Duration::from_millis(500));
        assert_eq!(intf.query_resp_ivl, Duration::from_millis(250));
        intf.update_query_ivl(Duration::ZERO);
        assert_eq!(intf.query_ivl, DEFAULT_QUERY_INTERVAL);
        assert_eq!(intf.query_resp_ivl, DEFAULT_QUERY_RESPONSE_INTERVAL);
    }

    #[test]
    fn test_robustness_zero_uses_local() {
        let mut intf = Intf::new(IntfId(1), Proto::Mld);
        intf.local_robustness = 3;
        intf.update_robustness(0);
        assert_eq!(intf.robustness, 3);
        assert_eq!(intf.lmq_count, 3);
        assert_eq!(intf.lmqt, Duration::from_millis(3500));
    }

    #[test]
    fn test_attach_twice_fails() {
        let now = Instant::now();
        let (mut inst, _sink) = instance(now);
        inst.attach_intf(IntfId(4), now).unwrap();
        assert_eq!(
            inst.attach_intf(IntfId(4), now),
            Err(GmpError::IntfExists(IntfId(4)))
        );
        inst.detach_intf(IntfId(4), now).unwrap();
        inst.attach_intf(IntfId(4), now).unwrap();
    }

    #[test]
    fn test_startup_burst_timing() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        let key = TimerType::GeneralQuery { intf: IntfId(1) };
        assert_eq!(inst.timers.deadline(&key), Some(now + FIRST_QUERY_DELAY));

        let t1 = now + FIRST_QUERY_DELAY;
        inst.run_timers(t1);
        assert!(inst.intfs[&IntfId(1)].send_gen_query);
        assert_eq!(inst.timers.deadline(&key), Some(t1 + STARTUP_QUERY_INTERVAL));

        let t2 = t1 + STARTUP_QUERY_INTERVAL;
        inst.run_timers(t2);
        assert_eq!(inst.intfs[&IntfId(1)].startup_query_count, 0);
        assert!(inst.startup_intfs.is_empty());
        assert_eq!(inst.timers.deadline(&key), Some(t2 + DEFAULT_QUERY_INTERVAL));
    }

    #[test]
    fn test_suppressed_general_query_stops_timer() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        let params = IntfParams {
            suppress_general_query: true,
            ..IntfParams::default()
        };
        inst.set_intf_params(IntfId(1), &params, now).unwrap();
        assert!(!inst
            .timers
            .is_running(&TimerType::GeneralQuery { intf: IntfId(1) }));

        inst.force_one_general_query(IntfId(1), now).unwrap();
        assert!(inst
            .timers
            .is_running(&TimerType::GeneralQuery { intf: IntfId(1) }));
    }

    #[test]
    fn test_fast_leave_enables_host_tracking() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        assert!(!inst.host_tracking());
        let params = IntfParams {
            fast_leave: true,
            ..IntfParams::default()
        };
        inst.set_intf_params(IntfId(1), &params, now).unwrap();
        assert!(inst.host_tracking());

        inst.set_intf_params(IntfId(1), &IntfParams::default(), now)
            .unwrap();
        inst.disable_host_tracking(IntfId(1)).unwrap();
        assert!(!inst.host_tracking());
    }

    #[test]
    fn test_intf_down_clears_querier() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        assert!(inst.is_querier(IntfId(1)).unwrap());
        inst.take_events();
        inst.update_intf_state(IntfId(1), None, now).unwrap();
        assert!(!inst.is_querier(IntfId(1)).unwrap());
        inst.update_intf_state(IntfId(1), Some(v4(10, 0, 0, 1)), now)
            .unwrap();
        assert!(inst
            .take_events()
            .contains(&RouterEvent::StartXmit { intf: IntfId(1) }));
    }

    #[test]
    fn test_lowering_channel_limit_times_out_groups() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        let t1 = now + FIRST_QUERY_DELAY;
        inst.run_timers(t1);
        let t2 = t1 + STARTUP_QUERY_INTERVAL;
        inst.run_timers(t2);
        while inst.xmit(IntfId(1), t2).unwrap().is_some() {}

        for n in 1..=3 {
            let pkt = Packet::report(
                Version::Sources,
                v4(10, 0, 0, 20),
                vec![GroupRecord::new(RecordType::IsExclude, v4(239, 3, 0, n), vec![])],
            );
            inst.receive_packet(IntfId(1), &pkt, t2).unwrap();
        }
        assert_eq!(inst.intfs[&IntfId(1)].channel_count, 3);
        inst.take_events();

        let params = IntfParams {
            channel_limit: 1,
            ..IntfParams::default()
        };
        inst.set_intf_params(IntfId(1), &params, t2).unwrap();
        assert_eq!(inst.limit_state(IntfId(1)).unwrap(), LimitState::AboveLimit);
        assert!(inst.take_events().contains(&RouterEvent::GroupLimitExceeded {
            intf: IntfId(1),
            count: 3,
            limit: 1,
        }));

        let later = t2 + Duration::from_millis(1500);
        inst.run_timers(later);
        assert!(inst.intfs[&IntfId(1)].groups.is_empty());
        assert_eq!(inst.intfs[&IntfId(1)].channel_count, 0);
        let mut general = 0;
        while let Some(query) = inst.xmit(IntfId(1), later).unwrap() {
            assert_eq!(query.group, None);
            general += 1;
        }
        assert_eq!(general, 1);
    }

    #[test]
    fn test_timeout_range_rejects_bad_prefix() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        assert_eq!(
            inst.timeout_group_range(IntfId(1), v4(239, 0, 0, 0), 33, false, now),
            Err(GmpError::BadPrefix(33))
        );
        assert!(matches!(
            inst.timeout_group_range(IntfId(1), "ff3e::".parse().unwrap(), 16, false, now),
            Err(GmpError::AddressFamily { .. })
        ));
    }
}
