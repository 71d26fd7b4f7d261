// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Report and query processing, query transmission and the group and
//! source timers.
//!
//! Reports drive the per-group state machine (RFC 3376 section 6.4, RFC 3810
//! section 7.4). Records from hosts running an older protocol version are
//! first harmonized into the subset the older version can express.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use metrics::counter;

use super::group::SourceList;
use super::oif::OifUpdate;
use super::{GmpError, Instance, IntfId, QueryPacket, RouterEvent, TimerType};
use crate::logging::Facility;
use crate::protocols::addr::{AddrSet, Ordinal};
use crate::protocols::{FilterMode, GroupRecord, Packet, PacketBody, QueryBody, RecordType, Version};
use crate::{log_debug, log_warning};

/// Reduce a record to what a group in compatibility mode understands
///
/// Returns `None` when the record must be ignored.
pub(crate) fn harmonize(version: Version, rec_type: RecordType, sources: &[IpAddr]) -> Option<(RecordType, bool)> {
    if version == Version::Sources {
        return Some((rec_type, true));
    }
    let rec_type = match rec_type {
        RecordType::BlockOld => return None,
        RecordType::IsInclude | RecordType::ToInclude | RecordType::AllowNew
            if !sources.is_empty() =>
        {
            RecordType::ToExclude
        }
        other => other,
    };
    if version == Version::Basic
        && matches!(rec_type, RecordType::ToInclude | RecordType::IsInclude)
    {
        return None;
    }
    Some((rec_type, false))
}

impl Instance {
    /// Feed a decoded packet received on an interface
    pub fn receive_packet(&mut self, intf: IntfId, packet: &Packet, now: Instant) -> Result<(), GmpError> {
        let proto = self.proto;
        let i = self.intf_mut(intf)?;
        if i.passive_receive || !proto.matches(&packet.src) {
            i.stats.packets_ignored += 1;
            log_debug!(
                self.logger,
                Facility::Engine,
                "Ignored packet from {} on interface {}",
                packet.src,
                intf
            );
            return Ok(());
        }
        i.stats.packets_received += 1;
        counter!("gmp_packets_received_total", "proto" => proto.as_str()).increment(1);
        match &packet.body {
            PacketBody::Query(query) => self.process_query(intf, packet, query, now),
            PacketBody::Report { records } => {
                for record in records {
                    self.process_record(intf, packet, record, now);
                }
            }
        }
        self.alert_clients();
        self.alert_host_clients();
        Ok(())
    }

    /// Querier election and timer lowering from another router's query
    fn process_query(&mut self, intf: IntfId, packet: &Packet, query: &QueryBody, now: Instant) {
        let Some(i) = self.intfs.get(&intf) else {
            return;
        };
        if i.version == Version::Basic {
            return;
        }
        if packet.version != i.version {
            let configured = i.version;
            log_warning!(
                self.logger,
                Facility::Querier,
                "Version {} query from {} on interface {} configured for version {}",
                packet.version,
                packet.src,
                intf,
                configured
            );
            self.push_event(RouterEvent::VersionMismatch {
                intf,
                configured,
                received: packet.version,
                src: packet.src,
            });
        }
        if packet.src.is_unspecified() {
            return;
        }
        let Some(i) = self.intfs.get(&intf) else {
            return;
        };
        if i.local_addr.map_or(false, |local| packet.src >= local) {
            return;
        }

        self.update_querier(intf, Some(packet.src), false);
        let Some(i) = self.intfs.get_mut(&intf) else {
            return;
        };
        i.update_robustness(query.qrv);
        if packet.version == Version::Sources {
            i.update_query_ivl(query.qqi);
        }
        let (oqpi, lmqt) = (i.other_querier_ivl, i.lmqt);
        self.timers
            .start(TimerType::OtherQuerierPresent { intf }, now, oqpi);

        if query.suppress {
            return;
        }
        let Some(group) = query.group else {
            return;
        };
        let Some(g) = self.group(intf, group) else {
            return;
        };
        // Only running timers are lowered. An Include group has no group
        // timer, and a query must not start one.
        if query.sources.is_empty() {
            self.lower_timer(TimerType::GroupMembership { intf, group }, now, lmqt);
        } else {
            let ords: Vec<Ordinal> = query
                .sources
                .iter()
                .filter_map(|s| self.addrs.lookup(s))
                .filter(|o| g.running.contains_key(o))
                .collect();
            for source in ords {
                self.lower_timer(TimerType::Source { intf, group, source }, now, lmqt);
            }
        }
    }

    /// Shorten a running timer to `limit`. A stopped timer stays stopped,
    /// unlike the last member query path of report processing, which arms it.
    fn lower_timer(&mut self, key: TimerType, now: Instant, limit: Duration) {
        if self.timers.remaining(&key, now).map_or(false, |r| r > limit) {
            self.timers.start(key, now, limit);
        }
    }

    fn process_record(&mut self, intf: IntfId, packet: &Packet, record: &GroupRecord, now: Instant) {
        let group = record.group;
        if !self.proto.matches(&group) {
            return;
        }
        let version = self.group_version(intf, group);
        let Some((rec_type, keep_sources)) = harmonize(version, record.rec_type, &record.sources)
        else {
            return;
        };
        let sources: Vec<IpAddr> = if keep_sources {
            record
                .sources
                .iter()
                .filter(|s| self.proto.matches(s))
                .filter(|s| self.hooks.policy_check(intf, group, Some(**s), packet.attr))
                .copied()
                .collect()
        } else {
            Vec::new()
        };
        if keep_sources && !record.sources.is_empty() {
            if sources.is_empty() {
                return;
            }
        } else {
            if !self.hooks.policy_check(intf, group, None, packet.attr) {
                return;
            }
            if rec_type.is_exclude_type() && !self.hooks.ssm_check(intf, group) {
                log_debug!(
                    self.logger,
                    Facility::Engine,
                    "Refused (*,{}) join in SSM range on interface {}",
                    group,
                    intf
                );
                return;
            }
        }

        if self.group(intf, group).is_none() {
            let leave = matches!(rec_type, RecordType::ToInclude | RecordType::IsInclude)
                && sources.is_empty();
            if leave || rec_type == RecordType::BlockOld {
                return;
            }
            if self.create_group(intf, group, now).is_none() {
                return;
            }
        }
        self.update_version_compat(intf, group, packet.version, now);

        let a = self.addrs.intern_all(&sources);
        let reporter = packet.src;
        if let Some(g) = self.group_mut(intf, group) {
            g.last_reporter = Some(reporter);
        }
        let mode = self.group(intf, group).map(|g| g.mode);
        log_debug!(
            self.logger,
            Facility::Engine,
            "{} {} {:?} from {} on interface {} in {:?}",
            rec_type,
            group,
            sources,
            reporter,
            intf,
            mode
        );
        match (mode, rec_type) {
            (Some(FilterMode::Include), RecordType::AllowNew | RecordType::IsInclude) => {
                self.add_include_sources(intf, group, &a, now)
            }
            (Some(FilterMode::Include), RecordType::BlockOld) => {
                let ords = self.running_where(intf, group, |o| a.contains(o));
                self.send_gss_queries(intf, group, &ords, reporter, now);
            }
            (Some(FilterMode::Include), RecordType::ToInclude) => {
                self.add_include_sources(intf, group, &a, now);
                let ords = self.running_where(intf, group, |o| !a.contains(o));
                self.send_gss_queries(intf, group, &ords, reporter, now);
            }
            (Some(FilterMode::Include), RecordType::ToExclude) => {
                self.include_to_exclude(intf, group, &a, reporter, true, now)
            }
            (Some(FilterMode::Include), RecordType::IsExclude) => {
                self.include_to_exclude(intf, group, &a, reporter, false, now)
            }
            (Some(FilterMode::Exclude), RecordType::AllowNew | RecordType::IsInclude) => {
                for &ord in &a {
                    self.move_include(intf, group, ord, now);
                }
            }
            (Some(FilterMode::Exclude), RecordType::BlockOld) => {
                self.exclude_block(intf, group, &a, reporter, now)
            }
            (Some(FilterMode::Exclude), RecordType::ToInclude) => {
                let ords = self.running_where(intf, group, |o| !a.contains(o));
                self.send_gss_queries(intf, group, &ords, reporter, now);
                for &ord in &a {
                    self.move_include(intf, group, ord, now);
                }
                self.enqueue_group_query(intf, group, now);
            }
            (Some(FilterMode::Exclude), RecordType::ToExclude) => {
                self.exclude_to_exclude(intf, group, &a, reporter, true, now)
            }
            (Some(FilterMode::Exclude), RecordType::IsExclude) => {
                self.exclude_to_exclude(intf, group, &a, reporter, false, now)
            }
            (None, _) => {}
        }
        if self.group(intf, group).map(|g| g.mode) == Some(FilterMode::Exclude) {
            self.update_group_oif(intf, group, OifUpdate::Update);
        }
        self.host_process_report(intf, reporter, rec_type, group, &a, now);
        self.addrs.release_all(&a);
    }

    /// Older-version reports start the matching host-present timer
    fn update_version_compat(&mut self, intf: IntfId, group: IpAddr, version: Version, now: Instant) {
        let Some(i) = self.intfs.get(&intf) else {
            return;
        };
        let ivl = i.query_ivl * i.robustness + i.query_resp_ivl;
        match version {
            Version::Basic => self
                .timers
                .start(TimerType::BasicHostPresent { intf, group }, now, ivl),
            Version::Leaves => self
                .timers
                .start(TimerType::LeavesHostPresent { intf, group }, now, ivl),
            Version::Sources => {}
        }
        self.evaluate_group_version(intf, group);
    }

    fn running_where(&self, intf: IntfId, group: IpAddr, pred: impl Fn(&Ordinal) -> bool) -> Vec<Ordinal> {
        self.group(intf, group)
            .map(|g| g.running.keys().filter(|o| pred(o)).copied().collect())
            .unwrap_or_default()
    }

    fn gmi(&self, intf: IntfId) -> Duration {
        self.intfs.get(&intf).map_or(Duration::ZERO, |i| i.gmi)
    }

    fn lmqt(&self, intf: IntfId) -> Duration {
        self.intfs.get(&intf).map_or(Duration::ZERO, |i| i.lmqt)
    }

    fn group_timer_remaining(&self, intf: IntfId, group: IpAddr, now: Instant) -> Duration {
        self.timers
            .remaining(&TimerType::GroupMembership { intf, group }, now)
            .unwrap_or(Duration::ZERO)
    }

    /// Include mode: add or refresh requested sources
    fn add_include_sources(&mut self, intf: IntfId, group: IpAddr, a: &AddrSet, now: Instant) {
        let gmi = self.gmi(intf);
        for &ord in a {
            let known = self.input_source_on(intf, group, ord, SourceList::Running);
            if !known {
                if !self.create_source(intf, group, SourceList::Running, ord, now) {
                    continue;
                }
                self.update_source_oif(intf, group, ord, OifUpdate::Update);
            }
            self.timers.start(
                TimerType::Source {
                    intf,
                    group,
                    source: ord,
                },
                now,
                gmi,
            );
        }
    }

    /// Exclude mode: a source is wanted again
    fn move_include(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal, now: Instant) {
        if self.input_source_on(intf, group, ord, SourceList::Stopped) {
            self.move_source(intf, group, ord, SourceList::Running);
            self.update_source_oif(intf, group, ord, OifUpdate::Delete);
        } else if !self.input_source_on(intf, group, ord, SourceList::Running)
            && !self.create_source(intf, group, SourceList::Running, ord, now)
        {
            return;
        }
        let gmi = self.gmi(intf);
        self.timers.start(
            TimerType::Source {
                intf,
                group,
                source: ord,
            },
            now,
            gmi,
        );
    }

    /// Ask about sources some host no longer wants
    fn send_gss_queries(&mut self, intf: IntfId, group: IpAddr, ords: &[Ordinal], reporter: IpAddr, now: Instant) {
        let lmqt = self.lmqt(intf);
        for &ord in ords {
            let remaining = self
                .timers
                .remaining(&TimerType::Source { intf, group, source: ord }, now)
                .unwrap_or(Duration::ZERO);
            if remaining > lmqt {
                self.enqueue_gss_query(intf, group, ord, now);
            }
            if let Some(entry) = self.group_mut(intf, group).and_then(|g| g.source_mut(ord)) {
                entry.last_reporter = Some(reporter);
            }
        }
    }

    fn enqueue_gss_query(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal, now: Instant) {
        let Some(i) = self.intfs.get(&intf) else {
            return;
        };
        let (lmqt, lmq_count) = (i.lmqt, i.lmq_count);
        let quiet = i.fast_leave || i.suppress_gs_query;
        self.timers.start(
            TimerType::Source {
                intf,
                group,
                source: ord,
            },
            now,
            lmqt,
        );
        let Some(g) = self.group_mut(intf, group) else {
            return;
        };
        if g.compat < Version::Sources || quiet {
            return;
        }
        if let Some(entry) = g.running.get_mut(&ord) {
            entry.rexmit = lmq_count;
        }
        let key = TimerType::SourceQuery { intf, group };
        if !self.timers.is_running(&key) {
            self.timers.start(key, now, Duration::ZERO);
        }
    }

    fn enqueue_group_query(&mut self, intf: IntfId, group: IpAddr, now: Instant) {
        let Some(i) = self.intfs.get(&intf) else {
            return;
        };
        let (lmqt, lmq_count, fast_leave, suppress) =
            (i.lmqt, i.lmq_count, i.fast_leave, i.suppress_gs_query);
        let Some(g) = self.group(intf, group) else {
            return;
        };
        if g.compat < Version::Leaves || fast_leave {
            return;
        }
        let key = TimerType::GroupMembership { intf, group };
        if self.timers.remaining(&key, now).map_or(true, |r| r > lmqt) {
            self.timers.start(key, now, lmqt);
        }
        if suppress {
            return;
        }
        if let Some(g) = self.group_mut(intf, group) {
            g.rexmit = lmq_count;
        }
        self.timers
            .start(TimerType::GroupQuery { intf, group }, now, Duration::ZERO);
    }

    /// Include to Exclude on TO_EX (`query`) or IS_EX
    fn include_to_exclude(
        &mut self,
        intf: IntfId,
        group: IpAddr,
        a: &AddrSet,
        reporter: IpAddr,
        query: bool,
        now: Instant,
    ) {
        if let Some(g) = self.group_mut(intf, group) {
            g.mode = FilterMode::Exclude;
        }
        for &ord in a {
            if self.input_source_on(intf, group, ord, SourceList::Running) {
                continue;
            }
            if self.create_source(intf, group, SourceList::Stopped, ord, now) {
                if let Some(entry) = self.group_mut(intf, group).and_then(|g| g.source_mut(ord)) {
                    entry.last_reporter = Some(reporter);
                }
            }
        }
        for ord in self.running_where(intf, group, |o| !a.contains(o)) {
            self.free_source(intf, group, ord, now);
        }
        if query {
            let ords = self.running_where(intf, group, |_| true);
            self.send_gss_queries(intf, group, &ords, reporter, now);
        }
        let gmi = self.gmi(intf);
        self.timers
            .start(TimerType::GroupMembership { intf, group }, now, gmi);
        self.update_oif_mode_change(intf, group, now);
    }

    /// Exclude mode BLOCK: newly blocked sources get the group's remaining
    /// lifetime and are queried
    fn exclude_block(&mut self, intf: IntfId, group: IpAddr, a: &AddrSet, reporter: IpAddr, now: Instant) {
        let remaining = self.group_timer_remaining(intf, group, now);
        let lmqt = self.lmqt(intf);
        for &ord in a {
            if self.input_source_on(intf, group, ord, SourceList::Stopped) {
                continue;
            }
            let key = TimerType::Source {
                intf,
                group,
                source: ord,
            };
            if !self.input_source_on(intf, group, ord, SourceList::Running) {
                if !self.create_source(intf, group, SourceList::Running, ord, now) {
                    continue;
                }
                self.timers.start(key.clone(), now, remaining);
            }
            if self
                .timers
                .remaining(&key, now)
                .map_or(false, |r| r > lmqt)
            {
                self.enqueue_gss_query(intf, group, ord, now);
            }
            if let Some(entry) = self.group_mut(intf, group).and_then(|g| g.source_mut(ord)) {
                entry.last_reporter = Some(reporter);
            }
        }
    }

    /// Exclude to Exclude on TO_EX (`query`) or IS_EX
    fn exclude_to_exclude(
        &mut self,
        intf: IntfId,
        group: IpAddr,
        a: &AddrSet,
        reporter: IpAddr,
        query: bool,
        now: Instant,
    ) {
        for ord in self.running_where(intf, group, |o| !a.contains(o)) {
            self.free_source(intf, group, ord, now);
        }
        let stale: Vec<Ordinal> = self
            .group(intf, group)
            .map(|g| g.stopped.keys().filter(|o| !a.contains(o)).copied().collect())
            .unwrap_or_default();
        for ord in stale {
            self.free_source(intf, group, ord, now);
        }
        let lifetime = if query {
            self.group_timer_remaining(intf, group, now)
        } else {
            self.gmi(intf)
        };
        for &ord in a {
            let known = self
                .group(intf, group)
                .map_or(true, |g| g.source(ord).is_some());
            if known || !self.create_source(intf, group, SourceList::Running, ord, now) {
                continue;
            }
            self.timers.start(
                TimerType::Source {
                    intf,
                    group,
                    source: ord,
                },
                now,
                lifetime,
            );
        }
        if query {
            let ords = self.running_where(intf, group, |_| true);
            self.send_gss_queries(intf, group, &ords, reporter, now);
        }
        let gmi = self.gmi(intf);
        self.timers
            .start(TimerType::GroupMembership { intf, group }, now, gmi);
    }

    /// Group timer ran out: Exclude mode ends
    pub(super) fn group_timer_expiry(&mut self, intf: IntfId, group: IpAddr, now: Instant) {
        let Some(g) = self.group(intf, group) else {
            return;
        };
        if g.mode == FilterMode::Include {
            self.attempt_group_free(intf, group, now);
            return;
        }
        self.flush_source_list(intf, group, SourceList::Stopped, now);
        if let Some(g) = self.group_mut(intf, group) {
            g.mode = FilterMode::Include;
        }
        if let Some(i) = self.intfs.get_mut(&intf) {
            i.stats.group_timeouts += 1;
        }
        counter!("gmp_group_timeouts_total", "proto" => self.proto.as_str()).increment(1);
        log_debug!(
            self.logger,
            Facility::Engine,
            "Group {} timed out to Include on interface {}",
            group,
            intf
        );
        self.update_oif_mode_change(intf, group, now);
        self.alert_clients();
    }

    pub(super) fn source_timer_expiry(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal, now: Instant) {
        let Some(g) = self.group(intf, group) else {
            return;
        };
        if !g.running.contains_key(&ord) {
            return;
        }
        match g.mode {
            FilterMode::Include => {
                self.free_source(intf, group, ord, now);
                if self.group(intf, group).map_or(false, |g| g.running.is_empty()) {
                    self.update_group_oif(intf, group, OifUpdate::Delete);
                    self.attempt_group_free(intf, group, now);
                }
            }
            FilterMode::Exclude => {
                self.move_source(intf, group, ord, SourceList::Stopped);
                self.update_source_oif(intf, group, ord, OifUpdate::Update);
                self.update_group_oif(intf, group, OifUpdate::Update);
            }
        }
        self.alert_clients();
    }

    /// Build the next round of group-and-source queries
    pub(super) fn gss_query_timer_expiry(&mut self, intf: IntfId, group: IpAddr, now: Instant) {
        let Some(i) = self.intfs.get(&intf) else {
            return;
        };
        let (lmqt, lmq_ivl) = (i.lmqt, i.lmq_ivl);
        let remaining: Vec<(Ordinal, Duration)> = self
            .group(intf, group)
            .map(|g| {
                g.running
                    .keys()
                    .map(|o| {
                        let left = self
                            .timers
                            .remaining(&TimerType::Source { intf, group, source: *o }, now)
                            .unwrap_or(Duration::ZERO);
                        (*o, left)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let Some(g) = self.group_mut(intf, group) else {
            return;
        };
        g.query_lo.clear();
        g.query_hi.clear();
        for (ord, left) in remaining {
            let Some(entry) = g.running.get_mut(&ord) else {
                continue;
            };
            if entry.rexmit == 0 {
                continue;
            }
            entry.rexmit -= 1;
            if left <= lmqt {
                g.query_lo.insert(ord);
            } else {
                g.query_hi.insert(ord);
            }
        }
        let found = !g.query_lo.is_empty() || !g.query_hi.is_empty();
        if found {
            g.send_gss_query = true;
            self.enqueue_group_xmit(intf, group);
            self.kick_xmit(intf);
            self.timers
                .start(TimerType::SourceQuery { intf, group }, now, lmq_ivl);
        }
        self.attempt_group_free(intf, group, now);
    }

    pub(super) fn group_query_timer_expiry(&mut self, intf: IntfId, group: IpAddr, now: Instant) {
        let lmq_ivl = match self.intfs.get(&intf) {
            Some(i) => i.lmq_ivl,
            None => return,
        };
        let Some(g) = self.group_mut(intf, group) else {
            return;
        };
        g.rexmit = g.rexmit.saturating_sub(1);
        g.send_group_query = true;
        let again = g.rexmit > 0;
        self.enqueue_group_xmit(intf, group);
        self.kick_xmit(intf);
        if again {
            self.timers
                .start(TimerType::GroupQuery { intf, group }, now, lmq_ivl);
        }
    }

    /// Next query to transmit on an interface, if any
    ///
    /// Call after `RouterEvent::StartXmit` until it returns `None`.
    pub fn xmit(&mut self, intf: IntfId, now: Instant) -> Result<Option<QueryPacket>, GmpError> {
        let i = self.intf_mut(intf)?;
        i.xmit_pending = false;
        if !i.up {
            return Ok(None);
        }
        let mut packet = None;
        if i.send_gen_query {
            i.send_gen_query = false;
            let allowed = i.querier && !(i.version == Version::Basic && !i.querier_enabled);
            if allowed {
                packet = Some(QueryPacket {
                    intf,
                    version: i.version,
                    group: None,
                    sources: Vec::new(),
                    max_resp: i.query_resp_ivl,
                    qrv: i.robustness,
                    qqi: i.query_ivl,
                    suppress: false,
                });
            }
        }
        while packet.is_none() {
            let Some(group) = self.intfs.get(&intf).and_then(|i| i.xmit_groups.front().copied())
            else {
                break;
            };
            packet = self.build_group_query(intf, group, now);
            if packet.is_none() {
                if let Some(i) = self.intfs.get_mut(&intf) {
                    i.xmit_groups.pop_front();
                }
                self.attempt_group_free(intf, group, now);
            }
        }
        let Some(packet) = packet else {
            return Ok(None);
        };
        if let Some(i) = self.intfs.get_mut(&intf) {
            i.xmit_pending = true;
            i.stats.queries_sent += 1;
        }
        counter!("gmp_queries_sent_total", "proto" => self.proto.as_str()).increment(1);
        log_debug!(
            self.logger,
            Facility::Querier,
            "Sending query on interface {}: group {:?} sources {:?}",
            intf,
            packet.group,
            packet.sources
        );
        Ok(Some(packet))
    }

    /// Group-and-source query first, then group-specific
    fn build_group_query(&mut self, intf: IntfId, group: IpAddr, now: Instant) -> Option<QueryPacket> {
        let i = self.intfs.get(&intf)?;
        let (querier, lmq_ivl, lmqt, qrv, qqi) =
            (i.querier, i.lmq_ivl, i.lmqt, i.robustness, i.query_ivl);
        let suppress_group = self.group_timer_remaining(intf, group, now) > lmqt;
        let g = self.group_mut(intf, group)?;
        let version = g.compat;

        if g.send_gss_query {
            let batch = if !querier {
                g.query_lo.clear();
                g.query_hi.clear();
                None
            } else if !g.query_lo.is_empty() {
                Some((std::mem::take(&mut g.query_lo), false))
            } else if !g.query_hi.is_empty() {
                Some((std::mem::take(&mut g.query_hi), true))
            } else {
                None
            };
            match batch {
                Some((ords, suppress)) => {
                    let sources = self.addrs.addrs_of(&ords);
                    return Some(QueryPacket {
                        intf,
                        version,
                        group: Some(group),
                        sources,
                        max_resp: lmq_ivl,
                        qrv,
                        qqi,
                        suppress,
                    });
                }
                None => g.send_gss_query = false,
            }
        }

        if g.send_group_query {
            g.send_group_query = false;
            if querier {
                return Some(QueryPacket {
                    intf,
                    version,
                    group: Some(group),
                    sources: Vec::new(),
                    max_resp: lmq_ivl,
                    qrv,
                    qqi,
                    suppress: suppress_group,
                });
            }
        }
        None
    }
}
