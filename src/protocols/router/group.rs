// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Input groups
//!
//! An input group is the membership learned from reports on one interface.
//! In Include mode the running list holds the requested sources; in Exclude
//! mode the running list holds sources still forwarded and the stopped list
//! holds the excluded ones. Every source entry carries its own timer.
//!
//! Channel accounting: a group costs one channel and every source beyond the
//! first costs one more.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use metrics::counter;

use super::intf::LimitState;
use super::oif::OifUpdate;
use super::{Instance, IntfId, RouterEvent, TimerType};
use crate::logging::Facility;
use crate::protocols::addr::{AddrSet, Ordinal};
use crate::protocols::{FilterMode, Version};
use crate::{log_debug, log_info, log_warning};

/// Which list of an input group a source lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceList {
    Running,
    Stopped,
}

#[derive(Debug)]
pub(crate) struct SourceEntry {
    pub(super) ord: Ordinal,
    /// Group-and-source query retransmissions left
    pub(super) rexmit: u32,
    pub(super) last_reporter: Option<IpAddr>,
    /// Output source entry this source contributes to
    pub(super) oif: Option<(IntfId, u64)>,
    /// Tracked hosts that requested this source
    pub(super) hosts: BTreeSet<IpAddr>,
}

impl SourceEntry {
    fn new(ord: Ordinal) -> Self {
        Self {
            ord,
            rexmit: 0,
            last_reporter: None,
            oif: None,
            hosts: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Group {
    pub(super) addr: IpAddr,
    pub(super) mode: FilterMode,
    pub(super) running: BTreeMap<Ordinal, SourceEntry>,
    pub(super) stopped: BTreeMap<Ordinal, SourceEntry>,
    /// Sources for the next group-and-source query, timers at or below LMQT
    pub(super) query_lo: AddrSet,
    /// Sources for the next query with router-side processing suppressed
    pub(super) query_hi: AddrSet,
    /// Compatibility version derived from older-version host-present timers
    pub(super) compat: Version,
    pub(super) last_reporter: Option<IpAddr>,
    /// Output interface the group-level state is linked to
    pub(super) oif: Option<IntfId>,
    /// Group-specific query retransmissions left
    pub(super) rexmit: u32,
    pub(super) send_group_query: bool,
    pub(super) send_gss_query: bool,
    /// Tracked hosts with state for this group
    pub(super) hosts: BTreeSet<IpAddr>,
}

impl Group {
    fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            mode: FilterMode::Include,
            running: BTreeMap::new(),
            stopped: BTreeMap::new(),
            query_lo: AddrSet::new(),
            query_hi: AddrSet::new(),
            compat: Version::Sources,
            last_reporter: None,
            oif: None,
            rexmit: 0,
            send_group_query: false,
            send_gss_query: false,
            hosts: BTreeSet::new(),
        }
    }

    /// Exclude mode, or Include with at least one source
    pub(super) fn is_active(&self) -> bool {
        self.mode == FilterMode::Exclude || !self.running.is_empty()
    }

    pub(super) fn lists_empty(&self) -> bool {
        self.running.is_empty() && self.stopped.is_empty()
    }

    pub(super) fn list(&self, which: SourceList) -> &BTreeMap<Ordinal, SourceEntry> {
        match which {
            SourceList::Running => &self.running,
            SourceList::Stopped => &self.stopped,
        }
    }

    pub(super) fn list_mut(&mut self, which: SourceList) -> &mut BTreeMap<Ordinal, SourceEntry> {
        match which {
            SourceList::Running => &mut self.running,
            SourceList::Stopped => &mut self.stopped,
        }
    }

    /// The list that drives output state: running in Include, stopped in Exclude
    pub(super) fn source_list(&self) -> SourceList {
        match self.mode {
            FilterMode::Include => SourceList::Running,
            FilterMode::Exclude => SourceList::Stopped,
        }
    }

    /// A source entry on either list
    pub(super) fn source(&self, ord: Ordinal) -> Option<&SourceEntry> {
        self.running.get(&ord).or_else(|| self.stopped.get(&ord))
    }

    pub(super) fn source_mut(&mut self, ord: Ordinal) -> Option<&mut SourceEntry> {
        match self.running.get_mut(&ord) {
            Some(entry) => Some(entry),
            None => self.stopped.get_mut(&ord),
        }
    }
}

impl Instance {
    pub(super) fn group(&self, intf: IntfId, group: IpAddr) -> Option<&Group> {
        self.intfs.get(&intf).and_then(|i| i.groups.get(&group))
    }

    pub(super) fn group_mut(&mut self, intf: IntfId, group: IpAddr) -> Option<&mut Group> {
        self.intfs.get_mut(&intf).and_then(|i| i.groups.get_mut(&group))
    }

    /// Version to process a group's records at
    pub(super) fn group_version(&self, intf: IntfId, group: IpAddr) -> Version {
        let compat = if self
            .timers
            .is_running(&TimerType::BasicHostPresent { intf, group })
        {
            Version::Basic
        } else if self
            .timers
            .is_running(&TimerType::LeavesHostPresent { intf, group })
        {
            Version::Leaves
        } else {
            Version::Sources
        };
        let configured = self
            .intfs
            .get(&intf)
            .map_or(Version::Sources, |i| i.version);
        compat.min(configured)
    }

    pub(super) fn evaluate_group_version(&mut self, intf: IntfId, group: IpAddr) {
        let version = self.group_version(intf, group);
        if let Some(g) = self.group_mut(intf, group) {
            g.compat = version;
        }
    }

    pub(super) fn host_present_expiry(&mut self, intf: IntfId, group: IpAddr, _now: Instant) {
        self.evaluate_group_version(intf, group);
    }

    /// Evaluate the channel limit
    ///
    /// `incr` asks whether one more channel would fit. Returns true when the
    /// interface is at or above its limit.
    pub(super) fn check_grp_limit(&mut self, id: IntfId, incr: bool, now: Instant) -> bool {
        let Some(intf) = self.intfs.get_mut(&id) else {
            return false;
        };
        let limit = intf.channel_limit;
        if limit == 0 {
            return false;
        }
        let count = intf.channel_count;
        let actual = count + u32::from(incr);
        let threshold = intf.channel_threshold;
        let (state, event) = if count >= limit {
            (
                LimitState::AboveLimit,
                RouterEvent::GroupLimitExceeded {
                    intf: id,
                    count,
                    limit,
                },
            )
        } else if threshold != 100 && intf.threshold_count(actual) {
            (
                LimitState::AboveThreshold,
                RouterEvent::GroupThresholdExceeded {
                    intf: id,
                    count: actual,
                    threshold,
                    limit,
                },
            )
        } else {
            (
                LimitState::BelowThreshold,
                RouterEvent::GroupLimitBelow {
                    intf: id,
                    count,
                    limit,
                },
            )
        };

        let changed = state != intf.limit_state;
        let report = if intf.log_interval.is_zero() {
            // Without rate limiting, crossings above are reported every time
            changed || state != LimitState::BelowThreshold
        } else if changed {
            true
        } else if state != LimitState::BelowThreshold {
            intf.last_limit_log
                .map_or(true, |at| now.saturating_duration_since(at) > intf.log_interval)
        } else {
            false
        };
        intf.limit_state = state;
        if report {
            intf.last_limit_log = Some(now);
            match state {
                LimitState::BelowThreshold => log_info!(
                    self.logger,
                    Facility::Interface,
                    "Interface {} channel count {} back below limit {}",
                    id,
                    count,
                    limit
                ),
                _ => log_warning!(
                    self.logger,
                    Facility::Interface,
                    "Interface {} channel count {} approaching or at limit {} ({}%)",
                    id,
                    actual,
                    limit,
                    threshold
                ),
            }
            self.push_event(event);
        }
        state == LimitState::AboveLimit
    }

    /// Create an input group; `None` when the channel limit refuses it
    pub(super) fn create_group(&mut self, intf: IntfId, group: IpAddr, now: Instant) -> Option<()> {
        let limited = self.intfs.get(&intf)?.channel_limit != 0;
        if limited && self.check_grp_limit(intf, true, now) {
            let i = self.intfs.get_mut(&intf)?;
            i.stats.chan_limit_drops += 1;
            counter!("gmp_channel_limit_drops_total", "proto" => self.proto.as_str()).increment(1);
            log_debug!(
                self.logger,
                Facility::Engine,
                "Channel limit refused group {} on interface {}",
                group,
                intf
            );
            return None;
        }
        let i = self.intfs.get_mut(&intf)?;
        i.channel_count += 1;
        i.groups.insert(group, Group::new(group));
        self.evaluate_group_version(intf, group);
        counter!("gmp_groups_created_total", "proto" => self.proto.as_str()).increment(1);
        log_debug!(
            self.logger,
            Facility::Engine,
            "Created group {} on interface {}",
            group,
            intf
        );
        Some(())
    }

    /// Add a source entry; false when the channel limit refuses it
    pub(super) fn create_source(
        &mut self,
        intf: IntfId,
        group: IpAddr,
        list: SourceList,
        ord: Ordinal,
        now: Instant,
    ) -> bool {
        let Some(i) = self.intfs.get(&intf) else {
            return false;
        };
        let Some(g) = i.groups.get(&group) else {
            return false;
        };
        if !g.lists_empty() {
            if i.channel_limit != 0 && self.check_grp_limit(intf, true, now) {
                if let Some(i) = self.intfs.get_mut(&intf) {
                    i.stats.chan_limit_drops += 1;
                }
                counter!("gmp_channel_limit_drops_total", "proto" => self.proto.as_str())
                    .increment(1);
                return false;
            }
            if let Some(i) = self.intfs.get_mut(&intf) {
                i.channel_count += 1;
            }
        }
        let Some(g) = self.group_mut(intf, group) else {
            return false;
        };
        g.list_mut(list).insert(ord, SourceEntry::new(ord));
        self.addrs.retain(ord);
        true
    }

    /// Move a source entry between the running and stopped lists
    pub(super) fn move_source(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal, to: SourceList) {
        let Some(g) = self.group_mut(intf, group) else {
            return;
        };
        let from = match to {
            SourceList::Running => SourceList::Stopped,
            SourceList::Stopped => SourceList::Running,
        };
        if let Some(entry) = g.list_mut(from).remove(&ord) {
            g.list_mut(to).insert(ord, entry);
        }
    }

    /// Delete a source entry from whichever list holds it
    pub(super) fn free_source(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal, now: Instant) {
        if self.group(intf, group).and_then(|g| g.source(ord)).is_none() {
            return;
        }
        self.update_source_oif(intf, group, ord, OifUpdate::Delete);
        let Some(g) = self.group_mut(intf, group) else {
            return;
        };
        let Some(entry) = g.running.remove(&ord).or_else(|| g.stopped.remove(&ord)) else {
            return;
        };
        g.query_lo.remove(&ord);
        g.query_hi.remove(&ord);
        let others = !g.lists_empty();
        self.unlink_host_sources(intf, group, ord, &entry.hosts);
        self.timers.stop(&TimerType::Source {
            intf,
            group,
            source: ord,
        });
        self.addrs.release(ord);
        if others {
            if let Some(i) = self.intfs.get_mut(&intf) {
                i.channel_count = i.channel_count.saturating_sub(1);
            }
            self.check_grp_limit(intf, false, now);
        }
    }

    /// Free every entry of one list
    pub(super) fn flush_source_list(
        &mut self,
        intf: IntfId,
        group: IpAddr,
        list: SourceList,
        now: Instant,
    ) {
        let ords: Vec<Ordinal> = self
            .group(intf, group)
            .map(|g| g.list(list).keys().copied().collect())
            .unwrap_or_default();
        for ord in ords {
            self.free_source(intf, group, ord, now);
        }
    }

    pub(super) fn destroy_group(&mut self, intf: IntfId, group: IpAddr, now: Instant) {
        let Some(g) = self.group_mut(intf, group) else {
            return;
        };
        let hosts = std::mem::take(&mut g.hosts);
        self.unlink_host_groups(intf, group, &hosts);
        self.update_group_oif(intf, group, OifUpdate::Delete);
        self.flush_source_list(intf, group, SourceList::Running, now);
        self.flush_source_list(intf, group, SourceList::Stopped, now);
        for key in [
            TimerType::GroupMembership { intf, group },
            TimerType::GroupQuery { intf, group },
            TimerType::SourceQuery { intf, group },
            TimerType::BasicHostPresent { intf, group },
            TimerType::LeavesHostPresent { intf, group },
        ] {
            self.timers.stop(&key);
        }
        let Some(i) = self.intfs.get_mut(&intf) else {
            return;
        };
        i.xmit_groups.retain(|g| *g != group);
        i.groups.remove(&group);
        i.channel_count = i.channel_count.saturating_sub(1);
        log_debug!(
            self.logger,
            Facility::Engine,
            "Destroyed group {} on interface {}",
            group,
            intf
        );
        self.check_grp_limit(intf, false, now);
    }

    /// Free the group if nothing refers to it any more
    pub(super) fn attempt_group_free(&mut self, intf: IntfId, group: IpAddr, now: Instant) -> bool {
        let Some(g) = self.group(intf, group) else {
            return false;
        };
        let idle = g.mode == FilterMode::Include
            && g.oif.is_none()
            && g.lists_empty()
            && g.query_lo.is_empty()
            && g.query_hi.is_empty()
            && !self
                .timers
                .is_running(&TimerType::GroupMembership { intf, group });
        if idle {
            self.destroy_group(intf, group, now);
        }
        idle
    }

    /// Force a group to time out at once
    pub(super) fn timeout_group(&mut self, intf: IntfId, group: IpAddr, now: Instant) {
        let Some(g) = self.group(intf, group) else {
            return;
        };
        match g.mode {
            FilterMode::Exclude => {
                self.timers.start(
                    TimerType::GroupMembership { intf, group },
                    now,
                    Duration::ZERO,
                );
            }
            FilterMode::Include => {
                let ords: Vec<Ordinal> = g.running.keys().copied().collect();
                for source in ords {
                    self.timers
                        .start(TimerType::Source { intf, group, source }, now, Duration::ZERO);
                }
            }
        }
    }

    /// Queue a group for query transmission
    pub(super) fn enqueue_group_xmit(&mut self, intf: IntfId, group: IpAddr) {
        if let Some(i) = self.intfs.get_mut(&intf) {
            if !i.xmit_groups.contains(&group) {
                i.xmit_groups.push_back(group);
            }
        }
    }

    /// Drop every input and output group of an interface
    pub(super) fn destroy_intf_groups(&mut self, intf: IntfId, now: Instant) {
        let ogroups: Vec<IpAddr> = self
            .intfs
            .get(&intf)
            .map(|i| i.ogroups.keys().copied().collect())
            .unwrap_or_default();
        for group in ogroups {
            self.destroy_ogroup(intf, group);
        }
        let groups: Vec<IpAddr> = self
            .intfs
            .get(&intf)
            .map(|i| i.groups.keys().copied().collect())
            .unwrap_or_default();
        for group in groups {
            self.destroy_group(intf, group, now);
        }
    }
}
