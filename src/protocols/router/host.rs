// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Per-host tracking
//!
//! When enabled, every reporting host gets its own view of the groups and
//! (Include-mode) sources it asked for. This is what makes fast leave
//! possible: a group or source is dropped as soon as the last host that
//! wanted it leaves, without a last-member query round.
//!
//! Exclude-mode host state is tracked as a plain (*,G) join; exclusions are
//! not recorded per host.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::client::{HostNotification, HostNotificationType, HostNotifyKey};
use super::group::SourceList;
use super::{ClientId, GmpError, Instance, IntfId, RouterEvent, TimerType};
use crate::logging::Facility;
use crate::protocols::addr::{AddrSet, Ordinal};
use crate::protocols::{FilterMode, RecordType};
use crate::{log_debug, log_info};

#[derive(Debug)]
pub(crate) struct HostSource {
    /// Registered on the input group's source entry
    pub(super) linked: bool,
}

#[derive(Debug)]
pub(crate) struct HostGroup {
    pub(super) addr: IpAddr,
    /// Registered on the input group; an unlinked host group is inactive
    pub(super) linked: bool,
    pub(super) addrs: BTreeMap<Ordinal, HostSource>,
    /// Sources left but not yet reported to clients
    pub(super) deleted: BTreeMap<Ordinal, HostSource>,
}

#[derive(Debug)]
pub(crate) struct Host {
    pub(super) addr: IpAddr,
    pub(super) groups: BTreeMap<IpAddr, HostGroup>,
}

impl Instance {
    fn host_group(&self, intf: IntfId, host: IpAddr, group: IpAddr) -> Option<&HostGroup> {
        self.intfs
            .get(&intf)
            .and_then(|i| i.hosts.get(&host))
            .and_then(|h| h.groups.get(&group))
    }

    fn host_group_mut(&mut self, intf: IntfId, host: IpAddr, group: IpAddr) -> Option<&mut HostGroup> {
        self.intfs
            .get_mut(&intf)
            .and_then(|i| i.hosts.get_mut(&host))
            .and_then(|h| h.groups.get_mut(&group))
    }

    /// An input source entry went away; its hosts no longer point at it
    pub(super) fn unlink_host_sources(
        &mut self,
        intf: IntfId,
        group: IpAddr,
        ord: Ordinal,
        hosts: &BTreeSet<IpAddr>,
    ) {
        for host in hosts {
            if let Some(hg) = self.host_group_mut(intf, *host, group) {
                if let Some(hs) = hg.addrs.get_mut(&ord) {
                    hs.linked = false;
                } else if let Some(hs) = hg.deleted.get_mut(&ord) {
                    hs.linked = false;
                }
            }
        }
    }

    /// An input group went away; its host groups become inactive
    pub(super) fn unlink_host_groups(&mut self, intf: IntfId, group: IpAddr, hosts: &BTreeSet<IpAddr>) {
        for host in hosts {
            if let Some(hg) = self.host_group_mut(intf, *host, group) {
                hg.linked = false;
            }
        }
    }

    /// Update host state from one group record
    pub(super) fn host_process_report(
        &mut self,
        intf: IntfId,
        host: IpAddr,
        rec_type: RecordType,
        group: IpAddr,
        sources: &AddrSet,
        now: Instant,
    ) {
        if !self.host_tracking || self.group(intf, group).is_none() {
            return;
        }
        let Some(i) = self.intfs.get_mut(&intf) else {
            return;
        };
        let gmi = i.gmi;
        let fast_leave = i.fast_leave;
        let h = i.hosts.entry(host).or_insert_with(|| Host {
            addr: host,
            groups: BTreeMap::new(),
        });
        let new_group = !h.groups.contains_key(&group);
        let hg = h.groups.entry(group).or_insert_with(|| HostGroup {
            addr: group,
            linked: false,
            addrs: BTreeMap::new(),
            deleted: BTreeMap::new(),
        });
        let was_active = hg.linked;
        let was_empty = hg.addrs.is_empty();
        if !was_active {
            hg.linked = true;
            if let Some(g) = i.groups.get_mut(&group) {
                g.hosts.insert(host);
            }
        }

        let current = |inst: &Instance| -> Vec<Ordinal> {
            inst.host_group(intf, host, group)
                .map(|hg| hg.addrs.keys().copied().collect())
                .unwrap_or_default()
        };
        let mut delete_group = false;
        let mut notify_group = false;
        match rec_type {
            RecordType::IsInclude | RecordType::ToInclude => {
                if rec_type == RecordType::ToInclude {
                    for ord in current(self) {
                        if !sources.contains(&ord) {
                            self.delete_host_source(intf, host, group, ord, now);
                        }
                    }
                }
                for &ord in sources {
                    self.host_add_source(intf, host, group, ord, now);
                }
                if current(self).is_empty() {
                    delete_group = true;
                    notify_group = was_empty && !new_group;
                }
            }
            RecordType::IsExclude | RecordType::ToExclude => {
                let stale: Vec<Ordinal> = self
                    .host_group(intf, host, group)
                    .map(|hg| hg.addrs.keys().chain(hg.deleted.keys()).copied().collect())
                    .unwrap_or_default();
                for ord in stale {
                    self.free_host_source(intf, host, group, ord);
                }
                notify_group = !was_empty || !was_active;
            }
            RecordType::AllowNew => {
                if !was_active || !was_empty {
                    for &ord in sources {
                        self.host_add_source(intf, host, group, ord, now);
                    }
                }
            }
            RecordType::BlockOld => {
                if was_active && !was_empty {
                    for ord in current(self) {
                        if sources.contains(&ord) {
                            self.delete_host_source(intf, host, group, ord, now);
                        }
                    }
                }
                // A (*,G) host blocking sources keeps its join
                delete_group = current(self).is_empty() && !(was_active && was_empty);
            }
        }

        if delete_group {
            self.delink_host_group(intf, host, group, fast_leave, now);
        } else {
            let key = TimerType::HostGroup { intf, host, group };
            if current(self).is_empty() {
                self.timers.start(key, now, gmi);
            } else {
                self.timers.stop(&key);
            }
        }
        if notify_group {
            self.host_group_notify(intf, host, group);
        }
        self.attempt_host_group_free(intf, host, group);
    }

    /// Make a host group inactive; with fast leave the last one out ends
    /// the group
    fn delink_host_group(&mut self, intf: IntfId, host: IpAddr, group: IpAddr, fast_leave: bool, now: Instant) {
        let Some(hg) = self.host_group_mut(intf, host, group) else {
            return;
        };
        if !hg.linked {
            return;
        }
        hg.linked = false;
        let Some(g) = self.group_mut(intf, group) else {
            return;
        };
        g.hosts.remove(&host);
        if fast_leave && g.hosts.is_empty() {
            self.last_host_group_ref_gone(intf, group, now);
        }
    }

    fn host_add_source(&mut self, intf: IntfId, host: IpAddr, group: IpAddr, ord: Ordinal, now: Instant) {
        let gmi = match self.intfs.get(&intf) {
            Some(i) => i.gmi,
            None => return,
        };
        let Some(hg) = self.host_group_mut(intf, host, group) else {
            return;
        };
        let mut fresh = false;
        if !hg.addrs.contains_key(&ord) {
            let hs = match hg.deleted.remove(&ord) {
                Some(hs) => hs,
                None => {
                    fresh = true;
                    HostSource { linked: false }
                }
            };
            hg.addrs.insert(ord, hs);
        }
        let linked = hg.addrs.get(&ord).map_or(false, |hs| hs.linked);
        if fresh {
            self.addrs.retain(ord);
        }
        if !linked {
            let on_running = self
                .group_mut(intf, group)
                .and_then(|g| g.running.get_mut(&ord))
                .map(|entry| entry.hosts.insert(host))
                .is_some();
            if let Some(hs) = self
                .host_group_mut(intf, host, group)
                .and_then(|hg| hg.addrs.get_mut(&ord))
            {
                hs.linked = on_running;
            }
            self.host_source_notify(intf, host, group, ord);
        }
        self.timers.start(
            TimerType::HostSource {
                intf,
                host,
                group,
                source: ord,
            },
            now,
            gmi,
        );
    }

    /// A host stopped listening to a source
    fn delete_host_source(&mut self, intf: IntfId, host: IpAddr, group: IpAddr, ord: Ordinal, now: Instant) {
        let fast_leave = self.intfs.get(&intf).map_or(false, |i| i.fast_leave);
        let Some(hg) = self.host_group_mut(intf, host, group) else {
            return;
        };
        let Some(mut hs) = hg.addrs.remove(&ord) else {
            return;
        };
        let was_linked = std::mem::replace(&mut hs.linked, false);
        hg.deleted.insert(ord, hs);
        if was_linked {
            let last_gone = self
                .group_mut(intf, group)
                .and_then(|g| g.source_mut(ord))
                .map_or(false, |entry| {
                    entry.hosts.remove(&host);
                    entry.hosts.is_empty()
                });
            if fast_leave && last_gone {
                self.last_host_addr_ref_gone(intf, group, ord, now);
            }
        }
        self.host_source_notify(intf, host, group, ord);
        self.attempt_free_deleted_host_source(intf, host, group, ord);
    }

    /// Discard a host source outright, without telling clients
    fn free_host_source(&mut self, intf: IntfId, host: IpAddr, group: IpAddr, ord: Ordinal) {
        let Some(hg) = self.host_group_mut(intf, host, group) else {
            return;
        };
        let Some(hs) = hg.addrs.remove(&ord).or_else(|| hg.deleted.remove(&ord)) else {
            return;
        };
        if hs.linked {
            if let Some(entry) = self.group_mut(intf, group).and_then(|g| g.source_mut(ord)) {
                entry.hosts.remove(&host);
            }
        }
        let key = HostNotifyKey::Source {
            intf,
            host,
            group,
            source: ord,
        };
        for client in self.clients.values_mut() {
            client.host_queue.remove(&key);
        }
        self.timers.stop(&TimerType::HostSource {
            intf,
            host,
            group,
            source: ord,
        });
        self.addrs.release(ord);
    }

    fn last_host_addr_ref_gone(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal, now: Instant) {
        log_debug!(
            self.logger,
            Facility::Host,
            "Last host left source on group {} interface {}",
            group,
            intf
        );
        self.timers.start(
            TimerType::Source {
                intf,
                group,
                source: ord,
            },
            now,
            Duration::ZERO,
        );
    }

    /// Fast leave: no tracked host wants the group any more
    fn last_host_group_ref_gone(&mut self, intf: IntfId, group: IpAddr, now: Instant) {
        if !self.group(intf, group).map_or(false, |g| g.is_active()) {
            return;
        }
        log_info!(
            self.logger,
            Facility::Host,
            "Last host left group {} on interface {}",
            group,
            intf
        );
        self.flush_source_list(intf, group, SourceList::Running, now);
        self.flush_source_list(intf, group, SourceList::Stopped, now);
        if let Some(g) = self.group_mut(intf, group) {
            g.mode = FilterMode::Include;
        }
        self.timers
            .stop(&TimerType::GroupMembership { intf, group });
        self.update_oif_mode_change(intf, group, now);
        self.alert_clients();
    }

    fn host_enqueue(&mut self, key: HostNotifyKey, only: Option<ClientId>) {
        for client in self.clients.values_mut() {
            if !client.opts.host_notifications || client.in_startup {
                continue;
            }
            if only.map_or(false, |id| id != client.id) {
                continue;
            }
            if client.host_queue.is_empty() {
                client.host_notify = true;
            }
            client.host_queue.push_back(key.clone());
        }
    }

    fn host_group_notify(&mut self, intf: IntfId, host: IpAddr, group: IpAddr) {
        self.host_enqueue(HostNotifyKey::Group { intf, host, group }, None);
    }

    fn host_source_notify(&mut self, intf: IntfId, host: IpAddr, group: IpAddr, source: Ordinal) {
        self.host_enqueue(
            HostNotifyKey::Source {
                intf,
                host,
                group,
                source,
            },
            None,
        );
    }

    fn host_notification_queued(&self, key: &HostNotifyKey) -> bool {
        self.clients.values().any(|c| c.host_queue.contains(key))
    }

    fn attempt_free_deleted_host_source(&mut self, intf: IntfId, host: IpAddr, group: IpAddr, ord: Ordinal) {
        let deleted = self
            .host_group(intf, host, group)
            .map_or(false, |hg| hg.deleted.contains_key(&ord));
        let key = HostNotifyKey::Source {
            intf,
            host,
            group,
            source: ord,
        };
        if deleted && !self.host_notification_queued(&key) {
            self.free_host_source(intf, host, group, ord);
        }
    }

    /// Free an inactive, empty host group nobody is waiting on
    fn attempt_host_group_free(&mut self, intf: IntfId, host: IpAddr, group: IpAddr) -> bool {
        let Some(hg) = self.host_group(intf, host, group) else {
            return false;
        };
        let idle = !hg.linked
            && hg.addrs.is_empty()
            && hg.deleted.is_empty()
            && !self.host_notification_queued(&HostNotifyKey::Group { intf, host, group });
        if idle {
            self.destroy_host_group(intf, host, group);
        }
        idle
    }

    fn destroy_host_group(&mut self, intf: IntfId, host: IpAddr, group: IpAddr) {
        let ords: Vec<Ordinal> = self
            .host_group(intf, host, group)
            .map(|hg| hg.addrs.keys().chain(hg.deleted.keys()).copied().collect())
            .unwrap_or_default();
        for ord in ords {
            self.free_host_source(intf, host, group, ord);
        }
        let key = HostNotifyKey::Group { intf, host, group };
        for client in self.clients.values_mut() {
            client.host_queue.remove(&key);
        }
        self.timers.stop(&TimerType::HostGroup { intf, host, group });
        if let Some(g) = self.group_mut(intf, group) {
            g.hosts.remove(&host);
        }
        let Some(i) = self.intfs.get_mut(&intf) else {
            return;
        };
        let empty = match i.hosts.get_mut(&host) {
            Some(h) => {
                h.groups.remove(&group);
                h.groups.is_empty()
            }
            None => false,
        };
        if empty {
            i.hosts.remove(&host);
        }
    }

    /// Forget every tracked host of an interface
    pub(super) fn destroy_intf_hosts(&mut self, intf: IntfId) {
        let pairs: Vec<(IpAddr, IpAddr)> = self
            .intfs
            .get(&intf)
            .map(|i| {
                i.hosts
                    .values()
                    .flat_map(|h| h.groups.keys().map(move |g| (h.addr, *g)))
                    .collect()
            })
            .unwrap_or_default();
        for (host, group) in pairs {
            self.destroy_host_group(intf, host, group);
        }
    }

    pub(super) fn host_group_expiry(&mut self, intf: IntfId, host: IpAddr, group: IpAddr, now: Instant) {
        let fast_leave = self.intfs.get(&intf).map_or(false, |i| i.fast_leave);
        if self.host_group(intf, host, group).is_none() {
            return;
        }
        log_debug!(
            self.logger,
            Facility::Host,
            "Host {} timed out of group {} on interface {}",
            host,
            group,
            intf
        );
        self.delink_host_group(intf, host, group, fast_leave, now);
        self.host_group_notify(intf, host, group);
        self.attempt_host_group_free(intf, host, group);
        self.alert_host_clients();
    }

    pub(super) fn host_source_expiry(
        &mut self,
        intf: IntfId,
        host: IpAddr,
        group: IpAddr,
        ord: Ordinal,
        now: Instant,
    ) {
        let active = self
            .host_group(intf, host, group)
            .map_or(false, |hg| hg.addrs.contains_key(&ord));
        if !active {
            return;
        }
        self.delete_host_source(intf, host, group, ord, now);
        if self
            .host_group(intf, host, group)
            .map_or(false, |hg| hg.addrs.is_empty())
        {
            let fast_leave = self.intfs.get(&intf).map_or(false, |i| i.fast_leave);
            self.delink_host_group(intf, host, group, fast_leave, now);
        }
        self.attempt_host_group_free(intf, host, group);
        self.alert_clients();
        self.alert_host_clients();
    }

    /// Output mapping changed: tell host clients about every host of a group
    pub(super) fn host_notify_oif_map_change(&mut self, intf: IntfId, group: IpAddr) {
        let hosts: Vec<IpAddr> = self
            .group(intf, group)
            .map(|g| g.hosts.iter().copied().collect())
            .unwrap_or_default();
        for host in hosts {
            let ords: Vec<Ordinal> = self
                .host_group(intf, host, group)
                .map(|hg| hg.addrs.keys().copied().collect())
                .unwrap_or_default();
            if ords.is_empty() {
                self.host_group_notify(intf, host, group);
            }
            for ord in ords {
                self.host_source_notify(intf, host, group, ord);
            }
        }
    }

    pub(super) fn client_enqueue_all_host_groups(&mut self, client: ClientId) {
        let mut keys = Vec::new();
        for i in self.intfs.values() {
            for h in i.hosts.values() {
                for hg in h.groups.values().filter(|hg| hg.linked) {
                    if hg.addrs.is_empty() {
                        keys.push(HostNotifyKey::Group {
                            intf: i.id,
                            host: h.addr,
                            group: hg.addr,
                        });
                    }
                    for ord in hg.addrs.keys() {
                        keys.push(HostNotifyKey::Source {
                            intf: i.id,
                            host: h.addr,
                            group: hg.addr,
                            source: *ord,
                        });
                    }
                }
            }
        }
        for key in keys {
            self.host_enqueue(key, Some(client));
        }
    }

    pub(super) fn alert_host_clients(&mut self) {
        if !self.host_tracking {
            return;
        }
        let mut ready = Vec::new();
        for client in self.clients.values_mut() {
            if client.host_notify {
                client.host_notify = false;
                ready.push(client.id);
            }
        }
        for client in ready {
            self.push_event(RouterEvent::HostNotificationsReady { client });
        }
    }

    /// Follow-up once a host notification left a queue for good
    pub(super) fn delete_host_notification(&mut self, key: &HostNotifyKey) {
        match *key {
            HostNotifyKey::Group { intf, host, group } => {
                self.attempt_host_group_free(intf, host, group);
            }
            HostNotifyKey::Source {
                intf,
                host,
                group,
                source,
            } => {
                self.attempt_free_deleted_host_source(intf, host, group, source);
                self.attempt_host_group_free(intf, host, group);
            }
        }
    }

    fn host_notify_type(&self, intf: IntfId, active: bool, timer: &TimerType) -> HostNotificationType {
        if active {
            HostNotificationType::Join
        } else if !self.timers.is_running(timer) {
            HostNotificationType::Timeout
        } else if !self.intfs.get(&intf).map_or(false, |i| i.up) {
            HostNotificationType::IfDown
        } else {
            HostNotificationType::Leave
        }
    }

    /// Take the next host notification for a client
    pub fn get_host_notification(&mut self, id: ClientId) -> Result<Option<HostNotification>, GmpError> {
        let client = self.clients.get_mut(&id).ok_or(GmpError::UnknownClient(id))?;
        let Some(key) = client.host_queue.pop_front() else {
            return Ok(None);
        };
        let notif = match key {
            HostNotifyKey::Group { intf, host, group } => {
                let active = self
                    .host_group(intf, host, group)
                    .map_or(false, |hg| hg.linked);
                HostNotification {
                    kind: self.host_notify_type(intf, active, &TimerType::HostGroup { intf, host, group }),
                    intf,
                    group,
                    host,
                    source: None,
                }
            }
            HostNotifyKey::Source {
                intf,
                host,
                group,
                source,
            } => {
                let active = self
                    .host_group(intf, host, group)
                    .map_or(false, |hg| hg.addrs.contains_key(&source));
                let timer = TimerType::HostSource {
                    intf,
                    host,
                    group,
                    source,
                };
                HostNotification {
                    kind: self.host_notify_type(intf, active, &timer),
                    intf,
                    group,
                    host,
                    source: self.addrs.addr(source),
                }
            }
        };
        self.delete_host_notification(&key);
        Ok(Some(notif))
    }

    /// Hand a host notification back once consumed
    pub fn return_host_notification(&mut self, id: ClientId, _notif: HostNotification) -> Result<(), GmpError> {
        if !self.clients.contains_key(&id) {
            return Err(GmpError::UnknownClient(id));
        }
        Ok(())
    }

    /// Requeue every active host membership for a client
    pub fn refresh_host_state(&mut self, id: ClientId) -> Result<(), GmpError> {
        if !self.clients.contains_key(&id) {
            return Err(GmpError::UnknownClient(id));
        }
        self.client_enqueue_all_host_groups(id);
        self.alert_host_clients();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{ClientOptions, IntfParams};
    use super::*;
    use crate::protocols::{GroupRecord, Packet, Version};

    fn report(host: IpAddr, rec_type: RecordType, group: IpAddr, sources: Vec<IpAddr>) -> Packet {
        Packet::report(
            Version::Sources,
            host,
            vec![GroupRecord::new(rec_type, group, sources)],
        )
    }

    fn tracked(now: Instant, fast_leave: bool) -> (Instance, ClientId) {
        let (mut inst, _sink) = instance_with_intf(now);
        inst.enable_host_tracking();
        let params = IntfParams {
            fast_leave,
            ..IntfParams::default()
        };
        inst.set_intf_params(IntfId(1), &params, now).unwrap();
        let opts = ClientOptions {
            host_notifications: true,
            ..ClientOptions::default()
        };
        let client = inst.register_client(opts, now).unwrap();
        inst.run_timers(now);
        (inst, client)
    }

    #[test]
    fn test_host_join_and_leave_notifications() {
        let now = Instant::now();
        let (mut inst, client) = tracked(now, false);
        let g = v4(239, 1, 1, 1);
        let host = v4(10, 0, 0, 20);
        inst.receive_packet(IntfId(1), &report(host, RecordType::ToExclude, g, vec![]), now)
            .unwrap();
        assert!(inst
            .take_events()
            .contains(&RouterEvent::HostNotificationsReady { client }));
        let join = inst.get_host_notification(client).unwrap().unwrap();
        assert_eq!(join.kind, HostNotificationType::Join);
        assert_eq!(join.host, host);
        assert_eq!(join.source, None);

        inst.receive_packet(IntfId(1), &report(host, RecordType::ToInclude, g, vec![]), now)
            .unwrap();
        let leave = inst.get_host_notification(client).unwrap().unwrap();
        assert_eq!(leave.kind, HostNotificationType::Leave);
        assert_eq!(inst.get_host_notification(client).unwrap(), None);
        assert!(inst.intfs[&IntfId(1)].hosts.is_empty());
    }

    /// Two hosts join a group and both leave at `now`
    fn both_hosts_leave(now: Instant, fast_leave: bool) -> (Instance, IpAddr) {
        let (mut inst, _client) = tracked(now, fast_leave);
        let g = v4(239, 1, 1, 2);
        let h1 = v4(10, 0, 0, 21);
        let h2 = v4(10, 0, 0, 22);
        for host in [h1, h2] {
            inst.receive_packet(IntfId(1), &report(host, RecordType::ToExclude, g, vec![]), now)
                .unwrap();
        }
        inst.receive_packet(IntfId(1), &report(h1, RecordType::ToInclude, g, vec![]), now)
            .unwrap();
        assert_eq!(
            inst.group(IntfId(1), g).map(|g| g.mode),
            Some(FilterMode::Exclude)
        );
        inst.receive_packet(IntfId(1), &report(h2, RecordType::ToInclude, g, vec![]), now)
            .unwrap();
        (inst, g)
    }

    #[test]
    fn test_fast_leave_drops_group_with_last_host() {
        let now = Instant::now();
        let (mut inst, g) = both_hosts_leave(now, true);
        assert!(inst.group(IntfId(1), g).is_none());
        inst.run_timers(now + Duration::from_millis(10));
        assert!(!inst.is_forwarding_channel(IntfId(1), None, g, false).unwrap());
    }

    #[test]
    fn test_leave_without_fast_leave_waits_for_queries() {
        let now = Instant::now();
        let (mut inst, g) = both_hosts_leave(now, false);
        inst.run_timers(now + Duration::from_millis(10));
        assert_eq!(
            inst.group(IntfId(1), g).map(|g| g.mode),
            Some(FilterMode::Exclude)
        );
        assert!(inst.is_forwarding_channel(IntfId(1), None, g, false).unwrap());

        let lmqt = inst.intfs[&IntfId(1)].lmqt;
        inst.run_timers(now + lmqt);
        assert!(!inst.is_forwarding_channel(IntfId(1), None, g, false).unwrap());
    }

    #[test]
    fn test_fast_leave_times_out_source_with_last_host() {
        let now = Instant::now();
        let (mut inst, _client) = tracked(now, true);
        let g = v4(232, 1, 1, 3);
        let s = v4(192, 168, 1, 1);
        let host = v4(10, 0, 0, 23);
        inst.receive_packet(IntfId(1), &report(host, RecordType::AllowNew, g, vec![s]), now)
            .unwrap();
        let ord = inst.addrs.lookup(&s).unwrap();
        assert!(inst.group(IntfId(1), g).unwrap().running[&ord].hosts.contains(&host));

        inst.receive_packet(IntfId(1), &report(host, RecordType::BlockOld, g, vec![s]), now)
            .unwrap();
        inst.run_timers(now);
        assert!(inst.group(IntfId(1), g).is_none());
    }

    #[test]
    fn test_host_group_timeout() {
        let now = Instant::now();
        let (mut inst, client) = tracked(now, false);
        let g = v4(239, 1, 1, 4);
        let host = v4(10, 0, 0, 24);
        inst.receive_packet(IntfId(1), &report(host, RecordType::IsExclude, g, vec![]), now)
            .unwrap();
        inst.get_host_notification(client).unwrap();

        let later = now + inst.intfs[&IntfId(1)].gmi;
        inst.run_timers(later);
        let notif = inst.get_host_notification(client).unwrap().unwrap();
        assert_eq!(notif.kind, HostNotificationType::Timeout);
    }
}
