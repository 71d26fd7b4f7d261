// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Clients and their notification queues
//!
//! A client sees output group state as a stream of notifications. Queues
//! hold references to state, not copies: enqueueing something already
//! queued just moves it to the tail, and the notification content is built
//! from current state when the client pulls it. A burst of changes to one
//! group therefore collapses into a single notification.
//!
//! Removed output sources sit on their group's deleted list until no client
//! queue references them.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::oif::OifList;
use super::{ClientId, GmpError, Instance, IntfId, RouterEvent, TimerType};
use crate::logging::Facility;
use crate::protocols::addr::Ordinal;
use crate::protocols::FilterMode;
use crate::{log_debug, log_info};

/// Ordered set with move-to-tail insertion
#[derive(Debug)]
pub(crate) struct NotifyQueue<K> {
    order: BTreeMap<u64, K>,
    index: HashMap<K, u64>,
    next_seq: u64,
}

impl<K: Clone + Eq + Hash> Default for NotifyQueue<K> {
    fn default() -> Self {
        Self {
            order: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Clone + Eq + Hash> NotifyQueue<K> {
    /// Append, or move an already queued key to the tail
    pub(crate) fn push_back(&mut self, key: K) {
        if let Some(seq) = self.index.remove(&key) {
            self.order.remove(&seq);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.index.insert(key, seq);
    }

    pub(crate) fn remove(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(seq) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub(crate) fn front(&self) -> Option<&K> {
        self.order.values().next()
    }

    pub(crate) fn second(&self) -> Option<&K> {
        self.order.values().nth(1)
    }

    pub(crate) fn pop_front(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.index.remove(&key);
        Some(key)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<K> {
        self.index.clear();
        std::mem::take(&mut self.order).into_values().collect()
    }
}

/// What a queued notification refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum NotifyKey {
    Group { oif: IntfId, group: IpAddr },
    Source { oif: IntfId, group: IpAddr, entry: u64 },
    RefreshEnd,
}

impl NotifyKey {
    fn channel(&self) -> Option<(IntfId, IpAddr)> {
        match self {
            NotifyKey::Group { oif, group } | NotifyKey::Source { oif, group, .. } => {
                Some((*oif, *group))
            }
            NotifyKey::RefreshEnd => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HostNotifyKey {
    Group { intf: IntfId, host: IpAddr, group: IpAddr },
    Source { intf: IntfId, host: IpAddr, group: IpAddr, source: Ordinal },
}

/// What a client wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Per-source delta notifications
    pub delta: bool,
    /// Full group state snapshots
    pub full: bool,
    pub host_notifications: bool,
    pub querier_notifications: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            delta: true,
            full: false,
            host_notifications: false,
            querier_notifications: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    GroupDelete,
    GroupAddExclude,
    GroupAddInclude,
    AllowSource,
    BlockSource,
    #[default]
    RefreshEnd,
    /// Complete state of a group
    GroupState,
}

/// One notification handed to a client
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientNotification {
    pub kind: NotificationType,
    pub intf: Option<IntfId>,
    pub group: Option<IpAddr>,
    pub source: Option<IpAddr>,
    pub filter_mode: FilterMode,
    /// Active sources, for `GroupState`
    pub sources: Vec<IpAddr>,
    /// No further notification for this channel follows in the queue
    pub last_sg: bool,
}

impl ClientNotification {
    fn reset(&mut self) {
        self.kind = NotificationType::RefreshEnd;
        self.intf = None;
        self.group = None;
        self.source = None;
        self.filter_mode = FilterMode::Include;
        self.sources.clear();
        self.last_sg = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostNotificationType {
    Join,
    Leave,
    Timeout,
    IfDown,
}

/// A tracked host joined or left a group or (source, group)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostNotification {
    pub kind: HostNotificationType,
    pub intf: IntfId,
    pub group: IpAddr,
    pub host: IpAddr,
    pub source: Option<IpAddr>,
}

#[derive(Debug)]
pub(crate) struct Client {
    pub(super) id: ClientId,
    pub(super) opts: ClientOptions,
    pub(super) queue: NotifyQueue<NotifyKey>,
    pub(super) host_queue: NotifyQueue<HostNotifyKey>,
    /// Queue became non-empty since the last alert
    pub(super) notify: bool,
    pub(super) host_notify: bool,
    /// Initial state has not been queued yet
    pub(super) in_startup: bool,
    spare: Option<ClientNotification>,
}

impl Instance {
    fn client(&self, id: ClientId) -> Result<&Client, GmpError> {
        self.clients.get(&id).ok_or(GmpError::UnknownClient(id))
    }

    /// Register a client; its initial state is queued on the next timer run
    pub fn register_client(
        &mut self,
        opts: ClientOptions,
        now: Instant,
    ) -> Result<ClientId, GmpError> {
        if self.clients.len() >= self.params.max_clients {
            return Err(GmpError::TooManyClients(self.params.max_clients));
        }
        let id = (0..)
            .map(ClientId)
            .find(|id| !self.clients.contains_key(id))
            .ok_or(GmpError::TooManyClients(self.params.max_clients))?;
        self.clients.insert(
            id,
            Client {
                id,
                opts,
                queue: NotifyQueue::default(),
                host_queue: NotifyQueue::default(),
                notify: false,
                host_notify: false,
                in_startup: true,
                spare: None,
            },
        );
        self.timers
            .start(TimerType::ClientStartup { client: id }, now, Duration::ZERO);
        log_info!(
            self.logger,
            Facility::Client,
            "Registered client {} ({:?})",
            id,
            opts
        );
        Ok(id)
    }

    /// Remove a client and everything it still had queued
    pub fn detach_client(&mut self, id: ClientId) -> Result<(), GmpError> {
        let mut client = self.clients.remove(&id).ok_or(GmpError::UnknownClient(id))?;
        self.timers.stop(&TimerType::ClientStartup { client: id });
        for intf in self.intfs.values_mut() {
            for og in intf.ogroups.values_mut() {
                og.full_pending.remove(&id);
            }
        }
        for key in client.queue.drain() {
            self.delete_notification(&key);
        }
        for key in client.host_queue.drain() {
            self.delete_host_notification(&key);
        }
        log_info!(self.logger, Facility::Client, "Detached client {}", id);
        Ok(())
    }

    pub(super) fn client_startup_expiry(&mut self, id: ClientId, _now: Instant) {
        match self.clients.get_mut(&id) {
            Some(client) => client.in_startup = false,
            None => return,
        }
        self.client_enqueue_all_groups(id, true);
        self.alert_clients();
        self.client_enqueue_all_host_groups(id);
        self.alert_host_clients();
    }

    fn client_enqueue(&mut self, id: ClientId, key: NotifyKey) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if client.in_startup {
            return;
        }
        if client.queue.is_empty() {
            client.notify = true;
        }
        let full = client.opts.full;
        let channel = key.channel();
        client.queue.push_back(key);
        if let (true, Some((oif, group))) = (full, channel) {
            if let Some(og) = self.ogroup_mut(oif, group) {
                og.full_pending.insert(id);
            }
        }
    }

    pub(super) fn client_enqueue_group(&mut self, id: ClientId, oif: IntfId, group: IpAddr) {
        self.client_enqueue(id, NotifyKey::Group { oif, group });
    }

    pub(super) fn client_enqueue_source(&mut self, id: ClientId, oif: IntfId, group: IpAddr, entry: u64) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        if client.opts.full && !client.opts.delta {
            self.client_enqueue_group(id, oif, group);
        } else {
            self.client_enqueue(id, NotifyKey::Source { oif, group, entry });
        }
    }

    fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    pub(super) fn group_notify_clients(&mut self, oif: IntfId, group: IpAddr) {
        for id in self.client_ids() {
            self.client_enqueue_group(id, oif, group);
        }
    }

    /// Queue an output source for every client if it changed (or always,
    /// when `unconditional`)
    pub(super) fn source_notify_clients(
        &mut self,
        oif: IntfId,
        group: IpAddr,
        entry: u64,
        unconditional: bool,
    ) {
        let Some(src) = self
            .ogroup_mut(oif, group)
            .and_then(|og| og.sources.get_mut(&entry))
        else {
            return;
        };
        let send = unconditional || src.notify;
        src.notify = false;
        if send {
            for id in self.client_ids() {
                self.client_enqueue_source(id, oif, group, entry);
            }
        }
        self.attempt_free_deleted_source(oif, group, entry);
    }

    /// Queue every active source of an output group, for one client or all
    pub(super) fn enqueue_all_source_notifications(
        &mut self,
        oif: IntfId,
        group: IpAddr,
        client: Option<ClientId>,
    ) {
        let Some(og) = self.ogroup(oif, group) else {
            return;
        };
        let entries = og.active_entries();
        let clients = match client {
            Some(id) => vec![id],
            None => self.client_ids(),
        };
        for (_, entry) in entries {
            for id in &clients {
                self.client_enqueue_source(*id, oif, group, entry);
            }
        }
    }

    /// An output group switched mode: everything the clients knew is stale
    pub(super) fn mode_change_notify_clients(&mut self, oif: IntfId, group: IpAddr) {
        self.group_notify_clients(oif, group);
        self.flush_group_source_notifications(oif, group, None);
        self.enqueue_all_source_notifications(oif, group, None);
    }

    pub(super) fn group_notification_queued(&self, oif: IntfId, group: IpAddr) -> bool {
        let key = NotifyKey::Group { oif, group };
        self.clients.values().any(|c| c.queue.contains(&key))
    }

    fn source_notification_queued(&self, oif: IntfId, group: IpAddr, entry: u64) -> bool {
        let key = NotifyKey::Source { oif, group, entry };
        self.clients.values().any(|c| c.queue.contains(&key))
    }

    /// Free a deleted output source nobody is waiting to hear about
    pub(super) fn attempt_free_deleted_source(&mut self, oif: IntfId, group: IpAddr, entry: u64) -> bool {
        let deleted = self
            .ogroup(oif, group)
            .and_then(|og| og.sources.get(&entry))
            .map_or(false, |src| src.list == OifList::Deleted);
        if !deleted || self.source_notification_queued(oif, group, entry) {
            return false;
        }
        let Some(og) = self.ogroup_mut(oif, group) else {
            return false;
        };
        let Some(src) = og.sources.remove(&entry) else {
            return false;
        };
        og.deleted.remove(&src.ord);
        self.addrs.release(src.ord);
        self.attempt_ogroup_free(oif, group);
        true
    }

    /// Follow-up once a notification left a queue for good
    fn delete_notification(&mut self, key: &NotifyKey) {
        match *key {
            NotifyKey::Group { oif, group } => {
                self.attempt_ogroup_free(oif, group);
            }
            NotifyKey::Source { oif, group, entry } => {
                self.attempt_free_deleted_source(oif, group, entry);
            }
            NotifyKey::RefreshEnd => {}
        }
    }

    /// Pull a key out of every client queue
    fn flush_notifications(&mut self, key: &NotifyKey, just_delink: bool) {
        let mut removed = false;
        for client in self.clients.values_mut() {
            removed |= client.queue.remove(key);
        }
        if removed && !just_delink {
            self.delete_notification(key);
        }
    }

    pub(super) fn flush_source_notifications(
        &mut self,
        oif: IntfId,
        group: IpAddr,
        entry: u64,
        just_delink: bool,
    ) {
        self.flush_notifications(&NotifyKey::Source { oif, group, entry }, just_delink);
    }

    /// Drop queued source notifications of a group, for one client or all;
    /// deleted sources no longer referenced are freed
    pub(super) fn flush_group_source_notifications(
        &mut self,
        oif: IntfId,
        group: IpAddr,
        client: Option<ClientId>,
    ) {
        let Some(og) = self.ogroup(oif, group) else {
            return;
        };
        let entries: Vec<u64> = og.sources.keys().copied().collect();
        for entry in entries {
            let key = NotifyKey::Source { oif, group, entry };
            match client {
                Some(id) => {
                    let removed = self
                        .clients
                        .get_mut(&id)
                        .map_or(false, |c| c.queue.remove(&key));
                    if removed {
                        self.delete_notification(&key);
                    }
                }
                None => self.flush_notifications(&key, false),
            }
        }
    }

    /// Drop every notification of an output group; used when it is destroyed
    pub(super) fn flush_group_notifications(&mut self, oif: IntfId, group: IpAddr, just_delink: bool) {
        self.flush_notifications(&NotifyKey::Group { oif, group }, just_delink);
        let entries: Vec<u64> = self
            .ogroup(oif, group)
            .map(|og| og.sources.keys().copied().collect())
            .unwrap_or_default();
        for entry in entries {
            self.flush_source_notifications(oif, group, entry, just_delink);
        }
    }

    fn client_enqueue_all_intf_groups(&mut self, id: ClientId, intf: IntfId, flush: bool) {
        let groups: Vec<IpAddr> = self
            .intfs
            .get(&intf)
            .map(|i| i.ogroups.keys().copied().collect())
            .unwrap_or_default();
        for group in groups {
            if flush {
                self.flush_group_source_notifications(intf, group, Some(id));
            }
            if self.ogroup(intf, group).is_none() {
                continue;
            }
            self.client_enqueue_group(id, intf, group);
            self.enqueue_all_source_notifications(intf, group, Some(id));
        }
    }

    fn client_enqueue_all_groups(&mut self, id: ClientId, flush: bool) {
        for intf in self.intf_ids() {
            self.client_enqueue_all_intf_groups(id, intf, flush);
        }
    }

    /// Leave startup early, so a refresh is queued behind the initial state
    fn end_client_startup(&mut self, id: ClientId) {
        if let Some(client) = self.clients.get_mut(&id) {
            if client.in_startup {
                client.in_startup = false;
                self.timers.stop(&TimerType::ClientStartup { client: id });
            }
        }
    }

    /// Requeue the complete state, followed by a `RefreshEnd` marker
    pub fn refresh(&mut self, id: ClientId, flush: bool) -> Result<(), GmpError> {
        self.client(id)?;
        self.end_client_startup(id);
        self.client_enqueue_all_groups(id, flush);
        self.client_enqueue(id, NotifyKey::RefreshEnd);
        log_debug!(self.logger, Facility::Client, "Refresh queued for client {}", id);
        self.alert_clients();
        Ok(())
    }

    /// Requeue the state of one interface
    pub fn refresh_intf(&mut self, id: ClientId, intf: IntfId, flush: bool) -> Result<(), GmpError> {
        self.client(id)?;
        self.intf(intf)?;
        self.end_client_startup(id);
        self.client_enqueue_all_intf_groups(id, intf, flush);
        self.alert_clients();
        Ok(())
    }

    /// Signal clients whose queue became non-empty
    pub(super) fn alert_clients(&mut self) {
        let mut ready = Vec::new();
        for client in self.clients.values_mut() {
            if client.notify {
                client.notify = false;
                ready.push(client.id);
            }
        }
        for client in ready {
            self.push_event(RouterEvent::NotificationsReady { client });
        }
    }

    /// Take the next notification for a client
    ///
    /// `prev` hands back a previous notification so its buffers get reused.
    pub fn get_notification(
        &mut self,
        id: ClientId,
        prev: Option<ClientNotification>,
    ) -> Result<Option<ClientNotification>, GmpError> {
        let client = self.clients.get_mut(&id).ok_or(GmpError::UnknownClient(id))?;
        let Some(key) = client.queue.front().cloned() else {
            if prev.is_some() {
                client.spare = prev;
            }
            return Ok(None);
        };
        let opts = client.opts;
        let mut notif = prev.or_else(|| client.spare.take()).unwrap_or_default();
        notif.reset();

        let mut full = false;
        if let Some((oif, group)) = key.channel() {
            notif.intf = Some(oif);
            notif.group = Some(group);
            let up = self.intfs.get(&oif).map_or(false, |i| i.up);
            let Some(og) = self.intfs.get_mut(&oif).and_then(|i| i.ogroups.get_mut(&group)) else {
                // A queued key always has its group; drop it if not
                if let Some(client) = self.clients.get_mut(&id) {
                    client.queue.pop_front();
                }
                return Ok(None);
            };
            notif.filter_mode = og.mode;
            if og.is_active() && up && og.full_pending.remove(&id) {
                full = true;
                notif.kind = NotificationType::GroupState;
                let ords: Vec<Ordinal> = og.active_entries().into_iter().map(|(o, _)| o).collect();
                notif.sources = self.addrs.addrs_of(&ords);
            } else {
                match key {
                    NotifyKey::Group { .. } => {
                        notif.kind = match (og.is_active() && up, og.mode) {
                            (true, FilterMode::Include) => NotificationType::GroupAddInclude,
                            (true, FilterMode::Exclude) => NotificationType::GroupAddExclude,
                            (false, _) => NotificationType::GroupDelete,
                        };
                    }
                    NotifyKey::Source { entry, .. } => {
                        let Some(src) = og.sources.get(&entry) else {
                            if let Some(client) = self.clients.get_mut(&id) {
                                client.queue.pop_front();
                            }
                            return Ok(None);
                        };
                        let block = match og.mode {
                            FilterMode::Include => src.list == OifList::Deleted || !up,
                            // A source on both lists is still forwarded
                            FilterMode::Exclude => {
                                src.list == OifList::Exclude
                                    && !og.incl.contains_key(&src.ord)
                                    && up
                            }
                        };
                        notif.kind = if block {
                            NotificationType::BlockSource
                        } else {
                            NotificationType::AllowSource
                        };
                        notif.source = self.addrs.addr(src.ord);
                    }
                    NotifyKey::RefreshEnd => {}
                }
            }
        }

        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(None);
        };
        let keep = full && opts.delta && opts.full;
        let next = if keep {
            client.queue.second().cloned()
        } else {
            client.queue.pop_front();
            client.queue.front().cloned()
        };
        notif.last_sg = match (&next, key.channel()) {
            (None, _) => true,
            (Some(NotifyKey::Group { .. } | NotifyKey::RefreshEnd), _) => true,
            (Some(next), channel) => next.channel() != channel,
        };
        if !keep {
            self.delete_notification(&key);
        }
        Ok(Some(notif))
    }

    /// Hand a notification back for buffer reuse
    pub fn return_notification(&mut self, id: ClientId, notif: ClientNotification) -> Result<(), GmpError> {
        let client = self.clients.get_mut(&id).ok_or(GmpError::UnknownClient(id))?;
        client.spare = Some(notif);
        Ok(())
    }

    /// Number of notifications waiting for a client
    pub fn pending_notifications(&self, id: ClientId) -> Result<usize, GmpError> {
        Ok(self.client(id)?.queue.len())
    }

    pub fn client_ids_registered(&self) -> Vec<ClientId> {
        self.client_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::protocols::{GroupRecord, Packet, RecordType, Version};

    #[test]
    fn test_queue_moves_to_tail() {
        let mut q: NotifyQueue<u32> = NotifyQueue::default();
        q.push_back(1);
        q.push_back(2);
        q.push_back(3);
        q.push_back(1);
        assert_eq!(q.len(), 3);
        assert_eq!(q.front(), Some(&2));
        assert_eq!(q.second(), Some(&3));
        assert!(q.remove(&3));
        assert!(!q.contains(&3));
        assert_eq!(q.drain(), vec![2, 1]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_client_limit() {
        let now = Instant::now();
        let (mut inst, _sink) = instance(now);
        for _ in 0..crate::protocols::router::DEFAULT_MAX_CLIENTS {
            inst.register_client(ClientOptions::default(), now).unwrap();
        }
        assert!(matches!(
            inst.register_client(ClientOptions::default(), now),
            Err(GmpError::TooManyClients(_))
        ));
        inst.detach_client(ClientId(3)).unwrap();
        assert_eq!(
            inst.register_client(ClientOptions::default(), now).unwrap(),
            ClientId(3)
        );
    }

    #[test]
    fn test_startup_delivers_existing_state() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        let report = Packet::report(
            Version::Sources,
            v4(10, 0, 0, 9),
            vec![GroupRecord::new(
                RecordType::IsInclude,
                v4(232, 1, 1, 1),
                vec![v4(192, 168, 0, 1)],
            )],
        );
        inst.receive_packet(IntfId(1), &report, now).unwrap();

        let client = inst.register_client(ClientOptions::default(), now).unwrap();
        assert_eq!(inst.get_notification(client, None).unwrap(), None);
        inst.run_timers(now);
        assert!(inst
            .take_events()
            .contains(&RouterEvent::NotificationsReady { client }));

        let first = inst.get_notification(client, None).unwrap().unwrap();
        assert_eq!(first.kind, NotificationType::GroupAddInclude);
        assert!(!first.last_sg);
        let second = inst.get_notification(client, Some(first)).unwrap().unwrap();
        assert_eq!(second.kind, NotificationType::AllowSource);
        assert_eq!(second.source, Some(v4(192, 168, 0, 1)));
        assert!(second.last_sg);
        assert_eq!(inst.get_notification(client, Some(second)).unwrap(), None);
    }

    #[test]
    fn test_full_state_client_gets_group_state() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        let opts = ClientOptions {
            delta: false,
            full: true,
            ..ClientOptions::default()
        };
        let client = inst.register_client(opts, now).unwrap();
        inst.run_timers(now);
        let report = Packet::report(
            Version::Sources,
            v4(10, 0, 0, 9),
            vec![GroupRecord::new(
                RecordType::IsInclude,
                v4(232, 1, 1, 1),
                vec![v4(192, 168, 0, 1), v4(192, 168, 0, 2)],
            )],
        );
        inst.receive_packet(IntfId(1), &report, now).unwrap();

        let notif = inst.get_notification(client, None).unwrap().unwrap();
        assert_eq!(notif.kind, NotificationType::GroupState);
        assert_eq!(notif.filter_mode, FilterMode::Include);
        assert_eq!(notif.sources, vec![v4(192, 168, 0, 1), v4(192, 168, 0, 2)]);
        assert!(notif.last_sg);
        assert_eq!(inst.pending_notifications(client).unwrap(), 0);
    }

    fn drain(inst: &mut Instance, client: ClientId) -> Vec<ClientNotification> {
        let mut out = Vec::new();
        let mut prev = None;
        while let Some(notif) = inst.get_notification(client, prev.take()).unwrap() {
            out.push(notif.clone());
            prev = Some(notif);
        }
        out
    }

    #[test]
    fn test_output_group_freed_after_last_client_drains() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        let first = inst.register_client(ClientOptions::default(), now).unwrap();
        let second = inst.register_client(ClientOptions::default(), now).unwrap();
        inst.run_timers(now);

        let g = v4(232, 1, 2, 1);
        let report = |rec_type: RecordType, sources: Vec<IpAddr>| {
            Packet::report(
                Version::Sources,
                v4(10, 0, 0, 20),
                vec![GroupRecord::new(rec_type, g, sources)],
            )
        };
        inst.receive_packet(IntfId(1), &report(RecordType::IsInclude, vec![v4(192, 0, 2, 7)]), now)
            .unwrap();
        inst.receive_packet(IntfId(1), &report(RecordType::ToInclude, vec![]), now)
            .unwrap();
        inst.run_timers(now + Duration::from_secs(3));

        let kinds: Vec<_> = drain(&mut inst, first).into_iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![NotificationType::BlockSource, NotificationType::GroupDelete]
        );
        let og = inst.ogroup(IntfId(1), g).unwrap();
        assert_eq!(og.deleted.len(), 1);
        assert_eq!(inst.pending_notifications(second).unwrap(), 2);

        assert_eq!(drain(&mut inst, second).len(), 2);
        assert!(inst.ogroup(IntfId(1), g).is_none());
    }

    #[test]
    fn test_exclude_entry_with_include_twin_is_allowed() {
        use crate::logging::{Logger, MemorySink, Severity};
        use crate::protocols::router::{InstanceParams, IntfRegistry, OifRule, StaticHooks};
        use crate::protocols::Proto;
        use std::sync::Arc;

        let now = Instant::now();
        let g = v4(239, 4, 0, 1);
        let s = v4(192, 0, 2, 9);
        // Interface 2 feeds the output group of interface 1
        let hooks = StaticHooks::new(
            vec![OifRule {
                intf: Some(IntfId(2)),
                group: g,
                prefix_len: 32,
                source: None,
                oif: Some(IntfId(1)),
            }],
            vec![],
            vec![],
        );
        let logger = Logger::memory(Arc::new(MemorySink::new(256)), Severity::Info);
        let mut inst = Instance::new(
            Proto::Igmp,
            InstanceParams::default(),
            IntfRegistry::new(),
            Box::new(hooks),
            logger,
            now,
        );
        for (id, addr) in [(1, v4(10, 0, 0, 1)), (2, v4(10, 0, 1, 1))] {
            inst.attach_intf(IntfId(id), now).unwrap();
            inst.update_intf_state(IntfId(id), Some(addr), now).unwrap();
        }
        let client = inst.register_client(ClientOptions::default(), now).unwrap();
        inst.run_timers(now);

        let report = |host: IpAddr, rec_type: RecordType| {
            Packet::report(Version::Sources, host, vec![GroupRecord::new(rec_type, g, vec![s])])
        };
        inst.receive_packet(IntfId(2), &report(v4(10, 0, 1, 20), RecordType::IsInclude), now)
            .unwrap();
        inst.receive_packet(IntfId(1), &report(v4(10, 0, 0, 20), RecordType::IsExclude), now)
            .unwrap();
        drain(&mut inst, client);

        let ord = inst.addrs.lookup(&s).unwrap();
        let og = inst.ogroup(IntfId(1), g).unwrap();
        assert_eq!(og.mode, FilterMode::Exclude);
        assert!(og.incl.contains_key(&ord));
        let excl_entry = og.excl[&ord];

        inst.client_enqueue_source(client, IntfId(1), g, excl_entry);
        let notif = inst.get_notification(client, None).unwrap().unwrap();
        assert_eq!(notif.kind, NotificationType::AllowSource);
        assert_eq!(notif.source, Some(s));

        // Once interface 2 lets the source go, the exclusion takes effect
        inst.receive_packet(IntfId(2), &report(v4(10, 0, 1, 20), RecordType::BlockOld), now)
            .unwrap();
        inst.run_timers(now + Duration::from_secs(3));
        let last = drain(&mut inst, client).pop().unwrap();
        assert_eq!(last.kind, NotificationType::BlockSource);
        assert_eq!(last.source, Some(s));
        assert!(!inst.ogroup(IntfId(1), g).unwrap().incl.contains_key(&ord));
    }

    #[test]
    fn test_refresh_ends_with_marker() {
        let now = Instant::now();
        let (mut inst, _sink) = instance_with_intf(now);
        let client = inst.register_client(ClientOptions::default(), now).unwrap();
        inst.refresh(client, false).unwrap();
        let notif = inst.get_notification(client, None).unwrap().unwrap();
        assert_eq!(notif.kind, NotificationType::RefreshEnd);
        assert!(notif.last_sg);
        assert_eq!(
            inst.refresh(ClientId(7), false),
            Err(GmpError::UnknownClient(ClientId(7)))
        );
    }
}
