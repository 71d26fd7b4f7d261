// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Output groups
//!
//! Input state is mapped through the `oif_map` hook onto output groups, which
//! describe what is actually forwarded out of an interface. Several input
//! groups (possibly on different interfaces) can contribute to one output
//! group:
//!
//! - an Exclude-mode input group with nothing excluded links at group level
//!   ("forward everything") and turns the output group to Exclude;
//! - an Include-mode input source links into the include list;
//! - an Exclude-mode stopped source links into the exclude list.
//!
//! An output source left without contributors moves to the deleted list,
//! where it stays until every client has seen its removal. A later link for
//! the same address rescues the entry instead of creating a new one.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Instant;

use super::group::SourceList;
use super::{ClientId, Instance, IntfId};
use crate::log_debug;
use crate::logging::Facility;
use crate::protocols::addr::Ordinal;
use crate::protocols::FilterMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OifList {
    Include,
    Exclude,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OifUpdate {
    Update,
    Delete,
}

#[derive(Debug)]
pub(crate) struct OutputSource {
    pub(super) ord: Ordinal,
    pub(super) list: OifList,
    /// Input interfaces whose source entry links here
    pub(super) contributors: BTreeSet<IntfId>,
    /// Contributors went from none to some or back; clients need to hear
    pub(super) notify: bool,
}

#[derive(Debug)]
pub(crate) struct OutputGroup {
    pub(super) addr: IpAddr,
    pub(super) mode: FilterMode,
    pub(super) incl: BTreeMap<Ordinal, u64>,
    pub(super) excl: BTreeMap<Ordinal, u64>,
    pub(super) deleted: BTreeMap<Ordinal, u64>,
    pub(super) sources: BTreeMap<u64, OutputSource>,
    /// Input interfaces with a group-level link
    pub(super) contributors: BTreeSet<IntfId>,
    /// Clients owed a full-state notification
    pub(super) full_pending: BTreeSet<ClientId>,
}

impl OutputGroup {
    fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            mode: FilterMode::Include,
            incl: BTreeMap::new(),
            excl: BTreeMap::new(),
            deleted: BTreeMap::new(),
            sources: BTreeMap::new(),
            contributors: BTreeSet::new(),
            full_pending: BTreeSet::new(),
        }
    }

    pub(super) fn is_active(&self) -> bool {
        self.mode == FilterMode::Exclude || !self.incl.is_empty()
    }

    pub(super) fn list(&self, which: OifList) -> &BTreeMap<Ordinal, u64> {
        match which {
            OifList::Include => &self.incl,
            OifList::Exclude => &self.excl,
            OifList::Deleted => &self.deleted,
        }
    }

    pub(super) fn list_mut(&mut self, which: OifList) -> &mut BTreeMap<Ordinal, u64> {
        match which {
            OifList::Include => &mut self.incl,
            OifList::Exclude => &mut self.excl,
            OifList::Deleted => &mut self.deleted,
        }
    }

    /// The list describing the group's state in its current mode
    pub(super) fn mode_list(&self) -> OifList {
        match self.mode {
            FilterMode::Include => OifList::Include,
            FilterMode::Exclude => OifList::Exclude,
        }
    }

    /// Exclude mode with every excluded source also included
    pub(super) fn forwards_all(&self) -> bool {
        self.mode == FilterMode::Exclude && self.excl.keys().all(|o| self.incl.contains_key(o))
    }

    /// Whether a source appears in the effective state of the group
    pub(super) fn source_is_active(&self, ord: Ordinal) -> bool {
        match self.mode {
            FilterMode::Include => self.incl.contains_key(&ord),
            FilterMode::Exclude => self.excl.contains_key(&ord) && !self.incl.contains_key(&ord),
        }
    }

    pub(super) fn forwards_source(&self, ord: Ordinal) -> bool {
        let active = self.source_is_active(ord);
        match self.mode {
            FilterMode::Include => active,
            FilterMode::Exclude => !active,
        }
    }

    /// Entries of the mode list that are active, in address order of ordinal
    pub(super) fn active_entries(&self) -> Vec<(Ordinal, u64)> {
        self.list(self.mode_list())
            .iter()
            .filter(|(ord, _)| self.source_is_active(**ord))
            .map(|(ord, entry)| (*ord, *entry))
            .collect()
    }
}

impl Instance {
    pub(super) fn ogroup(&self, oif: IntfId, group: IpAddr) -> Option<&OutputGroup> {
        self.intfs.get(&oif).and_then(|i| i.ogroups.get(&group))
    }

    pub(super) fn ogroup_mut(&mut self, oif: IntfId, group: IpAddr) -> Option<&mut OutputGroup> {
        self.intfs.get_mut(&oif).and_then(|i| i.ogroups.get_mut(&group))
    }

    /// Ask the embedder where state heard on `intf` goes
    fn mapped_oif(&self, intf: IntfId, group: IpAddr, source: Option<Ordinal>) -> Option<IntfId> {
        let source = source.and_then(|o| self.addrs.addr(o));
        self.hooks
            .oif_map(intf, group, source)
            .filter(|oif| self.intfs.contains_key(oif))
    }

    fn ensure_ogroup(&mut self, oif: IntfId, group: IpAddr) -> bool {
        let Some(i) = self.intfs.get_mut(&oif) else {
            return false;
        };
        if !i.ogroups.contains_key(&group) {
            i.ogroups.insert(group, OutputGroup::new(group));
            self.global_groups.entry(group).or_default().insert(oif);
            log_debug!(
                self.logger,
                Facility::Oif,
                "Created output group {} on interface {}",
                group,
                oif
            );
        }
        true
    }

    /// Discard an output group and every link into it
    pub(super) fn destroy_ogroup(&mut self, oif: IntfId, group: IpAddr) {
        self.flush_group_notifications(oif, group, true);
        let Some(og) = self.intfs.get_mut(&oif).and_then(|i| i.ogroups.remove(&group)) else {
            return;
        };
        for contributor in &og.contributors {
            if let Some(g) = self.group_mut(*contributor, group) {
                g.oif = None;
            }
        }
        for src in og.sources.values() {
            for contributor in &src.contributors {
                if let Some(entry) = self
                    .group_mut(*contributor, group)
                    .and_then(|g| g.source_mut(src.ord))
                {
                    entry.oif = None;
                }
            }
            self.addrs.release(src.ord);
        }
        if let Some(set) = self.global_groups.get_mut(&group) {
            set.remove(&oif);
            if set.is_empty() {
                self.global_groups.remove(&group);
            }
        }
        log_debug!(
            self.logger,
            Facility::Oif,
            "Destroyed output group {} on interface {}",
            group,
            oif
        );
    }

    /// Free the output group once it describes nothing and nobody waits on it
    pub(super) fn attempt_ogroup_free(&mut self, oif: IntfId, group: IpAddr) -> bool {
        let Some(og) = self.ogroup(oif, group) else {
            return false;
        };
        let idle = og.mode == FilterMode::Include
            && og.contributors.is_empty()
            && og.incl.is_empty()
            && og.excl.is_empty()
            && og.deleted.is_empty()
            && !self.group_notification_queued(oif, group);
        if idle {
            self.destroy_ogroup(oif, group);
        }
        idle
    }

    /// Recompute the output mode and tell clients what changed
    pub(super) fn evaluate_oif_group(&mut self, oif: IntfId, group: IpAddr) {
        let Some(og) = self.ogroup_mut(oif, group) else {
            return;
        };
        let mode = if og.excl.is_empty() && og.contributors.is_empty() {
            FilterMode::Include
        } else {
            FilterMode::Exclude
        };
        if mode != og.mode {
            og.mode = mode;
            log_debug!(
                self.logger,
                Facility::Oif,
                "Output group {} on interface {} now {}",
                group,
                oif,
                mode
            );
            self.mode_change_notify_clients(oif, group);
        } else if !og.is_active() {
            self.group_notify_clients(oif, group);
        }
        self.attempt_ogroup_free(oif, group);
    }

    /// Settle an output source after its contributors changed
    pub(super) fn evaluate_oif_source(&mut self, oif: IntfId, group: IpAddr, entry: u64) {
        let Some(og) = self.ogroup_mut(oif, group) else {
            return;
        };
        let Some(src) = og.sources.get(&entry) else {
            return;
        };
        let mut entry = entry;
        if src.contributors.is_empty() && src.list != OifList::Deleted {
            let (ord, list) = (src.ord, src.list);
            let other = match list {
                OifList::Include => OifList::Exclude,
                _ => OifList::Include,
            };
            match og.list(other).get(&ord).copied() {
                Some(twin) => {
                    // The address survives on the other list
                    og.list_mut(list).remove(&ord);
                    og.sources.remove(&entry);
                    if let Some(twin_src) = og.sources.get_mut(&twin) {
                        twin_src.notify = true;
                    }
                    self.flush_source_notifications(oif, group, entry, true);
                    self.addrs.release(ord);
                    entry = twin;
                }
                None => {
                    og.list_mut(list).remove(&ord);
                    og.deleted.insert(ord, entry);
                    if let Some(src) = og.sources.get_mut(&entry) {
                        src.list = OifList::Deleted;
                    }
                }
            }
        }
        self.source_notify_clients(oif, group, entry, false);
        self.evaluate_oif_group(oif, group);
    }

    fn link_oif_group(&mut self, intf: IntfId, group: IpAddr, oif: IntfId) {
        if !self.ensure_ogroup(oif, group) {
            return;
        }
        if let Some(og) = self.ogroup_mut(oif, group) {
            og.contributors.insert(intf);
        }
        if let Some(g) = self.group_mut(intf, group) {
            g.oif = Some(oif);
        }
    }

    fn delink_oif_group(&mut self, intf: IntfId, group: IpAddr) -> Option<IntfId> {
        let oif = self.group_mut(intf, group)?.oif.take()?;
        if let Some(og) = self.ogroup_mut(oif, group) {
            og.contributors.remove(&intf);
        }
        Some(oif)
    }

    /// Point the group-level link at the interface the hooks choose
    pub(super) fn map_group_oif(&mut self, intf: IntfId, group: IpAddr) {
        let Some(old) = self.group(intf, group).map(|g| g.oif) else {
            return;
        };
        let new = self.mapped_oif(intf, group, None);
        if new != old {
            if let Some(old) = self.delink_oif_group(intf, group) {
                self.evaluate_oif_group(old, group);
            }
            if let Some(new) = new {
                self.link_oif_group(intf, group, new);
            }
        }
        if let Some(new) = new {
            self.evaluate_oif_group(new, group);
        }
    }

    /// Refresh or drop the group-level link
    ///
    /// Only an Exclude group that excludes nothing forwards everything; any
    /// other state is expressed per source.
    pub(super) fn update_group_oif(&mut self, intf: IntfId, group: IpAddr, update: OifUpdate) {
        let Some(g) = self.group(intf, group) else {
            return;
        };
        let forward_all = g.mode == FilterMode::Exclude && g.stopped.is_empty();
        if update == OifUpdate::Update && forward_all {
            self.map_group_oif(intf, group);
        } else if let Some(old) = self.delink_oif_group(intf, group) {
            self.evaluate_oif_group(old, group);
        }
    }

    fn input_oif_list(&self, intf: IntfId, group: IpAddr) -> OifList {
        match self.group(intf, group).map(|g| g.mode) {
            Some(FilterMode::Exclude) => OifList::Exclude,
            _ => OifList::Include,
        }
    }

    fn link_oif_source(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal, oif: IntfId) {
        if !self.ensure_ogroup(oif, group) {
            return;
        }
        let list = self.input_oif_list(intf, group);
        let fresh = self.alloc_entry_id();
        let Some(og) = self.ogroup_mut(oif, group) else {
            return;
        };
        let entry = if let Some(entry) = og.list(list).get(&ord).copied() {
            entry
        } else if let Some(entry) = og.deleted.remove(&ord) {
            og.list_mut(list).insert(ord, entry);
            if let Some(src) = og.sources.get_mut(&entry) {
                src.list = list;
            }
            entry
        } else {
            og.list_mut(list).insert(ord, fresh);
            og.sources.insert(
                fresh,
                OutputSource {
                    ord,
                    list,
                    contributors: BTreeSet::new(),
                    notify: false,
                },
            );
            self.addrs.retain(ord);
            fresh
        };
        let Some(src) = self.ogroup_mut(oif, group).and_then(|og| og.sources.get_mut(&entry)) else {
            return;
        };
        if src.contributors.is_empty() {
            src.notify = true;
        }
        src.contributors.insert(intf);
        if let Some(input) = self.group_mut(intf, group).and_then(|g| g.source_mut(ord)) {
            input.oif = Some((oif, entry));
        }
    }

    fn delink_oif_source(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal) -> Option<(IntfId, u64)> {
        let (oif, entry) = self.group_mut(intf, group)?.source_mut(ord)?.oif.take()?;
        if let Some(src) = self
            .ogroup_mut(oif, group)
            .and_then(|og| og.sources.get_mut(&entry))
        {
            src.contributors.remove(&intf);
            if src.contributors.is_empty() {
                src.notify = true;
            }
        }
        Some((oif, entry))
    }

    fn map_source_oif(&mut self, intf: IntfId, group: IpAddr, ord: Ordinal) {
        let Some(old) = self.group(intf, group).and_then(|g| g.source(ord)).map(|e| e.oif) else {
            return;
        };
        let new = self.mapped_oif(intf, group, Some(ord));
        let relink = match (new, old) {
            (new, old) if new != old.map(|(o, _)| o) => true,
            (Some(oif), Some((_, entry))) => {
                // Same interface, but the input mode may call for the other list
                let list = self.input_oif_list(intf, group);
                self.ogroup(oif, group).and_then(|og| og.list(list).get(&ord).copied())
                    != Some(entry)
            }
            _ => false,
        };
        if relink {
            if let Some((old_oif, old_entry)) = self.delink_oif_source(intf, group, ord) {
                self.evaluate_oif_source(old_oif, group, old_entry);
            }
            if let Some(new) = new {
                self.link_oif_source(intf, group, ord, new);
            }
        }
        let current = self
            .group(intf, group)
            .and_then(|g| g.source(ord))
            .and_then(|e| e.oif);
        if let Some((oif, entry)) = current {
            self.evaluate_oif_source(oif, group, entry);
        }
    }

    pub(super) fn update_source_oif(
        &mut self,
        intf: IntfId,
        group: IpAddr,
        ord: Ordinal,
        update: OifUpdate,
    ) {
        match update {
            OifUpdate::Update => self.map_source_oif(intf, group, ord),
            OifUpdate::Delete => {
                if let Some((oif, entry)) = self.delink_oif_source(intf, group, ord) {
                    self.evaluate_oif_source(oif, group, entry);
                }
            }
        }
    }

    /// Update every source of the list that carries the group's state
    pub(super) fn update_all_group_source_oif(&mut self, intf: IntfId, group: IpAddr, update: OifUpdate) {
        let Some(g) = self.group(intf, group) else {
            return;
        };
        let ords: Vec<Ordinal> = g.list(g.source_list()).keys().copied().collect();
        for ord in ords {
            self.update_source_oif(intf, group, ord, update);
        }
    }

    /// Bring output state in line after an input group changed mode
    pub(super) fn update_oif_mode_change(&mut self, intf: IntfId, group: IpAddr, now: Instant) {
        let Some(active) = self.group(intf, group).map(|g| g.is_active()) else {
            return;
        };
        if active {
            self.update_group_oif(intf, group, OifUpdate::Update);
            self.update_all_group_source_oif(intf, group, OifUpdate::Update);
        } else {
            self.update_group_oif(intf, group, OifUpdate::Delete);
            self.attempt_group_free(intf, group, now);
        }
    }

    /// Re-run the `oif_map` hook for every active group on an interface
    pub fn notify_oif_map_change(&mut self, intf: IntfId) -> Result<(), super::GmpError> {
        let groups: Vec<IpAddr> = self.intf(intf)?.groups.keys().copied().collect();
        for group in groups {
            let Some(g) = self.group(intf, group) else {
                continue;
            };
            if !g.is_active() {
                continue;
            }
            let list = g.source_list();
            let ords: Vec<Ordinal> = g.list(list).keys().copied().collect();
            if ords.is_empty() && g.mode == FilterMode::Exclude {
                self.map_group_oif(intf, group);
            }
            for ord in ords {
                self.map_source_oif(intf, group, ord);
            }
            self.host_notify_oif_map_change(intf, group);
        }
        self.alert_clients();
        self.alert_host_clients();
        Ok(())
    }

    /// Renotify output groups fed from other interfaces after a link change
    pub(super) fn update_intf_output_groups(&mut self, oif: IntfId) {
        let Some(i) = self.intfs.get(&oif) else {
            return;
        };
        let up = i.up;
        let remote: Vec<IpAddr> = i
            .ogroups
            .values()
            .filter(|og| {
                og.contributors.iter().any(|c| *c != oif)
                    || og
                        .sources
                        .values()
                        .any(|s| s.contributors.iter().any(|c| *c != oif))
            })
            .map(|og| og.addr)
            .collect();
        for group in remote {
            if up {
                self.group_notify_clients(oif, group);
                self.enqueue_all_source_notifications(oif, group, None);
            } else {
                self.flush_group_source_notifications(oif, group, None);
                self.group_notify_clients(oif, group);
            }
        }
    }

    /// Whether the source ordinal's entry in `list` of the input group is set
    pub(super) fn input_source_on(&self, intf: IntfId, group: IpAddr, ord: Ordinal, list: SourceList) -> bool {
        self.group(intf, group)
            .map_or(false, |g| g.list(list).contains_key(&ord))
    }
}
