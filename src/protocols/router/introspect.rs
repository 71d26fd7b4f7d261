// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Read-only views of instance state for management and debugging

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::group::SourceList;
use super::{GmpError, Instance, IntfId};
use crate::protocols::FilterMode;

/// Per-interface counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntfStats {
    /// Groups or sources refused by the channel limit
    pub chan_limit_drops: u64,
    /// Exclude-mode groups that timed out to Include
    pub group_timeouts: u64,
    pub packets_received: u64,
    pub packets_ignored: u64,
    pub queries_sent: u64,
}

/// How `get_intf_list` treats source-less lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntfListMode {
    /// Only interfaces forwarding every source of the group
    Strict,
    /// Any interface with the group in Exclude mode
    #[default]
    Loose,
}

/// Forwarding state of one output group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntfGroupInfo {
    pub group: IpAddr,
    pub filter_mode: FilterMode,
    pub sources: Vec<IpAddr>,
}

/// One tracked host's view of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroupInfo {
    pub group: IpAddr,
    /// Exclude for a (*,G) join
    pub filter_mode: FilterMode,
    pub sources: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntfHostInfo {
    pub host: IpAddr,
    pub groups: Vec<IpAddr>,
}

impl Instance {
    /// Interfaces forwarding a group, or a (source, group)
    pub fn get_intf_list(
        &self,
        group: IpAddr,
        source: Option<IpAddr>,
        mode: IntfListMode,
    ) -> Result<Vec<IntfId>, GmpError> {
        self.check_family(&group)?;
        if let Some(source) = &source {
            self.check_family(source)?;
        }
        let Some(oifs) = self.global_groups.get(&group) else {
            return Ok(Vec::new());
        };
        let ord = source.and_then(|s| self.addrs.lookup(&s));
        let list = oifs
            .iter()
            .filter(|oif| {
                let Some(og) = self.ogroup(**oif, group) else {
                    return false;
                };
                match (source, ord) {
                    (Some(_), Some(ord)) => og.forwards_source(ord),
                    (Some(_), None) => og.mode == FilterMode::Exclude,
                    (None, _) => {
                        og.mode == FilterMode::Exclude
                            && (mode == IntfListMode::Loose || og.forwards_all())
                    }
                }
            })
            .copied()
            .collect();
        Ok(list)
    }

    /// Whether an interface forwards a channel
    ///
    /// With `exact`, a (source, group) must be explicitly included and a
    /// (*,G) must forward every source; otherwise any state that lets the
    /// traffic through counts.
    pub fn is_forwarding_channel(
        &self,
        intf: IntfId,
        source: Option<IpAddr>,
        group: IpAddr,
        exact: bool,
    ) -> Result<bool, GmpError> {
        self.intf(intf)?;
        self.check_family(&group)?;
        let Some(og) = self.ogroup(intf, group) else {
            return Ok(false);
        };
        let forwarding = match source {
            None if exact => og.mode == FilterMode::Exclude && og.forwards_all(),
            None => og.mode == FilterMode::Exclude,
            Some(source) => {
                self.check_family(&source)?;
                match self.addrs.lookup(&source) {
                    Some(ord) if exact => og.incl.contains_key(&ord),
                    Some(ord) => og.forwards_source(ord),
                    None => !exact && og.mode == FilterMode::Exclude,
                }
            }
        };
        Ok(forwarding)
    }

    /// Active output groups of an interface
    pub fn get_intf_groups(&self, intf: IntfId) -> Result<Vec<IntfGroupInfo>, GmpError> {
        let i = self.intf(intf)?;
        let groups = i
            .ogroups
            .values()
            .filter(|og| og.is_active())
            .map(|og| {
                let ords: Vec<_> = og.active_entries().into_iter().map(|(ord, _)| ord).collect();
                IntfGroupInfo {
                    group: og.addr,
                    filter_mode: og.mode,
                    sources: self.addrs.addrs_of(&ords),
                }
            })
            .collect();
        Ok(groups)
    }

    /// Groups a tracked host currently belongs to
    pub fn get_host_groups(&self, intf: IntfId, host: IpAddr) -> Result<Vec<HostGroupInfo>, GmpError> {
        let i = self.intf(intf)?;
        let Some(h) = i.hosts.get(&host) else {
            return Ok(Vec::new());
        };
        let groups = h
            .groups
            .values()
            .filter(|hg| hg.linked)
            .map(|hg| HostGroupInfo {
                group: hg.addr,
                filter_mode: if hg.addrs.is_empty() {
                    FilterMode::Exclude
                } else {
                    FilterMode::Include
                },
                sources: self.addrs.addrs_of(hg.addrs.keys()),
            })
            .collect();
        Ok(groups)
    }

    /// Tracked hosts of an interface with their active groups
    pub fn get_intf_hosts(&self, intf: IntfId) -> Result<Vec<IntfHostInfo>, GmpError> {
        let i = self.intf(intf)?;
        let hosts = i
            .hosts
            .values()
            .map(|h| IntfHostInfo {
                host: h.addr,
                groups: h
                    .groups
                    .values()
                    .filter(|hg| hg.linked)
                    .map(|hg| hg.addr)
                    .collect(),
            })
            .filter(|info| !info.groups.is_empty())
            .collect();
        Ok(hosts)
    }

    /// Whether a source is explicitly excluded from an input group
    pub fn sg_is_excluded(&self, intf: IntfId, group: IpAddr, source: IpAddr) -> Result<bool, GmpError> {
        self.intf(intf)?;
        self.check_family(&source)?;
        Ok(self
            .addrs
            .lookup(&source)
            .map_or(false, |ord| self.input_source_on(intf, group, ord, SourceList::Stopped)))
    }

    pub fn intf_stats(&self, intf: IntfId) -> Result<IntfStats, GmpError> {
        Ok(self.intf(intf)?.stats.clone())
    }
}
