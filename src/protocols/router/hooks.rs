// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Embedder hooks: policy, output interface mapping and SSM checks

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::IntfId;
use crate::protocols::addr::prefix_contains;

/// Callbacks consulted while processing reports and mapping output state
///
/// Every method has a permissive default, so implementors override only
/// what they need.
pub trait RouterHooks: Send + Sync {
    /// Accept or refuse a group (`source == None`) or a (source, group)
    fn policy_check(
        &self,
        _intf: IntfId,
        _group: IpAddr,
        _source: Option<IpAddr>,
        _attr: u32,
    ) -> bool {
        true
    }

    /// Output interface for a group or (source, group) heard on `intf`
    ///
    /// `None` blocks forwarding. The result must be an interface attached to
    /// the same instance, otherwise it is treated as `None`.
    fn oif_map(&self, intf: IntfId, _group: IpAddr, _source: Option<IpAddr>) -> Option<IntfId> {
        Some(intf)
    }

    /// Whether a source-less (*,G) join is acceptable for the group
    fn ssm_check(&self, _intf: IntfId, _group: IpAddr) -> bool {
        true
    }
}

/// Accept everything, map every group onto its own interface
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl RouterHooks for DefaultHooks {}

/// Output interface remap rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OifRule {
    /// Input interface the rule applies to; any if absent
    #[serde(default)]
    pub intf: Option<IntfId>,
    pub group: IpAddr,
    #[serde(default = "default_host_prefix")]
    pub prefix_len: u8,
    /// Source the rule applies to; any (including none) if absent
    #[serde(default)]
    pub source: Option<IpAddr>,
    /// Output interface; `None` blocks forwarding
    #[serde(default)]
    pub oif: Option<IntfId>,
}

/// Deny rule for the policy check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub intf: Option<IntfId>,
    pub group: IpAddr,
    #[serde(default = "default_host_prefix")]
    pub prefix_len: u8,
    /// Denied source; a rule without a source denies the whole group
    #[serde(default)]
    pub source: Option<IpAddr>,
}

fn default_host_prefix() -> u8 {
    128
}

/// Hooks driven by static tables, typically loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticHooks {
    oif_rules: Vec<OifRule>,
    ssm_ranges: Vec<(IpAddr, u8)>,
    deny: Vec<PolicyRule>,
}

impl StaticHooks {
    pub fn new(oif_rules: Vec<OifRule>, ssm_ranges: Vec<(IpAddr, u8)>, deny: Vec<PolicyRule>) -> Self {
        Self {
            oif_rules,
            ssm_ranges,
            deny,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.oif_rules.is_empty() && self.ssm_ranges.is_empty() && self.deny.is_empty()
    }
}

fn intf_matches(rule: Option<IntfId>, intf: IntfId) -> bool {
    rule.map_or(true, |r| r == intf)
}

impl RouterHooks for StaticHooks {
    fn policy_check(
        &self,
        intf: IntfId,
        group: IpAddr,
        source: Option<IpAddr>,
        _attr: u32,
    ) -> bool {
        !self.deny.iter().any(|rule| {
            intf_matches(rule.intf, intf)
                && prefix_contains(&rule.group, rule.prefix_len, &group)
                && match rule.source {
                    None => true,
                    Some(denied) => source == Some(denied),
                }
        })
    }

    fn oif_map(&self, intf: IntfId, group: IpAddr, source: Option<IpAddr>) -> Option<IntfId> {
        let rule = self.oif_rules.iter().find(|rule| {
            intf_matches(rule.intf, intf)
                && prefix_contains(&rule.group, rule.prefix_len, &group)
                && rule.source.map_or(true, |s| source == Some(s))
        });
        match rule {
            Some(rule) => rule.oif,
            None => Some(intf),
        }
    }

    fn ssm_check(&self, _intf: IntfId, group: IpAddr) -> bool {
        !self
            .ssm_ranges
            .iter()
            .any(|(prefix, len)| prefix_contains(prefix, *len, &group))
    }
}
