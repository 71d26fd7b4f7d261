// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for gmprd.
//!
//! JSON5 configuration format supporting:
//! - Instance-wide settings (protocol, client limit, query smearing)
//! - Per-interface parameters, with an optional local address
//! - Static hooks: output interface remapping, SSM ranges, policy denials
//! - Comments and trailing commas

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::logging::{Facility, Severity};
use crate::protocols::duration_ms;
use crate::protocols::router::{
    DefaultHooks, InstanceParams, IntfId, IntfParams, OifRule, PolicyRule, RouterHooks,
    StaticHooks, DEFAULT_MANY_INTFS, DEFAULT_MAX_CLIENTS, DEFAULT_QUICK_SMEAR_INTERVAL,
    DEFAULT_SMEAR_INTERVAL,
};
use crate::protocols::Proto;

/// Startup configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub instance: InstanceConfig,

    /// Interfaces attached at startup
    pub interfaces: Vec<InterfaceConfig>,

    pub hooks: HooksConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstanceConfig {
    pub proto: Proto,
    pub max_clients: usize,
    /// Startup bursts on more interfaces than this use the normal query interval
    pub many_intfs_threshold: usize,
    #[serde(with = "duration_ms", rename = "smear_interval_ms")]
    pub smear_interval: Duration,
    #[serde(with = "duration_ms", rename = "quick_smear_interval_ms")]
    pub quick_smear_interval: Duration,
    /// Track individual hosts even where no interface uses fast leave
    pub host_tracking: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            proto: Proto::Igmp,
            max_clients: DEFAULT_MAX_CLIENTS,
            many_intfs_threshold: DEFAULT_MANY_INTFS,
            smear_interval: DEFAULT_SMEAR_INTERVAL,
            quick_smear_interval: DEFAULT_QUICK_SMEAR_INTERVAL,
            host_tracking: false,
        }
    }
}

impl InstanceConfig {
    pub fn params(&self) -> InstanceParams {
        InstanceParams {
            max_clients: self.max_clients,
            many_intfs_threshold: self.many_intfs_threshold,
            smear_interval: self.smear_interval,
            quick_smear_interval: self.quick_smear_interval,
        }
    }
}

/// Interface as stored in config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub id: IntfId,

    /// Local address; the interface stays down without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,

    #[serde(flatten)]
    pub params: IntfParams,
}

/// SSM range: bare (*,G) joins inside it are refused
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SsmRange {
    pub prefix: IpAddr,
    pub len: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HooksConfig {
    /// Output interface remap rules, first match wins
    pub oif_rules: Vec<OifRule>,
    pub ssm_ranges: Vec<SsmRange>,
    /// Groups and (source, group)s refused by the policy check
    pub deny: Vec<PolicyRule>,
}

impl HooksConfig {
    pub fn is_empty(&self) -> bool {
        self.oif_rules.is_empty() && self.ssm_ranges.is_empty() && self.deny.is_empty()
    }

    /// Hooks implementing these tables
    pub fn build(&self) -> Box<dyn RouterHooks> {
        if self.is_empty() {
            return Box::new(DefaultHooks);
        }
        Box::new(StaticHooks::new(
            self.oif_rules.clone(),
            self.ssm_ranges.iter().map(|r| (r.prefix, r.len)).collect(),
            self.deny.clone(),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Severity,
    /// Facilities logged at debug level regardless of `level`
    pub trace: Vec<Facility>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Severity::Info,
            trace: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to JSON5 string (with pretty formatting)
    pub fn to_json5(&self) -> String {
        // json5 has no pretty printer; JSON output is valid JSON5
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5();
        std::fs::write(path, content)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let proto = self.instance.proto;
        if self.instance.max_clients == 0 {
            return Err(ConfigError::InvalidValue {
                context: "instance".to_string(),
                reason: "max_clients must be at least 1".to_string(),
            });
        }
        if self.instance.smear_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                context: "instance".to_string(),
                reason: "smear_interval_ms must be positive".to_string(),
            });
        }

        let mut seen: HashSet<IntfId> = HashSet::new();
        for intf in &self.interfaces {
            if !seen.insert(intf.id) {
                return Err(ConfigError::DuplicateInterface { id: intf.id });
            }
            let context = format!("interface {}", intf.id);
            if let Some(addr) = intf.address {
                check_family(proto, addr, &context)?;
            }
            validate_params(&intf.params, &context)?;
        }

        for (idx, rule) in self.hooks.oif_rules.iter().enumerate() {
            let context = format!("oif rule {}", idx);
            check_group(proto, rule.group, &context)?;
            if let Some(source) = rule.source {
                check_family(proto, source, &context)?;
            }
        }
        for (idx, range) in self.hooks.ssm_ranges.iter().enumerate() {
            check_group(proto, range.prefix, &format!("ssm range {}", idx))?;
        }
        for (idx, rule) in self.hooks.deny.iter().enumerate() {
            let context = format!("deny rule {}", idx);
            check_group(proto, rule.group, &context)?;
            if let Some(source) = rule.source {
                check_family(proto, source, &context)?;
            }
        }
        Ok(())
    }
}

fn validate_params(params: &IntfParams, context: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        context: context.to_string(),
        reason: reason.to_string(),
    };
    if params.robustness == 0 {
        return Err(invalid("robustness must be at least 1"));
    }
    if params.query_interval.is_zero() {
        return Err(invalid("query_interval_ms must be positive"));
    }
    if params.query_response_interval.is_zero() {
        return Err(invalid("query_response_interval_ms must be positive"));
    }
    if params.last_member_query_interval.is_zero() {
        return Err(invalid("last_member_query_interval_ms must be positive"));
    }
    if params.channel_threshold > 100 {
        return Err(invalid("channel_threshold is a percentage (0-100)"));
    }
    Ok(())
}

fn check_family(proto: Proto, addr: IpAddr, context: &str) -> Result<(), ConfigError> {
    if proto.matches(&addr) {
        Ok(())
    } else {
        Err(ConfigError::AddressFamily {
            proto,
            address: addr,
            context: context.to_string(),
        })
    }
}

fn check_group(proto: Proto, group: IpAddr, context: &str) -> Result<(), ConfigError> {
    check_family(proto, group, context)?;
    if !group.is_multicast() {
        return Err(ConfigError::InvalidMulticastAddress {
            address: group,
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(std::path::PathBuf, String),
    ParseError(String),
    DuplicateInterface {
        id: IntfId,
    },
    InvalidValue {
        context: String,
        reason: String,
    },
    AddressFamily {
        proto: Proto,
        address: IpAddr,
        context: String,
    },
    InvalidMulticastAddress {
        address: IpAddr,
        context: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, msg) => {
                write!(
                    f,
                    "failed to read config file '{}': {}",
                    path.display(),
                    msg
                )
            }
            ConfigError::ParseError(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::DuplicateInterface { id } => {
                write!(f, "interface {} is configured more than once", id)
            }
            ConfigError::InvalidValue { context, reason } => {
                write!(f, "invalid value in {}: {}", context, reason)
            }
            ConfigError::AddressFamily {
                proto,
                address,
                context,
            } => write!(
                f,
                "address {} in {} does not belong to protocol {}",
                address, context, proto
            ),
            ConfigError::InvalidMulticastAddress { address, context } => {
                write!(f, "invalid multicast address {} in {}", address, context)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
