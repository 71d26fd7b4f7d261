// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Group membership protocols (IGMP and MLD), router side
//!
//! This module holds the protocol-neutral types shared by the engine and its
//! embedders, plus the building blocks the engine runs on:
//!
//! - **addr**: address catalog mapping source addresses to stable ordinals
//! - **timers**: keyed one-shot timer queue driven by explicit `Instant`s
//! - **router**: the membership engine itself (interfaces, groups, output
//!   state, host tracking and client notification delivery)
//!
//! ## Versions
//!
//! | Version | IGMP | MLD | Capability |
//! |---------|------|-----|------------|
//! | Basic   | v1   | -   | Joins only |
//! | Leaves  | v2   | v1  | Joins and leaves |
//! | Sources | v3   | v2  | Source filtering |
//!
//! Packet encode/decode is not done here. Embedders decode datagrams into
//! [`Packet`] and encode [`router::QueryPacket`] values handed back by
//! `Instance::xmit`.

pub mod addr;
pub mod router;
pub mod timers;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Protocol family served by an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    /// IPv4 group management
    Igmp,
    /// IPv6 multicast listener discovery
    Mld,
}

impl Proto {
    /// Address length in bytes
    pub fn addr_len(self) -> usize {
        match self {
            Proto::Igmp => 4,
            Proto::Mld => 16,
        }
    }

    /// Whether the address belongs to this protocol's family
    pub fn matches(self, addr: &IpAddr) -> bool {
        matches!(
            (self, addr),
            (Proto::Igmp, IpAddr::V4(_)) | (Proto::Mld, IpAddr::V6(_))
        )
    }

    /// Smallest query response interval the wire format can carry
    pub fn min_max_resp(self) -> Duration {
        match self {
            Proto::Igmp => Duration::from_millis(100),
            Proto::Mld => Duration::from_millis(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Proto::Igmp => "igmp",
            Proto::Mld => "mld",
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Proto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "igmp" => Ok(Proto::Igmp),
            "mld" => Ok(Proto::Mld),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// Protocol capability level
///
/// Ordered so that a lower version is a subset of a higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Version {
    /// IGMPv1: joins only, no leaves
    Basic = 1,
    /// IGMPv2 / MLDv1: joins and group leaves
    Leaves = 2,
    /// IGMPv3 / MLDv2: source filtering
    Sources = 3,
}

impl Version {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Protocol-specific version number as seen on the wire
    pub fn wire_version(self, proto: Proto) -> u8 {
        match proto {
            Proto::Igmp => self as u8,
            Proto::Mld => (self as u8).saturating_sub(1).max(1),
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::Sources
    }
}

impl TryFrom<u8> for Version {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Version::Basic),
            2 => Ok(Version::Leaves),
            3 => Ok(Version::Sources),
            other => Err(format!("invalid protocol version {}", other)),
        }
    }
}

impl From<Version> for u8 {
    fn from(v: Version) -> u8 {
        v as u8
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Version::Basic => "basic",
            Version::Leaves => "leaves",
            Version::Sources => "sources",
        };
        f.write_str(name)
    }
}

/// Source filter mode of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Include,
    Exclude,
}

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::Include
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Include => f.write_str("include"),
            FilterMode::Exclude => f.write_str("exclude"),
        }
    }
}

/// Report group record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "is_in")]
    IsInclude,
    #[serde(rename = "is_ex")]
    IsExclude,
    #[serde(rename = "to_in")]
    ToInclude,
    #[serde(rename = "to_ex")]
    ToExclude,
    #[serde(rename = "allow")]
    AllowNew,
    #[serde(rename = "block")]
    BlockOld,
}

impl RecordType {
    /// Current-state records restate the whole filter; the rest are changes
    pub fn is_current_state(self) -> bool {
        matches!(self, RecordType::IsInclude | RecordType::IsExclude)
    }

    pub fn is_exclude_type(self) -> bool {
        matches!(self, RecordType::IsExclude | RecordType::ToExclude)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::IsInclude => "IS_IN",
            RecordType::IsExclude => "IS_EX",
            RecordType::ToInclude => "TO_IN",
            RecordType::ToExclude => "TO_EX",
            RecordType::AllowNew => "ALLOW",
            RecordType::BlockOld => "BLOCK",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One group record of a membership report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(rename = "type")]
    pub rec_type: RecordType,
    pub group: IpAddr,
    #[serde(default)]
    pub sources: Vec<IpAddr>,
}

impl GroupRecord {
    pub fn new(rec_type: RecordType, group: IpAddr, sources: Vec<IpAddr>) -> Self {
        Self {
            rec_type,
            group,
            sources,
        }
    }
}

/// Payload of a received query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryBody {
    /// Queried group; `None` for a general query
    #[serde(default)]
    pub group: Option<IpAddr>,
    #[serde(default)]
    pub sources: Vec<IpAddr>,
    #[serde(default, with = "duration_ms", rename = "max_resp_ms")]
    pub max_resp: Duration,
    /// "Suppress router-side processing" flag
    #[serde(default)]
    pub suppress: bool,
    /// Querier's robustness variable (0 = unspecified)
    #[serde(default)]
    pub qrv: u32,
    /// Querier's query interval (zero = unspecified)
    #[serde(default, with = "duration_ms", rename = "qqi_ms")]
    pub qqi: Duration,
}

/// Decoded packet contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PacketBody {
    Query(QueryBody),
    Report { records: Vec<GroupRecord> },
}

/// A decoded, protocol-neutral packet as received on an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub version: Version,
    pub src: IpAddr,
    /// Opaque attribute handed to the policy hook
    #[serde(default)]
    pub attr: u32,
    pub body: PacketBody,
}

impl Packet {
    pub fn report(version: Version, src: IpAddr, records: Vec<GroupRecord>) -> Self {
        Self {
            version,
            src,
            attr: 0,
            body: PacketBody::Report { records },
        }
    }

    pub fn query(version: Version, src: IpAddr, body: QueryBody) -> Self {
        Self {
            version,
            src,
            attr: 0,
            body: PacketBody::Query(body),
        }
    }
}

/// Serialize a `Duration` as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
