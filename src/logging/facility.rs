// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which part of the engine generated the message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Facility {
    // === Engine core ===
    /// Instance lifecycle, client registry
    Instance = 0,
    /// Interface attach/detach, parameters, channel limits
    Interface = 1,
    /// Querier election and general query scheduling
    Querier = 2,
    /// Report/query record processing
    Engine = 3,
    /// Output group mapping
    Oif = 4,
    /// Client notification queues
    Client = 5,
    /// Host tracking and fast leave
    Host = 6,
    /// Timer expiry dispatch
    Timer = 7,

    // === Embedding ===
    /// Async driver loop
    Supervisor = 8,
    /// Configuration loading
    Config = 9,

    // === Testing and Utilities ===
    /// Test harness and fixtures
    Test = 12,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    /// Every named facility, in code order
    pub const ALL: [Facility; 11] = [
        Facility::Instance,
        Facility::Interface,
        Facility::Querier,
        Facility::Engine,
        Facility::Oif,
        Facility::Client,
        Facility::Host,
        Facility::Timer,
        Facility::Supervisor,
        Facility::Config,
        Facility::Test,
    ];

    /// Get facility code as u8
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Instance => "Instance",
            Facility::Interface => "Interface",
            Facility::Querier => "Querier",
            Facility::Engine => "Engine",
            Facility::Oif => "Oif",
            Facility::Client => "Client",
            Facility::Host => "Host",
            Facility::Timer => "Timer",
            Facility::Supervisor => "Supervisor",
            Facility::Config => "Config",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }

    /// Create from u8 value (returns Unknown if invalid)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Facility::Instance,
            1 => Facility::Interface,
            2 => Facility::Querier,
            3 => Facility::Engine,
            4 => Facility::Oif,
            5 => Facility::Client,
            6 => Facility::Host,
            7 => Facility::Timer,
            8 => Facility::Supervisor,
            9 => Facility::Config,
            12 => Facility::Test,
            _ => Facility::Unknown,
        }
    }

    /// Look up a facility by its display name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
