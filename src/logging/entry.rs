// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry structure

use super::{Facility, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Maximum number of key-value pairs carried by one entry
pub const MAX_KVS: usize = 4;

/// A single structured log record
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kvs: Vec<(String, String)>,
}

impl LogEntry {
    /// Create a new log entry stamped with the current wall-clock time
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            facility,
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    /// Attach a key-value pair; pairs beyond `MAX_KVS` are dropped
    pub fn add_kv(&mut self, key: &str, value: &str) -> bool {
        if self.kvs.len() >= MAX_KVS {
            return false;
        }
        self.kvs.push((key.to_string(), value.to_string()));
        true
    }

    pub fn get_message(&self) -> &str {
        &self.message
    }

    /// Render as a single JSON object (the stderr wire format)
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "level": self.severity.as_str(),
            "facility": self.facility.as_str(),
            "message": self.message,
        });
        if !self.kvs.is_empty() {
            let kvs: serde_json::Map<String, serde_json::Value> = self
                .kvs
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            obj["kv"] = serde_json::Value::Object(kvs);
        }
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kv_cap() {
        let mut entry = LogEntry::new(Severity::Info, Facility::Test, "msg");
        for i in 0..MAX_KVS {
            assert!(entry.add_kv("k", &i.to_string()));
        }
        assert!(!entry.add_kv("k", "overflow"));
        assert_eq!(entry.kvs.len(), MAX_KVS);
    }

    #[test]
    fn test_entry_json_shape() {
        let mut entry = LogEntry::new(Severity::Warning, Facility::Interface, "limit");
        entry.add_kv("intf", "3");
        let json = entry.to_json();
        assert_eq!(json["level"], "WARNING");
        assert_eq!(json["facility"], "Interface");
        assert_eq!(json["message"], "limit");
        assert_eq!(json["kv"]["intf"], "3");
    }
}
