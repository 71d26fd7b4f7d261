// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handles, output sinks, and the level registry

use super::entry::LogEntry;
use super::{Facility, Severity};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

type FacilityLevels = Arc<RwLock<HashMap<Facility, Severity>>>;

/// Destination for log entries that passed level filtering
pub trait LogSink: Send + Sync {
    fn write(&self, entry: LogEntry);
}

/// Writes one JSON object per line to stderr
pub struct StderrJsonSink;

impl LogSink for StderrJsonSink {
    fn write(&self, entry: LogEntry) {
        eprintln!("{}", entry.to_json());
    }
}

/// Bounded in-memory history, oldest entries evicted first
pub struct MemorySink {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Copy of the retained entries, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    /// Remove and return every retained entry
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any retained message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().any(|e| e.message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

/// Logger handle for writing log entries
///
/// This is a lightweight handle that can be cloned and passed around.
/// The sink and the level tables are shared via Arc.
pub struct Logger {
    sink: Arc<dyn LogSink>,
    /// Global minimum log level (default: Info)
    global_min_level: Arc<AtomicU8>,
    /// Per-facility minimum log levels
    facility_min_levels: FacilityLevels,
}

impl Logger {
    /// Create a logger writing to an arbitrary sink
    pub fn with_sink(
        sink: Arc<dyn LogSink>,
        global_min_level: Arc<AtomicU8>,
        facility_min_levels: FacilityLevels,
    ) -> Self {
        Self {
            sink,
            global_min_level,
            facility_min_levels,
        }
    }

    /// Create a standalone logger that writes JSON lines to stderr at Info
    pub fn stderr_json() -> Self {
        Self::with_sink(
            Arc::new(StderrJsonSink),
            Arc::new(AtomicU8::new(Severity::Info as u8)),
            Arc::new(RwLock::new(HashMap::new())),
        )
    }

    /// Create a standalone logger capturing into `sink`
    pub fn memory(sink: Arc<MemorySink>, level: Severity) -> Self {
        Self::with_sink(
            sink,
            Arc::new(AtomicU8::new(level as u8)),
            Arc::new(RwLock::new(HashMap::new())),
        )
    }

    /// Check if a log message should be written based on severity filtering
    #[inline]
    pub fn should_log(&self, severity: Severity, facility: Facility) -> bool {
        // Facility-specific level overrides the global one
        let levels = self
            .facility_min_levels
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(&min_level) = levels.get(&facility) {
            return severity <= min_level;
        }
        drop(levels);

        let global_min = self.global_min_level.load(Ordering::Relaxed);
        (severity as u8) <= global_min
    }

    /// Write a log entry
    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.should_log(severity, facility) {
            return;
        }
        self.sink.write(LogEntry::new(severity, facility, message));
    }

    /// Write a log entry with key-value pairs
    #[inline]
    pub fn log_kv(
        &self,
        severity: Severity,
        facility: Facility,
        message: &str,
        kvs: &[(&str, &str)],
    ) {
        if !self.should_log(severity, facility) {
            return;
        }

        let mut entry = LogEntry::new(severity, facility, message);
        for (key, value) in kvs {
            if !entry.add_kv(key, value) {
                break;
            }
        }
        self.sink.write(entry);
    }

    /// Log with emergency severity
    #[inline]
    pub fn emergency(&self, facility: Facility, message: &str) {
        self.log(Severity::Emergency, facility, message);
    }

    /// Log with alert severity
    #[inline]
    pub fn alert(&self, facility: Facility, message: &str) {
        self.log(Severity::Alert, facility, message);
    }

    /// Log with critical severity
    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    /// Log with error severity
    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    /// Log with warning severity
    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    /// Log with notice severity
    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    /// Log with info severity
    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    /// Log with debug severity
    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }

    /// Set the global minimum log level
    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Set the minimum log level for a specific facility
    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(facility, level);
    }

    /// Clear the facility-specific log level (fall back to global)
    pub fn clear_facility_level(&self, facility: Facility) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&facility);
    }
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            global_min_level: Arc::clone(&self.global_min_level),
            facility_min_levels: Arc::clone(&self.facility_min_levels),
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field(
                "global_min_level",
                &Severity::from_u8(self.global_min_level.load(Ordering::Relaxed)),
            )
            .finish_non_exhaustive()
    }
}

/// Registry for creating loggers that share one sink and one set of levels
///
/// Changing a level through the registry affects every logger it handed out.
pub struct LogRegistry {
    sink: Arc<dyn LogSink>,
    /// Global minimum log level (default: Info = 6)
    global_min_level: Arc<AtomicU8>,
    /// Per-facility minimum log levels (overrides global)
    facility_min_levels: FacilityLevels,
    loggers: HashMap<Facility, Logger>,
}

impl LogRegistry {
    /// Create a registry over an arbitrary sink
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        let global_min_level = Arc::new(AtomicU8::new(Severity::Info as u8));
        let facility_min_levels: FacilityLevels = Arc::new(RwLock::new(HashMap::new()));

        let loggers = Facility::ALL
            .iter()
            .map(|&facility| {
                let logger = Logger::with_sink(
                    Arc::clone(&sink),
                    Arc::clone(&global_min_level),
                    Arc::clone(&facility_min_levels),
                );
                (facility, logger)
            })
            .collect();

        Self {
            sink,
            global_min_level,
            facility_min_levels,
            loggers,
        }
    }

    /// Registry writing JSON lines to stderr
    pub fn stderr_json() -> Self {
        Self::with_sink(Arc::new(StderrJsonSink))
    }

    /// Get a logger for a specific facility
    pub fn get(&self, facility: Facility) -> Option<&Logger> {
        self.loggers.get(&facility)
    }

    /// Get a cloned logger for a specific facility
    pub fn get_logger(&self, facility: Facility) -> Option<Logger> {
        self.loggers.get(&facility).cloned()
    }

    /// A logger bound to this registry's sink and levels
    pub fn logger(&self) -> Logger {
        Logger::with_sink(
            Arc::clone(&self.sink),
            Arc::clone(&self.global_min_level),
            Arc::clone(&self.facility_min_levels),
        )
    }

    /// Set the global minimum log level
    ///
    /// This affects all facilities unless overridden by facility-specific levels.
    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Get the global minimum log level
    pub fn get_global_level(&self) -> Severity {
        let level = self.global_min_level.load(Ordering::Relaxed);
        Severity::from_u8(level).unwrap_or(Severity::Info)
    }

    /// Set the minimum log level for a specific facility
    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        let mut levels = self
            .facility_min_levels
            .write()
            .unwrap_or_else(|e| e.into_inner());
        levels.insert(facility, level);
    }

    /// Clear the facility-specific log level (fall back to global)
    pub fn clear_facility_level(&self, facility: Facility) {
        let mut levels = self
            .facility_min_levels
            .write()
            .unwrap_or_else(|e| e.into_inner());
        levels.remove(&facility);
    }

    /// Get the effective minimum log level for a specific facility
    pub fn get_facility_level(&self, facility: Facility) -> Severity {
        let levels = self
            .facility_min_levels
            .read()
            .unwrap_or_else(|e| e.into_inner());
        levels
            .get(&facility)
            .copied()
            .unwrap_or_else(|| self.get_global_level())
    }

    /// Get all facility-specific log level overrides
    pub fn get_all_facility_levels(&self) -> HashMap<Facility, Severity> {
        self.facility_min_levels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
