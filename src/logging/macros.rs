// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging
//
// Each level macro accepts either a ready message (`&str`) or a format
// string with arguments.

/// Log a message with emergency severity
#[macro_export]
macro_rules! log_emergency {
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.emergency($facility, &format!($fmt, $($arg)+))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.emergency($facility, $msg)
    };
}

/// Log a message with alert severity
#[macro_export]
macro_rules! log_alert {
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.alert($facility, &format!($fmt, $($arg)+))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.alert($facility, $msg)
    };
}

/// Log a message with critical severity
#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.critical($facility, &format!($fmt, $($arg)+))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.critical($facility, $msg)
    };
}

/// Log a message with error severity
///
/// # Examples
/// ```ignore
/// log_error!(logger, Facility::Config, "invalid interface {}", id);
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.error($facility, &format!($fmt, $($arg)+))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.error($facility, $msg)
    };
}

/// Log a message with warning severity
#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.warning($facility, &format!($fmt, $($arg)+))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.warning($facility, $msg)
    };
}

/// Log a message with notice severity
#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.notice($facility, &format!($fmt, $($arg)+))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.notice($facility, $msg)
    };
}

/// Log a message with info severity
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        $logger.info($facility, &format!($fmt, $($arg)+))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.info($facility, $msg)
    };
}

/// Log a message with debug severity
///
/// Formatting is skipped entirely when Debug is filtered for the facility.
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $facility:expr, $fmt:literal, $($arg:tt)+) => {
        if $logger.should_log($crate::logging::Severity::Debug, $facility) {
            $logger.debug($facility, &format!($fmt, $($arg)+))
        }
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.debug($facility, $msg)
    };
}

/// Log a message with key-value pairs
///
/// # Examples
/// ```ignore
/// log_kv!(logger, Severity::Info, Facility::Engine, "group created",
///         "intf" => "1", "group" => "232.1.1.1");
/// ```
#[macro_export]
macro_rules! log_kv {
    ($logger:expr, $severity:expr, $facility:expr, $msg:expr, $($key:expr => $value:expr),+) => {{
        let kvs: &[(&str, &str)] = &[$(($key, $value)),+];
        $logger.log_kv($severity, $facility, $msg, kvs)
    }};
}
