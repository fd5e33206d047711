//! Structured logging utilities for the merge service's components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use smerge_config::logging::*;
//!
//! log_merge_info!("partition aborted", reduce_id = 3);
//! log_stream_debug!("deferred push", map_index = 7);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const MERGE: &'static str = "MERGE";
    pub const STREAM: &'static str = "STREAM";
    pub const CLEANER: &'static str = "CLEANER";
    pub const FETCH: &'static str = "FETCH";
    pub const DAEMON: &'static str = "DAEMON";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// === MERGE logging macros ===

#[macro_export]
macro_rules! log_merge_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "MERGE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_merge_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "MERGE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_merge_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "MERGE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_merge_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "MERGE", $($key = $value,)* $msg)
    };
}

// === STREAM logging macros ===

#[macro_export]
macro_rules! log_stream_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "STREAM", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_stream_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "STREAM", $($key = $value,)* $msg)
    };
}

// === CLEANER logging macros ===

#[macro_export]
macro_rules! log_cleaner_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CLEANER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cleaner_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLEANER", $($key = $value,)* $msg)
    };
}

// === FETCH logging macros ===

#[macro_export]
macro_rules! log_fetch_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FETCH", $($key = $value,)* $msg)
    };
}

// === DAEMON logging macros ===

#[macro_export]
macro_rules! log_daemon_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "DAEMON", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_daemon_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "DAEMON", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
