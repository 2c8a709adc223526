// src/logging.rs

//! Logging for `forkpool` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `FORKPOOL_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that children can use stdout for task output.
//!
//! Components don't log through bare macros: each owns a [`Logger`], a
//! small scoped handle that tags every event with the component's scope
//! (e.g. `[runner][group:3]`) and can time named spans.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => std::env::var("FORKPOOL_LOG")
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(tracing::Level::INFO),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

/// Scoped logging handle owned by a single component.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    scope: String,
    profiles: RefCell<HashMap<String, Instant>>,
}

impl Logger {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            profiles: RefCell::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Replace the scope, e.g. once a task knows which pid it runs in.
    pub fn set_scope(&mut self, scope: impl Into<String>) {
        self.scope = scope.into();
    }

    pub fn debug(&self, message: impl Display) {
        debug!(scope = %self.scope, "{message}");
    }

    pub fn info(&self, message: impl Display) {
        info!(scope = %self.scope, "{message}");
    }

    pub fn warning(&self, message: impl Display) {
        warn!(scope = %self.scope, "{message}");
    }

    pub fn error(&self, message: impl Display) {
        error!(scope = %self.scope, "{message}");
    }

    /// Start timing the span named `key`. Restarting a running key resets it.
    pub fn begin_profile(&self, key: impl Into<String>) {
        self.profiles.borrow_mut().insert(key.into(), Instant::now());
    }

    /// Finish the span named `key` and log its duration.
    ///
    /// Unknown keys are ignored.
    pub fn end_profile(&self, key: &str, label: impl Display) {
        let started = self.profiles.borrow_mut().remove(key);
        if let Some(started) = started {
            let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            debug!(scope = %self.scope, key, elapsed_us, "{label}");
        }
    }

    /// Number of spans currently being timed.
    pub fn open_profiles(&self) -> usize {
        self.profiles.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_accepts_warning_alias() {
        assert_eq!(parse_level_str(" Warning "), Some(tracing::Level::WARN));
        assert_eq!(parse_level_str("nope"), None);
    }

    #[test]
    fn profiles_open_and_close() {
        let logger = Logger::new("[test]");
        logger.begin_profile("write_1");
        logger.begin_profile("read_1");
        assert_eq!(logger.open_profiles(), 2);

        logger.end_profile("write_1", "writing 1");
        logger.end_profile("missing", "ignored");
        assert_eq!(logger.open_profiles(), 1);
    }
}
