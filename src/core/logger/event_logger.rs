use crate::core::logger::status::StatusEvent;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Placeholder replaced with the run's start time in log paths
pub const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

/// Structure for a single log entry
#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    /// What happened
    #[serde(flatten)]
    pub event: &'a StatusEvent,
    /// Seconds since Unix Epoch with microsecond precision
    pub timestamp: f64,
}

/// Determines how the logger should operate
#[derive(Debug)]
pub enum LoggerMode {
    /// Logging is disabled entirely
    Disabled,
    /// Log to the specified file
    ToFile(Mutex<File>),
}

/// JSON-lines event log for a single run
pub struct EventLogger {
    mode: LoggerMode,
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLogger {
    /// Create a new logger with logging disabled
    pub fn new() -> Self {
        EventLogger {
            mode: LoggerMode::Disabled,
        }
    }

    /// Create a new logger that appends to the specified file
    ///
    /// If the path contains "{timestamp}", it is replaced with the current
    /// UTC time.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = resolve_log_path(path.as_ref());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;

        Ok(EventLogger {
            mode: LoggerMode::ToFile(Mutex::new(file)),
        })
    }

    /// Append one record, if enabled
    pub fn log_event(&self, event: &StatusEvent) {
        // Early return if logging is disabled
        let LoggerMode::ToFile(file) = &self.mode else {
            return;
        };

        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0;
        let entry = LogEntry { event, timestamp };

        if let Ok(json) = serde_json::to_string(&entry) {
            let mut file = file.lock();
            let _ = writeln!(file, "{}", json);
            let _ = file.flush();
        }
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, LoggerMode::Disabled)
    }
}

fn resolve_log_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw.contains(TIMESTAMP_PLACEHOLDER) {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(raw.replace(TIMESTAMP_PLACEHOLDER, &stamp))
    } else {
        path.to_path_buf()
    }
}
