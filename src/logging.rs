//! Structured logging for classification decisions.
//!
//! When enabled, every resolved path produces one log entry (filtered by
//! level), written to an append-only file in text or JSON format. The log is
//! a diagnostic artifact: it answers "why did the audit flag this path"
//! after the fact, without re-running the trace.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::resolver::{Operation, Resolution, RiskLevel};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether decision logging is enabled.
    pub enabled: bool,
    /// Path to the log file. Supports `~` expansion.
    pub file: Option<String>,
    /// Output format: "text" or "json".
    pub format: LogFormat,
    /// Which decision levels to log.
    pub events: LogEventFilter,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: None,
            format: LogFormat::Text,
            events: LogEventFilter::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter for which decision levels to log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEventFilter {
    pub high: bool,
    pub low: bool,
    pub safe: bool,
}

impl Default for LogEventFilter {
    fn default() -> Self {
        Self {
            high: true,
            low: true,
            safe: false,
        }
    }
}

impl LogEventFilter {
    #[must_use]
    const fn wants(&self, level: RiskLevel) -> bool {
        match level {
            RiskLevel::High => self.high,
            RiskLevel::Low => self.low,
            RiskLevel::Safe => self.safe,
        }
    }
}

/// A structured log entry for one classified path.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub task: String,
    pub operation: String,
    pub path: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn new(task: &str, operation: Operation, path: &Path, resolution: Resolution) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            task: task.to_string(),
            operation: operation.label().to_string(),
            path: path.display().to_string(),
            level: resolution.level.label().to_string(),
            kind: resolution.kind.map(|k| k.label().to_string()),
        }
    }

    fn render_text(&self) -> String {
        let kind = self.kind.as_deref().unwrap_or("-");
        format!(
            "{} [{}] {} {} level={} kind={}",
            self.timestamp, self.task, self.operation, self.path, self.level, kind
        )
    }
}

/// Appends decision entries to the configured log file.
///
/// Writes are buffered and serialized behind a mutex; a logger with no
/// destination (disabled, or the file could not be opened) drops entries
/// silently - decision logging must never fail the audit.
pub struct DecisionLogger {
    config: LoggingConfig,
    writer: Option<Mutex<BufWriter<std::fs::File>>>,
}

impl std::fmt::Debug for DecisionLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionLogger")
            .field("enabled", &self.config.enabled)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

impl DecisionLogger {
    /// Create a logger from configuration. Opening the file lazily would
    /// race with per-task side logs in the same directory, so open up front.
    #[must_use]
    pub fn new(config: &LoggingConfig) -> Self {
        let writer = if config.enabled {
            config
                .file
                .as_deref()
                .map(expand_tilde)
                .and_then(|path| {
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .ok()
                })
                .map(|file| Mutex::new(BufWriter::new(file)))
        } else {
            None
        };

        Self {
            config: config.clone(),
            writer,
        }
    }

    /// A logger that never writes.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            config: LoggingConfig::default(),
            writer: None,
        }
    }

    /// Record one classification decision.
    pub fn log_resolution(
        &self,
        task: &str,
        operation: Operation,
        path: &Path,
        resolution: Resolution,
    ) {
        if !self.config.events.wants(resolution.level) {
            return;
        }
        let Some(writer) = &self.writer else {
            return;
        };

        let entry = LogEntry::new(task, operation, path, resolution);
        let line = match self.config.format {
            LogFormat::Text => entry.render_text(),
            LogFormat::Json => match serde_json::to_string(&entry) {
                Ok(json) => json,
                Err(_) => return,
            },
        };

        if let Ok(mut writer) = writer.lock() {
            let _ = writeln!(writer, "{line}");
            let _ = writer.flush();
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
