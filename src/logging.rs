//! Structured logging for guard decisions.
//!
//! Diagnostics go through `tracing`; [`init_tracing`] installs the stderr
//! subscriber used by the CLI. Separately, [`DecisionLogger`] appends one line
//! per `DROP DATABASE` decision to a file, as text or JSON.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use tracing_subscriber::EnvFilter;

use crate::evaluator::{EvaluationDecision, EvaluationResult};

/// Environment variable holding a `tracing` filter directive.
pub const ENV_LOG_FILTER: &str = "DDD_LOG";

// ============================================================================
// Configuration Types
// ============================================================================

/// Decision log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether the decision log is written.
    pub enabled: bool,
    /// Path to log file. Supports ~ expansion.
    pub file: Option<String>,
    /// Output format: "text" or "json".
    pub format: LogFormat,
    /// Events to log.
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

/// Which decisions to log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEventFilter {
    pub deny: bool,
    pub allow: bool,
}

impl Default for LogEventFilter {
    fn default() -> Self {
        Self {
            deny: true,
            allow: false,
        }
    }
}

// ============================================================================
// Log Entry
// ============================================================================

/// One logged decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub decision: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_entry: Option<String>,
    pub statement: String,
    pub query: String,
}

impl LogEntry {
    /// Build an entry for a `DROP DATABASE` decision.
    ///
    /// Returns `None` for statements the guard does not apply to.
    #[must_use]
    pub fn from_result(result: &EvaluationResult, statement: &str, query: &str) -> Option<Self> {
        let database = result.database()?;
        let decision = match result.decision {
            EvaluationDecision::Allow => "allow",
            EvaluationDecision::Deny => "deny",
        };
        Some(Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            decision: decision.to_string(),
            database: database.to_string(),
            matched_entry: result.matched.as_ref().map(|m| m.label().to_string()),
            statement: statement.to_string(),
            query: query.to_string(),
        })
    }

    /// Format as text log line.
    #[must_use]
    pub fn format_text(&self) -> String {
        let mut parts = Vec::with_capacity(6);
        parts.push(format!("[{}]", self.timestamp));
        parts.push(self.decision.to_uppercase());
        parts.push(self.database.clone());
        if let Some(ref entry) = self.matched_entry {
            parts.push(format!("(entry: {entry})"));
        }
        parts.push(format!("\"{}\"", self.query));
        parts.join(" ")
    }

    /// Format as JSON line.
    #[must_use]
    pub fn format_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// Logger
// ============================================================================

/// Appends guard decisions to a file.
#[derive(Debug)]
pub struct DecisionLogger {
    config: LoggingConfig,
    writer: Option<Mutex<BufWriter<File>>>,
}

impl DecisionLogger {
    /// Create a logger, or `None` when logging is disabled.
    ///
    /// A log file that cannot be opened disables writing but not the guard.
    #[must_use]
    pub fn new(config: &LoggingConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let writer = config.file.as_ref().and_then(|path| {
            let expanded = expand_tilde(path);
            match open_log_file(&expanded) {
                Ok(f) => Some(Mutex::new(BufWriter::new(f))),
                Err(e) => {
                    tracing::warn!(path = %expanded, error = %e, "cannot open decision log");
                    None
                }
            }
        });
        Some(Self {
            config: config.clone(),
            writer,
        })
    }

    /// Log a decision if the event filter asks for it.
    pub fn log(&self, result: &EvaluationResult, statement: &str, query: &str) {
        if !self.should_log(result) {
            return;
        }
        let Some(entry) = LogEntry::from_result(result, statement, query) else {
            return;
        };
        let line = match self.config.format {
            LogFormat::Text => entry.format_text(),
            LogFormat::Json => entry.format_json(),
        };
        if let Some(ref writer) = self.writer {
            let mut w = writer.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    const fn should_log(&self, result: &EvaluationResult) -> bool {
        match result.decision {
            EvaluationDecision::Allow => self.config.events.allow,
            EvaluationDecision::Deny => self.config.events.deny,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

fn open_log_file(path: &str) -> std::io::Result<File> {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the stderr `tracing` subscriber.
///
/// The filter comes from `DDD_LOG` when set, else `debug` for verbose runs and
/// `warn` otherwise. Safe to call more than once.
pub fn init_tracing(verbose: bool, ansi: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(ENV_LOG_FILTER).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(ansi)
        .try_init();
}
