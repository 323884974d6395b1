/// Operator-facing progress messages
///
/// These travel over the bus next to the regular `log` output so a front
/// end can show what the bench is doing without scraping log lines.
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A log entry with timestamp and message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub level: LogLevel,
}

/// Log entry severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogEntry {
    /// Create a new log entry with the current timestamp
    pub fn new(message: String, level: LogLevel) -> Self {
        Self {
            timestamp: Local::now(),
            message,
            level,
        }
    }

    pub fn info(message: String) -> Self {
        Self::new(message, LogLevel::Info)
    }

    pub fn warning(message: String) -> Self {
        Self::new(message, LogLevel::Warning)
    }

    pub fn error(message: String) -> Self {
        Self::new(message, LogLevel::Error)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(
            f,
            "[{}] {tag:<5} {}",
            self.timestamp.format("%H:%M:%S"),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_level_and_message() {
        let entry = LogEntry::warning("battery_short: NG".into());
        let text = entry.to_string();
        assert!(text.contains("WARN"));
        assert!(text.ends_with("battery_short: NG"));
    }

    #[test]
    fn level_serializes_lowercase() {
        let json = serde_json::to_string(&LogEntry::error("x".into())).unwrap();
        assert!(json.contains("\"level\":\"error\""));
    }
}
