use std::fmt::{self, Display};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::utils::clock_tag;

/// Tag stamped on lines the supervisor writes itself, as opposed to lines
/// echoed from the worker.
pub const SUPERVISOR_TAG: &str = "MSM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One entry of an instance's console history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// A worker line, stored verbatim.
    pub fn new<S: Into<String>>(level: LogLevel, message: S) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    /// A supervisor line, prefixed with `[HH:MM:SS] [MSM] `.
    pub fn synthesized<S: AsRef<str>>(level: LogLevel, message: S, at: DateTime<Local>) -> Self {
        Self {
            level,
            message: format!("{} [{}] {}", clock_tag(at), SUPERVISOR_TAG, message.as_ref()),
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
