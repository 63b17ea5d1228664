use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{instance::RuntimeState, utils::extract_timestamp};

use super::log::LogEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    StatusChanged {
        old: RuntimeState,
        new: RuntimeState,
    },

    LogAppended {
        entry: LogEntry,
    },
}

/// Something an observer of an instance may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEvent {
    pub id: Uuid,

    /// The instance this event belongs to.
    pub server: Uuid,

    pub timestamp: DateTime<Utc>,

    pub payload: EventPayload,
}

impl InstanceEvent {
    pub fn status_changed(server: Uuid, old: RuntimeState, new: RuntimeState) -> Self {
        Self {
            id: Uuid::new_v4(),
            server,
            timestamp: Utc::now(),
            payload: EventPayload::StatusChanged { old, new },
        }
    }

    /// Worker lines carry their own clock; prefer it over the receive time.
    pub fn log_appended(server: Uuid, entry: LogEntry) -> Self {
        let timestamp = extract_timestamp(&entry.message).unwrap_or_else(Utc::now);
        Self {
            id: Uuid::new_v4(),
            server,
            timestamp,
            payload: EventPayload::LogAppended { entry },
        }
    }
}

impl Display for InstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::StatusChanged { old, new } => write!(
                f,
                "[{}] {}: state changed: {} -> {}",
                self.timestamp, self.server, old, new
            ),
            EventPayload::LogAppended { entry } => write!(
                f,
                "[{}] {}: [{}] {}",
                self.timestamp, self.server, entry.level, entry.message
            ),
        }
    }
}
