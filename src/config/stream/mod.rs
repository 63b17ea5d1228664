mod bus;
mod event;
mod log;

pub use bus::EventBus;
pub use event::{EventPayload, InstanceEvent};
pub use log::{LogEntry, LogLevel};
