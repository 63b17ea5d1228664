//! Supervisor engine for locally hosted Minecraft server instances.
//!
//! A [`ServerRegistry`] owns any number of [`Server`]s. Each one provisions
//! its server jar from the Mojang version manifest, runs it as a child
//! process, classifies its console output into a log and lifecycle
//! transitions, walks the user through EULA acceptance, and edits
//! `server.properties` without disturbing comments or ordering.
//!
//! Observers follow instances through the [`EventBus`] carried in
//! [`Services`].

pub mod config;
pub mod error;
pub mod instance;
pub mod manifests;
pub mod parser;
pub mod properties;
pub mod remote;
pub mod server;
pub mod utils;

pub use config::{
    ServerConfig, Settings,
    stream::{EventBus, EventPayload, InstanceEvent, LogEntry, LogLevel},
};
pub use error::{CatalogError, PropertiesError, RegistryError, RemoteError, ServerError};
pub use instance::RuntimeState;
pub use manifests::{VersionCatalog, VersionManifest};
pub use properties::{Property, PropertyLine};
pub use server::{Confirm, FixedAnswer, Server, ServerRegistry, Services, domain::ServerUpdate};
