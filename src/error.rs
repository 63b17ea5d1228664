use thiserror::Error;
use uuid::Uuid;

use crate::instance::RuntimeState;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Failed to write download: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Failed to fetch version manifest: {0}")]
    Fetch(RemoteError),

    #[error("Failed to fetch version metadata for {id}: {source}")]
    Metadata { id: String, source: RemoteError },
}

#[derive(Debug, Clone, Error)]
pub enum PropertiesError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("Illegal Action: The server is currently {}.", .state.to_string().to_lowercase())]
    IllegalStateTransition { state: RuntimeState },

    #[error("Unable to find version info for {0}")]
    VersionNotFound(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Failed to start server. {0}")]
    ProcessSpawn(String),

    #[error("Failed to access child stdout pipe")]
    NoStdoutPipe,

    #[error("Failed to access child stderr pipe")]
    NoStderrPipe,

    #[error("Failed to access child stdin pipe")]
    NoStdinPipe,

    #[error("Failed to write to stdin")]
    StdinWriteFailed,

    #[error(transparent)]
    Properties(#[from] PropertiesError),
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("No server with id {0}")]
    UnknownServer(Uuid),

    #[error("Failed to read registry file: {0}")]
    Read(String),

    #[error("Failed to write registry file: {0}")]
    Write(String),

    #[error("Malformed registry file: {0}")]
    Json(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Server(#[from] ServerError),
}
