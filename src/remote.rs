//! Boundary to the network. The supervisor only ever needs two things from
//! it: a JSON document behind a URL, and a URL copied to a local file.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpClient;

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<Value, RemoteError>;
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Materialises `url` at `dest`, replacing anything already there.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), RemoteError>;
}
