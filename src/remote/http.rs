use std::{path::Path, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{fs::File, io::AsyncWriteExt};

use crate::error::RemoteError;

use super::{Downloader, Fetcher};

const USER_AGENT: &str = concat!("msm-core/", env!("CARGO_PKG_VERSION"));

/// `reqwest`-backed [`Fetcher`] and [`Downloader`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, RemoteError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch_json(&self, url: &str) -> Result<Value, RemoteError> {
        self.get(url)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Downloader for HttpClient {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), RemoteError> {
        let mut resp = self.get(url).await?;

        // Streamed into a sibling file; `dest` only ever holds a complete body.
        let tmp = dest.with_extension("part");
        let result = async {
            let mut out = File::create(&tmp)
                .await
                .map_err(|e| RemoteError::Io(e.to_string()))?;
            while let Some(chunk) = resp
                .chunk()
                .await
                .map_err(|e| RemoteError::Request(e.to_string()))?
            {
                out.write_all(&chunk)
                    .await
                    .map_err(|e| RemoteError::Io(e.to_string()))?;
            }
            out.flush().await.map_err(|e| RemoteError::Io(e.to_string()))?;
            tokio::fs::rename(&tmp, dest)
                .await
                .map_err(|e| RemoteError::Io(e.to_string()))
        }
        .await;

        if result.is_err() {
            _ = tokio::fs::remove_file(&tmp).await;
        }
        tracing::debug!(%url, dest = %dest.display(), ok = result.is_ok(), "download finished");
        result
    }
}
