use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::{
    error::{CatalogError, RemoteError},
    remote::Fetcher,
};

use super::vanilla::{VersionDescriptor, VersionManifest, VersionMetadata};

/// Remote version manifest, fetched on first use and kept for the life of
/// the catalog. Never refreshed.
pub struct VersionCatalog {
    fetcher: Arc<dyn Fetcher>,
    manifest_url: String,
    cache: OnceCell<VersionManifest>,
}

impl std::fmt::Debug for VersionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionCatalog")
            .field("manifest_url", &self.manifest_url)
            .field("cached", &self.cache.initialized())
            .finish()
    }
}

impl VersionCatalog {
    pub fn new(fetcher: Arc<dyn Fetcher>, manifest_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            manifest_url: manifest_url.into(),
            cache: OnceCell::new(),
        }
    }

    /// Concurrent first callers share a single fetch. A failed fetch is not
    /// cached.
    pub async fn get(&self) -> Result<&VersionManifest, CatalogError> {
        self.cache
            .get_or_try_init(|| async {
                tracing::info!(url = %self.manifest_url, "fetching version manifest");
                let value = self
                    .fetcher
                    .fetch_json(&self.manifest_url)
                    .await
                    .map_err(CatalogError::Fetch)?;
                serde_json::from_value(value).map_err(|e| {
                    CatalogError::Fetch(RemoteError::Decode(e.to_string()))
                })
            })
            .await
    }

    pub async fn latest_release(&self) -> Result<String, CatalogError> {
        Ok(self.get().await?.latest.release.clone())
    }

    pub async fn find(&self, id: &str) -> Result<Option<VersionDescriptor>, CatalogError> {
        Ok(self.get().await?.find(id).cloned())
    }

    pub async fn metadata(
        &self,
        descriptor: &VersionDescriptor,
    ) -> Result<VersionMetadata, CatalogError> {
        let value = self
            .fetcher
            .fetch_json(&descriptor.url)
            .await
            .map_err(|source| CatalogError::Metadata {
                id: descriptor.id.clone(),
                source,
            })?;
        serde_json::from_value(value).map_err(|e| CatalogError::Metadata {
            id: descriptor.id.clone(),
            source: RemoteError::Decode(e.to_string()),
        })
    }
}
