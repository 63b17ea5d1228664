use std::sync::Arc;

use tokio::{fs, sync::RwLock, task::JoinSet};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    config::{
        ServerConfig,
        stream::{InstanceEvent, LogEntry},
    },
    error::RegistryError,
    instance::RuntimeState,
    manifests::VersionManifest,
    properties::Property,
};

use super::domain::{Server, ServerUpdate, Services};

/// Owns every managed instance and routes commands to them by id.
#[derive(Debug)]
pub struct ServerRegistry {
    services: Services,
    servers: RwLock<Vec<Arc<Server>>>,
}

impl ServerRegistry {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            servers: RwLock::new(Vec::new()),
        }
    }

    /// Hydrates a registry from `<data_root>/server.json`. A missing file
    /// yields an empty registry.
    pub async fn load(services: Services) -> Result<Self, RegistryError> {
        let path = services.settings.registry_file();
        let configs: Vec<ServerConfig> = match fs::read(&path).await {
            Ok(data) => {
                serde_json::from_slice(&data).map_err(|e| RegistryError::Json(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(RegistryError::Read(e.to_string())),
        };

        tracing::info!(count = configs.len(), path = %path.display(), "loaded server registry");
        let servers = configs
            .into_iter()
            .map(|config| Server::new(config, services.clone()))
            .collect();

        Ok(Self {
            services,
            servers: RwLock::new(servers),
        })
    }

    pub async fn save(&self) -> Result<(), RegistryError> {
        let configs = self.configs().await;
        let settings = &self.services.settings;

        fs::create_dir_all(&settings.data_root)
            .await
            .map_err(|e| RegistryError::Write(e.to_string()))?;
        let json =
            serde_json::to_vec_pretty(&configs).map_err(|e| RegistryError::Json(e.to_string()))?;
        fs::write(settings.registry_file(), json)
            .await
            .map_err(|e| RegistryError::Write(e.to_string()))?;

        tracing::debug!(count = configs.len(), "saved server registry");
        Ok(())
    }

    /// New instance with default settings on the latest release.
    pub async fn create(&self) -> Result<ServerConfig, RegistryError> {
        let version = self.services.catalog.latest_release().await?;
        let config = ServerConfig::new(version);
        let server = Server::new(config.clone(), self.services.clone());

        self.servers.write().await.push(server);
        self.save().await?;

        tracing::info!(server = %config.id, version = %config.version, "created server");
        Ok(config)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Server>> {
        self.servers
            .read()
            .await
            .iter()
            .find(|server| server.id() == id)
            .cloned()
    }

    pub async fn config(&self, id: Uuid) -> Option<ServerConfig> {
        match self.get(id).await {
            Some(server) => Some(server.config().await),
            None => None,
        }
    }

    /// All configurations, in creation order.
    pub async fn configs(&self) -> Vec<ServerConfig> {
        let servers = self.servers.read().await.clone();
        let mut configs = Vec::with_capacity(servers.len());
        for server in servers {
            configs.push(server.config().await);
        }
        configs
    }

    /// `Ok(false)` for an unknown id.
    pub async fn update(&self, id: Uuid, update: ServerUpdate) -> Result<bool, RegistryError> {
        let Some(server) = self.get(id).await else {
            return Ok(false);
        };
        server.apply_update(update).await;
        self.save().await?;
        Ok(true)
    }

    /// Drains the instance with [`Server::quit`] before dropping it.
    /// `Ok(false)` for an unknown id. The working directory is kept.
    pub async fn delete(&self, id: Uuid) -> Result<bool, RegistryError> {
        let Some(server) = self.get(id).await else {
            return Ok(false);
        };
        server.quit().await?;

        self.servers.write().await.retain(|s| s.id() != id);
        self.save().await?;
        tracing::info!(server = %id, "deleted server");
        Ok(true)
    }

    pub async fn start(&self, id: Uuid) -> Result<(), RegistryError> {
        Ok(self.require(id).await?.start().await?)
    }

    pub async fn stop(&self, id: Uuid) -> Result<(), RegistryError> {
        Ok(self.require(id).await?.stop().await?)
    }

    pub async fn execute(&self, id: Uuid, command: &str) -> Result<(), RegistryError> {
        Ok(self.require(id).await?.execute(command).await?)
    }

    pub async fn properties(&self, id: Uuid) -> Result<Option<Vec<Property>>, RegistryError> {
        Ok(self.require(id).await?.properties().await?)
    }

    pub async fn set_properties(
        &self,
        id: Uuid,
        properties: &[Property],
    ) -> Result<Option<Vec<Property>>, RegistryError> {
        Ok(self.require(id).await?.set_properties(properties).await?)
    }

    pub async fn versions(&self) -> Result<VersionManifest, RegistryError> {
        Ok(self.services.catalog.get().await?.clone())
    }

    pub async fn status(&self, id: Uuid) -> Result<RuntimeState, RegistryError> {
        Ok(self.require(id).await?.state())
    }

    pub async fn logs(&self, id: Uuid) -> Result<Vec<LogEntry>, RegistryError> {
        Ok(self.require(id).await?.logs().await)
    }

    /// Status and log events of every instance.
    pub fn subscribe(&self) -> BroadcastStream<InstanceEvent> {
        self.services.bus.subscribe()
    }

    /// Quits every instance concurrently, then persists the registry.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let servers = self.servers.read().await.clone();
        let mut quits = JoinSet::new();
        for server in servers {
            quits.spawn(async move {
                if let Err(err) = server.quit().await {
                    tracing::warn!(server = %server.id(), error = %err, "quit failed");
                }
            });
        }
        while quits.join_next().await.is_some() {}

        self.save().await?;
        tracing::info!("safely shut down");
        Ok(())
    }

    async fn require(&self, id: Uuid) -> Result<Arc<Server>, RegistryError> {
        self.get(id).await.ok_or(RegistryError::UnknownServer(id))
    }
}
