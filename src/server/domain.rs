use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use chrono::Local;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::{
    fs,
    sync::{Mutex, RwLock, mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    config::{
        ServerConfig, Settings,
        stream::{EventBus, InstanceEvent, LogEntry, LogLevel},
    },
    error::ServerError,
    instance::{
        ExitOutcome, InstancePaths, OutputChunk, ProcessHandle, RuntimeState, SpawnedWorker,
        WorkerLaunch,
    },
    manifests::VersionCatalog,
    parser::{ClassifiedLine, LogClassifier, Marker},
    properties::{self, Property, PropertyLine},
    remote::{Downloader, Fetcher},
};

use super::license::{Confirm, EULA_QUESTION, EULA_TITLE};

pub const STOP_COMMAND: &str = "stop";

/// Collaborators shared by every instance of a registry.
#[derive(Clone)]
pub struct Services {
    pub settings: Arc<Settings>,
    pub catalog: Arc<VersionCatalog>,
    pub downloader: Arc<dyn Downloader>,
    pub confirm: Arc<dyn Confirm>,
    pub bus: EventBus,
}

/// Field set accepted by an update command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUpdate {
    pub name: String,
    pub version: String,
    pub min_memory: u32,
    pub soft_max_memory: u32,
    pub max_memory: u32,
}

/// State and the live process change together, under one lock.
#[derive(Debug, Default)]
struct Runtime {
    state: RuntimeState,
    process: Option<ProcessHandle>,
}

/// One managed instance: configuration, lifecycle state machine, the worker
/// process while there is one, and the console history.
#[derive(Debug)]
pub struct Server {
    id: Uuid,
    paths: InstancePaths,
    config: RwLock<ServerConfig>,
    runtime: Mutex<Runtime>,
    state_tx: watch::Sender<RuntimeState>,
    logs: Mutex<Vec<LogEntry>>,
    properties: Mutex<Option<Vec<PropertyLine>>>,
    services: Services,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("settings", &self.settings)
            .field("catalog", &self.catalog)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Services {
    pub fn new(
        settings: Settings,
        fetcher: Arc<dyn Fetcher>,
        downloader: Arc<dyn Downloader>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        let catalog = Arc::new(VersionCatalog::new(fetcher, settings.manifest_url.clone()));
        Self {
            settings: Arc::new(settings),
            catalog,
            downloader,
            confirm,
            bus: EventBus::new(),
        }
    }

    /// Fetches and downloads over HTTPS.
    #[cfg(feature = "http")]
    pub fn http(
        settings: Settings,
        confirm: Arc<dyn Confirm>,
    ) -> Result<Self, crate::error::RemoteError> {
        let client = Arc::new(crate::remote::HttpClient::new()?);
        Ok(Self::new(settings, client.clone(), client, confirm))
    }
}

impl Server {
    pub fn new(config: ServerConfig, services: Services) -> Arc<Self> {
        let paths = services.settings.instance_paths(config.id);
        let (state_tx, _) = watch::channel(RuntimeState::Stopped);
        Arc::new(Self {
            id: config.id,
            paths,
            config: RwLock::new(config),
            runtime: Mutex::new(Runtime::default()),
            state_tx,
            logs: Mutex::new(Vec::new()),
            properties: Mutex::new(None),
            services,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn paths(&self) -> &InstancePaths {
        &self.paths
    }

    pub async fn config(&self) -> ServerConfig {
        self.config.read().await.clone()
    }

    pub async fn apply_update(&self, update: ServerUpdate) {
        let mut config = self.config.write().await;
        config.name = update.name;
        config.version = update.version;
        config.min_memory = update.min_memory;
        config.soft_max_memory = update.soft_max_memory;
        config.max_memory = update.max_memory;
    }

    pub fn state(&self) -> RuntimeState {
        *self.state_tx.borrow()
    }

    /// Observes every state change of this instance.
    pub fn watch_state(&self) -> watch::Receiver<RuntimeState> {
        self.state_tx.subscribe()
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().await.clone()
    }

    /// Provisions and launches the worker.
    ///
    /// Returns once the process has been spawned; reaching `Running` is
    /// reported through state events. Failing to resolve the version or to
    /// provision the binary leaves the instance `Crashed` and is returned.
    /// A process that cannot be spawned also ends in `Crashed`, but only
    /// shows up in the log.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        self.begin_start().await?;
        self.log("Attempting to start server...").await;

        let launch = match self.provision().await {
            Ok(launch) => launch,
            Err(err) => {
                self.transition(RuntimeState::Crashed).await;
                self.error(err.to_string()).await;
                return Err(err);
            }
        };

        self.launch(launch).await;
        Ok(())
    }

    /// Sends the stop command. The state follows the worker's own output.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let process = self.running_process().await?;
        self.log("Attempting to stop server...").await;
        process.send_command(STOP_COMMAND).await
    }

    pub async fn execute(&self, command: &str) -> Result<(), ServerError> {
        let process = self.running_process().await?;
        self.log(command).await;
        process.send_command(command).await
    }

    /// Drains the instance at shutdown: waits until it is either idle or
    /// running, and stops it in the latter case.
    ///
    /// There is no timeout; a worker that never acknowledges the stop
    /// command keeps the instance in `Stopping`.
    pub async fn quit(&self) -> Result<(), ServerError> {
        let mut rx = self.watch_state();
        let state = match rx.wait_for(|s| s.can_start() || s.can_stop()).await {
            Ok(state) => *state,
            Err(_) => return Ok(()),
        };
        if state.can_start() {
            return Ok(());
        }

        let process = self.runtime.lock().await.process.clone();
        if let Some(process) = process {
            tracing::info!(server = %self.id, "stopping for shutdown");
            process.send_command(STOP_COMMAND).await?;
        }
        Ok(())
    }

    /// `None` when the worker has not written `server.properties` yet.
    pub async fn properties(&self) -> Result<Option<Vec<Property>>, ServerError> {
        let mut cache = self.properties.lock().await;
        if cache.is_none() {
            *cache = properties::load(&self.paths.properties_path).await?;
        }
        Ok(cache.as_deref().map(properties::pairs))
    }

    /// Updates values of keys already in the file. Unknown keys are dropped.
    pub async fn set_properties(
        &self,
        updates: &[Property],
    ) -> Result<Option<Vec<Property>>, ServerError> {
        let mut cache = self.properties.lock().await;
        if cache.is_none() {
            *cache = properties::load(&self.paths.properties_path).await?;
        }
        let Some(lines) = cache.as_deref() else {
            return Ok(None);
        };

        let updates: HashMap<String, String> = updates
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect();
        let updated = properties::apply(lines, &updates);
        properties::store(&self.paths.properties_path, &updated).await?;

        let pairs = properties::pairs(&updated);
        *cache = Some(updated);
        Ok(Some(pairs))
    }

    pub async fn log<S: AsRef<str>>(&self, message: S) {
        self.synthesize(LogLevel::Info, message).await;
    }

    pub async fn warn<S: AsRef<str>>(&self, message: S) {
        self.synthesize(LogLevel::Warn, message).await;
    }

    pub async fn error<S: AsRef<str>>(&self, message: S) {
        self.synthesize(LogLevel::Error, message).await;
    }

    async fn synthesize<S: AsRef<str>>(&self, level: LogLevel, message: S) {
        self.append(LogEntry::synthesized(level, message, Local::now()))
            .await;
    }

    /// Publication happens under the log lock so observers see entries in
    /// append order.
    async fn append(&self, entry: LogEntry) {
        let mut logs = self.logs.lock().await;
        logs.push(entry.clone());
        self.services
            .bus
            .publish(InstanceEvent::log_appended(self.id, entry));
    }

    fn set_state(&self, runtime: &mut Runtime, new: RuntimeState) {
        let old = runtime.state;
        runtime.state = new;
        self.state_tx.send_replace(new);
        tracing::info!(server = %self.id, %old, %new, "state changed");
        self.services
            .bus
            .publish(InstanceEvent::status_changed(self.id, old, new));
    }

    async fn transition(&self, new: RuntimeState) {
        let mut runtime = self.runtime.lock().await;
        self.set_state(&mut runtime, new);
    }

    async fn begin_start(&self) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        if !runtime.state.can_start() {
            let err = ServerError::IllegalStateTransition {
                state: runtime.state,
            };
            drop(runtime);
            self.error(err.to_string()).await;
            return Err(err);
        }
        self.set_state(&mut runtime, RuntimeState::Starting);
        Ok(())
    }

    async fn running_process(&self) -> Result<ProcessHandle, ServerError> {
        let runtime = self.runtime.lock().await;
        let err = match (&runtime.process, runtime.state.can_stop()) {
            (Some(process), true) => return Ok(process.clone()),
            (None, true) => ServerError::NoStdinPipe,
            (_, false) => ServerError::IllegalStateTransition {
                state: runtime.state,
            },
        };
        drop(runtime);
        self.error(err.to_string()).await;
        Err(err)
    }

    /// Resolves the version and makes sure the working directory and the
    /// server binary exist.
    async fn provision(&self) -> Result<WorkerLaunch, ServerError> {
        let catalog = &self.services.catalog;

        let mut version = self.config.read().await.version.clone();
        if version.is_empty() {
            version = catalog.latest_release().await?;
            self.config.write().await.version = version.clone();
        }
        let descriptor = catalog
            .find(&version)
            .await?
            .ok_or_else(|| ServerError::VersionNotFound(version.clone()))?;

        let root = &self.paths.root_dir;
        if !fs::try_exists(root).await.unwrap_or(false) {
            self.warn("Creating server directory...").await;
            fs::create_dir_all(root).await.map_err(|e| {
                ServerError::Provisioning(format!("cannot create {}: {e}", root.display()))
            })?;
        }

        let jar = &self.paths.jar_path;
        if !fs::try_exists(jar).await.unwrap_or(false) {
            self.warn("Downloading server jar...").await;
            let metadata = catalog
                .metadata(&descriptor)
                .await
                .map_err(|e| ServerError::Provisioning(e.to_string()))?;
            let download = metadata.server_download().ok_or_else(|| {
                ServerError::Provisioning(format!("version {version} has no server download"))
            })?;

            tracing::info!(server = %self.id, %version, url = %download.url, "downloading server jar");
            self.services
                .downloader
                .download(&download.url, jar)
                .await
                .map_err(|e| ServerError::Provisioning(e.to_string()))?;
            verify_sha1(jar, &download.sha1).await?;
        }

        let config = self.config.read().await;
        let settings = &self.services.settings;
        Ok(WorkerLaunch {
            program: settings.java.clone(),
            extra_args: settings.java_args.clone(),
            root_dir: root.clone(),
            min_memory: config.min_memory,
            soft_max_memory: config.soft_max_memory,
            max_memory: config.max_memory,
        })
    }

    async fn launch(self: &Arc<Self>, launch: WorkerLaunch) {
        self.log("Starting child process...").await;

        let SpawnedWorker {
            handle,
            output,
            exit,
        } = match launch.spawn() {
            Ok(worker) => worker,
            Err(err) => {
                tracing::warn!(server = %self.id, error = %err, "worker failed to spawn");
                self.error(err.to_string()).await;
                self.transition(RuntimeState::Crashed).await;
                return;
            }
        };

        self.runtime.lock().await.process = Some(handle);

        let server = Arc::clone(self);
        tokio::spawn(async move { server.supervise(output, exit).await });
    }

    /// Runs for the lifetime of one worker process: every output chunk goes
    /// through the classifier in arrival order, then the exit is recorded.
    async fn supervise(
        self: Arc<Self>,
        mut output: mpsc::Receiver<OutputChunk>,
        exit: JoinHandle<ExitOutcome>,
    ) {
        let mut classifier = LogClassifier::new();
        while let Some(chunk) = output.recv().await {
            for line in classifier.push(chunk.source, &chunk.bytes) {
                self.handle_line(line).await;
            }
        }
        for line in classifier.finish() {
            self.handle_line(line).await;
        }

        let outcome = exit
            .await
            .unwrap_or_else(|e| ExitOutcome::WaitFailed(e.to_string()));
        self.on_exit(outcome).await;
    }

    async fn handle_line(self: &Arc<Self>, line: ClassifiedLine) {
        self.append(line.entry).await;

        let Some(marker) = line.marker else {
            return;
        };
        let moved = {
            let mut runtime = self.runtime.lock().await;
            match marker.transition(runtime.state) {
                Some(new) => {
                    self.set_state(&mut runtime, new);
                    true
                }
                None => false,
            }
        };
        if !moved {
            tracing::debug!(server = %self.id, ?marker, "marker ignored in current state");
            return;
        }

        match marker {
            Marker::StartupComplete => self.log("Server is running...").await,
            Marker::Stopping => self.log("Server is stopping...").await,
            Marker::LicenseRequired => {
                self.warn("Server was unable to start, the user must accept the EULA...")
                    .await;
                self.spawn_license_flow();
            }
        }
    }

    /// Prompts for the EULA and, once accepted, flips the flag and starts the
    /// instance again as soon as the refusing worker has exited. One prompt
    /// yields at most one retry.
    fn spawn_license_flow(self: &Arc<Self>) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            if !server.services.confirm.confirm(EULA_TITLE, EULA_QUESTION).await {
                tracing::info!(server = %server.id, "EULA declined");
                server.warn("The EULA was not accepted.").await;
                return;
            }

            if let Err(err) = properties::accept_eula(&server.paths.eula_path).await {
                server.error(err.to_string()).await;
                return;
            }

            let mut rx = server.watch_state();
            if rx.wait_for(|s| s.can_start()).await.is_err() {
                return;
            }
            if let Err(err) = Arc::clone(&server).restart().await {
                tracing::warn!(server = %server.id, error = %err, "restart after EULA failed");
            }
        });
    }

    // Boxed: `start` transitively spawns the task that calls this.
    fn restart(self: Arc<Self>) -> Pin<Box<dyn Future<Output = Result<(), ServerError>> + Send>> {
        Box::pin(async move { self.start().await })
    }

    async fn on_exit(&self, outcome: ExitOutcome) {
        {
            let mut runtime = self.runtime.lock().await;
            runtime.process = None;
            let new = if outcome.is_success() {
                RuntimeState::Stopped
            } else {
                RuntimeState::Crashed
            };
            self.set_state(&mut runtime, new);
        }

        match outcome {
            ExitOutcome::Code(0) => self.log("Server stopped").await,
            ExitOutcome::Code(code) => self.error(format!("Server exited with code: {code}")).await,
            ExitOutcome::Signal(signal) => {
                self.error(format!("Server exited with signal: {signal}"))
                    .await
            }
            ExitOutcome::WaitFailed(reason) => {
                self.error(format!("Lost track of server process: {reason}"))
                    .await
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn force_state(&self, state: RuntimeState) {
        self.transition(state).await;
    }
}

async fn verify_sha1(path: &std::path::Path, expected: &str) -> Result<(), ServerError> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| ServerError::Provisioning(format!("cannot read {}: {e}", path.display())))?;
    let actual = hex::encode(Sha1::digest(&bytes));
    if actual.eq_ignore_ascii_case(expected) {
        return Ok(());
    }

    _ = fs::remove_file(path).await;
    Err(ServerError::Provisioning(format!(
        "checksum mismatch for {}: expected {expected}, got {actual}",
        path.display()
    )))
}
