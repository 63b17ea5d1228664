#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use msm_core::{
    Confirm, EventPayload, InstanceEvent, LogEntry, RemoteError, RuntimeState, Server, Services,
    Settings,
    remote::{Downloader, Fetcher},
};
use serde_json::{Value, json};
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use tokio_stream::{Stream, StreamExt, wrappers::errors::BroadcastStreamRecvError};
use uuid::Uuid;

pub const JAR_BODY: &[u8] = b"PK fake server jar";
pub const MANIFEST_URL: &str = "https://example.invalid/version_manifest_v2.json";
pub const TIMEOUT: Duration = Duration::from_secs(15);

/// Behaves like a vanilla server that has already been through the EULA.
pub const RUNNING_SCRIPT: &str = r#"
echo "$@" > launch-args.txt
echo "[12:00:00] [ServerMain/INFO]: Environment: Environment[sessionHost=https://sessionserver.mojang.com]"
echo "[12:00:01] [Server thread/WARN]: Ambiguity between arguments [teleport, location] and [teleport, destination]"
echo "[12:00:02] [Server thread/INFO]: Done (1.234s)! For help, type \"help\""
while read -r line; do
  case "$line" in
    stop)
      echo "[12:00:05] [Server thread/INFO]: Stopping server"
      echo "[12:00:05] [Server thread/INFO]: Saving worlds"
      exit 0 ;;
    crash)
      echo "[12:00:05] [Server thread/ERROR]: Encountered an unexpected exception"
      exit 1 ;;
    kill)
      kill -9 $$ ;;
    *)
      echo "[12:00:03] [Server thread/INFO]: Unknown or incomplete command: $line" ;;
  esac
done
"#;

/// Writes half of its startup line, a stderr warning, then the other half.
pub const INTERLEAVED_SCRIPT: &str = r#"
printf '[12:00:02] [Server thread/INFO]: Done (0.8s)'
sleep 0.3
echo 'JVM warning on stderr' >&2
sleep 0.3
echo '! For help, type "help"'
while read -r line; do
  if [ "$line" = "stop" ]; then
    echo "[12:00:05] [Server thread/INFO]: Stopping server"
    exit 0
  fi
done
"#;

/// Refuses to run until `eula.txt` says `eula=true`, like a fresh vanilla jar.
pub const EULA_SCRIPT: &str = r#"
if ! grep -q "eula=true" eula.txt 2>/dev/null; then
  printf '#By changing the setting below to TRUE you are indicating your agreement to our EULA.\neula=false\n' > eula.txt
  echo "[12:00:00] [ServerMain/WARN]: Failed to load eula.txt"
  echo "[12:00:00] [ServerMain/INFO]: You need to agree to the EULA in order to run the server. Go to eula.txt for more info."
  exit 0
fi
echo "[12:00:02] [Server thread/INFO]: Done (0.5s)! For help, type \"help\""
while read -r line; do
  if [ "$line" = "stop" ]; then
    echo "[12:00:05] [Server thread/INFO]: Stopping server"
    exit 0
  fi
done
"#;

pub struct ManifestFetcher;

#[async_trait]
impl Fetcher for ManifestFetcher {
    async fn fetch_json(&self, url: &str) -> Result<Value, RemoteError> {
        if url == MANIFEST_URL {
            return Ok(json!({
                "latest": { "release": "1.20", "snapshot": "23w18a" },
                "versions": [
                    {
                        "id": "1.20",
                        "type": "release",
                        "url": "https://example.invalid/v1/1.20.json",
                        "time": "2023-06-07T09:35:22+00:00",
                        "releaseTime": "2023-06-02T08:36:17+00:00",
                        "sha1": "1111",
                        "complianceLevel": 1
                    },
                    {
                        "id": "23w18a",
                        "type": "snapshot",
                        "url": "https://example.invalid/v1/23w18a.json",
                        "time": "2023-05-03T11:00:00+00:00",
                        "releaseTime": "2023-05-03T10:00:00+00:00"
                    }
                ]
            }));
        }
        if let Some(id) = url
            .strip_prefix("https://example.invalid/v1/")
            .and_then(|rest| rest.strip_suffix(".json"))
        {
            return Ok(json!({
                "id": id,
                "downloads": {
                    "server": {
                        "sha1": hex::encode(Sha1::digest(JAR_BODY)),
                        "size": JAR_BODY.len(),
                        "url": format!("https://example.invalid/jar/{id}")
                    }
                }
            }));
        }
        Err(RemoteError::Status {
            status: 404,
            url: url.to_string(),
        })
    }
}

#[derive(Default)]
pub struct FakeDownloader {
    pub calls: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), dest.to_path_buf()));
        tokio::fs::write(dest, JAR_BODY)
            .await
            .map_err(|e| RemoteError::Io(e.to_string()))
    }
}

impl FakeDownloader {
    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
    }
}

pub struct CountingConfirm {
    pub answer: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Confirm for CountingConfirm {
    async fn confirm(&self, _title: &str, _message: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

impl CountingConfirm {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub services: Services,
    pub downloader: Arc<FakeDownloader>,
    pub confirm: Arc<CountingConfirm>,
}

/// Services whose launcher is `sh <script>`, so the memory flags end up as
/// the script's positional arguments.
pub fn harness(script: &str, accept_eula: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("fake-server.sh");
    std::fs::write(&script_path, script).unwrap();

    let settings = Settings {
        data_root: dir.path().join("servers"),
        java: PathBuf::from("sh"),
        java_args: vec![script_path.display().to_string()],
        manifest_url: MANIFEST_URL.to_string(),
    };
    let downloader = Arc::new(FakeDownloader::default());
    let confirm = Arc::new(CountingConfirm {
        answer: accept_eula,
        calls: AtomicUsize::new(0),
    });
    let services = Services::new(
        settings,
        Arc::new(ManifestFetcher),
        downloader.clone(),
        confirm.clone(),
    );

    Harness {
        dir,
        services,
        downloader,
        confirm,
    }
}

pub type Events = std::pin::Pin<
    Box<dyn Stream<Item = Result<InstanceEvent, BroadcastStreamRecvError>> + Send>,
>;

pub fn events_for(services: &Services, server: Uuid) -> Events {
    Box::pin(services.bus.subscribe_server(server))
}

/// Records every state the instance passes through until `target`.
pub async fn states_until(events: &mut Events, target: RuntimeState) -> Vec<RuntimeState> {
    let mut seen = Vec::new();
    let reached = tokio::time::timeout(TIMEOUT, async {
        while let Some(event) = events.next().await {
            let Ok(event) = event else { continue };
            if let EventPayload::StatusChanged { new, .. } = event.payload {
                seen.push(new);
                if new == target {
                    return true;
                }
            }
        }
        false
    })
    .await;
    assert!(matches!(reached, Ok(true)), "never reached {target}; saw {seen:?}");
    seen
}

/// Waits for a log entry containing `needle`.
pub async fn log_containing(events: &mut Events, needle: &str) -> LogEntry {
    tokio::time::timeout(TIMEOUT, async {
        while let Some(event) = events.next().await {
            let Ok(event) = event else { continue };
            if let EventPayload::LogAppended { entry } = event.payload {
                if entry.message.contains(needle) {
                    return entry;
                }
            }
        }
        panic!("event stream ended");
    })
    .await
    .unwrap_or_else(|_| panic!("no log entry containing {needle:?}"))
}

pub async fn wait_for_state(server: &Server, target: RuntimeState) {
    let mut rx = server.watch_state();
    tokio::time::timeout(TIMEOUT, rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("{} never reached {target}", server.id()))
        .unwrap();
}
