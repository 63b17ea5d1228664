use std::{env, path::PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instance::InstancePaths;

pub mod stream;

pub const DEFAULT_NAME: &str = "New Server";
pub const DEFAULT_MIN_MEMORY: u32 = 512;
pub const DEFAULT_SOFT_MAX_MEMORY: u32 = 1024;
pub const DEFAULT_MAX_MEMORY: u32 = 2048;
pub const DEFAULT_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const REGISTRY_FILE: &str = "server.json";

/// Persisted description of one managed instance. Memory bounds are in MiB;
/// `min <= soft <= max` is expected but left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: Uuid,
    pub name: String,
    /// Empty means "latest release at start time".
    pub version: String,
    pub min_memory: u32,
    pub soft_max_memory: u32,
    pub max_memory: u32,
}

/// Process-wide knobs for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Holds one working directory per instance plus the registry file.
    pub data_root: PathBuf,
    pub java: PathBuf,
    pub java_args: Vec<String>,
    pub manifest_url: String,
}

impl ServerConfig {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: DEFAULT_NAME.to_string(),
            version: version.into(),
            min_memory: DEFAULT_MIN_MEMORY,
            soft_max_memory: DEFAULT_SOFT_MAX_MEMORY,
            max_memory: DEFAULT_MAX_MEMORY,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./servers"),
            java: PathBuf::from("java"),
            java_args: Vec::new(),
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
        }
    }
}

impl Settings {
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `MSM_DATA_ROOT`, `MSM_JAVA`, `MSM_JAVA_ARGS`
    /// and `MSM_MANIFEST_URL`. Blank variables are ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut settings = Self::default();
        if let Some(root) = var("MSM_DATA_ROOT") {
            settings.data_root = PathBuf::from(root);
        }
        if let Some(java) = var("MSM_JAVA") {
            settings.java = PathBuf::from(java);
        }
        if let Some(args) = var("MSM_JAVA_ARGS") {
            settings.java_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(url) = var("MSM_MANIFEST_URL") {
            settings.manifest_url = url;
        }
        settings
    }

    pub fn registry_file(&self) -> PathBuf {
        self.data_root.join(REGISTRY_FILE)
    }

    pub fn instance_paths(&self, id: Uuid) -> InstancePaths {
        InstancePaths::new(self.data_root.join(id.to_string()))
    }
}
