use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

pub const JAR_FILE: &str = "server.jar";
pub const EULA_FILE: &str = "eula.txt";
pub const PROPERTIES_FILE: &str = "server.properties";

/// Files an instance owns inside its working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    pub root_dir: PathBuf,
    pub jar_path: PathBuf,
    pub eula_path: PathBuf,
    pub properties_path: PathBuf,
}

impl InstancePaths {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root_dir = root_dir.as_ref().to_path_buf();
        Self {
            jar_path: root_dir.join(JAR_FILE),
            eula_path: root_dir.join(EULA_FILE),
            properties_path: root_dir.join(PROPERTIES_FILE),
            root_dir,
        }
    }
}

/// Which worker pipe a chunk of output was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuntimeState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl RuntimeState {
    /// `start()` is only accepted from these states.
    pub fn can_start(self) -> bool {
        matches!(self, RuntimeState::Stopped | RuntimeState::Crashed)
    }

    /// `stop()` and `execute()` are only accepted while running.
    pub fn can_stop(self) -> bool {
        self == RuntimeState::Running
    }
}

impl Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RuntimeState::Stopped => write!(f, "STOPPED"),
            RuntimeState::Starting => write!(f, "STARTING"),
            RuntimeState::Running => write!(f, "RUNNING"),
            RuntimeState::Stopping => write!(f, "STOPPING"),
            RuntimeState::Crashed => write!(f, "CRASHED"),
        }
    }
}
