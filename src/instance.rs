mod handle;
mod types;

pub use handle::{ExitOutcome, OutputChunk, ProcessHandle, SpawnedWorker, WorkerLaunch};
pub use types::{
    EULA_FILE, InstancePaths, JAR_FILE, PROPERTIES_FILE, RuntimeState, StreamSource,
};
