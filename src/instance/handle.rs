use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter},
    process::{self, Child, ChildStdin},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;

use super::types::{JAR_FILE, StreamSource};

const CHUNK_SIZE: usize = 8 * 1024;

/// Everything needed to launch one worker process for an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    /// Launcher arguments placed before the memory flags.
    pub extra_args: Vec<String>,
    pub root_dir: PathBuf,
    pub min_memory: u32,
    pub soft_max_memory: u32,
    pub max_memory: u32,
}

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    Signal(i32),
    WaitFailed(String),
}

/// Write side of a live worker. Cheap to clone; the process itself is
/// owned by the exit watcher task.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    stdin_tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

/// Raw bytes read from one pipe. Chunk boundaries are arbitrary, so lines
/// must be reassembled per source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub source: StreamSource,
    pub bytes: Vec<u8>,
}

/// A freshly spawned worker: its handle, the merged stdout/stderr chunk
/// stream, and the task that resolves when the process exits.
#[derive(Debug)]
pub struct SpawnedWorker {
    pub handle: ProcessHandle,
    pub output: mpsc::Receiver<OutputChunk>,
    pub exit: JoinHandle<ExitOutcome>,
}

impl WorkerLaunch {
    pub fn args(&self) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push(format!("-Xms{}M", self.min_memory));
        args.push(format!("-XX:SoftMaxHeapSize={}M", self.soft_max_memory));
        args.push(format!("-Xmx{}M", self.max_memory));
        args.push("-jar".to_string());
        args.push(JAR_FILE.to_string());
        args.push("--nogui".to_string());
        args
    }

    fn build_command(&self) -> process::Command {
        let mut command = process::Command::new(&self.program);
        command
            .args(self.args())
            .current_dir(&self.root_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped());

        // Keep terminal signals aimed at the supervisor away from the worker;
        // workers are only ever stopped through their stdin.
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    /// Spawns the worker and wires up its pumps. Must be called from within
    /// a tokio runtime.
    pub fn spawn(&self) -> Result<SpawnedWorker, ServerError> {
        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| ServerError::ProcessSpawn(e.to_string()))?;

        let pipes = (child.stdout.take(), child.stderr.take(), child.stdin.take());
        let (stdout, stderr, stdin) = match pipes {
            (Some(stdout), Some(stderr), Some(stdin)) => (stdout, stderr, stdin),
            (None, _, _) => return Err(abandon(child, ServerError::NoStdoutPipe)),
            (_, None, _) => return Err(abandon(child, ServerError::NoStderrPipe)),
            (_, _, None) => return Err(abandon(child, ServerError::NoStdinPipe)),
        };

        let pid = child.id();
        let shutdown = CancellationToken::new();

        let (output_tx, output_rx) = mpsc::channel(1024);
        setup_output_pump(stdout, StreamSource::Stdout, output_tx.clone());
        setup_output_pump(stderr, StreamSource::Stderr, output_tx);

        let (stdin_tx, stdin_rx) = mpsc::channel(1024);
        setup_stdin_writer(stdin, stdin_rx, shutdown.clone());

        let exit = setup_exit_watcher(child, shutdown.clone());

        tracing::debug!(?pid, program = %self.program.display(), "worker spawned");

        Ok(SpawnedWorker {
            handle: ProcessHandle {
                pid,
                stdin_tx,
                shutdown,
            },
            output: output_rx,
            exit,
        })
    }
}

impl ProcessHandle {
    pub async fn send_command<S: Into<String>>(&self, cmd: S) -> Result<(), ServerError> {
        let mut command = cmd.into();
        if !command.ends_with('\n') {
            command.push('\n');
        }

        self.stdin_tx
            .send(command)
            .await
            .map_err(|_| ServerError::StdinWriteFailed)?;

        Ok(())
    }

    pub fn has_exited(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        *self == ExitOutcome::Code(0)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signal(signal);
            }
        }

        ExitOutcome::WaitFailed(status.to_string())
    }
}

fn abandon(mut child: Child, err: ServerError) -> ServerError {
    _ = child.start_kill();
    err
}

fn setup_output_pump<R>(mut reader: R, source: StreamSource, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = OutputChunk {
                        source,
                        bytes: buf[..n].to_vec(),
                    };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(?source, error = %e, "worker output pipe closed");
                    break;
                }
            }
        }
    });
}

fn setup_stdin_writer(
    stdin: ChildStdin,
    mut stdin_rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut writer = BufWriter::new(stdin);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                maybe_cmd = stdin_rx.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        break;
                    };
                    if writer.write_all(cmd.as_bytes()).await.is_err()
                        || writer.flush().await.is_err()
                    {
                        tracing::warn!("failed to write command to worker stdin");
                        break;
                    }
                }
            }
        }
    });
}

fn setup_exit_watcher(mut child: Child, shutdown: CancellationToken) -> JoinHandle<ExitOutcome> {
    tokio::spawn(async move {
        let outcome = match child.wait().await {
            Ok(status) => ExitOutcome::from(status),
            Err(e) => ExitOutcome::WaitFailed(e.to_string()),
        };
        shutdown.cancel();
        outcome
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch() -> WorkerLaunch {
        WorkerLaunch {
            program: PathBuf::from("java"),
            extra_args: vec!["-XX:+UseG1GC".to_string()],
            root_dir: PathBuf::from("/srv/x"),
            min_memory: 512,
            soft_max_memory: 1024,
            max_memory: 2048,
        }
    }

    #[test]
    fn memory_flags_follow_launcher_args() {
        assert_eq!(
            launch().args(),
            vec![
                "-XX:+UseG1GC",
                "-Xms512M",
                "-XX:SoftMaxHeapSize=1024M",
                "-Xmx2048M",
                "-jar",
                "server.jar",
                "--nogui",
            ]
        );
    }

    #[test]
    fn only_code_zero_is_success() {
        assert!(ExitOutcome::Code(0).is_success());
        assert!(!ExitOutcome::Code(1).is_success());
        assert!(!ExitOutcome::Signal(9).is_success());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let mut launch = launch();
        launch.program = PathBuf::from("/definitely/not/a/launcher");
        launch.root_dir = std::env::temp_dir();
        let err = launch.spawn().unwrap_err();
        assert!(matches!(err, ServerError::ProcessSpawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_pumped_and_exit_code_reported() {
        let launch = WorkerLaunch {
            program: PathBuf::from("sh"),
            extra_args: vec!["-c".to_string(), "read cmd; echo \"got $cmd\"; exit 3".to_string()],
            root_dir: std::env::temp_dir(),
            min_memory: 1,
            soft_max_memory: 1,
            max_memory: 1,
        };
        let mut worker = launch.spawn().unwrap();
        worker.handle.send_command("hello").await.unwrap();

        let mut out = Vec::new();
        while let Some(chunk) = worker.output.recv().await {
            assert_eq!(chunk.source, StreamSource::Stdout);
            out.extend(chunk.bytes);
        }
        assert_eq!(String::from_utf8_lossy(&out), "got hello\n");
        assert_eq!(worker.exit.await.unwrap(), ExitOutcome::Code(3));
        assert!(worker.handle.has_exited());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chunks_carry_their_pipe() {
        let launch = WorkerLaunch {
            program: PathBuf::from("sh"),
            extra_args: vec!["-c".to_string(), "echo out; echo err >&2; exit 0".to_string()],
            root_dir: std::env::temp_dir(),
            min_memory: 1,
            soft_max_memory: 1,
            max_memory: 1,
        };
        let mut worker = launch.spawn().unwrap();

        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        while let Some(chunk) = worker.output.recv().await {
            match chunk.source {
                StreamSource::Stdout => stdout.extend(chunk.bytes),
                StreamSource::Stderr => stderr.extend(chunk.bytes),
            }
        }
        assert_eq!(stdout, b"out\n");
        assert_eq!(stderr, b"err\n");
        assert_eq!(worker.exit.await.unwrap(), ExitOutcome::Code(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn killed_worker_reports_its_signal() {
        let launch = WorkerLaunch {
            program: PathBuf::from("sh"),
            extra_args: vec!["-c".to_string(), "kill -9 $$".to_string()],
            root_dir: std::env::temp_dir(),
            min_memory: 1,
            soft_max_memory: 1,
            max_memory: 1,
        };
        let worker = launch.spawn().unwrap();
        assert_eq!(worker.exit.await.unwrap(), ExitOutcome::Signal(9));
    }
}
