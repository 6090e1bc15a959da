//! Process creation seam.
//!
//! The session never touches `tokio::process` directly; it asks a
//! [`Spawner`] for a [`SpawnedEngine`]. [`ProcessSpawner`] is the real
//! implementation; tests plug in in-memory engines.

use std::path::Path;
use std::process::Stdio;

use futures_util::future::BoxFuture;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::launch::Executable;
use crate::locator;

pub type EngineReader = Box<dyn AsyncRead + Send + Unpin>;
pub type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handle on a running engine process.
pub trait EngineProcess: Send {
    /// OS process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit on its own.
    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<()>>;

    /// Kill the process and reap it.
    fn kill(&mut self) -> BoxFuture<'_, std::io::Result<()>>;
}

/// A started engine: its stdio pipes plus the process handle.
pub struct SpawnedEngine {
    pub stdin: EngineWriter,
    pub stdout: EngineReader,
    pub process: Box<dyn EngineProcess>,
}

pub trait Spawner: Send + Sync {
    fn spawn(&self, exe: &Executable, workspace_root: &Path) -> Result<SpawnedEngine, BridgeError>;
}

/// Spawns the engine as an OS child process.
pub struct ProcessSpawner {
    env_denylist: GlobSet,
}

impl ProcessSpawner {
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let mut builder = GlobSetBuilder::new();
        for pat in &config.env_denylist {
            let glob = GlobBuilder::new(pat)
                .case_insensitive(true)
                .build()
                .map_err(|e| BridgeError::Config(format!("invalid env denylist pattern '{pat}': {e}")))?;
            builder.add(glob);
        }
        let env_denylist = builder
            .build()
            .map_err(|e| BridgeError::Config(format!("invalid env denylist: {e}")))?;
        Ok(Self { env_denylist })
    }

    fn is_denied(&self, key: &str) -> bool {
        self.env_denylist.is_match(key)
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self, exe: &Executable, workspace_root: &Path) -> Result<SpawnedEngine, BridgeError> {
        locator::validate_executable(exe.command())?;

        let mut cmd = Command::new(exe.command());
        cmd.args(exe.args())
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, _) in std::env::vars_os() {
            if let Some(name) = key.to_str()
                && self.is_denied(name)
            {
                cmd.env_remove(&key);
            }
        }

        let spawn_err = |source| BridgeError::Spawn {
            command: exe.command().to_path_buf(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_err)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(spawn_err(std::io::Error::other("engine stdio was not piped")));
        };

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "lulu_bridge::engine", pid, "{line}");
                }
            });
        }

        tracing::debug!(engine = %exe.command().display(), pid = child.id(), "Engine process spawned");

        Ok(SpawnedEngine {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            process: Box::new(ChildProcess(child)),
        })
    }
}

struct ChildProcess(Child);

impl EngineProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.0.id()
    }

    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move { self.0.wait().await.map(|_| ()) })
    }

    fn kill(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(self.0.kill())
    }
}
