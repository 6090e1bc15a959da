//! How the engine gets invoked.

use std::path::{Path, PathBuf};

/// Channel the engine speaks LSP over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Framed JSON-RPC over the child's stdin/stdout.
    Stdio,
}

/// Which invocation variant the host asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaunchMode {
    #[default]
    Run,
    Debug,
}

/// One concrete way to start the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    command: PathBuf,
    args: Vec<String>,
    transport: TransportKind,
}

impl Executable {
    #[must_use]
    pub fn command(&self) -> &Path {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }
}

/// Immutable run/debug pair, rebuilt on every start.
///
/// Both variants currently carry the same command and transport; they are
/// kept separate so a debug build of the engine can diverge later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescriptor {
    run: Executable,
    debug: Executable,
}

impl LaunchDescriptor {
    #[must_use]
    pub fn stdio(command: PathBuf, args: Vec<String>) -> Self {
        let run = Executable {
            command,
            args,
            transport: TransportKind::Stdio,
        };
        Self {
            debug: run.clone(),
            run,
        }
    }

    #[must_use]
    pub fn select(&self, mode: LaunchMode) -> &Executable {
        match mode {
            LaunchMode::Run => &self.run,
            LaunchMode::Debug => &self.debug,
        }
    }
}
