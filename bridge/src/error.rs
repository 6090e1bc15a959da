use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;

/// Everything that can go wrong between the host and the engine.
///
/// Startup failures (`Resolution`, `Spawn`, `Handshake`) always leave the
/// bridge uninitialized with no child process alive. `Shutdown` is reported
/// after local resources have already been released.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("engine executable {} is unusable: {reason}", path.display())]
    Resolution { path: PathBuf, reason: String },

    #[error("failed to spawn {}: {source}", command.display())]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine initialization failed: {0}")]
    Handshake(String),

    #[error("engine shutdown failed: {0}")]
    Shutdown(String),

    #[error("a session is already running")]
    AlreadyRunning,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<CodecError> for BridgeError {
    fn from(err: CodecError) -> Self {
        Self::Transport(err.to_string())
    }
}
