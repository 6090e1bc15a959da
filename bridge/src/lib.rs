//! Editor-side bridge to the `lulu-lsp` analysis engine.
//!
//! The host activates a [`Bridge`] with a [`HostContext`]; the bridge
//! locates and spawns the engine, speaks LSP to it over stdio, forwards
//! local Lua documents and `.clientrc` changes, and shuts it down again on
//! deactivation.

pub mod codec;
pub mod config;
pub mod error;
pub mod launch;
pub mod locator;
pub mod manifest;
pub mod spawn;
pub mod types;

pub(crate) mod client;
pub(crate) mod diagnostics;
pub(crate) mod protocol;

mod session;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use launch::{LaunchDescriptor, LaunchMode};
pub use manifest::SubscriptionManifest;
pub use protocol::RequestId;
pub use session::{Bridge, HostContext, activate, deactivate};
pub use spawn::{EngineProcess, ProcessSpawner, SpawnedEngine, Spawner};
pub use types::{
    BridgeEvent, DiagnosticSeverity, DiagnosticsSnapshot, EngineDiagnostic, EngineStopReason,
    FileChangeKind, FileEvent, Forwarded, SessionState, TextDocument,
};
