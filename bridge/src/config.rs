//! Bridge settings supplied by the host.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Environment variables matching these globs never reach the engine.
pub const DEFAULT_ENV_DENYLIST: &[&str] = &[
    "*_KEY",
    "*_SECRET",
    "*_TOKEN",
    "*_PASSWORD",
    "*_CREDENTIAL*",
    "AWS_*",
];

const DEFAULT_INIT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Use this engine binary instead of the one next to the install root.
    pub engine_path: Option<PathBuf>,
    /// Extra arguments passed to the engine.
    pub engine_args: Vec<String>,
    /// Bound on the `initialize` round trip.
    pub init_timeout_secs: u64,
    /// Bound on each shutdown step (the `shutdown` request, then process exit).
    pub shutdown_timeout_secs: u64,
    pub env_denylist: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            engine_path: None,
            engine_args: Vec::new(),
            init_timeout_secs: DEFAULT_INIT_TIMEOUT_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            env_denylist: DEFAULT_ENV_DENYLIST.iter().map(ToString::to_string).collect(),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
