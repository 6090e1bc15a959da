//! Command-line arguments and `bridge.toml` loading.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use lulu_bridge::{BridgeConfig, LaunchMode};

/// Headless host for the lulu-lsp bridge.
///
/// Reads NDJSON editor events on stdin and writes diagnostics as NDJSON on
/// stdout. Logs go to stderr and honor `RUST_LOG`.
#[derive(Debug, Parser)]
#[command(name = "lulu-bridge")]
#[command(version)]
pub struct Args {
    /// Bridge config file (default: ~/.lulu/bridge.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Launch the engine with its debug invocation
    #[arg(long)]
    pub debug: bool,

    /// Workspace root (default: the current directory)
    pub workspace: Option<PathBuf>,
}

impl Args {
    pub fn launch_mode(&self) -> LaunchMode {
        if self.debug {
            LaunchMode::Debug
        } else {
            LaunchMode::Run
        }
    }
}

/// `~/.lulu/bridge.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lulu").join("bridge.toml"))
}

/// Read the bridge config. A missing file yields defaults; a malformed one
/// is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<BridgeConfig> {
    let Some(path) = explicit.map(Path::to_path_buf).or_else(default_config_path) else {
        return Ok(BridgeConfig::default());
    };

    if !path.exists() {
        if explicit.is_some() {
            bail!("config file {} does not exist", path.display());
        }
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(BridgeConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Directory holding the running executable, used as the install root.
pub fn install_root() -> Result<PathBuf> {
    let exe = env::current_exe().context("locating the running executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable has no parent directory")
}
