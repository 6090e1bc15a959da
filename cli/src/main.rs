//! `lulu-bridge` - headless host for the lulu-lsp bridge.
//!
//! # Protocol
//!
//! Each stdin line is one JSON command (`open`, `change`, `save`, `close`,
//! `file`). Each stdout line is one JSON event (`diagnostics`, `message`,
//! `stopped`). Logs go to stderr.
//!
//! ```text
//! main() -> activate() -> run() -> deactivate()
//!                           |
//!                           v
//!            stdin line | tick | Ctrl-C -> poll_events() -> stdout
//! ```

mod host;
mod settings;

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use lulu_bridge::{Bridge, activate, deactivate};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use host::{Command, OpenDocuments, Output, StdioHost, diagnostics_lines};
use settings::Args;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const EVENT_BUDGET: usize = 64;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout is reserved for NDJSON output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunResult {
    Eof,
    Interrupted,
    EngineStopped,
}

struct Emitter {
    out: Stdout,
}

impl Emitter {
    async fn line(&mut self, line: &str) -> Result<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn output(&mut self, output: &Output<'_>) -> Result<()> {
        let line = serde_json::to_string(output).context("serializing output")?;
        self.line(&line).await
    }

    /// Drain engine events; print diagnostics when any arrived or `force`.
    async fn drain(&mut self, bridge: &mut Bridge, force: bool) -> Result<()> {
        let received = bridge.poll_events(EVENT_BUDGET);

        for (level, text) in bridge.take_messages() {
            self.output(&Output::Message { level, text }).await?;
        }
        if received > 0 || force {
            let snapshot = bridge.snapshot();
            tracing::debug!(
                errors = snapshot.error_count(),
                warnings = snapshot.warning_count(),
                "Diagnostics updated"
            );
            for line in diagnostics_lines(&snapshot)? {
                self.line(&line).await?;
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = settings::load_config(args.config.as_deref())?;
    let workspace = match args.workspace.clone() {
        Some(path) => path,
        None => env::current_dir().context("reading current directory")?,
    };
    let workspace = std::fs::canonicalize(&workspace)
        .with_context(|| format!("workspace {} is not accessible", workspace.display()))?;

    let host = StdioHost::new(settings::install_root()?, workspace, args.launch_mode());
    let mut bridge = activate(&host, config)
        .await
        .context("activating the bridge")?;

    let mut emitter = Emitter {
        out: tokio::io::stdout(),
    };
    let run_result = run(&mut bridge, &host, &mut emitter).await;

    let stopped = deactivate(Some(bridge)).await;

    match run_result? {
        RunResult::Eof => tracing::info!("stdin closed"),
        RunResult::Interrupted => tracing::info!("Interrupted"),
        RunResult::EngineStopped => {
            stopped.context("deactivating the bridge")?;
            return Err(anyhow!("engine stopped unexpectedly"));
        }
    }
    stopped.context("deactivating the bridge")
}

async fn run(bridge: &mut Bridge, host: &StdioHost, emitter: &mut Emitter) -> Result<RunResult> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut docs = OpenDocuments::default();
    let mut ticks = tokio::time::interval(POLL_INTERVAL);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let after_command = tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    return Ok(RunResult::Eof);
                };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Ok(command) => {
                        if let Err(e) = docs.apply(bridge, host, command).await {
                            tracing::error!("Command failed: {e}");
                        }
                    }
                    Err(e) => tracing::warn!("{e:#}"),
                }
                true
            }
            _ = &mut ctrl_c => return Ok(RunResult::Interrupted),
            _ = ticks.tick() => false,
        };

        emitter.drain(bridge, after_command).await?;

        if !bridge.is_running() {
            emitter.output(&Output::Stopped).await?;
            return Ok(RunResult::EngineStopped);
        }
    }
}
