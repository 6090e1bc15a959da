//! Headless host: NDJSON editor events in, NDJSON diagnostics out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use lulu_bridge::{
    Bridge, DiagnosticsSnapshot, FileChangeKind, FileEvent, Forwarded, HostContext, LaunchMode,
    TextDocument,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

const WATCHER_CHANNEL_CAPACITY: usize = 64;

/// One line of stdin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    Open {
        uri: Url,
        language_id: String,
        text: String,
    },
    Change {
        uri: Url,
        language_id: String,
        text: String,
    },
    Save {
        uri: Url,
    },
    Close {
        uri: Url,
    },
    File {
        path: PathBuf,
        kind: FileChangeKind,
    },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).with_context(|| format!("invalid command: {line}"))
    }
}

/// One line of stdout.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Output<'a> {
    Diagnostics {
        path: &'a Path,
        items: Vec<OutputDiagnostic<'a>>,
    },
    Message {
        level: u8,
        text: String,
    },
    Stopped,
}

#[derive(Debug, Serialize)]
pub struct OutputDiagnostic<'a> {
    pub line: u32,
    pub col: u32,
    pub severity: &'static str,
    pub source: &'a str,
    pub message: &'a str,
}

/// Render every file in `snapshot` as one `diagnostics` line.
pub fn diagnostics_lines(snapshot: &DiagnosticsSnapshot) -> Result<Vec<String>> {
    snapshot
        .files()
        .iter()
        .map(|(path, items)| {
            let output = Output::Diagnostics {
                path,
                items: items
                    .iter()
                    .map(|d| OutputDiagnostic {
                        line: d.line(),
                        col: d.col(),
                        severity: d.severity().label(),
                        source: d.source(),
                        message: d.message(),
                    })
                    .collect(),
            };
            serde_json::to_string(&output).context("serializing diagnostics")
        })
        .collect()
}

pub struct StdioHost {
    install_root: PathBuf,
    workspace_root: PathBuf,
    launch_mode: LaunchMode,
    watchers: Mutex<Vec<mpsc::Sender<FileEvent>>>,
}

impl StdioHost {
    pub fn new(install_root: PathBuf, workspace_root: PathBuf, launch_mode: LaunchMode) -> Self {
        Self {
            install_root,
            workspace_root,
            launch_mode,
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Hand a file event to every watcher the bridge registered.
    pub async fn deliver(&self, event: FileEvent) {
        let senders: Vec<_> = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|tx| !tx.is_closed())
            .cloned()
            .collect();
        for tx in senders {
            if tx.send(event.clone()).await.is_err() {
                tracing::debug!("Watcher closed before event delivery");
            }
        }
    }

    fn prune_closed(&self) {
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| !tx.is_closed());
    }
}

impl HostContext for StdioHost {
    fn install_root(&self) -> PathBuf {
        self.install_root.clone()
    }

    fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone()
    }

    fn launch_mode(&self) -> LaunchMode {
        self.launch_mode
    }

    fn create_file_watcher(&self, glob: &str) -> mpsc::Receiver<FileEvent> {
        tracing::debug!(glob, "Registering file watcher");
        self.prune_closed();
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

/// Documents the editor has open, so `save`/`close` can name the language.
#[derive(Default)]
pub struct OpenDocuments {
    docs: HashMap<Url, TextDocument>,
}

impl OpenDocuments {
    /// Apply `command` to `bridge`.
    pub async fn apply(
        &mut self,
        bridge: &mut Bridge,
        host: &StdioHost,
        command: Command,
    ) -> Result<()> {
        match command {
            Command::Open {
                uri,
                language_id,
                text,
            } => {
                let doc = TextDocument::new(uri.clone(), language_id, text);
                let forwarded = bridge.did_open(&doc).await?;
                log_forwarded("open", &uri, forwarded);
                self.docs.insert(uri, doc);
            }
            Command::Change {
                uri,
                language_id,
                text,
            } => {
                let doc = TextDocument::new(uri.clone(), language_id, text);
                let forwarded = bridge.did_change(&doc).await?;
                log_forwarded("change", &uri, forwarded);
                self.docs.insert(uri, doc);
            }
            Command::Save { uri } => match self.docs.get(&uri) {
                Some(doc) => {
                    let forwarded = bridge.did_save(doc).await?;
                    log_forwarded("save", &uri, forwarded);
                }
                None => tracing::warn!(%uri, "Ignoring save of a document that is not open"),
            },
            Command::Close { uri } => match self.docs.remove(&uri) {
                Some(doc) => {
                    let forwarded = bridge.did_close(&doc).await?;
                    log_forwarded("close", &uri, forwarded);
                }
                None => tracing::warn!(%uri, "Ignoring close of a document that is not open"),
            },
            Command::File { path, kind } => host.deliver(FileEvent::new(path, kind)).await,
        }
        Ok(())
    }
}

fn log_forwarded(action: &str, uri: &Url, forwarded: Forwarded) {
    match forwarded {
        Forwarded::Sent => tracing::debug!(action, %uri, "Forwarded"),
        Forwarded::Filtered => tracing::debug!(action, %uri, "Not a local Lua document"),
        Forwarded::Inactive => tracing::warn!(action, %uri, "Engine is not running"),
    }
}
