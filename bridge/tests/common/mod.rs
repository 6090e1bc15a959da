//! In-memory engine and host used by the integration suite.
//!
//! `FakeSpawner` hands the bridge a pair of duplex pipes whose other ends are
//! driven by a tokio task that speaks just enough LSP. Every frame the bridge
//! sends is recorded, and live "processes" are counted so tests can assert
//! nothing is left running.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use lulu_bridge::codec::{FrameReader, FrameWriter};
use lulu_bridge::launch::Executable;
use lulu_bridge::{
    BridgeConfig, BridgeError, EngineProcess, FileEvent, HostContext, SpawnedEngine, Spawner,
};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answers initialize and shutdown, exits on `exit`.
    Cooperative,
    /// Answers initialize with an error.
    RejectInitialize,
    /// Never answers shutdown and never exits on its own.
    Unresponsive,
    /// Exits right after `initialized`.
    CrashAfterInit,
    /// Publishes a burst of diagnostics after `initialized`, then exits.
    FloodThenExit,
    /// Sends many `window/showMessage` notifications after `initialized`.
    Chatty,
    /// Reads everything and answers nothing.
    Silent,
}

/// Frames `FloodThenExit` publishes before exiting.
pub const FLOOD_FRAMES: usize = 300;

/// Notifications `Chatty` sends.
pub const CHATTY_MESSAGES: usize = 100;

#[derive(Clone, Default)]
pub struct EngineLog {
    frames: Arc<Mutex<Vec<Value>>>,
}

impl EngineLog {
    fn push(&self, frame: Value) {
        self.frames.lock().unwrap().push(frame);
    }

    pub fn methods(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| f["method"].as_str().map(String::from))
            .collect()
    }

    pub fn with_method(&self, method: &str) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f["method"] == method)
            .cloned()
            .collect()
    }

    /// Poll until `method` has been received `count` times.
    pub async fn wait_for(&self, method: &str, count: usize) {
        for _ in 0..200 {
            if self.with_method(method).len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "engine never received {count} x {method}; got {:?}",
            self.methods()
        );
    }
}

pub struct FakeSpawner {
    behavior: Behavior,
    pub log: EngineLog,
    pub live: Arc<AtomicUsize>,
    pub spawned: Arc<AtomicUsize>,
    pub commands: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeSpawner {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            log: EngineLog::default(),
            live: Arc::new(AtomicUsize::new(0)),
            spawned: Arc::new(AtomicUsize::new(0)),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handles that stay valid after the spawner moves into a bridge.
    pub fn tracker(&self) -> Tracker {
        Tracker {
            log: self.log.clone(),
            live: self.live.clone(),
            spawned: self.spawned.clone(),
            commands: self.commands.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Tracker {
    pub log: EngineLog,
    live: Arc<AtomicUsize>,
    spawned: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<PathBuf>>>,
}

impl Tracker {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<PathBuf> {
        self.commands.lock().unwrap().clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, exe: &Executable, _workspace_root: &Path) -> Result<SpawnedEngine, BridgeError> {
        self.commands.lock().unwrap().push(exe.command().to_path_buf());
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);

        let (client_stdin, engine_stdin) = tokio::io::duplex(64 * 1024);
        let (engine_stdout, client_stdout) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = oneshot::channel();

        let task = tokio::spawn(run_engine(
            self.behavior,
            self.log.clone(),
            engine_stdin,
            engine_stdout,
            exit_tx,
        ));

        Ok(SpawnedEngine {
            stdin: Box::new(client_stdin),
            stdout: Box::new(client_stdout),
            process: Box::new(FakeProcess {
                task,
                exit_rx: Some(exit_rx),
                live: self.live.clone(),
                alive: true,
            }),
        })
    }
}

async fn run_engine(
    behavior: Behavior,
    log: EngineLog,
    stdin: tokio::io::DuplexStream,
    stdout: tokio::io::DuplexStream,
    exit_tx: oneshot::Sender<()>,
) {
    let mut reader = FrameReader::new(stdin);
    let mut writer = FrameWriter::new(stdout);

    let mut root_uri = String::new();

    while let Ok(Some(frame)) = reader.read_frame().await {
        log.push(frame.clone());
        if behavior == Behavior::Silent {
            continue;
        }
        if let Some(root) = frame["params"]["rootUri"].as_str() {
            root_uri = root.trim_end_matches('/').to_string();
        }
        let id = frame.get("id").cloned();
        let reply = match (frame["method"].as_str(), behavior) {
            (Some("initialize"), Behavior::RejectInitialize) => Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32603, "message": "engine refused to start" }
            })),
            (Some("initialize"), _) => Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "capabilities": { "textDocumentSync": 1 },
                    "serverInfo": { "name": "lulu-lsp", "version": "0.0.0" }
                }
            })),
            (Some("initialized"), Behavior::CrashAfterInit) => break,
            (Some("initialized"), Behavior::FloodThenExit) => {
                for n in 0..FLOOD_FRAMES {
                    let uri = format!("{root_uri}/flood_{n}.lua");
                    if writer.write_frame(&diagnostics_frame(&uri)).await.is_err() {
                        break;
                    }
                }
                break;
            }
            (Some("initialized"), Behavior::Chatty) => {
                for n in 0..CHATTY_MESSAGES {
                    let note = json!({
                        "jsonrpc": "2.0",
                        "method": "window/showMessage",
                        "params": { "type": 3, "message": format!("message {n}") }
                    });
                    if writer.write_frame(&note).await.is_err() {
                        break;
                    }
                }
                None
            }
            (Some("textDocument/didOpen"), _) => frame["params"]["textDocument"]["uri"]
                .as_str()
                .map(diagnostics_frame),
            (Some("shutdown"), Behavior::Unresponsive) => None,
            (Some("shutdown"), _) => Some(json!({ "jsonrpc": "2.0", "id": id, "result": null })),
            (Some("exit"), Behavior::Unresponsive) => None,
            (Some("exit"), _) => break,
            _ => None,
        };
        if let Some(reply) = reply
            && writer.write_frame(&reply).await.is_err()
        {
            break;
        }
    }

    if behavior == Behavior::Unresponsive {
        std::future::pending::<()>().await;
    }
    let _ = exit_tx.send(());
}

fn diagnostics_frame(uri: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": {
            "uri": uri,
            "diagnostics": [{
                "range": {
                    "start": { "line": 0, "character": 0 },
                    "end": { "line": 0, "character": 3 }
                },
                "severity": 1,
                "source": "emmylua",
                "message": "undefined global `foo`"
            }]
        }
    })
}

struct FakeProcess {
    task: JoinHandle<()>,
    exit_rx: Option<oneshot::Receiver<()>>,
    live: Arc<AtomicUsize>,
    alive: bool,
}

impl FakeProcess {
    fn mark_dead(&mut self) {
        if self.alive {
            self.alive = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl EngineProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            if let Some(rx) = self.exit_rx.as_mut() {
                let _ = rx.await;
            }
            self.exit_rx = None;
            self.mark_dead();
            Ok(())
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.task.abort();
            self.mark_dead();
            Ok(())
        })
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.task.abort();
        self.mark_dead();
    }
}

pub struct TestHost {
    install_root: PathBuf,
    workspace: tempfile::TempDir,
    watchers: Mutex<Vec<(String, mpsc::Sender<FileEvent>)>>,
}

impl TestHost {
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            workspace: tempfile::tempdir().unwrap(),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    pub fn watcher_globs(&self) -> Vec<String> {
        self.watchers
            .lock()
            .unwrap()
            .iter()
            .map(|(glob, _)| glob.clone())
            .collect()
    }

    /// Deliver `event` to every registered watcher.
    pub async fn emit(&self, event: FileEvent) {
        let senders: Vec<_> = self
            .watchers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(event.clone()).await;
        }
    }
}

impl HostContext for TestHost {
    fn install_root(&self) -> PathBuf {
        self.install_root.clone()
    }

    fn workspace_root(&self) -> PathBuf {
        self.workspace.path().to_path_buf()
    }

    fn create_file_watcher(&self, glob: &str) -> mpsc::Receiver<FileEvent> {
        let (tx, rx) = mpsc::channel(16);
        self.watchers.lock().unwrap().push((glob.to_string(), tx));
        rx
    }
}

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        init_timeout_secs: 2,
        shutdown_timeout_secs: 1,
        ..BridgeConfig::default()
    }
}

pub fn lua_uri(host: &TestHost, name: &str) -> url::Url {
    url::Url::from_file_path(host.workspace().join(name)).unwrap()
}
