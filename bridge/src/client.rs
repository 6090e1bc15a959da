//! Transport client: owns the engine process and its LSP channel.
//!
//! A writer task serializes every outbound frame; a reader task routes
//! responses to waiting requests and turns engine notifications into
//! [`BridgeEvent`]s. Holding a `LanguageClient` means the `initialize`
//! handshake has completed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::BridgeError;
use crate::locator::normalize_path;
use crate::protocol::{self, MessageParams, Notification, PublishDiagnosticsParams, Request, RequestId};
use crate::spawn::{EngineProcess, EngineReader, EngineWriter, SpawnedEngine};
use crate::types::{BridgeEvent, EngineStopReason, FileEvent, TextDocument};

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<serde_json::Value>>>>;

enum WriterCommand {
    Send(serde_json::Value),
    Close,
}

enum IncomingFrame {
    Response {
        id: RequestId,
        body: serde_json::Value,
    },
    EngineRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame.get("method").and_then(|m| m.as_str()).map(String::from);
    let is_response = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_response) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: serde_json::from_value(id.clone()).ok()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::EngineRequest {
            id: id.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Cheap cloneable handle for fire-and-forget notifications.
#[derive(Clone)]
pub(crate) struct Notifier {
    writer_tx: mpsc::Sender<WriterCommand>,
}

impl Notifier {
    pub async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), BridgeError> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|e| BridgeError::Transport(format!("serializing {method}: {e}")))?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| BridgeError::Transport("writer channel closed".to_string()))
    }

    /// Tell the engine a watched file changed.
    pub async fn file_changed(&self, workspace_root: &Path, event: &FileEvent) -> Result<(), BridgeError> {
        let path = normalize_path(&workspace_root.join(&event.path));
        let uri = protocol::path_to_file_uri(&path)
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        self.notify(
            "workspace/didChangeWatchedFiles",
            Some(protocol::did_change_watched_files_params(uri.as_str(), event)),
        )
        .await
    }
}

pub(crate) struct ClientTimeouts {
    pub init: Duration,
    pub shutdown: Duration,
}

pub(crate) struct LanguageClient {
    notifier: Notifier,
    next_id: i64,
    pending: PendingMap,
    process: Box<dyn EngineProcess>,
    /// Open documents and their last sent version.
    documents: HashMap<String, i32>,
    engine_name: Option<String>,
    timeouts: ClientTimeouts,
    /// Set once by the reader when the engine's stdout ends.
    stopped_rx: watch::Receiver<Option<EngineStopReason>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl LanguageClient {
    /// Start the channel tasks and run the `initialize` handshake.
    ///
    /// On failure the engine is killed before returning.
    pub async fn connect(
        engine: SpawnedEngine,
        workspace_root: &Path,
        event_tx: mpsc::Sender<BridgeEvent>,
        timeouts: ClientTimeouts,
    ) -> Result<Self, BridgeError> {
        let SpawnedEngine {
            stdin,
            stdout,
            process,
        } = engine;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let (stopped_tx, stopped_rx) = watch::channel(None);
        let writer_handle = tokio::spawn(run_writer(stdin, writer_rx));
        let reader_handle = tokio::spawn(run_reader(
            stdout,
            pending.clone(),
            ReaderOutputs {
                event_tx,
                stopped_tx,
                writer_tx: writer_tx.clone(),
            },
            normalize_path(workspace_root),
        ));

        let mut client = Self {
            notifier: Notifier { writer_tx },
            next_id: 1,
            pending,
            process,
            documents: HashMap::new(),
            engine_name: None,
            timeouts,
            stopped_rx,
            reader_handle,
            writer_handle,
        };

        if let Err(e) = client.initialize(workspace_root).await {
            client.abandon().await;
            return Err(e);
        }

        Ok(client)
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Why the engine went away, once its stdout has ended.
    pub fn stop_reason(&self) -> Option<EngineStopReason> {
        self.stopped_rx.borrow().clone()
    }

    /// `serverInfo.name` from the initialize result, if the engine sent one.
    pub fn engine_name(&self) -> Option<&str> {
        self.engine_name.as_deref()
    }

    async fn initialize(&mut self, workspace_root: &Path) -> Result<(), BridgeError> {
        let root_uri = protocol::path_to_file_uri(workspace_root)
            .map_err(|e| BridgeError::Handshake(e.to_string()))?;

        let response = self
            .send_request(
                "initialize",
                Some(protocol::initialize_params(root_uri.as_str())),
                self.timeouts.init,
            )
            .await
            .map_err(|e| BridgeError::Handshake(e.to_string()))?;

        if let Some(error) = response.get("error") {
            return Err(BridgeError::Handshake(
                error["message"].as_str().unwrap_or("unknown error").to_string(),
            ));
        }

        self.engine_name = response
            .pointer("/result/serverInfo/name")
            .and_then(|v| v.as_str())
            .map(String::from);

        self.notifier
            .notify("initialized", Some(serde_json::json!({})))
            .await
            .map_err(|e| BridgeError::Handshake(e.to_string()))
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, BridgeError> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let frame = serde_json::to_value(Request::new(id.clone(), method, params))
            .map_err(|e| BridgeError::Transport(format!("serializing {method}: {e}")))?;
        if self
            .notifier
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(BridgeError::Transport("writer channel closed".to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(BridgeError::Transport(format!("engine closed before answering {method}")))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(BridgeError::Transport(format!(
                    "{method} timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    /// Full-text sync; reopening an already open document is sent as a change.
    pub async fn did_open(&mut self, doc: &TextDocument) -> Result<(), BridgeError> {
        self.sync_full_text(doc).await
    }

    /// A change for a document the engine has not seen is sent as `didOpen`.
    pub async fn did_change(&mut self, doc: &TextDocument) -> Result<(), BridgeError> {
        self.sync_full_text(doc).await
    }

    async fn sync_full_text(&mut self, doc: &TextDocument) -> Result<(), BridgeError> {
        let uri = doc.uri().as_str();
        let (method, params) = match self.documents.get_mut(uri) {
            Some(version) => {
                *version += 1;
                (
                    "textDocument/didChange",
                    protocol::did_change_params(uri, *version, doc.text()),
                )
            }
            None => {
                self.documents.insert(uri.to_string(), 1);
                (
                    "textDocument/didOpen",
                    protocol::did_open_params(uri, doc.language_id(), 1, doc.text()),
                )
            }
        };
        self.notifier.notify(method, Some(params)).await
    }

    pub async fn did_save(&mut self, doc: &TextDocument) -> Result<(), BridgeError> {
        let uri = doc.uri().as_str();
        if !self.documents.contains_key(uri) {
            return Ok(());
        }
        self.notifier
            .notify("textDocument/didSave", Some(protocol::did_save_params(uri)))
            .await
    }

    pub async fn did_close(&mut self, doc: &TextDocument) -> Result<(), BridgeError> {
        let uri = doc.uri().as_str();
        if self.documents.remove(uri).is_none() {
            return Ok(());
        }
        self.notifier
            .notify("textDocument/didClose", Some(protocol::did_close_params(uri)))
            .await
    }

    /// `shutdown` → `exit` → close stdin → wait, killing the engine if it
    /// lingers. Local resources are released whatever happens; the first
    /// failure is returned afterwards.
    pub async fn shutdown(mut self) -> Result<(), BridgeError> {
        let mut failure: Option<String> = None;

        match self.send_request("shutdown", None, self.timeouts.shutdown).await {
            Ok(response) => match response.get("error") {
                None => {
                    if let Err(e) = self.notifier.notify("exit", None).await {
                        failure = Some(e.to_string());
                    }
                }
                Some(error) => {
                    failure = Some(format!(
                        "engine rejected shutdown: {}",
                        error["message"].as_str().unwrap_or("unknown error")
                    ));
                }
            },
            Err(e) => failure = Some(e.to_string()),
        }

        let _ = self.notifier.writer_tx.send(WriterCommand::Close).await;

        match tokio::time::timeout(self.timeouts.shutdown, self.process.wait()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failure.get_or_insert_with(|| format!("waiting for engine: {e}"));
            }
            Err(_) => {
                tracing::debug!("Engine did not exit in time, killing");
                if let Err(e) = self.process.kill().await {
                    tracing::warn!("Failed to kill engine: {e}");
                }
                failure.get_or_insert_with(|| {
                    format!(
                        "engine did not exit within {}s and was killed",
                        self.timeouts.shutdown.as_secs()
                    )
                });
            }
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
        self.pending.lock().await.clear();

        match failure {
            None => Ok(()),
            Some(msg) => Err(BridgeError::Shutdown(msg)),
        }
    }

    /// Tear down without a handshake: kill the engine and stop both tasks.
    async fn abandon(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
        if let Err(e) = self.process.kill().await {
            tracing::warn!("Failed to kill engine: {e}");
        }
    }
}

impl Drop for LanguageClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

async fn run_writer(stdin: EngineWriter, mut writer_rx: mpsc::Receiver<WriterCommand>) {
    let mut writer = FrameWriter::new(stdin);
    while let Some(cmd) = writer_rx.recv().await {
        match cmd {
            WriterCommand::Send(frame) => {
                if let Err(e) = writer.write_frame(&frame).await {
                    tracing::warn!("Engine write error: {e}");
                    return;
                }
            }
            WriterCommand::Close => break,
        }
    }
    if let Err(e) = writer.close().await {
        tracing::debug!("Closing engine stdin: {e}");
    }
}

/// Where the reader task delivers what it reads.
struct ReaderOutputs {
    /// Lossy: diagnostics and messages are dropped when the host lags.
    event_tx: mpsc::Sender<BridgeEvent>,
    /// Lossless: engine death is always observable.
    stopped_tx: watch::Sender<Option<EngineStopReason>>,
    writer_tx: mpsc::Sender<WriterCommand>,
}

async fn run_reader(
    stdout: EngineReader,
    pending: PendingMap,
    outputs: ReaderOutputs,
    workspace_root: PathBuf,
) {
    let ReaderOutputs {
        event_tx,
        stopped_tx,
        writer_tx,
    } = outputs;
    let mut reader = FrameReader::new(stdout);
    let reason = loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                dispatch_frame(&frame, &pending, &event_tx, &writer_tx, &workspace_root).await;
            }
            Ok(None) => {
                tracing::info!("Engine closed stdout");
                break EngineStopReason::Exited;
            }
            Err(e) => {
                tracing::warn!("Engine read error: {e}");
                break EngineStopReason::Failed(e.to_string());
            }
        }
    };
    // Dropping the senders wakes every waiting request.
    pending.lock().await.clear();
    stopped_tx.send_replace(Some(reason));
}

/// Queue an event for the host without ever blocking the reader.
fn emit(event_tx: &mpsc::Sender<BridgeEvent>, event: BridgeEvent) {
    match event_tx.try_send(event) {
        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            tracing::warn!("Host is not draining bridge events; dropped {dropped:?}");
        }
    }
}

async fn dispatch_frame(
    frame: &serde_json::Value,
    pending: &Mutex<HashMap<RequestId, oneshot::Sender<serde_json::Value>>>,
    event_tx: &mpsc::Sender<BridgeEvent>,
    writer_tx: &mpsc::Sender<WriterCommand>,
    workspace_root: &Path,
) {
    let Some(incoming) = parse_incoming(frame) else {
        tracing::trace!("Ignoring malformed JSON-RPC frame from engine");
        return;
    };

    match incoming {
        IncomingFrame::Response { id, body } => {
            let sender = pending.lock().await.remove(&id);
            match sender {
                Some(tx) => {
                    let _ = tx.send(body);
                }
                None => tracing::debug!(%id, "Response for unknown request"),
            }
        }
        IncomingFrame::EngineRequest { id, method, params } => {
            let response = answer_engine_request(&id, &method, params.as_ref());
            let _ = writer_tx.send(WriterCommand::Send(response)).await;
        }
        IncomingFrame::Notification { method, params } => {
            handle_notification(&method, params, event_tx, workspace_root);
        }
    }
}

/// Engines block on unanswered requests, so every one gets a reply.
fn answer_engine_request(
    id: &serde_json::Value,
    method: &str,
    params: Option<&serde_json::Value>,
) -> serde_json::Value {
    match method {
        "workspace/configuration" => {
            let count = params
                .and_then(|p| p.get("items"))
                .and_then(|items| items.as_array())
                .map_or(0, Vec::len);
            protocol::result_response(id, serde_json::Value::Array(vec![serde_json::Value::Null; count]))
        }
        "client/registerCapability" | "client/unregisterCapability" | "window/workDoneProgress/create" => {
            protocol::result_response(id, serde_json::Value::Null)
        }
        _ => {
            tracing::debug!("Engine sent unsupported request {method}; replying method not found");
            protocol::error_response(
                id,
                protocol::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            )
        }
    }
}

fn handle_notification(
    method: &str,
    params: Option<serde_json::Value>,
    event_tx: &mpsc::Sender<BridgeEvent>,
    workspace_root: &Path,
) {
    let Some(params) = params else {
        tracing::trace!("Ignoring {method} without params");
        return;
    };

    match method {
        "textDocument/publishDiagnostics" => {
            let diag_params = match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!("Failed to parse publishDiagnostics: {e}");
                    return;
                }
            };
            let Some(path) = protocol::file_uri_to_path(&diag_params.uri) else {
                return;
            };
            let path = normalize_path(&path);
            if !path.starts_with(workspace_root) {
                tracing::warn!(
                    path = %path.display(),
                    "Engine reported diagnostics outside the workspace"
                );
                return;
            }
            let items = diag_params
                .diagnostics
                .iter()
                .map(protocol::LspDiagnostic::to_engine_diagnostic)
                .collect();
            emit(event_tx, BridgeEvent::Diagnostics { path, items });
        }
        "window/logMessage" => {
            if let Ok(msg) = serde_json::from_value::<MessageParams>(params) {
                match msg.level {
                    1 => tracing::error!(target: "lulu_bridge::engine", "{}", msg.message),
                    2 => tracing::warn!(target: "lulu_bridge::engine", "{}", msg.message),
                    3 => tracing::info!(target: "lulu_bridge::engine", "{}", msg.message),
                    _ => tracing::debug!(target: "lulu_bridge::engine", "{}", msg.message),
                }
            }
        }
        "window/showMessage" => {
            if let Ok(msg) = serde_json::from_value::<MessageParams>(params) {
                emit(
                    event_tx,
                    BridgeEvent::Message {
                        level: msg.level,
                        text: msg.message,
                    },
                );
            }
        }
        _ => tracing::trace!("Ignoring engine notification {method}"),
    }
}
