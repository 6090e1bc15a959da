//! The bridge: one owned value that holds at most one engine session.
//!
//! State is location: a session exists exactly when `Bridge::session` is
//! `Some`. `start` and `stop` take `&mut self`, so they can never interleave.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{ClientTimeouts, LanguageClient, Notifier};
use crate::config::BridgeConfig;
use crate::diagnostics::DiagnosticsStore;
use crate::error::BridgeError;
use crate::launch::{LaunchDescriptor, LaunchMode};
use crate::locator;
use crate::manifest::SubscriptionManifest;
use crate::spawn::{ProcessSpawner, Spawner};
use crate::types::{
    BridgeEvent, DiagnosticsSnapshot, EngineStopReason, FileEvent, Forwarded, SessionState,
    TextDocument,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Undelivered `showMessage` texts kept for the host; older ones are dropped.
const MAX_QUEUED_MESSAGES: usize = 64;

/// What the bridge needs from the editor hosting it.
pub trait HostContext {
    /// Directory the bridge is installed in.
    fn install_root(&self) -> PathBuf;

    /// Root of the workspace the engine analyses.
    fn workspace_root(&self) -> PathBuf;

    fn launch_mode(&self) -> LaunchMode {
        LaunchMode::Run
    }

    /// Register a watcher for `glob`, relative to the workspace root.
    ///
    /// The bridge re-checks every event against its manifest, so hosts may
    /// deliver a superset of matching events.
    fn create_file_watcher(&self, glob: &str) -> mpsc::Receiver<FileEvent>;
}

/// File-event forwarding task, cancelled when the session goes away.
struct WatcherTask(JoinHandle<()>);

impl Drop for WatcherTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Session {
    client: LanguageClient,
    manifest: Arc<SubscriptionManifest>,
    watchers: Vec<WatcherTask>,
    event_rx: mpsc::Receiver<BridgeEvent>,
}

impl Session {
    async fn shutdown(self) -> Result<(), BridgeError> {
        let Session {
            client, watchers, ..
        } = self;
        // No file events may reach the engine once shutdown begins.
        drop(watchers);
        client.shutdown().await
    }
}

/// A state change in progress. Dropping it before `finish` (an error, or the
/// host dropping the future) leaves the bridge `Uninitialized`.
struct Transition<'a> {
    state: &'a mut SessionState,
    finished: bool,
}

impl<'a> Transition<'a> {
    fn begin(state: &'a mut SessionState, during: SessionState) -> Self {
        *state = during;
        Self {
            state,
            finished: false,
        }
    }

    fn finish(mut self, to: SessionState) {
        *self.state = to;
        self.finished = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state = SessionState::Uninitialized;
        }
    }
}

pub struct Bridge {
    config: BridgeConfig,
    spawner: Box<dyn Spawner>,
    state: SessionState,
    session: Option<Session>,
    diagnostics: DiagnosticsStore,
    messages: VecDeque<(u8, String)>,
}

impl Bridge {
    /// A bridge that launches the engine as an OS process.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let spawner = ProcessSpawner::new(&config)?;
        Ok(Self::with_spawner(config, spawner))
    }

    pub fn with_spawner(config: BridgeConfig, spawner: impl Spawner + 'static) -> Self {
        Self {
            config,
            spawner: Box::new(spawner),
            state: SessionState::Uninitialized,
            session: None,
            diagnostics: DiagnosticsStore::default(),
            messages: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Launch the engine and complete the handshake.
    ///
    /// A second call while a session exists is rejected with
    /// [`BridgeError::AlreadyRunning`] and spawns nothing.
    pub async fn start<H: HostContext + ?Sized>(&mut self, host: &H) -> Result<(), BridgeError> {
        if self.session.is_some() {
            tracing::warn!("Ignoring start: a session is already running");
            return Err(BridgeError::AlreadyRunning);
        }

        let transition = Transition::begin(&mut self.state, SessionState::Starting);
        match open_session(&self.config, self.spawner.as_ref(), host).await {
            Ok(session) => {
                self.session = Some(session);
                transition.finish(SessionState::Running);
                Ok(())
            }
            Err(e) => {
                drop(transition);
                tracing::error!("Failed to start engine: {e}");
                Err(e)
            }
        }
    }

    /// Shut the engine down. With no session this returns `Ok` at once.
    ///
    /// Local resources are released even when the shutdown handshake fails;
    /// that failure is returned afterwards.
    pub async fn stop(&mut self) -> Result<(), BridgeError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let transition = Transition::begin(&mut self.state, SessionState::Stopping);
        tracing::info!("Stopping engine");
        self.diagnostics.clear();
        let result = session.shutdown().await;
        transition.finish(SessionState::Uninitialized);

        if let Err(e) = &result {
            tracing::warn!("Engine shutdown was not clean: {e}");
        }
        result
    }

    fn running_session(&mut self) -> Option<&mut Session> {
        if self.state == SessionState::Running {
            self.session.as_mut()
        } else {
            None
        }
    }

    pub async fn did_open(&mut self, doc: &TextDocument) -> Result<Forwarded, BridgeError> {
        let Some(session) = self.selected_session(doc) else {
            return Ok(self.refusal());
        };
        session.client.did_open(doc).await?;
        Ok(Forwarded::Sent)
    }

    pub async fn did_change(&mut self, doc: &TextDocument) -> Result<Forwarded, BridgeError> {
        let Some(session) = self.selected_session(doc) else {
            return Ok(self.refusal());
        };
        session.client.did_change(doc).await?;
        Ok(Forwarded::Sent)
    }

    pub async fn did_save(&mut self, doc: &TextDocument) -> Result<Forwarded, BridgeError> {
        let Some(session) = self.selected_session(doc) else {
            return Ok(self.refusal());
        };
        session.client.did_save(doc).await?;
        Ok(Forwarded::Sent)
    }

    pub async fn did_close(&mut self, doc: &TextDocument) -> Result<Forwarded, BridgeError> {
        let Some(session) = self.selected_session(doc) else {
            return Ok(self.refusal());
        };
        session.client.did_close(doc).await?;
        Ok(Forwarded::Sent)
    }

    fn selected_session(&mut self, doc: &TextDocument) -> Option<&mut Session> {
        let session = self.running_session()?;
        if session.manifest.selects(doc) {
            Some(session)
        } else {
            tracing::trace!(uri = %doc.uri(), language = doc.language_id(), "Document outside selector");
            None
        }
    }

    fn refusal(&self) -> Forwarded {
        if self.is_running() {
            Forwarded::Filtered
        } else {
            Forwarded::Inactive
        }
    }

    /// Drain up to `budget` engine events without blocking.
    ///
    /// If the engine died on its own the session is dropped here and the
    /// bridge returns to `Uninitialized`, however many events were pending.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            let Some(session) = self.session.as_mut() else {
                break;
            };
            let Ok(event) = session.event_rx.try_recv() else {
                break;
            };
            count += 1;
            self.handle_event(event);
        }

        if let Some(reason) = self.session.as_ref().and_then(|s| s.client.stop_reason()) {
            self.engine_stopped(&reason);
        }
        count
    }

    fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Diagnostics { path, items } => {
                tracing::debug!(path = %path.display(), count = items.len(), "Diagnostics updated");
                self.diagnostics.update(path, items);
            }
            BridgeEvent::Message { level, text } => {
                tracing::info!(level, "Engine: {text}");
                if self.messages.len() == MAX_QUEUED_MESSAGES {
                    self.messages.pop_front();
                }
                self.messages.push_back((level, text));
            }
        }
    }

    fn engine_stopped(&mut self, reason: &EngineStopReason) {
        match reason {
            EngineStopReason::Exited => tracing::warn!("Engine exited unexpectedly"),
            EngineStopReason::Failed(msg) => tracing::warn!(error = %msg, "Engine failed"),
        }
        // Dropping the session aborts its tasks; the child is killed on drop.
        self.session = None;
        self.diagnostics.clear();
        self.state = SessionState::Uninitialized;
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// `window/showMessage` texts received since the last call, oldest
    /// first. At most the last 64 are kept between calls.
    pub fn take_messages(&mut self) -> Vec<(u8, String)> {
        self.messages.drain(..).collect()
    }
}

async fn open_session<H: HostContext + ?Sized>(
    config: &BridgeConfig,
    spawner: &dyn Spawner,
    host: &H,
) -> Result<Session, BridgeError> {
    let engine = config
        .engine_path
        .clone()
        .unwrap_or_else(|| locator::engine_path(&host.install_root()));
    let descriptor = LaunchDescriptor::stdio(engine, config.engine_args.clone());
    let manifest = Arc::new(SubscriptionManifest::standard()?);
    let workspace_root = host.workspace_root();
    let exe = descriptor.select(host.launch_mode());

    tracing::info!(engine = %exe.command().display(), workspace = %workspace_root.display(), "Starting engine");

    let spawned = spawner.spawn(exe, &workspace_root)?;
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let client = LanguageClient::connect(
        spawned,
        &workspace_root,
        event_tx,
        ClientTimeouts {
            init: config.init_timeout(),
            shutdown: config.shutdown_timeout(),
        },
    )
    .await?;

    tracing::info!(
        engine = client.engine_name().unwrap_or("unknown"),
        "Engine initialized"
    );

    let watchers = manifest
        .watch_globs()
        .iter()
        .map(|glob| {
            let rx = host.create_file_watcher(glob);
            WatcherTask(tokio::spawn(forward_file_events(
                rx,
                client.notifier(),
                manifest.clone(),
                workspace_root.clone(),
            )))
        })
        .collect();

    Ok(Session {
        client,
        manifest,
        watchers,
        event_rx,
    })
}

async fn forward_file_events(
    mut rx: mpsc::Receiver<FileEvent>,
    notifier: Notifier,
    manifest: Arc<SubscriptionManifest>,
    workspace_root: PathBuf,
) {
    while let Some(event) = rx.recv().await {
        if !manifest.watches(&event.path, &workspace_root) {
            tracing::trace!(path = %event.path.display(), "File event outside watch globs");
            continue;
        }
        if let Err(e) = notifier.file_changed(&workspace_root, &event).await {
            tracing::warn!(path = %event.path.display(), "Failed to forward file event: {e}");
            break;
        }
    }
}

/// Activation entry point: build a bridge and start its session.
pub async fn activate<H: HostContext + ?Sized>(
    host: &H,
    config: BridgeConfig,
) -> Result<Bridge, BridgeError> {
    let mut bridge = Bridge::new(config)?;
    bridge.start(host).await?;
    Ok(bridge)
}

/// Deactivation entry point; `None` completes immediately.
pub async fn deactivate(bridge: Option<Bridge>) -> Result<(), BridgeError> {
    match bridge {
        Some(mut bridge) => bridge.stop().await,
        None => Ok(()),
    }
}
