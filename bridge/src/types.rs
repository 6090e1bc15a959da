//! Public types exchanged with the host.
//!
//! The host hands the bridge [`TextDocument`]s and [`FileEvent`]s, and
//! reads back [`BridgeEvent`]s and [`DiagnosticsSnapshot`]s.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

/// An open editor document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    uri: Url,
    language_id: String,
    text: String,
}

impl TextDocument {
    pub fn new(uri: Url, language_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Kind of filesystem change, numbered as LSP `FileChangeType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Created = 1,
    Changed = 2,
    Deleted = 3,
}

impl FileChangeKind {
    #[must_use]
    pub fn to_lsp(self) -> u8 {
        self as u8
    }
}

/// A change reported by the host's file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileChangeKind,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Lifecycle of the one bridge-to-engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
}

/// Outcome of handing an editor event to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Forwarded {
    /// Queued for the engine.
    Sent,
    /// Outside the subscription manifest.
    Filtered,
    /// No running session.
    Inactive,
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity; `None` for out-of-range values.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic published by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineDiagnostic {
    severity: DiagnosticSeverity,
    message: String,
    /// 0-indexed.
    line: u32,
    /// 0-indexed.
    col: u32,
    source: String,
}

impl EngineDiagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: String,
        line: u32,
        col: u32,
        source: String,
    ) -> Self {
        Self {
            severity,
            message,
            line,
            col,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Why the engine went away without being asked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStopReason {
    Exited,
    Failed(String),
}

/// Something the engine told us, relayed to the host.
#[derive(Debug)]
pub enum BridgeEvent {
    Diagnostics {
        path: PathBuf,
        items: Vec<EngineDiagnostic>,
    },
    /// `window/showMessage`; `level` is the LSP `MessageType` (1 = error .. 4 = log).
    Message { level: u8, text: String },
}

/// Immutable view of all diagnostics, error-bearing files first.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    files: Vec<(PathBuf, Vec<EngineDiagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(PathBuf, Vec<EngineDiagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(PathBuf, Vec<EngineDiagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn items(&self) -> impl Iterator<Item = &EngineDiagnostic> {
        self.files.iter().flat_map(|(_, items)| items)
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.items().filter(|d| d.severity().is_error()).count()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.items()
            .filter(|d| d.severity() == DiagnosticSeverity::Warning)
            .count()
    }
}
