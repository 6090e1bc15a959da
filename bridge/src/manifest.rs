//! Subscription manifest: which documents and which files the engine hears
//! about.

use std::path::{Component, Path};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;

use crate::error::BridgeError;
use crate::locator::normalize_path;
use crate::types::TextDocument;

/// Language id of the documents the engine understands.
pub const LANGUAGE_ID: &str = "lua";

/// URI scheme of documents backed by the local filesystem.
pub const FILE_SCHEME: &str = "file";

/// Per-workspace configuration file the engine wants change events for.
pub const CONFIG_FILE_GLOB: &str = "**/.clientrc";

/// One entry of the document selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentFilter {
    pub scheme: &'static str,
    pub language: &'static str,
}

impl DocumentFilter {
    #[must_use]
    pub fn matches(&self, doc: &TextDocument) -> bool {
        doc.uri().scheme() == self.scheme && doc.language_id() == self.language
    }
}

/// Immutable description of what to forward, built fresh on every start.
#[derive(Debug, Clone)]
pub struct SubscriptionManifest {
    document_selector: Vec<DocumentFilter>,
    watch_globs: Vec<String>,
    watch_set: GlobSet,
}

impl SubscriptionManifest {
    /// Local `.lua` files plus `.clientrc` anywhere in the workspace.
    pub fn standard() -> Result<Self, BridgeError> {
        Self::new(
            vec![DocumentFilter {
                scheme: FILE_SCHEME,
                language: LANGUAGE_ID,
            }],
            vec![CONFIG_FILE_GLOB.to_string()],
        )
    }

    fn new(
        document_selector: Vec<DocumentFilter>,
        watch_globs: Vec<String>,
    ) -> Result<Self, BridgeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &watch_globs {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| BridgeError::Config(format!("invalid watch glob '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let watch_set = builder
            .build()
            .map_err(|e| BridgeError::Config(format!("invalid watch globs: {e}")))?;

        Ok(Self {
            document_selector,
            watch_globs,
            watch_set,
        })
    }

    #[must_use]
    pub fn document_selector(&self) -> &[DocumentFilter] {
        &self.document_selector
    }

    #[must_use]
    pub fn watch_globs(&self) -> &[String] {
        &self.watch_globs
    }

    #[must_use]
    pub fn selects(&self, doc: &TextDocument) -> bool {
        self.document_selector.iter().any(|f| f.matches(doc))
    }

    /// Whether a file event at `path` should reach the engine.
    ///
    /// Relative paths are taken relative to `workspace_root`. Either way the
    /// path is normalized first, so nothing that resolves outside the root
    /// ever matches.
    #[must_use]
    pub fn watches(&self, path: &Path, workspace_root: &Path) -> bool {
        let root = normalize_path(workspace_root);
        let resolved = normalize_path(&root.join(path));
        let Ok(relative) = resolved.strip_prefix(&root) else {
            return false;
        };
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return false;
        }
        self.watch_set.is_match(relative)
    }
}
