//! Per-file diagnostics most recently published by the engine.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::types::{DiagnosticsSnapshot, EngineDiagnostic};

#[derive(Default)]
pub(crate) struct DiagnosticsStore {
    data: HashMap<PathBuf, Vec<EngineDiagnostic>>,
}

impl DiagnosticsStore {
    /// Replace diagnostics for `path`; an empty list clears the file.
    pub fn update(&mut self, path: PathBuf, items: Vec<EngineDiagnostic>) {
        if items.is_empty() {
            self.data.remove(&path);
        } else {
            self.data.insert(path, items);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<_> = self
            .data
            .iter()
            .map(|(path, items)| (path.clone(), items.clone()))
            .collect();

        files.sort_by(|a, b| {
            let a_err = a.1.iter().any(|d| d.severity().is_error());
            let b_err = b.1.iter().any(|d| d.severity().is_error());
            b_err.cmp(&a_err).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }
}
