//! Locates the engine executable relative to the bridge's install root.
//!
//! [`engine_path`] is pure path arithmetic; whether the file is actually
//! there and runnable is checked by [`validate_executable`] right before
//! spawning.

use std::path::{Component, Path, PathBuf};

use crate::error::BridgeError;

/// File name of the engine binary, without platform suffix.
pub const ENGINE_NAME: &str = "lulu-lsp";

/// Build-output directory the engine lives in, relative to the workspace
/// two levels above the install root.
const BUILD_OUTPUT: [&str; 2] = ["target", "debug"];

/// Resolve `<install_root>/../../target/debug/lulu-lsp[.exe]`.
#[must_use]
pub fn engine_path(install_root: &Path) -> PathBuf {
    let mut path = install_root.join("..").join("..");
    for dir in BUILD_OUTPUT {
        path.push(dir);
    }
    path.push(ENGINE_NAME);
    if !std::env::consts::EXE_EXTENSION.is_empty() {
        path.set_extension(std::env::consts::EXE_EXTENSION);
    }
    normalize_path(&path)
}

/// Lexically resolve `.` and `..` without touching the filesystem.
///
/// `..` never climbs above a root or drive prefix.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Check that `path` points at a runnable file.
pub fn validate_executable(path: &Path) -> Result<(), BridgeError> {
    let resolution = |reason: &str| BridgeError::Resolution {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => resolution("not found"),
        _ => resolution(&e.to_string()),
    })?;

    if !metadata.is_file() {
        return Err(resolution("not a regular file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(resolution("not executable"));
        }
    }

    Ok(())
}
