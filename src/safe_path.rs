//! Join an untrusted, URL-encoded relative path to a trusted root and refuse
//! anything that would resolve outside of it.
//!
//! URL-decode, join to the root, normalize `.`/`..` segments, then require
//! the result to share the normalized root as a path-component prefix. Every
//! mutating receiver endpoint runs a relative path through this before
//! touching the filesystem.

use crate::error::{Result, SyncError};
use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without touching the filesystem.
///
/// Unlike `Path::canonicalize`, this works on paths that don't exist yet
/// (the common case for `create_directory`/`create_or_append_file`).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// URL-decode `untrusted_relative`, join it to `root`, normalize, and verify
/// the result is `root` or a descendant of it.
pub fn resolve(untrusted_relative: &str, root: &Path) -> Result<PathBuf> {
    let decoded = urlencoding::decode(untrusted_relative)
        .map_err(|e| SyncError::Protocol(format!("invalid percent-encoding: {e}")))?;

    let root = normalize(root);
    let joined = root.join(decoded.as_ref());
    let normalized = normalize(&joined);

    if normalized.starts_with(&root) {
        Ok(normalized)
    } else {
        Err(SyncError::PathEscape {
            attempted: untrusted_relative.to_string(),
            root,
        })
    }
}
