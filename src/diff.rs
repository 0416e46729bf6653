//! The tree-diff planner: compares a live source directory against a
//! destination tree snapshot and produces an ordered action plan.
//!
//! Walks the source filesystem directly (never materializing a source
//! snapshot) while consuming an already-fetched destination snapshot,
//! collecting leftover destination entries at the end of each directory so
//! every entry the source lacks gets a `Delete`.

use crate::error::{Result, SyncError};
use crate::tree::{Entry, Identifier, IdentifierKind};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Delete(PathBuf),
    CreateDirectory(PathBuf),
    CreateFile(PathBuf),
    PatchFile(PathBuf),
}

/// An ordered action plan, grouped for execution: deletes, then mkdirs, then
/// whole-file creates, then patches. Within each group, planner emission
/// order is preserved.
#[derive(Debug, Default, Clone)]
pub struct Plan {
    pub deletes: Vec<PathBuf>,
    pub create_directories: Vec<PathBuf>,
    pub create_files: Vec<PathBuf>,
    pub patch_files: Vec<PathBuf>,
}

impl Plan {
    fn push(&mut self, action: Action) {
        match action {
            Action::Delete(p) => self.deletes.push(p),
            Action::CreateDirectory(p) => self.create_directories.push(p),
            Action::CreateFile(p) => self.create_files.push(p),
            Action::PatchFile(p) => self.patch_files.push(p),
        }
    }

    /// Iterate the plan in execution order: deletes, mkdirs, creates, patches.
    pub fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        self.deletes
            .iter()
            .cloned()
            .map(Action::Delete)
            .chain(self.create_directories.iter().cloned().map(Action::CreateDirectory))
            .chain(self.create_files.iter().cloned().map(Action::CreateFile))
            .chain(self.patch_files.iter().cloned().map(Action::PatchFile))
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty()
            && self.create_directories.is_empty()
            && self.create_files.is_empty()
            && self.patch_files.is_empty()
    }
}

/// Build the plan by diffing the live directory tree rooted at `source_root`
/// against `destination`, identifying file leaves with `kind`.
pub fn plan(source_root: &Path, destination: &Entry, kind: IdentifierKind) -> Result<Plan> {
    let mut plan = Plan::default();
    diff_entry(source_root, Path::new(""), Some(destination), kind, &mut plan)?;
    Ok(plan)
}

/// Recurse over one source path, `rel` being its destination-relative path,
/// `dest` its corresponding destination node (`None` means absent).
fn diff_entry(
    source_path: &Path,
    rel: &Path,
    dest: Option<&Entry>,
    kind: IdentifierKind,
    plan: &mut Plan,
) -> Result<()> {
    let metadata = std::fs::metadata(source_path).map_err(|e| SyncError::io(source_path, e))?;

    if metadata.is_dir() {
        diff_directory(source_path, rel, dest, kind, plan)
    } else {
        diff_file(source_path, rel, dest, kind, plan)
    }
}

fn diff_directory(
    source_path: &Path,
    rel: &Path,
    dest: Option<&Entry>,
    kind: IdentifierKind,
    plan: &mut Plan,
) -> Result<()> {
    let dest_children = match dest {
        Some(Entry::Dir(children)) => Some(children),
        Some(Entry::File(_)) | None => None,
    };

    if dest_children.is_none() {
        plan.push(Action::CreateDirectory(rel.to_path_buf()));
    }

    let mut seen = BTreeSet::new();
    let read_dir = std::fs::read_dir(source_path).map_err(|e| SyncError::io(source_path, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| SyncError::io(source_path, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        seen.insert(name.clone());
        let child_source_path = entry.path();
        let child_rel = rel.join(&name);
        let child_dest = dest_children.and_then(|children| children.get(&name));
        diff_entry(&child_source_path, &child_rel, child_dest, kind, plan)?;
    }

    if let Some(children) = dest_children {
        for name in children.keys() {
            if !seen.contains(name) {
                plan.push(Action::Delete(rel.join(name)));
            }
        }
    }

    Ok(())
}

fn diff_file(
    source_path: &Path,
    rel: &Path,
    dest: Option<&Entry>,
    kind: IdentifierKind,
    plan: &mut Plan,
) -> Result<()> {
    match dest {
        None => plan.push(Action::CreateFile(rel.to_path_buf())),
        Some(Entry::Dir(_)) => {
            plan.push(Action::Delete(rel.to_path_buf()));
            plan.push(Action::CreateFile(rel.to_path_buf()));
        }
        Some(Entry::File(dest_id)) => {
            let source_id = identify_file(source_path, kind)?;
            if &source_id != dest_id {
                plan.push(Action::PatchFile(rel.to_path_buf()));
            }
        }
    }
    Ok(())
}

fn identify_file(path: &Path, kind: IdentifierKind) -> Result<Identifier> {
    match kind {
        IdentifierKind::SizeMtime => {
            let metadata = std::fs::metadata(path).map_err(|e| SyncError::io(path, e))?;
            let mtime = filetime::FileTime::from_last_modification_time(&metadata);
            let mtime_ns = mtime.seconds() as u128 * 1_000_000_000 + mtime.nanoseconds() as u128;
            Ok(Identifier::SizeMtime {
                size: metadata.len(),
                mtime_ns,
            })
        }
        IdentifierKind::Checksum => {
            use sha2::{Digest, Sha256};
            let bytes = std::fs::read(path).map_err(|e| SyncError::io(path, e))?;
            Ok(Identifier::Checksum {
                sha256_hex: hex::encode(Sha256::digest(&bytes)),
            })
        }
    }
}
