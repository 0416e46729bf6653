//! The tree snapshot data model: a recursive tagged union of directories and
//! leaf identifiers, serialized to the exact JSON shapes the wire protocol
//! expects (a leaf is a 2- or 3-element array, a directory is an object).
//!
//! The directory-vs-leaf discrimination happens once, at `serde_json::Value`
//! parse time, rather than leaking untyped JSON shapes past this module.

use crate::error::{Result, SyncError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A leaf's identity, used to decide whether source and destination already
/// agree on a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// `[name, size_bytes, mtime_ns]`
    SizeMtime { size: u64, mtime_ns: u128 },
    /// `[name, sha256_hex]`
    Checksum { sha256_hex: String },
}

impl Identifier {
    fn to_json_array(&self, name: &str) -> Value {
        match self {
            Identifier::SizeMtime { size, mtime_ns } => {
                Value::Array(vec![
                    Value::String(name.to_string()),
                    Value::Number((*size).into()),
                    // mtime_ns can exceed u64 range only in pathological cases;
                    // serde_json's Number doesn't support u128 directly, so
                    // encode as a string-safe u64 when it fits, else as a string.
                    match u64::try_from(*mtime_ns) {
                        Ok(v) => Value::Number(v.into()),
                        Err(_) => Value::String(mtime_ns.to_string()),
                    },
                ])
            }
            Identifier::Checksum { sha256_hex } => Value::Array(vec![
                Value::String(name.to_string()),
                Value::String(sha256_hex.clone()),
            ]),
        }
    }

    fn from_json_array(arr: &[Value]) -> Result<(String, Identifier)> {
        let name = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Protocol("leaf array missing name".into()))?
            .to_string();

        match arr.len() {
            3 => {
                let size = arr[1]
                    .as_u64()
                    .ok_or_else(|| SyncError::Protocol("leaf size is not a number".into()))?;
                let mtime_ns = match &arr[2] {
                    Value::Number(n) => n
                        .as_u64()
                        .map(u128::from)
                        .ok_or_else(|| SyncError::Protocol("leaf mtime is not a u64".into()))?,
                    Value::String(s) => s
                        .parse()
                        .map_err(|_| SyncError::Protocol("leaf mtime is not numeric".into()))?,
                    _ => return Err(SyncError::Protocol("leaf mtime has wrong type".into())),
                };
                Ok((name, Identifier::SizeMtime { size, mtime_ns }))
            }
            2 => {
                let sha256_hex = arr[1]
                    .as_str()
                    .ok_or_else(|| SyncError::Protocol("leaf checksum is not a string".into()))?
                    .to_string();
                Ok((name, Identifier::Checksum { sha256_hex }))
            }
            n => Err(SyncError::Protocol(format!(
                "leaf array has unexpected length {n}"
            ))),
        }
    }
}

/// A node in a tree snapshot: either a directory of named children, or a
/// file's leaf identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Dir(BTreeMap<String, Entry>),
    File(Identifier),
}

impl Entry {
    pub fn empty_dir() -> Self {
        Entry::Dir(BTreeMap::new())
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Dir(_))
    }
}

/// How a sync run identifies file leaves: the default cheap size+mtime
/// comparison, or the `--checksum` whole-file-hash comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    SizeMtime,
    Checksum,
}

/// Recursively walk `root`, producing a tree snapshot. Symlinks are followed
/// as the operating system does by default (`std::fs::metadata` follows
/// symlinks; a symlink to a directory is treated as a directory).
pub fn snapshot(root: &Path, kind: IdentifierKind) -> Result<Entry> {
    let metadata = std::fs::metadata(root).map_err(|e| SyncError::io(root, e))?;
    if metadata.is_dir() {
        snapshot_dir_with_kind(root, kind)
    } else {
        Ok(Entry::File(leaf_identifier(root, kind)?))
    }
}

fn leaf_identifier(path: &Path, kind: IdentifierKind) -> Result<Identifier> {
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
            let digest = Sha256::digest(&bytes);
            Ok(Identifier::Checksum {
                sha256_hex: hex::encode(digest),
            })
        }
    }
}

/// Serialize a tree snapshot to the wire's nested JSON shape.
///
/// The top-level `Entry` doesn't carry its own name (the root has none on
/// the wire), so directory children are serialized as a JSON object keyed by
/// name, and each file child's name is folded into its leaf array — matching
/// `recursive_list`'s output shape exactly.
pub fn to_json(entry: &Entry) -> Value {
    match entry {
        Entry::Dir(children) => {
            let mut obj = serde_json::Map::new();
            for (name, child) in children {
                obj.insert(name.clone(), child_to_json(name, child));
            }
            Value::Object(obj)
        }
        Entry::File(id) => {
            // A root that is itself a file has no name to embed; callers that
            // need this case (none in the control surface) should special-case it.
            id.to_json_array("")
        }
    }
}

fn child_to_json(name: &str, entry: &Entry) -> Value {
    match entry {
        Entry::Dir(children) => {
            let mut obj = serde_json::Map::new();
            for (child_name, child) in children {
                obj.insert(child_name.clone(), child_to_json(child_name, child));
            }
            Value::Object(obj)
        }
        Entry::File(id) => id.to_json_array(name),
    }
}

/// Parse the wire's nested JSON shape back into a tree snapshot.
///
/// Discriminates "array" (leaf) from "object" (directory) exactly once, here,
/// per the design note against reusing dynamic list-vs-map typing downstream.
pub fn from_json(value: &Value) -> Result<Entry> {
    match value {
        Value::Object(obj) => {
            let mut children = BTreeMap::new();
            for (name, child) in obj {
                children.insert(name.clone(), from_json(child)?);
            }
            Ok(Entry::Dir(children))
        }
        Value::Array(arr) => {
            let (_, id) = Identifier::from_json_array(arr)?;
            Ok(Entry::File(id))
        }
        _ => Err(SyncError::Protocol("tree node is neither array nor object".into())),
    }
}

/// Public helper used by the walker's directory recursion, threading the
/// identifier kind through (the free functions above exist mainly for the
/// wire (de)serialization, which doesn't need a kind).
pub fn snapshot_dir_with_kind(dir: &Path, kind: IdentifierKind) -> Result<Entry> {
    let mut children = BTreeMap::new();
    let read_dir = std::fs::read_dir(dir).map_err(|e| SyncError::io(dir, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| SyncError::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let metadata = std::fs::metadata(&path).map_err(|e| SyncError::io(&path, e))?;
        let child = if metadata.is_dir() {
            snapshot_dir_with_kind(&path, kind)?
        } else {
            Entry::File(leaf_identifier(&path, kind)?)
        };
        children.insert(name, child);
    }
    Ok(Entry::Dir(children))
}
