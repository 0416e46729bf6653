//! Sender-side orchestration: fetch the destination's tree snapshot, diff it
//! against the local source, and drive the resulting plan over HTTP.
//!
//! Runs one action at a time, await-ing each response before starting the
//! next (the single-threaded cooperative model this system commits to).
//! Failures on one entry are logged and skipped; they don't abort the run.

use crate::delta::{self, BlockChecksum, BlockTable, DeltaOp, PatchGenerator};
use crate::diff::{self, Action, Plan};
use crate::error::{Result, SyncError};
use crate::tree::{self, Entry, IdentifierKind};
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};

const HEADER_SIZE: usize = 8;

/// Fetch the destination's tree snapshot, diff it against `source`, and
/// (unless `dry_run`) execute the resulting plan. Returns the plan either
/// way, so a dry run can print it.
pub async fn sync(
    client: &reqwest::Client,
    base_url: &str,
    source: &Path,
    kind: IdentifierKind,
    dry_run: bool,
) -> Result<Plan> {
    let destination = fetch_destination_tree(client, base_url, kind).await?;
    let plan = diff::plan(source, &destination, kind)?;
    tracing::info!(
        deletes = plan.deletes.len(),
        create_directories = plan.create_directories.len(),
        create_files = plan.create_files.len(),
        patch_files = plan.patch_files.len(),
        "plan computed"
    );

    if dry_run {
        return Ok(plan);
    }

    for action in plan.actions() {
        if let Err(err) = execute_action(client, base_url, source, &action).await {
            tracing::error!(action = ?action, error = %err, "action failed, continuing with next");
        }
    }
    tracing::info!("sync complete");

    Ok(plan)
}

async fn fetch_destination_tree(client: &reqwest::Client, base_url: &str, kind: IdentifierKind) -> Result<Entry> {
    let endpoint = match kind {
        IdentifierKind::SizeMtime => "directory_tree_size_and_mtime",
        IdentifierKind::Checksum => "directory_tree_checksum",
    };
    let value = get_json(client, &format!("{base_url}/{endpoint}")).await?;
    tree::from_json(&value)
}

async fn execute_action(
    client: &reqwest::Client,
    base_url: &str,
    source: &Path,
    action: &Action,
) -> Result<()> {
    match action {
        Action::Delete(rel) => delete(client, base_url, rel).await,
        Action::CreateDirectory(rel) => create_directory(client, base_url, rel).await,
        Action::CreateFile(rel) => create_file(client, base_url, source, rel).await,
        Action::PatchFile(rel) => patch_file(client, base_url, source, rel).await,
    }
}

async fn delete(client: &reqwest::Client, base_url: &str, rel: &Path) -> Result<()> {
    let url = format!("{base_url}/delete_file_or_directory/{}", encode_rel_path(rel));
    post_bytes(client, &url, Vec::new()).await?;
    tracing::info!(rel = %rel.display(), "deleted");
    Ok(())
}

async fn create_directory(client: &reqwest::Client, base_url: &str, rel: &Path) -> Result<()> {
    let url = format!("{base_url}/create_directory/{}", encode_rel_path(rel));
    post_bytes(client, &url, Vec::new()).await?;
    tracing::info!(rel = %rel.display(), "created directory");
    Ok(())
}

async fn create_file(client: &reqwest::Client, base_url: &str, source: &Path, rel: &Path) -> Result<()> {
    let source_path = source.join(rel);
    let bytes = std::fs::read(&source_path).map_err(|e| SyncError::io(&source_path, e))?;
    let url = format!("{base_url}/create_or_append_file/{}", encode_rel_path(rel));

    if bytes.is_empty() {
        // `bytes.chunks()` yields nothing for a zero-byte file; the target
        // must still be created so `update_file_mtime` below has a path to
        // stamp. One empty-bodied POST creates it.
        post_bytes(client, &url, Vec::new()).await?;
    } else {
        for piece in bytes.chunks(delta::MAX_CHUNK_SIZE) {
            post_bytes(client, &url, piece.to_vec()).await?;
        }
    }

    let mtime_ns = file_mtime_ns(&source_path)?;
    let mtime_url = format!("{base_url}/update_file_mtime/{}", encode_rel_path(rel));
    post_bytes(client, &mtime_url, mtime_ns.to_string().into_bytes()).await?;
    tracing::info!(rel = %rel.display(), bytes = bytes.len(), "created file");
    Ok(())
}

async fn patch_file(client: &reqwest::Client, base_url: &str, source: &Path, rel: &Path) -> Result<()> {
    let source_path = source.join(rel);
    let rel_encoded = encode_rel_path(rel);

    let table = fetch_block_table(client, base_url, &rel_encoded).await?;
    let mut file = File::open(&source_path).map_err(|e| SyncError::io(&source_path, e))?;
    let mut generator = PatchGenerator::new(&mut file, &table, delta::BLOCK_SIZE)?;

    let suffix = uuid::Uuid::new_v4().to_string();
    let patch_url = format!("{base_url}/create_or_append_patch/{suffix}/{rel_encoded}");
    stream_patch(client, &patch_url, &mut generator).await?;

    let mtime_ns = file_mtime_ns(&source_path)?;
    let finish_url = format!("{base_url}/finish_patch/{suffix}/{rel_encoded}");
    post_bytes(client, &finish_url, mtime_ns.to_string().into_bytes()).await?;
    tracing::info!(rel = %rel.display(), "patched file");
    Ok(())
}

/// Drive `generator` into length-bounded chunks and POST each in turn. Mirrors
/// the framer's chunking rule (flush once fewer than `HEADER_SIZE + 1` bytes
/// remain, split oversized literals with a fresh header per piece) but emits
/// asynchronously instead of through a synchronous callback, so at most one
/// chunk is ever held in memory at a time.
async fn stream_patch(client: &reqwest::Client, url: &str, generator: &mut PatchGenerator<'_>) -> Result<()> {
    let mut chunk = Vec::with_capacity(delta::MAX_CHUNK_SIZE);
    let mut any_sent = false;

    while let Some(op) = generator.next_op()? {
        match op {
            DeltaOp::Copy(index) => {
                if delta::MAX_CHUNK_SIZE - chunk.len() < HEADER_SIZE {
                    post_bytes(client, url, std::mem::take(&mut chunk)).await?;
                    any_sent = true;
                }
                let value: i64 = -(index as i64);
                chunk.extend_from_slice(&value.to_le_bytes());
            }
            DeltaOp::Literal(bytes) => {
                let mut offset = 0;
                while offset < bytes.len() {
                    let remaining_in_chunk = delta::MAX_CHUNK_SIZE - chunk.len();
                    if remaining_in_chunk < HEADER_SIZE + 1 {
                        post_bytes(client, url, std::mem::take(&mut chunk)).await?;
                        any_sent = true;
                        continue;
                    }
                    let piece_len = (remaining_in_chunk - HEADER_SIZE).min(bytes.len() - offset);
                    let value: i64 = piece_len as i64;
                    chunk.extend_from_slice(&value.to_le_bytes());
                    chunk.extend_from_slice(&bytes[offset..offset + piece_len]);
                    offset += piece_len;
                }
            }
        }
    }

    // An empty source file (or one that's a pure suffix-truncation of every
    // block) produces zero ops, leaving `chunk` empty. The receiver only
    // opens a `PatchSession` on the first body it sees for this suffix, so
    // without at least one POST `finish_patch` would find no session at all.
    if !chunk.is_empty() || !any_sent {
        post_bytes(client, url, chunk).await?;
    }
    Ok(())
}

async fn fetch_block_table(client: &reqwest::Client, base_url: &str, rel_encoded: &str) -> Result<BlockTable> {
    let url = format!("{base_url}/block_checksums/{rel_encoded}");
    let value = get_json(client, &url).await?;
    let pair = value
        .as_array()
        .ok_or_else(|| SyncError::Protocol("block_checksums result is not an array".into()))?;
    if pair.len() != 2 {
        return Err(SyncError::Protocol("block_checksums result must have 2 elements".into()));
    }
    let rolling = pair[0]
        .as_array()
        .ok_or_else(|| SyncError::Protocol("block_checksums rolling list is not an array".into()))?;
    let strong = pair[1]
        .as_array()
        .ok_or_else(|| SyncError::Protocol("block_checksums strong list is not an array".into()))?;
    if rolling.len() != strong.len() {
        return Err(SyncError::Protocol("block_checksums lists have mismatched lengths".into()));
    }

    let mut blocks = Vec::with_capacity(rolling.len());
    for (index, (r, s)) in rolling.iter().zip(strong.iter()).enumerate() {
        let rolling_value = r
            .as_u64()
            .ok_or_else(|| SyncError::Protocol("rolling checksum is not a number".into()))? as u32;
        let strong_value = s
            .as_str()
            .ok_or_else(|| SyncError::Protocol("strong checksum is not a string".into()))?
            .to_string();
        blocks.push(BlockChecksum {
            index: index as u64,
            offset: 0,
            size: 0,
            rolling: rolling_value,
            strong: strong_value,
        });
    }
    Ok(BlockTable { blocks })
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SyncError::Transport { endpoint: url.to_string(), message: e.to_string() })?;
    envelope_result(url, response).await
}

async fn post_bytes(client: &reqwest::Client, url: &str, body: Vec<u8>) -> Result<Value> {
    let response = client
        .post(url)
        .body(body)
        .send()
        .await
        .map_err(|e| SyncError::Transport { endpoint: url.to_string(), message: e.to_string() })?;
    envelope_result(url, response).await
}

async fn envelope_result(url: &str, response: reqwest::Response) -> Result<Value> {
    let body: Value = response
        .json()
        .await
        .map_err(|e| SyncError::Transport { endpoint: url.to_string(), message: e.to_string() })?;

    match body.get("status").and_then(Value::as_str) {
        Some("success") => Ok(body.get("result").cloned().unwrap_or(Value::Null)),
        _ => {
            let message = body
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Err(SyncError::Transport { endpoint: url.to_string(), message })
        }
    }
}

/// Percent-encode a relative path one component at a time, preserving `/` as
/// the separator so the receiver's wildcard route captures it literally.
fn encode_rel_path(rel: &Path) -> String {
    rel.components()
        .map(|c| urlencoding::encode(&c.as_os_str().to_string_lossy()).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_mtime_ns(path: &Path) -> Result<u128> {
    let metadata = std::fs::metadata(path).map_err(|e| SyncError::io(path, e))?;
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    Ok(mtime.seconds() as u128 * 1_000_000_000 + mtime.nanoseconds() as u128)
}
