//! Packs a stream of `DeltaOp` instructions into length-bounded byte chunks
//! suitable for HTTP request bodies.
//!
//! Each item is an 8-byte little-endian signed integer (`Copy` as `-index`,
//! `Literal` as its positive length) optionally followed by payload bytes;
//! literal payloads that don't fit the current chunk are split, each split
//! piece re-prefixed with its own header.

use super::generator::{DeltaOp, PatchGenerator};
use crate::error::Result;

/// Maximum bytes packed into one chunk before it's flushed: 16 MiB.
pub const MAX_CHUNK_SIZE: usize = 0x1000000;

const HEADER_SIZE: usize = 8;

/// Encode `op` (or the tail of a literal already partially written) into
/// `chunk`, flushing via `emit` whenever fewer than `HEADER_SIZE + 1` bytes
/// remain. Splits oversized literal payloads across as many chunks as
/// needed.
pub fn pack_ops(
    mut next_op: impl FnMut() -> Result<Option<DeltaOp>>,
    mut emit: impl FnMut(Vec<u8>) -> Result<()>,
) -> Result<()> {
    let mut chunk = Vec::with_capacity(MAX_CHUNK_SIZE);

    while let Some(op) = next_op()? {
        match op {
            DeltaOp::Copy(index) => {
                if MAX_CHUNK_SIZE - chunk.len() < HEADER_SIZE {
                    emit(std::mem::take(&mut chunk))?;
                }
                let value: i64 = -(index as i64);
                chunk.extend_from_slice(&value.to_le_bytes());
            }
            DeltaOp::Literal(mut bytes) => {
                let mut offset = 0;
                while offset < bytes.len() {
                    let remaining_in_chunk = MAX_CHUNK_SIZE - chunk.len();
                    if remaining_in_chunk < HEADER_SIZE + 1 {
                        emit(std::mem::take(&mut chunk))?;
                        continue;
                    }
                    let piece_len = (remaining_in_chunk - HEADER_SIZE).min(bytes.len() - offset);
                    let value: i64 = piece_len as i64;
                    chunk.extend_from_slice(&value.to_le_bytes());
                    chunk.extend_from_slice(&bytes[offset..offset + piece_len]);
                    offset += piece_len;
                }
                bytes.clear();
            }
        }
    }

    if !chunk.is_empty() {
        emit(chunk)?;
    }
    Ok(())
}

/// Drive a `PatchGenerator` directly into chunks, calling `emit` for each.
pub fn pack_generator(
    generator: &mut PatchGenerator,
    emit: impl FnMut(Vec<u8>) -> Result<()>,
) -> Result<()> {
    pack_ops(|| generator.next_op(), emit)
}

/// Pack an already-materialized op list (used by tests and small in-memory
/// patches where streaming isn't needed).
pub fn pack_op_vec(ops: Vec<DeltaOp>, emit: impl FnMut(Vec<u8>) -> Result<()>) -> Result<()> {
    let mut iter = ops.into_iter();
    pack_ops(|| Ok(iter.next()), emit)
}
