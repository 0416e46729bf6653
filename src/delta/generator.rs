//! The patch generator: rolls a window over a source file, emitting
//! `Copy`/`Literal` instructions against a destination block-checksum table.
//!
//! A pull-style producer of tagged items so the framer can consume it lazily
//! and apply back-pressure naturally.

use super::checksum::BlockTable;
use super::rolling::RollingChecksum;
use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

/// One instruction in a patch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    Copy(u64),
    Literal(Vec<u8>),
}

/// Pull-style generator over an opened source file and a destination's
/// block-checksum table. Each call to `next_op` advances the rolling window
/// by as little as necessary to emit the next instruction.
pub struct PatchGenerator<'a> {
    file: &'a mut File,
    block_size: usize,
    index: HashMap<u32, Vec<u64>>,
    table: &'a BlockTable,
    rolling: RollingChecksum,
    literal_buffer: Vec<u8>,
    end_of_source: bool,
    done: bool,
}

impl<'a> PatchGenerator<'a> {
    /// Open the generator over `file`, indexing `table`'s rolling checksums.
    /// Reads the initial window (up to `block_size` bytes) immediately.
    pub fn new(file: &'a mut File, table: &'a BlockTable, block_size: usize) -> Result<Self> {
        let index = table.rolling_index();
        let mut rolling = RollingChecksum::new(block_size);

        let mut window = vec![0u8; block_size];
        let read = read_up_to(file, &mut window)?;
        window.truncate(read);
        rolling.reset_to(&window);

        Ok(Self {
            file,
            block_size,
            index,
            table,
            rolling,
            literal_buffer: Vec::new(),
            end_of_source: read < block_size,
            done: read == 0,
        })
    }

    /// Produce the next instruction, or `None` once the source is fully
    /// consumed and any pending literal has been flushed.
    pub fn next_op(&mut self) -> Result<Option<DeltaOp>> {
        loop {
            if self.done {
                if !self.literal_buffer.is_empty() {
                    return Ok(Some(DeltaOp::Literal(std::mem::take(
                        &mut self.literal_buffer,
                    ))));
                }
                return Ok(None);
            }

            if self.rolling.window_len() == 0 {
                self.done = true;
                continue;
            }

            let digest = self.rolling.digest();
            let matched = if let Some(candidates) = self.index.get(&digest) {
                let window_bytes = self.rolling.window_bytes();
                let strong = hex::encode(Sha256::digest(&window_bytes));
                candidates
                    .iter()
                    .copied()
                    .find(|&idx| self.table.get(idx).map(|b| b.strong == strong) == Some(true))
            } else {
                None
            };

            if let Some(block_index) = matched {
                if !self.literal_buffer.is_empty() {
                    return Ok(Some(DeltaOp::Literal(std::mem::take(
                        &mut self.literal_buffer,
                    ))));
                }

                let mut window = vec![0u8; self.block_size];
                let read = read_up_to(self.file, &mut window)?;
                window.truncate(read);
                self.rolling.reset_to(&window);
                self.end_of_source = read < self.block_size;
                if read == 0 {
                    self.done = true;
                }

                return Ok(Some(DeltaOp::Copy(block_index)));
            }

            let new_byte = if self.end_of_source {
                None
            } else {
                let mut one = [0u8; 1];
                match self.file.read(&mut one).map_err(|e| SyncError::io("<source>", e))? {
                    1 => Some(one[0]),
                    _ => {
                        self.end_of_source = true;
                        None
                    }
                }
            };

            let old_byte = self.rolling.advance(new_byte);
            self.literal_buffer.push(old_byte);

            if self.rolling.window_len() == 0 {
                self.done = true;
            }
        }
    }
}

/// Read up to `buf.len()` bytes, returning fewer only at genuine EOF.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]).map_err(|e| SyncError::io("<source>", e))? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// Drain a generator into a `Vec<DeltaOp>`; used by tests and by callers
/// that don't need streaming (the framer consumes `next_op` directly).
pub fn collect_ops(generator: &mut PatchGenerator) -> Result<Vec<DeltaOp>> {
    let mut ops = Vec::new();
    while let Some(op) = generator.next_op()? {
        ops.push(op);
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::checksum::compute_table;
    use std::io::{Seek, SeekFrom, Write};

    fn open_rw(content: &[u8]) -> (tempfile::NamedTempFile, File) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();
        let file = File::open(tmp.path()).unwrap();
        (tmp, file)
    }

    /// Apply a generated patch against `old` bytes using `table` (computed
    /// over `old`), mirroring what the applier would do, to check round-trip
    /// correctness without going through HTTP.
    fn apply_ops(ops: &[DeltaOp], old: &[u8], block_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for op in ops {
            match op {
                DeltaOp::Copy(idx) => {
                    let start = *idx as usize * block_size;
                    let end = (start + block_size).min(old.len());
                    out.extend_from_slice(&old[start..end]);
                }
                DeltaOp::Literal(bytes) => out.extend_from_slice(bytes),
            }
        }
        out
    }

    #[test]
    fn empty_source_emits_nothing() {
        let old_content = b"anything";
        let mut old_tmp = tempfile::NamedTempFile::new().unwrap();
        old_tmp.write_all(old_content).unwrap();
        old_tmp.flush().unwrap();
        let table = compute_table(old_tmp.path()).unwrap();

        let (_tmp, mut src) = open_rw(b"");
        let mut gen = PatchGenerator::new(&mut src, &table, 8).unwrap();
        assert_eq!(gen.next_op().unwrap(), None);
    }

    #[test]
    fn identical_small_file_produces_single_copy() {
        let content = b"abcdefgh";
        let mut old_tmp = tempfile::NamedTempFile::new().unwrap();
        old_tmp.write_all(content).unwrap();
        old_tmp.flush().unwrap();
        let table = compute_table(old_tmp.path()).unwrap();

        let (_tmp, mut src) = open_rw(content);
        let mut gen = PatchGenerator::new(&mut src, &table, 8).unwrap();
        let ops = collect_ops(&mut gen).unwrap();
        assert_eq!(ops, vec![DeltaOp::Copy(0)]);
    }

    #[test]
    fn small_source_with_no_destination_is_a_single_literal() {
        let old_tmp = tempfile::NamedTempFile::new().unwrap();
        let table = compute_table(old_tmp.path()).unwrap();
        assert!(table.blocks.is_empty());

        let (_tmp, mut src) = open_rw(b"hello");
        let mut gen = PatchGenerator::new(&mut src, &table, 8).unwrap();
        let ops = collect_ops(&mut gen).unwrap();
        assert_eq!(ops, vec![DeltaOp::Literal(b"hello".to_vec())]);
    }

    #[test]
    fn prepended_byte_round_trips_through_generated_patch() {
        let block_size = 8;
        let old_content = b"AAAAAAAABBBBBBBB".to_vec();
        let new_content = {
            let mut v = b"X".to_vec();
            v.extend_from_slice(&old_content);
            v
        };

        let mut old_tmp = tempfile::NamedTempFile::new().unwrap();
        old_tmp.write_all(&old_content).unwrap();
        old_tmp.flush().unwrap();
        let table = compute_table(old_tmp.path()).unwrap();

        let (_tmp, mut src) = open_rw(&new_content);
        let mut gen = PatchGenerator::new(&mut src, &table, block_size).unwrap();
        let ops = collect_ops(&mut gen).unwrap();

        let reconstructed = apply_ops(&ops, &old_content, block_size);
        assert_eq!(reconstructed, new_content);
    }

    #[test]
    fn fully_rewritten_file_round_trips() {
        let block_size = 8;
        let old_content = b"AAAAAAAABBBBBBBB".to_vec();
        let new_content = b"ZZZZZZZZZZZZZZZZ".to_vec();

        let mut old_tmp = tempfile::NamedTempFile::new().unwrap();
        old_tmp.write_all(&old_content).unwrap();
        old_tmp.flush().unwrap();
        let table = compute_table(old_tmp.path()).unwrap();

        let (_tmp, mut src) = open_rw(&new_content);
        let mut gen = PatchGenerator::new(&mut src, &table, block_size).unwrap();
        let ops = collect_ops(&mut gen).unwrap();

        let reconstructed = apply_ops(&ops, &old_content, block_size);
        assert_eq!(reconstructed, new_content);
    }

    #[test]
    fn seek_reset_not_required_between_generators() {
        // Sanity: the generator reads `file` linearly from its current
        // position; callers must open/seek as needed before constructing it.
        let content = b"0123456789";
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();
        let mut file = File::open(tmp.path()).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let old_tmp = tempfile::NamedTempFile::new().unwrap();
        let table = compute_table(old_tmp.path()).unwrap();
        let mut gen = PatchGenerator::new(&mut file, &table, 4).unwrap();
        let ops = collect_ops(&mut gen).unwrap();
        let total_bytes: usize = ops
            .iter()
            .map(|op| match op {
                DeltaOp::Literal(b) => b.len(),
                DeltaOp::Copy(_) => 0,
            })
            .sum();
        assert_eq!(total_bytes, content.len());
    }
}
