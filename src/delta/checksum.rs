use super::rolling::RollingChecksum;
use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Block size: 1 MiB, fixed (see module constants).
pub const BLOCK_SIZE: usize = 0x100000;

/// One block's pair of checksums, at a known index/offset in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockChecksum {
    pub index: u64,
    pub offset: u64,
    pub size: usize,
    pub rolling: u32,
    pub strong: String,
}

/// The destination's checksum table for one file: parallel rolling/strong
/// sequences, indexed by block position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTable {
    pub blocks: Vec<BlockChecksum>,
}

impl BlockTable {
    /// Build a multimap from rolling checksum to candidate block indices,
    /// used by the patch generator to find candidate matches in O(1)
    /// expected time per window position.
    pub fn rolling_index(&self) -> HashMap<u32, Vec<u64>> {
        let mut index: HashMap<u32, Vec<u64>> = HashMap::new();
        for block in &self.blocks {
            index.entry(block.rolling).or_default().push(block.index);
        }
        index
    }

    pub fn get(&self, index: u64) -> Option<&BlockChecksum> {
        self.blocks.get(index as usize)
    }
}

/// Compute the block-checksum table for `path`, fixed at `BLOCK_SIZE`-byte
/// blocks. A missing path yields an empty table (matches `/block_checksums`'s
/// "empty pair if file absent" contract); any other I/O failure propagates.
pub fn compute_table(path: &Path) -> Result<BlockTable> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BlockTable::default()),
        Err(e) => return Err(SyncError::io(path, e)),
    };

    let mut blocks = Vec::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];
    let mut offset = 0u64;
    let mut index = 0u64;

    loop {
        let bytes_read = read_full(&mut file, &mut buffer).map_err(|e| SyncError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        let block = &buffer[..bytes_read];
        let rolling = RollingChecksum::hash(block);
        let strong = hex::encode(Sha256::digest(block));

        blocks.push(BlockChecksum {
            index,
            offset,
            size: bytes_read,
            rolling,
            strong,
        });

        offset += bytes_read as u64;
        index += 1;
    }

    Ok(BlockTable { blocks })
}

/// Read up to `buf.len()` bytes, returning fewer only at end-of-file (unlike
/// a bare `Read::read`, which may return a short read before EOF for some
/// readers; blocks must be read in full except for a genuine tail).
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}
