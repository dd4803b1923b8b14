//! Block-file format with per-block zstd frames and O(1) random access.
//!
//! File layout:
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ HEADER (16 bytes, uncompressed)                         │
//! │   magic: [u8; 4]              = b"FQB1"                 │
//! │   version: u16                = 1                       │
//! │   block_count: u16                                      │
//! │   _reserved: [u8; 8]          = [0; 8]                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ INDEX TABLE (block_count × 24 bytes, uncompressed)      │
//! │   Per block:                                            │
//! │     offset: u64   (byte position in file)               │
//! │     compressed_len: u64                                 │
//! │     timestamp: i64                                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ BLOCK FRAMES (variable, each an independent zstd)       │
//! │   zstd(bincode(Vec<BlockEntry>_0))                      │
//! │   zstd(bincode(Vec<BlockEntry>_1))                      │
//! │   ...                                                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! A block is the set of flow entries one capture window produced on one
//! interface; the index timestamp is the window's end.

use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::counters::Counters;
use crate::types::key::valid_key_len;

const MAGIC: [u8; 4] = *b"FQB1";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 16;
const INDEX_ENTRY_SIZE: usize = 24; // offset: u64 + compressed_len: u64 + timestamp: i64

/// One decoded flow record: raw key bytes plus its counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub key: Vec<u8>,
    pub counters: Counters,
}

/// Reader for block files with per-block random access.
pub struct BlockFile {
    block_count: usize,
    /// (byte_offset, compressed_len, timestamp) for each block frame.
    index: Vec<(u64, u64, i64)>,
    /// Raw file data, kept in memory for reading individual frames.
    data: Vec<u8>,
}

impl BlockFile {
    /// Opens a block file and reads only the header + index (no block
    /// decompression).
    pub fn open(path: &Path) -> io::Result<Self> {
        let data = std::fs::read(path)?;

        if data.len() < HEADER_SIZE {
            return Err(io::Error::other("file too small for header"));
        }

        let magic = &data[0..4];
        if magic != MAGIC {
            return Err(io::Error::other(format!(
                "invalid magic: expected FQB1, got {:?}",
                magic
            )));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(io::Error::other(format!(
                "unsupported version: {}",
                version
            )));
        }

        let block_count = u16::from_le_bytes([data[6], data[7]]) as usize;
        // bytes 8..16 = reserved

        let index_size = block_count * INDEX_ENTRY_SIZE;
        if data.len() < HEADER_SIZE + index_size {
            return Err(io::Error::other("file too small for index"));
        }

        let mut index = Vec::with_capacity(block_count);
        for i in 0..block_count {
            let base = HEADER_SIZE + i * INDEX_ENTRY_SIZE;
            let offset = u64::from_le_bytes(data[base..base + 8].try_into().unwrap());
            let compressed_len = u64::from_le_bytes(data[base + 8..base + 16].try_into().unwrap());
            let timestamp = i64::from_le_bytes(data[base + 16..base + 24].try_into().unwrap());
            index.push((offset, compressed_len, timestamp));
        }

        Ok(Self {
            block_count,
            index,
            data,
        })
    }

    /// Returns the number of blocks in this file.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Size of the raw file on disk.
    pub fn file_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns timestamps of all blocks from the index table.
    pub fn timestamps(&self) -> Vec<i64> {
        self.index.iter().map(|(_, _, ts)| *ts).collect()
    }

    /// Size of the compressed frame at `idx`.
    pub fn compressed_len(&self, idx: usize) -> u64 {
        self.index.get(idx).map(|(_, l, _)| *l).unwrap_or(0)
    }

    /// Reads and decompresses a single block. Entries with an invalid key
    /// width make the whole block corrupt.
    pub fn read_block(&self, idx: usize) -> io::Result<Vec<BlockEntry>> {
        self.read_block_sized(idx).map(|(entries, _)| entries)
    }

    /// Like [`read_block`](Self::read_block) but also returns the
    /// decompressed frame size for the query statistics.
    pub fn read_block_sized(&self, idx: usize) -> io::Result<(Vec<BlockEntry>, u64)> {
        if idx >= self.block_count {
            return Err(io::Error::other(format!(
                "block index {} out of range (count={})",
                idx, self.block_count
            )));
        }

        let (offset, compressed_len, _timestamp) = self.index[idx];
        let start = offset as usize;
        let end = start + compressed_len as usize;

        if end > self.data.len() {
            return Err(io::Error::other("block frame extends past end of file"));
        }

        let decompressed = zstd::decode_all(&self.data[start..end])?;
        let entries: Vec<BlockEntry> =
            bincode::deserialize(&decompressed).map_err(io::Error::other)?;

        for entry in &entries {
            if !valid_key_len(entry.key.len()) {
                return Err(io::Error::other(format!(
                    "corrupt entry: key length {}",
                    entry.key.len()
                )));
            }
        }

        Ok((entries, decompressed.len() as u64))
    }
}

/// Writes block frames in the block-file format.
///
/// Each block is stored as an independent zstd frame for O(1) random
/// access. The file is written atomically via a `.tmp` intermediate file.
pub fn write_blocks(path: &Path, blocks: &[(i64, Vec<BlockEntry>)]) -> io::Result<()> {
    if blocks.is_empty() {
        return Err(io::Error::other("cannot write empty block file"));
    }
    if blocks.len() > u16::MAX as usize {
        return Err(io::Error::other("too many blocks for file format"));
    }

    let tmp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp_path)?;

    let block_count = blocks.len() as u16;

    // Placeholder header + index, rewritten once the offsets are known.
    file.write_all(&[0u8; HEADER_SIZE])?;
    file.write_all(&vec![0u8; block_count as usize * INDEX_ENTRY_SIZE])?;

    let mut index_entries: Vec<(u64, u64, i64)> = Vec::with_capacity(block_count as usize);

    for (timestamp, entries) in blocks {
        let offset = file.stream_position()?;
        let raw = bincode::serialize(entries).map_err(io::Error::other)?;
        let compressed = zstd::encode_all(&raw[..], 3)?;
        file.write_all(&compressed)?;
        index_entries.push((offset, compressed.len() as u64, *timestamp));
    }

    file.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6..8].copy_from_slice(&block_count.to_le_bytes());
    // bytes 8..16 = reserved (zeros)
    file.write_all(&header)?;

    for (offset, compressed_len, timestamp) in &index_entries {
        file.write_all(&offset.to_le_bytes())?;
        file.write_all(&compressed_len.to_le_bytes())?;
        file.write_all(&timestamp.to_le_bytes())?;
    }

    file.sync_all()?;
    drop(file);

    std::fs::rename(tmp_path, path)?;

    Ok(())
}
