//! Chunked container format
//!
//! Both the commit-graph and the multi-pack-index are laid out the same way: a small
//! format-specific header, a table of contents, the chunk bodies, and a trailing hash
//! of everything before it.
//!
//! ## Layout
//!
//! ```text
//! +---------------------------+
//! | Header (format specific)  |
//! +---------------------------+
//! | Chunk table               |  (num_chunks + 1) x [id: u32 | offset: u64]
//! |   ...                     |  last entry: id 0, offset = end of chunk data
//! +---------------------------+
//! | Chunk bodies              |  each starting at its table offset
//! +---------------------------+
//! | SHA-1 of all of the above |  20 bytes
//! +---------------------------+
//! ```
//!
//! All integers are big-endian. Chunk sizes are multiples of four bytes.

pub mod checksum;
pub mod reader;
pub mod writer;

use crate::artifacts::format_error::FormatError;
use byteorder::{ByteOrder, NetworkEndian};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

pub const CHECKSUM_SIZE: usize = 20; // SHA-1 trailer
pub const CHUNK_TABLE_ENTRY_SIZE: usize = 12; // u32 id + u64 offset
pub const CHUNK_ALIGNMENT: usize = 4;

/// Bytes backing a loaded index file
///
/// Files are memory-mapped read-only; tests and in-memory callers hand over owned buffers.
/// A mapping stays valid after the file is renamed or unlinked.
#[derive(Debug)]
pub enum FileData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl FileData {
    pub fn open(path: &Path) -> Result<Self, FormatError> {
        let file = File::open(path).map_err(|err| FormatError::io(path, err))?;
        let len = file
            .metadata()
            .map_err(|err| FormatError::io(path, err))?
            .len();

        if len == 0 {
            return Ok(FileData::Owned(Vec::new()));
        }

        // SAFETY: index files are never modified in place, only replaced by rename.
        let map = unsafe { Mmap::map(&file) }.map_err(|err| FormatError::io(path, err))?;
        Ok(FileData::Mapped(map))
    }
}

impl Deref for FileData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileData::Mapped(map) => map,
            FileData::Owned(bytes) => bytes,
        }
    }
}

impl From<Vec<u8>> for FileData {
    fn from(bytes: Vec<u8>) -> Self {
        FileData::Owned(bytes)
    }
}

/// Render a chunk id as its four ASCII characters
pub fn chunk_id_str(id: u32) -> String {
    id.to_be_bytes().iter().map(|&b| b as char).collect()
}

pub(crate) fn be32(data: &[u8], offset: usize) -> u32 {
    NetworkEndian::read_u32(&data[offset..offset + 4])
}

pub(crate) fn be64(data: &[u8], offset: usize) -> u64 {
    NetworkEndian::read_u64(&data[offset..offset + 8])
}

/// Round a length up to the chunk alignment
pub fn align(len: usize) -> usize {
    len.div_ceil(CHUNK_ALIGNMENT) * CHUNK_ALIGNMENT
}
