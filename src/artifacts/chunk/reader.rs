//! Table-of-contents parsing
//!
//! The chunk table is the only place where raw file offsets are trusted. Once a table
//! is parsed, each chunk is a byte range that lies inside the file and before the
//! trailing checksum, so higher layers index into chunk slices without redoing bounds
//! checks of their own.

use crate::artifacts::chunk::{CHECKSUM_SIZE, CHUNK_TABLE_ENTRY_SIZE, be32, be64, chunk_id_str};
use crate::artifacts::format_error::FormatError;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTable {
    chunks: Vec<(u32, Range<usize>)>,
}

impl ChunkTable {
    /// Parse `num_chunks` entries plus the terminating entry starting at `table_offset`
    ///
    /// Fails if the table runs past the data, if an offset points before the end of the
    /// table or into the trailing checksum, if offsets go backwards, or if a chunk id
    /// appears twice.
    pub fn parse(data: &[u8], table_offset: usize, num_chunks: usize) -> Result<Self, FormatError> {
        let data_end = data
            .len()
            .checked_sub(CHECKSUM_SIZE)
            .ok_or_else(|| FormatError::corrupt("file too small for a checksum"))?;
        let table_end = table_offset + (num_chunks + 1) * CHUNK_TABLE_ENTRY_SIZE;
        if table_end > data_end {
            return Err(FormatError::corrupt(format!(
                "chunk table with {num_chunks} entries extends past end of data"
            )));
        }

        let mut entries = Vec::with_capacity(num_chunks + 1);
        for i in 0..=num_chunks {
            let at = table_offset + i * CHUNK_TABLE_ENTRY_SIZE;
            let id = be32(data, at);
            let offset = be64(data, at + 4);

            if offset > data_end as u64 || offset < table_end as u64 {
                return Err(FormatError::corrupt(format!(
                    "improper chunk offset {offset:08x}"
                )));
            }
            if i < num_chunks && id == 0 {
                return Err(FormatError::corrupt(
                    "terminating chunk id appears earlier than expected",
                ));
            }
            if i == num_chunks && id != 0 {
                return Err(FormatError::corrupt(format!(
                    "final chunk has non-zero id {id:08x}"
                )));
            }

            entries.push((id, offset as usize));
        }

        let mut chunks: Vec<(u32, Range<usize>)> = Vec::with_capacity(num_chunks);
        for pair in entries.windows(2) {
            let ((id, start), (_, end)) = (pair[0], pair[1]);
            if end < start {
                return Err(FormatError::corrupt(format!(
                    "chunk offsets out of order at chunk {}",
                    chunk_id_str(id)
                )));
            }
            if chunks.iter().any(|(seen, _)| *seen == id) {
                return Err(FormatError::corrupt(format!(
                    "duplicate chunk id {}",
                    chunk_id_str(id)
                )));
            }
            chunks.push((id, start..end));
        }

        Ok(ChunkTable { chunks })
    }

    pub fn get(&self, id: u32) -> Option<Range<usize>> {
        self.chunks
            .iter()
            .find(|(chunk_id, _)| *chunk_id == id)
            .map(|(_, range)| range.clone())
    }

    /// Range of a mandatory chunk
    pub fn require(&self, id: u32) -> Result<Range<usize>, FormatError> {
        self.get(id).ok_or_else(|| {
            FormatError::corrupt(format!("missing required chunk {}", chunk_id_str(id)))
        })
    }

    /// Chunk ids in table order
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.chunks.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Check that a chunk holds exactly `expected` bytes
pub fn expect_size(id: u32, range: &Range<usize>, expected: usize) -> Result<(), FormatError> {
    if range.len() != expected {
        return Err(FormatError::corrupt(format!(
            "chunk {} has {} bytes, expected {}",
            chunk_id_str(id),
            range.len(),
            expected
        )));
    }
    Ok(())
}
