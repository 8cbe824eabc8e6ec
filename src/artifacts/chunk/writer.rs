//! Table-of-contents writing
//!
//! Builders register every chunk up front with its exact size and a closure that
//! produces the bytes. The table can then be written before any body, and each body
//! is checked against its declared size as soon as it has been written.

use crate::artifacts::chunk::CHUNK_TABLE_ENTRY_SIZE;
use crate::artifacts::chunk::checksum::Checksum;
use crate::artifacts::chunk::chunk_id_str;
use byteorder::{NetworkEndian, WriteBytesExt};
use std::io::Write;

type FillFn<'a, W> = Box<dyn FnOnce(&mut Checksum<W>) -> anyhow::Result<()> + 'a>;

struct PendingChunk<'a, W: Write> {
    id: u32,
    size: u64,
    fill: FillFn<'a, W>,
}

pub struct ChunkWriter<'a, W: Write> {
    chunks: Vec<PendingChunk<'a, W>>,
}

impl<'a, W: Write> ChunkWriter<'a, W> {
    pub fn new() -> Self {
        ChunkWriter { chunks: Vec::new() }
    }

    /// Register a chunk
    ///
    /// # Panics
    ///
    /// Registering the same id twice is a builder defect.
    pub fn add_chunk(
        &mut self,
        id: u32,
        size: u64,
        fill: impl FnOnce(&mut Checksum<W>) -> anyhow::Result<()> + 'a,
    ) {
        assert!(
            self.chunks.iter().all(|chunk| chunk.id != id),
            "BUG: chunk {} registered twice",
            chunk_id_str(id)
        );

        self.chunks.push(PendingChunk {
            id,
            size,
            fill: Box::new(fill),
        });
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Write the table of contents followed by every chunk body
    ///
    /// The header must already be in `out`; offsets are computed from its length.
    ///
    /// # Panics
    ///
    /// A fill closure that writes a different number of bytes than declared is a
    /// builder defect and aborts the write.
    pub fn write(self, out: &mut Checksum<W>) -> anyhow::Result<()> {
        let mut offset =
            out.written() + ((self.chunks.len() + 1) * CHUNK_TABLE_ENTRY_SIZE) as u64;

        for chunk in &self.chunks {
            out.write_u32::<NetworkEndian>(chunk.id)?;
            out.write_u64::<NetworkEndian>(offset)?;
            offset += chunk.size;
        }
        out.write_u32::<NetworkEndian>(0)?;
        out.write_u64::<NetworkEndian>(offset)?;

        for chunk in self.chunks {
            let start = out.written();
            (chunk.fill)(out)?;
            let written = out.written() - start;

            assert_eq!(
                written,
                chunk.size,
                "BUG: expected to write {} bytes to chunk {}, but wrote {} instead",
                chunk.size,
                chunk_id_str(chunk.id),
                written
            );
        }

        Ok(())
    }
}

impl<W: Write> Default for ChunkWriter<'_, W> {
    fn default() -> Self {
        Self::new()
    }
}
