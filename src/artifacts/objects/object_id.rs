//! Object identifier (SHA-1 hash)
//!
//! Object IDs are kept in their raw 20-byte form because every binary index file
//! stores and compares them that way. The hexadecimal form is only produced for
//! display, loose object paths, and text files such as the commit-graph chain.
//!
//! ## Format
//!
//! - Raw: 20 bytes, ordered bytewise (the order used by every lookup table)
//! - Full: 40 hex characters (e.g., "abc123...def")
//! - Short: First 7 characters (e.g., "abc123")
//!
//! ## Storage
//!
//! Loose objects are stored in `.git/objects/<first-2-chars>/<remaining-38-chars>`

use crate::artifacts::objects::{OBJECT_ID_LENGTH, OBJECT_ID_RAW_LENGTH};
use std::io;
use std::path::PathBuf;

/// Object identifier (SHA-1 hash)
///
/// The derived ordering compares the raw bytes, which matches the ordering of the
/// hexadecimal form and the order required by fanout tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ObjectId([u8; OBJECT_ID_RAW_LENGTH]);

impl ObjectId {
    /// Parse and validate an object ID from its hexadecimal form
    ///
    /// # Arguments
    ///
    /// * `id` - 40-character hexadecimal string
    ///
    /// # Returns
    ///
    /// Validated ObjectId or error if invalid length/characters
    pub fn try_parse(id: String) -> anyhow::Result<Self> {
        if id.len() != OBJECT_ID_LENGTH {
            return Err(anyhow::anyhow!("Invalid object ID length: {}", id.len()));
        }
        if !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow::anyhow!("Invalid object ID characters: {}", id));
        }

        let mut raw = [0u8; OBJECT_ID_RAW_LENGTH];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&id[i * 2..i * 2 + 2], 16)?;
        }

        Ok(Self(raw))
    }

    /// Build an object ID from raw hash bytes
    ///
    /// Fails when the slice is not exactly one hash long.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let raw: [u8; OBJECT_ID_RAW_LENGTH] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid raw object ID length: {}", bytes.len()))?;
        Ok(Self(raw))
    }

    pub fn from_raw(raw: [u8; OBJECT_ID_RAW_LENGTH]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_RAW_LENGTH] {
        &self.0
    }

    /// First byte of the hash, the bucket used by fanout tables
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Write the object ID in binary format (20 bytes)
    ///
    /// Used when serializing tree objects and the lookup chunks of index files.
    pub fn write_h40_to<W: io::Write + ?Sized>(&self, writer: &mut W) -> anyhow::Result<()> {
        writer.write_all(&self.0)?;
        Ok(())
    }

    /// Read an object ID from binary format (20 bytes)
    pub fn read_h40_from<R: io::Read + ?Sized>(reader: &mut R) -> anyhow::Result<Self> {
        let mut raw = [0u8; OBJECT_ID_RAW_LENGTH];
        reader.read_exact(&mut raw)?;
        Ok(Self(raw))
    }

    /// Convert to file system path for loose object storage
    ///
    /// Splits the hash as `XX/YYYYYY...` where XX is the first 2 chars.
    pub fn to_path(&self) -> PathBuf {
        let hex = self.to_string();
        let (dir, file) = hex.split_at(2);
        PathBuf::from(dir).join(file)
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
