//! Multi-pack reverse index (`multi-pack-index-<hex>.rev`)
//!
//! Lists MIDX positions in pack order: objects of the preferred pack first, then the
//! other packs by int id, each pack by increasing offset. The file is tied to one MIDX
//! by embedding its checksum and by its name.
//!
//! ```text
//! "RIDX" | version: u32 = 1 | hash version: u32 = 1
//! position: u32, one per object
//! MIDX checksum | own checksum
//! ```

use crate::artifacts::chunk::checksum::Checksum;
use crate::artifacts::chunk::{CHECKSUM_SIZE, FileData, be32, checksum};
use crate::artifacts::format_error::FormatError;
use crate::artifacts::midx::MIDX_FILE;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::{HASH_VERSION_SHA1, OBJECT_ID_RAW_LENGTH};
use crate::artifacts::pack::pack_dir;
use anyhow::Context;
use byteorder::{NetworkEndian, WriteBytesExt};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const RIDX_SIGNATURE: u32 = 0x5249_4458; // "RIDX"
pub const RIDX_VERSION: u32 = 1;
const RIDX_HEADER_SIZE: usize = 12;

/// MIDX positions sorted into pack order
///
/// `entries[position]` is the pack int id and offset of that MIDX position.
pub fn pack_order(entries: &[(u32, u64)], preferred: Option<u32>) -> Vec<u32> {
    let mut order = (0..entries.len() as u32).collect::<Vec<_>>();
    order.sort_by_key(|&position| {
        let (pack, offset) = entries[position as usize];
        (Some(pack) != preferred, pack, offset)
    });
    order
}

pub fn write_rev_index<W: Write>(
    out: W,
    order: &[u32],
    midx_checksum: &ObjectId,
) -> anyhow::Result<(W, ObjectId)> {
    let mut out = Checksum::new(out);
    out.write_u32::<NetworkEndian>(RIDX_SIGNATURE)?;
    out.write_u32::<NetworkEndian>(RIDX_VERSION)?;
    out.write_u32::<NetworkEndian>(HASH_VERSION_SHA1 as u32)?;
    for &position in order {
        out.write_u32::<NetworkEndian>(position)?;
    }
    midx_checksum.write_h40_to(&mut out)?;
    Ok(out.write_checksum()?)
}

#[derive(Debug)]
pub struct RevIndex {
    data: FileData,
}

impl RevIndex {
    pub fn open(path: &Path) -> Result<Self, FormatError> {
        Self::parse(FileData::open(path)?)
    }

    pub fn parse(data: FileData) -> Result<Self, FormatError> {
        if data.len() < RIDX_HEADER_SIZE + 2 * CHECKSUM_SIZE {
            return Err(FormatError::corrupt("reverse index is too small"));
        }
        let signature = be32(&data, 0);
        if signature != RIDX_SIGNATURE {
            return Err(FormatError::corrupt(format!(
                "reverse index signature 0x{signature:08x} does not match 0x{RIDX_SIGNATURE:08x}"
            )));
        }
        let version = be32(&data, 4);
        if version != RIDX_VERSION {
            return Err(FormatError::corrupt(format!(
                "reverse index version {version} not recognized"
            )));
        }
        if (data.len() - RIDX_HEADER_SIZE - 2 * CHECKSUM_SIZE) % 4 != 0 {
            return Err(FormatError::corrupt("reverse index has a partial entry"));
        }
        Ok(RevIndex { data })
    }

    pub fn len(&self) -> usize {
        (self.data.len() - RIDX_HEADER_SIZE - 2 * CHECKSUM_SIZE) / 4
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn positions(&self) -> Vec<u32> {
        (0..self.len())
            .map(|i| be32(&self.data, RIDX_HEADER_SIZE + i * 4))
            .collect()
    }

    pub fn midx_checksum(&self) -> ObjectId {
        let start = self.data.len() - 2 * CHECKSUM_SIZE;
        let mut raw = [0u8; OBJECT_ID_RAW_LENGTH];
        raw.copy_from_slice(&self.data[start..start + CHECKSUM_SIZE]);
        ObjectId::from_raw(raw)
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::verify(&self.data)
    }
}

/// Delete every MIDX reverse index except `keep`
pub fn clear_stale_rev_indexes(objects_dir: &Path, keep: Option<&Path>) -> anyhow::Result<Vec<PathBuf>> {
    let dir = pack_dir(objects_dir);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let prefix = format!("{MIDX_FILE}-");
    let stale = WalkDir::new(&dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".rev"))
        })
        .map(|entry| entry.into_path())
        .filter(|path| Some(path.as_path()) != keep)
        .collect::<Vec<_>>();

    let mut removed = Vec::new();
    for path in stale {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed stale reverse index");
                removed.push(path);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("unable to remove {}", path.display()));
            }
        }
    }

    Ok(removed)
}
