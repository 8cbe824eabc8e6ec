//! Pack index (`.idx`) version 2
//!
//! ## Layout
//!
//! ```text
//! +------------------------------------------+
//! | ff 74 4f 63 | version: u32 = 2           |
//! +------------------------------------------+
//! | fanout, 256 x u32                        |
//! | sorted object ids                        |
//! | CRC32 per object                         |
//! | offset per object, u32                   |  high bit set: index into the next table
//! | large offsets, u64                       |
//! +------------------------------------------+
//! | pack checksum | index checksum           |
//! +------------------------------------------+
//! ```

use crate::artifacts::chunk::checksum::{self, Checksum};
use crate::artifacts::chunk::{CHECKSUM_SIZE, FileData, be32, be64};
use crate::artifacts::fanout::{FANOUT_SIZE, FanoutLookup, write_fanout, write_lookup};
use crate::artifacts::format_error::FormatError;
use crate::artifacts::objects::OBJECT_ID_RAW_LENGTH;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::store::PackEntry;
use byteorder::{NetworkEndian, WriteBytesExt};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const PACK_IDX_SIGNATURE: u32 = 0xff74_4f63;
pub const PACK_IDX_VERSION: u32 = 2;

const HEADER_SIZE: usize = 8;
const LARGE_OFFSET_NEEDED: u32 = 0x8000_0000;
const MAX_SMALL_OFFSET: u64 = 0x7fff_ffff;

#[derive(Debug)]
pub struct PackIndex {
    data: FileData,
    path: Option<PathBuf>,
    num_objects: u32,
    oid_lookup: Range<usize>,
    offsets: Range<usize>,
    large_offsets: Range<usize>,
}

impl PackIndex {
    pub fn open(path: &Path) -> Result<Self, FormatError> {
        let mut index = Self::parse(FileData::open(path)?)?;
        index.path = Some(path.to_path_buf());
        Ok(index)
    }

    pub fn parse(data: FileData) -> Result<Self, FormatError> {
        let min_size = HEADER_SIZE + FANOUT_SIZE + 2 * CHECKSUM_SIZE;
        if data.len() < min_size {
            return Err(FormatError::corrupt(format!(
                "pack index is too small ({} bytes)",
                data.len()
            )));
        }

        let signature = be32(&data, 0);
        if signature != PACK_IDX_SIGNATURE {
            return Err(FormatError::corrupt(format!(
                "pack index signature {signature:08x} is not {PACK_IDX_SIGNATURE:08x}"
            )));
        }
        let version = be32(&data, 4);
        if version != PACK_IDX_VERSION {
            return Err(FormatError::corrupt(format!(
                "pack index version {version} is not supported"
            )));
        }

        let fanout = HEADER_SIZE..HEADER_SIZE + FANOUT_SIZE;
        let num_objects = be32(&data[fanout.clone()], FANOUT_SIZE - 4);
        let n = num_objects as usize;

        let oid_lookup = fanout.end..fanout.end + n * OBJECT_ID_RAW_LENGTH;
        let crcs = oid_lookup.end..oid_lookup.end + n * 4;
        let offsets = crcs.end..crcs.end + n * 4;
        let trailer = data.len() - 2 * CHECKSUM_SIZE;

        if offsets.end > trailer {
            return Err(FormatError::corrupt(format!(
                "pack index announces {num_objects} objects but is only {} bytes",
                data.len()
            )));
        }
        let large_offsets = offsets.end..trailer;
        if large_offsets.len() % 8 != 0 {
            return Err(FormatError::corrupt(
                "pack index large offset table is not a multiple of 8 bytes",
            ));
        }

        FanoutLookup::new(&data[fanout], &data[oid_lookup.clone()])?;

        Ok(PackIndex {
            data,
            path: None,
            num_objects,
            oid_lookup,
            offsets,
            large_offsets,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    fn lookup(&self) -> FanoutLookup<'_> {
        FanoutLookup::from_validated(
            &self.data[HEADER_SIZE..HEADER_SIZE + FANOUT_SIZE],
            &self.data[self.oid_lookup.clone()],
        )
    }

    pub fn locate(&self, oid: &ObjectId) -> Option<u32> {
        self.lookup().locate(oid)
    }

    pub fn oid_at(&self, position: u32) -> ObjectId {
        self.lookup().oid_at(position)
    }

    pub fn offset_at(&self, position: u32) -> Result<u64, FormatError> {
        let offset = be32(&self.data[self.offsets.clone()], position as usize * 4);
        if offset & LARGE_OFFSET_NEEDED == 0 {
            return Ok(offset as u64);
        }

        let index = (offset & !LARGE_OFFSET_NEEDED) as usize;
        let large = &self.data[self.large_offsets.clone()];
        if (index + 1) * 8 > large.len() {
            return Err(FormatError::corrupt(format!(
                "pack index large offset {index} is out of bounds"
            )));
        }
        Ok(be64(large, index * 8))
    }

    pub fn find_offset(&self, oid: &ObjectId) -> Result<Option<u64>, FormatError> {
        self.locate(oid)
            .map(|position| self.offset_at(position))
            .transpose()
    }

    /// Every entry, sorted by id
    pub fn entries(&self) -> Result<Vec<PackEntry>, FormatError> {
        (0..self.num_objects)
            .map(|position| Ok(PackEntry::new(self.oid_at(position), self.offset_at(position)?)))
            .collect()
    }

    /// Checksum of the `.pack` file this index describes
    pub fn pack_checksum(&self) -> ObjectId {
        let start = self.data.len() - 2 * CHECKSUM_SIZE;
        let mut raw = [0u8; OBJECT_ID_RAW_LENGTH];
        raw.copy_from_slice(&self.data[start..start + CHECKSUM_SIZE]);
        ObjectId::from_raw(raw)
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::verify(&self.data)
    }
}

/// Write a version 2 index for `entries`
///
/// CRCs are written as zero; nothing here reads pack data.
pub fn write_pack_index<W: Write>(
    out: W,
    entries: &[PackEntry],
    pack_checksum: &ObjectId,
) -> anyhow::Result<(W, ObjectId)> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|entry| entry.oid);
    sorted.dedup_by_key(|entry| entry.oid);
    let oids = sorted.iter().map(|entry| entry.oid).collect::<Vec<_>>();

    let mut out = Checksum::new(out);
    out.write_u32::<NetworkEndian>(PACK_IDX_SIGNATURE)?;
    out.write_u32::<NetworkEndian>(PACK_IDX_VERSION)?;
    write_fanout(&mut out, &oids)?;
    write_lookup(&mut out, &oids)?;
    for _ in &sorted {
        out.write_u32::<NetworkEndian>(0)?;
    }

    let mut large = Vec::new();
    for entry in &sorted {
        match entry.offset > MAX_SMALL_OFFSET {
            true => {
                out.write_u32::<NetworkEndian>(LARGE_OFFSET_NEEDED | large.len() as u32)?;
                large.push(entry.offset);
            }
            false => out.write_u32::<NetworkEndian>(entry.offset as u32)?,
        }
    }
    for offset in large {
        out.write_u64::<NetworkEndian>(offset)?;
    }

    pack_checksum.write_h40_to(&mut out)?;
    Ok(out.write_checksum()?)
}
