use crate::artifacts::chunk::reader::{ChunkTable, expect_size};
use crate::artifacts::chunk::{FileData, be32, be64, checksum};
use crate::artifacts::fanout::FanoutLookup;
use crate::artifacts::format_error::FormatError;
use crate::artifacts::midx::{
    MIDX_CHUNK_LARGE_OFFSET_WIDTH, MIDX_CHUNK_OFFSET_WIDTH, MIDX_CHUNKID_LARGEOFFSETS,
    MIDX_CHUNKID_OBJECTOFFSETS, MIDX_CHUNKID_OIDFANOUT, MIDX_CHUNKID_OIDLOOKUP,
    MIDX_CHUNKID_PACKNAMES, MIDX_HEADER_SIZE, MIDX_LARGE_OFFSET_NEEDED, MIDX_MIN_SIZE,
    MIDX_SIGNATURE, MIDX_VERSION,
};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::{HASH_VERSION_SHA1, HASH_VERSION_SHA256};
use crate::artifacts::pack::normalize_idx_name;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Where the multi-pack-index says an object lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidxEntry {
    pub pack_int_id: u32,
    pub offset: u64,
}

/// A loaded multi-pack-index
#[derive(Debug)]
pub struct MultiPackIndex {
    data: FileData,
    path: Option<PathBuf>,
    version: u8,
    hash_version: u8,
    num_chunks: u8,
    pack_names: Vec<String>,
    chunk_ids: Vec<u32>,
    oid_fanout: Range<usize>,
    oid_lookup: Range<usize>,
    object_offsets: Range<usize>,
    large_offsets: Option<Range<usize>>,
}

impl MultiPackIndex {
    pub fn open(path: &Path) -> Result<Self, FormatError> {
        let mut midx = Self::parse(FileData::open(path)?)?;
        midx.path = Some(path.to_path_buf());
        Ok(midx)
    }

    pub fn parse(data: FileData) -> Result<Self, FormatError> {
        if data.len() < MIDX_MIN_SIZE {
            return Err(FormatError::corrupt(format!(
                "multi-pack-index file is too small ({} bytes)",
                data.len()
            )));
        }

        let signature = be32(&data, 0);
        if signature != MIDX_SIGNATURE {
            return Err(FormatError::corrupt(format!(
                "multi-pack-index signature 0x{signature:08x} does not match signature 0x{MIDX_SIGNATURE:08x}"
            )));
        }

        let version = data[4];
        if version != MIDX_VERSION {
            return Err(FormatError::corrupt(format!(
                "multi-pack-index version {version} not recognized"
            )));
        }

        let hash_version = data[5];
        match hash_version {
            HASH_VERSION_SHA1 => {}
            HASH_VERSION_SHA256 => {
                return Err(FormatError::Incompatible(
                    "multi-pack-index uses SHA-256 object ids".to_string(),
                ));
            }
            other => {
                return Err(FormatError::corrupt(format!(
                    "multi-pack-index hash version {other} does not match version {HASH_VERSION_SHA1}"
                )));
            }
        }

        let num_chunks = data[6];
        // data[7] counts base files, always zero
        let num_packs = be32(&data, 8);

        let table = ChunkTable::parse(&data, MIDX_HEADER_SIZE, num_chunks as usize)?;
        let required = |id: u32, what: &str| {
            table.get(id).ok_or_else(|| {
                FormatError::corrupt(format!("multi-pack-index missing required {what} chunk"))
            })
        };
        let pack_names = required(MIDX_CHUNKID_PACKNAMES, "pack-name")?;
        let oid_fanout = required(MIDX_CHUNKID_OIDFANOUT, "OID fanout")?;
        let oid_lookup = required(MIDX_CHUNKID_OIDLOOKUP, "OID lookup")?;
        let object_offsets = required(MIDX_CHUNKID_OBJECTOFFSETS, "object offsets")?;

        let num_objects = FanoutLookup::new(&data[oid_fanout.clone()], &data[oid_lookup.clone()])?
            .count();
        expect_size(
            MIDX_CHUNKID_OBJECTOFFSETS,
            &object_offsets,
            num_objects as usize * MIDX_CHUNK_OFFSET_WIDTH,
        )?;

        let large_offsets = table.get(MIDX_CHUNKID_LARGEOFFSETS);
        if let Some(large) = &large_offsets
            && large.len() % MIDX_CHUNK_LARGE_OFFSET_WIDTH != 0
        {
            return Err(FormatError::corrupt(format!(
                "multi-pack-index large offset chunk has {} bytes, not a multiple of 8",
                large.len()
            )));
        }

        let names = parse_pack_names(&data[pack_names], num_packs)?;

        Ok(MultiPackIndex {
            data,
            path: None,
            version,
            hash_version,
            num_chunks,
            pack_names: names,
            chunk_ids: table.ids().collect(),
            oid_fanout,
            oid_lookup,
            object_offsets,
            large_offsets,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn hash_version(&self) -> u8 {
        self.hash_version
    }

    pub fn num_chunks(&self) -> u8 {
        self.num_chunks
    }

    pub fn chunk_ids(&self) -> &[u32] {
        &self.chunk_ids
    }

    pub fn num_packs(&self) -> u32 {
        self.pack_names.len() as u32
    }

    pub fn pack_names(&self) -> &[String] {
        &self.pack_names
    }

    pub fn pack_name(&self, pack_int_id: u32) -> Option<&str> {
        self.pack_names.get(pack_int_id as usize).map(String::as_str)
    }

    /// Whether `name` (an `.idx` or `.pack` name) is one of the indexed packs
    pub fn contains_pack(&self, name: &str) -> bool {
        let name = normalize_idx_name(name);
        self.pack_names
            .binary_search_by(|entry| entry.as_str().cmp(name.as_str()))
            .is_ok()
    }

    pub fn lookup(&self) -> FanoutLookup<'_> {
        FanoutLookup::from_validated(
            &self.data[self.oid_fanout.clone()],
            &self.data[self.oid_lookup.clone()],
        )
    }

    pub fn num_objects(&self) -> u32 {
        self.lookup().count()
    }

    pub fn locate(&self, oid: &ObjectId) -> Option<u32> {
        self.lookup().locate(oid)
    }

    pub fn oid_at(&self, position: u32) -> ObjectId {
        self.lookup().oid_at(position)
    }

    pub fn pack_int_id(&self, position: u32) -> u32 {
        let offsets = &self.data[self.object_offsets.clone()];
        be32(offsets, position as usize * MIDX_CHUNK_OFFSET_WIDTH)
    }

    /// Offset of the object at `position` in its pack
    ///
    /// Without a large offset chunk the 32-bit value is the offset, high bit included.
    pub fn offset(&self, position: u32) -> Result<u64, FormatError> {
        let offsets = &self.data[self.object_offsets.clone()];
        let offset = be32(offsets, position as usize * MIDX_CHUNK_OFFSET_WIDTH + 4);

        let Some(large) = &self.large_offsets else {
            return Ok(offset as u64);
        };
        if offset & MIDX_LARGE_OFFSET_NEEDED == 0 {
            return Ok(offset as u64);
        }

        let index = (offset ^ MIDX_LARGE_OFFSET_NEEDED) as usize;
        let large = &self.data[large.clone()];
        if (index + 1) * MIDX_CHUNK_LARGE_OFFSET_WIDTH > large.len() {
            return Err(FormatError::corrupt(format!(
                "multi-pack-index large offset {index} out of bounds"
            )));
        }
        Ok(be64(large, index * MIDX_CHUNK_LARGE_OFFSET_WIDTH))
    }

    pub fn entry_at(&self, position: u32) -> Result<MidxEntry, FormatError> {
        Ok(MidxEntry {
            pack_int_id: self.pack_int_id(position),
            offset: self.offset(position)?,
        })
    }

    pub fn find(&self, oid: &ObjectId) -> Result<Option<MidxEntry>, FormatError> {
        self.locate(oid)
            .map(|position| self.entry_at(position))
            .transpose()
    }

    /// Every object with its entry, in id order
    pub fn entries(&self) -> Result<Vec<(ObjectId, MidxEntry)>, FormatError> {
        (0..self.num_objects())
            .map(|position| Ok((self.oid_at(position), self.entry_at(position)?)))
            .collect()
    }

    pub fn checksum(&self) -> ObjectId {
        checksum::stored_checksum(&self.data).unwrap_or_default()
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::verify(&self.data)
    }
}

fn parse_pack_names(chunk: &[u8], num_packs: u32) -> Result<Vec<String>, FormatError> {
    let mut names: Vec<String> = Vec::with_capacity(num_packs as usize);
    let mut rest = chunk;

    for _ in 0..num_packs {
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            FormatError::corrupt("multi-pack-index pack-name chunk is too small")
        })?;
        let name = std::str::from_utf8(&rest[..end])
            .map_err(|_| FormatError::corrupt("multi-pack-index pack name is not valid UTF-8"))?;

        if let Some(previous) = names.last()
            && previous.as_str() >= name
        {
            return Err(FormatError::corrupt(format!(
                "multi-pack-index pack names out of order: '{previous}' before '{name}'"
            )));
        }

        names.push(name.to_string());
        rest = &rest[end + 1..];
    }

    Ok(names)
}
