use crate::artifacts::chunk::reader::{ChunkTable, expect_size};
use crate::artifacts::chunk::{FileData, be32, checksum};
use crate::artifacts::commit_graph::bloom::{BLOOM_HEADER_SIZE, BloomSettings};
use crate::artifacts::commit_graph::{
    GRAPH_CHUNKID_BASE, GRAPH_CHUNKID_BLOOMDATA, GRAPH_CHUNKID_BLOOMINDEXES, GRAPH_CHUNKID_DATA,
    GRAPH_CHUNKID_EXTRAEDGES, GRAPH_CHUNKID_OIDFANOUT, GRAPH_CHUNKID_OIDLOOKUP, GRAPH_DATA_WIDTH,
    GRAPH_EDGE_LAST_MASK, GRAPH_HEADER_SIZE, GRAPH_LAST_EDGE, GRAPH_MIN_SIZE, GRAPH_SIGNATURE,
    GRAPH_VERSION,
};
use crate::artifacts::fanout::FanoutLookup;
use crate::artifacts::format_error::FormatError;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::{HASH_VERSION_SHA1, HASH_VERSION_SHA256, OBJECT_ID_RAW_LENGTH};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Fixed-width commit record, edges still in their on-disk encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    pub tree: ObjectId,
    pub parent1: u32,
    pub parent2: u32,
    pub generation: u32,
    pub date: u64,
}

/// One commit-graph file, validated and mapped
///
/// All offsets handed out by the accessors stay inside chunks checked at load time.
#[derive(Debug)]
pub struct GraphLayer {
    data: FileData,
    path: Option<PathBuf>,
    hash_version: u8,
    num_base_graphs: u8,
    num_commits: u32,
    chunk_ids: Vec<u32>,
    oid_fanout: Range<usize>,
    oid_lookup: Range<usize>,
    commit_data: Range<usize>,
    extra_edges: Option<Range<usize>>,
    bloom_indexes: Option<Range<usize>>,
    bloom_data: Option<Range<usize>>,
    bloom_settings: Option<BloomSettings>,
    base_graphs: Option<Range<usize>>,
}

impl GraphLayer {
    pub fn open(path: &Path, read_changed_paths: bool) -> Result<Self, FormatError> {
        let data = FileData::open(path)?;
        let mut layer = Self::parse(data, read_changed_paths)?;
        layer.path = Some(path.to_path_buf());
        Ok(layer)
    }

    pub fn parse(data: FileData, read_changed_paths: bool) -> Result<Self, FormatError> {
        if data.len() < GRAPH_MIN_SIZE {
            return Err(FormatError::corrupt(format!(
                "commit-graph file is too small ({} bytes)",
                data.len()
            )));
        }

        let signature = be32(&data, 0);
        if signature != GRAPH_SIGNATURE {
            return Err(FormatError::corrupt(format!(
                "commit-graph signature {signature:X} does not match signature {GRAPH_SIGNATURE:X}"
            )));
        }

        let version = data[4];
        if version != GRAPH_VERSION {
            return Err(FormatError::corrupt(format!(
                "commit-graph version {version:X} does not match version {GRAPH_VERSION:X}"
            )));
        }

        let hash_version = data[5];
        match hash_version {
            HASH_VERSION_SHA1 => {}
            HASH_VERSION_SHA256 => {
                return Err(FormatError::Incompatible(
                    "commit-graph uses SHA-256 object ids".to_string(),
                ));
            }
            other => {
                return Err(FormatError::corrupt(format!(
                    "commit-graph hash version {other:X} does not match version {HASH_VERSION_SHA1:X}"
                )));
            }
        }

        let num_chunks = data[6] as usize;
        let num_base_graphs = data[7];

        let table = ChunkTable::parse(&data, GRAPH_HEADER_SIZE, num_chunks)?;
        let oid_fanout = table.require(GRAPH_CHUNKID_OIDFANOUT)?;
        let oid_lookup = table.require(GRAPH_CHUNKID_OIDLOOKUP)?;
        let commit_data = table.require(GRAPH_CHUNKID_DATA)?;

        let num_commits = FanoutLookup::new(&data[oid_fanout.clone()], &data[oid_lookup.clone()])?
            .count();
        expect_size(
            GRAPH_CHUNKID_DATA,
            &commit_data,
            num_commits as usize * GRAPH_DATA_WIDTH,
        )?;

        let extra_edges = table.get(GRAPH_CHUNKID_EXTRAEDGES);
        if let Some(edges) = &extra_edges
            && edges.len() % 4 != 0
        {
            return Err(FormatError::corrupt(format!(
                "extra edges chunk has {} bytes, not a multiple of 4",
                edges.len()
            )));
        }

        let base_graphs = table.get(GRAPH_CHUNKID_BASE);
        if let Some(bases) = &base_graphs {
            expect_size(
                GRAPH_CHUNKID_BASE,
                bases,
                num_base_graphs as usize * OBJECT_ID_RAW_LENGTH,
            )?;
        }

        let mut layer = GraphLayer {
            data,
            path: None,
            hash_version,
            num_base_graphs,
            num_commits,
            chunk_ids: table.ids().collect(),
            oid_fanout,
            oid_lookup,
            commit_data,
            extra_edges,
            bloom_indexes: None,
            bloom_data: None,
            bloom_settings: None,
            base_graphs,
        };

        if read_changed_paths {
            layer.load_bloom_chunks(&table);
        }

        Ok(layer)
    }

    /// Attach the Bloom chunks when both are present and sane; anything else just
    /// leaves the layer without filters
    fn load_bloom_chunks(&mut self, table: &ChunkTable) {
        let (Some(indexes), Some(data)) = (
            table.get(GRAPH_CHUNKID_BLOOMINDEXES),
            table.get(GRAPH_CHUNKID_BLOOMDATA),
        ) else {
            return;
        };

        if indexes.len() != self.num_commits as usize * 4 {
            tracing::warn!(
                size = indexes.len(),
                commits = self.num_commits,
                "ignoring Bloom filters: index chunk has the wrong size"
            );
            return;
        }

        let Some(settings) = BloomSettings::from_header(&self.data[data.clone()]) else {
            tracing::warn!("ignoring Bloom filters: unsupported settings header");
            return;
        };

        self.bloom_indexes = Some(indexes);
        self.bloom_data = Some(data);
        self.bloom_settings = Some(settings);
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn hash_version(&self) -> u8 {
        self.hash_version
    }

    pub fn num_commits(&self) -> u32 {
        self.num_commits
    }

    pub fn num_base_graphs(&self) -> u8 {
        self.num_base_graphs
    }

    pub fn chunk_ids(&self) -> &[u32] {
        &self.chunk_ids
    }

    /// Trailing hash, which is also the layer's name in a chain
    pub fn checksum(&self) -> ObjectId {
        checksum::stored_checksum(&self.data).unwrap_or_default()
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::verify(&self.data)
    }

    pub fn lookup(&self) -> FanoutLookup<'_> {
        FanoutLookup::from_validated(
            &self.data[self.oid_fanout.clone()],
            &self.data[self.oid_lookup.clone()],
        )
    }

    /// Local position of `oid` in this layer
    pub fn locate(&self, oid: &ObjectId) -> Option<u32> {
        self.lookup().locate(oid)
    }

    pub fn oid_at(&self, local: u32) -> ObjectId {
        self.lookup().oid_at(local)
    }

    pub fn record(&self, local: u32) -> CommitRecord {
        let start = self.commit_data.start + local as usize * GRAPH_DATA_WIDTH;
        let record = &self.data[start..start + GRAPH_DATA_WIDTH];
        let mut tree = [0u8; OBJECT_ID_RAW_LENGTH];
        tree.copy_from_slice(&record[..OBJECT_ID_RAW_LENGTH]);

        let at = OBJECT_ID_RAW_LENGTH;
        let packed = be32(record, at + 8);
        let date_low = be32(record, at + 12);

        CommitRecord {
            tree: ObjectId::from_raw(tree),
            parent1: be32(record, at),
            parent2: be32(record, at + 4),
            generation: packed >> 2,
            date: ((packed as u64 & 0x3) << 32) | date_low as u64,
        }
    }

    /// Parent positions stored in the extra-edges chunk starting at `index`
    pub fn extra_edges(&self, index: u32) -> Result<Vec<u32>, FormatError> {
        let Some(edges) = &self.extra_edges else {
            return Err(FormatError::corrupt(
                "commit needs extra edges but the layer has no extra edges chunk",
            ));
        };

        let edges = &self.data[edges.clone()];
        let mut parents = Vec::new();
        let mut at = index as usize * 4;

        loop {
            if at + 4 > edges.len() {
                return Err(FormatError::corrupt(format!(
                    "extra edge list starting at {index} runs past the chunk"
                )));
            }

            let edge = be32(edges, at);
            parents.push(edge & GRAPH_EDGE_LAST_MASK);
            if edge & GRAPH_LAST_EDGE != 0 {
                return Ok(parents);
            }
            at += 4;
        }
    }

    pub fn bloom_settings(&self) -> Option<BloomSettings> {
        self.bloom_settings
    }

    pub fn disable_bloom_filters(&mut self) {
        self.bloom_indexes = None;
        self.bloom_data = None;
        self.bloom_settings = None;
    }

    /// Raw filter bytes of the commit at `local`
    ///
    /// `None` when the layer has no filters, when the filter was never computed
    /// (zero length), or when the index points outside the data chunk.
    pub fn bloom_filter(&self, local: u32) -> Option<&[u8]> {
        let (indexes, data) = (self.bloom_indexes.as_ref()?, self.bloom_data.as_ref()?);
        let indexes = &self.data[indexes.clone()];
        let filters = &self.data[data.start + BLOOM_HEADER_SIZE..data.end];

        let end = be32(indexes, local as usize * 4) as usize;
        let start = match local {
            0 => 0,
            _ => be32(indexes, (local as usize - 1) * 4) as usize,
        };

        if start > end || end > filters.len() {
            tracing::warn!(
                position = local,
                start,
                end,
                "ignoring out-of-range Bloom filter"
            );
            return None;
        }
        if start == end {
            return None;
        }

        Some(&filters[start..end])
    }

    /// Ids of the base layers recorded in the BASE chunk, base-most first
    pub fn base_hashes(&self) -> Option<Vec<ObjectId>> {
        let bases = &self.data[self.base_graphs.clone()?];

        Some(
            bases
                .chunks_exact(OBJECT_ID_RAW_LENGTH)
                .map(|raw| {
                    let mut oid = [0u8; OBJECT_ID_RAW_LENGTH];
                    oid.copy_from_slice(raw);
                    ObjectId::from_raw(oid)
                })
                .collect(),
        )
    }
}
