//! Commit-graph files
//!
//! A commit-graph caches, for every indexed commit, its tree, its parents (as positions
//! into the graph), its committer date, and its generation number, plus optional
//! changed-path Bloom filters. Graphs come either as one file or as a chain of layers,
//! each layer holding only the commits its bases do not.
//!
//! ## Layout
//!
//! ```text
//! +--------------------------------------------------------------+
//! | "CGPH" | version: u8 | hash version: u8 | chunks: u8 | bases: u8 |
//! +--------------------------------------------------------------+
//! | chunk table                                                  |
//! +--------------------------------------------------------------+
//! | OIDF  fanout, 256 x u32                                      |
//! | OIDL  sorted commit ids                                      |
//! | CDAT  tree | parent 1 | parent 2 | gen << 2 + date hi | date lo |
//! | EDGE  (optional) parent lists of octopus merges             |
//! | BIDX  (optional) cumulative Bloom filter end offsets         |
//! | BDAT  (optional) Bloom settings + concatenated filters       |
//! | BASE  (optional) ids of the base layers, base-most first     |
//! +--------------------------------------------------------------+
//! | checksum                                                     |
//! +--------------------------------------------------------------+
//! ```
//!
//! Parent positions are global: a position below the layer's base count resolves into
//! a lower layer.

pub mod bloom;
pub mod chain;
pub mod generation;
pub mod layer;
pub mod verify;
pub mod writer;

use crate::artifacts::chunk::{CHECKSUM_SIZE, CHUNK_TABLE_ENTRY_SIZE, chunk_id_str};
use crate::artifacts::fanout::FANOUT_SIZE;
use crate::artifacts::objects::OBJECT_ID_RAW_LENGTH;
use std::path::{Path, PathBuf};

pub const GRAPH_SIGNATURE: u32 = 0x4347_5048; // "CGPH"
pub const GRAPH_VERSION: u8 = 1;
pub const GRAPH_HEADER_SIZE: usize = 8;

pub const GRAPH_CHUNKID_OIDFANOUT: u32 = 0x4f49_4446; // "OIDF"
pub const GRAPH_CHUNKID_OIDLOOKUP: u32 = 0x4f49_444c; // "OIDL"
pub const GRAPH_CHUNKID_DATA: u32 = 0x4344_4154; // "CDAT"
pub const GRAPH_CHUNKID_EXTRAEDGES: u32 = 0x4544_4745; // "EDGE"
pub const GRAPH_CHUNKID_BLOOMINDEXES: u32 = 0x4249_4458; // "BIDX"
pub const GRAPH_CHUNKID_BLOOMDATA: u32 = 0x4244_4154; // "BDAT"
pub const GRAPH_CHUNKID_BASE: u32 = 0x4241_5345; // "BASE"

pub const GRAPH_DATA_WIDTH: usize = OBJECT_ID_RAW_LENGTH + 16;

pub const GRAPH_PARENT_NONE: u32 = 0x7000_0000;
pub const GRAPH_EXTRA_EDGES_NEEDED: u32 = 0x8000_0000;
pub const GRAPH_LAST_EDGE: u32 = 0x8000_0000;
pub const GRAPH_EDGE_LAST_MASK: u32 = 0x7fff_ffff;

/// Header, the three mandatory chunks plus the terminator, fanout and checksum
pub const GRAPH_MIN_SIZE: usize =
    GRAPH_HEADER_SIZE + 4 * CHUNK_TABLE_ENTRY_SIZE + FANOUT_SIZE + CHECKSUM_SIZE;

pub const COMMIT_GRAPH_FILE: &str = "commit-graph";
pub const COMMIT_GRAPHS_DIR: &str = "commit-graphs";
pub const COMMIT_GRAPH_CHAIN_FILE: &str = "commit-graph-chain";

/// Names used by `commit-graph read`
pub const CHUNK_NAMES: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "OIDF" => "oid_fanout",
    "OIDL" => "oid_lookup",
    "CDAT" => "commit_metadata",
    "EDGE" => "extra_edges",
    "BIDX" => "bloom_indexes",
    "BDAT" => "bloom_data",
    "BASE" => "base_graphs",
};

pub fn chunk_name(id: u32) -> String {
    let id = chunk_id_str(id);
    CHUNK_NAMES
        .get(id.as_str())
        .map(|name| name.to_string())
        .unwrap_or(id)
}

/// `<objects>/info/commit-graph`
pub fn graph_file_path(objects_dir: &Path) -> PathBuf {
    objects_dir.join("info").join(COMMIT_GRAPH_FILE)
}

/// `<objects>/info/commit-graphs`
pub fn graphs_dir(objects_dir: &Path) -> PathBuf {
    objects_dir.join("info").join(COMMIT_GRAPHS_DIR)
}

/// `<objects>/info/commit-graphs/commit-graph-chain`
pub fn chain_file_path(objects_dir: &Path) -> PathBuf {
    graphs_dir(objects_dir).join(COMMIT_GRAPH_CHAIN_FILE)
}

/// `<objects>/info/commit-graphs/graph-<hex>.graph`
pub fn layer_file_path(objects_dir: &Path, hex: &str) -> PathBuf {
    graphs_dir(objects_dir).join(format!("graph-{hex}.graph"))
}
