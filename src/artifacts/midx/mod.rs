//! Multi-pack-index files
//!
//! A multi-pack-index (MIDX) maps every object of a set of packs to the one pack and
//! offset that should serve it, so a lookup is one binary search instead of one per
//! pack. Objects stored in several packs appear once.
//!
//! ## Layout
//!
//! ```text
//! +----------------------------------------------------------------------+
//! | "MIDX" | version: u8 | hash version: u8 | chunks: u8 | 0: u8 | packs: u32 |
//! +----------------------------------------------------------------------+
//! | chunk table                                                          |
//! +----------------------------------------------------------------------+
//! | PNAM  sorted `.idx` names, NUL-terminated, padded to 4 bytes         |
//! | OIDF  fanout, 256 x u32                                              |
//! | OIDL  sorted object ids                                              |
//! | OOFF  pack int id: u32 | offset: u32  (high bit: index into LOFF)    |
//! | LOFF  (optional) u64 offsets                                         |
//! +----------------------------------------------------------------------+
//! | checksum                                                             |
//! +----------------------------------------------------------------------+
//! ```

pub mod expire;
pub mod reader;
pub mod rev_index;
pub mod verify;
pub mod writer;

use crate::artifacts::chunk::{CHECKSUM_SIZE, CHUNK_TABLE_ENTRY_SIZE, chunk_id_str};
use crate::artifacts::fanout::FANOUT_SIZE;
use crate::artifacts::pack::pack_dir;
use std::path::{Path, PathBuf};

pub const MIDX_SIGNATURE: u32 = 0x4d49_4458; // "MIDX"
pub const MIDX_VERSION: u8 = 1;
pub const MIDX_HEADER_SIZE: usize = 12;
/// Header, the four mandatory chunks plus the terminator, fanout and checksum
pub const MIDX_MIN_SIZE: usize =
    MIDX_HEADER_SIZE + 5 * CHUNK_TABLE_ENTRY_SIZE + FANOUT_SIZE + CHECKSUM_SIZE;

pub const MIDX_CHUNKID_PACKNAMES: u32 = 0x504e_414d; // "PNAM"
pub const MIDX_CHUNKID_OIDFANOUT: u32 = 0x4f49_4446; // "OIDF"
pub const MIDX_CHUNKID_OIDLOOKUP: u32 = 0x4f49_444c; // "OIDL"
pub const MIDX_CHUNKID_OBJECTOFFSETS: u32 = 0x4f4f_4646; // "OOFF"
pub const MIDX_CHUNKID_LARGEOFFSETS: u32 = 0x4c4f_4646; // "LOFF"

pub const MIDX_CHUNK_OFFSET_WIDTH: usize = 8;
pub const MIDX_CHUNK_LARGE_OFFSET_WIDTH: usize = 8;
pub const MIDX_LARGE_OFFSET_NEEDED: u32 = 0x8000_0000;

pub const MIDX_FILE: &str = "multi-pack-index";

/// Names used by `multi-pack-index read`
pub const CHUNK_NAMES: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "PNAM" => "pack-names",
    "OIDF" => "oid-fanout",
    "OIDL" => "oid-lookup",
    "OOFF" => "object-offsets",
    "LOFF" => "large-offsets",
};

pub fn chunk_name(id: u32) -> String {
    let id = chunk_id_str(id);
    CHUNK_NAMES
        .get(id.as_str())
        .map(|name| name.to_string())
        .unwrap_or(id)
}

/// `<objects>/pack/multi-pack-index`
pub fn midx_file_path(objects_dir: &Path) -> PathBuf {
    pack_dir(objects_dir).join(MIDX_FILE)
}

/// `<objects>/pack/multi-pack-index-<hex>.rev`
pub fn rev_file_path(objects_dir: &Path, hex: &str) -> PathBuf {
    pack_dir(objects_dir).join(format!("{MIDX_FILE}-{hex}.rev"))
}
