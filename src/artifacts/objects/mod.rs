//! Object model shared by the acceleration files
//!
//! Objects are addressed by SHA-1 hashes. The commit-graph and the multi-pack-index
//! only ever need three kinds of them:
//!
//! - **Blob**: File content (raw bytes)
//! - **Tree**: Directory listing (names, modes, and object IDs)
//! - **Commit**: Snapshot with metadata (tree, parents, author, committer, message)
//!
//! Tags are recognised by type so that refs pointing at them can be peeled.
//!
//! All objects serialize to the loose object format: `<type> <size>\0<content>`

pub mod blob;
pub mod commit;
pub mod object;
pub mod object_id;
pub mod object_type;
pub mod tree;

/// Length of a SHA-1 hash in hexadecimal format
pub const OBJECT_ID_LENGTH: usize = 40;

/// Length of a SHA-1 hash in binary format
pub const OBJECT_ID_RAW_LENGTH: usize = 20;

/// Hash algorithm identifier stored in the headers of the binary index files
pub const HASH_VERSION_SHA1: u8 = 1;

/// Identifier used by SHA-256 repositories (recognised, not supported)
pub const HASH_VERSION_SHA256: u8 = 2;
