//! Data structures and algorithms
//!
//! - `chunk`: Chunked container files (table of contents, hashing writer)
//! - `commit_graph`: Commit-graph layers, chains, generation numbers and Bloom filters
//! - `diff`: Changed paths between two trees
//! - `fanout`: 256-entry fanout tables over sorted object ids
//! - `format_error`: Errors raised while reading index files
//! - `midx`: The multi-pack-index and its reverse index
//! - `objects`: Object ids and the blob, tree and commit objects
//! - `pack`: Pack index (`.idx` v2) files and the pack directory
//! - `settings`: Knobs read from the environment
//! - `store`: Contracts for reaching objects, refs and packs
//! - `verify`: Aggregated verification reports

pub mod chunk;
pub mod commit_graph;
pub mod diff;
pub mod fanout;
pub mod format_error;
pub mod midx;
pub mod objects;
pub mod pack;
pub mod settings;
pub mod store;
pub mod verify;
