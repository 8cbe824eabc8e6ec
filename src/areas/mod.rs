//! Stateful on-disk repository components
//!
//! - `database`: Loose object store plus the pack directory
//! - `lockfile`: Exclusive `<file>.lock` held while a file is rewritten
//! - `refs`: Reference enumeration (HEAD, `refs/**`)
//! - `repository`: Repository handle owning the lazily loaded commit-graph and multi-pack-index

pub mod database;
pub mod lockfile;
pub mod refs;
pub mod repository;
