//! Commit-graph and multi-pack-index acceleration files for `bit` repositories

pub mod areas;
pub mod artifacts;
pub mod commands;
