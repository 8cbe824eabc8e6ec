//! Tree comparison
//!
//! - `tree_diff`: recursive path-level comparison of two trees, the input of
//!   changed-path Bloom filters

pub mod tree_diff;
