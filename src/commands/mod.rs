//! Command implementations
//!
//! Every command is an `impl Repository` block writing its output to the repository
//! writer. Only plumbing exists here: the acceleration files are maintained by
//! scripts and maintenance jobs, not typed by hand.

pub mod plumbing;
