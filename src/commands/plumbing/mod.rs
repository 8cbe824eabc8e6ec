//! Plumbing commands (low-level maintenance of the acceleration files)
//!
//! ## Commands
//!
//! - `commit-graph`: write, verify and describe commit-graph files
//! - `multi-pack-index`: write, verify, expire packs and describe the multi-pack-index

pub mod commit_graph;
pub mod multi_pack_index;

use crate::areas::repository::Repository;
use crate::artifacts::verify::VerifyReport;
use colored::Colorize;

impl Repository {
    /// Print every issue, then fail if there was any
    fn write_verify_report(&self, file: &str, report: &VerifyReport) -> anyhow::Result<()> {
        for issue in report.issues() {
            writeln!(self.writer(), "{} {}", "error:".red(), issue.message)?;
        }

        if !report.is_ok() {
            anyhow::bail!("{file} verification found {} issue(s)", report.len());
        }

        Ok(())
    }
}
