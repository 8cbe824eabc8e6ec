use crate::areas::repository::Repository;
use crate::artifacts::commit_graph::chain::{CommitGraph, LoadOptions};
use crate::artifacts::commit_graph::verify::GraphVerifier;
use crate::artifacts::commit_graph::writer::{
    GraphInput, GraphWriteFlags, GraphWriteOptions, GraphWriter, SplitOptions, SplitStrategy,
    gather_commits,
};
use crate::artifacts::commit_graph::{GRAPH_SIGNATURE, GRAPH_VERSION, chunk_name};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::verify::{IssueKind, VerifyReport};
use std::time::SystemTime;

/// Where `commit-graph write` takes its commits from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GraphSource {
    #[default]
    AllPacks,
    Reachable,
    /// Pack index names, one per line of standard input
    StdinPacks(Vec<String>),
    /// Hex commit ids, one per line of standard input
    StdinCommits(Vec<String>),
}

impl GraphSource {
    fn into_input(self) -> anyhow::Result<GraphInput> {
        Ok(match self {
            GraphSource::AllPacks => GraphInput::AllPacks,
            GraphSource::Reachable => GraphInput::Reachable,
            GraphSource::StdinPacks(names) => GraphInput::Packs(names),
            GraphSource::StdinCommits(lines) => GraphInput::Commits(
                lines
                    .into_iter()
                    .map(|line| {
                        ObjectId::try_parse(line.clone()).map_err(|_| {
                            anyhow::anyhow!("unexpected non-hex object ID: {line}")
                        })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?,
            ),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitGraphWriteOptions {
    pub append: bool,
    /// `None` writes a single file
    pub split: Option<SplitStrategy>,
    pub size_multiple: Option<u32>,
    pub max_commits: Option<u32>,
    pub expire_time: Option<SystemTime>,
    /// `None` keeps filters when the existing graph has them
    pub changed_paths: Option<bool>,
    pub max_new_filters: Option<u32>,
}

impl Repository {
    pub fn commit_graph_write(
        &self,
        source: GraphSource,
        opts: &CommitGraphWriteOptions,
    ) -> anyhow::Result<()> {
        if let Some(reason) = self.commit_graph_incompatibility() {
            tracing::warn!(reason, "not writing a commit-graph");
            return Ok(());
        }

        let input = source.into_input()?;
        let gathered = gather_commits(self.database(), self.refs(), &input)?;
        let existing = self.commit_graph();

        let report = GraphWriter::new(
            self.objects_dir(),
            self.database(),
            existing.as_deref(),
            self.graph_write_options(opts),
        )
        .write(gathered)?;

        // the cached graph may describe files that were just replaced
        self.close_commit_graph();

        if let Some(bloom) = report.bloom {
            tracing::info!(
                computed = bloom.computed,
                reused = bloom.reused,
                not_computed = bloom.not_computed,
                truncated_empty = bloom.truncated_empty,
                truncated_large = bloom.truncated_large,
                "changed-path filters"
            );
        }

        Ok(())
    }

    fn graph_write_options(&self, opts: &CommitGraphWriteOptions) -> GraphWriteOptions {
        let mut flags = GraphWriteFlags::empty();
        flags.set(GraphWriteFlags::APPEND, opts.append);
        flags.set(GraphWriteFlags::SPLIT, opts.split.is_some());
        match opts.changed_paths {
            Some(true) => flags.insert(GraphWriteFlags::BLOOM_FILTERS),
            Some(false) => flags.insert(GraphWriteFlags::NO_BLOOM_REUSE),
            None => {}
        }

        let defaults = SplitOptions::default();
        GraphWriteOptions {
            flags,
            split: SplitOptions {
                size_multiple: opts.size_multiple.unwrap_or(defaults.size_multiple),
                max_commits: opts.max_commits,
                expire_time: opts.expire_time,
                strategy: opts.split.unwrap_or_default(),
            },
            max_new_filters: opts.max_new_filters.or(self.settings().max_new_filters),
            bloom_settings: self.settings().bloom,
        }
    }

    /// Check every layer of the commit-graph against the object store
    pub fn commit_graph_verify(&self, shallow: bool) -> anyhow::Result<()> {
        let options = LoadOptions {
            read_changed_paths: true,
            verify_checksums: false,
        };

        let report = match CommitGraph::load(self.objects_dir(), options) {
            Ok(Some(graph)) => GraphVerifier::new(self.database(), &graph)
                .shallow(shallow)
                .verify(),
            Ok(None) => VerifyReport::new(),
            Err(err) => {
                let mut report = VerifyReport::new();
                report.report(IssueKind::Structure, err.to_string());
                report
            }
        };

        self.write_verify_report("commit-graph", &report)
    }

    /// Describe the top layer of the commit-graph as this repository sees it
    pub fn commit_graph_read(&self) -> anyhow::Result<()> {
        let graph = self
            .commit_graph()
            .ok_or_else(|| anyhow::anyhow!("could not load commit-graph"))?;
        let top = graph
            .layers()
            .first()
            .ok_or_else(|| anyhow::anyhow!("could not load commit-graph"))?;

        writeln!(
            self.writer(),
            "header: {:08x} {} {} {} {}",
            GRAPH_SIGNATURE,
            GRAPH_VERSION,
            top.hash_version(),
            top.chunk_ids().len(),
            top.num_base_graphs()
        )?;
        writeln!(self.writer(), "num_commits: {}", top.num_commits())?;

        let chunks = top
            .chunk_ids()
            .iter()
            .map(|id| format!(" {}", chunk_name(*id)))
            .collect::<String>();
        writeln!(self.writer(), "chunks:{chunks}")?;

        let mut options = String::new();
        if let Some(bloom) = top.bloom_settings() {
            options.push_str(&format!(
                " bloom({},{},{})",
                bloom.hash_version, bloom.bits_per_entry, bloom.num_hashes
            ));
        }
        writeln!(self.writer(), "options:{options}")?;

        if graph.num_layers() > 1 {
            writeln!(self.writer(), "layers: {}", graph.num_layers())?;
        }

        Ok(())
    }
}
