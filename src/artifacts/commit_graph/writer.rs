//! Building and publishing commit-graph files
//!
//! A write goes through these steps:
//!
//! 1. gather the input commits (explicit ids, packs, or everything reachable from refs)
//! 2. close the set under parents
//! 3. for split writes, decide how many existing layers to fold into the new one
//! 4. compute generation numbers and, when enabled, changed-path Bloom filters
//! 5. write the file under a lock, then publish it by rename
//! 6. expire layer files no longer named by the chain

use crate::areas::lockfile::Lockfile;
use crate::artifacts::chunk::checksum::Checksum;
use crate::artifacts::chunk::writer::ChunkWriter;
use crate::artifacts::commit_graph::bloom::{
    BloomFilter, BloomSettings, BloomStats, compute_filter,
};
use crate::artifacts::commit_graph::chain::CommitGraph;
use crate::artifacts::commit_graph::generation::{ParentRef, compute_generations};
use crate::artifacts::commit_graph::{
    GRAPH_CHUNKID_BASE, GRAPH_CHUNKID_BLOOMDATA, GRAPH_CHUNKID_BLOOMINDEXES, GRAPH_CHUNKID_DATA,
    GRAPH_CHUNKID_EXTRAEDGES, GRAPH_CHUNKID_OIDFANOUT, GRAPH_CHUNKID_OIDLOOKUP, GRAPH_DATA_WIDTH,
    GRAPH_EDGE_LAST_MASK, GRAPH_EXTRA_EDGES_NEEDED, GRAPH_LAST_EDGE, GRAPH_PARENT_NONE,
    GRAPH_SIGNATURE, GRAPH_VERSION, chain_file_path, graph_file_path, graphs_dir,
    layer_file_path,
};
use crate::artifacts::fanout::{FANOUT_SIZE, write_fanout, write_lookup};
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::{HASH_VERSION_SHA1, OBJECT_ID_RAW_LENGTH};
use crate::artifacts::pack::normalize_idx_name;
use crate::artifacts::store::{ObjectStore, RefStore, RevisionWalk};
use anyhow::Context;
use bitflags::bitflags;
use byteorder::{NetworkEndian, WriteBytesExt};
use fake::rand;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GraphWriteFlags: u8 {
        /// Keep the commits of the existing graph in a non-split write
        const APPEND = 0b0001;
        const SPLIT = 0b0010;
        const BLOOM_FILTERS = 0b0100;
        /// Neither inherit Bloom settings nor reuse filters from the existing graph
        const NO_BLOOM_REUSE = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitStrategy {
    #[default]
    Unspecified,
    MergeProhibited,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOptions {
    pub size_multiple: u32,
    pub max_commits: Option<u32>,
    /// Orphaned layer files modified after this instant survive; defaults to now
    pub expire_time: Option<SystemTime>,
    pub strategy: SplitStrategy,
}

impl Default for SplitOptions {
    fn default() -> Self {
        SplitOptions {
            size_multiple: 2,
            max_commits: None,
            expire_time: None,
            strategy: SplitStrategy::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphWriteOptions {
    pub flags: GraphWriteFlags,
    pub split: SplitOptions,
    pub max_new_filters: Option<u32>,
    pub bloom_settings: BloomSettings,
}

/// Where the commits to index come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphInput {
    Commits(Vec<ObjectId>),
    /// Names of pack index files
    Packs(Vec<String>),
    AllPacks,
    Reachable,
}

/// Input commits, in the order they were found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatheredCommits {
    pub oids: Vec<ObjectId>,
    /// Bloom filters follow pack order instead of generation order
    pub order_by_pack: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphWriteReport {
    /// `None` when there was nothing to write
    pub path: Option<PathBuf>,
    pub checksum: Option<ObjectId>,
    pub num_commits: u32,
    pub num_layers: usize,
    pub bloom: Option<BloomStats>,
    pub expired: Vec<PathBuf>,
}

/// Resolve a [`GraphInput`] into commit ids
pub fn gather_commits<S, R>(store: &S, refs: &R, input: &GraphInput) -> anyhow::Result<GatheredCommits>
where
    S: RevisionWalk + ?Sized,
    R: RefStore + ?Sized,
{
    match input {
        GraphInput::Commits(oids) => {
            let mut commits = Vec::with_capacity(oids.len());
            for oid in oids {
                match store
                    .peel_to_commit(oid)
                    .with_context(|| format!("invalid commit object id: {oid}"))?
                {
                    Some(commit) => commits.push(commit),
                    None => tracing::debug!(%oid, "skipping non-commit object"),
                }
            }
            Ok(GatheredCommits {
                oids: commits,
                order_by_pack: false,
            })
        }
        GraphInput::Packs(names) => {
            let wanted = names
                .iter()
                .map(|name| normalize_idx_name(name))
                .collect::<BTreeSet<_>>();
            let packed = store.packed_objects()?;

            let known = packed
                .iter()
                .map(|object| object.pack.as_str())
                .collect::<HashSet<_>>();
            if let Some(missing) = wanted.iter().find(|name| !known.contains(name.as_str())) {
                anyhow::bail!("error adding pack {missing}");
            }

            let candidates = packed
                .into_iter()
                .filter(|object| wanted.contains(&object.pack))
                .map(|object| object.oid);
            Ok(GatheredCommits {
                oids: only_commits(store, candidates)?,
                order_by_pack: true,
            })
        }
        GraphInput::AllPacks => {
            let candidates = store.packed_objects()?.into_iter().map(|object| object.oid);
            Ok(GatheredCommits {
                oids: only_commits(store, candidates)?,
                order_by_pack: true,
            })
        }
        GraphInput::Reachable => {
            let mut tips = Vec::new();
            refs.for_each_ref(&mut |_, oid| tips.push(*oid))?;

            let mut commits = Vec::new();
            for tip in tips {
                if let Some(commit) = store.peel_to_commit(&tip)? {
                    commits.push(commit);
                }
            }
            Ok(GatheredCommits {
                oids: store.reachable_commits(&commits)?,
                order_by_pack: false,
            })
        }
    }
}

fn only_commits<S: ObjectStore + ?Sized>(
    store: &S,
    candidates: impl Iterator<Item = ObjectId>,
) -> anyhow::Result<Vec<ObjectId>> {
    let mut seen = HashSet::new();
    let mut commits = Vec::new();

    for oid in candidates {
        if !seen.insert(oid) {
            continue;
        }
        let object_type = store
            .object_type(&oid)
            .with_context(|| format!("unable to get type of packed object {oid}"))?;
        if object_type == ObjectType::Commit {
            commits.push(oid);
        }
    }

    Ok(commits)
}

/// A commit ready to be encoded
struct PendingCommit {
    tree: ObjectId,
    /// Global positions
    parents: Vec<u32>,
    generation: u32,
    date: u64,
}

/// Everything that ends up in one graph file
struct GraphContent {
    oids: Vec<ObjectId>,
    commits: Vec<PendingCommit>,
    bloom: Option<(BloomSettings, Vec<BloomFilter>)>,
    base_hashes: Vec<ObjectId>,
}

impl GraphContent {
    fn num_extra_edges(&self) -> usize {
        self.commits
            .iter()
            .filter(|commit| commit.parents.len() > 2)
            .map(|commit| commit.parents.len() - 1)
            .sum()
    }

    fn write_to<W: Write>(&self, inner: W) -> anyhow::Result<(W, ObjectId)> {
        let mut out = Checksum::new(inner);
        let mut chunks: ChunkWriter<'_, W> = ChunkWriter::new();
        let num_commits = self.oids.len() as u64;

        chunks.add_chunk(GRAPH_CHUNKID_OIDFANOUT, FANOUT_SIZE as u64, |out| {
            write_fanout(out, &self.oids)
        });
        chunks.add_chunk(
            GRAPH_CHUNKID_OIDLOOKUP,
            num_commits * OBJECT_ID_RAW_LENGTH as u64,
            |out| write_lookup(out, &self.oids),
        );
        chunks.add_chunk(
            GRAPH_CHUNKID_DATA,
            num_commits * GRAPH_DATA_WIDTH as u64,
            |out| self.write_commit_data(out),
        );

        let num_extra_edges = self.num_extra_edges();
        if num_extra_edges > 0 {
            chunks.add_chunk(GRAPH_CHUNKID_EXTRAEDGES, num_extra_edges as u64 * 4, |out| {
                self.write_extra_edges(out)
            });
        }

        if let Some((settings, filters)) = &self.bloom {
            let total = filters.iter().map(|filter| filter.len() as u64).sum::<u64>();

            chunks.add_chunk(GRAPH_CHUNKID_BLOOMINDEXES, num_commits * 4, move |out| {
                let mut end = 0u32;
                for filter in filters {
                    end += filter.len() as u32;
                    out.write_u32::<NetworkEndian>(end)?;
                }
                Ok(())
            });
            chunks.add_chunk(GRAPH_CHUNKID_BLOOMDATA, 12 + total, move |out| {
                settings.write_header(out)?;
                for filter in filters {
                    out.write_all(filter.as_bytes())?;
                }
                Ok(())
            });
        }

        if !self.base_hashes.is_empty() {
            chunks.add_chunk(
                GRAPH_CHUNKID_BASE,
                (self.base_hashes.len() * OBJECT_ID_RAW_LENGTH) as u64,
                |out| write_lookup(out, &self.base_hashes),
            );
        }

        out.write_u32::<NetworkEndian>(GRAPH_SIGNATURE)?;
        out.write_u8(GRAPH_VERSION)?;
        out.write_u8(HASH_VERSION_SHA1)?;
        out.write_u8(chunks.num_chunks() as u8)?;
        out.write_u8(self.base_hashes.len() as u8)?;
        chunks.write(&mut out)?;

        Ok(out.write_checksum()?)
    }

    fn write_commit_data<W: Write + ?Sized>(&self, out: &mut W) -> anyhow::Result<()> {
        let mut num_extra_edges = 0u32;

        for commit in &self.commits {
            commit.tree.write_h40_to(out)?;

            let parent1 = commit.parents.first().copied().unwrap_or(GRAPH_PARENT_NONE);
            let parent2 = match commit.parents.len() {
                0 | 1 => GRAPH_PARENT_NONE,
                2 => commit.parents[1],
                n => {
                    let edge = GRAPH_EXTRA_EDGES_NEEDED | num_extra_edges;
                    num_extra_edges += n as u32 - 1;
                    edge
                }
            };
            out.write_u32::<NetworkEndian>(parent1)?;
            out.write_u32::<NetworkEndian>(parent2)?;

            let date_high = ((commit.date >> 32) & 0x3) as u32;
            out.write_u32::<NetworkEndian>((commit.generation << 2) | date_high)?;
            out.write_u32::<NetworkEndian>(commit.date as u32)?;
        }

        Ok(())
    }

    fn write_extra_edges<W: Write + ?Sized>(&self, out: &mut W) -> anyhow::Result<()> {
        for commit in self.commits.iter().filter(|commit| commit.parents.len() > 2) {
            let rest = &commit.parents[1..];
            for (i, parent) in rest.iter().enumerate() {
                let edge = match i + 1 == rest.len() {
                    true => parent | GRAPH_LAST_EDGE,
                    false => *parent,
                };
                out.write_u32::<NetworkEndian>(edge)?;
            }
        }

        Ok(())
    }
}

pub struct GraphWriter<'a, S: ObjectStore + ?Sized> {
    objects_dir: &'a Path,
    store: &'a S,
    existing: Option<&'a CommitGraph>,
    options: GraphWriteOptions,
}

impl<'a, S: ObjectStore + ?Sized> GraphWriter<'a, S> {
    /// `existing` must be the graph currently loaded from `objects_dir`, if any
    pub fn new(
        objects_dir: &'a Path,
        store: &'a S,
        existing: Option<&'a CommitGraph>,
        options: GraphWriteOptions,
    ) -> Self {
        GraphWriter {
            objects_dir,
            store,
            existing,
            options,
        }
    }

    fn split(&self) -> bool {
        self.options.flags.contains(GraphWriteFlags::SPLIT)
    }

    fn replace(&self) -> bool {
        self.split() && self.options.split.strategy == SplitStrategy::Replace
    }

    pub fn write(&self, gathered: GatheredCommits) -> anyhow::Result<GraphWriteReport> {
        let bloom_settings = self.bloom_settings();
        let input_order = gathered
            .order_by_pack
            .then(|| {
                gathered
                    .oids
                    .iter()
                    .enumerate()
                    .rev()
                    .map(|(i, oid)| (*oid, i))
                    .collect::<HashMap<_, _>>()
            });

        let mut oids = gathered.oids;
        if self.options.flags.contains(GraphWriteFlags::APPEND)
            && let Some(graph) = self.existing
        {
            oids.extend(graph.oids());
        }

        let mut parsed = self.close_reachable(&mut oids)?;

        oids.sort();
        oids.dedup();
        if self.split()
            && !self.replace()
            && let Some(graph) = self.existing
        {
            oids.retain(|oid| !graph.contains(oid));
        }

        if oids.len() >= GRAPH_EDGE_LAST_MASK as usize {
            anyhow::bail!("too many commits to write graph");
        }
        if oids.is_empty() && !self.replace() {
            tracing::debug!("no new commits to write to the commit-graph");
            return Ok(GraphWriteReport::default());
        }

        let folded = match self.split() {
            true => self.split_merge_strategy(oids.len() as u32),
            false => 0,
        };
        if folded > 0 {
            self.fold_layers(folded, &mut oids, &mut parsed)?;
        }

        let kept = match (self.split(), self.existing) {
            (true, Some(graph)) => graph.num_layers() - folded,
            _ => 0,
        };
        let built = self.build_content(oids, &parsed, folded, kept, bloom_settings, input_order)?;

        let mut report = match self.split() {
            true => self.publish_split(&built, folded, kept)?,
            false => self.publish_single(&built)?,
        };
        report.num_commits = built.content.oids.len() as u32;
        report.bloom = bloom_settings.map(|_| built.bloom_stats);

        Ok(report)
    }

    /// Settings for new filters, `None` when no filters are written
    fn bloom_settings(&self) -> Option<BloomSettings> {
        let inherited = match self.options.flags.contains(GraphWriteFlags::NO_BLOOM_REUSE) {
            true => None,
            false => self.existing.and_then(|graph| graph.bloom_settings()),
        };

        match inherited {
            Some(settings) => Some(BloomSettings {
                max_changed_paths: self.options.bloom_settings.max_changed_paths,
                ..settings
            }),
            None => self
                .options
                .flags
                .contains(GraphWriteFlags::BLOOM_FILTERS)
                .then_some(self.options.bloom_settings),
        }
    }

    /// Add every missing parent to `oids`
    ///
    /// Split writes do not expand commits already stored in the existing graph, since
    /// their history is covered by the kept layers.
    fn close_reachable(&self, oids: &mut Vec<ObjectId>) -> anyhow::Result<HashMap<ObjectId, Commit>> {
        let skip_known = self.split() && !self.replace();
        let mut seen = oids.iter().copied().collect::<HashSet<_>>();
        let mut parsed = HashMap::new();
        let mut next = 0;

        while next < oids.len() {
            let oid = oids[next];
            next += 1;

            if skip_known && self.existing.is_some_and(|graph| graph.contains(&oid)) {
                continue;
            }

            let commit = self
                .store
                .read_commit(&oid)
                .with_context(|| format!("unable to parse commit {oid}"))?;
            for parent in commit.parents() {
                if seen.insert(*parent) {
                    oids.push(*parent);
                }
            }
            parsed.insert(oid, commit);
        }

        Ok(parsed)
    }

    /// Number of top layers to fold into the new layer
    fn split_merge_strategy(&self, num_new: u32) -> usize {
        let Some(graph) = self.existing else {
            return 0;
        };
        let options = &self.options.split;

        let folded = match options.strategy {
            SplitStrategy::Replace => graph.num_layers(),
            SplitStrategy::MergeProhibited => 0,
            SplitStrategy::Unspecified => {
                let mut num_commits = num_new as u64;
                let mut folded = 0;

                for layer in graph.layers() {
                    let layer_commits = layer.num_commits() as u64;
                    let small = layer_commits <= options.size_multiple as u64 * num_commits;
                    let over_max = options
                        .max_commits
                        .is_some_and(|max| num_commits > max as u64);

                    if !small && !over_max {
                        break;
                    }
                    num_commits += layer_commits;
                    folded += 1;
                }
                folded
            }
        };

        tracing::debug!(
            layers = graph.num_layers(),
            folded,
            strategy = ?options.strategy,
            "commit-graph merge strategy"
        );
        folded
    }

    /// Pull the commits of the top `folded` layers into the new layer
    fn fold_layers(
        &self,
        folded: usize,
        oids: &mut Vec<ObjectId>,
        parsed: &mut HashMap<ObjectId, Commit>,
    ) -> anyhow::Result<()> {
        let Some(graph) = self.existing else {
            return Ok(());
        };

        for layer in &graph.layers()[..folded] {
            for local in 0..layer.num_commits() {
                let oid = layer.oid_at(local);
                if parsed.contains_key(&oid) {
                    oids.push(oid);
                    continue;
                }

                // only carry over commits that still exist
                match self.store.read_commit(&oid) {
                    Ok(commit) => {
                        parsed.insert(oid, commit);
                        oids.push(oid);
                    }
                    Err(err) => tracing::debug!(%oid, %err, "dropping commit missing from the store"),
                }
            }
        }

        oids.sort();
        oids.dedup();
        Ok(())
    }

    fn build_content(
        &self,
        oids: Vec<ObjectId>,
        parsed: &HashMap<ObjectId, Commit>,
        folded: usize,
        kept: usize,
        bloom_settings: Option<BloomSettings>,
        input_order: Option<HashMap<ObjectId, usize>>,
    ) -> anyhow::Result<BuiltContent> {
        let base = self.existing.filter(|_| kept > 0);
        let num_in_base = base.map_or(0, |graph| graph.commits_through(folded));

        let mut commits = Vec::with_capacity(oids.len());
        let mut parent_refs = Vec::with_capacity(oids.len());

        for oid in &oids {
            let commit = parsed
                .get(oid)
                .with_context(|| format!("unable to parse commit {oid}"))?;

            let mut positions = Vec::with_capacity(commit.parents().len());
            let mut refs = Vec::with_capacity(commit.parents().len());
            for parent in commit.parents() {
                let in_base = || {
                    base.and_then(|graph| {
                        graph
                            .lookup_from(parent, folded)
                            .map(|position| (position, graph.generation_at(position)))
                    })
                };

                if let Ok(local) = oids.binary_search(parent) {
                    positions.push(num_in_base + local as u32);
                    refs.push(ParentRef::Local(local));
                } else if let Some((position, generation)) = in_base() {
                    positions.push(position);
                    refs.push(ParentRef::Known(generation));
                } else {
                    anyhow::bail!("missing parent {parent} for commit {oid}");
                }
            }

            commits.push(PendingCommit {
                tree: *commit.tree_oid(),
                parents: positions,
                generation: 0,
                date: commit.date(),
            });
            parent_refs.push(refs);
        }

        let generations = compute_generations(&parent_refs)?;
        for (commit, generation) in commits.iter_mut().zip(&generations) {
            commit.generation = *generation;
        }

        let mut bloom_stats = BloomStats::default();
        let bloom = match bloom_settings {
            Some(settings) => {
                let filters = self.compute_bloom_filters(
                    &oids,
                    parsed,
                    &generations,
                    &settings,
                    input_order.as_ref(),
                    &mut bloom_stats,
                )?;
                Some((settings, filters))
            }
            None => None,
        };

        let base_hashes = match base {
            Some(graph) => graph.layers()[folded..]
                .iter()
                .rev()
                .map(|layer| layer.checksum())
                .collect(),
            None => Vec::new(),
        };

        Ok(BuiltContent {
            content: GraphContent {
                oids,
                commits,
                bloom,
                base_hashes,
            },
            bloom_stats,
        })
    }

    fn compute_bloom_filters(
        &self,
        oids: &[ObjectId],
        parsed: &HashMap<ObjectId, Commit>,
        generations: &[u32],
        settings: &BloomSettings,
        input_order: Option<&HashMap<ObjectId, usize>>,
        stats: &mut BloomStats,
    ) -> anyhow::Result<Vec<BloomFilter>> {
        let mut order = (0..oids.len()).collect::<Vec<_>>();
        match input_order {
            Some(positions) => {
                order.sort_by_key(|&i| positions.get(&oids[i]).copied().unwrap_or(usize::MAX))
            }
            None => order.sort_by_key(|&i| generations[i]),
        }

        let reuse_from = match self.options.flags.contains(GraphWriteFlags::NO_BLOOM_REUSE) {
            true => None,
            false => self.existing.filter(|graph| {
                graph
                    .bloom_settings()
                    .is_some_and(|existing| existing.is_compatible_with(settings))
            }),
        };
        let max_new_filters = self.options.max_new_filters.unwrap_or(u32::MAX);

        let mut filters = vec![BloomFilter::from_bytes(Vec::new()); oids.len()];
        for i in order {
            let oid = &oids[i];

            let stored = reuse_from.and_then(|graph| {
                graph
                    .lookup(oid)
                    .and_then(|position| graph.bloom_filter(position))
            });
            if let Some(stored) = stored {
                filters[i] = BloomFilter::from_bytes(stored.to_vec());
                stats.reused += 1;
                continue;
            }

            if stats.computed >= max_new_filters {
                stats.not_computed += 1;
                continue;
            }

            let commit = parsed
                .get(oid)
                .with_context(|| format!("unable to parse commit {oid}"))?;
            let (filter, outcome) = compute_filter(self.store, commit, settings)
                .with_context(|| format!("unable to compute changed paths of {oid}"))?;
            filters[i] = filter;
            stats.record(outcome);
        }

        tracing::debug!(
            computed = stats.computed,
            reused = stats.reused,
            not_computed = stats.not_computed,
            truncated_empty = stats.truncated_empty,
            truncated_large = stats.truncated_large,
            "computed changed-path Bloom filters"
        );
        Ok(filters)
    }

    fn publish_single(&self, built: &BuiltContent) -> anyhow::Result<GraphWriteReport> {
        let target = graph_file_path(self.objects_dir);
        let lock = Lockfile::hold(&target)?;

        let file = lock.file()?;
        let (_, checksum) = built
            .content
            .write_to(BufWriter::new(file))
            .with_context(|| format!("unable to write {}", lock.lock_path().display()))?;
        lock.commit()?;

        tracing::info!(path = %target.display(), %checksum, "wrote commit-graph");

        let chain = chain_file_path(self.objects_dir);
        match std::fs::remove_file(&chain) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("unable to remove {}", chain.display()));
            }
        }
        let expired = self.expire_layers(&[])?;

        Ok(GraphWriteReport {
            path: Some(target),
            checksum: Some(checksum),
            num_layers: 1,
            expired,
            ..GraphWriteReport::default()
        })
    }

    fn publish_split(
        &self,
        built: &BuiltContent,
        folded: usize,
        kept: usize,
    ) -> anyhow::Result<GraphWriteReport> {
        let dir = graphs_dir(self.objects_dir);
        let lock = Lockfile::hold(&chain_file_path(self.objects_dir))?;

        let temp_path = dir.join(Self::generate_temp_name());
        let temp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .with_context(|| format!("unable to create temporary graph layer {}", temp_path.display()))?;

        let written = built.content.write_to(BufWriter::new(temp_file));
        let checksum = match written {
            Ok((writer, checksum)) => {
                let file = writer.into_inner().map_err(|err| err.into_error())?;
                file.sync_all()?;
                checksum
            }
            Err(err) => {
                let _ = std::fs::remove_file(&temp_path);
                return Err(err)
                    .with_context(|| format!("unable to write {}", temp_path.display()));
            }
        };

        let single = graph_file_path(self.objects_dir);
        let single_is_base = self
            .existing
            .filter(|_| kept > 0)
            .and_then(|graph| graph.layers().last())
            .filter(|base| base.path() == Some(single.as_path()));

        match single_is_base {
            Some(base) => {
                let dest = layer_file_path(self.objects_dir, &base.checksum().to_string());
                std::fs::rename(&single, &dest)
                    .with_context(|| format!("failed to rename base commit-graph file to {}", dest.display()))?;
            }
            None => match std::fs::remove_file(&single) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("unable to remove {}", single.display()));
                }
            },
        }

        let final_path = layer_file_path(self.objects_dir, &checksum.to_string());
        std::fs::rename(&temp_path, &final_path)
            .with_context(|| format!("failed to rename temporary commit-graph file to {}", final_path.display()))?;

        let mut chain = built.content.base_hashes.clone();
        chain.push(checksum);
        let chain_content = chain
            .iter()
            .map(|hash| format!("{hash}\n"))
            .collect::<String>();
        lock.write_all(chain_content.as_bytes())?;
        lock.commit()?;

        tracing::info!(path = %final_path.display(), layers = chain.len(), "wrote commit-graph layer");

        self.mark_folded_layers(folded);
        let keep = chain
            .iter()
            .map(|hash| layer_file_path(self.objects_dir, &hash.to_string()))
            .collect::<Vec<_>>();
        let expired = self.expire_layers(&keep)?;

        Ok(GraphWriteReport {
            path: Some(final_path),
            checksum: Some(checksum),
            num_layers: chain.len(),
            expired,
            ..GraphWriteReport::default()
        })
    }

    fn generate_temp_name() -> String {
        format!("tmp_graph_{:08x}", rand::random::<u32>())
    }

    /// Touch the folded layers so the expiry window starts now
    fn mark_folded_layers(&self, folded: usize) {
        let Some(graph) = self.existing else {
            return;
        };

        let now = filetime::FileTime::now();
        for layer in &graph.layers()[..folded] {
            let Some(path) = layer.path() else {
                continue;
            };
            if !path.exists() {
                continue;
            }
            if let Err(err) = filetime::set_file_mtime(path, now) {
                tracing::warn!(path = %path.display(), %err, "unable to mark merged commit-graph layer");
            }
        }
    }

    /// Delete `*.graph` files not in `keep` whose mtime is not after the expire time
    fn expire_layers(&self, keep: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
        let dir = graphs_dir(self.objects_dir);
        let expire_time = self
            .options
            .split
            .expire_time
            .unwrap_or_else(SystemTime::now);

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("unable to read {}", dir.display())),
        };

        let mut expired = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_none_or(|ext| ext != "graph") || keep.contains(&path) {
                continue;
            }
            let mtime = entry.metadata()?.modified()?;
            if mtime > expire_time {
                continue;
            }

            std::fs::remove_file(&path)
                .with_context(|| format!("unable to expire {}", path.display()))?;
            tracing::debug!(path = %path.display(), "expired commit-graph layer");
            expired.push(path);
        }

        expired.sort();
        Ok(expired)
    }
}

/// Content plus the statistics gathered while computing its filters
struct BuiltContent {
    content: GraphContent,
    bloom_stats: BloomStats,
}
