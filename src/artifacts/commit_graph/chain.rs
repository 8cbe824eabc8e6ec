//! Loading and querying a commit-graph, single file or chain of layers
//!
//! Layers are kept top first. `bases[i]` is the number of commits in every layer below
//! layer `i`, so the global position of a commit is its local position plus the base
//! count of its layer.

use crate::artifacts::commit_graph::bloom::{BloomKey, BloomSettings, filter_contains};
use crate::artifacts::commit_graph::generation::GENERATION_NUMBER_INFINITY;
use crate::artifacts::commit_graph::layer::GraphLayer;
use crate::artifacts::commit_graph::{
    GRAPH_EDGE_LAST_MASK, GRAPH_EXTRA_EDGES_NEEDED, GRAPH_PARENT_NONE, chain_file_path,
    graph_file_path, layer_file_path,
};
use crate::artifacts::format_error::FormatError;
use crate::artifacts::objects::object_id::ObjectId;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub read_changed_paths: bool,
    pub verify_checksums: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            read_changed_paths: true,
            verify_checksums: false,
        }
    }
}

/// A commit as recorded in the graph, parents resolved to global positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphCommit {
    pub oid: ObjectId,
    pub position: u32,
    pub tree: ObjectId,
    pub parents: Vec<u32>,
    pub generation: u32,
    pub date: u64,
}

#[derive(Debug)]
pub struct CommitGraph {
    layers: Vec<GraphLayer>,
    bases: Vec<u32>,
    bloom_settings: Option<BloomSettings>,
}

impl CommitGraph {
    /// Stack layers given base-most first
    pub fn from_layers(base_first: Vec<GraphLayer>) -> Self {
        let mut layers = base_first;
        layers.reverse();

        let mut bases = vec![0u32; layers.len()];
        let mut below = 0u32;
        for (i, layer) in layers.iter().enumerate().rev() {
            bases[i] = below;
            below += layer.num_commits();
        }

        let mut bloom_settings: Option<BloomSettings> = None;
        for layer in layers.iter_mut() {
            let Some(settings) = layer.bloom_settings() else {
                continue;
            };

            match &bloom_settings {
                None => bloom_settings = Some(settings),
                Some(chosen) if chosen.is_compatible_with(&settings) => {}
                Some(chosen) => {
                    tracing::warn!(
                        layer = %layer.checksum(),
                        ?settings,
                        ?chosen,
                        "disabling Bloom filters for commit-graph layer due to incompatible settings"
                    );
                    layer.disable_bloom_filters();
                }
            }
        }

        CommitGraph {
            layers,
            bases,
            bloom_settings,
        }
    }

    /// Load the graph of an object directory
    ///
    /// The single `info/commit-graph` file wins over a chain. `Ok(None)` means there is
    /// nothing usable to load.
    pub fn load(objects_dir: &Path, options: LoadOptions) -> Result<Option<Self>, FormatError> {
        let single = graph_file_path(objects_dir);

        match GraphLayer::open(&single, options.read_changed_paths) {
            Ok(layer) => {
                if options.verify_checksums && !layer.verify_checksum() {
                    return Err(FormatError::ChecksumMismatch { path: single });
                }
                Ok(Some(CommitGraph::from_layers(vec![layer])))
            }
            Err(FormatError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Self::load_chain(objects_dir, options)
            }
            Err(err) => Err(err),
        }
    }

    /// Load `commit-graph-chain`, keeping the longest valid prefix of layers
    pub fn load_chain(objects_dir: &Path, options: LoadOptions) -> Result<Option<Self>, FormatError> {
        let chain_path = chain_file_path(objects_dir);
        let content = match std::fs::read_to_string(&chain_path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(FormatError::io(chain_path, err)),
        };

        let mut loaded: Vec<GraphLayer> = Vec::new();
        for line in content.lines() {
            let Ok(hash) = ObjectId::try_parse(line.to_string()) else {
                tracing::warn!(line, "invalid commit-graph chain: line is not a hash");
                break;
            };

            let path = layer_file_path(objects_dir, &hash.to_string());
            let layer = match GraphLayer::open(&path, options.read_changed_paths) {
                Ok(layer) => layer,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "unable to find all commit-graph files");
                    break;
                }
            };

            if options.verify_checksums && !layer.verify_checksum() {
                tracing::warn!(path = %path.display(), "commit-graph layer has incorrect checksum");
                break;
            }
            if !Self::extends(&layer, &hash, &loaded) {
                tracing::warn!(path = %path.display(), "commit-graph chain does not match");
                break;
            }

            loaded.push(layer);
        }

        if loaded.is_empty() {
            return Ok(None);
        }
        Ok(Some(CommitGraph::from_layers(loaded)))
    }

    /// Whether `layer` (named `hash` in the chain file) sits on exactly `below`
    fn extends(layer: &GraphLayer, hash: &ObjectId, below: &[GraphLayer]) -> bool {
        if layer.checksum() != *hash {
            return false;
        }
        if below.is_empty() {
            return layer.num_base_graphs() == 0;
        }

        let Some(recorded) = layer.base_hashes() else {
            tracing::warn!("commit-graph has no base graphs chunk");
            return false;
        };

        recorded.len() == below.len()
            && recorded
                .iter()
                .zip(below)
                .all(|(recorded, base)| *recorded == base.checksum())
    }

    /// Layers, top first
    pub fn layers(&self) -> &[GraphLayer] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Number of commits in layer `index` (top first) and every layer below it
    pub fn commits_through(&self, index: usize) -> u32 {
        self.bases[index] + self.layers[index].num_commits()
    }

    pub fn num_commits(&self) -> u32 {
        match self.layers.first() {
            Some(_) => self.commits_through(0),
            None => 0,
        }
    }

    pub fn bloom_settings(&self) -> Option<BloomSettings> {
        self.bloom_settings
    }

    /// Layer index and local position holding global `position`
    fn resolve(&self, position: u32) -> Option<(usize, u32)> {
        self.layers
            .iter()
            .zip(&self.bases)
            .enumerate()
            .find(|(_, (_, base))| position >= **base)
            .and_then(|(index, (layer, base))| {
                let local = position - base;
                (local < layer.num_commits()).then_some((index, local))
            })
    }

    /// Global position of `oid`, searching from the top layer down
    pub fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        self.layers
            .iter()
            .zip(&self.bases)
            .find_map(|(layer, base)| layer.locate(oid).map(|local| base + local))
    }

    /// Global position of `oid` among layer `first_layer` (top first) and those below it
    pub fn lookup_from(&self, oid: &ObjectId, first_layer: usize) -> Option<u32> {
        self.layers
            .iter()
            .zip(&self.bases)
            .skip(first_layer)
            .find_map(|(layer, base)| layer.locate(oid).map(|local| base + local))
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.lookup(oid).is_some()
    }

    pub fn oid_at(&self, position: u32) -> Option<ObjectId> {
        let (index, local) = self.resolve(position)?;
        Some(self.layers[index].oid_at(local))
    }

    /// Every indexed id, base layer first, sorted within a layer
    pub fn oids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.layers
            .iter()
            .rev()
            .flat_map(|layer| (0..layer.num_commits()).map(move |local| layer.oid_at(local)))
    }

    /// Decode the commit at `position`
    pub fn commit(&self, position: u32) -> Result<GraphCommit, FormatError> {
        let (index, local) = self
            .resolve(position)
            .ok_or_else(|| FormatError::corrupt(format!("invalid commit position {position}")))?;
        let layer = &self.layers[index];
        let visible = self.commits_through(index);
        let record = layer.record(local);

        let mut parents = Vec::new();
        if record.parent1 != GRAPH_PARENT_NONE {
            parents.push(record.parent1);

            if record.parent2 & GRAPH_EXTRA_EDGES_NEEDED != 0 {
                parents.extend(layer.extra_edges(record.parent2 & GRAPH_EDGE_LAST_MASK)?);
            } else if record.parent2 != GRAPH_PARENT_NONE {
                parents.push(record.parent2);
            }
        } else if record.parent2 != GRAPH_PARENT_NONE {
            return Err(FormatError::corrupt(format!(
                "commit at position {position} has a second parent but no first parent"
            )));
        }

        if let Some(bad) = parents.iter().find(|parent| **parent >= visible) {
            return Err(FormatError::corrupt(format!(
                "invalid parent position {bad} for commit at position {position}"
            )));
        }

        Ok(GraphCommit {
            oid: layer.oid_at(local),
            position,
            tree: record.tree,
            parents,
            generation: record.generation,
            date: record.date,
        })
    }

    pub fn commit_by_oid(&self, oid: &ObjectId) -> Result<Option<GraphCommit>, FormatError> {
        match self.lookup(oid) {
            Some(position) => self.commit(position).map(Some),
            None => Ok(None),
        }
    }

    /// Parent ids of `oid`, `None` when the commit is not in the graph
    pub fn parents(&self, oid: &ObjectId) -> Result<Option<Vec<ObjectId>>, FormatError> {
        let Some(commit) = self.commit_by_oid(oid)? else {
            return Ok(None);
        };

        commit
            .parents
            .iter()
            .map(|&position| {
                self.oid_at(position).ok_or_else(|| {
                    FormatError::corrupt(format!("invalid parent position {position}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Generation of `oid`, INFINITY when the graph does not know it
    pub fn generation(&self, oid: &ObjectId) -> u32 {
        match self.lookup(oid) {
            Some(position) => self.generation_at(position),
            None => GENERATION_NUMBER_INFINITY,
        }
    }

    pub fn generation_at(&self, position: u32) -> u32 {
        match self.resolve(position) {
            Some((index, local)) => self.layers[index].record(local).generation,
            None => GENERATION_NUMBER_INFINITY,
        }
    }

    /// Stored filter bytes for the commit at `position`
    pub fn bloom_filter(&self, position: u32) -> Option<&[u8]> {
        self.bloom_settings?;
        let (index, local) = self.resolve(position)?;
        self.layers[index].bloom_filter(local)
    }

    /// Whether `oid` may have changed `path` relative to its first parent
    ///
    /// Answers `true` whenever no trusted filter exists for the commit.
    pub fn maybe_changed(&self, oid: &ObjectId, path: &str) -> bool {
        let Some(settings) = self.bloom_settings else {
            return true;
        };
        let Some(filter) = self.lookup(oid).and_then(|position| self.bloom_filter(position))
        else {
            return true;
        };

        BloomKey::for_path_and_parents(path, &settings)
            .iter()
            .all(|key| filter_contains(filter, key))
    }
}
