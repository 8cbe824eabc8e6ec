use crate::areas::database::Database;
use crate::areas::refs::Refs;
use crate::artifacts::commit_graph::chain::CommitGraph;
use crate::artifacts::midx::midx_file_path;
use crate::artifacts::midx::reader::MultiPackIndex;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::settings::Settings;
use crate::artifacts::store::{ObjectStore, PackStore};
use std::cell::{RefCell, RefMut};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Name of the repository metadata directory
pub const GIT_DIR: &str = ".git";

/// A lazily loaded acceleration file
///
/// `Loaded(None)` remembers that loading was attempted and nothing usable was found,
/// so a missing or corrupt file is not read again until the cache is closed.
#[derive(Debug)]
enum Cached<T> {
    Unloaded,
    Loaded(Option<Rc<T>>),
}

pub struct Repository {
    path: Box<Path>,
    git_dir: Box<Path>,
    writer: RefCell<Box<dyn std::io::Write>>,
    database: Database,
    refs: Refs,
    settings: Settings,
    commit_graph: RefCell<Cached<CommitGraph>>,
    multi_pack_index: RefCell<Cached<MultiPackIndex>>,
}

impl Repository {
    /// Open the repository at `path`, optionally reading objects from another directory
    pub fn open(
        path: &Path,
        objects_dir: Option<PathBuf>,
        settings: Settings,
        writer: Box<dyn std::io::Write>,
    ) -> anyhow::Result<Self> {
        let path = path.canonicalize()?;
        let git_dir = path.join(GIT_DIR);
        let objects_dir = objects_dir.unwrap_or_else(|| git_dir.join("objects"));

        Ok(Repository {
            database: Database::new(objects_dir.into_boxed_path()),
            refs: Refs::new(git_dir.clone().into_boxed_path()),
            path: path.into_boxed_path(),
            git_dir: git_dir.into_boxed_path(),
            writer: RefCell::new(writer),
            settings,
            commit_graph: RefCell::new(Cached::Unloaded),
            multi_pack_index: RefCell::new(Cached::Unloaded),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn objects_dir(&self) -> &Path {
        self.database.objects_path()
    }

    pub fn writer(&'_ self) -> RefMut<'_, Box<dyn std::io::Write>> {
        self.writer.borrow_mut()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Why commit-graph files cannot be trusted in this repository, if they cannot
    ///
    /// Grafts, shallow boundaries and replace refs all change the parents a commit
    /// appears to have without touching the commit itself.
    pub fn commit_graph_incompatibility(&self) -> Option<&'static str> {
        if self.git_dir.join("info").join("grafts").exists() {
            Some("repository has grafts")
        } else if self.git_dir.join("shallow").exists() {
            Some("repository is shallow")
        } else if self.refs.has_replace_refs() {
            Some("repository has replace refs")
        } else {
            None
        }
    }

    /// The commit-graph of this repository, loaded on first use
    pub fn commit_graph(&self) -> Option<Rc<CommitGraph>> {
        if let Cached::Loaded(graph) = &*self.commit_graph.borrow() {
            return graph.clone();
        }

        let graph = self.load_commit_graph().map(Rc::new);
        *self.commit_graph.borrow_mut() = Cached::Loaded(graph.clone());
        graph
    }

    fn load_commit_graph(&self) -> Option<CommitGraph> {
        if !self.settings.commit_graph {
            tracing::debug!("commit-graph disabled by settings");
            return None;
        }
        if let Some(reason) = self.commit_graph_incompatibility() {
            tracing::debug!(reason, "skipping commit-graph");
            return None;
        }

        match CommitGraph::load(self.objects_dir(), self.settings.graph_load_options()) {
            Ok(graph) => graph,
            Err(err) if err.is_incompatible() => {
                tracing::debug!(error = %err, "skipping commit-graph");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "commit-graph failed to load");
                None
            }
        }
    }

    /// Forget the loaded commit-graph; the next access reads the files again
    pub fn close_commit_graph(&self) {
        *self.commit_graph.borrow_mut() = Cached::Unloaded;
    }

    /// The multi-pack-index of this repository, loaded on first use
    pub fn multi_pack_index(&self) -> Option<Rc<MultiPackIndex>> {
        if let Cached::Loaded(midx) = &*self.multi_pack_index.borrow() {
            return midx.clone();
        }

        let midx = self.load_multi_pack_index().map(Rc::new);
        *self.multi_pack_index.borrow_mut() = Cached::Loaded(midx.clone());
        midx
    }

    fn load_multi_pack_index(&self) -> Option<MultiPackIndex> {
        if !self.settings.multi_pack_index {
            tracing::debug!("multi-pack-index disabled by settings");
            return None;
        }

        let path = midx_file_path(self.objects_dir());
        if !path.exists() {
            return None;
        }

        match MultiPackIndex::open(&path) {
            Ok(midx) => Some(midx),
            Err(err) if err.is_incompatible() => {
                tracing::debug!(error = %err, "skipping multi-pack-index");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "multi-pack-index failed to load");
                None
            }
        }
    }

    pub fn close_multi_pack_index(&self) {
        *self.multi_pack_index.borrow_mut() = Cached::Unloaded;
    }

    /// Pack name and offset of a packed object
    ///
    /// Answered by the multi-pack-index when it knows the object, otherwise by asking
    /// every pack index in turn.
    pub fn locate_object(&self, oid: &ObjectId) -> anyhow::Result<Option<(String, u64)>> {
        if let Some(midx) = self.multi_pack_index() {
            match midx.find(oid) {
                Ok(Some(entry)) => {
                    if let Some(name) = midx.pack_name(entry.pack_int_id) {
                        return Ok(Some((name.to_string(), entry.offset)));
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "multi-pack-index lookup failed"),
            }
        }

        let packs = self.database.packs();
        for pack in packs.packs()? {
            if let Some(offset) = packs.find_offset(&pack.name, oid)? {
                return Ok(Some((pack.name, offset)));
            }
        }

        Ok(None)
    }

    /// Parents of a commit, from the commit-graph when it has the commit
    pub fn parents(&self, oid: &ObjectId) -> anyhow::Result<Vec<ObjectId>> {
        if let Some(graph) = self.commit_graph() {
            match graph.parents(oid) {
                Ok(Some(parents)) => return Ok(parents),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "commit-graph lookup failed"),
            }
        }

        Ok(self.database.read_commit(oid)?.parents().to_vec())
    }
}
