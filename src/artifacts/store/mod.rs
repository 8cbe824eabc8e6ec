//! Collaborator contracts
//!
//! The index files are derived data: everything they record can be recomputed from the
//! object store, the refs, and the pack indexes. These traits are the only way the
//! builders and verifiers reach that raw data.
//!
//! - [`ObjectStore`]: object type/size/content by id, plus the listing of packed objects
//! - [`RevisionWalk`]: the commit closure reachable from a set of tips
//! - [`RefStore`]: every ref name with the id it points to
//! - [`PackStore`]: pack files with their own per-pack index

pub mod memory;

use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tree::Tree;
use anyhow::Context;
use bytes::Bytes;
use derive_new::new;
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::time::SystemTime;

/// One object as listed by a pack index
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct PackedObject {
    pub oid: ObjectId,
    /// Name of the pack's `.idx` file
    pub pack: String,
    pub offset: u64,
}

pub trait ObjectStore {
    fn object_type(&self, oid: &ObjectId) -> anyhow::Result<ObjectType>;

    fn object_size(&self, oid: &ObjectId) -> anyhow::Result<u64>;

    /// Object payload, without the `<type> <size>\0` header
    fn read_object(&self, oid: &ObjectId) -> anyhow::Result<Bytes>;

    /// Every object of every pack, pack by pack, in index order within a pack
    fn packed_objects(&self) -> anyhow::Result<Vec<PackedObject>>;

    fn read_commit(&self, oid: &ObjectId) -> anyhow::Result<Commit> {
        let object_type = self.object_type(oid)?;
        if object_type != ObjectType::Commit {
            anyhow::bail!("object {oid} is a {object_type}, not a commit");
        }

        Commit::deserialize(Cursor::new(self.read_object(oid)?))
            .with_context(|| format!("unable to parse commit {oid}"))
    }

    fn read_tree(&self, oid: &ObjectId) -> anyhow::Result<Tree> {
        let object_type = self.object_type(oid)?;
        if object_type != ObjectType::Tree {
            anyhow::bail!("object {oid} is a {object_type}, not a tree");
        }

        Tree::deserialize(Cursor::new(self.read_object(oid)?))
            .with_context(|| format!("unable to parse tree {oid}"))
    }

    /// Follow annotated tags down to a commit
    ///
    /// Returns `None` when the chain ends at something other than a commit.
    fn peel_to_commit(&self, oid: &ObjectId) -> anyhow::Result<Option<ObjectId>> {
        let mut current = *oid;

        loop {
            match self.object_type(&current)? {
                ObjectType::Commit => return Ok(Some(current)),
                ObjectType::Tag => {
                    let content = self.read_object(&current)?;
                    let target = std::str::from_utf8(&content)?
                        .lines()
                        .next()
                        .and_then(|line| line.strip_prefix("object "))
                        .with_context(|| format!("tag {current} has no object line"))?;
                    current = ObjectId::try_parse(target.to_string())?;
                }
                ObjectType::Blob | ObjectType::Tree => return Ok(None),
            }
        }
    }
}

pub trait RevisionWalk: ObjectStore {
    /// Every commit reachable from `tips`, tips included, in breadth-first order
    fn reachable_commits(&self, tips: &[ObjectId]) -> anyhow::Result<Vec<ObjectId>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        let mut reachable = Vec::new();

        for tip in tips {
            if seen.insert(*tip) {
                queue.push_back(*tip);
            }
        }

        while let Some(oid) = queue.pop_front() {
            let commit = self.read_commit(&oid)?;
            reachable.push(oid);

            for parent in commit.parents() {
                if seen.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }

        Ok(reachable)
    }
}

pub trait RefStore {
    fn for_each_ref(&self, visit: &mut dyn FnMut(&str, &ObjectId)) -> anyhow::Result<()>;
}

/// A pack as seen by the multi-pack-index
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct PackInfo {
    /// Name of the `.idx` file, e.g. `pack-<hash>.idx`
    pub name: String,
    /// Modification time of the `.pack` file
    pub mtime: SystemTime,
    /// A `.keep` file protects the pack from expiry
    pub keep: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct PackEntry {
    pub oid: ObjectId,
    pub offset: u64,
}

pub trait PackStore {
    /// Packs sorted by name
    fn packs(&self) -> anyhow::Result<Vec<PackInfo>>;

    /// Entries of one pack, sorted by id
    fn pack_entries(&self, pack: &str) -> anyhow::Result<Vec<PackEntry>>;

    /// Offset of `oid` according to the pack's own index
    fn find_offset(&self, pack: &str, oid: &ObjectId) -> anyhow::Result<Option<u64>>;

    /// Delete the pack and its side files
    fn remove_pack(&self, pack: &str) -> anyhow::Result<()>;
}
