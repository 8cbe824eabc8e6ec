//! In-memory object store
//!
//! Holds objects, refs, and a pack listing in plain maps. Used by the unit tests and by
//! callers that want to index objects that never touch the disk.

use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::{Author, Commit};
use crate::artifacts::objects::object::{Object, with_header};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tree::{EntryMode, Tree, TreeEntry};
use crate::artifacts::store::{ObjectStore, PackedObject, RefStore, RevisionWalk};
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: HashMap<ObjectId, (ObjectType, Bytes)>,
    refs: BTreeMap<String, ObjectId>,
    packs: BTreeMap<String, Vec<(ObjectId, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return its id
    pub fn insert(&mut self, object: &impl Object) -> anyhow::Result<ObjectId> {
        let oid = object.object_id()?;
        let serialized = object.serialize()?;
        let header_end = serialized
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| anyhow::anyhow!("serialized object has no header"))?;

        self.objects
            .insert(oid, (object.object_type(), serialized.slice(header_end + 1..)));
        Ok(oid)
    }

    /// Store an already serialized payload under the id its header would give it
    pub fn insert_raw(&mut self, object_type: ObjectType, content: Bytes) -> anyhow::Result<ObjectId> {
        let mut hasher = Sha1::new();
        hasher.update(with_header(object_type, &content));
        let oid = ObjectId::from_bytes(&hasher.finalize())?;

        self.objects.insert(oid, (object_type, content));
        Ok(oid)
    }

    pub fn set_ref(&mut self, name: &str, oid: ObjectId) {
        self.refs.insert(name.to_string(), oid);
    }

    /// Record `oid` as living in `pack` at `offset`
    pub fn add_to_pack(&mut self, pack: &str, oid: ObjectId, offset: u64) {
        self.packs
            .entry(pack.to_string())
            .or_default()
            .push((oid, offset));
    }

    pub fn remove(&mut self, oid: &ObjectId) {
        self.objects.remove(oid);
    }

    /// Write a tree (and its subtrees and blobs) for a list of `path => content` files
    pub fn write_tree(&mut self, files: &[(&str, &str)]) -> anyhow::Result<ObjectId> {
        let mut direct = Vec::new();
        let mut nested: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();

        for (path, content) in files {
            match path.split_once('/') {
                Some((dir, rest)) => nested.entry(dir).or_default().push((rest, *content)),
                None => direct.push((*path, *content)),
            }
        }

        let mut tree = Tree::default();
        for (name, content) in direct {
            let oid = self.insert(&Blob::new(Bytes::copy_from_slice(content.as_bytes())))?;
            tree.insert(name, TreeEntry::new(oid, EntryMode::Regular));
        }
        for (dir, files) in nested {
            let oid = self.write_tree(&files)?;
            tree.insert(dir, TreeEntry::new(oid, EntryMode::Directory));
        }

        self.insert(&tree)
    }

    /// Write a commit over `files` with the given parents and committer date
    pub fn commit(
        &mut self,
        parents: &[ObjectId],
        files: &[(&str, &str)],
        date: i64,
    ) -> anyhow::Result<ObjectId> {
        let tree = self.write_tree(files)?;
        let timestamp = chrono::DateTime::from_timestamp(date, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid date {date}"))?
            .fixed_offset();
        let author = Author::new("A U Thor".to_string(), "author@example.com".to_string(), timestamp);

        self.insert(&Commit::new(
            parents.to_vec(),
            tree,
            author,
            format!("commit at {date}"),
        ))
    }
}

impl ObjectStore for MemoryStore {
    fn object_type(&self, oid: &ObjectId) -> anyhow::Result<ObjectType> {
        self.objects
            .get(oid)
            .map(|(object_type, _)| *object_type)
            .ok_or_else(|| anyhow::anyhow!("object {oid} not found"))
    }

    fn object_size(&self, oid: &ObjectId) -> anyhow::Result<u64> {
        Ok(self.read_object(oid)?.len() as u64)
    }

    fn read_object(&self, oid: &ObjectId) -> anyhow::Result<Bytes> {
        self.objects
            .get(oid)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| anyhow::anyhow!("object {oid} not found"))
    }

    fn packed_objects(&self) -> anyhow::Result<Vec<PackedObject>> {
        Ok(self
            .packs
            .iter()
            .flat_map(|(pack, objects)| {
                objects
                    .iter()
                    .map(|(oid, offset)| PackedObject::new(*oid, pack.clone(), *offset))
            })
            .collect())
    }
}

impl RevisionWalk for MemoryStore {}

impl RefStore for MemoryStore {
    fn for_each_ref(&self, visit: &mut dyn FnMut(&str, &ObjectId)) -> anyhow::Result<()> {
        for (name, oid) in &self.refs {
            visit(name, oid);
        }
        Ok(())
    }
}
