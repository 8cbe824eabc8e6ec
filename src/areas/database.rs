//! Object database under `.git/objects`
//!
//! Loose objects are zlib-compressed files at `<objects>/<xx>/<38 hex>`. Pack contents
//! are never decompressed here: packed objects are known only through the pack indexes
//! in `<objects>/pack`, which is all the multi-pack-index and pack-based commit-graph
//! inputs need.

use crate::artifacts::objects::object::Object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::pack::directory::PackDirectory;
use crate::artifacts::pack::pack_dir;
use crate::artifacts::store::{ObjectStore, PackedObject, RevisionWalk};
use anyhow::Context;
use bytes::Bytes;
use fake::rand;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Database {
    path: Box<Path>,
    packs: PackDirectory,
}

impl Database {
    pub fn new(path: Box<Path>) -> Self {
        let packs = PackDirectory::new(pack_dir(&path));
        Database { path, packs }
    }

    pub fn objects_path(&self) -> &Path {
        &self.path
    }

    pub fn packs(&self) -> &PackDirectory {
        &self.packs
    }

    /// Raw loose object, header included
    pub fn load(&self, object_id: &ObjectId) -> anyhow::Result<Bytes> {
        let object_path = self.path.join(object_id.to_path());

        self.read_object_file(object_path)
            .with_context(|| format!("object {object_id} not found"))
    }

    pub fn store(&self, object: &impl Object) -> anyhow::Result<ObjectId> {
        let object_id = object.object_id()?;
        let object_path = self.path.join(object_id.to_path());

        // objects are immutable, an existing file already holds the same content
        if !object_path.exists() {
            let object_dir = object_path
                .parent()
                .with_context(|| format!("Invalid object path {}", object_path.display()))?;
            std::fs::create_dir_all(object_dir).with_context(|| {
                format!("Unable to create object directory {}", object_dir.display())
            })?;

            self.write_object_file(object_path, object.serialize()?)?;
        }

        Ok(object_id)
    }

    fn parse_object(&self, object_id: &ObjectId) -> anyhow::Result<(ObjectType, u64, Bytes)> {
        let content = self.load(object_id)?;
        let mut reader = Cursor::new(&content[..]);
        let (object_type, size) = ObjectType::parse_object_header(&mut reader)
            .with_context(|| format!("object {object_id} has a malformed header"))?;
        let payload = content.slice(reader.position() as usize..);

        Ok((object_type, size, payload))
    }

    fn read_object_file(&self, object_path: PathBuf) -> anyhow::Result<Bytes> {
        let object_content = std::fs::read(&object_path).with_context(|| {
            format!("Unable to read object file {}", object_path.display())
        })?;

        Self::decompress(object_content.into())
    }

    fn write_object_file(&self, object_path: PathBuf, object_content: Bytes) -> anyhow::Result<()> {
        let object_dir = object_path
            .parent()
            .with_context(|| format!("Invalid object path {}", object_path.display()))?;
        let temp_object_path = object_dir.join(Self::generate_temp_name());

        let object_content = Self::compress(object_content)?;

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_object_path)
            .with_context(|| {
                format!("Unable to open object file {}", temp_object_path.display())
            })?;

        file.write_all(&object_content).with_context(|| {
            format!("Unable to write object file {}", temp_object_path.display())
        })?;

        // rename the temp file to the object file to make it atomic
        std::fs::rename(&temp_object_path, &object_path).with_context(|| {
            format!("Unable to rename object file to {}", object_path.display())
        })?;

        Ok(())
    }

    fn compress(data: Bytes) -> anyhow::Result<Bytes> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(&data)
            .context("Unable to compress object content")?;

        encoder
            .finish()
            .map(|compressed_content| compressed_content.into())
            .context("Unable to finish compressing object content")
    }

    fn decompress(data: Bytes) -> anyhow::Result<Bytes> {
        let mut decoder = flate2::read::ZlibDecoder::new(&*data);
        let mut decompressed_content = Vec::new();
        decoder
            .read_to_end(&mut decompressed_content)
            .context("Unable to decompress object content")?;

        Ok(decompressed_content.into())
    }

    fn generate_temp_name() -> String {
        format!("tmp-obj-{}", rand::random::<u32>())
    }
}

impl ObjectStore for Database {
    fn object_type(&self, oid: &ObjectId) -> anyhow::Result<ObjectType> {
        Ok(self.parse_object(oid)?.0)
    }

    fn object_size(&self, oid: &ObjectId) -> anyhow::Result<u64> {
        Ok(self.parse_object(oid)?.1)
    }

    fn read_object(&self, oid: &ObjectId) -> anyhow::Result<Bytes> {
        Ok(self.parse_object(oid)?.2)
    }

    fn packed_objects(&self) -> anyhow::Result<Vec<PackedObject>> {
        self.packs.packed_objects()
    }
}

impl RevisionWalk for Database {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::objects::blob::Blob;
    use crate::artifacts::objects::commit::{Author, Commit};
    use crate::artifacts::objects::tree::{EntryMode, Tree, TreeEntry};
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;

    fn database() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let database = Database::new(dir.path().to_path_buf().into_boxed_path());
        (dir, database)
    }

    #[test]
    fn stored_objects_read_back_through_the_store_contract() {
        let (_dir, database) = database();
        let blob = database
            .store(&Blob::new(Bytes::from_static(b"hello\n")))
            .unwrap();
        let mut tree = Tree::default();
        tree.insert("hello.txt", TreeEntry::new(blob, EntryMode::Regular));
        let tree = database.store(&tree).unwrap();
        let timestamp = chrono::DateTime::from_timestamp(1_700_000_000, 0)
            .unwrap()
            .fixed_offset();
        let author = Author::new("A U Thor".to_string(), "a@example.com".to_string(), timestamp);
        let commit = database
            .store(&Commit::new(vec![], tree, author, "initial\n".to_string()))
            .unwrap();

        assert_eq!(database.object_type(&blob).unwrap(), ObjectType::Blob);
        assert_eq!(database.object_size(&blob).unwrap(), 6);
        assert_eq!(&database.read_object(&blob).unwrap()[..], b"hello\n");

        let parsed = database.read_commit(&commit).unwrap();
        assert_eq!(parsed.tree_oid(), &tree);
        assert_eq!(parsed.date(), 1_700_000_000);
        assert_eq!(database.reachable_commits(&[commit]).unwrap(), vec![commit]);
    }

    #[test]
    fn storing_twice_is_harmless() {
        let (_dir, database) = database();
        let blob = Blob::new(Bytes::from_static(b"same"));

        let first = database.store(&blob).unwrap();
        let second = database.store(&blob).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn missing_object_names_the_id() {
        let (_dir, database) = database();
        let oid = ObjectId::try_parse("0123456789abcdef0123456789abcdef01234567".to_string())
            .unwrap();

        let err = database.object_type(&oid).unwrap_err();

        assert_eq!(err.to_string(), format!("object {oid} not found"));
    }

    #[test]
    fn no_pack_directory_means_no_packed_objects() {
        let (_dir, database) = database();

        assert!(database.packed_objects().unwrap().is_empty());
    }
}
