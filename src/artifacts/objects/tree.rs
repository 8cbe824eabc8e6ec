//! Tree object
//!
//! Trees represent directory snapshots. Each entry names a blob, a nested tree, a
//! symbolic link or a submodule commit. Changed-path filters are computed by walking
//! two trees side by side, so the only requirement here is a faithful parse plus a
//! serializer that produces the canonical entry order.
//!
//! ## Format
//!
//! On disk: `tree <size>\0<entries>`
//! Each entry: `<mode> <name>\0<20-byte-sha1>`
//!
//! Entries are ordered by name, with directory names compared as if they ended in `/`.
//! Keying directories as `name/` inside a `BTreeMap` yields exactly that order.

use crate::artifacts::objects::object::{Object, Packable, Unpackable, with_header};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use derive_new::new;
use std::collections::BTreeMap;
use std::io::BufRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryMode {
    Regular,
    Executable,
    Symlink,
    Directory,
    Gitlink,
}

impl EntryMode {
    pub fn as_str(&self) -> &str {
        match self {
            EntryMode::Regular => "100644",
            EntryMode::Executable => "100755",
            EntryMode::Symlink => "120000",
            EntryMode::Directory => "40000",
            EntryMode::Gitlink => "160000",
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, EntryMode::Directory)
    }
}

impl TryFrom<&str> for EntryMode {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> anyhow::Result<Self> {
        match value {
            "100644" | "100664" | "100600" => Ok(EntryMode::Regular),
            "100755" => Ok(EntryMode::Executable),
            "120000" => Ok(EntryMode::Symlink),
            "40000" | "040000" => Ok(EntryMode::Directory),
            "160000" => Ok(EntryMode::Gitlink),
            _ => Err(anyhow::anyhow!("Invalid entry mode {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct TreeEntry {
    pub oid: ObjectId,
    pub mode: EntryMode,
}

impl TreeEntry {
    pub fn is_tree(&self) -> bool {
        self.mode.is_tree()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    /// Entries keyed by sort key (directories carry a trailing `/`)
    entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    /// Add an entry, replacing any previous entry with the same name
    pub fn insert(&mut self, name: &str, entry: TreeEntry) {
        let key = if entry.is_tree() {
            format!("{name}/")
        } else {
            name.to_string()
        };
        self.entries.insert(key, entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in canonical order, with plain names
    pub fn entries(&self) -> impl Iterator<Item = (&str, &TreeEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.trim_end_matches('/'), entry))
    }

    /// Entries keyed by plain name, the shape used when comparing two trees
    pub fn into_named_entries(self) -> BTreeMap<String, TreeEntry> {
        self.entries
            .into_iter()
            .map(|(key, entry)| (key.trim_end_matches('/').to_string(), entry))
            .collect()
    }
}

impl Packable for Tree {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut content = Vec::new();

        for (name, entry) in self.entries() {
            content.extend_from_slice(format!("{} {}", entry.mode.as_str(), name).as_bytes());
            content.push(0);
            entry.oid.write_h40_to(&mut content)?;
        }

        Ok(with_header(self.object_type(), &content))
    }
}

impl Unpackable for Tree {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let mut tree = Tree::default();
        let mut reader = reader;

        // Reuse scratch buffers to reduce allocs
        let mut mode_bytes = Vec::new();
        let mut name_bytes = Vec::new();

        loop {
            mode_bytes.clear();
            let n = reader.read_until(b' ', &mut mode_bytes)?;
            if n == 0 {
                break;
            }
            if mode_bytes.pop() != Some(b' ') {
                return Err(anyhow::anyhow!("unexpected EOF in mode"));
            }
            let mode = EntryMode::try_from(std::str::from_utf8(&mode_bytes)?)?;

            name_bytes.clear();
            reader.read_until(b'\0', &mut name_bytes)?;
            if name_bytes.pop() != Some(b'\0') {
                return Err(anyhow::anyhow!("unexpected EOF in name"));
            }
            let name = std::str::from_utf8(&name_bytes)?.to_owned();

            let oid =
                ObjectId::read_h40_from(&mut reader).context("unexpected EOF in object id")?;

            tree.insert(&name, TreeEntry::new(oid, mode));
        }

        Ok(tree)
    }
}

impl Object for Tree {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tree
    }
}
