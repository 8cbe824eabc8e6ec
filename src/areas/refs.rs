//! References under `.git`
//!
//! Only enumeration matters here: the reachable-commits input of the commit-graph
//! starts from every ref, and the presence of replace refs disables the graph.
//!
//! ## File Format
//!
//! References are stored as text files containing either:
//! - A 40-character SHA-1 hash (direct reference)
//! - `ref: <path>` for symbolic references

use crate::areas::lockfile::Lockfile;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::store::RefStore;
use anyhow::Context;
use derive_new::new;
use std::path::Path;
use walkdir::WalkDir;

/// Regex pattern for parsing symbolic references
const SYMREF_REGEX: &str = r"^ref: (.+)$";

/// Name of the HEAD reference
pub const HEAD_REF_NAME: &str = "HEAD";

pub const REFS_DIR: &str = "refs";

/// Refs whose presence rewrites history behind the graph's back
pub const REPLACE_REFS_DIR: &str = "refs/replace";

/// Symbolic chains longer than this are treated as broken
const MAX_SYMREF_DEPTH: usize = 5;

#[derive(Debug, new)]
pub struct Refs {
    /// Path to the `.git` directory
    path: Box<Path>,
}

#[derive(Debug, Clone)]
enum SymRefOrOid {
    SymRef(String),
    Oid(ObjectId),
}

impl SymRefOrOid {
    fn read_symref_or_oid(path: &Path) -> anyhow::Result<Option<SymRefOrOid>> {
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read ref {}", path.display()))?;
        let content = content.trim();

        if content.is_empty() {
            return Ok(None);
        }

        let symref_match = regex::Regex::new(SYMREF_REGEX)?.captures(content);
        if let Some(symref_match) = symref_match {
            Ok(Some(SymRefOrOid::SymRef(symref_match[1].to_string())))
        } else {
            Ok(Some(SymRefOrOid::Oid(
                ObjectId::try_parse(content.to_string())
                    .with_context(|| format!("invalid ref {}", path.display()))?,
            )))
        }
    }
}

impl Refs {
    pub fn read_head(&self) -> anyhow::Result<Option<ObjectId>> {
        self.read_ref(HEAD_REF_NAME)
    }

    /// Resolve a ref name such as `HEAD` or `refs/heads/main`, following symbolic refs
    pub fn read_ref(&self, name: &str) -> anyhow::Result<Option<ObjectId>> {
        let mut name = name.to_string();

        for _ in 0..MAX_SYMREF_DEPTH {
            match SymRefOrOid::read_symref_or_oid(&self.path.join(&name))? {
                Some(SymRefOrOid::SymRef(target)) => name = target,
                Some(SymRefOrOid::Oid(oid)) => return Ok(Some(oid)),
                None => return Ok(None),
            }
        }

        tracing::warn!(name, "symbolic ref chain is too deep");
        Ok(None)
    }

    /// Point `name` (e.g. `refs/heads/main`) directly at `oid`
    pub fn update_ref(&self, name: &str, oid: &ObjectId) -> anyhow::Result<()> {
        let lock = Lockfile::hold(&self.path.join(name))?;
        lock.write_all(format!("{oid}\n").as_bytes())?;
        lock.commit()
            .with_context(|| format!("unable to update ref {name}"))
    }

    /// Point `HEAD` at another ref
    pub fn set_head(&self, target: &str) -> anyhow::Result<()> {
        let lock = Lockfile::hold(&self.path.join(HEAD_REF_NAME))?;
        lock.write_all(format!("ref: {target}\n").as_bytes())?;
        Ok(lock.commit()?)
    }

    /// `HEAD` (when it resolves) followed by every ref under `refs/`, sorted by name
    pub fn list_refs(&self) -> anyhow::Result<Vec<(String, ObjectId)>> {
        let mut refs = Vec::new();

        if let Some(head) = self.read_head()? {
            refs.push((HEAD_REF_NAME.to_string(), head));
        }

        let mut names = self.ref_names(REFS_DIR);
        names.sort();
        for name in names {
            if let Some(oid) = self.read_ref(&name)? {
                refs.push((name, oid));
            }
        }

        Ok(refs)
    }

    pub fn has_replace_refs(&self) -> bool {
        !self.ref_names(REPLACE_REFS_DIR).is_empty()
    }

    fn ref_names(&self, dir: &str) -> Vec<String> {
        let root = self.path.join(dir);
        if !root.is_dir() {
            return Vec::new();
        }

        WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.path).ok()?;
                let name = relative
                    .components()
                    .map(|part| part.as_os_str().to_str())
                    .collect::<Option<Vec<_>>>()?
                    .join("/");
                (!name.ends_with(".lock")).then_some(name)
            })
            .collect()
    }
}

impl RefStore for Refs {
    fn for_each_ref(&self, visit: &mut dyn FnMut(&str, &ObjectId)) -> anyhow::Result<()> {
        for (name, oid) in self.list_refs()? {
            visit(&name, &oid);
        }
        Ok(())
    }
}
