use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::pack::pack_index::PackIndex;
use crate::artifacts::pack::side_file_name;
use crate::artifacts::store::{PackEntry, PackInfo, PackStore, PackedObject};
use anyhow::Context;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use walkdir::WalkDir;

/// Side files deleted together with a pack
const PACK_SIDE_FILES: [&str; 4] = ["pack", "rev", "bitmap", "idx"];

/// The `objects/pack` directory
///
/// Pack indexes are opened on first use and kept mapped for the lifetime of the handle.
#[derive(Debug)]
pub struct PackDirectory {
    path: PathBuf,
    indexes: RefCell<HashMap<String, Rc<PackIndex>>>,
}

impl PackDirectory {
    pub fn new(path: PathBuf) -> Self {
        PackDirectory {
            path,
            indexes: RefCell::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self, name: &str) -> anyhow::Result<Rc<PackIndex>> {
        if let Some(index) = self.indexes.borrow().get(name) {
            return Ok(index.clone());
        }

        let path = self.path.join(name);
        let index = Rc::new(
            PackIndex::open(&path)
                .with_context(|| format!("failed to load pack-index for packfile {name}"))?,
        );
        self.indexes
            .borrow_mut()
            .insert(name.to_string(), index.clone());
        Ok(index)
    }

    /// Names of every `.idx` file, sorted
    pub fn index_names(&self) -> Vec<String> {
        if !self.path.is_dir() {
            return Vec::new();
        }

        let mut names = WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?;
                name.ends_with(".idx").then(|| name.to_string())
            })
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Listing of every packed object, pack by pack
    pub fn packed_objects(&self) -> anyhow::Result<Vec<PackedObject>> {
        let mut objects = Vec::new();

        for pack in self.packs()? {
            let index = self.index(&pack.name)?;
            objects.extend(
                index
                    .entries()?
                    .into_iter()
                    .map(|entry| PackedObject::new(entry.oid, pack.name.clone(), entry.offset)),
            );
        }

        Ok(objects)
    }
}

impl PackStore for PackDirectory {
    fn packs(&self) -> anyhow::Result<Vec<PackInfo>> {
        let mut packs = Vec::new();

        for name in self.index_names() {
            let pack_path = self.path.join(side_file_name(&name, "pack"));
            let metadata = match std::fs::metadata(&pack_path) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(index = name, "skipping pack index without a pack");
                    continue;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("unable to stat {}", pack_path.display()));
                }
            };

            let mtime = metadata
                .modified()
                .with_context(|| format!("unable to read mtime of {}", pack_path.display()))?;
            let keep = self.path.join(side_file_name(&name, "keep")).exists();
            packs.push(PackInfo::new(name, mtime, keep));
        }

        Ok(packs)
    }

    fn pack_entries(&self, pack: &str) -> anyhow::Result<Vec<PackEntry>> {
        Ok(self.index(pack)?.entries()?)
    }

    fn find_offset(&self, pack: &str, oid: &ObjectId) -> anyhow::Result<Option<u64>> {
        Ok(self.index(pack)?.find_offset(oid)?)
    }

    fn remove_pack(&self, pack: &str) -> anyhow::Result<()> {
        self.indexes.borrow_mut().remove(pack);

        for extension in PACK_SIDE_FILES {
            let path = self.path.join(side_file_name(pack, extension));
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed pack file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("unable to remove {}", path.display()));
                }
            }
        }

        Ok(())
    }
}
