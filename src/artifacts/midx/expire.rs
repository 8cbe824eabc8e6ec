use crate::artifacts::midx::reader::MultiPackIndex;
use crate::artifacts::midx::writer::{MidxWriteOptions, MidxWriteReport, MidxWriter};
use crate::artifacts::store::PackStore;
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpireReport {
    /// Packs removed from the index and from disk
    pub expired: Vec<String>,
    /// `None` when no pack was unreferenced
    pub write: Option<MidxWriteReport>,
}

/// Drop the packs none of whose objects the multi-pack-index refers to
///
/// Packs with a `.keep` marker stay. The index is rewritten first, so a failure
/// while deleting leaves a valid index that no longer needs the pack.
pub fn expire_packs<P: PackStore + ?Sized>(
    objects_dir: &Path,
    packs: &P,
    midx: &MultiPackIndex,
    options: MidxWriteOptions,
) -> anyhow::Result<ExpireReport> {
    let mut counts = vec![0u32; midx.num_packs() as usize];
    for position in 0..midx.num_objects() {
        if let Some(count) = counts.get_mut(midx.pack_int_id(position) as usize) {
            *count += 1;
        }
    }

    let on_disk = packs
        .packs()?
        .into_iter()
        .map(|pack| (pack.name.clone(), pack))
        .collect::<HashMap<_, _>>();

    let mut unreferenced = Vec::new();
    for (name, count) in midx.pack_names().iter().zip(counts) {
        if count > 0 {
            continue;
        }
        match on_disk.get(name) {
            None => tracing::debug!(pack = name, "unreferenced pack is already gone"),
            Some(pack) if pack.keep => tracing::debug!(pack = name, "keeping unreferenced pack"),
            Some(_) => unreferenced.push(name.clone()),
        }
    }

    if unreferenced.is_empty() {
        return Ok(ExpireReport::default());
    }

    let write = MidxWriter::new(objects_dir, packs, Some(midx), options)
        .write_dropping(&unreferenced)?;

    for name in &unreferenced {
        packs
            .remove_pack(name)
            .with_context(|| format!("failed to expire pack {name}"))?;
        tracing::info!(pack = name, "expired pack");
    }

    Ok(ExpireReport {
        expired: unreferenced,
        write: Some(write),
    })
}
