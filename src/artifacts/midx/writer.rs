//! Building and publishing the multi-pack-index
//!
//! The pack list starts from the existing MIDX, if any, and is extended with every
//! `.idx` in the pack directory the MIDX does not know yet. Packs the old MIDX lists but
//! which are gone from disk fall out, as do packs named in a drop list. Every object of
//! every remaining pack is a candidate; for ids present in several packs one copy wins:
//!
//! 1. the preferred pack
//! 2. the most recently modified pack (packs carried over from the old MIDX count as
//!    oldest, and among them the copy the old MIDX recorded)
//! 3. the lowest pack int id

use crate::areas::lockfile::Lockfile;
use crate::artifacts::chunk::align;
use crate::artifacts::chunk::checksum::Checksum;
use crate::artifacts::chunk::writer::ChunkWriter;
use crate::artifacts::fanout::{FANOUT_SIZE, write_fanout, write_lookup};
use crate::artifacts::midx::reader::MultiPackIndex;
use crate::artifacts::midx::rev_index::{clear_stale_rev_indexes, pack_order, write_rev_index};
use crate::artifacts::midx::{
    MIDX_CHUNK_LARGE_OFFSET_WIDTH, MIDX_CHUNK_OFFSET_WIDTH, MIDX_CHUNKID_LARGEOFFSETS,
    MIDX_CHUNKID_OBJECTOFFSETS, MIDX_CHUNKID_OIDFANOUT, MIDX_CHUNKID_OIDLOOKUP,
    MIDX_CHUNKID_PACKNAMES, MIDX_LARGE_OFFSET_NEEDED, MIDX_SIGNATURE, MIDX_VERSION,
    midx_file_path, rev_file_path,
};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::{HASH_VERSION_SHA1, OBJECT_ID_RAW_LENGTH};
use crate::artifacts::pack::normalize_idx_name;
use crate::artifacts::store::PackStore;
use anyhow::{Context, bail};
use bitflags::bitflags;
use byteorder::{NetworkEndian, WriteBytesExt};
use std::cmp::Reverse;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MidxWriteFlags: u8 {
        /// Also write `multi-pack-index-<hex>.rev`
        const REV_INDEX = 0b0001;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MidxWriteOptions {
    pub flags: MidxWriteFlags,
    /// Pack whose copies win over every other pack's
    pub preferred_pack: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MidxWriteReport {
    /// `None` when the existing file was already up to date
    pub path: Option<PathBuf>,
    pub checksum: Option<ObjectId>,
    pub num_packs: u32,
    pub num_objects: u32,
    pub preferred_pack: Option<String>,
    /// Packs the old file listed that are no longer indexed
    pub dropped: Vec<String>,
    pub rev_index: Option<PathBuf>,
}

/// One object as recorded in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidxObject {
    pub oid: ObjectId,
    pub pack_int_id: u32,
    pub offset: u64,
}

#[derive(Debug)]
struct PackSlot {
    name: String,
    mtime: SystemTime,
    in_old_midx: bool,
    dropped: bool,
}

struct Candidate {
    object: MidxObject,
    preferred: bool,
    mtime: SystemTime,
    recorded: bool,
}

pub struct MidxWriter<'a, P: PackStore + ?Sized> {
    objects_dir: &'a Path,
    packs: &'a P,
    existing: Option<&'a MultiPackIndex>,
    options: MidxWriteOptions,
}

impl<'a, P: PackStore + ?Sized> MidxWriter<'a, P> {
    pub fn new(
        objects_dir: &'a Path,
        packs: &'a P,
        existing: Option<&'a MultiPackIndex>,
        options: MidxWriteOptions,
    ) -> Self {
        MidxWriter {
            objects_dir,
            packs,
            existing,
            options,
        }
    }

    pub fn write(&self) -> anyhow::Result<MidxWriteReport> {
        self.write_dropping(&[])
    }

    /// Write the file without the packs named in `drop`
    pub fn write_dropping(&self, drop: &[String]) -> anyhow::Result<MidxWriteReport> {
        let target = midx_file_path(self.objects_dir);
        let lock = Lockfile::hold(&target)?;

        let (mut slots, missing) = self.collect_packs()?;
        let new_packs = slots.iter().filter(|slot| !slot.in_old_midx).count();

        if self.existing.is_some()
            && new_packs == 0
            && missing.is_empty()
            && drop.is_empty()
            && self.options.preferred_pack.is_none()
        {
            tracing::debug!("multi-pack-index is up to date");
            return Ok(MidxWriteReport::default());
        }

        for name in drop {
            let name = normalize_idx_name(name);
            match slots.iter_mut().find(|slot| slot.name == name) {
                Some(slot) => slot.dropped = true,
                None => bail!("did not see pack-file {name} to drop"),
            }
        }

        let preferred_name = self.resolve_preferred(&slots);

        let mut slots = slots
            .into_iter()
            .filter(|slot| !slot.dropped)
            .collect::<Vec<_>>();
        if slots.is_empty() {
            bail!("no pack files to index.");
        }
        slots.sort_by(|a, b| a.name.cmp(&b.name));

        let preferred_id = preferred_name
            .as_ref()
            .and_then(|name| slots.iter().position(|slot| &slot.name == name))
            .map(|id| id as u32);

        let objects = self.sorted_objects(&slots, preferred_id)?;
        let pack_names = slots.into_iter().map(|slot| slot.name).collect::<Vec<_>>();

        let file = lock.file()?;
        let (_, checksum) = write_midx(BufWriter::new(file), &pack_names, &objects)
            .with_context(|| format!("unable to write {}", lock.lock_path().display()))?;

        let rev_index = match self.options.flags.contains(MidxWriteFlags::REV_INDEX) {
            true => Some(self.write_rev_index(&objects, preferred_id, &checksum)?),
            false => None,
        };
        clear_stale_rev_indexes(self.objects_dir, rev_index.as_deref())?;

        lock.commit()?;
        tracing::info!(
            path = %target.display(),
            %checksum,
            packs = pack_names.len(),
            objects = objects.len(),
            "wrote multi-pack-index"
        );

        let mut dropped = missing;
        dropped.extend(drop.iter().map(|name| normalize_idx_name(name)));

        Ok(MidxWriteReport {
            path: Some(target),
            checksum: Some(checksum),
            num_packs: pack_names.len() as u32,
            num_objects: objects.len() as u32,
            preferred_pack: preferred_name,
            dropped,
            rev_index,
        })
    }

    /// Packs of the old file still on disk, then new packs; plus the names of the
    /// packs that disappeared
    fn collect_packs(&self) -> anyhow::Result<(Vec<PackSlot>, Vec<String>)> {
        let on_disk = self.packs.packs()?;
        let mut slots = Vec::with_capacity(on_disk.len());
        let mut missing = Vec::new();

        if let Some(midx) = self.existing {
            for name in midx.pack_names() {
                if on_disk.iter().any(|pack| &pack.name == name) {
                    slots.push(PackSlot {
                        name: name.clone(),
                        mtime: SystemTime::UNIX_EPOCH,
                        in_old_midx: true,
                        dropped: false,
                    });
                } else {
                    tracing::warn!(pack = name, "dropping missing pack from multi-pack-index");
                    missing.push(name.clone());
                }
            }
        }

        for pack in on_disk {
            if self
                .existing
                .is_some_and(|midx| midx.contains_pack(&pack.name))
            {
                continue;
            }
            slots.push(PackSlot {
                name: pack.name,
                mtime: pack.mtime,
                in_old_midx: false,
                dropped: false,
            });
        }

        Ok((slots, missing))
    }

    fn resolve_preferred(&self, slots: &[PackSlot]) -> Option<String> {
        let name = normalize_idx_name(self.options.preferred_pack.as_deref()?);

        match slots.iter().find(|slot| slot.name == name) {
            None => {
                tracing::warn!("unknown preferred pack: '{name}'");
                None
            }
            Some(slot) if slot.dropped => {
                tracing::warn!("preferred pack '{name}' is expired");
                None
            }
            Some(_) => Some(name),
        }
    }

    /// One object per id, sorted by id
    fn sorted_objects(
        &self,
        slots: &[PackSlot],
        preferred_id: Option<u32>,
    ) -> anyhow::Result<Vec<MidxObject>> {
        let mut candidates = Vec::new();

        for (id, slot) in slots.iter().enumerate() {
            let entries = self
                .packs
                .pack_entries(&slot.name)
                .with_context(|| format!("failed to add packfile '{}'", slot.name))?;

            for entry in entries {
                let recorded = match self.existing {
                    Some(midx) if slot.in_old_midx => midx
                        .find(&entry.oid)?
                        .and_then(|found| midx.pack_name(found.pack_int_id))
                        .is_some_and(|name| name == slot.name),
                    _ => false,
                };

                candidates.push(Candidate {
                    object: MidxObject {
                        oid: entry.oid,
                        pack_int_id: id as u32,
                        offset: entry.offset,
                    },
                    preferred: preferred_id == Some(id as u32),
                    mtime: slot.mtime,
                    recorded,
                });
            }
        }

        candidates.sort_by_key(|candidate| {
            (
                candidate.object.oid,
                !candidate.preferred,
                Reverse(candidate.mtime),
                !candidate.recorded,
                candidate.object.pack_int_id,
            )
        });
        candidates.dedup_by_key(|candidate| candidate.object.oid);

        Ok(candidates
            .into_iter()
            .map(|candidate| candidate.object)
            .collect())
    }

    fn write_rev_index(
        &self,
        objects: &[MidxObject],
        preferred_id: Option<u32>,
        midx_checksum: &ObjectId,
    ) -> anyhow::Result<PathBuf> {
        let entries = objects
            .iter()
            .map(|object| (object.pack_int_id, object.offset))
            .collect::<Vec<_>>();
        let order = pack_order(&entries, preferred_id);

        let target = rev_file_path(self.objects_dir, &midx_checksum.to_string());
        let lock = Lockfile::hold(&target)?;
        write_rev_index(BufWriter::new(lock.file()?), &order, midx_checksum)
            .with_context(|| format!("unable to write {}", lock.lock_path().display()))?;
        lock.commit()?;

        tracing::debug!(path = %target.display(), "wrote multi-pack reverse index");
        Ok(target)
    }
}

/// Serialize a multi-pack-index
///
/// `pack_names` must be sorted and `objects` sorted by id with one entry per id.
pub fn write_midx<W: Write>(
    out: W,
    pack_names: &[String],
    objects: &[MidxObject],
) -> anyhow::Result<(W, ObjectId)> {
    let oids = objects.iter().map(|object| object.oid).collect::<Vec<_>>();

    // offsets past 32 bits force every offset with the high bit set into LOFF
    let large_offsets_needed = objects.iter().any(|object| object.offset > u32::MAX as u64);
    let large_offsets = match large_offsets_needed {
        true => objects
            .iter()
            .filter(|object| object.offset >> 31 != 0)
            .map(|object| object.offset)
            .collect::<Vec<_>>(),
        false => Vec::new(),
    };

    let names_len = pack_names.iter().map(|name| name.len() + 1).sum::<usize>();
    let names_size = align(names_len);

    let mut chunks: ChunkWriter<'_, W> = ChunkWriter::new();
    chunks.add_chunk(MIDX_CHUNKID_PACKNAMES, names_size as u64, |out| {
        for name in pack_names {
            out.write_all(name.as_bytes())?;
            out.write_u8(0)?;
        }
        out.write_all(&vec![0u8; names_size - names_len])?;
        Ok(())
    });
    chunks.add_chunk(MIDX_CHUNKID_OIDFANOUT, FANOUT_SIZE as u64, |out| {
        write_fanout(out, &oids)
    });
    chunks.add_chunk(
        MIDX_CHUNKID_OIDLOOKUP,
        (oids.len() * OBJECT_ID_RAW_LENGTH) as u64,
        |out| write_lookup(out, &oids),
    );
    chunks.add_chunk(
        MIDX_CHUNKID_OBJECTOFFSETS,
        (objects.len() * MIDX_CHUNK_OFFSET_WIDTH) as u64,
        |out| {
            let mut next_large = 0u32;
            for object in objects {
                out.write_u32::<NetworkEndian>(object.pack_int_id)?;
                if large_offsets_needed && object.offset >> 31 != 0 {
                    out.write_u32::<NetworkEndian>(MIDX_LARGE_OFFSET_NEEDED | next_large)?;
                    next_large += 1;
                } else {
                    out.write_u32::<NetworkEndian>(object.offset as u32)?;
                }
            }
            Ok(())
        },
    );
    if !large_offsets.is_empty() {
        chunks.add_chunk(
            MIDX_CHUNKID_LARGEOFFSETS,
            (large_offsets.len() * MIDX_CHUNK_LARGE_OFFSET_WIDTH) as u64,
            |out| {
                for offset in &large_offsets {
                    out.write_u64::<NetworkEndian>(*offset)?;
                }
                Ok(())
            },
        );
    }

    let mut out = Checksum::new(out);
    out.write_u32::<NetworkEndian>(MIDX_SIGNATURE)?;
    out.write_u8(MIDX_VERSION)?;
    out.write_u8(HASH_VERSION_SHA1)?;
    out.write_u8(chunks.num_chunks() as u8)?;
    out.write_u8(0)?;
    out.write_u32::<NetworkEndian>(pack_names.len() as u32)?;
    chunks.write(&mut out)?;

    Ok(out.write_checksum()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::format_error::FormatError;
    use crate::artifacts::midx::fixtures::{PackFixture, oid};
    use crate::artifacts::midx::reader::MidxEntry;
    use crate::artifacts::midx::rev_index::RevIndex;
    use crate::artifacts::midx::chunk_name;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn location(midx: &MultiPackIndex, byte: u8) -> (String, u64) {
        let MidxEntry {
            pack_int_id,
            offset,
        } = midx.find(&oid(byte)).unwrap().unwrap();
        (midx.pack_name(pack_int_id).unwrap().to_string(), offset)
    }

    #[test]
    fn duplicate_objects_resolve_to_the_newest_pack() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(1, 12), (2, 40)], 1_000);
        fixture.add_pack("pack-b", &[(2, 80), (3, 12)], 2_000);

        let report = fixture.write(MidxWriteOptions::default());

        assert_eq!(report.num_packs, 2);
        assert_eq!(report.num_objects, 3);
        let midx = fixture.load().unwrap();
        assert_eq!(midx.pack_names(), &["pack-a.idx", "pack-b.idx"]);
        assert_eq!(location(&midx, 1), ("pack-a.idx".to_string(), 12));
        assert_eq!(location(&midx, 2), ("pack-b.idx".to_string(), 80));
        assert_eq!(location(&midx, 3), ("pack-b.idx".to_string(), 12));
        assert!(midx.verify_checksum());
        assert_eq!(Some(midx.checksum()), report.checksum);
    }

    #[test]
    fn equal_mtimes_fall_back_to_the_lowest_pack() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-b", &[(2, 80)], 1_000);
        fixture.add_pack("pack-a", &[(2, 40)], 1_000);

        fixture.write(MidxWriteOptions::default());

        assert_eq!(
            location(&fixture.load().unwrap(), 2),
            ("pack-a.idx".to_string(), 40)
        );
    }

    #[test]
    fn preferred_pack_wins_over_a_newer_one() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(2, 40)], 1_000);
        fixture.add_pack("pack-b", &[(2, 80)], 2_000);

        let report = fixture.write(MidxWriteOptions {
            preferred_pack: Some("pack-a.pack".to_string()),
            ..MidxWriteOptions::default()
        });

        assert_eq!(report.preferred_pack.as_deref(), Some("pack-a.idx"));
        assert_eq!(
            location(&fixture.load().unwrap(), 2),
            ("pack-a.idx".to_string(), 40)
        );
    }

    #[test]
    fn unknown_preferred_pack_is_ignored() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(2, 40)], 1_000);

        let report = fixture.write(MidxWriteOptions {
            preferred_pack: Some("pack-zz".to_string()),
            ..MidxWriteOptions::default()
        });

        assert_eq!(report.preferred_pack, None);
        assert_eq!(report.num_objects, 1);
    }

    #[test]
    fn removing_the_winning_pack_fails_over_to_the_other_copy() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(2, 40)], 1_000);
        fixture.add_pack("pack-b", &[(2, 80), (3, 12)], 2_000);
        fixture.write(MidxWriteOptions::default());
        assert_eq!(
            location(&fixture.load().unwrap(), 2),
            ("pack-b.idx".to_string(), 80)
        );

        fixture.packs().remove_pack("pack-b.idx").unwrap();
        let report = fixture.write(MidxWriteOptions::default());

        assert_eq!(report.dropped, vec!["pack-b.idx".to_string()]);
        let midx = fixture.load().unwrap();
        assert_eq!(midx.pack_names(), &["pack-a.idx"]);
        assert_eq!(location(&midx, 2), ("pack-a.idx".to_string(), 40));
        assert_eq!(midx.find(&oid(3)).unwrap(), None);
    }

    #[test]
    fn rewrites_keep_the_copy_the_old_file_chose() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(2, 40)], 1_000);
        fixture.add_pack("pack-b", &[(2, 80)], 2_000);
        fixture.write(MidxWriteOptions::default());

        fixture.add_pack("pack-c", &[(9, 12)], 500);
        let report = fixture.write(MidxWriteOptions::default());

        assert_eq!(report.num_packs, 3);
        let midx = fixture.load().unwrap();
        assert_eq!(location(&midx, 2), ("pack-b.idx".to_string(), 80));
        assert_eq!(location(&midx, 9), ("pack-c.idx".to_string(), 12));
    }

    #[test]
    fn new_packs_win_over_packs_already_indexed() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-b", &[(2, 80)], 2_000);
        fixture.write(MidxWriteOptions::default());

        fixture.add_pack("pack-a", &[(2, 40)], 1_000);
        fixture.write(MidxWriteOptions::default());

        assert_eq!(
            location(&fixture.load().unwrap(), 2),
            ("pack-a.idx".to_string(), 40)
        );
    }

    #[test]
    fn unchanged_pack_set_is_a_no_op() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(1, 12)], 1_000);
        fixture.write(MidxWriteOptions::default());

        let report = fixture.write(MidxWriteOptions::default());

        assert_eq!(report, MidxWriteReport::default());
    }

    #[test]
    fn empty_pack_directory_is_an_error() {
        let fixture = PackFixture::new();

        let err = fixture.try_write(MidxWriteOptions::default(), &[]).unwrap_err();

        assert_eq!(err.to_string(), "no pack files to index.");
        assert!(!midx_file_path(fixture.objects()).exists());
    }

    #[test]
    fn dropping_an_unknown_pack_is_an_error() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(1, 12)], 1_000);

        let err = fixture
            .try_write(MidxWriteOptions::default(), &["pack-z.idx".to_string()])
            .unwrap_err();

        assert_eq!(err.to_string(), "did not see pack-file pack-z.idx to drop");
    }

    #[test]
    fn dropped_packs_leave_the_index() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(1, 12)], 1_000);
        fixture.add_pack("pack-b", &[(2, 12)], 1_000);
        fixture.write(MidxWriteOptions::default());

        let report = fixture
            .try_write(MidxWriteOptions::default(), &["pack-b.pack".to_string()])
            .unwrap();

        assert_eq!(report.dropped, vec!["pack-b.idx".to_string()]);
        assert_eq!(fixture.load().unwrap().pack_names(), &["pack-a.idx"]);
    }

    #[rstest]
    #[case::fits_in_32_bits(0x8000_0000, false)]
    #[case::needs_64_bits(0x1_0000_0000, true)]
    fn large_offsets_go_to_their_own_chunk(#[case] offset: u64, #[case] has_loff: bool) {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(1, 0x8000_0010), (2, offset), (3, 12)], 1_000);

        fixture.write(MidxWriteOptions::default());

        let midx = fixture.load().unwrap();
        assert_eq!(
            midx.chunk_ids().contains(&MIDX_CHUNKID_LARGEOFFSETS),
            has_loff,
            "{:?}",
            midx.chunk_ids().iter().map(|id| chunk_name(*id)).collect::<Vec<_>>()
        );
        assert_eq!(location(&midx, 1).1, 0x8000_0010);
        assert_eq!(location(&midx, 2).1, offset);
        assert_eq!(location(&midx, 3).1, 12);
    }

    #[test]
    fn reverse_index_lists_positions_in_pack_order() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(1, 300), (2, 12)], 1_000);
        fixture.add_pack("pack-b", &[(3, 12)], 1_000);
        let stale = rev_file_path(fixture.objects(), "0000");
        std::fs::write(&stale, b"").unwrap();

        let report = fixture.write(MidxWriteOptions {
            flags: MidxWriteFlags::REV_INDEX,
            preferred_pack: Some("pack-b.idx".to_string()),
        });

        let path = report.rev_index.unwrap();
        let checksum = report.checksum.unwrap();
        assert_eq!(path, rev_file_path(fixture.objects(), &checksum.to_string()));
        assert!(!stale.exists());

        let rev = RevIndex::open(&path).unwrap();
        // positions: 0 = oid 1 (a, 300), 1 = oid 2 (a, 12), 2 = oid 3 (b, 12)
        assert_eq!(rev.positions(), vec![2, 1, 0]);
        assert_eq!(rev.midx_checksum(), checksum);
    }

    #[test]
    fn held_lock_fails_the_write() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(1, 12)], 1_000);
        let _lock = Lockfile::hold(&midx_file_path(fixture.objects())).unwrap();

        let err = fixture.try_write(MidxWriteOptions::default(), &[]).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::LockHeld { .. })
        ));
    }

    #[test]
    fn pack_names_are_padded_to_four_bytes() {
        let names = vec!["p.idx".to_string()];
        let objects = [MidxObject {
            oid: oid(1),
            pack_int_id: 0,
            offset: 12,
        }];

        let (bytes, _) = write_midx(Vec::new(), &names, &objects).unwrap();
        let midx = MultiPackIndex::parse(bytes.into()).unwrap();

        assert_eq!(midx.pack_names(), &["p.idx"]);
        assert_eq!(midx.num_chunks(), 4);
        assert_eq!(midx.find(&oid(1)).unwrap().map(|entry| entry.offset), Some(12));
    }
}
