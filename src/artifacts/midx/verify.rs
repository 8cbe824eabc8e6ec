use crate::artifacts::fanout::FANOUT_ENTRIES;
use crate::artifacts::midx::midx_file_path;
use crate::artifacts::midx::reader::MultiPackIndex;
use crate::artifacts::store::PackStore;
use crate::artifacts::verify::{IssueKind, VerifyReport};
use std::collections::HashSet;
use std::path::Path;

/// Verify the multi-pack-index of `objects_dir`, if there is one
pub fn verify_midx_file<P: PackStore + ?Sized>(objects_dir: &Path, packs: &P) -> VerifyReport {
    let path = midx_file_path(objects_dir);
    if !path.exists() {
        return VerifyReport::new();
    }

    match MultiPackIndex::open(&path) {
        Ok(midx) => MidxVerifier::new(packs, &midx).verify(),
        Err(err) => {
            tracing::debug!(error = %err, "multi-pack-index failed to load");
            let mut report = VerifyReport::new();
            report.report(
                IssueKind::Structure,
                "multi-pack-index file exists, but failed to parse",
            );
            report
        }
    }
}

/// Cross-checks a multi-pack-index against the pack indexes it was built from
pub struct MidxVerifier<'a, P: PackStore + ?Sized> {
    packs: &'a P,
    midx: &'a MultiPackIndex,
}

impl<'a, P: PackStore + ?Sized> MidxVerifier<'a, P> {
    pub fn new(packs: &'a P, midx: &'a MultiPackIndex) -> Self {
        MidxVerifier { packs, midx }
    }

    pub fn verify(&self) -> VerifyReport {
        let mut report = VerifyReport::new();

        if !self.midx.verify_checksum() {
            report.report(IssueKind::Checksum, "incorrect checksum");
        }

        let loaded = self.check_packs(&mut report);
        self.check_fanout(&mut report);

        let num_objects = self.midx.num_objects();
        if num_objects == 0 {
            report.report(IssueKind::Structure, "the midx contains no oid");
            return report;
        }

        self.check_lookup_order(&mut report, num_objects);
        self.check_offsets(&mut report, num_objects, &loaded);

        report
    }

    /// Which pack int ids refer to a pack that can be loaded
    fn check_packs(&self, report: &mut VerifyReport) -> Vec<bool> {
        let on_disk = match self.packs.packs() {
            Ok(packs) => packs
                .into_iter()
                .map(|pack| pack.name)
                .collect::<HashSet<_>>(),
            Err(err) => {
                report.report(IssueKind::Structure, format!("{err:#}"));
                HashSet::new()
            }
        };

        self.midx
            .pack_names()
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let present = on_disk.contains(name);
                if !present {
                    report.report(
                        IssueKind::Structure,
                        format!("failed to load pack in position {position}"),
                    );
                }
                present
            })
            .collect()
    }

    fn check_fanout(&self, report: &mut VerifyReport) {
        let lookup = self.midx.lookup();
        let mut ordered = true;
        for i in 0..255 {
            let (this, next) = (lookup.fanout_at(i), lookup.fanout_at(i + 1));
            if this > next {
                ordered = false;
                report.report(
                    IssueKind::Order,
                    format!(
                        "oid fanout out of order: fanout[{i}] = {this:x} > {next:x} = fanout[{}]",
                        i + 1
                    ),
                );
            }
        }

        if ordered {
            self.check_fanout_buckets(report);
        }
    }

    /// Every object id must sit in the bucket of its first byte
    fn check_fanout_buckets(&self, report: &mut VerifyReport) {
        let lookup = self.midx.lookup();
        let mut fanout_pos = 0usize;

        for position in 0..self.midx.num_objects() {
            while fanout_pos < FANOUT_ENTRIES && lookup.fanout_at(fanout_pos) <= position {
                fanout_pos += 1;
            }

            let oid = lookup.oid_at(position);
            if oid.first_byte() as usize != fanout_pos {
                report.report(
                    IssueKind::Order,
                    format!(
                        "oid fanout does not cover oid[{position}] = {oid}: bucket {fanout_pos:02x} != {:02x}",
                        oid.first_byte()
                    ),
                );
            }
        }
    }

    fn check_lookup_order(&self, report: &mut VerifyReport, num_objects: u32) {
        let lookup = self.midx.lookup();
        for i in 0..num_objects - 1 {
            let (this, next) = (lookup.oid_at(i), lookup.oid_at(i + 1));
            if this >= next {
                report.report(
                    IssueKind::Order,
                    format!(
                        "oid lookup out of order: oid[{i}] = {this} >= {next} = oid[{}]",
                        i + 1
                    ),
                );
            }
        }
    }

    /// Compare every recorded offset with the one in the pack's own index, pack by pack
    fn check_offsets(&self, report: &mut VerifyReport, num_objects: u32, loaded: &[bool]) {
        let mut positions = (0..num_objects).collect::<Vec<_>>();
        positions.sort_by_key(|&position| self.midx.pack_int_id(position));

        let mut unreadable = HashSet::new();
        for position in positions {
            let oid = self.midx.oid_at(position);
            let pack_int_id = self.midx.pack_int_id(position);
            if unreadable.contains(&pack_int_id) {
                continue;
            }

            let name = match self.midx.pack_name(pack_int_id) {
                Some(name) if loaded.get(pack_int_id as usize).copied().unwrap_or(false) => name,
                _ => {
                    report.report(
                        IssueKind::Content,
                        format!("failed to load pack entry for oid[{position}] = {oid}"),
                    );
                    continue;
                }
            };

            let recorded = match self.midx.offset(position) {
                Ok(offset) => offset,
                Err(err) => {
                    report.report(IssueKind::Structure, err.to_string());
                    continue;
                }
            };

            let actual = match self.packs.find_offset(name, &oid) {
                Ok(offset) => offset.unwrap_or(0),
                Err(_) => {
                    report.report(
                        IssueKind::Structure,
                        format!("failed to load pack-index for packfile {name}"),
                    );
                    unreadable.insert(pack_int_id);
                    continue;
                }
            };

            if recorded != actual {
                report.report(
                    IssueKind::Content,
                    format!(
                        "incorrect object offset for oid[{position}] = {oid}: {recorded:x} != {actual:x}"
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::midx::fixtures::{PackFixture, oid};
    use crate::artifacts::midx::writer::MidxWriteOptions;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    #[fixture]
    fn written() -> PackFixture {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[(0x10, 12), (0x20, 40)], 1_000);
        fixture.add_pack("pack-b", &[(0x30, 12)], 2_000);
        fixture.write(MidxWriteOptions::default());
        fixture
    }

    fn verify(fixture: &PackFixture) -> VerifyReport {
        verify_midx_file(fixture.objects(), &fixture.packs())
    }

    #[rstest]
    fn fresh_index_verifies(written: PackFixture) {
        assert!(verify(&written).is_ok());
    }

    #[test]
    fn missing_index_has_nothing_to_report() {
        let fixture = PackFixture::new();

        assert!(verify(&fixture).is_ok());
    }

    #[rstest]
    fn flipped_byte_is_a_checksum_issue(written: PackFixture) {
        let path = midx_file_path(written.objects());
        let mut bytes = std::fs::read(&path).unwrap();
        // header, then 4 chunks + terminator; the last PNAM byte is padding
        let pnam_start = 12 + 5 * 12;
        bytes[pnam_start + 23] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let report = verify(&written);

        assert_eq!(report.issues().len(), 1, "{report}");
        assert!(report.has(IssueKind::Checksum));
    }

    #[rstest]
    fn vanished_pack_cannot_be_loaded(written: PackFixture) {
        written.packs().remove_pack("pack-b.idx").unwrap();

        let report = verify(&written);

        assert_eq!(
            report.to_string(),
            format!(
                "failed to load pack in position 1\nfailed to load pack entry for oid[2] = {}\n",
                oid(0x30)
            )
        );
    }

    #[rstest]
    fn moved_object_is_an_offset_mismatch(written: PackFixture) {
        written.add_pack("pack-a", &[(0x10, 12), (0x20, 44)], 1_000);

        let report = verify(&written);

        assert_eq!(
            report.to_string(),
            format!(
                "incorrect object offset for oid[1] = {}: 28 != 2c\n",
                oid(0x20)
            )
        );
    }

    #[rstest]
    fn fanout_hiding_an_object_is_reported(written: PackFixture) {
        let path = midx_file_path(written.objects());
        let mut bytes = std::fs::read(&path).unwrap();
        // header, 4 chunks + terminator, then 24 bytes of pack names
        let fanout = 12 + 5 * 12 + 24;
        let bucket = fanout + 0x1f * 4;
        bytes[bucket..bucket + 4].copy_from_slice(&2u32.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        let report = verify(&written);

        assert!(report.has(IssueKind::Order), "{report}");
        assert!(report.issues().iter().any(|issue| issue.message
            == format!(
                "oid fanout does not cover oid[1] = {}: bucket 1f != 20",
                oid(0x20)
            )));
    }

    #[rstest]
    fn unreadable_pack_index_does_not_stop_other_packs(written: PackFixture) {
        let dir = crate::artifacts::pack::pack_dir(written.objects());
        std::fs::write(dir.join("pack-a.idx"), b"junk").unwrap();
        written.add_pack("pack-b", &[(0x30, 16)], 2_000);

        let report = verify(&written);

        assert_eq!(
            report.to_string(),
            format!(
                "failed to load pack-index for packfile pack-a.idx\n\
                 incorrect object offset for oid[2] = {}: c != 10\n",
                oid(0x30)
            )
        );
    }

    #[rstest]
    fn unparsable_file_is_reported(written: PackFixture) {
        std::fs::write(midx_file_path(written.objects()), b"MIDX").unwrap();

        let report = verify(&written);

        assert_eq!(
            report.to_string(),
            "multi-pack-index file exists, but failed to parse\n"
        );
    }

    #[test]
    fn empty_index_has_no_oid() {
        let fixture = PackFixture::new();
        fixture.add_pack("pack-a", &[], 1_000);
        fixture.write(MidxWriteOptions::default());

        let report = verify(&fixture);

        assert_eq!(report.to_string(), "the midx contains no oid\n");
    }
}
