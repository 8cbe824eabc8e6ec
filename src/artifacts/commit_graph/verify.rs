//! Cross-checking a commit-graph against the object store
//!
//! Each layer is checked on its own, top first: its checksum, its lookup order and
//! fanout, then every commit it records against a fresh parse of the raw object.
//! Per-commit checks only run when the layer decoded cleanly, since positions are
//! meaningless once the lookup is out of order.

use crate::artifacts::commit_graph::chain::CommitGraph;
use crate::artifacts::commit_graph::generation::{GENERATION_NUMBER_MAX, GENERATION_NUMBER_ZERO};
use crate::artifacts::fanout::FANOUT_ENTRIES;
use crate::artifacts::store::ObjectStore;
use crate::artifacts::verify::{IssueKind, VerifyReport};

pub struct GraphVerifier<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    graph: &'a CommitGraph,
    shallow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenerationUse {
    Unknown,
    Zero,
    NonZero,
}

impl<'a, S: ObjectStore + ?Sized> GraphVerifier<'a, S> {
    pub fn new(store: &'a S, graph: &'a CommitGraph) -> Self {
        GraphVerifier {
            store,
            graph,
            shallow: false,
        }
    }

    /// Only check the top layer of a chain
    pub fn shallow(mut self, shallow: bool) -> Self {
        self.shallow = shallow;
        self
    }

    pub fn verify(&self) -> VerifyReport {
        let mut report = VerifyReport::new();
        let num_layers = match self.shallow {
            true => self.graph.num_layers().min(1),
            false => self.graph.num_layers(),
        };

        for index in 0..num_layers {
            self.verify_layer(index, &mut report);
        }

        report
    }

    fn verify_layer(&self, index: usize, report: &mut VerifyReport) {
        let layer = &self.graph.layers()[index];
        let num_commits = layer.num_commits();
        let base = self.graph.commits_through(index) - num_commits;
        let lookup = layer.lookup();
        let issues_before = report.count_except(IssueKind::Checksum);

        if !layer.verify_checksum() {
            report.report(
                IssueKind::Checksum,
                "the commit-graph file has incorrect checksum and is likely corrupt",
            );
        }

        let mut fanout_pos = 0usize;
        for local in 0..num_commits {
            let oid = lookup.oid_at(local);

            if local > 0 {
                let prev = lookup.oid_at(local - 1);
                if prev >= oid {
                    report.report(
                        IssueKind::Order,
                        format!("commit-graph has incorrect OID order: {prev} then {oid}"),
                    );
                }
            }

            while (oid.first_byte() as usize) > fanout_pos {
                let fanout_value = lookup.fanout_at(fanout_pos);
                if fanout_value != local {
                    report.report(
                        IssueKind::Order,
                        format!(
                            "commit-graph has incorrect fanout value: fanout[{fanout_pos}] = {fanout_value} != {local}"
                        ),
                    );
                }
                fanout_pos += 1;
            }

            if self.graph.commit(base + local).is_err() {
                report.report(
                    IssueKind::Structure,
                    format!("failed to parse commit {oid} from commit-graph"),
                );
            }
        }

        while fanout_pos < FANOUT_ENTRIES {
            let fanout_value = lookup.fanout_at(fanout_pos);
            if fanout_value != num_commits {
                report.report(
                    IssueKind::Order,
                    format!(
                        "commit-graph has incorrect fanout value: fanout[{fanout_pos}] = {fanout_value} != {num_commits}"
                    ),
                );
            }
            fanout_pos += 1;
        }

        if report.count_except(IssueKind::Checksum) > issues_before {
            return;
        }

        self.verify_commits(index, base, report);
    }

    fn verify_commits(&self, index: usize, base: u32, report: &mut VerifyReport) {
        let layer = &self.graph.layers()[index];
        let mut generation_use = GenerationUse::Unknown;

        for local in 0..layer.num_commits() {
            let oid = layer.oid_at(local);

            let stored = match self.graph.commit(base + local) {
                Ok(stored) => stored,
                Err(_) => continue,
            };
            let raw = match self.store.read_commit(&oid) {
                Ok(raw) => raw,
                Err(_) => {
                    report.report(
                        IssueKind::Content,
                        format!("failed to parse commit {oid} from object database for commit-graph"),
                    );
                    continue;
                }
            };

            if stored.tree != *raw.tree_oid() {
                report.report(
                    IssueKind::Content,
                    format!(
                        "root tree OID for commit {oid} in commit-graph is {} != {}",
                        stored.tree,
                        raw.tree_oid()
                    ),
                );
            }

            let mut max_generation = GENERATION_NUMBER_ZERO;
            let mut raw_parents = raw.parents().iter();
            for &position in &stored.parents {
                let Some(raw_parent) = raw_parents.next() else {
                    report.report(
                        IssueKind::Content,
                        format!("commit-graph parent list for commit {oid} is too long"),
                    );
                    break;
                };

                let stored_parent = self.graph.oid_at(position).unwrap_or_default();
                if stored_parent != *raw_parent {
                    report.report(
                        IssueKind::Content,
                        format!("commit-graph parent for {oid} is {stored_parent} != {raw_parent}"),
                    );
                }

                max_generation = max_generation.max(self.graph.generation_at(position));
            }
            if stored.parents.len() < raw.parents().len() {
                report.report(
                    IssueKind::Content,
                    format!("commit-graph parent list for commit {oid} terminates early"),
                );
            }

            if stored.date != raw.date() {
                report.report(
                    IssueKind::Content,
                    format!(
                        "commit date for commit {oid} in commit-graph is {} != {}",
                        stored.date,
                        raw.date()
                    ),
                );
            }

            if stored.generation == GENERATION_NUMBER_ZERO {
                if generation_use == GenerationUse::NonZero {
                    report.report(
                        IssueKind::Generation,
                        format!(
                            "commit-graph has generation number zero for commit {oid}, but non-zero elsewhere"
                        ),
                    );
                }
                generation_use = GenerationUse::Zero;
            } else if generation_use == GenerationUse::Zero {
                report.report(
                    IssueKind::Generation,
                    format!(
                        "commit-graph has non-zero generation number for commit {oid}, but zero elsewhere"
                    ),
                );
            } else {
                generation_use = GenerationUse::NonZero;
            }

            if generation_use == GenerationUse::Zero {
                continue;
            }

            // a parent at the cap keeps its child at the cap
            if max_generation == GENERATION_NUMBER_MAX {
                max_generation -= 1;
            }
            let expected = max_generation + 1;
            if stored.generation != expected {
                report.report(
                    IssueKind::Generation,
                    format!(
                        "commit-graph generation for commit {oid} is {} != {expected}",
                        stored.generation
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::commit_graph::chain::LoadOptions;
    use crate::artifacts::commit_graph::writer::{
        GatheredCommits, GraphWriteFlags, GraphWriteOptions, GraphWriter, SplitOptions,
        SplitStrategy,
    };
    use crate::artifacts::commit_graph::{GRAPH_DATA_WIDTH, GRAPH_HEADER_SIZE, graph_file_path};
    use crate::artifacts::chunk::CHUNK_TABLE_ENTRY_SIZE;
    use crate::artifacts::fanout::FANOUT_SIZE;
    use crate::artifacts::objects::OBJECT_ID_RAW_LENGTH;
    use crate::artifacts::objects::object_id::ObjectId;
    use crate::artifacts::objects::object_type::ObjectType;
    use crate::artifacts::store::memory::MemoryStore;
    use assert_fs::TempDir;
    use bytes::Bytes;
    use rstest::{fixture, rstest};
    use std::path::Path;

    /// Offset of the commit data chunk in a file with only the three required chunks
    fn commit_data_offset(num_commits: usize) -> usize {
        GRAPH_HEADER_SIZE + 4 * CHUNK_TABLE_ENTRY_SIZE + FANOUT_SIZE + num_commits * OBJECT_ID_RAW_LENGTH
    }

    struct Repo {
        dir: TempDir,
        store: MemoryStore,
        commits: Vec<ObjectId>,
    }

    impl Repo {
        fn objects(&self) -> &Path {
            self.dir.path()
        }

        fn write(&self, options: GraphWriteOptions, tip: ObjectId) {
            let existing = CommitGraph::load(self.objects(), LoadOptions::default()).unwrap();
            GraphWriter::new(self.objects(), &self.store, existing.as_ref(), options)
                .write(GatheredCommits {
                    oids: vec![tip],
                    order_by_pack: false,
                })
                .unwrap();
        }

        fn verify(&self) -> VerifyReport {
            let graph = CommitGraph::load(self.objects(), LoadOptions::default())
                .unwrap()
                .unwrap();
            GraphVerifier::new(&self.store, &graph).verify()
        }

        /// Rewrite bytes of the single graph file without fixing the checksum
        fn corrupt(&self, edit: impl FnOnce(&mut Vec<u8>)) {
            let path = graph_file_path(self.objects());
            let mut data = std::fs::read(&path).unwrap();
            edit(&mut data);
            std::fs::write(&path, data).unwrap();
        }

        fn local_position(&self, oid: &ObjectId) -> usize {
            let mut sorted = self.commits.clone();
            sorted.sort();
            sorted.binary_search(oid).unwrap()
        }
    }

    #[fixture]
    fn repo() -> Repo {
        let mut store = MemoryStore::new();
        let mut commits = Vec::new();
        let mut parents = Vec::new();
        for i in 0..4i64 {
            let content = format!("version {i}");
            let oid = store
                .commit(&parents, &[("file.txt", content.as_str())], 1_000 + i)
                .unwrap();
            parents = vec![oid];
            commits.push(oid);
        }

        let repo = Repo {
            dir: TempDir::new().unwrap(),
            store,
            commits,
        };
        repo.write(GraphWriteOptions::default(), repo.commits[3]);
        repo
    }

    #[rstest]
    fn fresh_graph_verifies(repo: Repo) {
        let report = repo.verify();
        assert!(report.is_ok(), "{report}");
    }

    #[rstest]
    fn changed_date_is_reported_with_the_checksum(repo: Repo) {
        let position = repo.local_position(&repo.commits[2]);
        let date_low = commit_data_offset(4) + position * GRAPH_DATA_WIDTH + OBJECT_ID_RAW_LENGTH + 12;
        repo.corrupt(|data| data[date_low + 3] ^= 0x01);

        let report = repo.verify();

        assert!(report.has(IssueKind::Checksum));
        assert!(
            report
                .issues()
                .iter()
                .any(|issue| issue.message.starts_with(&format!("commit date for commit {}", repo.commits[2])))
        );
    }

    #[rstest]
    fn wrong_generation_is_reported(repo: Repo) {
        let position = repo.local_position(&repo.commits[1]);
        let packed = commit_data_offset(4) + position * GRAPH_DATA_WIDTH + OBJECT_ID_RAW_LENGTH + 8;
        repo.corrupt(|data| data[packed..packed + 4].copy_from_slice(&(7u32 << 2).to_be_bytes()));

        let report = repo.verify();

        assert!(report.has(IssueKind::Generation));
        assert!(report.issues().iter().any(|issue| issue.message
            == format!("commit-graph generation for commit {} is 7 != 2", repo.commits[1])));
    }

    #[rstest]
    fn mixed_zero_generations_are_reported(repo: Repo) {
        let position = repo.local_position(&repo.commits[0]);
        let packed = commit_data_offset(4) + position * GRAPH_DATA_WIDTH + OBJECT_ID_RAW_LENGTH + 8;
        repo.corrupt(|data| data[packed..packed + 4].copy_from_slice(&0u32.to_be_bytes()));

        let report = repo.verify();

        assert!(report.has(IssueKind::Generation));
        assert!(
            report
                .issues()
                .iter()
                .any(|issue| issue.message.contains("zero elsewhere"))
        );
    }

    #[rstest]
    fn swapped_lookup_entries_skip_the_commit_checks(repo: Repo) {
        let lookup = commit_data_offset(0);
        repo.corrupt(|data| {
            let (first, second) = data[lookup..lookup + 2 * OBJECT_ID_RAW_LENGTH]
                .split_at_mut(OBJECT_ID_RAW_LENGTH);
            first.swap_with_slice(second);
        });

        let report = repo.verify();

        assert!(report.has(IssueKind::Order));
        assert!(!report.has(IssueKind::Content));
        assert!(!report.has(IssueKind::Generation));
    }

    #[rstest]
    fn commit_missing_from_the_store_is_reported(mut repo: Repo) {
        let gone = repo.commits[3];
        repo.store.remove(&gone);

        let report = repo.verify();

        assert_eq!(report.len(), 1);
        assert_eq!(
            report.issues()[0].message,
            format!("failed to parse commit {gone} from object database for commit-graph")
        );
    }

    #[rstest]
    fn every_layer_of_a_chain_is_checked(repo: Repo) {
        let split = |strategy| GraphWriteOptions {
            flags: GraphWriteFlags::SPLIT,
            split: SplitOptions {
                strategy,
                ..SplitOptions::default()
            },
            ..GraphWriteOptions::default()
        };
        let mut repo = repo;
        let tip = repo
            .store
            .commit(&[repo.commits[3]], &[("file.txt", "next")], 2_000)
            .unwrap();
        repo.write(split(SplitStrategy::MergeProhibited), tip);

        let graph = CommitGraph::load(repo.objects(), LoadOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(graph.num_layers(), 2);
        assert!(GraphVerifier::new(&repo.store, &graph).verify().is_ok());

        repo.store.remove(&repo.commits[0]);
        let full = GraphVerifier::new(&repo.store, &graph).verify();
        let shallow = GraphVerifier::new(&repo.store, &graph).shallow(true).verify();

        assert!(full.has(IssueKind::Content));
        assert!(shallow.is_ok());
    }

    #[rstest]
    fn date_is_checked_for_zero_generation_commits(repo: Repo) {
        let position = repo.local_position(&repo.commits[0]);
        let packed = commit_data_offset(4) + position * GRAPH_DATA_WIDTH + OBJECT_ID_RAW_LENGTH + 8;
        repo.corrupt(|data| {
            data[packed..packed + 4].copy_from_slice(&0u32.to_be_bytes());
            data[packed + 4..packed + 8].copy_from_slice(&5u32.to_be_bytes());
        });

        let report = repo.verify();

        assert!(report.issues().iter().any(|issue| issue.message
            == format!("commit date for commit {} in commit-graph is 5 != 1000", repo.commits[0])));
    }

    #[test]
    fn latin1_commit_is_written_and_verified() {
        let mut store = MemoryStore::new();
        let root = store.commit(&[], &[("file.txt", "root")], 1_000).unwrap();
        let tree = store.write_tree(&[("file.txt", "caf\u{e9}")]).unwrap();

        let mut raw = format!(
            "tree {tree}\nparent {root}\nauthor A <a@x> 2000 +0000\ncommitter C <c@x> 2000 +0000\n\
             encoding ISO-8859-1\n\ncaf"
        )
        .into_bytes();
        raw.push(0xe9);
        raw.push(b'\n');
        let tip = store
            .insert_raw(ObjectType::Commit, Bytes::from(raw))
            .unwrap();

        let repo = Repo {
            dir: TempDir::new().unwrap(),
            store,
            commits: vec![root, tip],
        };
        repo.write(GraphWriteOptions::default(), tip);

        let graph = CommitGraph::load(repo.objects(), LoadOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(graph.num_commits(), 2);
        assert_eq!(graph.parents(&tip).unwrap(), Some(vec![root]));

        let report = repo.verify();
        assert!(report.is_ok(), "{report}");
    }
}
