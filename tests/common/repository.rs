use assert_fs::TempDir;
use bit_graph::areas::database::Database;
use bit_graph::areas::refs::Refs;
use bit_graph::artifacts::objects::OBJECT_ID_RAW_LENGTH;
use bit_graph::artifacts::objects::blob::Blob;
use bit_graph::artifacts::objects::commit::{Author, Commit};
use bit_graph::artifacts::objects::object_id::ObjectId;
use bit_graph::artifacts::objects::tree::{EntryMode, Tree, TreeEntry};
use bit_graph::artifacts::pack::pack_index::write_pack_index;
use bit_graph::artifacts::store::PackEntry;
use bytes::Bytes;
use fake::Fake;
use fake::faker::internet::en::FreeEmail;
use fake::faker::lorem::en::{Word, Words};
use fake::faker::name::en::Name;
use filetime::FileTime;
use std::cell::Cell;
use std::path::{Path, PathBuf};

/// First commit timestamp; each commit is one minute younger than the previous one
const EPOCH: i64 = 1_700_000_000;

/// Repository built directly through the library, without a porcelain
pub struct TestRepository {
    dir: TempDir,
    database: Database,
    refs: Refs,
    clock: Cell<i64>,
}

impl TestRepository {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let git_dir = dir.path().join(".git");
        std::fs::create_dir_all(git_dir.join("objects").join("pack"))
            .expect("Failed to create objects directory");
        std::fs::create_dir_all(git_dir.join("refs").join("heads"))
            .expect("Failed to create refs directory");

        let database = Database::new(git_dir.join("objects").into_boxed_path());
        let refs = Refs::new(git_dir.into_boxed_path());
        refs.set_head("refs/heads/main").expect("Failed to set HEAD");

        TestRepository {
            dir,
            database,
            refs,
            clock: Cell::new(EPOCH),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git_dir(&self) -> PathBuf {
        self.path().join(".git")
    }

    pub fn objects(&self) -> PathBuf {
        self.git_dir().join("objects")
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.objects().join("pack")
    }

    /// A commit with a single random file
    pub fn commit(&self, parents: &[ObjectId]) -> ObjectId {
        let file_name = format!("{}.txt", Word().fake::<String>());
        let content = Words(5..10).fake::<Vec<String>>().join(" ");
        let blob = self
            .database
            .store(&Blob::new(Bytes::from(content)))
            .expect("Failed to store blob");

        let mut tree = Tree::default();
        tree.insert(&file_name, TreeEntry::new(blob, EntryMode::Regular));
        let tree = self.database.store(&tree).expect("Failed to store tree");

        let seconds = self.clock.get();
        self.clock.set(seconds + 60);
        let timestamp = chrono::DateTime::from_timestamp(seconds, 0)
            .expect("Invalid timestamp")
            .fixed_offset();
        let author = Author::new(
            Name().fake::<String>().replace(' ', "_"),
            FreeEmail().fake::<String>(),
            timestamp,
        );
        let message = format!("{}\n", Words(3..6).fake::<Vec<String>>().join(" "));

        self.database
            .store(&Commit::new(parents.to_vec(), tree, author, message))
            .expect("Failed to store commit")
    }

    /// `count` commits in a line on `branch`, oldest first
    pub fn linear_history(&self, branch: &str, count: usize) -> Vec<ObjectId> {
        let mut commits: Vec<ObjectId> = Vec::with_capacity(count);
        let mut tip = self
            .refs
            .read_ref(&format!("refs/heads/{branch}"))
            .expect("Failed to read branch");

        for _ in 0..count {
            let parents = tip.into_iter().collect::<Vec<_>>();
            let commit = self.commit(&parents);
            commits.push(commit);
            tip = Some(commit);
        }

        if let Some(tip) = tip {
            self.set_branch(branch, &tip);
        }
        commits
    }

    pub fn set_branch(&self, branch: &str, oid: &ObjectId) {
        self.refs
            .update_ref(&format!("refs/heads/{branch}"), oid)
            .expect("Failed to update branch");
    }

    /// Write `<name>.idx` and a stub `<name>.pack` whose mtime is `mtime`
    pub fn add_pack(&self, name: &str, entries: &[(ObjectId, u64)], mtime: i64) {
        let entries = entries
            .iter()
            .map(|(oid, offset)| PackEntry::new(*oid, *offset))
            .collect::<Vec<_>>();
        let (bytes, _) = write_pack_index(Vec::new(), &entries, &raw_oid(0xee))
            .expect("Failed to write pack index");

        std::fs::write(self.pack_dir().join(format!("{name}.idx")), bytes)
            .expect("Failed to write pack index");
        let pack = self.pack_dir().join(format!("{name}.pack"));
        std::fs::write(&pack, b"PACK").expect("Failed to write pack");
        filetime::set_file_mtime(&pack, FileTime::from_unix_time(mtime, 0))
            .expect("Failed to set pack mtime");
    }

    pub fn remove_pack(&self, name: &str) {
        for extension in ["idx", "pack"] {
            std::fs::remove_file(self.pack_dir().join(format!("{name}.{extension}")))
                .expect("Failed to remove pack file");
        }
    }
}

pub fn raw_oid(byte: u8) -> ObjectId {
    ObjectId::from_raw([byte; OBJECT_ID_RAW_LENGTH])
}
