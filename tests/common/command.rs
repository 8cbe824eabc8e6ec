use crate::common::redirect_temp_dir;
use crate::common::repository::TestRepository;
use assert_cmd::Command;
use rstest::fixture;
use std::path::Path;

/// Variables that would change what the binary reads
const SETTINGS_ENV: [&str; 9] = [
    "BIT_COMMIT_GRAPH",
    "BIT_MULTI_PACK_INDEX",
    "BIT_COMMIT_GRAPH_READ_CHANGED_PATHS",
    "BIT_COMMIT_GRAPH_VERIFY_ON_LOAD",
    "BIT_CHANGED_PATHS_VERSION",
    "BIT_TEST_BLOOM_SETTINGS_NUM_HASHES",
    "BIT_TEST_BLOOM_SETTINGS_BITS_PER_ENTRY",
    "BIT_TEST_BLOOM_SETTINGS_MAX_CHANGED_PATHS",
    "BIT_COMMIT_GRAPH_MAX_NEW_FILTERS",
];

#[fixture]
pub fn repository() -> TestRepository {
    redirect_temp_dir();
    TestRepository::new()
}

/// Three commits on `main`, oldest first
#[fixture]
pub fn linear_repository(repository: TestRepository) -> (TestRepository, Vec<String>) {
    let commits = repository.linear_history("main", 3);
    let commits = commits.iter().map(|oid| oid.to_string()).collect();
    (repository, commits)
}

pub fn run_bit_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("bit-graph").expect("Failed to find bit-graph binary");
    for name in SETTINGS_ENV {
        cmd.env_remove(name);
    }
    cmd.env("BIT_LOG", "warn");
    cmd.env("NO_COLOR", "1");
    cmd.current_dir(dir);
    for arg in args {
        cmd.arg(arg);
    }
    cmd
}
