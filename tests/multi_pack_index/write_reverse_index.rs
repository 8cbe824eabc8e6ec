use crate::common::command::{repository, run_bit_command};
use crate::common::repository::{TestRepository, raw_oid};
use rstest::rstest;
use std::path::Path;

fn rev_files(pack_dir: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(pack_dir)
        .expect("Failed to list pack directory")
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("multi-pack-index-") && name.ends_with(".rev"))
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[rstest]
fn reverse_index_follows_the_index(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x10), 12)], 1_000);

    run_bit_command(
        repository.path(),
        &["multi-pack-index", "write", "--rev-index"],
    )
    .assert()
    .success();

    let first = rev_files(&repository.pack_dir());
    assert_eq!(first.len(), 1);

    repository.add_pack("pack-b", &[(raw_oid(0x30), 12)], 2_000);
    run_bit_command(
        repository.path(),
        &["multi-pack-index", "write", "--rev-index"],
    )
    .assert()
    .success();

    let second = rev_files(&repository.pack_dir());
    assert_eq!(second.len(), 1);
    assert_ne!(first, second);

    // a write without the reverse index leaves none behind
    repository.add_pack("pack-c", &[(raw_oid(0x40), 12)], 3_000);
    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success();

    assert!(rev_files(&repository.pack_dir()).is_empty());

    Ok(())
}
