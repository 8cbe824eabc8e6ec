use crate::common::command::{repository, run_bit_command};
use crate::common::repository::{TestRepository, raw_oid};
use predicates::prelude::*;
use rstest::rstest;

#[rstest]
fn removed_pack_is_replaced_by_the_other_copy(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x20), 40)], 1_000);
    repository.add_pack("pack-b", &[(raw_oid(0x20), 80), (raw_oid(0x30), 12)], 2_000);

    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success();

    repository.remove_pack("pack-b");

    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success()
        .stdout(predicate::eq("dropped pack-b.idx\n"))
        .stderr(predicate::str::contains("dropping missing pack"));

    run_bit_command(
        repository.path(),
        &["multi-pack-index", "read", "--show-objects"],
    )
    .assert()
    .success()
    .stdout(predicate::str::contains("num_objects: 1\n"))
    .stdout(predicate::str::contains(format!("{} 40\tpack-a.idx\n", raw_oid(0x20))))
    .stdout(predicate::str::contains("pack-b.idx").not());

    run_bit_command(repository.path(), &["multi-pack-index", "verify"])
        .assert()
        .success();

    Ok(())
}

#[rstest]
fn unchanged_packs_leave_the_file_alone(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x20), 40)], 1_000);

    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success();
    let path = repository.pack_dir().join("multi-pack-index");
    let before = std::fs::metadata(&path)?.modified()?;
    let content = std::fs::read(&path)?;

    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert_eq!(std::fs::metadata(&path)?.modified()?, before);
    crate::assert_file_eq!(&std::fs::read(&path)?, &content);

    Ok(())
}
