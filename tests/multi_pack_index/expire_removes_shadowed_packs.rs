use crate::common::command::{repository, run_bit_command};
use crate::common::repository::{TestRepository, raw_oid};
use predicates::prelude::*;
use rstest::rstest;

#[rstest]
fn pack_without_referenced_objects_is_deleted(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x10), 12), (raw_oid(0x20), 40)], 2_000);
    repository.add_pack("pack-b", &[(raw_oid(0x20), 80)], 1_000);

    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success();

    run_bit_command(repository.path(), &["multi-pack-index", "expire"])
        .assert()
        .success()
        .stdout(predicate::eq("expired pack-b.idx\n"));

    assert!(!repository.pack_dir().join("pack-b.pack").exists());
    assert!(!repository.pack_dir().join("pack-b.idx").exists());

    run_bit_command(repository.path(), &["multi-pack-index", "read"])
        .assert()
        .success()
        .stdout(predicate::str::contains("packs:\npack-a.idx\nobject-dir:"));

    run_bit_command(repository.path(), &["multi-pack-index", "verify"])
        .assert()
        .success();

    Ok(())
}

#[rstest]
fn kept_pack_is_not_expired(repository: TestRepository) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x20), 40)], 2_000);
    repository.add_pack("pack-b", &[(raw_oid(0x20), 80)], 1_000);
    std::fs::write(repository.pack_dir().join("pack-b.keep"), b"")?;

    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success();

    run_bit_command(repository.path(), &["multi-pack-index", "expire"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert!(repository.pack_dir().join("pack-b.pack").exists());

    Ok(())
}

#[rstest]
fn nothing_to_expire_without_an_index(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x20), 40)], 2_000);

    run_bit_command(repository.path(), &["multi-pack-index", "expire"])
        .assert()
        .success();

    assert!(repository.pack_dir().join("pack-a.pack").exists());
    assert!(!repository.pack_dir().join("multi-pack-index").exists());

    Ok(())
}
