use crate::common::command::{repository, run_bit_command};
use crate::common::repository::{TestRepository, raw_oid};
use predicates::prelude::predicate;
use rstest::rstest;

#[rstest]
fn preferred_pack_wins_over_newer_pack(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x20), 40)], 1_000);
    repository.add_pack("pack-b", &[(raw_oid(0x20), 80)], 2_000);

    run_bit_command(
        repository.path(),
        &["multi-pack-index", "write", "--preferred-pack", "pack-a.pack"],
    )
    .assert()
    .success();

    run_bit_command(
        repository.path(),
        &["multi-pack-index", "read", "--show-objects"],
    )
    .assert()
    .success()
    .stdout(predicate::str::contains(format!(
        "{} 40\tpack-a.idx\n",
        raw_oid(0x20)
    )));

    Ok(())
}

#[rstest]
fn unknown_preferred_pack_is_ignored(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x20), 40)], 1_000);
    repository.add_pack("pack-b", &[(raw_oid(0x20), 80)], 2_000);

    run_bit_command(
        repository.path(),
        &["multi-pack-index", "write", "--preferred-pack", "pack-z.idx"],
    )
    .assert()
    .success()
    .stderr(predicate::str::contains("unknown preferred pack: 'pack-z.idx'"));

    run_bit_command(
        repository.path(),
        &["multi-pack-index", "read", "--show-objects"],
    )
    .assert()
    .success()
    .stdout(predicate::str::contains(format!(
        "{} 80\tpack-b.idx\n",
        raw_oid(0x20)
    )));

    Ok(())
}
