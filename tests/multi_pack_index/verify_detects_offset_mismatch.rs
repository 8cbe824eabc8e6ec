use crate::common::command::{repository, run_bit_command};
use crate::common::repository::{TestRepository, raw_oid};
use predicates::prelude::predicate;
use rstest::rstest;

#[rstest]
fn rewritten_pack_index_is_reported(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x10), 12), (raw_oid(0x20), 40)], 1_000);

    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success();
    run_bit_command(repository.path(), &["multi-pack-index", "verify"])
        .assert()
        .success();

    repository.add_pack("pack-a", &[(raw_oid(0x10), 16), (raw_oid(0x20), 40)], 1_000);

    run_bit_command(repository.path(), &["multi-pack-index", "verify"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(format!(
            "incorrect object offset for oid[0] = {}: c != 10",
            raw_oid(0x10)
        )))
        .stderr(predicate::str::contains(
            "multi-pack-index verification found 1 issue(s)",
        ));

    Ok(())
}

#[rstest]
fn corrupt_index_fails_to_parse(repository: TestRepository) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(repository.pack_dir().join("multi-pack-index"), b"MIDX")?;

    run_bit_command(repository.path(), &["multi-pack-index", "verify"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "multi-pack-index file exists, but failed to parse",
        ));

    Ok(())
}
