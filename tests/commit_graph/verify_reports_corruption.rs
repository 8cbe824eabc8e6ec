use crate::common::command::{linear_repository, repository, run_bit_command};
use crate::common::repository::TestRepository;
use predicates::prelude::predicate;
use rstest::rstest;

#[rstest]
fn fresh_graph_verifies(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, _) = linear_repository;

    run_bit_command(repository.path(), &["commit-graph", "write", "--reachable"])
        .assert()
        .success();

    run_bit_command(repository.path(), &["commit-graph", "verify"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    Ok(())
}

#[rstest]
fn flipped_byte_fails_verification(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, _) = linear_repository;

    run_bit_command(repository.path(), &["commit-graph", "write", "--reachable"])
        .assert()
        .success();

    // the last byte before the trailing hash is the date of the last commit
    let path = repository.objects().join("info").join("commit-graph");
    let mut bytes = std::fs::read(&path)?;
    let target = bytes.len() - 21;
    bytes[target] ^= 0x01;
    std::fs::write(&path, bytes)?;

    run_bit_command(repository.path(), &["commit-graph", "verify"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "the commit-graph file has incorrect checksum and is likely corrupt",
        ))
        .stderr(predicate::str::contains("commit-graph verification found"));

    Ok(())
}

#[rstest]
fn missing_graph_has_nothing_to_verify(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    run_bit_command(repository.path(), &["commit-graph", "verify"])
        .assert()
        .success();

    Ok(())
}
