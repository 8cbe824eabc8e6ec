use crate::common::command::{linear_repository, repository, run_bit_command};
use crate::common::repository::TestRepository;
use predicates::prelude::*;
use rstest::rstest;

#[rstest]
fn new_commits_go_to_a_new_layer(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, _) = linear_repository;

    run_bit_command(
        repository.path(),
        &["commit-graph", "write", "--reachable", "--split"],
    )
    .assert()
    .success();

    repository.linear_history("main", 2);

    run_bit_command(
        repository.path(),
        &["commit-graph", "write", "--reachable", "--split=no-merge"],
    )
    .assert()
    .success();

    let chain = repository
        .objects()
        .join("info")
        .join("commit-graphs")
        .join("commit-graph-chain");
    assert_eq!(std::fs::read_to_string(chain)?.lines().count(), 2);

    run_bit_command(repository.path(), &["commit-graph", "read"])
        .assert()
        .success()
        .stdout(predicate::eq(
            "header: 43475048 1 1 4 1\n\
             num_commits: 2\n\
             chunks: oid_fanout oid_lookup commit_metadata base_graphs\n\
             options:\n\
             layers: 2\n",
        ));

    run_bit_command(repository.path(), &["commit-graph", "verify"])
        .assert()
        .success();

    Ok(())
}

#[rstest]
fn replace_folds_every_layer(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, _) = linear_repository;

    run_bit_command(
        repository.path(),
        &["commit-graph", "write", "--reachable", "--split"],
    )
    .assert()
    .success();
    repository.linear_history("main", 1);
    run_bit_command(
        repository.path(),
        &["commit-graph", "write", "--reachable", "--split=no-merge"],
    )
    .assert()
    .success();

    run_bit_command(
        repository.path(),
        &["commit-graph", "write", "--reachable", "--split=replace"],
    )
    .assert()
    .success();

    run_bit_command(repository.path(), &["commit-graph", "read"])
        .assert()
        .success()
        .stdout(predicate::str::contains("num_commits: 4\n"))
        .stdout(predicate::str::contains("layers:").not());

    Ok(())
}

#[rstest]
fn unknown_split_strategy_is_rejected(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    run_bit_command(
        repository.path(),
        &["commit-graph", "write", "--split=sideways"],
    )
    .assert()
    .failure()
    .stderr(predicate::str::contains("unrecognized --split argument, sideways"));

    Ok(())
}
