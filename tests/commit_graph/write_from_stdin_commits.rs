use crate::common::command::{linear_repository, run_bit_command};
use crate::common::repository::TestRepository;
use predicates::prelude::predicate;
use rstest::rstest;

#[rstest]
fn parents_of_listed_commits_are_included(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, commits) = linear_repository;

    run_bit_command(repository.path(), &["commit-graph", "write", "--stdin-commits"])
        .write_stdin(format!("{}\n", commits[1]))
        .assert()
        .success();

    run_bit_command(repository.path(), &["commit-graph", "read"])
        .assert()
        .success()
        .stdout(predicate::str::contains("num_commits: 2\n"));

    Ok(())
}

#[rstest]
fn non_hex_commit_is_rejected(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, _) = linear_repository;

    run_bit_command(repository.path(), &["commit-graph", "write", "--stdin-commits"])
        .write_stdin("not-a-commit\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "unexpected non-hex object ID: not-a-commit",
        ));

    assert!(!repository.objects().join("info").join("commit-graph").exists());

    Ok(())
}
