use crate::common::command::{linear_repository, run_bit_command};
use crate::common::repository::TestRepository;
use predicates::prelude::predicate;
use rstest::rstest;

#[rstest]
fn shallow_repository_gets_no_graph(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, commits) = linear_repository;
    std::fs::write(repository.git_dir().join("shallow"), format!("{}\n", commits[0]))?;

    run_bit_command(repository.path(), &["commit-graph", "write", "--reachable"])
        .assert()
        .success()
        .stderr(predicate::str::contains("not writing a commit-graph"));

    assert!(!repository.objects().join("info").join("commit-graph").exists());

    Ok(())
}
