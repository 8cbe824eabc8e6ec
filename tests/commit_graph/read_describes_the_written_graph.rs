use crate::common::command::{linear_repository, repository, run_bit_command};
use crate::common::repository::TestRepository;
use predicates::prelude::predicate;
use rstest::rstest;

#[rstest]
fn read_describes_the_written_graph(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, _) = linear_repository;

    run_bit_command(repository.path(), &["commit-graph", "write", "--reachable"])
        .assert()
        .success();

    assert!(repository.objects().join("info").join("commit-graph").is_file());

    run_bit_command(repository.path(), &["commit-graph", "read"])
        .assert()
        .success()
        .stdout(predicate::eq(
            "header: 43475048 1 1 3 0\n\
             num_commits: 3\n\
             chunks: oid_fanout oid_lookup commit_metadata\n\
             options:\n",
        ));

    Ok(())
}

#[rstest]
fn read_shows_changed_path_settings(
    linear_repository: (TestRepository, Vec<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (repository, _) = linear_repository;

    run_bit_command(
        repository.path(),
        &["commit-graph", "write", "--reachable", "--changed-paths"],
    )
    .assert()
    .success();

    run_bit_command(repository.path(), &["commit-graph", "read"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "chunks: oid_fanout oid_lookup commit_metadata bloom_indexes bloom_data\n",
        ))
        .stdout(predicate::str::contains("options: bloom(1,10,7)\n"));

    // filters are kept by later writes that do not mention them
    run_bit_command(repository.path(), &["commit-graph", "write", "--reachable"])
        .assert()
        .success();

    run_bit_command(repository.path(), &["commit-graph", "read"])
        .assert()
        .success()
        .stdout(predicate::str::contains("options: bloom(1,10,7)\n"));

    Ok(())
}

#[rstest]
fn read_without_graph_fails(repository: TestRepository) -> Result<(), Box<dyn std::error::Error>> {
    run_bit_command(repository.path(), &["commit-graph", "read"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not load commit-graph"));

    Ok(())
}
