use crate::common::command::{repository, run_bit_command};
use crate::common::repository::{TestRepository, raw_oid};
use predicates::prelude::predicate;
use rstest::rstest;

#[rstest]
fn newest_pack_wins_duplicates(repository: TestRepository) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x10), 12), (raw_oid(0x20), 40)], 1_000);
    repository.add_pack("pack-b", &[(raw_oid(0x20), 80), (raw_oid(0x30), 12)], 2_000);

    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .success();

    let objects = repository.path().canonicalize()?.join(".git").join("objects");
    let expected = format!(
        "header: 4d494458 1 1 4 2\n\
         chunks: pack-names oid-fanout oid-lookup object-offsets\n\
         num_objects: 3\n\
         packs:\n\
         pack-a.idx\n\
         pack-b.idx\n\
         object-dir: {}\n\
         {} 12\tpack-a.idx\n\
         {} 80\tpack-b.idx\n\
         {} 12\tpack-b.idx\n",
        objects.display(),
        raw_oid(0x10),
        raw_oid(0x20),
        raw_oid(0x30),
    );

    run_bit_command(
        repository.path(),
        &["multi-pack-index", "read", "--show-objects"],
    )
    .assert()
    .success()
    .stdout(predicate::eq(expected));

    Ok(())
}

#[rstest]
fn empty_pack_directory_is_an_error(
    repository: TestRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    run_bit_command(repository.path(), &["multi-pack-index", "write"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no pack files to index."));

    run_bit_command(repository.path(), &["multi-pack-index", "read"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not load multi-pack-index"));

    Ok(())
}

#[rstest]
fn alternate_object_directory(repository: TestRepository) -> Result<(), Box<dyn std::error::Error>> {
    repository.add_pack("pack-a", &[(raw_oid(0x10), 12)], 1_000);
    let objects = repository.objects().canonicalize()?;
    let objects = objects.to_str().ok_or("non UTF-8 path")?;

    // run from outside the repository
    let outside = repository.path().parent().ok_or("no parent")?;
    run_bit_command(
        outside,
        &["multi-pack-index", "--object-dir", objects, "write"],
    )
    .assert()
    .success();

    assert!(repository.pack_dir().join("multi-pack-index").is_file());

    Ok(())
}
