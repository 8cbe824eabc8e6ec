use anyhow::Result;
use bit_graph::areas::repository::Repository;
use bit_graph::artifacts::commit_graph::writer::SplitStrategy;
use bit_graph::artifacts::settings::Settings;
use bit_graph::commands::plumbing::commit_graph::{CommitGraphWriteOptions, GraphSource};
use bit_graph::commands::plumbing::multi_pack_index::MidxCommandOptions;
use clap::{Args, Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing_subscriber::EnvFilter;

/// Variable holding the log filter, e.g. `BIT_LOG=debug`
const LOG_ENV: &str = "BIT_LOG";

#[derive(Parser)]
#[command(
    name = "bit-graph",
    version = "0.1.0",
    author = "Sami Barbut-Dica",
    about = "Commit-graph and multi-pack-index maintenance for bit repositories",
    long_about = "This tool writes, verifies and inspects the acceleration files of a repository: \
    the commit-graph, which caches the commit history, \
    and the multi-pack-index, which maps every packed object to its pack.",
    help_template = r"
{name} {version} - {about}

USAGE:
    {usage}

OPTIONS:
    {all-args}
",
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Location {
    #[arg(long, global = true, help = "Use this object directory instead of .git/objects")]
    object_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(
        name = "commit-graph",
        about = "Write and verify commit-graph files",
        long_about = "This command manages the commit-graph files under <objects>/info, \
        either a single file or a chain of incremental layers."
    )]
    CommitGraph {
        #[command(flatten)]
        location: Location,
        #[command(subcommand)]
        command: CommitGraphCommands,
    },
    #[command(
        name = "multi-pack-index",
        about = "Write and verify the multi-pack-index",
        long_about = "This command manages <objects>/pack/multi-pack-index, \
        a single index over the objects of every pack."
    )]
    MultiPackIndex {
        #[command(flatten)]
        location: Location,
        #[command(subcommand)]
        command: MidxCommands,
    },
}

#[derive(Subcommand)]
enum CommitGraphCommands {
    #[command(about = "Write a commit-graph from packs, commits or refs")]
    Write {
        #[arg(long, conflicts_with_all = ["stdin_packs", "stdin_commits"], help = "Index every commit reachable from the refs")]
        reachable: bool,
        #[arg(long, conflicts_with = "stdin_commits", help = "Read pack index names from standard input")]
        stdin_packs: bool,
        #[arg(long, help = "Read commit ids from standard input")]
        stdin_commits: bool,
        #[arg(long, help = "Keep the commits of the existing commit-graph")]
        append: bool,
        #[arg(
            long,
            num_args = 0..=1,
            require_equals = true,
            default_missing_value = "",
            value_parser = parse_split,
            help = "Write an incremental layer; optionally 'no-merge' or 'replace'"
        )]
        split: Option<SplitStrategy>,
        #[arg(long, help = "Fold a layer when it is at most this many times larger than the new one")]
        size_multiple: Option<u32>,
        #[arg(long, help = "Fold layers whenever the new layer would exceed this many commits")]
        max_commits: Option<u32>,
        #[arg(long, value_parser = parse_expire_time, help = "Only delete unused layers older than this (RFC 3339 or seconds since the epoch)")]
        expire_time: Option<SystemTime>,
        #[arg(long, conflicts_with = "no_changed_paths", help = "Compute changed-path Bloom filters")]
        changed_paths: bool,
        #[arg(long, help = "Drop changed-path Bloom filters")]
        no_changed_paths: bool,
        #[arg(long, help = "Compute at most this many new Bloom filters")]
        max_new_filters: Option<u32>,
    },
    #[command(about = "Check the commit-graph against the object database")]
    Verify {
        #[arg(long, help = "Only check the top layer of a chain")]
        shallow: bool,
    },
    #[command(about = "Describe the commit-graph")]
    Read,
}

#[derive(Subcommand)]
enum MidxCommands {
    #[command(about = "Write a multi-pack-index over every pack")]
    Write {
        #[command(flatten)]
        options: MidxOptions,
    },
    #[command(about = "Check the multi-pack-index against the pack indexes")]
    Verify,
    #[command(about = "Delete packs the multi-pack-index takes no object from")]
    Expire {
        #[command(flatten)]
        options: MidxOptions,
    },
    #[command(about = "Describe the multi-pack-index")]
    Read {
        #[arg(long, help = "List every object with its pack and offset")]
        show_objects: bool,
    },
}

#[derive(Args)]
struct MidxOptions {
    #[arg(long, help = "Take duplicated objects from this pack")]
    preferred_pack: Option<String>,
    #[arg(long, help = "Also write the reverse index")]
    rev_index: bool,
}

impl From<&MidxOptions> for MidxCommandOptions {
    fn from(options: &MidxOptions) -> Self {
        MidxCommandOptions {
            preferred_pack: options.preferred_pack.clone(),
            rev_index: options.rev_index,
        }
    }
}

fn parse_split(value: &str) -> Result<SplitStrategy, String> {
    match value {
        "" => Ok(SplitStrategy::Unspecified),
        "no-merge" => Ok(SplitStrategy::MergeProhibited),
        "replace" => Ok(SplitStrategy::Replace),
        other => Err(format!("unrecognized --split argument, {other}")),
    }
}

fn parse_expire_time(value: &str) -> Result<SystemTime, String> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(SystemTime::UNIX_EPOCH + Duration::from_secs(seconds));
    }

    chrono::DateTime::parse_from_rfc3339(value)
        .map(SystemTime::from)
        .map_err(|err| format!("invalid expire time '{value}': {err}"))
}

fn read_stdin_lines() -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

fn open_repository(location: &Location) -> Result<Repository> {
    let pwd = std::env::current_dir()?;
    Repository::open(
        &pwd,
        location.object_dir.clone(),
        Settings::from_env()?,
        Box::new(std::io::stdout()),
    )
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::CommitGraph { location, command } => {
            let repository = open_repository(location)?;

            match command {
                CommitGraphCommands::Write {
                    reachable,
                    stdin_packs,
                    stdin_commits,
                    append,
                    split,
                    size_multiple,
                    max_commits,
                    expire_time,
                    changed_paths,
                    no_changed_paths,
                    max_new_filters,
                } => {
                    let source = if *reachable {
                        GraphSource::Reachable
                    } else if *stdin_packs {
                        GraphSource::StdinPacks(read_stdin_lines()?)
                    } else if *stdin_commits {
                        GraphSource::StdinCommits(read_stdin_lines()?)
                    } else {
                        GraphSource::AllPacks
                    };

                    let changed_paths = match (*changed_paths, *no_changed_paths) {
                        (true, _) => Some(true),
                        (_, true) => Some(false),
                        _ => None,
                    };

                    let opts = CommitGraphWriteOptions {
                        append: *append,
                        split: *split,
                        size_multiple: *size_multiple,
                        max_commits: *max_commits,
                        expire_time: *expire_time,
                        changed_paths,
                        max_new_filters: *max_new_filters,
                    };

                    repository.commit_graph_write(source, &opts)?
                }
                CommitGraphCommands::Verify { shallow } => {
                    repository.commit_graph_verify(*shallow)?
                }
                CommitGraphCommands::Read => repository.commit_graph_read()?,
            }
        }
        Commands::MultiPackIndex { location, command } => {
            let repository = open_repository(location)?;

            match command {
                MidxCommands::Write { options } => {
                    repository.multi_pack_index_write(&options.into())?
                }
                MidxCommands::Verify => repository.multi_pack_index_verify()?,
                MidxCommands::Expire { options } => {
                    repository.multi_pack_index_expire(&options.into())?
                }
                MidxCommands::Read { show_objects } => {
                    repository.multi_pack_index_read(*show_objects)?
                }
            }
        }
    }

    Ok(())
}
