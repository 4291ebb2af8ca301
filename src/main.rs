use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use binsync::config::MergeLevel;
use binsync::controller::{Controller, FillOptions, PushOptions, SyncControlStatus};
use binsync::decompiler::MemoryDecompiler;
use binsync_core::artifact::Comment;
use binsync_core::{Artifact, ArtifactKey, ArtifactType};
use binsync_git::GixRepo;

/// binsync command-line front-end
///
/// Drives the same `Controller` a decompiler plugin embeds, against a
/// `MemoryDecompiler` stand-in, for headless scripting, CI checks, and
/// testing a repository without a live IDA/Binary Ninja/Ghidra session.
///
/// QUICK START:
///
///   binsync --repo . --user alice --binary ./target.bin connect --init
///   binsync --repo . --user alice --binary ./target.bin status
///   binsync --repo . --user alice --binary ./target.bin push-comment 0x401000 "entry point"
///   binsync --repo . --user alice --binary ./target.bin fill function 0x401000 bob
#[derive(Parser)]
#[command(name = "binsync")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'binsync <command> --help' for more information on a specific command.")]
struct Cli {
    /// Path to the binsync git repository.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Local user name.
    #[arg(long, global = true, env = "BINSYNC_USER")]
    user: String,

    /// Path to the binary this repo tracks, used for fingerprinting and
    /// per-binary config lookup (`<binary>.toml`).
    #[arg(long, global = true)]
    binary: PathBuf,

    /// Git remote to pull from and push to. Omit for a local-only repo.
    #[arg(long, global = true)]
    remote: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the repository, creating the fingerprint commit if the
    /// repo has none yet.
    Connect {
        /// Create the fingerprint commit if the repository is empty.
        #[arg(long)]
        init: bool,
    },

    /// Print connection status (connected / connected, no remote / disconnected).
    Status,

    /// List every user known to the repository and their last push time.
    Users,

    /// Push a comment artifact at an address.
    PushComment {
        /// Address, e.g. `0x401000`.
        #[arg(value_parser = parse_hex)]
        addr: u64,
        /// Comment text.
        text: String,
    },

    /// Pull one artifact from another user, merge with the local copy,
    /// and commit the result.
    Fill {
        /// Artifact kind to fill.
        #[arg(value_enum)]
        kind: ArtifactKindArg,
        /// Key: a `0x...` address for Function/GlobalVariable, or a name
        /// for Struct/Enum.
        key: String,
        /// The user to pull from.
        from: String,
        /// Merge policy to apply.
        #[arg(long, value_enum, default_value = "non-conflicting")]
        level: MergeLevelArg,
    },

    /// Converge functions, global variables, and enums across every known
    /// user (structs and comments are excluded, matching `fill_artifact`'s
    /// per-type rules).
    MagicFill {
        /// Prefer this user's value when multiple users disagree.
        #[arg(long)]
        prefer: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ArtifactKindArg {
    Function,
    GlobalVariable,
    Struct,
    Enum,
}

impl From<ArtifactKindArg> for ArtifactType {
    fn from(value: ArtifactKindArg) -> Self {
        match value {
            ArtifactKindArg::Function => Self::Function,
            ArtifactKindArg::GlobalVariable => Self::GlobalVariable,
            ArtifactKindArg::Struct => Self::Struct,
            ArtifactKindArg::Enum => Self::Enum,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MergeLevelArg {
    Overwrite,
    NonConflicting,
    Merge,
}

impl From<MergeLevelArg> for MergeLevel {
    fn from(value: MergeLevelArg) -> Self {
        match value {
            MergeLevelArg::Overwrite => Self::Overwrite,
            MergeLevelArg::NonConflicting => Self::NonConflicting,
            MergeLevelArg::Merge => Self::Merge,
        }
    }
}

fn parse_hex(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn artifact_key(kind: ArtifactType, raw: &str) -> Result<ArtifactKey> {
    match kind {
        ArtifactType::Function | ArtifactType::GlobalVariable => {
            Ok(ArtifactKey::Addr(parse_hex(raw.trim_start_matches("0x"))?))
        }
        ArtifactType::Struct | ArtifactType::Enum => Ok(ArtifactKey::Name(raw.to_owned())),
        other => bail!("unsupported artifact kind for a CLI key: {other:?}"),
    }
}

fn connect(cli: &Cli, controller: &Arc<Controller>, init: bool) -> Result<()> {
    let repo = Box::new(GixRepo::open(&cli.repo).with_context(|| format!("opening {}", cli.repo.display()))?);
    let warnings = controller
        .connect(&cli.user, repo, cli.remote.clone(), init)
        .context("connect failed")?;
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    controller.start_worker_routines();
    Ok(())
}

fn main() -> Result<()> {
    binsync::telemetry::init();
    let cli = Cli::parse();

    let decompiler = Arc::new(MemoryDecompiler::new(
        format!("{:x}", md5_stub(&cli.binary)),
        cli.binary.clone(),
    ));
    let controller = Controller::new(decompiler);

    match &cli.command {
        Commands::Connect { init } => {
            connect(&cli, &controller, *init)?;
            println!("connected as {}", cli.user);
        }
        Commands::Status => {
            connect(&cli, &controller, false)?;
            match controller.status() {
                SyncControlStatus::Connected => println!("connected (remote configured)"),
                SyncControlStatus::ConnectedNoRemote => println!("connected (no remote)"),
                SyncControlStatus::Disconnected => println!("disconnected"),
            }
        }
        Commands::Users => {
            connect(&cli, &controller, false)?;
            for user in controller.users()? {
                match user.last_push_time {
                    Some(t) => println!("{}\tlast push {t}", user.name),
                    None => println!("{}\t(never pushed)", user.name),
                }
            }
        }
        Commands::PushComment { addr, text } => {
            connect(&cli, &controller, false)?;
            controller.push_artifact(
                Artifact::Comment(Comment {
                    addr: *addr,
                    comment: text.clone(),
                    decompiled: false,
                    last_change: None,
                }),
                PushOptions::default(),
            )?;
            println!("pushed comment at {addr:#x}");
        }
        Commands::Fill { kind, key, from, level } => {
            connect(&cli, &controller, false)?;
            let kind: ArtifactType = (*kind).into();
            let key = artifact_key(kind, key)?;
            let filled = controller.fill_artifact(
                kind,
                key,
                FillOptions {
                    user: from.clone(),
                    merge_level: (*level).into(),
                    blocking: true,
                    commit_msg: Some(format!("Integrated {from}")),
                },
            )?;
            if filled {
                println!("filled {kind:?} from {from}");
            } else {
                println!("nothing to fill");
            }
        }
        Commands::MagicFill { prefer } => {
            connect(&cli, &controller, false)?;
            controller.magic_fill(prefer.as_deref(), MergeLevel::NonConflicting)?;
            println!("magic fill complete");
        }
    }

    controller.stop_worker_routines();
    Ok(())
}

/// A stable, dependency-free stand-in for a real binary hash (e.g. a
/// decompiler plugin's own MD5 of the loaded image). The CLI has no
/// loaded binary to hash, only a path, so it fingerprints the path
/// instead — good enough to keep one repo tied to one tracked file.
fn md5_stub(path: &std::path::Path) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}
