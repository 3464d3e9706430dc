// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fuser::mount2;
use std::path::{Path, PathBuf};
use tagfs::core::permissions::Identity;
use tagfs::engine::reconcile;
use tagfs::{Config, IndexBackend, SqlIndex, TagDrive, TagState};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tagfs")]
#[command(about = "Tag files once, browse them as a filesystem of queries", long_about = None)]
struct Cli {
    /// Repository root
    #[arg(long, global = true, env = "TAGFS_REPOSITORY")]
    repo: Option<PathBuf>,

    /// Metadata index backend (overrides tagfs.json)
    #[arg(long, global = true, value_enum)]
    index: Option<IndexBackend>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the repository layout (idempotent)
    Init,

    /// Tag files (comma-separated tags apply all of them)
    Tag {
        /// Tag name, or several joined by commas
        tag: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List files carrying every given tag
    Query {
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// List tags that can still be appended to a query
    Tags { tags: Vec<String> },

    /// Show which contents are linked under a display name
    Which { name: String },

    /// Compare on-disk links with the SQLite index
    Verify,

    /// Rebuild the SQLite index from on-disk links
    Reindex,

    /// Mount the repository read-only
    Mount {
        mountpoint: PathBuf,
        /// Let other users see the mount
        #[arg(long)]
        allow_other: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let repository = cli.repo.clone().unwrap_or_else(Config::default_repository);
    let mut config = Config::load(repository)?;
    if let Some(index) = cli.index {
        config.index = index;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Init => cmd_init(config),
        Commands::Tag { tag, files } => {
            let tags: Vec<String> = tag.split(',').map(str::trim).filter(|t| !t.is_empty()).map(String::from).collect();
            cmd_tag(config, &tags, &files)
        }
        Commands::Query { tags } => cmd_query(config, &tags),
        Commands::Tags { tags } => cmd_tags(config, &tags),
        Commands::Which { name } => cmd_which(config, &name),
        Commands::Verify => cmd_verify(config),
        Commands::Reindex => cmd_reindex(config),
        Commands::Mount { mountpoint, allow_other } => cmd_mount(config, &mountpoint, allow_other),
    }
}

fn cmd_init(config: Config) -> Result<()> {
    let state = TagState::init(config)?;
    println!("Initialized {} ({} index)", state.store.repository().display(), state.index.backend_name());
    Ok(())
}

fn cmd_tag(config: Config, tags: &[String], files: &[PathBuf]) -> Result<()> {
    if tags.is_empty() {
        bail!("no tag given");
    }
    let state = TagState::open(config)?;
    let tagger = state.tagger();

    let mut failures = 0;
    for file in files {
        match tagger.tag_file_with(file, tags) {
            Ok(outcomes) => {
                for outcome in outcomes {
                    let marker = if outcome.newly_linked { "+" } else { "=" };
                    println!("{} {}/{} ({})", marker, outcome.tag, outcome.display_name, outcome.hash);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", file.display(), e);
            }
        }
    }
    if failures > 0 {
        bail!("{} of {} files could not be tagged", failures, files.len());
    }
    Ok(())
}

fn cmd_query(config: Config, tags: &[String]) -> Result<()> {
    let state = TagState::open(config)?;
    for entry in state.engine.matching_files(tags)? {
        println!("{}  {}", entry.hash, entry.display_name);
    }
    Ok(())
}

fn cmd_tags(config: Config, tags: &[String]) -> Result<()> {
    let state = TagState::open(config)?;
    for tag in state.engine.extendable_tags(tags)? {
        println!("{}", tag);
    }
    Ok(())
}

fn cmd_which(config: Config, name: &str) -> Result<()> {
    let state = TagState::open(config)?;
    let hashes = state.store.lookup_name(name)?;
    if hashes.is_empty() {
        bail!("nothing is linked as '{}'", name);
    }

    let links = state.store.links()?;
    for hash in hashes {
        let tags: Vec<&str> = links
            .iter()
            .filter(|l| l.hash == hash && l.display_name == name)
            .map(|l| l.tag.as_str())
            .collect();
        println!("{}  {}", hash, tags.join(","));
    }
    Ok(())
}

fn open_sql(config: &Config) -> Result<SqlIndex> {
    SqlIndex::open(&config.db_path()).with_context(|| format!("opening {}", config.db_path().display()))
}

fn cmd_verify(config: Config) -> Result<()> {
    let state = TagState::open(config)?;
    let sql = open_sql(&state.config)?;
    let found = reconcile::verify(&state.store, &sql)?;
    for item in &found {
        println!("{}", item);
    }
    if !found.is_empty() {
        bail!("{} inconsistencies (run `tagfs reindex` to record missing links)", found.len());
    }
    println!("Index and links agree");
    Ok(())
}

fn cmd_reindex(config: Config) -> Result<()> {
    let state = TagState::open(config)?;
    let sql = open_sql(&state.config)?;
    let count = reconcile::reindex(&state.store, &sql)?;
    println!("Recorded {} links in {}", count, state.config.db_path().display());
    Ok(())
}

fn cmd_mount(config: Config, mountpoint: &Path, allow_other: bool) -> Result<()> {
    // ========== SAFETY CHECKS ==========
    let abs_mount = std::fs::canonicalize(mountpoint)
        .with_context(|| format!("mountpoint {}", mountpoint.display()))?;
    let abs_repo = std::fs::canonicalize(&config.repository).unwrap_or_else(|_| config.repository.clone());
    tracing::debug!("Safety Check: Mount={:?}, Repository={:?}", abs_mount, abs_repo);

    if abs_mount.starts_with(&abs_repo) {
        bail!("mountpoint {} is inside the repository; it would show up as a tag", abs_mount.display());
    }
    if abs_repo.starts_with(&abs_mount) {
        bail!("repository {} is inside the mountpoint; it would be hidden by the mount", abs_repo.display());
    }

    let state = TagState::open(config)?;
    let options = Identity::capture().get_mount_options(allow_other);
    let drive = TagDrive::new(state);

    tracing::info!("Mounting {} on {}", abs_repo.display(), abs_mount.display());
    mount2(drive, &abs_mount, &options).with_context(|| format!("mounting {}", abs_mount.display()))?;
    tracing::info!("tagfs unmounted");
    Ok(())
}
