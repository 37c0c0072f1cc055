//! # MyArchive Binary
//!
//! Assembles the catalog, media root and services from configuration and
//! exposes the ingestion operations as subcommands.

mod fetch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use ma_config::{ArchiveConfig, LogSettings};
use ma_core::{AppError, ContentHash, FileSource, ImportMode, Sha256Hasher, TrackedFile};
use ma_services::{import_folder, DownloadOptions, FileStore, FolderImportOptions, TagIndex};
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "db-sqlite")]
use ma_db_sqlite::SqliteCatalog;

#[cfg(feature = "storage-local")]
use ma_storage_local::LocalMediaStore;

#[cfg(not(all(feature = "db-sqlite", feature = "storage-local")))]
compile_error!(
    "myarchive needs a catalog and a media store: enable `db-sqlite` and `storage-local`"
);

use fetch::HttpFetcher;

#[derive(Parser)]
#[command(version, about = "Personal social media archive")]
struct Opts {
    /// Config file (default: ./myarchive.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Catalog database URL, overrides the configured one
    #[arg(long, global = true)]
    db: Option<String>,
    /// Media root directory, overrides the configured one
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', action = ArgAction::Count, global = true)]
    quiet: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import every file under a directory
    ImportFolder {
        dir: PathBuf,
        /// Move new files into the archive instead of copying them
        #[arg(long = "move")]
        move_files: bool,
        /// With --move, also delete files whose content is already archived
        #[arg(long, requires = "move_files")]
        delete_duplicates: bool,
        #[arg(long)]
        source: Option<FileSource>,
        /// Tag to attach to every file (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Import a single file
    ImportFile {
        path: PathBuf,
        #[arg(long = "move")]
        move_files: bool,
        #[arg(long)]
        source: Option<FileSource>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Download a URL unless it is already archived
    Download {
        url: String,
        /// Name used to pick the extension instead of the URL's last segment
        #[arg(long)]
        filename: Option<String>,
        /// URL to record instead of the fetched one
        #[arg(long)]
        saved_url: Option<String>,
        #[arg(long)]
        source: Option<FileSource>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Adopt untracked files in the media root and clear stale temp files
    Recover,
    /// Attach tags to an archived file
    Tag {
        hash: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Make CHILD a sub-tag of PARENT
    TagParent { parent: String, child: String },
    /// Print an archived file's record as JSON
    Show { hash: String },
    /// Re-hash every archived file and report mismatches
    Verify,
}

struct App {
    config: ArchiveConfig,
    store: FileStore,
    tags: TagIndex,
}

impl App {
    async fn build(config: ArchiveConfig) -> anyhow::Result<Self> {
        // 1. Catalog
        let catalog = Arc::new(
            SqliteCatalog::new(&config.database_url)
                .await
                .with_context(|| format!("opening catalog {}", config.database_url))?,
        );

        // 2. Media root
        let media = Arc::new(
            LocalMediaStore::open(config.media_root.clone())
                .await
                .with_context(|| format!("opening media root {}", config.media_root.display()))?,
        );

        info!(
            db = %config.database_url,
            media_root = %config.media_root.display(),
            "Archive opened"
        );
        Ok(Self {
            store: FileStore::new(catalog.clone(), media, Arc::new(Sha256Hasher)),
            tags: TagIndex::new(catalog),
            config,
        })
    }

    async fn find(&self, hash: &str) -> anyhow::Result<TrackedFile> {
        let hash = ContentHash::parse(hash)?;
        self.store
            .find_by_hash(&hash)
            .await?
            .ok_or_else(|| AppError::NotFound("File".into(), hash.to_string()).into())
    }

    async fn apply_tags(&self, file: &TrackedFile, tags: &[String]) -> anyhow::Result<()> {
        for name in tags {
            self.tags.tag_file(file, name).await?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ShowOutput {
    #[serde(flatten)]
    file: TrackedFile,
    absolute_path: PathBuf,
    tags: Vec<String>,
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    if let Err(e) = run(opts).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let config = ArchiveConfig::load(opts.config.as_deref())?
        .with_overrides(opts.db.clone(), opts.media_root.clone());
    config.validate()?;
    init_tracing(&config.log, opts.verbose, opts.quiet);

    let app = App::build(config).await?;
    match opts.command {
        Command::ImportFolder {
            dir,
            move_files,
            delete_duplicates,
            source,
            tags,
        } => {
            let options = FolderImportOptions {
                mode: import_mode(move_files),
                source,
                tags,
                workers: app.config.hash_workers,
                delete_duplicates,
            };
            let report = import_folder(&app.store, &app.tags, &dir, &options).await?;
            println!("added: {}", report.added);
            println!("existing: {}", report.existing);
            println!("failed: {}", report.failed.len());
            for (path, reason) in &report.failed {
                println!("  {}: {reason}", path.display());
            }
        }
        Command::ImportFile {
            path,
            move_files,
            source,
            tags,
        } => {
            let (file, existing) = app
                .store
                .ingest_from_path_as(&path, import_mode(move_files), source, None)
                .await?;
            app.apply_tags(&file, &tags).await?;
            print_outcome(&file, existing);
        }
        Command::Download {
            url,
            filename,
            saved_url,
            source,
            tags,
        } => {
            let fetcher = HttpFetcher::new(&app.config.download)?;
            let options = DownloadOptions {
                filename_override: filename,
                saved_url_override: saved_url,
                source,
            };
            let (file, existing) = app.store.download_and_ingest(&url, &fetcher, &options).await?;
            app.apply_tags(&file, &tags).await?;
            print_outcome(&file, existing);
        }
        Command::Recover => {
            let report = app.store.recover_orphans().await?;
            println!("scanned: {}", report.scanned);
            println!("recovered: {}", report.recovered.len());
            for hash in &report.recovered {
                println!("  {hash}");
            }
            println!("temp files removed: {}", report.temp_files_removed);
        }
        Command::Tag { hash, tags } => {
            let file = app.find(&hash).await?;
            app.apply_tags(&file, &tags).await?;
        }
        Command::TagParent { parent, child } => {
            let parent = app.tags.get_or_create(&parent).await?;
            let child = app.tags.get_or_create(&child).await?;
            app.tags.add_child(&parent, &child).await?;
        }
        Command::Show { hash } => {
            let file = app.find(&hash).await?;
            let tags = app.tags.tags_for_file(&file).await?;
            let output = ShowOutput {
                absolute_path: app.store.absolute_path(&file),
                tags: tags.into_iter().map(|t| t.name).collect(),
                file,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Verify => {
            let files = app.store.list().await?;
            let mut bad = 0usize;
            for file in &files {
                match app.store.verify(file).await {
                    Ok(true) => {}
                    Ok(false) => {
                        bad += 1;
                        println!("MISMATCH {} {}", file.content_hash, file.storage_path);
                    }
                    Err(e @ AppError::UnreadableSource { .. }) => {
                        bad += 1;
                        warn!(error = %e, "Stored file unreadable");
                        println!("MISSING  {} {}", file.content_hash, file.storage_path);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            println!("verified: {}, bad: {bad}", files.len());
            if bad > 0 {
                bail!("{bad} of {} files failed verification", files.len());
            }
        }
    }
    Ok(())
}

fn import_mode(move_files: bool) -> ImportMode {
    if move_files {
        ImportMode::Move
    } else {
        ImportMode::Copy
    }
}

fn print_outcome(file: &TrackedFile, existing: bool) {
    let status = if existing { "existing" } else { "added" };
    println!("{status} {} {}", file.content_hash, file.storage_path);
}

/// `RUST_LOG` wins; otherwise the configured level shifted by -v/-q.
fn init_tracing(settings: &LogSettings, verbose: u8, quiet: u8) {
    let directive = shift_level(&settings.level, i16::from(verbose) - i16::from(quiet));
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // Ignore error if already set
    let _ = if settings.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

/// Moves a plain level name up or down. Anything that is not a single level
/// (e.g. `info,sqlx=warn`) is used untouched.
fn shift_level(level: &str, shift: i16) -> String {
    const LEVELS: [Level; 5] = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];

    let Ok(parsed) = level.trim().parse::<Level>() else {
        return level.to_string();
    };
    if shift == 0 {
        return parsed.to_string().to_lowercase();
    }
    let idx = LEVELS.iter().position(|l| *l == parsed).unwrap_or(2) as i16;
    let shifted = (idx + shift).clamp(0, LEVELS.len() as i16 - 1) as usize;
    LEVELS[shifted].to_string().to_lowercase()
}
