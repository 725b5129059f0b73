//! vitrina - visual product matching from the command line.
//!
//! Usage:
//!   vitrina migrate
//!   vitrina hash <PHOTO>
//!   vitrina index --item <UUID> <PHOTO>
//!   vitrina sample --item <UUID> <PHOTO>
//!   vitrina search <PHOTO> [--category rugs] [--threshold 0.7]
//!   vitrina backfill [--photos-dir ./photos] [--hashes-only]
//!
//! Results are written to stdout as JSON; logs go to stderr or `LOG_FILE`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use vitrina_core::defaults::{self, env_or, JOB_QUEUE_CAPACITY};
use vitrina_core::{ItemFilter, ItemRepository, SampleRepository};
use vitrina_db::{Database, PoolConfig};
use vitrina_inference::{dhash, initialize_encoder, EmbeddingExtractor, HttpImageEncoder};
use vitrina_jobs::{
    Backfill, BackfillConfig, CatalogIndexer, DataUriPhotoSource, FsPhotoSource, HttpPhotoSource,
    PhotoSourceChain, WorkerConfig, WorkerEvent,
};
use vitrina_search::{CurationGates, SampleCurator, SearchConfig, VisualMatcher};

#[derive(Parser)]
#[command(name = "vitrina")]
#[command(author, version, about = "Visual product matching for retail catalogs", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Print the legacy perceptual hash of a photo
    Hash {
        /// Photo file
        photo: PathBuf,
    },

    /// Store a new photo for an item: hash now, embed in the background
    Index {
        /// Item ID
        #[arg(short, long)]
        item: Uuid,

        /// Photo file
        photo: PathBuf,
    },

    /// Propose a photo as an additional sample for an item
    Sample {
        /// Item ID
        #[arg(short, long)]
        item: Uuid,

        /// Photo file
        photo: PathBuf,
    },

    /// Find catalog items that look like a photo
    Search {
        /// Query photo file
        photo: PathBuf,

        /// Only items of this branch
        #[arg(short, long)]
        branch: Option<Uuid>,

        /// Only items of this category
        #[arg(short, long)]
        category: Option<String>,

        /// Only items of this collection
        #[arg(long)]
        collection: Option<String>,

        /// Minimum cosine similarity
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Maximum number of items per result list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Fill in missing hashes and embeddings for existing items
    Backfill {
        /// Directory that relative photo references resolve against
        #[arg(long)]
        photos_dir: Option<PathBuf>,

        /// Only items of this branch
        #[arg(short, long)]
        branch: Option<Uuid>,

        /// Only items of this category
        #[arg(short, long)]
        category: Option<String>,

        /// Only compute legacy hashes
        #[arg(long, conflicts_with = "embeddings_only")]
        hashes_only: bool,

        /// Only compute embeddings
        #[arg(long)]
        embeddings_only: bool,

        /// Items processed at once
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Migrate => {
            let db = connect(cli.database_url.as_deref(), PoolConfig::from_env()).await?;
            db.migrate().await.context("migration failed")?;
            print_json(&json!({ "migrated": true }))
        }
        Commands::Hash { photo } => {
            let bytes = read_photo(&photo).await?;
            let hash = dhash(&bytes).with_context(|| format!("cannot hash {}", photo.display()))?;
            print_json(&json!({ "photo": photo, "image_hash": hash }))
        }
        Commands::Index { item, photo } => {
            let db = connect(cli.database_url.as_deref(), PoolConfig::from_env()).await?;
            run_index(&db, item, &photo).await
        }
        Commands::Sample { item, photo } => {
            let db = connect(cli.database_url.as_deref(), PoolConfig::from_env()).await?;
            let bytes = read_photo(&photo).await?;
            let curator = SampleCurator::new(
                item_repository(&db),
                sample_repository(&db),
                extractor().await?,
            )
            .with_gates(CurationGates::from_env());
            let outcome = curator.propose_sample(item, &bytes).await?;
            print_json(&outcome)
        }
        Commands::Search {
            photo,
            branch,
            category,
            collection,
            threshold,
            limit,
        } => {
            let db = connect(cli.database_url.as_deref(), PoolConfig::from_env()).await?;
            let bytes = read_photo(&photo).await?;
            let matcher = VisualMatcher::new(
                item_repository(&db),
                sample_repository(&db),
                extractor().await?,
            )
            .with_config(SearchConfig::from_env());

            let mut filter = ItemFilter::new();
            if let Some(branch) = branch {
                filter = filter.with_branch(branch);
            }
            if let Some(category) = category {
                filter = filter.with_category(category);
            }
            if let Some(collection) = collection {
                filter = filter.with_collection(collection);
            }
            let threshold = threshold.unwrap_or(matcher.config().threshold);
            let limit = limit.unwrap_or(matcher.config().limit);

            let outcome = matcher
                .search_filtered(&bytes, &filter, threshold, limit)
                .await?;
            print_json(&outcome)
        }
        Commands::Backfill {
            photos_dir,
            branch,
            category,
            hashes_only,
            embeddings_only,
            concurrency,
        } => {
            let mut config = BackfillConfig::from_env();
            if hashes_only {
                config = config.hashes_only();
            }
            if embeddings_only {
                config = config.embeddings_only();
            }
            if let Some(concurrency) = concurrency {
                config = config.with_concurrency(concurrency);
            }

            let pool_config = PoolConfig::from_env()
                .with_min_capacity(u32::try_from(config.concurrency).unwrap_or(u32::MAX));
            let db = connect(cli.database_url.as_deref(), pool_config).await?;

            let mut sources = PhotoSourceChain::new()
                .with(Arc::new(DataUriPhotoSource))
                .with(Arc::new(HttpPhotoSource::new()));
            if let Some(dir) = photos_dir {
                sources = sources.with(Arc::new(FsPhotoSource::new(dir)));
            }

            // Hash-only runs never touch the encoder
            let embedder = if config.embeddings {
                extractor().await?
            } else {
                EmbeddingExtractor::from_env(Arc::new(HttpImageEncoder::from_env()))
            };

            let mut scope = ItemFilter::new();
            if let Some(branch) = branch {
                scope = scope.with_branch(branch);
            }
            if let Some(category) = category {
                scope = scope.with_category(category);
            }

            let report = Backfill::new(item_repository(&db), embedder, Arc::new(sources))
                .with_config(config)
                .run(&scope)
                .await?;
            print_json(&report)
        }
    }
}

/// Hash and embed one photo, waiting for the background job to settle.
async fn run_index(db: &Database, item: Uuid, photo: &Path) -> anyhow::Result<()> {
    let bytes = read_photo(photo).await?;
    let worker_config = WorkerConfig::from_env().with_enabled(true);
    let job_timeout = worker_config.job_timeout;
    let (indexer, handle) = CatalogIndexer::start(
        item_repository(db),
        extractor().await?,
        env_or(defaults::ENV_JOB_QUEUE_CAPACITY, JOB_QUEUE_CAPACITY),
        worker_config,
    );
    let mut events = handle.events();

    let receipt = indexer.on_item_saved(item, &bytes).await?;
    let embedding = match receipt.job_id {
        Some(job_id) => {
            match tokio::time::timeout(
                job_timeout + Duration::from_secs(5),
                wait_for_job(&mut events, job_id),
            )
            .await
            {
                Ok(status) => status,
                Err(_) => {
                    warn!(%job_id, "Gave up waiting for embedding job");
                    "timed_out".to_string()
                }
            }
        }
        None => "not_scheduled".to_string(),
    };

    handle.shutdown().await?;
    print_json(&json!({ "receipt": receipt, "embedding": embedding }))
}

async fn wait_for_job(events: &mut broadcast::Receiver<WorkerEvent>, job_id: Uuid) -> String {
    loop {
        match events.recv().await {
            Ok(WorkerEvent::JobCompleted { job_id: id, .. }) if id == job_id => {
                return "stored".to_string()
            }
            Ok(WorkerEvent::JobSuperseded { job_id: id, .. }) if id == job_id => {
                return "superseded".to_string()
            }
            Ok(WorkerEvent::JobFailed {
                job_id: id, error, ..
            }) if id == job_id => return format!("failed: {}", error),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return "worker_stopped".to_string(),
        }
    }
}

async fn connect(url: Option<&str>, pool_config: PoolConfig) -> anyhow::Result<Database> {
    let Some(url) = url else {
        bail!("DATABASE_URL is not set (use --database-url or the environment)");
    };
    Database::connect_with_config(url, pool_config)
        .await
        .context("cannot connect to the database")
}

fn item_repository(db: &Database) -> Arc<dyn ItemRepository> {
    Arc::new(db.items.clone())
}

fn sample_repository(db: &Database) -> Arc<dyn SampleRepository> {
    Arc::new(db.samples.clone())
}

/// Initialize the configured encoder and wrap it in an extractor.
async fn extractor() -> anyhow::Result<EmbeddingExtractor> {
    let encoder = initialize_encoder(Arc::new(HttpImageEncoder::from_env()))
        .await
        .context("image encoder is unavailable")?;
    Ok(EmbeddingExtractor::from_env(encoder))
}

async fn read_photo(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Set up tracing from `RUST_LOG`, `LOG_FORMAT`, `LOG_FILE` and `LOG_ANSI`.
///
/// The returned guard flushes the file writer on drop.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vitrina=info,sqlx=warn".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let ansi = std::env::var("LOG_ANSI")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);

    let (writer, guard) = match std::env::var("LOG_FILE").ok().filter(|p| !p.is_empty()) {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let file = path
                .file_name()
                .map(|f| f.to_owned())
                .unwrap_or_else(|| "vitrina.log".into());
            let appender = tracing_appender::rolling::daily(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        None => (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr),
            None,
        ),
    };
    let to_file = guard.is_some();

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_writer(writer),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_ansi(ansi && !to_file)
                    .with_writer(writer),
            )
            .init();
    }

    if to_file {
        info!("Logging to file");
    }
    guard
}
