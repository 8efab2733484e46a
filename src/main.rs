use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use content_sync::cache::{CacheStore, NoopStorage, SqliteStorage, Source, Synced};
use content_sync::config::Config;
use content_sync::content::HttpSource;
use content_sync::sync::{SyncEngine, SyncError, SyncListener};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "content-sync")]
#[command(about = "Warm, inspect and maintain a local content cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/content-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a single content item
  Item {
    id: String,
    /// Always go to the network
    #[arg(long)]
    ignore_cache: bool,
  },
  /// Fetch a window of a collection
  Collection {
    alias: String,
    #[arg(long, default_value_t = 0)]
    from: usize,
    /// Window size (default: cache.page_size)
    #[arg(long)]
    size: Option<usize>,
    #[arg(long)]
    ignore_cache: bool,
    /// Request the compact form and skip item preloading
    #[arg(long)]
    no_full: bool,
  },
  /// Fetch the site navigation (prunes removed collections on refresh)
  Navigation {
    #[arg(long)]
    ignore_cache: bool,
  },
  /// Warm the cache for the given item ids
  Preload {
    #[arg(required = true)]
    ids: Vec<String>,
  },
  /// Show cached row counts
  Stats,
  /// Compact the cache database
  Vacuum,
  /// Delete every cached record
  Clear,
}

/// Logs background failures and counts them for the exit summary.
#[derive(Default)]
struct ReportingListener {
  failures: AtomicUsize,
}

impl SyncListener for ReportingListener {
  fn on_preload_failed(&self, id: &str, error: &SyncError) {
    self.failures.fetch_add(1, Ordering::SeqCst);
    error!(id, error = %error, "preload failed");
  }

  fn on_write_failed(&self, op: &str, error: &str) {
    self.failures.fetch_add(1, Ordering::SeqCst);
    error!(op, error, "cache write failed");
  }
}

#[derive(Serialize)]
struct Output<'a, T> {
  source: Source,
  expires_at: DateTime<Utc>,
  data: &'a T,
}

fn print<T: Serialize>(result: &Synced<T>) -> Result<()> {
  let output = Output {
    source: result.source,
    expires_at: result.expires_at,
    data: &result.data,
  };
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = content_sync::logging::init(config.log_dir.as_deref(), args.verbose)?;

  if config.cache.enabled {
    let path = match &config.cache.path {
      Some(path) => path.clone(),
      None => SqliteStorage::default_path()?,
    };
    info!(path = %path.display(), "opening cache");
    let store = Arc::new(SqliteStorage::open(&path)?);
    run(store, &config, args.command).await
  } else {
    run(Arc::new(NoopStorage), &config, args.command).await
  }
}

async fn run<S: CacheStore + 'static>(store: Arc<S>, config: &Config, command: Command) -> Result<()> {
  let remote = Arc::new(HttpSource::new(&config.remote)?);
  let listener = Arc::new(ReportingListener::default());

  let engine = SyncEngine::builder(Arc::clone(&store), remote)
    .listener(Arc::clone(&listener) as Arc<dyn SyncListener>)
    .ttl_override(config.cache.ttl_override()?)
    .preload_collections(config.cache.preload_collections)
    .build();

  let result = execute(&engine, store.as_ref(), config, command).await;

  // Apply queued writes before the runtime goes away.
  engine.shutdown().await;

  let failures = listener.failures.load(Ordering::SeqCst);
  if failures > 0 {
    eprintln!("{} background operation(s) failed, see log", failures);
  }

  result
}

async fn execute<S: CacheStore + 'static>(
  engine: &SyncEngine<S, HttpSource>,
  store: &S,
  config: &Config,
  command: Command,
) -> Result<()> {
  match command {
    Command::Item { id, ignore_cache } => {
      let item = engine.get_item(&id, ignore_cache).await?;
      print(&item)?;
    }
    Command::Collection {
      alias,
      from,
      size,
      ignore_cache,
      no_full,
    } => {
      let size = size.unwrap_or(config.cache.page_size);
      let full = config.cache.preload_collections && !no_full;
      let page = engine
        .get_collection_with(&alias, from, size, ignore_cache, full)
        .await?;
      print(&page)?;
    }
    Command::Navigation { ignore_cache } => {
      let sections = engine.get_navigation(ignore_cache).await?;
      print(&sections)?;
    }
    Command::Preload { ids } => {
      let handles: Vec<_> = ids.iter().map(|id| engine.preload(id.as_str())).collect();
      for joined in futures::future::join_all(handles).await {
        joined?;
      }
    }
    Command::Stats => {
      println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
    }
    Command::Vacuum => store.vacuum()?,
    Command::Clear => engine.clear(),
  }

  Ok(())
}
