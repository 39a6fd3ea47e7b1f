mod cache;
mod commands;
mod config;
mod logging;
mod net;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use crate::cache::{AssetCache, MemoryStorage, SqliteStorage};
use crate::net::HttpFetcher;

#[derive(Parser, Debug)]
#[command(name = "precache")]
#[command(about = "Pre-populate an offline asset cache and serve requests cache-first")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./precache.yaml or $XDG_CONFIG_HOME/precache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Path to the cache database (default: $XDG_DATA_HOME/precache/cache.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long, global = true, conflicts_with = "db")]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Fetch every configured asset and store it in the configured cache
  Install,

  /// Serve one request: cached response if present, network otherwise
  Fetch {
    /// URL or origin-relative path
    url: String,

    /// HTTP method; only GET can be served from cache
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Write the body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print status and headers before the body
    #[arg(short, long)]
    include: bool,
  },

  /// List stored entries of a cache
  List {
    /// Cache name (default: the configured cache)
    #[arg(long)]
    cache: Option<String>,
  },

  /// List cache names
  Caches,

  /// Delete a cache and all of its entries
  Delete {
    name: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let fetcher = HttpFetcher::new(config.timeout())?;

  if args.ephemeral {
    let cache = AssetCache::new(MemoryStorage::new(), fetcher);
    return commands::run(&cache, &config, args.command).await;
  }

  let db_path = args.db.or_else(|| config.database.clone());
  let storage = match db_path {
    Some(path) => SqliteStorage::open_path(&path)?,
    None => SqliteStorage::open_default()?,
  };
  let cache = AssetCache::new(storage, fetcher);
  commands::run(&cache, &config, args.command).await
}
