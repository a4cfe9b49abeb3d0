//! davsync CLI - inspect a dav client cache.
//!
//! This tool reads the file-backed cache of a dav client, validates sync
//! configurations and previews the page order of a download run.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dav_common::{TableId, TableObject};
use dav_storage::{FileCacheStore, LocalCache};
use dav_sync::{sort_table_names, SyncConfig};

#[derive(Parser)]
#[command(name = "davsync")]
#[command(about = "davsync - Inspect dav sync client state")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Cache directory (default: platform data dir).
    #[arg(short, long, global = true)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached table objects.
    Objects {
        /// Only objects of this table.
        #[arg(short, long)]
        table: Option<TableId>,
    },

    /// List objects waiting to be pushed, in push order.
    Pending,

    /// Show the cached session.
    Session,

    /// Show the cached user profile.
    User,

    /// Preview the page fetch order for a download run.
    Order {
        /// Table names in download order.
        #[arg(short, long, value_delimiter = ',', required = true)]
        tables: Vec<String>,

        /// Names of parallel tables.
        #[arg(short, long, value_delimiter = ',')]
        parallel: Vec<String>,

        /// Page counts as name=count.
        #[arg(long, value_delimiter = ',')]
        pages: Vec<String>,
    },

    /// Validate a sync configuration file.
    CheckConfig {
        /// Path to the JSON configuration.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides the level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Objects { table } => cmd_objects(&open_cache(cli.cache)?, table).await,

        Commands::Pending => cmd_pending(&open_cache(cli.cache)?).await,

        Commands::Session => cmd_session(&open_cache(cli.cache)?).await,

        Commands::User => cmd_user(&open_cache(cli.cache)?).await,

        Commands::Order {
            tables,
            parallel,
            pages,
        } => cmd_order(&tables, &parallel, &pages),

        Commands::CheckConfig { file } => cmd_check_config(&file),
    }
}

/// Open the file-backed cache.
fn open_cache(dir: Option<PathBuf>) -> Result<LocalCache> {
    let dir = match dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("No platform data directory, pass --cache")?
            .join("davsync"),
    };
    debug!("Using cache at {}", dir.display());

    let store = FileCacheStore::new(&dir)
        .with_context(|| format!("Failed to open cache at {}", dir.display()))?;
    Ok(LocalCache::new(Arc::new(store)))
}

fn print_object(object: &TableObject) {
    println!(
        "  {}  table={}  status={}  etag={}{}",
        object.uuid,
        object.table_id,
        object.upload_status,
        object.etag.as_deref().unwrap_or("-"),
        if object.is_file { "  [FILE]" } else { "" }
    );
    for (name, property) in &object.properties {
        let marker = if property.local { " (local)" } else { "" };
        println!("      {} = {}{}", name, property.value, marker);
    }
}

/// List cached objects.
async fn cmd_objects(cache: &LocalCache, table: Option<TableId>) -> Result<()> {
    let mut objects = match table {
        Some(id) => cache.table_objects_of(id).await,
        None => cache.table_objects().await,
    }
    .context("Failed to read table objects")?;
    objects.sort_by(|a, b| (a.table_id, &a.uuid).cmp(&(b.table_id, &b.uuid)));

    if objects.is_empty() {
        println!("No table objects cached.");
        return Ok(());
    }

    println!("{} table objects:", objects.len());
    for object in &objects {
        print_object(object);
    }
    Ok(())
}

/// List dirty objects in push order.
async fn cmd_pending(cache: &LocalCache) -> Result<()> {
    let mut pending: Vec<TableObject> = cache
        .table_objects()
        .await
        .context("Failed to read table objects")?
        .into_iter()
        .filter(|o| o.upload_status.is_pending())
        .collect();
    pending.sort_by_key(|o| (o.upload_status.push_priority(), o.table_id));

    if pending.is_empty() {
        println!("Nothing to push.");
        return Ok(());
    }

    println!("{} table objects to push:", pending.len());
    for object in &pending {
        print_object(object);
    }
    Ok(())
}

/// Show the session record.
async fn cmd_session(cache: &LocalCache) -> Result<()> {
    match cache.session().await.context("Failed to read session")? {
        Some(session) if session.is_deleted() => {
            println!("Logged out, session deletion not yet pushed.");
        }
        Some(_) => println!("Logged in."),
        None => println!("No session."),
    }
    Ok(())
}

/// Show the user record.
async fn cmd_user(cache: &LocalCache) -> Result<()> {
    let Some(user) = cache.user().await.context("Failed to read user")? else {
        println!("No user cached.");
        return Ok(());
    };

    println!("User Information:");
    println!("  ID: {}", user.id);
    println!("  Email: {}", user.email);
    println!("  Name: {}", user.first_name);
    println!("  Confirmed: {}", user.confirmed);
    println!("  Plan: {:?}", user.plan);
    println!(
        "  Storage: {} of {} bytes used ({} free)",
        user.used_storage,
        user.total_storage,
        user.free_storage()
    );
    println!("  Apps: {}", user.apps.len());
    println!("  Fetched: {}", user.fetched_at);
    Ok(())
}

/// Print the scheduled page order.
fn cmd_order(tables: &[String], parallel: &[String], pages: &[String]) -> Result<()> {
    let counts = parse_pages(pages)?;
    let order = sort_table_names(tables, parallel, &counts);

    if order.is_empty() {
        println!("No pages to fetch.");
        return Ok(());
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (position, name) in order.iter().enumerate() {
        let page = seen.entry(name.as_str()).or_insert(0);
        *page += 1;
        println!("{:>4}  {} page {}", position + 1, name, page);
    }
    Ok(())
}

/// Parse `name=count` pairs.
fn parse_pages(pairs: &[String]) -> Result<HashMap<String, usize>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, count) = pair
                .split_once('=')
                .with_context(|| format!("Expected name=count, got '{}'", pair))?;
            let count = count
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid page count in '{}'", pair))?;
            Ok((name.trim().to_string(), count))
        })
        .collect()
}

/// Validate a configuration file and summarize it.
fn cmd_check_config(file: &Path) -> Result<()> {
    info!("Checking configuration: {}", file.display());

    let config = SyncConfig::load(file)
        .with_context(|| format!("Invalid configuration: {}", file.display()))?;

    println!("Configuration is valid.");
    println!("  Environment: {:?}", config.environment);
    println!("  Tables:");
    for table in &config.tables {
        let parallel = config.parallel_tables.contains(&table.name);
        println!(
            "    {} (id {}){}",
            table.name,
            table.id,
            if parallel { " [parallel]" } else { "" }
        );
    }
    println!("  Download concurrency: {}", config.download_concurrency);
    println!("  Push concurrency: {}", config.push_concurrency);
    println!("  Download files: {}", config.download_files);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pages() {
        let pages = parse_pages(&["a=2".to_string(), " b = 3".to_string()]).unwrap();
        assert_eq!(pages.get("a"), Some(&2));
        assert_eq!(pages.get("b"), Some(&3));

        assert!(parse_pages(&["a".to_string()]).is_err());
        assert!(parse_pages(&["a=x".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_order() {
        let cli = Cli::parse_from([
            "davsync", "order", "--tables", "a,b", "--parallel", "b", "--pages", "a=2,b=3",
        ]);
        match cli.command {
            Commands::Order { tables, pages, .. } => {
                assert_eq!(tables, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(pages.len(), 2);
            }
            _ => panic!("expected order command"),
        }
    }
}
