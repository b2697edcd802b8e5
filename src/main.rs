use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use galleria::config::Config;
use galleria::feed::{self, FeedAggregator, FeedEvent};
use galleria::scanner::{AssetScanner, Category, ManifestLibrary, ScanCache, ScanOutcome};
use galleria::storage::{FeedItem, LocalStore, PageCursor};

/// Get the config directory path (~/.config/galleria/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("galleria"))
}

fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // User-only access: the directory holds the database and API tokens
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "galleria",
    about = "Multi-source AI image feed and media library scanner"
)]
struct Args {
    /// Config file (default: ~/.config/galleria/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the live feed until interrupted
    Feed,

    /// Page through locally stored feed items, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only items older than this storage id
        #[arg(long, value_name = "ID")]
        before: Option<i64>,
    },

    /// Scan a JSON manifest library and print category totals
    Scan {
        #[arg(long, value_name = "FILE")]
        manifest: PathBuf,

        /// Delete these asset ids after the scan
        #[arg(long = "delete", value_name = "ID")]
        delete: Vec<String>,
    },

    /// Delete every stored feed item
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| config_dir.join("galleria.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let store = LocalStore::open(db_path_str).await;
    if !store.is_available() {
        eprintln!(
            "Warning: local store at {} is unavailable; nothing will be cached",
            db_path.display()
        );
    }

    match args.command {
        Command::Feed => run_feed(&config, store).await,
        Command::History { limit, before } => run_history(&store, limit, before).await,
        Command::Scan { manifest, delete } => run_scan(&config, store, manifest, delete).await,
        Command::Clear => {
            let deleted = store.delete_all().await;
            println!("Deleted {} feed items", deleted);
            Ok(())
        }
    }
}

// ============================================================================
// Feed
// ============================================================================

async fn run_feed(config: &Config, store: LocalStore) -> Result<()> {
    let client = feed::build_client().context("Failed to build HTTP client")?;
    let sources = feed::build_sources(&config.feed, &client, &store);
    if sources.is_empty() {
        anyhow::bail!("No feed sources configured");
    }

    let handle = FeedAggregator::new(config.feed.clone(), store, sources).spawn();
    let mut events = handle.subscribe();
    if handle.start().await?.is_none() {
        eprintln!("No feed source could be started; showing cached items only");
    }

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm_fut => break,
            event = events.recv() => match event {
                Ok(event) => print_feed_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Feed output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await?;
    Ok(())
}

fn describe(item: &FeedItem) -> String {
    let mut line = item.image_url.clone();
    if let (Some(w), Some(h)) = (item.width, item.height) {
        match item.aspect_ratio() {
            Some(ratio) => line.push_str(&format!(" [{}x{} {:.2}:1]", w, h, ratio)),
            None => line.push_str(&format!(" [{}x{}]", w, h)),
        }
    }
    if let Some(prompt) = item.prompt.as_deref().filter(|p| !p.is_empty()) {
        let short: String = prompt.chars().take(80).collect();
        line.push_str(&format!(" {}", short));
    }
    line
}

fn print_feed_event(event: &FeedEvent) {
    match event {
        FeedEvent::WindowReset(items) => {
            println!("-- {} items --", items.len());
            for item in items {
                println!("  {}", describe(item));
            }
        }
        FeedEvent::ItemsPrepended(items) => {
            for item in items {
                println!("+ {}", describe(item));
            }
        }
        FeedEvent::ItemsAppended { start, items } => {
            for (offset, item) in items.iter().enumerate() {
                println!("{:>5} {}", start + offset, describe(item));
            }
        }
        FeedEvent::ItemRemoved { image_url, .. } => println!("- {}", image_url),
        FeedEvent::ActiveSourceChanged(Some(name)) => println!("== source: {}", name),
        FeedEvent::ActiveSourceChanged(None) => println!("== no active source"),
        FeedEvent::AllSourcesFailed => eprintln!("All feed sources failed; retrying periodically"),
    }
}

// ============================================================================
// History
// ============================================================================

async fn run_history(store: &LocalStore, limit: usize, before: Option<i64>) -> Result<()> {
    let items = match before {
        Some(id) => store.fetch_before(PageCursor::Id(id), limit).await,
        None => store.fetch_latest(limit).await,
    };

    if items.is_empty() {
        println!("No stored items");
        return Ok(());
    }
    for item in &items {
        let id = item.db_id.map(|id| id.to_string()).unwrap_or_default();
        println!("{:>8}  {}", id, describe(item));
    }
    if let Some(oldest) = items.last().and_then(|i| i.db_id) {
        println!("(next page: --before {})", oldest);
    }
    Ok(())
}

// ============================================================================
// Scan
// ============================================================================

async fn run_scan(
    config: &Config,
    store: LocalStore,
    manifest: PathBuf,
    delete: Vec<String>,
) -> Result<()> {
    let library = ManifestLibrary::open(&manifest)
        .await
        .with_context(|| format!("Failed to open manifest {}", manifest.display()))?;
    let scanner = AssetScanner::new(Arc::new(library), store, config.scanner.clone());

    let outcome = scanner
        .read_data()
        .await
        .await
        .context("Scan task failed")??;
    let mut summary = match outcome {
        ScanOutcome::Completed(summary) => summary,
        ScanOutcome::Cancelled => anyhow::bail!("Scan was cancelled"),
    };

    if !delete.is_empty() {
        summary = scanner
            .delete_assets(&delete)
            .await
            .context("Deletion was not confirmed")?;
        println!("Deleted {} assets", delete.len());
    }

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ScanCache) {
    for category in Category::ALL {
        let stats = summary.stats(category);
        println!(
            "{:<18} {:>6} items  {:>10}",
            category.label(),
            stats.count,
            human_size(stats.total_size)
        );
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_includes_dimensions_and_ratio() {
        let mut item = FeedItem::new("https://img.example.com/a.png");
        assert_eq!(describe(&item), "https://img.example.com/a.png");

        item.width = Some(1024);
        item.height = Some(512);
        item.prompt = Some("a lighthouse".to_string());
        assert_eq!(
            describe(&item),
            "https://img.example.com/a.png [1024x512 2.00:1] a lighthouse"
        );

        item.height = Some(0);
        assert!(describe(&item).contains("[1024x0]"));
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
    }
}
