use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedrelay::analysis::Classifier;
use feedrelay::config::Config;
use feedrelay::delivery::{ConsoleDelivery, Deliver, WebhookDelivery};
use feedrelay::feed::{self, FetchCoordinator, HttpFeedSource};
use feedrelay::pipeline::Pipeline;
use feedrelay::storage::{
    compute_statistics, Database, FeedConfigStore, HistoryStore, ObjectStore, StoreError,
    MAX_WINDOW_DAYS,
};

#[derive(Parser, Debug)]
#[command(
    name = "feedrelay",
    version,
    about = "Fetch feeds, rank fresh articles and relay each one exactly once"
)]
struct Args {
    /// Config file (default: ~/.config/feedrelay/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one notification cycle
    Run,
    /// List configured feeds
    Feeds,
    /// Show notification history statistics and recent entries
    History {
        /// Only list entries from the last N days
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(i64).range(1..=MAX_WINDOW_DAYS))]
        days: i64,
    },
    /// Add feeds from an OPML subscription list
    ImportOpml {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Get the config directory path (~/.config/feedrelay/)
fn get_config_dir() -> Result<PathBuf> {
    Config::default_dir().context("HOME environment variable not set")
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to set directory permissions to 0700");
        }
    }
    Ok(())
}

async fn open_database(path: &Path) -> Result<Arc<Database>> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(Arc::new(db)),
        Err(StoreError::InstanceLocked) => {
            eprintln!("Error: Another instance of feedrelay appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

fn build_delivery(config: &Config) -> Result<Arc<dyn Deliver>> {
    let Some(url) = config.delivery.webhook_url.as_deref() else {
        tracing::info!("No webhook configured, printing digest to stdout");
        return Ok(Arc::new(ConsoleDelivery));
    };

    let client = reqwest::Client::builder()
        .timeout(config.delivery_timeout())
        .build()
        .context("Failed to build webhook client")?;
    let webhook = WebhookDelivery::new(client, url, config.webhook_token(), config.delivery_timeout())
        .context("Invalid webhook configuration")?;
    Ok(Arc::new(webhook))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path_in(&config_dir);
    if let Some(parent) = db_path.parent() {
        ensure_private_dir(parent)?;
    }
    let db = open_database(&db_path).await?;
    let store: Arc<dyn ObjectStore> = db;
    let feeds = FeedConfigStore::new(Arc::clone(&store));
    let history = HistoryStore::new(Arc::clone(&store), config.retention());

    match args.command {
        Command::Run => {
            let source = HttpFeedSource::from_settings(config.fetch_settings())
                .context("Failed to build HTTP client")?;
            let pipeline = Pipeline::new(
                feeds,
                history,
                FetchCoordinator::new(Arc::new(source), config.fetch.workers),
                Classifier::new(config.keywords.clone(), config.scoring.clone()),
                build_delivery(&config)?,
            )
            .with_freshness(config.freshness());

            match pipeline.run_cycle().await {
                Ok(summary) => {
                    println!(
                        "Notified {} articles in {} categories ({} feeds ok, {} failed)",
                        summary.notified_count,
                        summary.categories.len(),
                        summary.feeds_succeeded,
                        summary.feeds_failed
                    );
                    if !summary.categories.is_empty() {
                        println!("Categories: {}", summary.categories.join(", "));
                    }
                    if summary.batch_id.is_some() && !summary.history_recorded {
                        eprintln!("Warning: history was not recorded; these articles may be sent again");
                    }
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Feeds => {
            let doc = feeds.load().await.context("Failed to load feed configuration")?;
            if doc.feeds.is_empty() {
                println!("No feeds configured. Add some with: feedrelay import-opml FILE");
            }
            for f in &doc.feeds {
                println!(
                    "{} [{}] {} ({}) {}",
                    if f.enabled { "●" } else { "○" },
                    f.category,
                    f.title,
                    f.id,
                    f.url
                );
            }
            println!(
                "\n{} feeds, {} enabled; {} articles delivered over {} notifications",
                doc.statistics.total_feeds,
                doc.statistics.active_feeds,
                doc.statistics.total_articles_processed,
                doc.statistics.total_notifications_sent
            );
        }
        Command::History { days } => {
            let doc = history.load().await.context("Failed to load history")?;
            let stats = compute_statistics(&doc.history, Utc::now(), doc.statistics.last_cleanup);
            println!(
                "{} notifications retained (max {}, {} days), {:.1}/day",
                stats.total_notifications,
                doc.config.max_history_size,
                doc.config.cleanup_days,
                stats.avg_daily_notifications
            );
            for (category, count) in &stats.category_stats {
                println!("  {category}: {count}");
            }

            let recent = history.recent(days).await.context("Failed to load history")?;
            println!("\nLast {days} days:");
            for entry in recent {
                println!(
                    "{}  [{}] {}\n    {}",
                    entry.notified_at.format("%Y-%m-%d %H:%M"),
                    entry.category,
                    entry.title,
                    entry.link
                );
            }
        }
        Command::ImportOpml { file } => {
            // SEC-008: Canonicalize to resolve symlinks
            let canonical = file
                .canonicalize()
                .with_context(|| format!("Failed to resolve import file: {}", file.display()))?;
            if !std::fs::metadata(&canonical)?.is_file() {
                anyhow::bail!("Import path must be a regular file");
            }
            let path_str = canonical
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in OPML path"))?;

            let parsed = feed::opml::parse(path_str, config.fetch.allow_private_hosts)
                .await
                .context("Failed to parse OPML file")?;
            let found = parsed.len();
            let added = feeds
                .merge_feeds(parsed)
                .await
                .context("Failed to update feed configuration")?;
            println!("Imported {added} new feeds ({found} found in {})", canonical.display());
        }
    }

    Ok(())
}
