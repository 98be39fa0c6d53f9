//! Briefwire - AI-curated feed-to-digest pipeline
//!
//! Fetches RSS/Atom feeds on a schedule, decomposes articles into scored
//! information units with a multi-agent LLM pipeline, maintains an entity
//! knowledge graph, and emails a curated digest.

use anyhow::Result;
use briefwire::models::{AnalysisMode, Digest, DigestTotals};
use briefwire::service::{BriefwireService, RunOptions};
use briefwire::web::{AdminState, LogBroadcastLayer};
use briefwire::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "briefwire")]
#[command(author = "Briefwire Team")]
#[command(version)]
#[command(about = "AI-curated feed-to-digest pipeline")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BRIEFWIRE_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    /// Feeds file path
    #[arg(long, env = "BRIEFWIRE_FEEDS", default_value = "config/feeds.toml")]
    feeds: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduled service (or a single cycle with --once)
    Run {
        /// Run one cycle then exit
        #[arg(long)]
        once: bool,

        /// Cap analyzed articles in this cycle
        #[arg(long)]
        limit: Option<usize>,

        /// Execute the pipeline but skip the SMTP send
        #[arg(long)]
        dry_run: bool,

        /// Analysis depth
        #[arg(long, short, default_value = "deep")]
        mode: String,

        /// Concurrent article analyses
        #[arg(long)]
        concurrency: Option<usize>,

        /// Also expose the admin HTTP/WebSocket surface
        #[arg(long)]
        web: bool,
    },

    /// Manage the feed catalog
    Feeds {
        #[command(subcommand)]
        command: FeedCommands,
    },

    /// Send a test digest to the configured recipients
    TestEmail,

    /// Show the effective configuration
    Config {
        /// Show the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[derive(Subcommand)]
enum FeedCommands {
    /// List all feeds
    List,
    /// Add a feed
    Add {
        name: String,
        url: String,
        #[arg(default_value = "")]
        category: String,
    },
    /// Remove a feed by name or URL
    Remove { identifier: String },
    /// Enable or disable a feed by name or URL
    Toggle { identifier: String },
    /// Validate a feed URL without mutating the catalog
    Validate { url: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let (log_tx, _) = tokio::sync::broadcast::channel(256);
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("briefwire={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(LogBroadcastLayer::new(log_tx.clone()))
        .init();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
        AppConfig::default()
    };

    match cli.command {
        Commands::Run {
            once,
            limit,
            dry_run,
            mode,
            concurrency,
            web,
        } => {
            // Fatal configuration fails fast; the scheduler never starts
            config.require_api_key()?;
            let mode: AnalysisMode = mode.parse()?;
            let service = Arc::new(BriefwireService::new(config, cli.feeds, mode)?);

            if once {
                let stats = service
                    .run_once(RunOptions {
                        limit,
                        dry_run,
                        concurrency,
                    })
                    .await?;
                println!(
                    "cycle complete: {} fetched, {} new, {} units",
                    stats.fetched, stats.new, stats.units
                );
                return Ok(());
            }

            run_service(service, log_tx, web).await?;
        }

        Commands::Feeds { command } => run_feeds(&cli.feeds, command).await?,

        Commands::TestEmail => {
            let notifier = briefwire::notifier::Notifier::new(config.email.clone());
            let digest = test_digest();
            if notifier.send_digest(&digest, None).await? {
                println!("test digest sent");
            } else {
                anyhow::bail!("test digest delivery failed for every recipient");
            }
        }

        Commands::Config { default } => {
            let shown = if default { AppConfig::default() } else { config };
            println!("{}", toml::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

async fn run_service(
    service: Arc<BriefwireService>,
    log_tx: tokio::sync::broadcast::Sender<String>,
    web: bool,
) -> Result<()> {
    tracing::info!(
        mode = service.mode().as_str(),
        fetch_interval = %service.config().schedule.fetch_interval,
        digest_times = ?service.config().schedule.digest_times,
        "Briefwire service starting"
    );

    let scheduler = service.start_scheduler()?;
    let shutdown = scheduler.shutdown_signal();

    let web_handle = if web {
        let state = AdminState::new(service.clone(), log_tx);
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = briefwire::web::serve(state, shutdown).await {
                tracing::error!(error = %e, "Admin surface failed");
            }
        }))
    } else {
        None
    };

    // One fetch on startup, then the scheduler takes over
    if service.try_begin_run() {
        if let Err(e) = service.fetch_and_analyze(RunOptions::default()).await {
            tracing::error!(error = %e, "Startup fetch failed");
        }
        service.end_run();
    }

    tracing::info!("Briefwire is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    scheduler.shutdown().await;
    if let Some(handle) = web_handle {
        let _ = handle.await;
    }
    tracing::info!("Briefwire stopped");
    Ok(())
}

async fn run_feeds(feeds_path: &PathBuf, command: FeedCommands) -> Result<()> {
    let registry = briefwire::feeds::FeedRegistry::new(feeds_path.clone());
    match command {
        FeedCommands::List => {
            let feeds = registry.list()?;
            if feeds.is_empty() {
                println!("no feeds configured");
                return Ok(());
            }
            println!("{:<3} {:<24} {:<14} URL", "", "NAME", "CATEGORY");
            for feed in feeds {
                let flag = if feed.enabled { "on" } else { "off" };
                println!("{:<3} {:<24} {:<14} {}", flag, feed.name, feed.category, feed.url);
            }
        }
        FeedCommands::Add {
            name,
            url,
            category,
        } => {
            let probe = briefwire::feeds::FeedRegistry::validate(&url).await;
            if !probe.valid {
                tracing::warn!(
                    url = %url,
                    error = probe.error.as_deref().unwrap_or("unknown"),
                    "Feed did not validate; adding anyway"
                );
            }
            registry.add(&name, &url, &category)?;
            println!("added {}", name);
        }
        FeedCommands::Remove { identifier } => {
            registry.remove(&identifier)?;
            println!("removed {}", identifier);
        }
        FeedCommands::Toggle { identifier } => {
            let current = registry
                .list()?
                .into_iter()
                .find(|f| f.name == identifier || f.url == identifier)
                .map(|f| f.enabled)
                .unwrap_or(false);
            registry.set_enabled(&identifier, !current)?;
            println!("{} is now {}", identifier, if current { "disabled" } else { "enabled" });
        }
        FeedCommands::Validate { url } => {
            let probe = briefwire::feeds::FeedRegistry::validate(&url).await;
            if probe.valid {
                println!(
                    "valid: {} ({} entries)",
                    probe.title.as_deref().unwrap_or("untitled"),
                    probe.entry_count
                );
            } else {
                anyhow::bail!(
                    "invalid feed: {}",
                    probe.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    Ok(())
}

fn test_digest() -> Digest {
    Digest {
        date: chrono::Utc::now(),
        daily_summary: "Test digest verifying SMTP delivery.".to_string(),
        top_picks: vec![briefwire::models::DigestItem {
            unit_id: "iu_test".to_string(),
            title: "Test featured item".to_string(),
            summary: "A generated item confirming that digest delivery works.".to_string(),
            analysis: String::new(),
            source_name: "Briefwire".to_string(),
            url: "https://example.com".to_string(),
            event_time: String::new(),
            score: 9.0,
            reasoning: "test delivery".to_string(),
            l3_root: "Other".to_string(),
            tags: vec!["test".to_string()],
        }],
        quick_reads: Vec::new(),
        excluded: Vec::new(),
        trends: Vec::new(),
        totals: DigestTotals {
            fetched: 0,
            analyzed: 0,
            filtered: 1,
        },
    }
}
