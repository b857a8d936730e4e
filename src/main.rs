// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use plexrelay::scheduler::{CycleOutcome, RefreshSettings};
use plexrelay::{
    CatalogStore, Config, FeedError, FeedService, PersistenceAdapter, PpvClient, RefreshScheduler,
    ResolvedUrlCache,
};

fn cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Green.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
}

#[derive(Parser)]
#[command(name = "plexrelay")]
#[command(about = "Republishes live sports events as an M3U playlist and XMLTV guide")]
#[command(version)]
#[command(styles = cargo_style())]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging to file (plexrelay_debug.log)
    #[arg(long, global = true)]
    debug_log: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the catalog refreshed until interrupted
    Serve,

    /// Run a single refresh cycle and persist the result
    Refresh,

    /// Render the M3U playlist from the persisted catalog
    Playlist {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render the XMLTV guide from the persisted catalog
    Guide {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show catalog status
    Status {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Remove the persisted catalog and resolved URLs
    ClearCache,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Shared state, seeded from whatever was persisted by the last run.
struct Relay {
    config: Config,
    catalog: Arc<CatalogStore>,
    resolved: Arc<ResolvedUrlCache>,
    persistence: PersistenceAdapter,
}

impl Relay {
    async fn open(config: Config) -> Result<Self> {
        let persistence = PersistenceAdapter::new(config.data_dir()?);
        let catalog = Arc::new(CatalogStore::new());
        let resolved = Arc::new(ResolvedUrlCache::new(config.url_freshness()));

        let state = persistence.load().await;
        if let Some(snapshot) = state.snapshot {
            catalog.publish(snapshot);
        }
        resolved.restore(state.resolved);

        Ok(Self {
            config,
            catalog,
            resolved,
            persistence,
        })
    }

    fn feeds(&self) -> FeedService {
        FeedService::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.resolved),
            self.config.feed.generator_name.clone(),
        )
    }

    fn scheduler(&self) -> Result<Arc<RefreshScheduler>> {
        if self.config.auth_token().is_none() {
            error!(
                "CRITICAL: {} is not set and no auth_token is configured; upstream requests will fail",
                plexrelay::config::AUTH_TOKEN_ENV
            );
        }

        let client = Arc::new(PpvClient::new(&self.config.upstream)?);
        Ok(Arc::new(
            RefreshScheduler::new(
                client,
                Arc::clone(&self.catalog),
                Arc::clone(&self.resolved),
                RefreshSettings::from_config(&self.config),
            )
            .with_persistence(self.persistence.clone()),
        ))
    }
}

fn setup_logging(cli: &Cli) -> Result<()> {
    if cli.debug_log {
        let file = File::create("plexrelay_debug.log")?;
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_level(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(
                EnvFilter::from_default_env()
                    .add_directive("plexrelay=debug".parse()?)
                    .add_directive("hyper_util=error".parse()?),
            )
            .init();
    } else if cli.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(tracing::Level::DEBUG.into())
                    .add_directive("hyper_util=error".parse()?),
            )
            .init();
    } else {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new("info")
        };
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter.add_directive("hyper_util=error".parse()?))
            .init();
    }
    Ok(())
}

fn write_output(output: Option<&Path>, content: &[u8]) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(content)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn not_ready(e: FeedError) -> anyhow::Error {
    anyhow::anyhow!("{}: no catalog has been published yet, run `plexrelay refresh` first", e)
}

async fn serve(relay: Relay) -> Result<()> {
    let scheduler = relay.scheduler()?;
    let feeds = relay.feeds().with_scheduler(Arc::clone(&scheduler));
    let shutdown = CancellationToken::new();

    if relay.catalog.is_initialized() {
        info!("Loaded existing catalog, serving it until the first refresh completes");
    } else {
        info!("No cached catalog found, waiting for the initial refresh");
    }

    let exporter = relay.config.feed.output_dir.clone().map(|dir| {
        let feeds = feeds.clone();
        let shutdown = shutdown.clone();
        let mut generations = relay.catalog.subscribe();
        tokio::spawn(async move {
            if feeds.status().initialized
                && let Err(e) = feeds.export(&dir).await
            {
                warn!("Failed to export feeds: {:#}", e);
            }
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = generations.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if let Err(e) = feeds.export(&dir).await {
                            warn!("Failed to export feeds: {:#}", e);
                        }
                    }
                }
            }
        })
    });

    let handle = scheduler.spawn(shutdown.clone());

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Failed to listen for shutdown signal")?;
    info!("Shutting down...");
    shutdown.cancel();

    handle.await?;
    if let Some(exporter) = exporter {
        exporter.await?;
    }
    Ok(())
}

async fn refresh(relay: Relay) -> Result<()> {
    let scheduler = relay.scheduler()?;
    match scheduler.refresh_now().await? {
        CycleOutcome::Published(report) => {
            println!(
                "Published generation {} with {} events ({} resolved, {} from cache, {} guide only, {} dropped)",
                report.generation,
                report.events,
                report.resolved,
                report.reused,
                report.unresolved,
                report.dropped
            );
        }
        CycleOutcome::Coalesced => println!("A refresh is already running"),
    }
    Ok(())
}

fn status(relay: &Relay, format: OutputFormat) -> Result<()> {
    let status = relay.feeds().status();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            println!("Initialized:     {}", if status.initialized { "yes" } else { "no" });
            match status.last_refreshed_at {
                Some(at) => {
                    let age = chrono::Utc::now() - at;
                    println!(
                        "Last refresh:    {} ({} seconds ago)",
                        at.to_rfc3339(),
                        age.num_seconds()
                    );
                }
                None => println!("Last refresh:    never"),
            }
            println!("Generation:      {}", status.generation);
            println!("Events:          {}", status.event_count);
            println!("Resolved URLs:   {}", relay.resolved.len());
            println!(
                "Auth token:      {}",
                if relay.config.auth_token().is_some() {
                    "configured"
                } else {
                    "missing"
                }
            );
            println!("Data directory:  {}", relay.persistence.data_dir().display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli)?;

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Commands::InitConfig { force } = cli.command {
        if config_path.exists() && !force {
            anyhow::bail!(
                "Config file already exists: {} (use --force to overwrite)",
                config_path.display()
            );
        }
        Config::default().save(&config_path)?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let config = if cli.config.is_some() {
        Config::load(&config_path)?
    } else {
        Config::load_or_default(&config_path)
    };

    let relay = Relay::open(config).await?;

    match cli.command {
        Commands::Serve => serve(relay).await?,
        Commands::Refresh => refresh(relay).await?,
        Commands::Playlist { output } => {
            let playlist = relay.feeds().render_playlist().map_err(not_ready)?;
            write_output(output.as_deref(), &playlist)?;
        }
        Commands::Guide { output } => {
            let guide = relay.feeds().render_guide().map_err(not_ready)?;
            write_output(output.as_deref(), &guide)?;
        }
        Commands::Status { format } => status(&relay, format)?,
        Commands::ClearCache => {
            relay.persistence.clear().await?;
            println!("Cache cleared in {}", relay.persistence.data_dir().display());
        }
        Commands::InitConfig { .. } => unreachable!("handled before loading configuration"),
    }

    Ok(())
}
