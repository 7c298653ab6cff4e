use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use feedtube::api::{self, AppState};
use feedtube::config::{Settings, SettingsOverrides, resolve_settings};
use feedtube::extraction::{ExtractionGateway, YtDlp};
use feedtube::feed::FeedStore;
use feedtube::proxy::MediaProxy;
use feedtube::reconcile::{ReconcileSettings, Reconciler};
use feedtube::scheduler;
use feedtube::store::Store;

const DEFAULT_OWNER: &str = "admin";

#[derive(Debug, Parser)]
#[command(name = "feedtube", version, about = "Podcast feeds for video channels")]
struct Cli {
    /// Path of the .env file to read settings from.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    /// Directory holding the database and feed files.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server and the background refresh loops.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Track a new channel and build its feed.
    Add {
        url: String,
        #[arg(long, default_value = DEFAULT_OWNER)]
        owner: String,
    },
    /// Re-list one source and refresh its stale videos.
    Fetch { source_id: String },
    /// Refresh every source (or only stale videos).
    Refresh {
        #[arg(long)]
        videos_only: bool,
    },
    /// Re-render a feed from stored records.
    BuildFeed { source_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedtube=info")),
        )
        .init();

    let cli = Cli::parse();
    let (host, port) = match &cli.command {
        Command::Serve { host, port } => (host.clone(), *port),
        _ => (None, None),
    };
    let settings = resolve_settings(SettingsOverrides {
        data_dir: cli.data_dir.clone(),
        host,
        port,
        env_path: cli.env_file.clone(),
    })
    .context("loading settings")?;
    let reconciler = build_reconciler(&settings).await?;

    match cli.command {
        Command::Serve { .. } => serve(&settings, reconciler).await,
        Command::Add { url, owner } => {
            let owner = reconciler
                .store()
                .ensure_user(&owner)
                .await
                .context("preparing owner")?;
            let created = reconciler
                .create_source(&url, &owner.id)
                .await
                .with_context(|| format!("adding {url}"))?;
            println!("{}", serde_json::to_string_pretty(&created)?);
            Ok(())
        }
        Command::Fetch { source_id } => {
            let fetched = reconciler
                .fetch_source(&source_id)
                .await
                .with_context(|| format!("fetching source {source_id}"))?;
            println!("{}", serde_json::to_string_pretty(&fetched)?);
            Ok(())
        }
        Command::Refresh { videos_only } => {
            if videos_only {
                let refreshed = scheduler::refresh_all_videos(&reconciler)
                    .await
                    .context("refreshing videos")?;
                info!(refreshed = refreshed.len(), "video refresh finished");
            } else {
                let report = reconciler
                    .fetch_all_sources()
                    .await
                    .context("refreshing sources")?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(())
        }
        Command::BuildFeed { source_id } => {
            reconciler
                .rebuild_feed(&source_id)
                .await
                .with_context(|| format!("building feed for {source_id}"))?;
            println!("{}", reconciler.feeds().path_for(&source_id).display());
            Ok(())
        }
    }
}

async fn build_reconciler(settings: &Settings) -> Result<Reconciler> {
    let store = Store::open(&settings.database_path())
        .await
        .with_context(|| format!("opening {}", settings.database_path().display()))?;
    let extractor = YtDlp::new(&settings.ytdlp_path, settings.ytdlp_plugin_dir.clone());
    let gateway = ExtractionGateway::new(Arc::new(extractor), settings.extraction_timeout());
    Ok(Reconciler::new(
        store,
        gateway,
        FeedStore::new(settings.feeds_dir()),
        ReconcileSettings::from(settings),
    ))
}

async fn serve(settings: &Settings, reconciler: Reconciler) -> Result<()> {
    let owner = reconciler
        .store()
        .ensure_user(DEFAULT_OWNER)
        .await
        .context("preparing default owner")?;
    let loops = scheduler::spawn_background_loops(
        &reconciler,
        settings.refresh_sources_interval(),
        settings.refresh_videos_interval(),
    );
    let state = AppState {
        reconciler,
        proxy: MediaProxy::new().context("building media client")?,
        owner_id: owner.id,
    };

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(%addr, base_url = %settings.base_url, "feedtube listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;
    loops.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}
