//! earbug-server - Spotify listening history service
//!
//! Polls recently played tracks for every loaded actor, periodically
//! publishes snapshots, and serves reports over HTTP. On shutdown the
//! background loops are stopped and every loaded actor gets a final export.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use earbug_common::blob::FileBlobStore;
use earbug_common::config::{load_config, TomlConfig};
use earbug_common::schedule::PeriodicTask;
use earbug_common::spotify::SpotifyAuthorizer;
use earbug_common::Earbug;
use earbug_server::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for earbug-server
#[derive(Parser, Debug)]
#[command(name = "earbug-server")]
#[command(about = "Spotify listening history service")]
#[command(version)]
struct Args {
    /// Path to earbug.toml
    #[arg(short, long, env = "EARBUG_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long, env = "EARBUG_LISTEN")]
    listen: Option<String>,

    /// Directory holding snapshots (overrides the config file)
    #[arg(short, long, env = "EARBUG_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing so its log level can apply; load
    // warnings are emitted once the subscriber is up
    let config = load_config(args.config.as_deref());

    let level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| TomlConfig::default().logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting earbug-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config.context("Failed to load configuration")?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data dir {}", config.data_dir.display()))?;
    info!("Data directory: {}", config.data_dir.display());

    let blob = Arc::new(FileBlobStore::new(&config.data_dir));
    let authorizer = Arc::new(
        SpotifyAuthorizer::new(&config.auth_redirect_url).context("Failed to create Spotify client")?,
    );
    let service = Arc::new(Earbug::new(blob, authorizer, config.service_config()));

    // Load the default actor up front so the loops have something to work on
    if let Err(e) = service.actor(&config.default_actor).await {
        error!(actor = %config.default_actor, error = %e, "Failed to load default actor");
        return Err(e).context("Failed to load default actor");
    }

    let cancel = CancellationToken::new();
    let update_loop = {
        let service = Arc::clone(&service);
        PeriodicTask::new("update", config.update_interval()).spawn(cancel.clone(), move || {
            let service = Arc::clone(&service);
            async move {
                for actor in service.loaded_actors() {
                    if let Err(e) = service.update(&actor).await {
                        warn!(actor = %actor, error = %e, "Scheduled update failed");
                    }
                }
            }
        })
    };
    let export_loop = {
        let service = Arc::clone(&service);
        PeriodicTask::new("export", config.export_interval())
            .run_immediately(false)
            .spawn(cancel.clone(), move || {
                let service = Arc::clone(&service);
                async move {
                    service.export_all().await;
                }
            })
    };

    let app = build_router(AppState::new(Arc::clone(&service), config.default_actor.clone()));
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("earbug-server listening on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for (name, handle) in [("update", update_loop), ("export", export_loop)] {
        if let Err(e) = handle.await {
            error!(task = name, "Periodic task ended abnormally: {}", e);
        }
    }

    let timeout = config.shutdown_export_timeout();
    match tokio::time::timeout(timeout, service.export_all()).await {
        Ok(0) => info!("Final export complete"),
        Ok(failures) => warn!(failures, "Final export finished with failures"),
        Err(_) => warn!(timeout_secs = timeout.as_secs(), "Final export timed out"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
