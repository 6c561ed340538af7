//! `mtls-relay run`: start the relay.
//!
//! Loads the config file, builds every servers transport, starts the Axum
//! HTTP server with graceful shutdown, and spawns a background refresh
//! loop that pushes changed transport definitions into the registry.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::RunArgs;
use crate::config::model::Upstream;
use crate::config::sources::FileSource;
use crate::config::ConfigSource;
use crate::error::RelayError;
use crate::logging;
use crate::server::{self, AppState, LoadedConfig};
use crate::transport::{TransportFactory, TransportRegistry};

const CANDIDATES: [&str; 4] = [
    "mtls-relay.yaml",
    "mtls-relay.yml",
    "mtls-relay.json",
    "mtls-relay.toml",
];

pub async fn execute(args: RunArgs) -> Result<(), RelayError> {
    logging::init(&args.log_level, logging::resolve_format(args.pretty, args.json));

    let source: Box<dyn ConfigSource> = match resolve_file_source(args.config.as_deref()).await? {
        Some(source) => Box::new(source),
        None => {
            return Err(RelayError::NoConfigSource {
                hint: "Provide --config <file> or create ./mtls-relay.yaml.\n  \
                       Run 'mtls-relay validate <file>' to check it first."
                    .into(),
            })
        }
    };
    let (config, version) = source.load().await?;

    let registry = Arc::new(TransportRegistry::new(TransportFactory::new()));
    registry.update(&config.servers_transports).await;

    let state = Arc::new(AppState::new(
        &config,
        Arc::clone(&registry),
        LoadedConfig {
            version,
            source_name: source.name().to_string(),
            loaded_at: Instant::now(),
        },
    )?);

    // Shutdown signal: dropping shutdown_tx closes the channel and stops the refresh loop
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let refresh_state = Arc::clone(&state);
    let upstream = config.upstream.clone();
    let poll_interval = Duration::from_secs(args.poll_interval);
    let refresh_handle = tokio::spawn(async move {
        config_refresh_loop(refresh_state, source, upstream, poll_interval, shutdown_rx).await;
    });

    let router = server::build_router(state, args.max_body);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        upstream = %config.upstream.url,
        servers_transport = %config.upstream.servers_transport,
        transports = config.servers_transports.len(),
        "mtls-relay started"
    );

    let graceful_shutdown = async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    };

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful_shutdown)
    .await?;

    // Wait for the config refresh task to finish (catches panics)
    if let Err(e) = refresh_handle.await {
        tracing::error!(error = %e, "config refresh task failed");
    }

    tracing::info!("mtls-relay stopped");
    Ok(())
}

async fn resolve_file_source(explicit: Option<&Path>) -> Result<Option<FileSource>, RelayError> {
    if let Some(path) = explicit {
        return FileSource::open(path).map(Some);
    }

    for name in &CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return FileSource::open(&path).map(Some);
        }
    }

    Ok(None)
}

/// Poll `source` and apply changed transport definitions. The upstream is
/// fixed for the life of the process; edits to it are reported, not applied.
pub async fn config_refresh_loop(
    state: Arc<AppState>,
    source: Box<dyn ConfigSource>,
    upstream: Upstream,
    every: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::debug!("config refresh loop shutting down");
                return;
            }
        }

        let current_version = state.config.read().await.version.clone();

        match source.has_changed(&current_version).await {
            Ok(true) => {
                tracing::info!("config change detected, reloading");
                match source.load().await {
                    Ok((config, version)) => {
                        if config.upstream != upstream {
                            tracing::warn!(
                                upstream = %config.upstream.url,
                                "upstream changes take effect after restart"
                            );
                        }
                        let summary = state.registry.update(&config.servers_transports).await;

                        let mut loaded = state.config.write().await;
                        loaded.version = version;
                        loaded.loaded_at = Instant::now();
                        drop(loaded);
                        state.stats.config_reloads.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(
                            rebuilt = summary.added + summary.rebuilt,
                            degraded = summary.degraded,
                            "config reloaded"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "config reload failed, keeping current config");
                    }
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "config change check failed");
            }
        }
    }
}
