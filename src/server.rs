//! Axum server setup, shared application state, and graceful shutdown.
//!
//! Contains [`AppState`] (the `Arc`-shared state holding the transport
//! registry, the reverse proxy for the configured upstream, stats, and
//! uptime), [`build_router`] for constructing the Axum router with
//! middleware layers, and [`shutdown_signal`] for SIGTERM / Ctrl+C
//! handling.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::model::Config;
use crate::config::ConfigVersion;
use crate::error::RelayError;
use crate::health::health_handler;
use crate::proxy::{self, stream::FlushInterval, ReverseProxy};
use crate::transport::TransportRegistry;

/// Metadata of the config currently applied to the registry.
#[derive(Debug)]
pub struct LoadedConfig {
    pub version: ConfigVersion,
    pub source_name: String,
    pub loaded_at: Instant,
}

#[derive(Debug)]
pub struct Stats {
    pub forwarded: AtomicU64,
    pub failed: AtomicU64,
    pub client_closed: AtomicU64,
    pub config_reloads: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            forwarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            client_closed: AtomicU64::new(0),
            config_reloads: AtomicU64::new(0),
        }
    }
}

pub struct AppState {
    pub registry: Arc<TransportRegistry>,
    pub proxy: ReverseProxy,
    /// Servers transport name the upstream is reached through.
    pub upstream_transport: String,
    pub config: RwLock<LoadedConfig>,
    pub start_time: Instant,
    pub stats: Arc<Stats>,
}

impl AppState {
    /// State for `config`'s upstream. The registry is populated separately
    /// so reloads can reuse it.
    pub fn new(
        config: &Config,
        registry: Arc<TransportRegistry>,
        loaded: LoadedConfig,
    ) -> Result<Self, RelayError> {
        let stats = Arc::new(Stats::new());
        let target = Url::parse(&config.upstream.url)?;
        let proxy = ReverseProxy::new(
            &target,
            FlushInterval::from_millis(config.upstream.flush_interval),
            Arc::clone(&stats),
        )?;
        Ok(Self {
            registry,
            proxy,
            upstream_transport: config.upstream.servers_transport.clone(),
            config: RwLock::new(loaded),
            start_time: Instant::now(),
            stats,
        })
    }
}

pub fn build_router(state: Arc<AppState>, max_body: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(proxy::forward_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
