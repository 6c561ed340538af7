//! `GET /health` endpoint handler.
//!
//! Returns a [`HealthResponse`] JSON payload with the relay version,
//! uptime, config source metadata, every registered servers transport
//! (flagged when it fell back to the default transport), and cumulative
//! request counters.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::AppState;
use crate::transport::registry::TransportStatus;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub config: ConfigHealth,
    pub transports: Vec<TransportHealth>,
    pub stats: StatsResponse,
}

#[derive(Serialize, Deserialize)]
pub struct ConfigHealth {
    pub source: String,
    pub version: String,
    pub loaded_ago_seconds: u64,
    pub upstream_transport: String,
}

#[derive(Serialize, Deserialize)]
pub struct TransportHealth {
    pub name: String,
    pub degraded: bool,
}

impl From<TransportStatus> for TransportHealth {
    fn from(status: TransportStatus) -> Self {
        Self {
            name: status.name,
            degraded: status.degraded,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct StatsResponse {
    pub requests_forwarded: u64,
    pub requests_failed: u64,
    pub requests_client_closed: u64,
    pub config_reloads: u64,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let config = {
        let loaded = state.config.read().await;
        ConfigHealth {
            source: loaded.source_name.clone(),
            version: loaded.version.short().to_string(),
            loaded_ago_seconds: loaded.loaded_at.elapsed().as_secs(),
            upstream_transport: state.upstream_transport.clone(),
        }
    };

    let transports: Vec<TransportHealth> = state
        .registry
        .statuses()
        .await
        .into_iter()
        .map(TransportHealth::from)
        .collect();
    let degraded = transports
        .iter()
        .any(|t| t.degraded && t.name == state.upstream_transport);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        config,
        transports,
        stats: StatsResponse {
            requests_forwarded: state.stats.forwarded.load(Ordering::Relaxed),
            requests_failed: state.stats.failed.load(Ordering::Relaxed),
            requests_client_closed: state.stats.client_closed.load(Ordering::Relaxed),
            config_reloads: state.stats.config_reloads.load(Ordering::Relaxed),
        },
    })
}
