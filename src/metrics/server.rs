//! HTTP exporter for pipeline metrics.
//!
//! The camera manager lives on the capture thread and is never shared. The
//! capture loop pushes a [`MetricsSnapshot`] into [`MetricsState`]; the
//! server only ever reads what was last pushed.

use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 9464;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind metrics endpoint to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics endpoint failed: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_PORT)
    }
}

impl MetricsServerConfig {
    /// Listens on every interface at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// What the exporter serves: the registry plus the last snapshot pushed
/// by the capture loop.
pub struct MetricsState {
    registry: MetricsRegistry,
    last: Option<(DateTime<Utc>, MetricsSnapshot)>,
}

impl MetricsState {
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.last = Some((Utc::now(), *snapshot));
    }

    /// The last snapshot and when it was pushed.
    pub fn last_snapshot(&self) -> Option<(DateTime<Utc>, MetricsSnapshot)> {
        self.last
    }
}

type SharedState = Arc<RwLock<MetricsState>>;

/// Serves `/metrics` in the Prometheus text format and `/health`, which
/// reports unavailable until the capture loop has published a camera.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: SharedState,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MetricsState {
                registry,
                last: None,
            })),
        }
    }

    /// Handle the capture loop updates through.
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Serves until the runtime shuts down.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        tracing::info!(%addr, "Serving pipeline metrics");

        axum::serve(listener, router(self.state))
            .await
            .map_err(ServerError::Serve)
    }
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn metrics(State(state): State<SharedState>) -> Response {
    match state.read().await.registry.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health(State(state): State<SharedState>) -> (StatusCode, String) {
    match state.read().await.last_snapshot() {
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "no snapshot published yet".to_string(),
        ),
        Some((_, snapshot)) if snapshot.cameras == 0 => {
            (StatusCode::SERVICE_UNAVAILABLE, "no cameras".to_string())
        }
        Some((at, snapshot)) => (
            StatusCode::OK,
            format!(
                "{} cameras, {} requests in flight, updated {}",
                snapshot.cameras,
                snapshot.stats.requests_in_flight(),
                at.to_rfc3339()
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineStats;

    fn server() -> MetricsServer {
        MetricsServer::new(MetricsServerConfig::default(), MetricsRegistry::new().unwrap())
    }

    #[test]
    fn test_config_ports() {
        assert_eq!(MetricsServerConfig::default().bind_addr.port(), DEFAULT_PORT);
        assert_eq!(MetricsServerConfig::with_port(8080).bind_addr.port(), 8080);
    }

    #[tokio::test]
    async fn test_health_follows_published_cameras() {
        let server = server();
        let state = server.state();

        let (status, _) = health(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.write().await.update(&MetricsSnapshot::default());
        let (status, body) = health(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "no cameras");

        state.write().await.update(&MetricsSnapshot {
            cameras: 2,
            handlers: 1,
            stats: PipelineStats {
                requests_queued: 5,
                requests_completed: 2,
                ..Default::default()
            },
        });
        let (status, body) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("2 cameras, 3 requests in flight"));
    }

    #[tokio::test]
    async fn test_metrics_reflect_last_update() {
        let server = server();
        let state = server.state();
        state.write().await.update(&MetricsSnapshot {
            cameras: 3,
            ..Default::default()
        });

        let response = metrics(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let output = state.read().await.registry.encode().unwrap();
        assert!(output.contains("capture_pipeline_cameras 3"));
    }
}
