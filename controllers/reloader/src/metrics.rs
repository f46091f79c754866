//! Prometheus metrics and the health/metrics HTTP endpoint.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Controller metrics, registered in a registry owned by this instance.
pub struct Metrics {
    registry: Registry,
    /// Watch loop restarts, by resource type
    pub watch_restarts: IntCounterVec,
    /// Watch events delivered, by resource type and event type
    pub watch_events: IntCounterVec,
    /// Workload patches, by result
    pub patches: IntCounterVec,
    /// Hash store writes, by result
    pub hash_store_writes: IntCounterVec,
    /// Targets with a scheduled but not yet issued update
    pub pending_updates: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("reloader".to_string()), None)?;

        let watch_restarts = IntCounterVec::new(
            Opts::new("watch_restarts_total", "Number of watch loop (re)starts"),
            &["resource_type"],
        )?;
        let watch_events = IntCounterVec::new(
            Opts::new("watch_events_total", "Number of watch events delivered"),
            &["resource_type", "event"],
        )?;
        let patches = IntCounterVec::new(
            Opts::new("patches_total", "Number of workload patches issued"),
            &["result"],
        )?;
        let hash_store_writes = IntCounterVec::new(
            Opts::new("hash_store_writes_total", "Number of hash store writes"),
            &["result"],
        )?;
        let pending_updates = IntGauge::new("pending_updates", "Number of pending workload updates")?;

        registry.register(Box::new(watch_restarts.clone()))?;
        registry.register(Box::new(watch_events.clone()))?;
        registry.register(Box::new(patches.clone()))?;
        registry.register(Box::new(hash_store_writes.clone()))?;
        registry.register(Box::new(pending_updates.clone()))?;

        Ok(Self {
            registry,
            watch_restarts,
            watch_events,
            patches,
            hash_store_writes,
            pending_updates,
        })
    }

    /// Text exposition of all metrics
    pub fn render(&self) -> Result<String, ControllerError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}

/// Serve `/metrics` and `/healthz` until the listener fails.
pub async fn serve(port: u16, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
