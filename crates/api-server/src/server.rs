//! API server: REST routes plus the Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use revisit_core::config::AppConfig;
use revisit_loyalty::{ConfirmationHandler, RedemptionCoordinator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the router over prepared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Reward endpoints
        .route("/v1/rewards/redeem", post(rest::handle_redeem))
        .route("/v1/rewards/preview/:venue_id", get(rest::handle_preview))
        .route("/v1/visits/:visit_id/confirm", post(rest::handle_confirm))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::liveness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    coordinator: Arc<RedemptionCoordinator>,
    confirmations: Arc<ConfirmationHandler>,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        coordinator: Arc<RedemptionCoordinator>,
        confirmations: Arc<ConfirmationHandler>,
    ) -> Self {
        Self {
            config,
            coordinator,
            confirmations,
        }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(AppState {
            coordinator: self.coordinator.clone(),
            confirmations: self.confirmations.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        });

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the Prometheus exporter on the metrics port. Must be called
    /// from within the tokio runtime, which hosts the exporter's listener.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.metrics.port);
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        info!(addr = %addr, "Metrics exporter started");
        Ok(())
    }
}
