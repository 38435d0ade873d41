//! HTTP query API.
//!
//! A thin translation layer: path and query parameters become [`Stats`]
//! calls, mode switches and health checks go through the [`SystemControl`]
//! seam so the handlers never hold the supervisor concretely. CORS headers
//! and a request log line are applied to every response.

mod handlers;
mod middleware;

use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;

use crate::app::HealthReport;
use crate::core::service::Stats;
use crate::error::Result;

/// Control operations the API exposes on the running system.
#[async_trait]
pub trait SystemControl: Send + Sync {
    /// Replaces live producers with synthetic ones.
    fn switch_to_test(&self) -> Result<()>;
    /// Replaces synthetic producers with live ones.
    fn switch_to_live(&self) -> Result<()>;
    /// Pings both backends with a short deadline.
    async fn health(&self) -> HealthReport;
}

#[derive(Clone)]
pub struct ApiState {
    pub stats: Arc<Stats>,
    pub control: Arc<dyn SystemControl>,
}

pub fn router(stats: Arc<Stats>, control: Arc<dyn SystemControl>) -> Router {
    Router::new()
        .route("/prices/latest/:symbol", get(handlers::latest_by_symbol))
        .route(
            "/prices/latest/:exchange/:symbol",
            get(handlers::latest_by_exchange),
        )
        .route("/prices/highest/:symbol", get(handlers::highest_by_symbol))
        .route(
            "/prices/highest/:exchange/:symbol",
            get(handlers::highest_by_exchange),
        )
        .route("/prices/lowest/:symbol", get(handlers::lowest_by_symbol))
        .route(
            "/prices/lowest/:exchange/:symbol",
            get(handlers::lowest_by_exchange),
        )
        .route("/prices/average/:symbol", get(handlers::average_by_symbol))
        .route(
            "/prices/average/:exchange/:symbol",
            get(handlers::average_by_exchange),
        )
        .route("/health", get(handlers::health))
        .route("/mode/test", post(handlers::switch_to_test))
        .route("/mode/live", post(handlers::switch_to_live))
        .layer(axum::middleware::from_fn(middleware::cors))
        .layer(axum::middleware::from_fn(middleware::request_log))
        .with_state(ApiState { stats, control })
}
