//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::context::AppContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Payment events published but not yet committed by the consumer.
    pub payment_event_lag: u64,
}

/// GET /health — liveness plus the payment event backlog.
pub async fn check(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        payment_event_lag: ctx.broker.lag().await,
    })
}
