//! HTTP API for the multi-vendor order saga.
//!
//! Exposes checkout, order lookup, admin status changes and the payment
//! gateway callback, with structured logging (tracing) and Prometheus
//! metrics. All handlers share one [`AppContext`].

pub mod config;
pub mod context;
pub mod demo;
pub mod error;
pub mod routes;
pub mod workers;

pub use config::{Config, LogFormat};
pub use context::AppContext;
pub use demo::DemoServices;
pub use error::ApiError;
pub use workers::BackgroundWorkers;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(ctx: AppContext, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/admin/update_status", put(routes::orders::update_status))
        .route(
            "/orders/callback_payment_online/{order_id}",
            put(routes::orders::payment_callback),
        )
        .with_state(ctx)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
