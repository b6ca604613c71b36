//! Checkout, order lookup, admin status and payment callback endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{OrderId, ShopOrderId, UserId};
use domain::{CreateOrder, Order, ShopOrderStatus};
use order_store::PaymentOutcome;
use saga::{OrderCreated, StatusUpdate};
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::ApiError;

/// Header carrying the authenticated customer's id.
pub const USER_ID_HEADER: &str = "x-user-id";

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub shop_order_id: ShopOrderId,
    pub status: ShopOrderStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct PaymentCallbackResponse {
    pub order_id: OrderId,
    pub shop_orders_updated: usize,
    pub already_applied: bool,
    /// Stock tasks of the order whose inventory call failed and will be retried.
    pub pending_stock_tasks: usize,
}

// -- Handlers --

/// POST /orders — check out a cart.
#[tracing::instrument(skip(ctx, headers, payload))]
pub async fn create(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    payload: Result<Json<CreateOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderCreated>), ApiError> {
    let user_id = user_id(&headers)?;
    let Json(command) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let created = ctx.orchestrator.create_order(user_id, command).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /orders/{id} — the full order tree.
#[tracing::instrument(skip(ctx))]
pub async fn get(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = ctx.store.get_order(order_id).await?;
    Ok(Json(order))
}

/// PUT /orders/admin/update_status — move one shop order to a new status.
#[tracing::instrument(skip(ctx, payload))]
pub async fn update_status(
    State(ctx): State<AppContext>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<StatusUpdate>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let update = ctx
        .shop_orders
        .update_status(req.shop_order_id, req.status, req.reason)
        .await?;
    Ok(Json(update))
}

/// PUT /orders/callback_payment_online/{order_id} — gateway redirect landing.
///
/// Applies the same reconciliation as a `payment.completed` event, so it is
/// harmless when the event arrives first or later.
#[tracing::instrument(skip(ctx))]
pub async fn payment_callback(
    State(ctx): State<AppContext>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentCallbackResponse>, ApiError> {
    let order_id = parse_order_id(&order_id)?;

    let settled = ctx
        .shop_orders
        .reconcile_payment(order_id, PaymentOutcome::Succeeded)
        .await?;

    Ok(Json(PaymentCallbackResponse {
        order_id,
        shop_orders_updated: settled.transitioned.len(),
        already_applied: settled.was_noop(),
        pending_stock_tasks: settled.stock.failed.len(),
    }))
}

// -- Helpers --

fn user_id(headers: &HeaderMap) -> Result<UserId, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::new)
        .ok_or_else(|| ApiError::BadRequest("missing X-User-Id header".to_string()))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
