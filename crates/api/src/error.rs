//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use order_store::StoreError;
use saga::OrderSagaError;
use serde::Serialize;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request that never reached the saga.
    BadRequest(String),
    /// Saga, state machine or lookup failure.
    Saga(OrderSagaError),
    /// Internal server error.
    Internal(String),
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => saga_status(err),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "INVALID_REQUEST",
            ApiError::Saga(err) => err.code(),
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

fn saga_status(err: &OrderSagaError) -> StatusCode {
    match err {
        OrderSagaError::InvalidRequest(_) | OrderSagaError::VoucherNotApplicable { .. } => {
            StatusCode::BAD_REQUEST
        }
        OrderSagaError::InsufficientStock { .. }
        | OrderSagaError::StockConflict(_)
        | OrderSagaError::VoucherExhausted { .. }
        | OrderSagaError::VoucherPerUserLimitExceeded { .. }
        | OrderSagaError::InvalidStateTransition(_) => StatusCode::CONFLICT,
        OrderSagaError::NotFound { .. } => StatusCode::NOT_FOUND,
        OrderSagaError::CatalogUnavailable(_) | OrderSagaError::PaymentGateway(_) => {
            StatusCode::BAD_GATEWAY
        }
        OrderSagaError::VoucherLedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrderSagaError::VoucherMisconfigured(_) | OrderSagaError::Persistence(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Saga(err) => {
                if status.is_server_error() {
                    tracing::error!(code, error = %err, "request failed");
                } else {
                    tracing::debug!(code, error = %err, "request rejected");
                }
                err.to_string()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                msg
            }
        };

        let body = ErrorBody {
            code,
            status: status.as_u16(),
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<OrderSagaError> for ApiError {
    fn from(err: OrderSagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Saga(err.into())
    }
}
