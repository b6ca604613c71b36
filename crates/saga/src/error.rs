//! Order saga error types.

use common::SkuId;
use domain::{CommandError, DiscountError, InvalidTransition};
use order_store::StoreError;
use thiserror::Error;

use crate::services::VoucherError;

/// Errors surfaced by order creation and shop order status changes.
#[derive(Debug, Error)]
pub enum OrderSagaError {
    /// The request is malformed or references something that cannot be ordered.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A cart line asks for more than the catalog reports as available.
    #[error("Insufficient stock for {sku_id}: available {available}, requested {requested}")]
    InsufficientStock {
        sku_id: SkuId,
        available: u32,
        requested: u32,
    },

    /// The inventory service refused to hold the cart.
    #[error("Stock conflict: {0}")]
    StockConflict(String),

    #[error("Voucher {code} is not applicable: {reason}")]
    VoucherNotApplicable { code: String, reason: String },

    #[error("Voucher {code} has no remaining uses")]
    VoucherExhausted { code: String },

    #[error("Voucher {code} exceeds its per-user limit")]
    VoucherPerUserLimitExceeded { code: String },

    /// Voucher data that cannot be priced, e.g. a percentage without a cap.
    #[error("Voucher misconfigured: {0}")]
    VoucherMisconfigured(String),

    #[error("Voucher ledger unavailable: {0}")]
    VoucherLedgerUnavailable(String),

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    #[error(transparent)]
    InvalidStateTransition(#[from] InvalidTransition),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Persistence error: {0}")]
    Persistence(StoreError),
}

impl OrderSagaError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            OrderSagaError::InvalidRequest(_) => "INVALID_REQUEST",
            OrderSagaError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            OrderSagaError::StockConflict(_) => "STOCK_CONFLICT",
            OrderSagaError::VoucherNotApplicable { .. } => "VOUCHER_NOT_APPLICABLE",
            OrderSagaError::VoucherExhausted { .. } => "VOUCHER_EXHAUSTED",
            OrderSagaError::VoucherPerUserLimitExceeded { .. } => "VOUCHER_PER_USER_LIMIT_EXCEEDED",
            OrderSagaError::VoucherMisconfigured(_) => "VOUCHER_MISCONFIGURED",
            OrderSagaError::VoucherLedgerUnavailable(_) => "VOUCHER_LEDGER_UNAVAILABLE",
            OrderSagaError::CatalogUnavailable(_) => "CATALOG_UNAVAILABLE",
            OrderSagaError::PaymentGateway(_) => "PAYMENT_GATEWAY_ERROR",
            OrderSagaError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            OrderSagaError::NotFound { .. } => "NOT_FOUND",
            OrderSagaError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

impl From<StoreError> for OrderSagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => OrderSagaError::NotFound { entity, id },
            StoreError::InvalidTransition(t) => OrderSagaError::InvalidStateTransition(t),
            other => OrderSagaError::Persistence(other),
        }
    }
}

impl From<CommandError> for OrderSagaError {
    fn from(err: CommandError) -> Self {
        OrderSagaError::InvalidRequest(err.to_string())
    }
}

impl From<DiscountError> for OrderSagaError {
    fn from(err: DiscountError) -> Self {
        match err {
            DiscountError::NotApplicable { code, reason } => {
                OrderSagaError::VoucherNotApplicable { code, reason }
            }
            DiscountError::MissingMaxDiscount { code } => OrderSagaError::VoucherMisconfigured(
                format!("percentage voucher {code} has no max discount amount"),
            ),
        }
    }
}

impl From<VoucherError> for OrderSagaError {
    fn from(err: VoucherError) -> Self {
        match err {
            VoucherError::NotFound(id) => OrderSagaError::VoucherNotApplicable {
                code: id.to_string(),
                reason: "voucher does not exist".to_string(),
            },
            VoucherError::NotApplicable { code, reason } => {
                OrderSagaError::VoucherNotApplicable { code, reason }
            }
            VoucherError::Exhausted { code } => OrderSagaError::VoucherExhausted { code },
            VoucherError::PerUserLimitExceeded { code, .. } => {
                OrderSagaError::VoucherPerUserLimitExceeded { code }
            }
            VoucherError::Unavailable(msg) => OrderSagaError::VoucherLedgerUnavailable(msg),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, OrderSagaError>;
