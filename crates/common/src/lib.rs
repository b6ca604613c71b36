//! Shared identifier types used across the order saga crates.

pub mod types;

pub use types::{
    OrderId, OrderItemId, PaymentMethodId, ProductId, ShopId, ShopOrderId, SkuId, StockTaskId,
    TransactionId, UserId, VoucherId,
};
