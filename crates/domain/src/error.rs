//! Domain error types.

use common::{ShopId, SkuId};
use thiserror::Error;

/// Structural problems with a `CreateOrder` request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The cart is empty.
    #[error("Order must contain at least one item")]
    NoItems,

    /// An item was requested with a zero quantity.
    #[error("Invalid quantity for {sku_id}: must be greater than 0")]
    InvalidQuantity { sku_id: SkuId },

    /// The same SKU appears on more than one cart line.
    #[error("Duplicate cart line for {sku_id}")]
    DuplicateSku { sku_id: SkuId },

    /// A required shipping address field is blank.
    #[error("Shipping address field '{field}' is required")]
    MissingShippingField { field: &'static str },

    /// More than one voucher was selected for the same shop.
    #[error("Only one voucher may be applied per shop ({shop_id})")]
    DuplicateShopVoucher { shop_id: ShopId },
}

/// Errors produced while turning a voucher into a concrete discount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscountError {
    /// The voucher cannot be used against this amount or target.
    #[error("Voucher {code} is not applicable: {reason}")]
    NotApplicable { code: String, reason: String },

    /// A percentage voucher has no maximum discount. This is a data error.
    #[error("Percentage voucher {code} has no max discount amount")]
    MissingMaxDiscount { code: String },
}
