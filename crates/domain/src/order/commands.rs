//! Order commands.

use std::collections::HashSet;

use common::{PaymentMethodId, ShopId, SkuId, VoucherId};
use serde::{Deserialize, Serialize};

use crate::error::CommandError;

use super::value_objects::ShippingAddress;

/// One cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub sku_id: SkuId,
    pub quantity: u32,
}

impl CartItem {
    pub fn new(sku_id: impl Into<SkuId>, quantity: u32) -> Self {
        Self {
            sku_id: sku_id.into(),
            quantity,
        }
    }
}

/// A shop voucher chosen for one shop's portion of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopVoucherSelection {
    pub shop_id: ShopId,
    pub voucher_id: VoucherId,
}

/// Command to check out a cart that may span several shops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub items: Vec<CartItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method_id: PaymentMethodId,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub shop_vouchers: Vec<ShopVoucherSelection>,
    #[serde(default)]
    pub platform_order_voucher: Option<VoucherId>,
    #[serde(default)]
    pub platform_shipping_voucher: Option<VoucherId>,
}

impl CreateOrder {
    /// Creates a command with no vouchers and no note.
    pub fn new(
        items: Vec<CartItem>,
        shipping_address: ShippingAddress,
        payment_method_id: impl Into<PaymentMethodId>,
    ) -> Self {
        Self {
            items,
            shipping_address,
            payment_method_id: payment_method_id.into(),
            note: None,
            shop_vouchers: Vec::new(),
            platform_order_voucher: None,
            platform_shipping_voucher: None,
        }
    }

    pub fn with_shop_voucher(
        mut self,
        shop_id: impl Into<ShopId>,
        voucher_id: impl Into<VoucherId>,
    ) -> Self {
        self.shop_vouchers.push(ShopVoucherSelection {
            shop_id: shop_id.into(),
            voucher_id: voucher_id.into(),
        });
        self
    }

    pub fn with_platform_order_voucher(mut self, voucher_id: impl Into<VoucherId>) -> Self {
        self.platform_order_voucher = Some(voucher_id.into());
        self
    }

    pub fn with_platform_shipping_voucher(mut self, voucher_id: impl Into<VoucherId>) -> Self {
        self.platform_shipping_voucher = Some(voucher_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Checks the structural invariants that need no lookups.
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.items.is_empty() {
            return Err(CommandError::NoItems);
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            if item.quantity == 0 {
                return Err(CommandError::InvalidQuantity {
                    sku_id: item.sku_id.clone(),
                });
            }
            if !seen.insert(&item.sku_id) {
                return Err(CommandError::DuplicateSku {
                    sku_id: item.sku_id.clone(),
                });
            }
        }

        let address = &self.shipping_address;
        for (field, value) in [
            ("full_name", &address.full_name),
            ("phone", &address.phone),
            ("address", &address.address),
        ] {
            if value.trim().is_empty() {
                return Err(CommandError::MissingShippingField { field });
            }
        }

        let mut shops = HashSet::new();
        for selection in &self.shop_vouchers {
            if !shops.insert(&selection.shop_id) {
                return Err(CommandError::DuplicateShopVoucher {
                    shop_id: selection.shop_id.clone(),
                });
            }
        }

        Ok(())
    }

    /// The voucher selected for `shop_id`, if any.
    pub fn shop_voucher_for(&self, shop_id: &ShopId) -> Option<&VoucherId> {
        self.shop_vouchers
            .iter()
            .find(|s| &s.shop_id == shop_id)
            .map(|s| &s.voucher_id)
    }
}
