//! Voucher definitions and discount allocation.

mod allocator;

pub use allocator::{
    PlatformShare, allocate_platform_discounts, compute_discount, distribute_pro_rata,
    settlement_for,
};

use chrono::{DateTime, Utc};
use common::{ShopId, VoucherId};
use serde::{Deserialize, Serialize};

use crate::order::Money;

/// Who funds a voucher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "owner_type", content = "owner_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherOwner {
    Platform,
    Shop(ShopId),
}

/// How a voucher's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "discount_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Discount {
    /// `rate_bps` hundredths of a percent, capped at `max_discount`.
    ///
    /// The cap is mandatory for well-formed data; `None` is rejected at
    /// computation time rather than treated as unlimited.
    Percentage {
        rate_bps: u32,
        max_discount: Option<Money>,
    },
    FixedAmount { amount: Money },
}

/// The amount a voucher discounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppliesTo {
    OrderTotal,
    ShippingFee,
}

/// Who may redeem a voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Audience {
    /// Any user.
    Public,
    /// Only users holding an available wallet entry for it.
    Assigned,
}

/// A promotional code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: VoucherId,
    pub code: String,
    pub owner: VoucherOwner,
    pub discount: Discount,
    pub min_purchase: Money,
    pub applies_to: AppliesTo,
    pub audience: Audience,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub total_quantity: u32,
    pub used_quantity: u32,
    pub max_usage_per_user: u32,
    pub active: bool,
}

impl Voucher {
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    pub fn remaining(&self) -> u32 {
        self.total_quantity.saturating_sub(self.used_quantity)
    }

    /// Whether the voucher can currently be redeemed by someone.
    ///
    /// Derived from persisted fields on every read; nothing is written back.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.is_within_window(now) && self.remaining() > 0
    }

    pub fn is_owned_by_shop(&self, shop_id: &ShopId) -> bool {
        matches!(&self.owner, VoucherOwner::Shop(owner) if owner == shop_id)
    }

    pub fn is_platform(&self) -> bool {
        matches!(self.owner, VoucherOwner::Platform)
    }
}
