//! Persisted order tree records.

use chrono::{DateTime, Utc};
use common::{
    OrderId, OrderItemId, PaymentMethodId, ProductId, ShopId, ShopOrderId, SkuId, StockTaskId,
    TransactionId, UserId, VoucherId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{InvalidTransition, ShopOrderStatus, Transition};
use super::value_objects::{
    ItemSnapshot, Money, PaymentMethodSnapshot, PaymentMethodType, ShippingAddress,
};

/// A voucher redeemed against an order or shop order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedVoucher {
    pub voucher_id: VoucherId,
    pub code: String,
    pub discount: Money,
}

/// Root record of one checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub code: String,
    pub user_id: UserId,
    pub subtotal: Money,
    pub total_shipping_fee: Money,
    /// Shop-funded and platform-funded discounts combined.
    pub total_discount: Money,
    pub grand_total: Money,
    pub platform_order_voucher: Option<AppliedVoucher>,
    pub platform_shipping_voucher: Option<AppliedVoucher>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethodSnapshot,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub shop_orders: Vec<ShopOrder>,
}

impl Order {
    /// Iterates every item across all shop orders.
    pub fn items(&self) -> impl Iterator<Item = &OrderItem> {
        self.shop_orders.iter().flat_map(|s| s.items.iter())
    }

    /// Stock lines for every item in the order.
    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.items().map(OrderItem::stock_line).collect()
    }
}

/// The slice of an order that belongs to a single shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopOrder {
    pub id: ShopOrderId,
    pub order_id: OrderId,
    pub code: String,
    pub shop_id: ShopId,
    pub status: ShopOrderStatus,
    pub subtotal: Money,
    pub shipping_fee: Money,
    /// Shop-funded discount only; platform shares live in the settlement.
    pub total_discount: Money,
    /// `subtotal + shipping_fee - total_discount`.
    pub total_amount: Money,
    pub shop_voucher: Option<AppliedVoucher>,
    pub shipping_method: Option<String>,
    pub tracking_code: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub processing_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl ShopOrder {
    /// Validates and applies a status change, stamping the matching timestamp.
    ///
    /// The record is left untouched when the transition is illegal.
    pub fn apply_transition(
        &mut self,
        to: ShopOrderStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Transition, InvalidTransition> {
        let transition = self.status.transition(to)?;

        match to {
            ShopOrderStatus::Processing => {
                if transition.from == ShopOrderStatus::AwaitingPayment {
                    self.paid_at = Some(at);
                }
                self.processing_at = Some(at);
            }
            ShopOrderStatus::Shipped => self.shipped_at = Some(at),
            ShopOrderStatus::Completed => self.completed_at = Some(at),
            ShopOrderStatus::Cancelled => {
                self.cancelled_at = Some(at);
                self.cancellation_reason = reason.map(str::to_string);
            }
            ShopOrderStatus::Pending
            | ShopOrderStatus::AwaitingPayment
            | ShopOrderStatus::Refunded => {}
        }

        self.status = to;
        self.updated_at = at;
        Ok(transition)
    }

    /// Stock lines for every item in this shop order.
    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.items.iter().map(OrderItem::stock_line).collect()
    }
}

/// A purchased line under a shop order. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub shop_order_id: ShopOrderId,
    pub product_id: ProductId,
    pub sku_id: SkuId,
    pub quantity: u32,
    pub original_unit_price: Money,
    pub final_unit_price: Money,
    pub total_price: Money,
    pub snapshot: ItemSnapshot,
    pub promotion_snapshot: Option<serde_json::Value>,
    pub reviewed: bool,
}

impl OrderItem {
    pub fn stock_line(&self) -> StockLine {
        StockLine {
            sku_id: self.sku_id.clone(),
            quantity: self.quantity,
        }
    }
}

/// Outcome of the order's payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Financial breakdown owed to one shop for one shop order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementBreakdown {
    pub shop_order_id: ShopOrderId,
    pub shop_id: ShopId,
    pub order_subtotal: Money,
    pub shop_voucher_discount: Money,
    pub shipping_fee: Money,
    pub site_order_discount: Money,
    pub site_shipping_discount: Money,
    pub commission_fee: Money,
    pub net_settled_amount: Money,
}

/// The single payment transaction of an order, with its settlement rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: TransactionId,
    pub order_id: OrderId,
    pub amount: Money,
    pub method_id: PaymentMethodId,
    pub method_type: PaymentMethodType,
    pub status: PaymentStatus,
    pub settlements: Vec<SettlementBreakdown>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a stock side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockAction {
    /// Converts held quantity into a permanent deduction.
    Commit,
    /// Releases held quantity without deducting.
    Rollback,
}

impl StockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockAction::Commit => "COMMIT",
            StockAction::Rollback => "ROLLBACK",
        }
    }
}

impl std::fmt::Display for StockAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StockAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMMIT" => Ok(StockAction::Commit),
            "ROLLBACK" => Ok(StockAction::Rollback),
            other => Err(format!("unknown stock action: {other}")),
        }
    }
}

/// Quantity of one SKU involved in a stock operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockLine {
    pub sku_id: SkuId,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(sku_id: impl Into<SkuId>, quantity: u32) -> Self {
        Self {
            sku_id: sku_id.into(),
            quantity,
        }
    }
}

/// A stock commit or rollback recorded in the same database transaction as
/// the status change that requires it, and completed once the inventory
/// service has acknowledged it.
///
/// Inventory is tracked per SKU, not per reservation, so a task must never
/// be issued by two workers at once. A worker claims the task until
/// `claimed_until` before calling the inventory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTask {
    pub id: StockTaskId,
    pub order_id: OrderId,
    pub shop_order_id: ShopOrderId,
    pub action: StockAction,
    pub lines: Vec<StockLine>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// End of the current worker's lease; `None` when nobody holds it.
    #[serde(default)]
    pub claimed_until: Option<DateTime<Utc>>,
}

impl StockTask {
    /// Creates the pending task for a transition of `shop_order`.
    pub fn for_shop_order(shop_order: &ShopOrder, action: StockAction, at: DateTime<Utc>) -> Self {
        Self {
            id: StockTaskId::new(),
            order_id: shop_order.order_id,
            shop_order_id: shop_order.id,
            action,
            lines: shop_order.stock_lines(),
            created_at: at,
            completed_at: None,
            claimed_until: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Pending and not under an unexpired claim.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.claimed_until.is_none_or(|until| until <= now)
    }
}

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

/// Human-readable order code: `ORD<yyyymmdd><8 hex>`.
pub fn order_code(at: DateTime<Utc>) -> String {
    format!("ORD{}{}", at.format("%Y%m%d"), short_hex())
}

/// Human-readable shop order code: `SHOP-<shop prefix>-<8 hex>`.
pub fn shop_order_code(shop_id: &ShopId) -> String {
    let prefix: String = shop_id.as_str().chars().take(8).collect();
    format!("SHOP-{}-{}", prefix.to_uppercase(), short_hex())
}
