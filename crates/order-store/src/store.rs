use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ShopOrderId, StockTaskId};
use domain::{Order, PaymentTransaction, ShopOrder, ShopOrderStatus, StockTask};

use crate::Result;

/// Cancellation reason recorded when the gateway reports failure or the
/// payment window lapses.
pub const PAYMENT_FAILED_REASON: &str = "payment failed or expired";

/// How long a worker may hold a stock task before another worker may take
/// it over. Must comfortably exceed one inventory call.
pub fn default_stock_task_lease() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

/// Final outcome of an order's payment as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed { reason: String },
}

impl PaymentOutcome {
    pub fn failed() -> Self {
        PaymentOutcome::Failed {
            reason: PAYMENT_FAILED_REASON.to_string(),
        }
    }

    /// Status awaiting-payment shop orders move to.
    pub fn target_status(&self) -> ShopOrderStatus {
        match self {
            PaymentOutcome::Succeeded => ShopOrderStatus::Processing,
            PaymentOutcome::Failed { .. } => ShopOrderStatus::Cancelled,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            PaymentOutcome::Succeeded => None,
            PaymentOutcome::Failed { reason } => Some(reason),
        }
    }
}

/// Result of a single shop order status change.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub shop_order: ShopOrder,
    /// Stock work recorded alongside the status change, if the transition
    /// has one. It is created already claimed by the caller.
    pub stock_task: Option<StockTask>,
}

/// Result of reconciling an order against its payment outcome.
#[derive(Debug, Clone, Default)]
pub struct PaymentReconciliation {
    /// Shop orders moved out of `AWAITING_PAYMENT`. Empty when the outcome
    /// had already been applied.
    pub transitioned: Vec<ShopOrder>,
    /// Stock tasks created by this reconciliation, claimed by the caller.
    pub stock_tasks: Vec<StockTask>,
}

impl PaymentReconciliation {
    pub fn is_noop(&self) -> bool {
        self.transitioned.is_empty()
    }
}

/// A unit of work for persisting a new order tree.
///
/// Nothing written through the transaction is visible until `commit`.
/// Dropping it without committing discards the writes.
#[async_trait]
pub trait OrderTransaction: Send {
    /// Stages the order with its shop orders and items.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Stages the payment transaction with its settlement rows.
    async fn insert_payment(&mut self, payment: &PaymentTransaction) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Persistence contract for the order tree.
///
/// Status changes are check-then-act operations that run inside a single
/// database transaction together with any stock task they require, so
/// concurrent admin actions and payment events cannot interleave on the same
/// shop order.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Opens a unit of work for inserting a new order.
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>>;

    /// Loads an order with its shop orders and items.
    async fn get_order(&self, order_id: OrderId) -> Result<Order>;

    async fn get_shop_order(&self, shop_order_id: ShopOrderId) -> Result<ShopOrder>;

    /// Lists an order's shop orders, optionally filtered by status.
    async fn list_shop_orders(
        &self,
        order_id: OrderId,
        status: Option<ShopOrderStatus>,
    ) -> Result<Vec<ShopOrder>>;

    /// Loads the payment transaction of an order.
    async fn get_payment(&self, order_id: OrderId) -> Result<PaymentTransaction>;

    /// Moves one shop order to `to`, recording a stock task when the
    /// transition requires one.
    ///
    /// Fails with `InvalidTransition` and writes nothing if the current
    /// status does not allow it.
    async fn transition_shop_order(
        &self,
        shop_order_id: ShopOrderId,
        to: ShopOrderStatus,
        reason: Option<String>,
    ) -> Result<TransitionOutcome>;

    /// Applies a payment outcome to every shop order of the order still in
    /// `AWAITING_PAYMENT`, and settles the pending payment transaction.
    ///
    /// Re-applying an outcome is a no-op.
    async fn apply_payment_outcome(
        &self,
        order_id: OrderId,
        outcome: PaymentOutcome,
    ) -> Result<PaymentReconciliation>;

    /// Stock tasks not yet acknowledged by the inventory service, oldest
    /// first, optionally restricted to one order. Claimed tasks are included.
    async fn pending_stock_tasks(&self, order_id: Option<OrderId>) -> Result<Vec<StockTask>>;

    /// Atomically claims every pending task that is unclaimed or whose lease
    /// has run out, oldest first, optionally restricted to one order.
    ///
    /// A task returned here is not returned to any other caller until its
    /// lease expires or it is released.
    async fn claim_stock_tasks(&self, order_id: Option<OrderId>) -> Result<Vec<StockTask>>;

    /// Drops the claim on a pending task so the next claim picks it up
    /// without waiting for the lease.
    async fn release_stock_task(&self, task_id: StockTaskId) -> Result<()>;

    /// Marks a stock task done. Completing an already completed task is a no-op.
    async fn complete_stock_task(&self, task_id: StockTaskId) -> Result<()>;

    /// Pending online payments created before `cutoff`.
    async fn expired_payments(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentTransaction>>;
}
