//! Shop order status changes and the stock work they require.
//!
//! Status changes are committed by the order store together with a pending
//! stock task. The inventory call is only issued after that commit, and the
//! task is marked done once the inventory service acknowledged it. A task
//! whose call failed stays pending and is picked up again by
//! [`ShopOrderService::run_stock_tasks`].
//!
//! Inventory counts are per SKU, so issuing the same task twice would
//! consume another order's hold. A task is only ever executed by the caller
//! holding its claim: the one whose status change created it, or the one
//! that claimed it from the store after that claim was released or expired.

use std::sync::Arc;

use common::{OrderId, ShopOrderId, StockTaskId};
use domain::{ShopOrder, ShopOrderStatus, StockAction, StockTask};
use order_store::{OrderStore, PaymentOutcome};
use serde::Serialize;

use crate::error::Result;
use crate::services::{StockError, StockReservationClient};

/// What happened to the stock task of a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StockTaskOutcome {
    Completed { task_id: StockTaskId },
    /// The inventory call failed; the task will be retried.
    Pending { task_id: StockTaskId, error: String },
}

/// Result of an admin status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub shop_order: ShopOrder,
    pub stock: Option<StockTaskOutcome>,
}

/// Result of re-driving pending stock tasks.
#[derive(Debug, Clone, Default)]
pub struct StockTaskRun {
    pub completed: Vec<StockTaskId>,
    pub failed: Vec<(StockTaskId, String)>,
}

impl StockTaskRun {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, task_id: StockTaskId, result: std::result::Result<(), String>) {
        match result {
            Ok(()) => self.completed.push(task_id),
            Err(error) => self.failed.push((task_id, error)),
        }
    }
}

/// Result of applying a payment outcome to an order.
#[derive(Debug, Clone)]
pub struct PaymentSettled {
    /// Shop orders moved out of `AWAITING_PAYMENT`. Empty when the outcome
    /// had already been applied.
    pub transitioned: Vec<ShopOrder>,
    pub stock: StockTaskRun,
}

impl PaymentSettled {
    pub fn was_noop(&self) -> bool {
        self.transitioned.is_empty()
    }
}

/// Drives the shop order state machine for admin actions and payment
/// outcomes.
#[derive(Clone)]
pub struct ShopOrderService {
    store: Arc<dyn OrderStore>,
    stock: Arc<dyn StockReservationClient>,
}

impl ShopOrderService {
    pub fn new(store: Arc<dyn OrderStore>, stock: Arc<dyn StockReservationClient>) -> Self {
        Self { store, stock }
    }

    /// Moves a shop order to `status`.
    ///
    /// Fails with `InvalidStateTransition` and changes nothing when the
    /// current status does not allow it.
    #[tracing::instrument(skip(self, reason))]
    pub async fn update_status(
        &self,
        shop_order_id: ShopOrderId,
        status: ShopOrderStatus,
        reason: Option<String>,
    ) -> Result<StatusUpdate> {
        let outcome = self
            .store
            .transition_shop_order(shop_order_id, status, reason)
            .await?;

        let stock = match &outcome.stock_task {
            Some(task) => Some(match self.execute(task).await {
                Ok(()) => StockTaskOutcome::Completed { task_id: task.id },
                Err(error) => StockTaskOutcome::Pending {
                    task_id: task.id,
                    error,
                },
            }),
            None => None,
        };

        tracing::info!(%shop_order_id, %status, "shop order status updated");
        Ok(StatusUpdate {
            shop_order: outcome.shop_order,
            stock,
        })
    }

    /// Applies the gateway's final outcome to every shop order of the order
    /// still awaiting payment, then runs the order's stock tasks.
    ///
    /// Claimable tasks left by earlier attempts are run even when the outcome
    /// was already applied, so a redelivered event finishes a stock rollback
    /// that failed earlier.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_payment(
        &self,
        order_id: OrderId,
        outcome: PaymentOutcome,
    ) -> Result<PaymentSettled> {
        let reconciliation = self.store.apply_payment_outcome(order_id, outcome).await?;
        if reconciliation.is_noop() {
            tracing::info!(%order_id, "payment outcome already applied");
        } else {
            tracing::info!(
                %order_id,
                shop_orders = reconciliation.transitioned.len(),
                "payment outcome applied"
            );
        }

        // Claim leftovers first; the tasks just created are claimed by us
        // and would not be returned.
        let mut stock = self.run_stock_tasks(Some(order_id)).await?;
        for task in &reconciliation.stock_tasks {
            stock.record(task.id, self.execute(task).await);
        }
        Ok(PaymentSettled {
            transitioned: reconciliation.transitioned,
            stock,
        })
    }

    /// Claims and issues every pending stock task nobody else is working on,
    /// optionally for one order only.
    pub async fn run_stock_tasks(&self, order_id: Option<OrderId>) -> Result<StockTaskRun> {
        let tasks = self.store.claim_stock_tasks(order_id).await?;
        let mut run = StockTaskRun::default();

        for task in tasks {
            run.record(task.id, self.execute(&task).await);
        }
        Ok(run)
    }

    /// Calls the inventory service for one claimed task and marks it done.
    /// On failure the claim is dropped so the next run retries immediately.
    async fn execute(&self, task: &StockTask) -> std::result::Result<(), String> {
        let result = match task.action {
            StockAction::Commit => self.stock.commit(&task.lines).await,
            StockAction::Rollback => self.stock.rollback(&task.lines).await,
        };

        match result {
            Ok(()) => {}
            // Nothing held means an earlier attempt already applied the task,
            // or the hold never existed. Retrying cannot change that.
            Err(err @ StockError::NotHeld { .. }) => {
                tracing::error!(
                    task_id = %task.id,
                    shop_order_id = %task.shop_order_id,
                    action = %task.action,
                    error = %err,
                    "stock task has nothing held, marking complete"
                );
            }
            Err(err) => {
                metrics::counter!("stock_tasks_failed_total", "action" => task.action.as_str())
                    .increment(1);
                tracing::warn!(
                    task_id = %task.id,
                    shop_order_id = %task.shop_order_id,
                    action = %task.action,
                    error = %err,
                    "stock task failed, will retry"
                );
                if let Err(release) = self.store.release_stock_task(task.id).await {
                    tracing::warn!(
                        task_id = %task.id,
                        error = %release,
                        "stock task claim not released, retry waits for the lease"
                    );
                }
                return Err(err.to_string());
            }
        }

        if let Err(err) = self.store.complete_stock_task(task.id).await {
            tracing::warn!(
                task_id = %task.id,
                error = %err,
                "stock applied but task not marked complete"
            );
            return Err(err.to_string());
        }

        metrics::counter!("stock_tasks_completed_total", "action" => task.action.as_str())
            .increment(1);
        tracing::debug!(task_id = %task.id, action = %task.action, "stock task completed");
        Ok(())
    }
}
