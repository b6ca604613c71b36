use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ShopOrderId, StockTaskId};
use domain::{
    Order, PaymentMethodType, PaymentStatus, PaymentTransaction, ShopOrder, ShopOrderStatus,
    StockTask,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{
        OrderStore, OrderTransaction, PaymentOutcome, PaymentReconciliation, TransitionOutcome,
        default_stock_task_lease,
    },
};

#[derive(Default)]
struct State {
    /// Orders are kept without their shop orders; those live in `shop_orders`.
    orders: HashMap<OrderId, Order>,
    shop_orders: HashMap<ShopOrderId, ShopOrder>,
    shop_order_ids: HashMap<OrderId, Vec<ShopOrderId>>,
    payments: HashMap<OrderId, PaymentTransaction>,
    stock_tasks: Vec<StockTask>,
}

impl State {
    fn assemble(&self, order: &Order) -> Order {
        let mut order = order.clone();
        order.shop_orders = self.shop_orders_of(order.id);
        order
    }

    fn shop_orders_of(&self, order_id: OrderId) -> Vec<ShopOrder> {
        self.shop_order_ids
            .get(&order_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.shop_orders.get(id).cloned())
            .collect()
    }
}

#[derive(Default)]
struct Faults {
    fail_on_commit: AtomicBool,
    fail_on_transition: AtomicBool,
}

/// In-memory order store implementation for testing.
///
/// Provides the same transactional guarantees as the PostgreSQL
/// implementation by holding the write lock for the whole check-then-act
/// sequence.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
    faults: Arc<Faults>,
    task_lease: chrono::Duration,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            faults: Arc::default(),
            task_lease: default_stock_task_lease(),
        }
    }
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a claimed stock task stays invisible to other workers.
    pub fn with_task_lease(mut self, lease: chrono::Duration) -> Self {
        self.task_lease = lease;
        self
    }

    /// Configures commits of new orders to fail.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.faults.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Configures status transitions to fail before writing anything.
    pub fn set_fail_on_transition(&self, fail: bool) {
        self.faults.fail_on_transition.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of persisted orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns every stock task, completed or not.
    pub async fn all_stock_tasks(&self) -> Vec<StockTask> {
        self.state.read().await.stock_tasks.clone()
    }

    fn check_transition_fault(&self) -> Result<()> {
        if self.faults.fail_on_transition.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

/// Writes staged by an in-memory unit of work.
pub struct InMemoryTransaction {
    store: InMemoryOrderStore,
    orders: Vec<Order>,
    payments: Vec<PaymentTransaction>,
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.orders.push(order.clone());
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &PaymentTransaction) -> Result<()> {
        if !self.orders.iter().any(|o| o.id == payment.order_id) {
            let state = self.store.state.read().await;
            if !state.orders.contains_key(&payment.order_id) {
                return Err(StoreError::not_found("order", payment.order_id));
            }
        }
        self.payments.push(payment.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.store.faults.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut state = self.store.state.write().await;

        for order in &self.orders {
            if state.orders.contains_key(&order.id) {
                return Err(StoreError::Duplicate {
                    entity: "order",
                    id: order.id.to_string(),
                });
            }
        }
        for payment in &self.payments {
            if state.payments.contains_key(&payment.order_id) {
                return Err(StoreError::Duplicate {
                    entity: "payment transaction",
                    id: payment.order_id.to_string(),
                });
            }
        }

        for mut order in self.orders {
            let shop_orders = std::mem::take(&mut order.shop_orders);
            state
                .shop_order_ids
                .insert(order.id, shop_orders.iter().map(|s| s.id).collect());
            for shop_order in shop_orders {
                state.shop_orders.insert(shop_order.id, shop_order);
            }
            state.orders.insert(order.id, order);
        }
        for payment in self.payments {
            state.payments.insert(payment.order_id, payment);
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            orders: Vec::new(),
            payments: Vec::new(),
        }))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        let state = self.state.read().await;
        state
            .orders
            .get(&order_id)
            .map(|order| state.assemble(order))
            .ok_or_else(|| StoreError::not_found("order", order_id))
    }

    async fn get_shop_order(&self, shop_order_id: ShopOrderId) -> Result<ShopOrder> {
        self.state
            .read()
            .await
            .shop_orders
            .get(&shop_order_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("shop order", shop_order_id))
    }

    async fn list_shop_orders(
        &self,
        order_id: OrderId,
        status: Option<ShopOrderStatus>,
    ) -> Result<Vec<ShopOrder>> {
        let state = self.state.read().await;
        Ok(state
            .shop_orders_of(order_id)
            .into_iter()
            .filter(|s| status.is_none_or(|status| s.status == status))
            .collect())
    }

    async fn get_payment(&self, order_id: OrderId) -> Result<PaymentTransaction> {
        self.state
            .read()
            .await
            .payments
            .get(&order_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("payment transaction", order_id))
    }

    async fn transition_shop_order(
        &self,
        shop_order_id: ShopOrderId,
        to: ShopOrderStatus,
        reason: Option<String>,
    ) -> Result<TransitionOutcome> {
        self.check_transition_fault()?;
        let mut state = self.state.write().await;
        let now = Utc::now();

        let shop_order = state
            .shop_orders
            .get_mut(&shop_order_id)
            .ok_or_else(|| StoreError::not_found("shop order", shop_order_id))?;
        let transition = shop_order.apply_transition(to, reason.as_deref(), now)?;
        crate::record_transition(&transition);

        let shop_order = shop_order.clone();
        let claimed_until = now + self.task_lease;
        let stock_task = transition.stock_effect().map(|action| StockTask {
            claimed_until: Some(claimed_until),
            ..StockTask::for_shop_order(&shop_order, action, now)
        });
        if let Some(task) = &stock_task {
            state.stock_tasks.push(task.clone());
        }

        Ok(TransitionOutcome {
            shop_order,
            stock_task,
        })
    }

    async fn apply_payment_outcome(
        &self,
        order_id: OrderId,
        outcome: PaymentOutcome,
    ) -> Result<PaymentReconciliation> {
        self.check_transition_fault()?;
        let mut state = self.state.write().await;
        if !state.orders.contains_key(&order_id) {
            return Err(StoreError::not_found("order", order_id));
        }
        let now = Utc::now();
        let target = outcome.target_status();

        // Validate every transition before mutating anything.
        let awaiting: Vec<ShopOrder> = state
            .shop_orders_of(order_id)
            .into_iter()
            .filter(|s| s.status == ShopOrderStatus::AwaitingPayment)
            .collect();
        let mut updated = Vec::with_capacity(awaiting.len());
        let mut transitions = Vec::with_capacity(awaiting.len());
        for mut shop_order in awaiting {
            let transition = shop_order.apply_transition(target, outcome.reason(), now)?;
            transitions.push(transition);
            updated.push(shop_order);
        }

        let mut reconciliation = PaymentReconciliation::default();
        for (shop_order, transition) in updated.into_iter().zip(transitions) {
            crate::record_transition(&transition);
            if let Some(action) = transition.stock_effect() {
                let task = StockTask {
                    claimed_until: Some(now + self.task_lease),
                    ..StockTask::for_shop_order(&shop_order, action, now)
                };
                state.stock_tasks.push(task.clone());
                reconciliation.stock_tasks.push(task);
            }
            state.shop_orders.insert(shop_order.id, shop_order.clone());
            reconciliation.transitioned.push(shop_order);
        }

        if let Some(payment) = state.payments.get_mut(&order_id)
            && payment.status == PaymentStatus::Pending
        {
            payment.status = match outcome {
                PaymentOutcome::Succeeded => PaymentStatus::Success,
                PaymentOutcome::Failed { .. } => PaymentStatus::Failed,
            };
            payment.updated_at = now;
        }

        Ok(reconciliation)
    }

    async fn pending_stock_tasks(&self, order_id: Option<OrderId>) -> Result<Vec<StockTask>> {
        let state = self.state.read().await;
        let mut tasks: Vec<StockTask> = state
            .stock_tasks
            .iter()
            .filter(|t| t.is_pending() && order_id.is_none_or(|id| t.order_id == id))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn claim_stock_tasks(&self, order_id: Option<OrderId>) -> Result<Vec<StockTask>> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let claimed_until = now + self.task_lease;

        let mut claimed: Vec<StockTask> = state
            .stock_tasks
            .iter_mut()
            .filter(|t| t.is_claimable_at(now) && order_id.is_none_or(|id| t.order_id == id))
            .map(|task| {
                task.claimed_until = Some(claimed_until);
                task.clone()
            })
            .collect();
        claimed.sort_by_key(|t| t.created_at);
        Ok(claimed)
    }

    async fn release_stock_task(&self, task_id: StockTaskId) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .stock_tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StoreError::not_found("stock task", task_id))?;
        if task.is_pending() {
            task.claimed_until = None;
        }
        Ok(())
    }

    async fn complete_stock_task(&self, task_id: StockTaskId) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .stock_tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StoreError::not_found("stock task", task_id))?;
        if task.completed_at.is_none() {
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn expired_payments(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentTransaction>> {
        let state = self.state.read().await;
        let mut expired: Vec<PaymentTransaction> = state
            .payments
            .values()
            .filter(|p| {
                p.status == PaymentStatus::Pending
                    && p.method_type == PaymentMethodType::Online
                    && p.created_at < cutoff
            })
            .cloned()
            .collect();
        expired.sort_by_key(|p| p.created_at);
        Ok(expired)
    }
}
