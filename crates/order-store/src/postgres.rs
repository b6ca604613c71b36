use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    OrderId, OrderItemId, PaymentMethodId, ProductId, ShopId, ShopOrderId, SkuId, StockTaskId,
    TransactionId, UserId,
};
use domain::{
    AppliedVoucher, ItemSnapshot, Money, Order, OrderItem, PaymentMethodSnapshot,
    PaymentTransaction, SettlementBreakdown, ShippingAddress, ShopOrder, ShopOrderStatus,
    StockLine, StockTask,
};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow, types::Json};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        OrderStore, OrderTransaction, PaymentOutcome, PaymentReconciliation, TransitionOutcome,
        default_stock_task_lease,
    },
};

const SHOP_ORDER_COLUMNS: &str = "id, order_id, code, shop_id, status, subtotal, shipping_fee, \
     total_discount, total_amount, shop_voucher, shipping_method, tracking_code, paid_at, \
     processing_at, shipped_at, completed_at, cancelled_at, cancellation_reason, created_at, \
     updated_at";

const PAYMENT_COLUMNS: &str =
    "id, order_id, amount, method_id, method_type, status, created_at, updated_at";

const STOCK_TASK_COLUMNS: &str =
    "id, order_id, shop_order_id, action, lines, created_at, completed_at, claimed_until";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    task_lease: chrono::Duration,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            task_lease: default_stock_task_lease(),
        }
    }

    /// Sets how long a claimed stock task stays invisible to other workers.
    pub fn with_task_lease(mut self, lease: chrono::Duration) -> Self {
        self.task_lease = lease;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn parse<T>(value: String) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(StoreError::Corrupt)
}

fn to_db_quantity(quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StoreError::Corrupt(format!("quantity {quantity} overflows")))
}

fn unique_violation(entity: &'static str, id: impl ToString) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => StoreError::Duplicate {
            entity,
            id: id.to_string(),
        },
        other => StoreError::Database(other),
    }
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        code: row.try_get("code")?,
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
        subtotal: Money::new(row.try_get("subtotal")?),
        total_shipping_fee: Money::new(row.try_get("total_shipping_fee")?),
        total_discount: Money::new(row.try_get("total_discount")?),
        grand_total: Money::new(row.try_get("grand_total")?),
        platform_order_voucher: row
            .try_get::<Option<Json<AppliedVoucher>>, _>("platform_order_voucher")?
            .map(|j| j.0),
        platform_shipping_voucher: row
            .try_get::<Option<Json<AppliedVoucher>>, _>("platform_shipping_voucher")?
            .map(|j| j.0),
        shipping_address: row
            .try_get::<Json<ShippingAddress>, _>("shipping_address")?
            .0,
        payment_method: row
            .try_get::<Json<PaymentMethodSnapshot>, _>("payment_method")?
            .0,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        shop_orders: Vec::new(),
    })
}

fn row_to_shop_order(row: &PgRow) -> Result<ShopOrder> {
    Ok(ShopOrder {
        id: ShopOrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        code: row.try_get("code")?,
        shop_id: ShopId::new(row.try_get::<String, _>("shop_id")?),
        status: parse::<ShopOrderStatus>(row.try_get("status")?)?,
        subtotal: Money::new(row.try_get("subtotal")?),
        shipping_fee: Money::new(row.try_get("shipping_fee")?),
        total_discount: Money::new(row.try_get("total_discount")?),
        total_amount: Money::new(row.try_get("total_amount")?),
        shop_voucher: row
            .try_get::<Option<Json<AppliedVoucher>>, _>("shop_voucher")?
            .map(|j| j.0),
        shipping_method: row.try_get("shipping_method")?,
        tracking_code: row.try_get("tracking_code")?,
        paid_at: row.try_get("paid_at")?,
        processing_at: row.try_get("processing_at")?,
        shipped_at: row.try_get("shipped_at")?,
        completed_at: row.try_get("completed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        items: Vec::new(),
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderItem> {
    let quantity: i32 = row.try_get("quantity")?;
    Ok(OrderItem {
        id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        shop_order_id: ShopOrderId::from_uuid(row.try_get::<Uuid, _>("shop_order_id")?),
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        sku_id: SkuId::new(row.try_get::<String, _>("sku_id")?),
        quantity: u32::try_from(quantity)
            .map_err(|_| StoreError::Corrupt(format!("negative quantity {quantity}")))?,
        original_unit_price: Money::new(row.try_get("original_unit_price")?),
        final_unit_price: Money::new(row.try_get("final_unit_price")?),
        total_price: Money::new(row.try_get("total_price")?),
        snapshot: row.try_get::<Json<ItemSnapshot>, _>("snapshot")?.0,
        promotion_snapshot: row.try_get("promotion_snapshot")?,
        reviewed: row.try_get("reviewed")?,
    })
}

fn row_to_payment(row: &PgRow) -> Result<PaymentTransaction> {
    Ok(PaymentTransaction {
        id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        amount: Money::new(row.try_get("amount")?),
        method_id: PaymentMethodId::new(row.try_get::<String, _>("method_id")?),
        method_type: parse(row.try_get("method_type")?)?,
        status: parse(row.try_get("status")?)?,
        settlements: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_settlement(row: &PgRow) -> Result<SettlementBreakdown> {
    Ok(SettlementBreakdown {
        shop_order_id: ShopOrderId::from_uuid(row.try_get::<Uuid, _>("shop_order_id")?),
        shop_id: ShopId::new(row.try_get::<String, _>("shop_id")?),
        order_subtotal: Money::new(row.try_get("order_subtotal")?),
        shop_voucher_discount: Money::new(row.try_get("shop_voucher_discount")?),
        shipping_fee: Money::new(row.try_get("shipping_fee")?),
        site_order_discount: Money::new(row.try_get("site_order_discount")?),
        site_shipping_discount: Money::new(row.try_get("site_shipping_discount")?),
        commission_fee: Money::new(row.try_get("commission_fee")?),
        net_settled_amount: Money::new(row.try_get("net_settled_amount")?),
    })
}

fn row_to_stock_task(row: &PgRow) -> Result<StockTask> {
    Ok(StockTask {
        id: StockTaskId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        shop_order_id: ShopOrderId::from_uuid(row.try_get::<Uuid, _>("shop_order_id")?),
        action: parse(row.try_get("action")?)?,
        lines: row.try_get::<Json<Vec<StockLine>>, _>("lines")?.0,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        claimed_until: row.try_get("claimed_until")?,
    })
}

/// Loads items for the given shop orders and attaches them in place.
async fn attach_items(conn: &mut PgConnection, shop_orders: &mut [ShopOrder]) -> Result<()> {
    let ids: Vec<Uuid> = shop_orders.iter().map(|s| s.id.as_uuid()).collect();
    let rows = sqlx::query(
        r#"
        SELECT id, shop_order_id, product_id, sku_id, quantity, original_unit_price,
               final_unit_price, total_price, snapshot, promotion_snapshot, reviewed
        FROM order_items
        WHERE shop_order_id = ANY($1)
        ORDER BY position ASC
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_shop: HashMap<ShopOrderId, Vec<OrderItem>> = HashMap::new();
    for row in &rows {
        let item = row_to_item(row)?;
        by_shop.entry(item.shop_order_id).or_default().push(item);
    }
    for shop_order in shop_orders.iter_mut() {
        shop_order.items = by_shop.remove(&shop_order.id).unwrap_or_default();
    }
    Ok(())
}

async fn attach_settlements(conn: &mut PgConnection, payments: &mut [PaymentTransaction]) -> Result<()> {
    let ids: Vec<Uuid> = payments.iter().map(|p| p.id.as_uuid()).collect();
    let rows = sqlx::query(
        r#"
        SELECT transaction_id, shop_order_id, shop_id, order_subtotal, shop_voucher_discount,
               shipping_fee, site_order_discount, site_shipping_discount, commission_fee,
               net_settled_amount
        FROM settlement_details
        WHERE transaction_id = ANY($1)
        ORDER BY position ASC
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_transaction: HashMap<Uuid, Vec<SettlementBreakdown>> = HashMap::new();
    for row in &rows {
        let transaction_id: Uuid = row.try_get("transaction_id")?;
        by_transaction
            .entry(transaction_id)
            .or_default()
            .push(row_to_settlement(row)?);
    }
    for payment in payments.iter_mut() {
        payment.settlements = by_transaction
            .remove(&payment.id.as_uuid())
            .unwrap_or_default();
    }
    Ok(())
}

async fn write_status(conn: &mut PgConnection, shop_order: &ShopOrder) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE shop_orders
        SET status = $2, paid_at = $3, processing_at = $4, shipped_at = $5, completed_at = $6,
            cancelled_at = $7, cancellation_reason = $8, updated_at = $9
        WHERE id = $1
        "#,
    )
    .bind(shop_order.id.as_uuid())
    .bind(shop_order.status.as_str())
    .bind(shop_order.paid_at)
    .bind(shop_order.processing_at)
    .bind(shop_order.shipped_at)
    .bind(shop_order.completed_at)
    .bind(shop_order.cancelled_at)
    .bind(&shop_order.cancellation_reason)
    .bind(shop_order.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_stock_task(conn: &mut PgConnection, task: &StockTask) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_tasks
            (id, order_id, shop_order_id, action, lines, created_at, completed_at, claimed_until)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(task.id.as_uuid())
    .bind(task.order_id.as_uuid())
    .bind(task.shop_order_id.as_uuid())
    .bind(task.action.as_str())
    .bind(Json(&task.lines))
    .bind(task.created_at)
    .bind(task.completed_at)
    .bind(task.claimed_until)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// A unit of work over a PostgreSQL transaction.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PostgresTransaction {
    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, code, user_id, subtotal, total_shipping_fee, total_discount,
                                grand_total, platform_order_voucher, platform_shipping_voucher,
                                shipping_address, payment_method, note, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.code)
        .bind(order.user_id.as_str())
        .bind(order.subtotal.amount())
        .bind(order.total_shipping_fee.amount())
        .bind(order.total_discount.amount())
        .bind(order.grand_total.amount())
        .bind(order.platform_order_voucher.as_ref().map(Json))
        .bind(order.platform_shipping_voucher.as_ref().map(Json))
        .bind(Json(&order.shipping_address))
        .bind(Json(&order.payment_method))
        .bind(&order.note)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(unique_violation("order", order.id))?;

        for (position, shop_order) in order.shop_orders.iter().enumerate() {
            let sql = format!(
                "INSERT INTO shop_orders ({SHOP_ORDER_COLUMNS}, position) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)"
            );
            sqlx::query(&sql)
                .bind(shop_order.id.as_uuid())
                .bind(order.id.as_uuid())
                .bind(&shop_order.code)
                .bind(shop_order.shop_id.as_str())
                .bind(shop_order.status.as_str())
                .bind(shop_order.subtotal.amount())
                .bind(shop_order.shipping_fee.amount())
                .bind(shop_order.total_discount.amount())
                .bind(shop_order.total_amount.amount())
                .bind(shop_order.shop_voucher.as_ref().map(Json))
                .bind(&shop_order.shipping_method)
                .bind(&shop_order.tracking_code)
                .bind(shop_order.paid_at)
                .bind(shop_order.processing_at)
                .bind(shop_order.shipped_at)
                .bind(shop_order.completed_at)
                .bind(shop_order.cancelled_at)
                .bind(&shop_order.cancellation_reason)
                .bind(shop_order.created_at)
                .bind(shop_order.updated_at)
                .bind(position as i32)
                .execute(&mut *self.tx)
                .await
                .map_err(unique_violation("shop order", shop_order.id))?;

            for (item_position, item) in shop_order.items.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO order_items (id, shop_order_id, product_id, sku_id, quantity,
                                             original_unit_price, final_unit_price, total_price,
                                             snapshot, promotion_snapshot, reviewed, position)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(item.id.as_uuid())
                .bind(shop_order.id.as_uuid())
                .bind(item.product_id.as_str())
                .bind(item.sku_id.as_str())
                .bind(to_db_quantity(item.quantity)?)
                .bind(item.original_unit_price.amount())
                .bind(item.final_unit_price.amount())
                .bind(item.total_price.amount())
                .bind(Json(&item.snapshot))
                .bind(&item.promotion_snapshot)
                .bind(item.reviewed)
                .bind(item_position as i32)
                .execute(&mut *self.tx)
                .await?;
            }
        }

        Ok(())
    }

    async fn insert_payment(&mut self, payment: &PaymentTransaction) -> Result<()> {
        let sql = format!(
            "INSERT INTO payment_transactions ({PAYMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&sql)
            .bind(payment.id.as_uuid())
            .bind(payment.order_id.as_uuid())
            .bind(payment.amount.amount())
            .bind(payment.method_id.as_str())
            .bind(payment.method_type.as_str())
            .bind(payment.status.as_str())
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    StoreError::not_found("order", payment.order_id)
                }
                other => unique_violation("payment transaction", payment.order_id)(other),
            })?;

        for (position, settlement) in payment.settlements.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO settlement_details (shop_order_id, transaction_id, shop_id,
                                                order_subtotal, shop_voucher_discount, shipping_fee,
                                                site_order_discount, site_shipping_discount,
                                                commission_fee, net_settled_amount, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(settlement.shop_order_id.as_uuid())
            .bind(payment.id.as_uuid())
            .bind(settlement.shop_id.as_str())
            .bind(settlement.order_subtotal.amount())
            .bind(settlement.shop_voucher_discount.amount())
            .bind(settlement.shipping_fee.amount())
            .bind(settlement.site_order_discount.amount())
            .bind(settlement.site_shipping_discount.amount())
            .bind(settlement.commission_fee.amount())
            .bind(settlement.net_settled_amount.amount())
            .bind(position as i32)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query(
            r#"
            SELECT id, code, user_id, subtotal, total_shipping_fee, total_discount, grand_total,
                   platform_order_voucher, platform_shipping_voucher, shipping_address,
                   payment_method, note, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::not_found("order", order_id))?;

        let mut order = row_to_order(&row)?;
        let sql = format!(
            "SELECT {SHOP_ORDER_COLUMNS} FROM shop_orders WHERE order_id = $1 ORDER BY position ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&mut *conn)
            .await?;
        order.shop_orders = rows.iter().map(row_to_shop_order).collect::<Result<_>>()?;
        attach_items(&mut conn, &mut order.shop_orders).await?;

        Ok(order)
    }

    async fn get_shop_order(&self, shop_order_id: ShopOrderId) -> Result<ShopOrder> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {SHOP_ORDER_COLUMNS} FROM shop_orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(shop_order_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::not_found("shop order", shop_order_id))?;

        let mut shop_orders = vec![row_to_shop_order(&row)?];
        attach_items(&mut conn, &mut shop_orders).await?;
        shop_orders
            .pop()
            .ok_or_else(|| StoreError::not_found("shop order", shop_order_id))
    }

    async fn list_shop_orders(
        &self,
        order_id: OrderId,
        status: Option<ShopOrderStatus>,
    ) -> Result<Vec<ShopOrder>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {SHOP_ORDER_COLUMNS} FROM shop_orders \
             WHERE order_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY position ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&mut *conn)
            .await?;

        let mut shop_orders: Vec<ShopOrder> =
            rows.iter().map(row_to_shop_order).collect::<Result<_>>()?;
        attach_items(&mut conn, &mut shop_orders).await?;
        Ok(shop_orders)
    }

    async fn get_payment(&self, order_id: OrderId) -> Result<PaymentTransaction> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payment_transactions WHERE order_id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::not_found("payment transaction", order_id))?;

        let mut payments = vec![row_to_payment(&row)?];
        attach_settlements(&mut conn, &mut payments).await?;
        payments
            .pop()
            .ok_or_else(|| StoreError::not_found("payment transaction", order_id))
    }

    async fn transition_shop_order(
        &self,
        shop_order_id: ShopOrderId,
        to: ShopOrderStatus,
        reason: Option<String>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let sql = format!("SELECT {SHOP_ORDER_COLUMNS} FROM shop_orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(shop_order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("shop order", shop_order_id))?;

        let mut locked = vec![row_to_shop_order(&row)?];
        attach_items(&mut tx, &mut locked).await?;
        let mut shop_order = locked
            .pop()
            .ok_or_else(|| StoreError::not_found("shop order", shop_order_id))?;

        // An illegal transition returns here and the transaction rolls back on drop.
        let transition = shop_order.apply_transition(to, reason.as_deref(), now)?;
        write_status(&mut tx, &shop_order).await?;

        let stock_task = transition.stock_effect().map(|action| StockTask {
            claimed_until: Some(now + self.task_lease),
            ..StockTask::for_shop_order(&shop_order, action, now)
        });
        if let Some(task) = &stock_task {
            insert_stock_task(&mut tx, task).await?;
        }

        tx.commit().await?;
        crate::record_transition(&transition);

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
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let target = outcome.target_status();

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::not_found("order", order_id));
        }

        let sql = format!(
            "SELECT {SHOP_ORDER_COLUMNS} FROM shop_orders \
             WHERE order_id = $1 AND status = $2 \
             ORDER BY position ASC FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(ShopOrderStatus::AwaitingPayment.as_str())
            .fetch_all(&mut *tx)
            .await?;
        let mut awaiting: Vec<ShopOrder> =
            rows.iter().map(row_to_shop_order).collect::<Result<_>>()?;
        attach_items(&mut tx, &mut awaiting).await?;

        let mut reconciliation = PaymentReconciliation::default();
        let mut transitions = Vec::with_capacity(awaiting.len());
        for mut shop_order in awaiting {
            let transition = shop_order.apply_transition(target, outcome.reason(), now)?;
            write_status(&mut tx, &shop_order).await?;
            if let Some(action) = transition.stock_effect() {
                let task = StockTask {
                    claimed_until: Some(now + self.task_lease),
                    ..StockTask::for_shop_order(&shop_order, action, now)
                };
                insert_stock_task(&mut tx, &task).await?;
                reconciliation.stock_tasks.push(task);
            }
            transitions.push(transition);
            reconciliation.transitioned.push(shop_order);
        }

        let payment_status = match outcome {
            PaymentOutcome::Succeeded => domain::PaymentStatus::Success,
            PaymentOutcome::Failed { .. } => domain::PaymentStatus::Failed,
        };
        sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = $2, updated_at = $3
            WHERE order_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(payment_status.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        transitions.iter().for_each(crate::record_transition);

        Ok(reconciliation)
    }

    async fn pending_stock_tasks(&self, order_id: Option<OrderId>) -> Result<Vec<StockTask>> {
        let sql = format!(
            "SELECT {STOCK_TASK_COLUMNS} FROM stock_tasks \
             WHERE completed_at IS NULL AND ($1::UUID IS NULL OR order_id = $1) \
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.map(|id| id.as_uuid()))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_stock_task).collect()
    }

    async fn claim_stock_tasks(&self, order_id: Option<OrderId>) -> Result<Vec<StockTask>> {
        let now = Utc::now();
        // SKIP LOCKED lets concurrent claimers split the backlog instead of
        // queueing behind each other's row locks.
        let sql = format!(
            "UPDATE stock_tasks SET claimed_until = $2 \
             WHERE id IN ( \
                 SELECT id FROM stock_tasks \
                 WHERE completed_at IS NULL \
                   AND (claimed_until IS NULL OR claimed_until <= $3) \
                   AND ($1::UUID IS NULL OR order_id = $1) \
                 ORDER BY created_at ASC \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {STOCK_TASK_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.map(|id| id.as_uuid()))
            .bind(now + self.task_lease)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        let mut tasks: Vec<StockTask> = rows.iter().map(row_to_stock_task).collect::<Result<_>>()?;
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn release_stock_task(&self, task_id: StockTaskId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_tasks
            SET claimed_until = CASE WHEN completed_at IS NULL THEN NULL ELSE claimed_until END
            WHERE id = $1
            "#,
        )
        .bind(task_id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("stock task", task_id));
        }
        Ok(())
    }

    async fn complete_stock_task(&self, task_id: StockTaskId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_tasks
            SET completed_at = COALESCE(completed_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("stock task", task_id));
        }
        Ok(())
    }

    async fn expired_payments(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentTransaction>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_transactions \
             WHERE status = 'PENDING' AND method_type = 'ONLINE' AND created_at < $1 \
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&mut *conn)
            .await?;

        let mut payments: Vec<PaymentTransaction> =
            rows.iter().map(row_to_payment).collect::<Result<_>>()?;
        attach_settlements(&mut conn, &mut payments).await?;
        Ok(payments)
    }
}
