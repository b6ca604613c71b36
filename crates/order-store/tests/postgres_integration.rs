//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use common::{
    OrderId, OrderItemId, PaymentMethodId, ProductId, ShopId, ShopOrderId, SkuId, StockTaskId,
    TransactionId, UserId, VoucherId,
};
use domain::{
    AppliedVoucher, ItemSnapshot, Money, Order, OrderItem, PaymentMethodSnapshot,
    PaymentMethodType, PaymentStatus, PaymentTransaction, SettlementBreakdown, ShippingAddress,
    ShopOrder, ShopOrderStatus, StockAction, StockLine,
};
use order_store::{OrderStore, PaymentOutcome, PostgresOrderStore, StoreError};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            for migration in [
                include_str!("../../../migrations/001_create_order_tables.sql"),
                include_str!("../../../migrations/002_stock_task_claims.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE stock_tasks, settlement_details, payment_transactions, order_items, \
         shop_orders, orders",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresOrderStore::new(pool)
}

fn build_order(method: PaymentMethodType, shops: usize) -> Order {
    // Postgres keeps microseconds
    let now = Utc::now().trunc_subsecs(6);
    let order_id = OrderId::new();
    let shop_orders: Vec<ShopOrder> = (0..shops)
        .map(|i| {
            let id = ShopOrderId::new();
            ShopOrder {
                id,
                order_id,
                code: domain::shop_order_code(&ShopId::new(format!("shop-{i}"))),
                shop_id: ShopId::new(format!("shop-{i}")),
                status: ShopOrderStatus::initial(method),
                subtotal: Money::new(100_000),
                shipping_fee: Money::new(30_000),
                total_discount: Money::new(10_000),
                total_amount: Money::new(120_000),
                shop_voucher: Some(AppliedVoucher {
                    voucher_id: VoucherId::new(format!("shop-v-{i}")),
                    code: "SHOP10K".to_string(),
                    discount: Money::new(10_000),
                }),
                shipping_method: None,
                tracking_code: None,
                paid_at: None,
                processing_at: None,
                shipped_at: None,
                completed_at: None,
                cancelled_at: None,
                cancellation_reason: None,
                created_at: now,
                updated_at: now,
                items: vec![
                    OrderItem {
                        id: OrderItemId::new(),
                        shop_order_id: id,
                        product_id: ProductId::new(format!("prod-{i}")),
                        sku_id: SkuId::new(format!("sku-{i}-a")),
                        quantity: 1,
                        original_unit_price: Money::new(60_000),
                        final_unit_price: Money::new(60_000),
                        total_price: Money::new(60_000),
                        snapshot: ItemSnapshot {
                            product_name: "Tea".to_string(),
                            image_url: Some("https://img/tea.png".to_string()),
                            attributes: [("size".to_string(), "L".to_string())].into(),
                        },
                        promotion_snapshot: Some(serde_json::json!({"flash_sale": false})),
                        reviewed: false,
                    },
                    OrderItem {
                        id: OrderItemId::new(),
                        shop_order_id: id,
                        product_id: ProductId::new(format!("prod-{i}")),
                        sku_id: SkuId::new(format!("sku-{i}-b")),
                        quantity: 2,
                        original_unit_price: Money::new(20_000),
                        final_unit_price: Money::new(20_000),
                        total_price: Money::new(40_000),
                        snapshot: ItemSnapshot::default(),
                        promotion_snapshot: None,
                        reviewed: false,
                    },
                ],
            }
        })
        .collect();

    Order {
        id: order_id,
        code: domain::order_code(now),
        user_id: UserId::new("user-1"),
        subtotal: Money::new(100_000 * shops as i64),
        total_shipping_fee: Money::new(30_000 * shops as i64),
        total_discount: Money::new(10_000 * shops as i64),
        grand_total: Money::new(120_000 * shops as i64),
        platform_order_voucher: None,
        platform_shipping_voucher: None,
        shipping_address: ShippingAddress::new("Tran B", "0911", "2 Nguyen Hue"),
        payment_method: PaymentMethodSnapshot {
            id: PaymentMethodId::new("pm"),
            name: "Gateway".to_string(),
            method_type: method,
        },
        note: Some("leave at door".to_string()),
        created_at: now,
        updated_at: now,
        shop_orders,
    }
}

fn build_payment(order: &Order) -> PaymentTransaction {
    PaymentTransaction {
        id: TransactionId::new(),
        order_id: order.id,
        amount: order.grand_total,
        method_id: order.payment_method.id.clone(),
        method_type: order.payment_method.method_type,
        status: PaymentStatus::Pending,
        settlements: order
            .shop_orders
            .iter()
            .map(|s| SettlementBreakdown {
                shop_order_id: s.id,
                shop_id: s.shop_id.clone(),
                order_subtotal: s.subtotal,
                shop_voucher_discount: s.total_discount,
                shipping_fee: s.shipping_fee,
                site_order_discount: Money::zero(),
                site_shipping_discount: Money::zero(),
                commission_fee: Money::new(10_000),
                net_settled_amount: Money::new(80_000),
            })
            .collect(),
        created_at: order.created_at,
        updated_at: order.created_at,
    }
}

async fn persist(store: &PostgresOrderStore, order: &Order) -> PaymentTransaction {
    let payment = build_payment(order);
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(order).await.unwrap();
    tx.insert_payment(&payment).await.unwrap();
    tx.commit().await.unwrap();
    payment
}

#[tokio::test]
#[serial]
async fn insert_and_load_order_tree() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Online, 2);
    let payment = persist(&store, &order).await;

    let loaded = store.get_order(order.id).await.unwrap();
    assert_eq!(loaded, order);

    let loaded_payment = store.get_payment(order.id).await.unwrap();
    assert_eq!(loaded_payment, payment);
}

#[tokio::test]
#[serial]
async fn rolled_back_transaction_persists_nothing() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Online, 1);

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.rollback().await.unwrap();

    let err = store.get_order(order.id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[serial]
async fn dropped_transaction_persists_nothing() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Online, 1);

    {
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
    }

    assert!(store.get_order(order.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
#[serial]
async fn duplicate_order_is_rejected() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Offline, 1);
    persist(&store, &order).await;

    let mut tx = store.begin().await.unwrap();
    let err = tx.insert_order(&order).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { entity: "order", .. }));
}

#[tokio::test]
#[serial]
async fn list_shop_orders_filters_by_status() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Online, 3);
    persist(&store, &order).await;

    store
        .transition_shop_order(order.shop_orders[1].id, ShopOrderStatus::Processing, None)
        .await
        .unwrap();

    let all = store.list_shop_orders(order.id, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, order.shop_orders[0].id);

    let awaiting = store
        .list_shop_orders(order.id, Some(ShopOrderStatus::AwaitingPayment))
        .await
        .unwrap();
    assert_eq!(awaiting.len(), 2);
    assert!(awaiting.iter().all(|s| s.items.len() == 2));
}

#[tokio::test]
#[serial]
async fn shipping_writes_commit_task_in_same_transaction() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Offline, 1);
    persist(&store, &order).await;
    let shop_order_id = order.shop_orders[0].id;

    let outcome = store
        .transition_shop_order(shop_order_id, ShopOrderStatus::Shipped, None)
        .await
        .unwrap();
    assert_eq!(outcome.shop_order.status, ShopOrderStatus::Shipped);
    assert!(outcome.shop_order.shipped_at.is_some());

    let task = outcome.stock_task.unwrap();
    assert_eq!(task.action, StockAction::Commit);
    assert_eq!(
        task.lines,
        vec![
            StockLine::new("sku-0-a", 1),
            StockLine::new("sku-0-b", 2)
        ]
    );

    let pending = store.pending_stock_tasks(Some(order.id)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, task.id);

    store.complete_stock_task(task.id).await.unwrap();
    store.complete_stock_task(task.id).await.unwrap();
    assert!(store.pending_stock_tasks(None).await.unwrap().is_empty());

    let err = store
        .complete_stock_task(StockTaskId::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[serial]
async fn stock_task_claims_are_exclusive() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Online, 3);
    persist(&store, &order).await;

    let reconciliation = store
        .apply_payment_outcome(order.id, PaymentOutcome::failed())
        .await
        .unwrap();
    assert_eq!(reconciliation.stock_tasks.len(), 3);
    assert!(
        reconciliation
            .stock_tasks
            .iter()
            .all(|t| t.claimed_until.is_some())
    );
    assert!(store.claim_stock_tasks(None).await.unwrap().is_empty());

    for task in &reconciliation.stock_tasks {
        store.release_stock_task(task.id).await.unwrap();
    }

    let (a, b) = tokio::join!(
        store.claim_stock_tasks(Some(order.id)),
        store.claim_stock_tasks(None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.len() + b.len(), 3);
    assert!(a.iter().all(|t| b.iter().all(|o| o.id != t.id)));

    let err = store
        .release_stock_task(StockTaskId::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[serial]
async fn expired_stock_task_claim_is_taken_over() {
    let store = get_test_store().await.with_task_lease(Duration::zero());
    let order = build_order(PaymentMethodType::Offline, 1);
    persist(&store, &order).await;

    let task = store
        .transition_shop_order(order.shop_orders[0].id, ShopOrderStatus::Cancelled, None)
        .await
        .unwrap()
        .stock_task
        .unwrap();

    let claimed = store.claim_stock_tasks(None).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, task.id);

    store.complete_stock_task(task.id).await.unwrap();
    assert!(store.claim_stock_tasks(None).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn illegal_transition_writes_nothing() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Online, 1);
    persist(&store, &order).await;
    let shop_order_id = order.shop_orders[0].id;

    let err = store
        .transition_shop_order(shop_order_id, ShopOrderStatus::Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition(_)));

    let shop_order = store.get_shop_order(shop_order_id).await.unwrap();
    assert_eq!(shop_order.status, ShopOrderStatus::AwaitingPayment);
    assert!(store.pending_stock_tasks(None).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn payment_failure_cancels_and_is_idempotent() {
    let store = get_test_store().await;
    let order = build_order(PaymentMethodType::Online, 2);
    persist(&store, &order).await;

    let first = store
        .apply_payment_outcome(order.id, PaymentOutcome::failed())
        .await
        .unwrap();
    assert_eq!(first.transitioned.len(), 2);
    assert_eq!(first.stock_tasks.len(), 2);
    assert!(
        first
            .transitioned
            .iter()
            .all(|s| s.cancellation_reason.as_deref() == Some("payment failed or expired"))
    );

    let second = store
        .apply_payment_outcome(order.id, PaymentOutcome::failed())
        .await
        .unwrap();
    assert!(second.is_noop());
    assert_eq!(store.pending_stock_tasks(Some(order.id)).await.unwrap().len(), 2);

    let payment = store.get_payment(order.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
}

#[tokio::test]
#[serial]
async fn payment_outcome_for_unknown_order_is_not_found() {
    let store = get_test_store().await;
    let err = store
        .apply_payment_outcome(OrderId::new(), PaymentOutcome::Succeeded)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[serial]
async fn expired_payments_only_returns_pending_online() {
    let store = get_test_store().await;
    let online = build_order(PaymentMethodType::Online, 1);
    let offline = build_order(PaymentMethodType::Offline, 1);
    let settled = build_order(PaymentMethodType::Online, 1);
    persist(&store, &online).await;
    persist(&store, &offline).await;
    persist(&store, &settled).await;
    store
        .apply_payment_outcome(settled.id, PaymentOutcome::Succeeded)
        .await
        .unwrap();

    let cutoff = Utc::now() + Duration::seconds(1);
    let expired = store.expired_payments(cutoff).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].order_id, online.id);
    assert_eq!(expired[0].settlements.len(), 1);

    let earlier = store
        .expired_payments(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert!(earlier.is_empty());
}
