//! Integration tests for the order creation saga and shop order lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{ProductId, ShopId, SkuId, UserId, VoucherId};
use domain::{
    AppliesTo, Audience, CartItem, CreateOrder, Discount, Money, PaymentMethodType,
    ShippingAddress, ShopOrderStatus, StockLine, Voucher, VoucherOwner,
};
use order_store::{InMemoryOrderStore, OrderStore};
use saga::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryVoucherLedger, OrderOrchestrator,
    OrderSagaError, SagaServices, SagaSettings, ShopOrderService, SkuListing, StockError,
    StockReservationClient, StockTaskOutcome,
};

struct TestHarness {
    orchestrator: OrderOrchestrator,
    shop_orders: ShopOrderService,
    store: InMemoryOrderStore,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
    vouchers: InMemoryVoucherLedger,
}

impl TestHarness {
    async fn new() -> Self {
        let store = InMemoryOrderStore::new();
        let inventory = InMemoryInventoryService::new();
        let payment = InMemoryPaymentService::new();
        let vouchers = InMemoryVoucherLedger::new();

        inventory
            .add_sku(
                SkuListing::new(
                    "sku-a",
                    "prod-a",
                    "shop-a",
                    "Mechanical keyboard",
                    Money::new(200_000),
                    10,
                )
                .with_attribute("switch", "brown"),
            )
            .await;
        inventory
            .add_sku(SkuListing::new(
                "sku-b",
                "prod-b",
                "shop-b",
                "Wireless mouse",
                Money::new(100_000),
                5,
            ))
            .await;
        payment
            .add_method("vnpay", "VNPay", PaymentMethodType::Online)
            .await;
        payment
            .add_method("cod", "Cash on delivery", PaymentMethodType::Offline)
            .await;

        let services = SagaServices {
            catalog: Arc::new(inventory.clone()),
            stock: Arc::new(inventory.clone()),
            payment: Arc::new(payment.clone()),
            vouchers: Arc::new(vouchers.clone()),
        };
        let orchestrator = OrderOrchestrator::new(
            Arc::new(store.clone()),
            services,
            SagaSettings::default(),
        );
        let shop_orders = ShopOrderService::new(Arc::new(store.clone()), Arc::new(inventory.clone()));

        Self {
            orchestrator,
            shop_orders,
            store,
            inventory,
            payment,
            vouchers,
        }
    }

    async fn reserved(&self, sku: &str) -> u32 {
        self.inventory
            .stock_level(&SkuId::new(sku))
            .await
            .map_or(0, |level| level.reserved)
    }

    async fn used(&self, voucher_id: &str) -> u32 {
        self.vouchers
            .used_quantity(&VoucherId::new(voucher_id))
            .await
            .unwrap_or(0)
    }

    /// Shop voucher for shop-a: 10 % capped at 50,000.
    async fn with_shop_a_voucher(&self) {
        self.vouchers
            .add_voucher(voucher(
                "shopa10",
                VoucherOwner::Shop(ShopId::new("shop-a")),
                Discount::Percentage {
                    rate_bps: 1_000,
                    max_discount: Some(Money::new(50_000)),
                },
                AppliesTo::OrderTotal,
            ))
            .await;
    }
}

fn voucher(id: &str, owner: VoucherOwner, discount: Discount, applies_to: AppliesTo) -> Voucher {
    let now = Utc::now();
    Voucher {
        id: VoucherId::new(id),
        code: id.to_uppercase(),
        owner,
        discount,
        min_purchase: Money::zero(),
        applies_to,
        audience: Audience::Public,
        starts_at: now - Duration::days(1),
        ends_at: now + Duration::days(1),
        total_quantity: 100,
        used_quantity: 0,
        max_usage_per_user: 1,
        active: true,
    }
}

fn fixed(amount: i64) -> Discount {
    Discount::FixedAmount {
        amount: Money::new(amount),
    }
}

fn cart(items: &[(&str, u32)], method: &str) -> CreateOrder {
    CreateOrder::new(
        items
            .iter()
            .map(|(sku, quantity)| CartItem::new(*sku, *quantity))
            .collect(),
        ShippingAddress::new("Jane Doe", "0900000000", "1 Main St"),
        method,
    )
}

fn user(id: &str) -> UserId {
    UserId::new(id)
}

/// Inventory client whose rollback takes a while to be acknowledged.
struct SlowRollback {
    inner: InMemoryInventoryService,
    delay: std::time::Duration,
}

#[async_trait]
impl StockReservationClient for SlowRollback {
    async fn hold(&self, lines: &[StockLine]) -> Result<(), StockError> {
        self.inner.hold(lines).await
    }

    async fn commit(&self, lines: &[StockLine]) -> Result<(), StockError> {
        self.inner.commit(lines).await
    }

    async fn rollback(&self, lines: &[StockLine]) -> Result<(), StockError> {
        tokio::time::sleep(self.delay).await;
        self.inner.rollback(lines).await
    }
}

mod checkout {
    use super::*;

    #[tokio::test]
    async fn test_multi_shop_order_with_every_voucher_kind() {
        let h = TestHarness::new().await;
        h.with_shop_a_voucher().await;
        let mut platform = voucher("site71k", VoucherOwner::Platform, fixed(71_000), AppliesTo::OrderTotal);
        platform.min_purchase = Money::new(500_000);
        h.vouchers.add_voucher(platform).await;
        h.vouchers
            .add_voucher(voucher(
                "freeship",
                VoucherOwner::Platform,
                fixed(40_000),
                AppliesTo::ShippingFee,
            ))
            .await;

        let command = cart(&[("sku-a", 3), ("sku-b", 1)], "vnpay")
            .with_shop_voucher("shop-a", "shopa10")
            .with_platform_order_voucher("site71k")
            .with_platform_shipping_voucher("freeship");

        let created = h.orchestrator.create_order(user("u1"), command).await.unwrap();

        // 700,000 items + 60,000 shipping - (50,000 + 71,000 + 40,000) discounts
        assert_eq!(created.grand_total, Money::new(599_000));
        assert_eq!(created.status, ShopOrderStatus::AwaitingPayment);
        assert!(created.payment_url.is_some());

        let order = h.store.get_order(created.order_id).await.unwrap();
        assert_eq!(order.subtotal, Money::new(700_000));
        assert_eq!(order.total_shipping_fee, Money::new(60_000));
        assert_eq!(order.total_discount, Money::new(161_000));
        assert_eq!(
            order.platform_order_voucher.as_ref().map(|v| v.discount),
            Some(Money::new(71_000))
        );

        let shop_a = &order.shop_orders[0];
        assert_eq!(shop_a.shop_id, ShopId::new("shop-a"));
        assert_eq!(shop_a.total_discount, Money::new(50_000));
        assert_eq!(shop_a.total_amount, Money::new(580_000));
        assert_eq!(shop_a.items[0].snapshot.attributes["switch"], "brown");

        let request = h.payment.last_request().await.unwrap();
        assert_eq!(request.amount, Money::new(599_000));
        assert_eq!(request.items.len(), 2);
        let a = &request.settlements[0];
        assert_eq!(a.site_order_discount, Money::new(58_000));
        assert_eq!(a.site_shipping_discount, Money::new(20_000));
        assert_eq!(a.commission_fee, Money::new(60_000));
        assert_eq!(a.net_settled_amount, Money::new(490_000));
        let b = &request.settlements[1];
        assert_eq!(b.site_order_discount, Money::new(13_000));
        assert_eq!(b.net_settled_amount, Money::new(90_000));

        assert_eq!(h.used("shopa10").await, 1);
        assert_eq!(h.used("site71k").await, 1);
        assert_eq!(h.used("freeship").await, 1);
        assert_eq!(h.reserved("sku-a").await, 3);
        assert_eq!(h.reserved("sku-b").await, 1);
    }

    #[tokio::test]
    async fn test_insufficient_stock_has_no_side_effects() {
        let h = TestHarness::new().await;
        h.with_shop_a_voucher().await;
        let command = cart(&[("sku-a", 1), ("sku-b", 6)], "vnpay").with_shop_voucher("shop-a", "shopa10");

        let result = h.orchestrator.create_order(user("u1"), command).await;

        match result {
            Err(OrderSagaError::InsufficientStock {
                sku_id,
                available,
                requested,
            }) => {
                assert_eq!(sku_id, SkuId::new("sku-b"));
                assert_eq!(available, 5);
                assert_eq!(requested, 6);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(h.used("shopa10").await, 0);
        assert_eq!(h.reserved("sku-a").await, 0);
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_minimum_purchase_not_reached() {
        let h = TestHarness::new().await;
        let mut v = voucher(
            "min100k",
            VoucherOwner::Shop(ShopId::new("shop-b")),
            fixed(10_000),
            AppliesTo::OrderTotal,
        );
        v.min_purchase = Money::new(100_000);
        h.vouchers.add_voucher(v).await;
        h.inventory
            .add_sku(SkuListing::new(
                "sku-c",
                "prod-c",
                "shop-b",
                "Mouse pad",
                Money::new(99_999),
                5,
            ))
            .await;

        let command = cart(&[("sku-c", 1)], "vnpay").with_shop_voucher("shop-b", "min100k");
        let result = h.orchestrator.create_order(user("u1"), command).await;

        assert!(matches!(
            result,
            Err(OrderSagaError::VoucherNotApplicable { .. })
        ));
        assert_eq!(h.used("min100k").await, 0);
    }

    #[tokio::test]
    async fn test_per_user_limit_on_second_order() {
        let h = TestHarness::new().await;
        h.with_shop_a_voucher().await;

        let first = cart(&[("sku-a", 1)], "vnpay").with_shop_voucher("shop-a", "shopa10");
        h.orchestrator.create_order(user("u1"), first).await.unwrap();

        let second = cart(&[("sku-a", 1)], "vnpay").with_shop_voucher("shop-a", "shopa10");
        let result = h.orchestrator.create_order(user("u1"), second).await;

        assert!(matches!(
            result,
            Err(OrderSagaError::VoucherPerUserLimitExceeded { .. })
        ));
        assert_eq!(h.used("shopa10").await, 1);
        assert_eq!(h.reserved("sku-a").await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_voucher() {
        let h = TestHarness::new().await;
        let mut v = voucher("lastone", VoucherOwner::Platform, fixed(5_000), AppliesTo::OrderTotal);
        v.total_quantity = 1;
        h.vouchers.add_voucher(v).await;

        let first = cart(&[("sku-a", 1)], "cod").with_platform_order_voucher("lastone");
        h.orchestrator.create_order(user("u1"), first).await.unwrap();

        let second = cart(&[("sku-a", 1)], "cod").with_platform_order_voucher("lastone");
        let result = h.orchestrator.create_order(user("u2"), second).await;

        assert!(matches!(result, Err(OrderSagaError::VoucherExhausted { .. })));
        assert_eq!(h.used("lastone").await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_orders_for_scarce_stock() {
        let h = Arc::new(TestHarness::new().await);

        let first = {
            let h = h.clone();
            tokio::spawn(async move {
                h.orchestrator
                    .create_order(user("u1"), cart(&[("sku-b", 3)], "vnpay"))
                    .await
            })
        };
        let second = {
            let h = h.clone();
            tokio::spawn(async move {
                h.orchestrator
                    .create_order(user("u2"), cart(&[("sku-b", 3)], "vnpay"))
                    .await
            })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(OrderSagaError::InsufficientStock { .. } | OrderSagaError::StockConflict(_))
        )));
        assert_eq!(h.reserved("sku-b").await, 3);
    }
}

mod compensation {
    use super::*;

    #[tokio::test]
    async fn test_persistence_failure_releases_hold_and_vouchers() {
        let h = TestHarness::new().await;
        h.with_shop_a_voucher().await;
        h.vouchers
            .add_voucher(voucher(
                "freeship",
                VoucherOwner::Platform,
                fixed(30_000),
                AppliesTo::ShippingFee,
            ))
            .await;
        // Someone else already holds one unit.
        h.inventory.hold(&[StockLine::new("sku-a", 1)]).await.unwrap();
        h.store.set_fail_on_commit(true);

        let command = cart(&[("sku-a", 2), ("sku-b", 1)], "vnpay")
            .with_shop_voucher("shop-a", "shopa10")
            .with_platform_shipping_voucher("freeship");
        let result = h.orchestrator.create_order(user("u1"), command).await;

        assert!(matches!(result, Err(OrderSagaError::Persistence(_))));
        assert_eq!(h.reserved("sku-a").await, 1);
        assert_eq!(h.reserved("sku-b").await, 0);
        assert_eq!(h.used("shopa10").await, 0);
        assert_eq!(h.used("freeship").await, 0);
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_commit_failure_after_gateway_accepted_payment() {
        let h = TestHarness::new().await;
        h.store.set_fail_on_commit(true);

        let result = h
            .orchestrator
            .create_order(user("u1"), cart(&[("sku-a", 1)], "vnpay"))
            .await;

        assert!(matches!(result, Err(OrderSagaError::Persistence(_))));
        // The gateway kept the request; no order carries its transaction.
        assert_eq!(h.payment.payment_count().await, 1);
        let request = h.payment.last_request().await.unwrap();
        let lookup = h.store.get_order(request.order_id).await;
        assert!(lookup.is_err_and(|err| err.is_not_found()));
        assert_eq!(h.reserved("sku-a").await, 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_rolls_back_everything() {
        let h = TestHarness::new().await;
        h.with_shop_a_voucher().await;
        h.payment.set_fail_on_initiate(true);

        let command = cart(&[("sku-a", 2)], "vnpay").with_shop_voucher("shop-a", "shopa10");
        let result = h.orchestrator.create_order(user("u1"), command).await;

        assert!(matches!(result, Err(OrderSagaError::PaymentGateway(_))));
        assert_eq!(h.reserved("sku-a").await, 0);
        assert_eq!(h.used("shopa10").await, 0);
        assert_eq!(h.store.order_count().await, 0);
        assert_eq!(h.payment.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_hold_failure_releases_vouchers() {
        let h = TestHarness::new().await;
        h.with_shop_a_voucher().await;
        h.inventory.set_fail_on_hold(true);

        let command = cart(&[("sku-a", 1)], "vnpay").with_shop_voucher("shop-a", "shopa10");
        let result = h.orchestrator.create_order(user("u1"), command).await;

        assert!(matches!(result, Err(OrderSagaError::StockConflict(_))));
        assert_eq!(h.used("shopa10").await, 0);
    }

    #[tokio::test]
    async fn test_uncapped_percentage_voucher_releases_earlier_reservations() {
        let h = TestHarness::new().await;
        h.with_shop_a_voucher().await;
        h.vouchers
            .add_voucher(voucher(
                "broken",
                VoucherOwner::Platform,
                Discount::Percentage {
                    rate_bps: 500,
                    max_discount: None,
                },
                AppliesTo::OrderTotal,
            ))
            .await;

        let command = cart(&[("sku-a", 1)], "vnpay")
            .with_shop_voucher("shop-a", "shopa10")
            .with_platform_order_voucher("broken");
        let result = h.orchestrator.create_order(user("u1"), command).await;

        assert!(matches!(
            result,
            Err(OrderSagaError::VoucherMisconfigured(_))
        ));
        assert_eq!(h.used("shopa10").await, 0);
        assert_eq!(h.used("broken").await, 0);
        assert_eq!(h.reserved("sku-a").await, 0);
    }
}

mod shop_order_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_cash_on_delivery_order_through_refund() {
        let h = TestHarness::new().await;
        let created = h
            .orchestrator
            .create_order(user("u1"), cart(&[("sku-b", 2)], "cod"))
            .await
            .unwrap();
        assert_eq!(created.status, ShopOrderStatus::Processing);

        let order = h.store.get_order(created.order_id).await.unwrap();
        let shop_order_id = order.shop_orders[0].id;

        h.shop_orders
            .update_status(shop_order_id, ShopOrderStatus::Shipped, None)
            .await
            .unwrap();
        assert_eq!(h.reserved("sku-b").await, 0);
        assert_eq!(h.inventory.total_sold(&ProductId::new("prod-b")).await, 2);

        h.shop_orders
            .update_status(shop_order_id, ShopOrderStatus::Completed, None)
            .await
            .unwrap();
        let refunded = h
            .shop_orders
            .update_status(shop_order_id, ShopOrderStatus::Refunded, None)
            .await
            .unwrap();
        assert_eq!(refunded.shop_order.status, ShopOrderStatus::Refunded);
        assert!(refunded.stock.is_none());

        let result = h
            .shop_orders
            .update_status(shop_order_id, ShopOrderStatus::Cancelled, None)
            .await;
        assert!(matches!(
            result,
            Err(OrderSagaError::InvalidStateTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_in_flight_stock_task_is_not_issued_again() {
        let h = TestHarness::new().await;
        let first = h
            .orchestrator
            .create_order(user("u1"), cart(&[("sku-a", 2)], "cod"))
            .await
            .unwrap();
        h.orchestrator
            .create_order(user("u2"), cart(&[("sku-a", 2)], "cod"))
            .await
            .unwrap();
        assert_eq!(h.reserved("sku-a").await, 4);

        let slow = ShopOrderService::new(
            Arc::new(h.store.clone()),
            Arc::new(SlowRollback {
                inner: h.inventory.clone(),
                delay: std::time::Duration::from_millis(200),
            }),
        );
        let shop_order_id = h.store.get_order(first.order_id).await.unwrap().shop_orders[0].id;
        let admin = tokio::spawn(async move {
            slow.update_status(shop_order_id, ShopOrderStatus::Cancelled, None)
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let sweep = h.shop_orders.run_stock_tasks(None).await.unwrap();
        assert!(sweep.completed.is_empty());
        assert!(sweep.is_clean());

        let update = admin.await.unwrap().unwrap();
        assert!(matches!(update.stock, Some(StockTaskOutcome::Completed { .. })));
        // The second order's hold survives the first order's cancellation.
        assert_eq!(h.reserved("sku-a").await, 2);
        assert!(
            h.shop_orders
                .run_stock_tasks(None)
                .await
                .unwrap()
                .completed
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_admin_cancel_of_awaiting_payment_releases_stock() {
        let h = TestHarness::new().await;
        let created = h
            .orchestrator
            .create_order(user("u1"), cart(&[("sku-a", 2), ("sku-b", 1)], "vnpay"))
            .await
            .unwrap();
        let order = h.store.get_order(created.order_id).await.unwrap();

        for shop_order in &order.shop_orders {
            h.shop_orders
                .update_status(
                    shop_order.id,
                    ShopOrderStatus::Cancelled,
                    Some("out of stock at warehouse".to_string()),
                )
                .await
                .unwrap();
        }

        assert_eq!(h.reserved("sku-a").await, 0);
        assert_eq!(h.reserved("sku-b").await, 0);
        let cancelled = h
            .store
            .list_shop_orders(created.order_id, Some(ShopOrderStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 2);
    }
}
