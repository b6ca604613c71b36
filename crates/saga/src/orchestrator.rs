//! Order orchestrator: the saga that turns a multi-shop cart into a persisted
//! order tree and a pending payment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{OrderId, OrderItemId, ShopId, ShopOrderId, SkuId, TransactionId, UserId};
use domain::{
    AppliedVoucher, AppliesTo, CartItem, CreateOrder, Money, Order, OrderItem,
    PaymentMethodSnapshot, PaymentStatus, PaymentTransaction, ShopOrder, ShopOrderStatus, Voucher,
    allocate_platform_discounts, compute_discount, order_code, settlement_for, shop_order_code,
};
use futures_util::{StreamExt, stream};
use order_store::{OrderStore, OrderTransaction};
use serde::Serialize;

use crate::compensation::{Compensation, CompensationLog};
use crate::error::{OrderSagaError, Result};
use crate::order_creation;
use crate::services::{
    CatalogError, CatalogService, PaymentAdapter, PaymentError, PaymentInitiation,
    PaymentItemLine, PaymentRequest, PaymentUserInfo, SkuSnapshot, StockReservationClient,
    VoucherLedger,
};

/// Tunables of the order creation saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaSettings {
    /// Flat shipping fee charged per shop order.
    pub shipping_fee_per_shop: Money,
    /// Platform commission on each shop's item subtotal, in basis points.
    pub commission_bps: u32,
    /// Maximum number of catalog lookups in flight at once.
    pub catalog_concurrency: usize,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            shipping_fee_per_shop: Money::new(30_000),
            commission_bps: 1_000,
            catalog_concurrency: 8,
        }
    }
}

/// Handles to the external services the saga calls.
#[derive(Clone)]
pub struct SagaServices {
    pub catalog: Arc<dyn CatalogService>,
    pub stock: Arc<dyn StockReservationClient>,
    pub payment: Arc<dyn PaymentAdapter>,
    pub vouchers: Arc<dyn VoucherLedger>,
}

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub code: String,
    pub grand_total: Money,
    /// Status every shop order of the new order starts in.
    pub status: ShopOrderStatus,
    /// Gateway page to send the customer to, for online payment methods.
    pub payment_url: Option<String>,
}

/// A cart line joined with its catalog snapshot.
#[derive(Debug, Clone)]
struct PricedLine {
    sku: SkuSnapshot,
    quantity: u32,
}

/// Order being assembled before any external side effect is performed.
struct Draft {
    order_id: OrderId,
    user_id: UserId,
    command: CreateOrder,
    method: PaymentMethodSnapshot,
    shop_orders: Vec<ShopOrder>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct PlatformVouchers {
    order: Option<AppliedVoucher>,
    shipping: Option<AppliedVoucher>,
}

/// Coordinates order creation across the catalog, voucher ledger,
/// inventory, order store and payment gateway.
///
/// Once a voucher or stock side effect has happened the saga always runs to
/// success or to full compensation before returning.
pub struct OrderOrchestrator {
    store: Arc<dyn OrderStore>,
    services: SagaServices,
    settings: SagaSettings,
}

impl OrderOrchestrator {
    pub fn new(store: Arc<dyn OrderStore>, services: SagaServices, settings: SagaSettings) -> Self {
        Self {
            store,
            services,
            settings,
        }
    }

    /// Places an order for `user_id`.
    #[tracing::instrument(skip(self, command), fields(saga_type = order_creation::SAGA_TYPE))]
    pub async fn create_order(&self, user_id: UserId, command: CreateOrder) -> Result<OrderCreated> {
        metrics::counter!("order_saga_executions_total").increment(1);
        let saga_start = Instant::now();

        let result = self.execute(user_id, command).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("order_saga_duration_seconds").record(duration);
        match &result {
            Ok(created) => {
                metrics::counter!("order_saga_completed_total").increment(1);
                tracing::info!(
                    order_id = %created.order_id,
                    code = %created.code,
                    grand_total = %created.grand_total,
                    duration,
                    "order created"
                );
            }
            Err(err) => {
                metrics::counter!("order_saga_failed_total", "reason" => err.code()).increment(1);
                tracing::warn!(error = %err, code = err.code(), duration, "order creation failed");
            }
        }
        result
    }

    async fn execute(&self, user_id: UserId, command: CreateOrder) -> Result<OrderCreated> {
        // 1. Structural validation
        tracing::debug!(step = order_creation::STEP_VALIDATE_REQUEST, "saga step started");
        command.validate()?;

        // 2. Pricing and stock snapshots, then the payment method
        let lines = self.fetch_catalog(&command.items).await?;
        let method = self.resolve_payment_method(&command).await?;

        // 3. Stock check against the snapshot; nothing is held yet
        tracing::debug!(step = order_creation::STEP_CHECK_STOCK, "saga step started");
        check_stock(&lines)?;

        // 4. One shop order per shop
        tracing::debug!(step = order_creation::STEP_GROUP_BY_SHOP, "saga step started");
        let order_id = OrderId::new();
        let created_at = Utc::now();
        let shop_orders = group_by_shop(
            order_id,
            &lines,
            ShopOrderStatus::initial(method.method_type),
            self.settings.shipping_fee_per_shop,
            created_at,
        );
        ensure_shop_vouchers_target_cart(&command, &shop_orders)?;

        let mut draft = Draft {
            order_id,
            user_id,
            command,
            method,
            shop_orders,
            created_at,
        };

        // 5-10 perform side effects and register their compensations
        let mut log = CompensationLog::new();
        match self.place(&mut draft, &mut log).await {
            Ok(created) => {
                log.complete();
                Ok(created)
            }
            Err(err) => {
                if !log.is_empty() {
                    tracing::warn!(
                        error = %err,
                        compensations = log.len(),
                        "saga step failed, compensating"
                    );
                    let report = log
                        .unwind(self.services.stock.as_ref(), self.services.vouchers.as_ref())
                        .await;
                    if !report.is_clean() {
                        tracing::error!(
                            order_id = %draft.order_id,
                            failed = report.failed.len(),
                            "compensation incomplete"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn place(&self, draft: &mut Draft, log: &mut CompensationLog) -> Result<OrderCreated> {
        // 5. Vouchers
        tracing::info!(step = order_creation::STEP_APPLY_VOUCHERS, "saga step started");
        let platform = self.apply_vouchers(draft, log).await?;
        let (order, payment) = assemble(draft, platform, self.settings.commission_bps);

        // 6. Stock hold for every item across all shops
        tracing::info!(step = order_creation::STEP_HOLD_STOCK, "saga step started");
        let lines = order.stock_lines();
        self.services
            .stock
            .hold(&lines)
            .await
            .map_err(|err| OrderSagaError::StockConflict(err.to_string()))?;
        log.register(Compensation::RollbackStock { lines });

        // 7-8. Persist and initiate payment as one step
        let initiation = self.persist_and_initiate(&order, &payment).await?;

        Ok(OrderCreated {
            order_id: order.id,
            code: order.code,
            grand_total: order.grand_total,
            status: ShopOrderStatus::initial(order.payment_method.method_type),
            payment_url: initiation.redirect_url().map(str::to_string),
        })
    }

    async fn fetch_catalog(&self, items: &[CartItem]) -> Result<Vec<PricedLine>> {
        tracing::debug!(
            step = order_creation::STEP_FETCH_CATALOG,
            skus = items.len(),
            "saga step started"
        );
        let catalog = self.services.catalog.as_ref();
        let lookup_futures: Vec<_> = items
            .iter()
            .map(|item| async move { (&item.sku_id, catalog.sku_snapshot(&item.sku_id).await) })
            .collect();
        let mut lookups = stream::iter(lookup_futures)
            .buffer_unordered(self.settings.catalog_concurrency.max(1));

        let mut snapshots: HashMap<SkuId, SkuSnapshot> = HashMap::with_capacity(items.len());
        while let Some((sku_id, result)) = lookups.next().await {
            let snapshot = result.map_err(|err| match err {
                CatalogError::SkuNotFound(sku_id) => {
                    OrderSagaError::InvalidRequest(format!("Unknown SKU: {sku_id}"))
                }
                CatalogError::Unavailable(msg) => OrderSagaError::CatalogUnavailable(msg),
            })?;
            snapshots.insert(sku_id.clone(), snapshot);
        }

        items
            .iter()
            .map(|item| -> Result<PricedLine> {
                let sku = snapshots.remove(&item.sku_id).ok_or_else(|| {
                    OrderSagaError::InvalidRequest(format!("Unknown SKU: {}", item.sku_id))
                })?;
                Ok(PricedLine {
                    sku,
                    quantity: item.quantity,
                })
            })
            .collect()
    }

    async fn resolve_payment_method(&self, command: &CreateOrder) -> Result<PaymentMethodSnapshot> {
        tracing::debug!(
            step = order_creation::STEP_RESOLVE_PAYMENT_METHOD,
            "saga step started"
        );
        self.services
            .payment
            .payment_method(&command.payment_method_id)
            .await
            .map_err(|err| match err {
                PaymentError::UnknownMethod(_) | PaymentError::MethodInactive(_) => {
                    OrderSagaError::InvalidRequest(err.to_string())
                }
                PaymentError::Gateway(msg) => OrderSagaError::PaymentGateway(msg),
            })
    }

    /// Prices and reserves every selected voucher, mutating shop order totals
    /// for shop vouchers and returning the platform-funded ones.
    async fn apply_vouchers(
        &self,
        draft: &mut Draft,
        log: &mut CompensationLog,
    ) -> Result<PlatformVouchers> {
        for shop in draft.shop_orders.iter_mut() {
            let Some(voucher_id) = draft.command.shop_voucher_for(&shop.shop_id) else {
                continue;
            };
            let voucher = self.services.vouchers.voucher(voucher_id).await?;
            if !voucher.is_owned_by_shop(&shop.shop_id) {
                return Err(not_applicable(
                    &voucher,
                    format!("not issued by shop {}", shop.shop_id),
                ));
            }
            ensure_applies_to(&voucher, AppliesTo::OrderTotal)?;

            let discount = compute_discount(&voucher, shop.subtotal, shop.subtotal)?;
            let applied = self
                .reserve_voucher(&voucher, &draft.user_id, discount, log)
                .await?;
            shop.shop_voucher = Some(applied);
            shop.total_discount = discount;
            shop.total_amount = shop.subtotal + shop.shipping_fee - discount;
        }

        let subtotal: Money = draft.shop_orders.iter().map(|s| s.subtotal).sum();
        let shop_discount: Money = draft.shop_orders.iter().map(|s| s.total_discount).sum();
        let shipping_total: Money = draft.shop_orders.iter().map(|s| s.shipping_fee).sum();
        let mut platform = PlatformVouchers::default();

        if let Some(voucher_id) = &draft.command.platform_order_voucher {
            let voucher = self.services.vouchers.voucher(voucher_id).await?;
            ensure_platform(&voucher)?;
            ensure_applies_to(&voucher, AppliesTo::OrderTotal)?;
            let discount = compute_discount(&voucher, subtotal, subtotal - shop_discount)?;
            platform.order = Some(
                self.reserve_voucher(&voucher, &draft.user_id, discount, log)
                    .await?,
            );
        }

        if let Some(voucher_id) = &draft.command.platform_shipping_voucher {
            let voucher = self.services.vouchers.voucher(voucher_id).await?;
            ensure_platform(&voucher)?;
            ensure_applies_to(&voucher, AppliesTo::ShippingFee)?;
            let discount = compute_discount(&voucher, subtotal, shipping_total)?;
            platform.shipping = Some(
                self.reserve_voucher(&voucher, &draft.user_id, discount, log)
                    .await?,
            );
        }

        Ok(platform)
    }

    async fn reserve_voucher(
        &self,
        voucher: &Voucher,
        user_id: &UserId,
        discount: Money,
        log: &mut CompensationLog,
    ) -> Result<AppliedVoucher> {
        self.services
            .vouchers
            .reserve(&voucher.id, user_id, discount)
            .await?;
        log.register(Compensation::ReleaseVoucher {
            voucher_id: voucher.id.clone(),
            user_id: user_id.clone(),
        });
        Ok(AppliedVoucher {
            voucher_id: voucher.id.clone(),
            code: voucher.code.clone(),
            discount,
        })
    }

    /// Writes the order tree and payment in one transaction and registers
    /// the payment with the gateway before committing.
    ///
    /// Nothing is committed unless the gateway accepted the payment.
    async fn persist_and_initiate(
        &self,
        order: &Order,
        payment: &PaymentTransaction,
    ) -> Result<PaymentInitiation> {
        tracing::info!(step = order_creation::STEP_PERSIST_ORDER, "saga step started");
        let mut tx = self.store.begin().await?;
        let staged = match tx.insert_order(order).await {
            Ok(()) => tx.insert_payment(payment).await,
            Err(err) => Err(err),
        };
        if let Err(err) = staged {
            discard(tx).await;
            return Err(err.into());
        }

        tracing::info!(step = order_creation::STEP_INITIATE_PAYMENT, "saga step started");
        let request = payment_request(order, payment);
        let initiation = match self.services.payment.initiate_payment(&request).await {
            Ok(initiation) => initiation,
            Err(err) => {
                discard(tx).await;
                return Err(OrderSagaError::PaymentGateway(err.to_string()));
            }
        };

        if let Err(err) = tx.commit().await {
            tracing::warn!(
                transaction_id = %payment.id,
                order_id = %order.id,
                error = %err,
                "gateway accepted payment but the order commit failed"
            );
            return Err(err.into());
        }
        Ok(initiation)
    }
}

async fn discard(tx: Box<dyn OrderTransaction>) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(error = %err, "order transaction rollback failed");
    }
}

fn check_stock(lines: &[PricedLine]) -> Result<()> {
    for line in lines {
        if line.quantity > line.sku.available {
            return Err(OrderSagaError::InsufficientStock {
                sku_id: line.sku.sku_id.clone(),
                available: line.sku.available,
                requested: line.quantity,
            });
        }
    }
    Ok(())
}

/// Builds one shop order per distinct shop, in the order shops first appear
/// in the cart.
fn group_by_shop(
    order_id: OrderId,
    lines: &[PricedLine],
    status: ShopOrderStatus,
    shipping_fee: Money,
    at: DateTime<Utc>,
) -> Vec<ShopOrder> {
    let mut shop_orders: Vec<ShopOrder> = Vec::new();
    let mut positions: HashMap<ShopId, usize> = HashMap::new();

    for line in lines {
        let position = *positions.entry(line.sku.shop_id.clone()).or_insert_with(|| {
            shop_orders.push(empty_shop_order(
                order_id,
                &line.sku.shop_id,
                status,
                shipping_fee,
                at,
            ));
            shop_orders.len() - 1
        });
        let shop = &mut shop_orders[position];
        let total_price = line.sku.price.multiply(line.quantity);

        shop.items.push(OrderItem {
            id: OrderItemId::new(),
            shop_order_id: shop.id,
            product_id: line.sku.product_id.clone(),
            sku_id: line.sku.sku_id.clone(),
            quantity: line.quantity,
            original_unit_price: line.sku.price,
            final_unit_price: line.sku.price,
            total_price,
            snapshot: line.sku.item_snapshot(),
            promotion_snapshot: None,
            reviewed: false,
        });
        shop.subtotal += total_price;
        shop.total_amount = shop.subtotal + shop.shipping_fee;
    }

    shop_orders
}

fn empty_shop_order(
    order_id: OrderId,
    shop_id: &ShopId,
    status: ShopOrderStatus,
    shipping_fee: Money,
    at: DateTime<Utc>,
) -> ShopOrder {
    ShopOrder {
        id: ShopOrderId::new(),
        order_id,
        code: shop_order_code(shop_id),
        shop_id: shop_id.clone(),
        status,
        subtotal: Money::zero(),
        shipping_fee,
        total_discount: Money::zero(),
        total_amount: shipping_fee,
        shop_voucher: None,
        shipping_method: None,
        tracking_code: None,
        paid_at: None,
        processing_at: (status == ShopOrderStatus::Processing).then_some(at),
        shipped_at: None,
        completed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
        created_at: at,
        updated_at: at,
        items: Vec::new(),
    }
}

fn ensure_shop_vouchers_target_cart(command: &CreateOrder, shop_orders: &[ShopOrder]) -> Result<()> {
    for selection in &command.shop_vouchers {
        if !shop_orders.iter().any(|s| s.shop_id == selection.shop_id) {
            return Err(OrderSagaError::InvalidRequest(format!(
                "Voucher {} selected for shop {} which has no items in the cart",
                selection.voucher_id, selection.shop_id
            )));
        }
    }
    Ok(())
}

fn not_applicable(voucher: &Voucher, reason: impl Into<String>) -> OrderSagaError {
    OrderSagaError::VoucherNotApplicable {
        code: voucher.code.clone(),
        reason: reason.into(),
    }
}

fn ensure_platform(voucher: &Voucher) -> Result<()> {
    if !voucher.is_platform() {
        return Err(not_applicable(voucher, "not a platform voucher"));
    }
    Ok(())
}

fn ensure_applies_to(voucher: &Voucher, target: AppliesTo) -> Result<()> {
    if voucher.applies_to != target {
        let reason = match target {
            AppliesTo::OrderTotal => "does not apply to the order total",
            AppliesTo::ShippingFee => "does not apply to the shipping fee",
        };
        return Err(not_applicable(voucher, reason));
    }
    Ok(())
}

/// Computes order totals and the settlement breakdown, producing the records
/// to persist.
fn assemble(
    draft: &Draft,
    platform: PlatformVouchers,
    commission_bps: u32,
) -> (Order, PaymentTransaction) {
    let order_discount = platform.order.as_ref().map_or(Money::zero(), |v| v.discount);
    let shipping_discount = platform
        .shipping
        .as_ref()
        .map_or(Money::zero(), |v| v.discount);

    let shares = allocate_platform_discounts(&draft.shop_orders, order_discount, shipping_discount);
    let settlements = draft
        .shop_orders
        .iter()
        .zip(&shares)
        .map(|(shop, share)| settlement_for(shop, share, commission_bps))
        .collect();

    let subtotal: Money = draft.shop_orders.iter().map(|s| s.subtotal).sum();
    let total_shipping_fee: Money = draft.shop_orders.iter().map(|s| s.shipping_fee).sum();
    let shop_discount: Money = draft.shop_orders.iter().map(|s| s.total_discount).sum();
    let total_discount = shop_discount + order_discount + shipping_discount;
    let grand_total = subtotal + total_shipping_fee - total_discount;
    let at = draft.created_at;

    let order = Order {
        id: draft.order_id,
        code: order_code(at),
        user_id: draft.user_id.clone(),
        subtotal,
        total_shipping_fee,
        total_discount,
        grand_total,
        platform_order_voucher: platform.order,
        platform_shipping_voucher: platform.shipping,
        shipping_address: draft.command.shipping_address.clone(),
        payment_method: draft.method.clone(),
        note: draft.command.note.clone(),
        created_at: at,
        updated_at: at,
        shop_orders: draft.shop_orders.clone(),
    };

    let payment = PaymentTransaction {
        id: TransactionId::new(),
        order_id: draft.order_id,
        amount: grand_total,
        method_id: draft.method.id.clone(),
        method_type: draft.method.method_type,
        status: PaymentStatus::Pending,
        settlements,
        created_at: at,
        updated_at: at,
    };

    (order, payment)
}

fn payment_request(order: &Order, payment: &PaymentTransaction) -> PaymentRequest {
    let address = &order.shipping_address;
    PaymentRequest {
        order_id: order.id,
        order_code: order.code.clone(),
        transaction_id: payment.id,
        amount: payment.amount,
        method: order.payment_method.clone(),
        settlements: payment.settlements.clone(),
        items: order
            .items()
            .map(|item| PaymentItemLine {
                product_id: item.product_id.clone(),
                sku_id: item.sku_id.clone(),
                name: item.snapshot.product_name.clone(),
                image_url: item.snapshot.image_url.clone(),
                quantity: item.quantity,
                unit_price: item.final_unit_price,
            })
            .collect(),
        user: PaymentUserInfo {
            user_id: order.user_id.clone(),
            full_name: address.full_name.clone(),
            phone: address.phone.clone(),
            email: address.email.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        InMemoryInventoryService, InMemoryPaymentService, InMemoryVoucherLedger, SkuListing,
        StockLevel,
    };
    use chrono::Duration;
    use domain::{Audience, Discount, PaymentMethodType, ShippingAddress, VoucherOwner};
    use order_store::InMemoryOrderStore;

    async fn setup() -> (
        OrderOrchestrator,
        InMemoryOrderStore,
        InMemoryInventoryService,
        InMemoryPaymentService,
        InMemoryVoucherLedger,
    ) {
        let store = InMemoryOrderStore::new();
        let inventory = InMemoryInventoryService::new();
        let payment = InMemoryPaymentService::new();
        let vouchers = InMemoryVoucherLedger::new();

        inventory
            .add_sku(SkuListing::new(
                "sku-a",
                "prod-a",
                "shop-a",
                "Keyboard",
                Money::new(100_000),
                10,
            ))
            .await;
        inventory
            .add_sku(SkuListing::new(
                "sku-b",
                "prod-b",
                "shop-b",
                "Mouse",
                Money::new(50_000),
                10,
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

        (orchestrator, store, inventory, payment, vouchers)
    }

    fn address() -> ShippingAddress {
        ShippingAddress::new("Jane Doe", "0900000000", "1 Main St")
    }

    fn voucher(id: &str, owner: VoucherOwner, discount: Discount, applies_to: AppliesTo) -> Voucher {
        let now = Utc::now();
        Voucher {
            id: id.into(),
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

    fn reserved(level: Option<StockLevel>) -> u32 {
        level.map_or(0, |l| l.reserved)
    }

    #[tokio::test]
    async fn test_online_order_awaits_payment() {
        let (orchestrator, store, inventory, _, _) = setup().await;
        let command = CreateOrder::new(
            vec![CartItem::new("sku-a", 2), CartItem::new("sku-b", 1)],
            address(),
            "vnpay",
        );

        let created = orchestrator
            .create_order(UserId::new("u1"), command)
            .await
            .unwrap();

        assert_eq!(created.status, ShopOrderStatus::AwaitingPayment);
        assert!(created.payment_url.is_some());
        // 250_000 items + 2 x 30_000 shipping
        assert_eq!(created.grand_total, Money::new(310_000));

        let order = store.get_order(created.order_id).await.unwrap();
        assert_eq!(order.shop_orders.len(), 2);
        assert_eq!(reserved(inventory.stock_level(&SkuId::new("sku-a")).await), 2);
    }

    #[tokio::test]
    async fn test_offline_order_starts_processing() {
        let (orchestrator, store, _, _, _) = setup().await;
        let command = CreateOrder::new(vec![CartItem::new("sku-a", 1)], address(), "cod");

        let created = orchestrator
            .create_order(UserId::new("u1"), command)
            .await
            .unwrap();

        assert_eq!(created.status, ShopOrderStatus::Processing);
        assert_eq!(created.payment_url, None);
        let order = store.get_order(created.order_id).await.unwrap();
        assert!(order.shop_orders[0].processing_at.is_some());
    }

    #[tokio::test]
    async fn test_shop_voucher_from_another_shop_is_rejected() {
        let (orchestrator, _, _, _, vouchers) = setup().await;
        vouchers
            .add_voucher(voucher(
                "shop-b-sale",
                VoucherOwner::Shop(ShopId::new("shop-b")),
                Discount::FixedAmount {
                    amount: Money::new(10_000),
                },
                AppliesTo::OrderTotal,
            ))
            .await;
        let command = CreateOrder::new(vec![CartItem::new("sku-a", 1)], address(), "vnpay")
            .with_shop_voucher("shop-a", "shop-b-sale");

        let result = orchestrator.create_order(UserId::new("u1"), command).await;
        assert!(matches!(
            result,
            Err(OrderSagaError::VoucherNotApplicable { .. })
        ));
    }

    #[tokio::test]
    async fn test_shipping_voucher_on_order_total_is_rejected() {
        let (orchestrator, _, _, _, vouchers) = setup().await;
        vouchers
            .add_voucher(voucher(
                "freeship",
                VoucherOwner::Platform,
                Discount::FixedAmount {
                    amount: Money::new(30_000),
                },
                AppliesTo::OrderTotal,
            ))
            .await;
        let command = CreateOrder::new(vec![CartItem::new("sku-a", 1)], address(), "vnpay")
            .with_platform_shipping_voucher("freeship");

        let result = orchestrator.create_order(UserId::new("u1"), command).await;
        assert!(matches!(
            result,
            Err(OrderSagaError::VoucherNotApplicable { .. })
        ));
    }

    #[tokio::test]
    async fn test_voucher_for_shop_not_in_cart() {
        let (orchestrator, _, _, _, _) = setup().await;
        let command = CreateOrder::new(vec![CartItem::new("sku-a", 1)], address(), "vnpay")
            .with_shop_voucher("shop-z", "any");

        let result = orchestrator.create_order(UserId::new("u1"), command).await;
        assert!(matches!(result, Err(OrderSagaError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_sku_and_method_are_invalid_requests() {
        let (orchestrator, _, _, _, _) = setup().await;

        let unknown_sku = CreateOrder::new(vec![CartItem::new("nope", 1)], address(), "vnpay");
        let result = orchestrator.create_order(UserId::new("u1"), unknown_sku).await;
        assert!(matches!(result, Err(OrderSagaError::InvalidRequest(_))));

        let unknown_method = CreateOrder::new(vec![CartItem::new("sku-a", 1)], address(), "bank");
        let result = orchestrator
            .create_order(UserId::new("u1"), unknown_method)
            .await;
        assert!(matches!(result, Err(OrderSagaError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_catalog_outage() {
        let (orchestrator, _, inventory, _, _) = setup().await;
        inventory.set_fail_on_lookup(true);
        let command = CreateOrder::new(vec![CartItem::new("sku-a", 1)], address(), "vnpay");

        let result = orchestrator.create_order(UserId::new("u1"), command).await;
        assert!(matches!(result, Err(OrderSagaError::CatalogUnavailable(_))));
    }

    #[test]
    fn test_group_by_shop_keeps_cart_order() {
        let line = |sku: &str, shop: &str, price: i64, quantity: u32| PricedLine {
            sku: SkuSnapshot {
                sku_id: sku.into(),
                product_id: format!("p-{sku}").into(),
                shop_id: shop.into(),
                product_name: sku.to_string(),
                image_url: None,
                attributes: Default::default(),
                price: Money::new(price),
                available: 100,
            },
            quantity,
        };
        let lines = vec![
            line("s1", "shop-b", 10_000, 1),
            line("s2", "shop-a", 20_000, 2),
            line("s3", "shop-b", 5_000, 4),
        ];

        let shops = group_by_shop(
            OrderId::new(),
            &lines,
            ShopOrderStatus::AwaitingPayment,
            Money::new(30_000),
            Utc::now(),
        );

        assert_eq!(shops.len(), 2);
        assert_eq!(shops[0].shop_id, ShopId::new("shop-b"));
        assert_eq!(shops[0].items.len(), 2);
        assert_eq!(shops[0].subtotal, Money::new(30_000));
        assert_eq!(shops[0].total_amount, Money::new(60_000));
        assert_eq!(shops[1].subtotal, Money::new(40_000));
        assert!(shops.iter().all(|s| s.items.iter().all(|i| i.shop_order_id == s.id)));
    }
}
