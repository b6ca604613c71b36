use chrono::Utc;
use common::{
    OrderId, OrderItemId, PaymentMethodId, ProductId, ShopId, ShopOrderId, SkuId, TransactionId,
    UserId,
};
use domain::{
    ItemSnapshot, Money, Order, OrderItem, PaymentMethodSnapshot, PaymentMethodType,
    PaymentStatus, PaymentTransaction, ShippingAddress, ShopOrder, ShopOrderStatus,
};

pub fn order(method: PaymentMethodType, shops: usize) -> Order {
    let now = Utc::now();
    let order_id = OrderId::new();
    let shop_orders: Vec<ShopOrder> = (0..shops)
        .map(|i| {
            let id = ShopOrderId::new();
            ShopOrder {
                id,
                order_id,
                code: format!("SHOP-{i}"),
                shop_id: ShopId::new(format!("shop-{i}")),
                status: ShopOrderStatus::initial(method),
                subtotal: Money::new(100_000),
                shipping_fee: Money::new(30_000),
                total_discount: Money::zero(),
                total_amount: Money::new(130_000),
                shop_voucher: None,
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
                items: vec![OrderItem {
                    id: OrderItemId::new(),
                    shop_order_id: id,
                    product_id: ProductId::new(format!("prod-{i}")),
                    sku_id: SkuId::new(format!("sku-{i}")),
                    quantity: 2,
                    original_unit_price: Money::new(50_000),
                    final_unit_price: Money::new(50_000),
                    total_price: Money::new(100_000),
                    snapshot: ItemSnapshot::default(),
                    promotion_snapshot: None,
                    reviewed: false,
                }],
            }
        })
        .collect();

    let subtotal: Money = shop_orders.iter().map(|s| s.subtotal).sum();
    let shipping: Money = shop_orders.iter().map(|s| s.shipping_fee).sum();
    Order {
        id: order_id,
        code: domain::order_code(now),
        user_id: UserId::new("user-1"),
        subtotal,
        total_shipping_fee: shipping,
        total_discount: Money::zero(),
        grand_total: subtotal + shipping,
        platform_order_voucher: None,
        platform_shipping_voucher: None,
        shipping_address: ShippingAddress::new("A", "0900", "1 Street"),
        payment_method: PaymentMethodSnapshot {
            id: PaymentMethodId::new("pm"),
            name: "Test".to_string(),
            method_type: method,
        },
        note: None,
        created_at: now,
        updated_at: now,
        shop_orders,
    }
}

pub fn payment(order: &Order) -> PaymentTransaction {
    PaymentTransaction {
        id: TransactionId::new(),
        order_id: order.id,
        amount: order.grand_total,
        method_id: order.payment_method.id.clone(),
        method_type: order.payment_method.method_type,
        status: PaymentStatus::Pending,
        settlements: Vec::new(),
        created_at: order.created_at,
        updated_at: order.created_at,
    }
}
