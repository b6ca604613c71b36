//! In-process catalog, inventory, payment and voucher services.
//!
//! The server runs against these when no external services are wired in;
//! the catalog below is what a fresh instance sells.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{ShopId, VoucherId};
use domain::{AppliesTo, Audience, Discount, Money, PaymentMethodType, Voucher, VoucherOwner};
use saga::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryVoucherLedger, SagaServices,
    SkuListing,
};

/// In-memory boundary services sharing one inventory.
#[derive(Clone, Default)]
pub struct DemoServices {
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
    pub vouchers: InMemoryVoucherLedger,
}

impl DemoServices {
    /// Services with the sample catalog, payment methods and vouchers.
    pub async fn seeded() -> Self {
        let services = Self::default();

        let listings = [
            SkuListing::new(
                "kb-87-brown",
                "kb-87",
                "gear-house",
                "87-key mechanical keyboard",
                Money::new(1_250_000),
                40,
            )
            .with_attribute("switch", "brown"),
            SkuListing::new(
                "kb-87-red",
                "kb-87",
                "gear-house",
                "87-key mechanical keyboard",
                Money::new(1_250_000),
                25,
            )
            .with_attribute("switch", "red"),
            SkuListing::new(
                "mouse-wl",
                "mouse-wl",
                "gear-house",
                "Wireless mouse",
                Money::new(350_000),
                100,
            ),
            SkuListing::new(
                "book-rust",
                "book-rust",
                "paper-trail",
                "Programming Rust",
                Money::new(680_000),
                15,
            ),
        ];
        for listing in listings {
            services.inventory.add_sku(listing).await;
        }

        services
            .payment
            .add_method("vnpay", "VNPay", PaymentMethodType::Online)
            .await;
        services
            .payment
            .add_method("cod", "Cash on delivery", PaymentMethodType::Offline)
            .await;

        let now = Utc::now();
        let voucher = |id: &str, owner, discount, applies_to, min_purchase| Voucher {
            id: VoucherId::new(id),
            code: id.to_uppercase(),
            owner,
            discount,
            min_purchase: Money::new(min_purchase),
            applies_to,
            audience: Audience::Public,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(365),
            total_quantity: 1_000,
            used_quantity: 0,
            max_usage_per_user: 1,
            active: true,
        };
        let vouchers = [
            voucher(
                "gear10",
                VoucherOwner::Shop(ShopId::new("gear-house")),
                Discount::Percentage {
                    rate_bps: 1_000,
                    max_discount: Some(Money::new(50_000)),
                },
                AppliesTo::OrderTotal,
                0,
            ),
            voucher(
                "site20k",
                VoucherOwner::Platform,
                Discount::FixedAmount {
                    amount: Money::new(20_000),
                },
                AppliesTo::OrderTotal,
                200_000,
            ),
            voucher(
                "freeship",
                VoucherOwner::Platform,
                Discount::FixedAmount {
                    amount: Money::new(30_000),
                },
                AppliesTo::ShippingFee,
                0,
            ),
        ];
        for v in vouchers {
            services.vouchers.add_voucher(v).await;
        }

        tracing::info!("demo catalog seeded");
        services
    }

    pub fn saga_services(&self) -> SagaServices {
        SagaServices {
            catalog: Arc::new(self.inventory.clone()),
            stock: Arc::new(self.inventory.clone()),
            payment: Arc::new(self.payment.clone()),
            vouchers: Arc::new(self.vouchers.clone()),
        }
    }
}
