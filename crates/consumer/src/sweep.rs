//! Periodic sweep for payments the gateway never reported back on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::TransactionId;
use order_store::OrderStore;
use saga::{ShopOrderService, StockTaskRun};
use tokio::sync::{Mutex, watch};

use crate::broker::EventPublisher;
use crate::error::Result;
use crate::event::{PAYMENT_FAILED_TOPIC, PaymentEvent};

pub const PAYMENT_EXPIRED_REASON: &str = "payment window expired";

/// Sweep tunables.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    /// Age after which a pending online payment is treated as failed.
    pub payment_expiry: chrono::Duration,
    pub interval: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            payment_expiry: chrono::Duration::minutes(15),
            interval: Duration::from_secs(60),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// `payment.failed` events published for expired payments.
    pub synthesized: usize,
    /// Expired payments whose failure event is already waiting in the broker.
    pub in_flight: usize,
    /// Stock tasks left pending by earlier failures, re-driven.
    pub stock: StockTaskRun,
}

/// Publishes `payment.failed` for every pending online payment older than
/// the expiry, and retries stock tasks that are still pending.
///
/// The synthesized events go through the broker like gateway events, so
/// they are ordered with any real callback for the same order. A payment
/// gets one synthesized event until it leaves `PENDING`; a stalled consumer
/// does not make the sweep publish it again on every tick.
pub struct PaymentExpirySweep {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    shop_orders: ShopOrderService,
    settings: SweepSettings,
    published: Mutex<HashSet<TransactionId>>,
}

impl PaymentExpirySweep {
    pub fn new(
        store: Arc<dyn OrderStore>,
        publisher: Arc<dyn EventPublisher>,
        shop_orders: ShopOrderService,
        settings: SweepSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            shop_orders,
            settings,
            published: Mutex::new(HashSet::new()),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport> {
        let cutoff = Utc::now() - self.settings.payment_expiry;
        let expired = self.store.expired_payments(cutoff).await?;
        let mut report = SweepReport::default();

        let mut published = self.published.lock().await;
        // Payments no longer expired were resolved; forget them.
        published.retain(|id| expired.iter().any(|payment| payment.id == *id));

        for payment in expired {
            if published.contains(&payment.id) {
                report.in_flight += 1;
                continue;
            }
            let event = PaymentEvent::failed(payment.order_id, payment.id, PAYMENT_EXPIRED_REASON);
            self.publisher
                .publish(PAYMENT_FAILED_TOPIC, &event.key(), event.to_bytes()?)
                .await?;
            metrics::counter!("payment_expiry_synthesized_total").increment(1);
            tracing::info!(
                order_id = %payment.order_id,
                transaction_id = %payment.id,
                created_at = %payment.created_at,
                "payment expired, failure event published"
            );
            published.insert(payment.id);
            report.synthesized += 1;
        }
        drop(published);

        report.stock = self.shop_orders.run_stock_tasks(None).await?;
        if !report.stock.is_clean() {
            tracing::warn!(
                failed = report.stock.failed.len(),
                "stock tasks still pending after sweep"
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "payment expiry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("payment expiry sweep stopped");
    }
}
