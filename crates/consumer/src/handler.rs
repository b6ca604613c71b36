//! Applies payment outcome events to persisted orders.

use saga::{OrderSagaError, ShopOrderService};

use crate::broker::Delivery;
use crate::error::{ConsumerError, Result};
use crate::event::{PaymentEvent, PaymentTopic};

/// What handling one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Shop orders left `AWAITING_PAYMENT`.
    Applied { shop_orders: usize },
    /// The outcome had already been applied; only leftover stock work ran.
    AlreadyApplied,
    /// No order with that id exists.
    UnknownOrder,
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleOutcome::Applied { .. } => "applied",
            HandleOutcome::AlreadyApplied => "already_applied",
            HandleOutcome::UnknownOrder => "unknown_order",
        }
    }
}

/// Reconciles shop orders with the gateway's final payment outcome.
///
/// Safe to call repeatedly with the same event: a second call finds no
/// shop order awaiting payment and only re-drives stock tasks that are
/// still pending.
#[derive(Clone)]
pub struct PaymentOutcomeHandler {
    shop_orders: ShopOrderService,
}

impl PaymentOutcomeHandler {
    pub fn new(shop_orders: ShopOrderService) -> Self {
        Self { shop_orders }
    }

    /// Decodes a broker message and handles it.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<HandleOutcome> {
        let topic = PaymentTopic::from_name(&delivery.topic)
            .ok_or_else(|| ConsumerError::UnknownTopic(delivery.topic.clone()))?;
        let event = PaymentEvent::decode(topic, &delivery.payload)?;
        self.handle(topic, &event).await
    }

    /// Applies one payment event.
    ///
    /// Returns an error when the event must be redelivered: the status
    /// change could not be written, or it was written but some inventory
    /// call failed.
    #[tracing::instrument(
        skip(self, event),
        fields(order_id = %event.order_id, transaction_id = %event.transaction_id)
    )]
    pub async fn handle(&self, topic: PaymentTopic, event: &PaymentEvent) -> Result<HandleOutcome> {
        if let Some(reason) = &event.reason {
            tracing::info!(%topic, gateway_reason = %reason, "payment event received");
        } else {
            tracing::info!(%topic, "payment event received");
        }

        let settled = match self
            .shop_orders
            .reconcile_payment(event.order_id, topic.outcome())
            .await
        {
            Ok(settled) => settled,
            Err(OrderSagaError::NotFound { entity, id }) => {
                tracing::warn!(entity, %id, "payment event for unknown order, skipping");
                return Ok(HandleOutcome::UnknownOrder);
            }
            Err(err) => return Err(err.into()),
        };

        if let Some((_, error)) = settled.stock.failed.first() {
            return Err(ConsumerError::Stock {
                order_id: event.order_id,
                pending: settled.stock.failed.len(),
                error: error.clone(),
            });
        }

        if settled.was_noop() {
            Ok(HandleOutcome::AlreadyApplied)
        } else {
            Ok(HandleOutcome::Applied {
                shop_orders: settled.transitioned.len(),
            })
        }
    }
}
