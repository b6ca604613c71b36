//! Application wiring, built once at startup and shared by every handler.

use std::sync::Arc;

use consumer::{
    ConsumerSettings, InMemoryBroker, PaymentEventConsumer, PaymentExpirySweep,
    PaymentOutcomeHandler, SweepSettings,
};
use order_store::OrderStore;
use saga::{OrderOrchestrator, SagaServices, ShopOrderService};

use crate::config::Config;

/// Handles to the store and services, passed explicitly to everything that
/// needs them.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn OrderStore>,
    pub orchestrator: Arc<OrderOrchestrator>,
    pub shop_orders: ShopOrderService,
    pub broker: InMemoryBroker,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn OrderStore>,
        services: SagaServices,
        broker: InMemoryBroker,
        config: &Config,
    ) -> Self {
        let shop_orders = ShopOrderService::new(store.clone(), services.stock.clone());
        let orchestrator = Arc::new(OrderOrchestrator::new(
            store.clone(),
            services,
            config.saga_settings(),
        ));
        Self {
            store,
            orchestrator,
            shop_orders,
            broker,
        }
    }

    /// Consumer of the payment topics on this context's broker.
    pub fn payment_consumer(&self, settings: ConsumerSettings) -> PaymentEventConsumer {
        PaymentEventConsumer::new(
            Arc::new(self.broker.clone()),
            PaymentOutcomeHandler::new(self.shop_orders.clone()),
            settings,
        )
    }

    /// Sweep publishing payment failures to this context's broker.
    pub fn expiry_sweep(&self, settings: SweepSettings) -> PaymentExpirySweep {
        PaymentExpirySweep::new(
            self.store.clone(),
            Arc::new(self.broker.clone()),
            self.shop_orders.clone(),
            settings,
        )
    }
}
