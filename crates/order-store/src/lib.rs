//! Persistence for the order tree.
//!
//! The [`OrderStore`] trait is the only way the saga, the admin service and
//! the payment consumer touch persisted orders. Two implementations are
//! provided: [`InMemoryOrderStore`] for tests and single-process runs, and
//! [`PostgresOrderStore`] backed by sqlx.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{
    OrderStore, OrderTransaction, PAYMENT_FAILED_REASON, PaymentOutcome, PaymentReconciliation,
    TransitionOutcome, default_stock_task_lease,
};

fn record_transition(transition: &domain::Transition) {
    metrics::counter!(
        "shop_order_transitions_total",
        "from" => transition.from.as_str(),
        "to" => transition.to.as_str()
    )
    .increment(1);
    tracing::debug!(from = %transition.from, to = %transition.to, "shop order transitioned");
}
