//! Asynchronous reconciliation of orders with payment outcomes.
//!
//! - [`PaymentEvent`] payloads on the `payment.completed` and
//!   `payment.failed` topics
//! - [`EventSource`] / [`EventPublisher`] broker traits with manual commit,
//!   and the [`InMemoryBroker`] implementation
//! - [`PaymentOutcomeHandler`] applying one event to the order store
//! - [`PaymentEventConsumer`] running one sequential loop per partition
//! - [`PaymentExpirySweep`] failing payments the gateway never reported on

pub mod broker;
pub mod error;
pub mod event;
pub mod handler;
pub mod processor;
pub mod sweep;

pub use broker::{Delivery, EventPublisher, EventSource, InMemoryBroker};
pub use error::{ConsumerError, Result};
pub use event::{PAYMENT_COMPLETED_TOPIC, PAYMENT_FAILED_TOPIC, PaymentEvent, PaymentTopic};
pub use handler::{HandleOutcome, PaymentOutcomeHandler};
pub use processor::{ConsumerSettings, PaymentEventConsumer};
pub use sweep::{PAYMENT_EXPIRED_REASON, PaymentExpirySweep, SweepReport, SweepSettings};
