//! Consumer error types.

use common::OrderId;
use order_store::StoreError;
use saga::OrderSagaError;
use thiserror::Error;

/// Errors that can occur while consuming payment events.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The payload is not a valid payment event.
    #[error("failed to decode {topic} event: {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// An outgoing event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    /// The message arrived on a topic this consumer does not handle.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Reading or writing persisted orders failed.
    #[error("order store error: {0}")]
    Store(#[from] StoreError),

    /// Applying the payment outcome failed.
    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] OrderSagaError),

    /// The status change committed but some inventory calls did not.
    #[error("{pending} stock task(s) for order {order_id} still pending: {error}")]
    Stock {
        order_id: OrderId,
        pending: usize,
        error: String,
    },

    /// The broker rejected a poll, commit or publish.
    #[error("broker error: {0}")]
    Broker(String),
}

impl ConsumerError {
    /// Whether redelivering the same message can succeed.
    ///
    /// Malformed messages never will and are skipped instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConsumerError::Decode { .. } | ConsumerError::UnknownTopic(_)
        )
    }
}

/// Result type for consumer operations.
pub type Result<T> = std::result::Result<T, ConsumerError>;
