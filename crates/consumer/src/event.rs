//! Payment outcome events published by the payment gateway integration.

use common::{OrderId, TransactionId};
use order_store::PaymentOutcome;
use serde::{Deserialize, Serialize};

use crate::error::{ConsumerError, Result};

pub const PAYMENT_COMPLETED_TOPIC: &str = "payment.completed";
pub const PAYMENT_FAILED_TOPIC: &str = "payment.failed";

/// The topics this consumer subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentTopic {
    Completed,
    Failed,
}

impl PaymentTopic {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            PAYMENT_COMPLETED_TOPIC => Some(PaymentTopic::Completed),
            PAYMENT_FAILED_TOPIC => Some(PaymentTopic::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentTopic::Completed => PAYMENT_COMPLETED_TOPIC,
            PaymentTopic::Failed => PAYMENT_FAILED_TOPIC,
        }
    }

    /// The outcome this topic reports.
    ///
    /// Failures always cancel with the same reason, whatever the gateway
    /// said; the gateway's reason is only logged.
    pub fn outcome(&self) -> PaymentOutcome {
        match self {
            PaymentTopic::Completed => PaymentOutcome::Succeeded,
            PaymentTopic::Failed => PaymentOutcome::failed(),
        }
    }
}

impl std::fmt::Display for PaymentTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of both payment topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub order_id: OrderId,
    pub transaction_id: TransactionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PaymentEvent {
    pub fn completed(order_id: OrderId, transaction_id: TransactionId) -> Self {
        Self {
            order_id,
            transaction_id,
            reason: None,
        }
    }

    pub fn failed(
        order_id: OrderId,
        transaction_id: TransactionId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            transaction_id,
            reason: Some(reason.into()),
        }
    }

    /// Partition key: every event of one order lands on the same partition.
    pub fn key(&self) -> String {
        self.order_id.to_string()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(ConsumerError::Encode)
    }

    pub fn decode(topic: PaymentTopic, payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|source| ConsumerError::Decode {
            topic: topic.to_string(),
            source,
        })
    }
}
