//! Shop order state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::StockAction;
use super::value_objects::PaymentMethodType;

/// The status of a shop order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──► AwaitingPayment ──┬──► Processing ──┬──► Shipped ──► Completed ──► Refunded
///           │                      │                 │
///           └──► Processing        └──► Cancelled ◄──┘
/// ```
///
/// Entering `Shipped` commits the held stock; entering `Cancelled` rolls it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShopOrderStatus {
    /// Placeholder before the payment method is known.
    #[default]
    Pending,

    /// Waiting for the online payment gateway to settle.
    AwaitingPayment,

    /// Paid (or cash on delivery) and being prepared by the shop.
    Processing,

    /// Handed over to the carrier.
    Shipped,

    /// Receipt confirmed.
    Completed,

    /// Cancelled before shipping (terminal state).
    Cancelled,

    /// Refunded after completion (terminal state).
    Refunded,
}

impl ShopOrderStatus {
    /// Status a freshly created shop order starts in.
    ///
    /// Offline payment skips the wait for the gateway.
    pub fn initial(method: PaymentMethodType) -> Self {
        match method {
            PaymentMethodType::Online => ShopOrderStatus::AwaitingPayment,
            PaymentMethodType::Offline => ShopOrderStatus::Processing,
        }
    }

    /// Statuses reachable from this one in a single step.
    pub fn allowed_targets(&self) -> &'static [ShopOrderStatus] {
        use ShopOrderStatus::*;
        match self {
            Pending => &[AwaitingPayment, Processing],
            AwaitingPayment => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Completed],
            Completed => &[Refunded],
            Cancelled => &[],
            Refunded => &[],
        }
    }

    /// Returns true if a transition to `to` is legal.
    pub fn can_transition_to(&self, to: ShopOrderStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// Validates a transition to `to`.
    pub fn transition(self, to: ShopOrderStatus) -> Result<Transition, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(Transition { from: self, to })
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Returns the status name as stored and exchanged on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShopOrderStatus::Pending => "PENDING",
            ShopOrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            ShopOrderStatus::Processing => "PROCESSING",
            ShopOrderStatus::Shipped => "SHIPPED",
            ShopOrderStatus::Completed => "COMPLETED",
            ShopOrderStatus::Cancelled => "CANCELLED",
            ShopOrderStatus::Refunded => "REFUNDED",
        }
    }

    pub const ALL: [ShopOrderStatus; 7] = [
        ShopOrderStatus::Pending,
        ShopOrderStatus::AwaitingPayment,
        ShopOrderStatus::Processing,
        ShopOrderStatus::Shipped,
        ShopOrderStatus::Completed,
        ShopOrderStatus::Cancelled,
        ShopOrderStatus::Refunded,
    ];
}

impl std::fmt::Display for ShopOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ShopOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShopOrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown shop order status: {s}"))
    }
}

/// A validated status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ShopOrderStatus,
    pub to: ShopOrderStatus,
}

impl Transition {
    /// Stock operation that must follow this transition, if any.
    pub fn stock_effect(&self) -> Option<StockAction> {
        match self.to {
            ShopOrderStatus::Shipped => Some(StockAction::Commit),
            ShopOrderStatus::Cancelled => Some(StockAction::Rollback),
            ShopOrderStatus::Pending
            | ShopOrderStatus::AwaitingPayment
            | ShopOrderStatus::Processing
            | ShopOrderStatus::Completed
            | ShopOrderStatus::Refunded => None,
        }
    }

    /// Returns true if this transition records a cancellation reason.
    pub fn records_reason(&self) -> bool {
        self.to == ShopOrderStatus::Cancelled
    }
}

/// A status change not present in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ShopOrderStatus,
    pub to: ShopOrderStatus,
}
