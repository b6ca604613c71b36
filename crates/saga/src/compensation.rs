//! Compensation log for a single saga invocation.
//!
//! Every step that performs an external side effect registers the action
//! that undoes it. On failure the log is unwound newest first; on success
//! it is discarded.

use common::{UserId, VoucherId};
use domain::StockLine;

use crate::services::{StockReservationClient, VoucherLedger};
use crate::state::SagaState;

/// An action that undoes one completed side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Gives back a voucher usage unit taken by `reserve`.
    ReleaseVoucher {
        voucher_id: VoucherId,
        user_id: UserId,
    },
    /// Releases a stock hold.
    RollbackStock { lines: Vec<StockLine> },
}

impl Compensation {
    pub fn action(&self) -> &'static str {
        match self {
            Compensation::ReleaseVoucher { .. } => "release_voucher",
            Compensation::RollbackStock { .. } => "rollback_stock",
        }
    }
}

/// A compensation that could not be carried out.
#[derive(Debug, Clone)]
pub struct FailedCompensation {
    pub compensation: Compensation,
    pub error: String,
}

/// What unwinding the log achieved.
#[derive(Debug, Clone, Default)]
pub struct UnwindReport {
    pub completed: usize,
    pub failed: Vec<FailedCompensation>,
}

impl UnwindReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Stack of compensations local to one saga invocation.
#[derive(Debug, Default)]
pub struct CompensationLog {
    entries: Vec<Compensation>,
    state: SagaState,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending compensations, oldest first.
    pub fn entries(&self) -> &[Compensation] {
        &self.entries
    }

    /// Records the undo action of a side effect that just succeeded.
    pub fn register(&mut self, compensation: Compensation) {
        debug_assert!(self.state.accepts_compensations());
        tracing::debug!(action = compensation.action(), "compensation registered");
        self.entries.push(compensation);
    }

    /// Marks the saga successful and drops every registered compensation.
    pub fn complete(&mut self) {
        self.entries.clear();
        self.state = SagaState::Completed;
    }

    /// Runs every registered compensation, newest first.
    ///
    /// A failing compensation is logged and recorded, and the remaining ones
    /// still run.
    pub async fn unwind(
        &mut self,
        stock: &dyn StockReservationClient,
        vouchers: &dyn VoucherLedger,
    ) -> UnwindReport {
        self.state = SagaState::Compensating;
        let mut report = UnwindReport::default();

        while let Some(compensation) = self.entries.pop() {
            let result = match &compensation {
                Compensation::ReleaseVoucher {
                    voucher_id,
                    user_id,
                } => vouchers
                    .release(voucher_id, user_id)
                    .await
                    .map_err(|e| e.to_string()),
                Compensation::RollbackStock { lines } => {
                    stock.rollback(lines).await.map_err(|e| e.to_string())
                }
            };

            let outcome = if result.is_ok() { "success" } else { "failure" };
            metrics::counter!(
                "order_saga_compensations_total",
                "action" => compensation.action(),
                "outcome" => outcome
            )
            .increment(1);

            match result {
                Ok(()) => {
                    tracing::info!(action = compensation.action(), "compensation applied");
                    report.completed += 1;
                }
                Err(error) => {
                    tracing::error!(
                        action = compensation.action(),
                        %error,
                        "compensation failed"
                    );
                    report.failed.push(FailedCompensation {
                        compensation,
                        error,
                    });
                }
            }
        }

        self.state = SagaState::Failed;
        report
    }
}
