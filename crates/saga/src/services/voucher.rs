//! Voucher ledger: gates and accounts for voucher redemptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{UserId, VoucherId};
use domain::{Audience, Money, Voucher};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Error)]
pub enum VoucherError {
    #[error("Voucher not found: {0}")]
    NotFound(VoucherId),

    #[error("Voucher {code} is not applicable: {reason}")]
    NotApplicable { code: String, reason: String },

    #[error("Voucher {code} has no remaining uses")]
    Exhausted { code: String },

    #[error("Voucher {code} already used {limit} time(s) by this user")]
    PerUserLimitExceeded { code: String, limit: u32 },

    #[error("Voucher ledger unavailable: {0}")]
    Unavailable(String),
}

/// One redemption of a voucher by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherUsage {
    pub voucher_id: VoucherId,
    pub user_id: UserId,
    pub discount: Money,
    pub used_at: DateTime<Utc>,
}

/// State of an assigned voucher in a user's wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletStatus {
    Available,
    Used,
}

/// Reserve/release contract of the voucher ledger.
///
/// After N successful reserves and M successful releases of one voucher its
/// `used_quantity` has moved by exactly `N - M` and never exceeds
/// `total_quantity`.
#[async_trait]
pub trait VoucherLedger: Send + Sync {
    async fn voucher(&self, voucher_id: &VoucherId) -> Result<Voucher, VoucherError>;

    /// Takes one usage unit of the voucher for `user_id`.
    async fn reserve(
        &self,
        voucher_id: &VoucherId,
        user_id: &UserId,
        discount: Money,
    ) -> Result<(), VoucherError>;

    /// Returns the unit taken by the user's most recent reservation.
    ///
    /// Releasing with nothing reserved is a no-op.
    async fn release(&self, voucher_id: &VoucherId, user_id: &UserId) -> Result<(), VoucherError>;
}

#[derive(Debug, Default)]
struct InMemoryVoucherState {
    vouchers: HashMap<VoucherId, Voucher>,
    usages: Vec<VoucherUsage>,
    wallet: HashMap<(VoucherId, UserId), WalletStatus>,
}

impl InMemoryVoucherState {
    fn usage_count(&self, voucher_id: &VoucherId, user_id: &UserId) -> usize {
        self.usages
            .iter()
            .filter(|u| &u.voucher_id == voucher_id && &u.user_id == user_id)
            .count()
    }
}

/// In-memory voucher ledger for testing and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVoucherLedger {
    state: Arc<Mutex<InMemoryVoucherState>>,
    fail_on_release: Arc<AtomicBool>,
}

impl InMemoryVoucherLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_voucher(&self, voucher: Voucher) {
        self.state
            .lock()
            .await
            .vouchers
            .insert(voucher.id.clone(), voucher);
    }

    /// Puts an assigned voucher into a user's wallet.
    pub async fn assign(&self, voucher_id: impl Into<VoucherId>, user_id: impl Into<UserId>) {
        self.state
            .lock()
            .await
            .wallet
            .insert((voucher_id.into(), user_id.into()), WalletStatus::Available);
    }

    pub async fn used_quantity(&self, voucher_id: &VoucherId) -> Option<u32> {
        self.state
            .lock()
            .await
            .vouchers
            .get(voucher_id)
            .map(|v| v.used_quantity)
    }

    pub async fn usage_count(&self, voucher_id: &VoucherId, user_id: &UserId) -> usize {
        self.state.lock().await.usage_count(voucher_id, user_id)
    }

    pub async fn wallet_status(
        &self,
        voucher_id: &VoucherId,
        user_id: &UserId,
    ) -> Option<WalletStatus> {
        self.state
            .lock()
            .await
            .wallet
            .get(&(voucher_id.clone(), user_id.clone()))
            .copied()
    }

    pub fn set_fail_on_release(&self, fail: bool) {
        self.fail_on_release.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoucherLedger for InMemoryVoucherLedger {
    async fn voucher(&self, voucher_id: &VoucherId) -> Result<Voucher, VoucherError> {
        self.state
            .lock()
            .await
            .vouchers
            .get(voucher_id)
            .cloned()
            .ok_or_else(|| VoucherError::NotFound(voucher_id.clone()))
    }

    async fn reserve(
        &self,
        voucher_id: &VoucherId,
        user_id: &UserId,
        discount: Money,
    ) -> Result<(), VoucherError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let voucher = state
            .vouchers
            .get(voucher_id)
            .ok_or_else(|| VoucherError::NotFound(voucher_id.clone()))?;
        let code = voucher.code.clone();

        if !voucher.active || !voucher.is_within_window(now) {
            return Err(VoucherError::NotApplicable {
                code,
                reason: "voucher is not active".to_string(),
            });
        }
        if voucher.remaining() == 0 {
            return Err(VoucherError::Exhausted { code });
        }
        let limit = voucher.max_usage_per_user;
        if state.usage_count(voucher_id, user_id) >= limit as usize {
            return Err(VoucherError::PerUserLimitExceeded { code, limit });
        }

        let wallet_key = (voucher_id.clone(), user_id.clone());
        let assigned = voucher.audience == Audience::Assigned;
        if assigned && state.wallet.get(&wallet_key) != Some(&WalletStatus::Available) {
            return Err(VoucherError::NotApplicable {
                code,
                reason: "voucher is not assigned to this user".to_string(),
            });
        }

        if let Some(voucher) = state.vouchers.get_mut(voucher_id) {
            voucher.used_quantity += 1;
        }
        if assigned {
            state.wallet.insert(wallet_key, WalletStatus::Used);
        }
        state.usages.push(VoucherUsage {
            voucher_id: voucher_id.clone(),
            user_id: user_id.clone(),
            discount,
            used_at: now,
        });

        tracing::debug!(%voucher_id, %user_id, %discount, "voucher reserved");
        Ok(())
    }

    async fn release(&self, voucher_id: &VoucherId, user_id: &UserId) -> Result<(), VoucherError> {
        if self.fail_on_release.load(Ordering::SeqCst) {
            return Err(VoucherError::Unavailable("connection refused".to_string()));
        }

        let mut state = self.state.lock().await;
        let Some(position) = state
            .usages
            .iter()
            .rposition(|u| &u.voucher_id == voucher_id && &u.user_id == user_id)
        else {
            tracing::warn!(%voucher_id, %user_id, "no voucher usage to release");
            return Ok(());
        };
        state.usages.remove(position);

        let assigned = match state.vouchers.get_mut(voucher_id) {
            Some(voucher) => {
                voucher.used_quantity = voucher.used_quantity.saturating_sub(1);
                voucher.audience == Audience::Assigned
            }
            None => false,
        };
        if assigned {
            state
                .wallet
                .insert((voucher_id.clone(), user_id.clone()), WalletStatus::Available);
        }

        tracing::debug!(%voucher_id, %user_id, "voucher released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::ShopId;
    use domain::{AppliesTo, Discount, VoucherOwner};

    fn voucher(id: &str, total: u32, per_user: u32) -> Voucher {
        let now = Utc::now();
        Voucher {
            id: VoucherId::new(id),
            code: id.to_uppercase(),
            owner: VoucherOwner::Shop(ShopId::new("shop-1")),
            discount: Discount::FixedAmount {
                amount: Money::new(10_000),
            },
            min_purchase: Money::zero(),
            applies_to: AppliesTo::OrderTotal,
            audience: Audience::Public,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            total_quantity: total,
            used_quantity: 0,
            max_usage_per_user: per_user,
            active: true,
        }
    }

    async fn ledger_with(v: Voucher) -> InMemoryVoucherLedger {
        let ledger = InMemoryVoucherLedger::new();
        ledger.add_voucher(v).await;
        ledger
    }

    #[tokio::test]
    async fn test_reserve_and_release_track_used_quantity() {
        let ledger = ledger_with(voucher("v1", 10, 5)).await;
        let id = VoucherId::new("v1");
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        for user in [&alice, &alice, &bob] {
            ledger.reserve(&id, user, Money::new(10_000)).await.unwrap();
        }
        ledger.release(&id, &alice).await.unwrap();

        assert_eq!(ledger.used_quantity(&id).await, Some(2));
        assert_eq!(ledger.usage_count(&id, &alice).await, 1);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let ledger = ledger_with(voucher("v1", 1, 5)).await;
        let id = VoucherId::new("v1");
        ledger
            .reserve(&id, &UserId::new("a"), Money::new(1))
            .await
            .unwrap();

        let result = ledger.reserve(&id, &UserId::new("b"), Money::new(1)).await;
        assert!(matches!(result, Err(VoucherError::Exhausted { .. })));
        assert_eq!(ledger.used_quantity(&id).await, Some(1));
    }

    #[tokio::test]
    async fn test_per_user_limit() {
        let ledger = ledger_with(voucher("v1", 10, 1)).await;
        let id = VoucherId::new("v1");
        let user = UserId::new("a");
        ledger.reserve(&id, &user, Money::new(1)).await.unwrap();

        let result = ledger.reserve(&id, &user, Money::new(1)).await;
        assert!(matches!(
            result,
            Err(VoucherError::PerUserLimitExceeded { limit: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_inactive_and_expired() {
        let mut inactive = voucher("v1", 10, 1);
        inactive.active = false;
        let ledger = ledger_with(inactive).await;
        let result = ledger
            .reserve(&VoucherId::new("v1"), &UserId::new("a"), Money::new(1))
            .await;
        assert!(matches!(result, Err(VoucherError::NotApplicable { .. })));

        let mut expired = voucher("v2", 10, 1);
        expired.ends_at = Utc::now() - Duration::hours(1);
        ledger.add_voucher(expired).await;
        let result = ledger
            .reserve(&VoucherId::new("v2"), &UserId::new("a"), Money::new(1))
            .await;
        assert!(matches!(result, Err(VoucherError::NotApplicable { .. })));
    }

    #[tokio::test]
    async fn test_assigned_voucher_requires_wallet_entry() {
        let mut assigned = voucher("v1", 10, 1);
        assigned.audience = Audience::Assigned;
        let ledger = ledger_with(assigned).await;
        let id = VoucherId::new("v1");
        let holder = UserId::new("holder");

        let result = ledger.reserve(&id, &UserId::new("other"), Money::new(1)).await;
        assert!(matches!(result, Err(VoucherError::NotApplicable { .. })));

        ledger.assign("v1", "holder").await;
        ledger.reserve(&id, &holder, Money::new(1)).await.unwrap();
        assert_eq!(ledger.wallet_status(&id, &holder).await, Some(WalletStatus::Used));

        ledger.release(&id, &holder).await.unwrap();
        assert_eq!(
            ledger.wallet_status(&id, &holder).await,
            Some(WalletStatus::Available)
        );
    }

    #[tokio::test]
    async fn test_release_without_usage_is_noop() {
        let ledger = ledger_with(voucher("v1", 10, 1)).await;
        let id = VoucherId::new("v1");

        ledger.release(&id, &UserId::new("a")).await.unwrap();
        assert_eq!(ledger.used_quantity(&id).await, Some(0));
    }

    #[tokio::test]
    async fn test_unknown_voucher() {
        let ledger = InMemoryVoucherLedger::new();
        let result = ledger.voucher(&VoucherId::new("nope")).await;
        assert!(matches!(result, Err(VoucherError::NotFound(_))));
    }
}
