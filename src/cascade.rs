//! Accountability cascade: propagates a borrower's default to everyone
//! who vouched for them.
//!
//! The cascade never writes trust scores directly. It bumps the
//! per-vouch defaulted-loan counters that the calculator reads, so the
//! penalty flows through the voucher's completion/social sub-scores on
//! the next recompute.

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::RiskError;
use crate::models::VouchStatus;
use crate::notifier::{NotificationKind, Notifier};
use crate::storage::Storage;
use crate::vouch_ledger::VouchLedger;

/// Vouchees with an active default before a voucher's privileges lock.
pub const VOUCH_LOCK_THRESHOLD: usize = 2;

/// A single voucher update that failed during the cascade.
#[derive(Debug, Clone)]
pub struct CascadeError {
    pub vouch_id: Uuid,
    pub voucher_id: Uuid,
    pub message: String,
}

/// Walks the vouch ledger for a defaulting borrower and penalizes each
/// active voucher.
pub struct AccountabilityCascade {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    ledger: VouchLedger,
}

impl AccountabilityCascade {
    pub fn new(storage: Arc<dyn Storage>, notifier: Arc<dyn Notifier>) -> Self {
        let ledger = VouchLedger::new(storage.clone());
        Self {
            storage,
            notifier,
            ledger,
        }
    }

    /// Runs the cascade for one default.
    ///
    /// A failure while updating one voucher is recorded and returned; it
    /// never aborts the remaining updates. Only the initial ledger read
    /// is fatal.
    pub async fn run(
        &self,
        borrower_id: Uuid,
        loan_id: Uuid,
    ) -> Result<Vec<CascadeError>, RiskError> {
        let vouches = self.storage.active_vouches_for_vouchee(borrower_id).await?;
        if vouches.is_empty() {
            tracing::info!(
                "No active vouches for defaulting borrower {}; cascade is a no-op",
                borrower_id
            );
            return Ok(Vec::new());
        }

        tracing::info!(
            "Running accountability cascade for borrower {} (loan {}): {} voucher(s)",
            borrower_id,
            loan_id,
            vouches.len()
        );

        let mut errors = Vec::new();
        for vouch in vouches {
            if let Err(e) = self.penalize_voucher(vouch.id, vouch.voucher_id).await {
                tracing::error!(
                    "✗ Cascade update failed for voucher {} (vouch {}): {}",
                    vouch.voucher_id,
                    vouch.id,
                    e
                );
                errors.push(CascadeError {
                    vouch_id: vouch.id,
                    voucher_id: vouch.voucher_id,
                    message: e.to_string(),
                });
            }
        }

        Ok(errors)
    }

    async fn penalize_voucher(&self, vouch_id: Uuid, voucher_id: Uuid) -> Result<(), RiskError> {
        // Atomic increment: concurrent defaults on the same voucher must
        // both land.
        self.storage.increment_vouch_defaults(vouch_id).await?;

        let new_rate = self.ledger.refresh_success_rate(voucher_id).await?;

        let given = self.storage.vouches_by_voucher(voucher_id).await?;
        let defaulted_vouchees = given
            .iter()
            .filter(|v| v.status != VouchStatus::Revoked && v.loans_defaulted > 0)
            .count();

        if defaulted_vouchees >= VOUCH_LOCK_THRESHOLD {
            let mut voucher = self.storage.get_user(voucher_id).await?;
            if !voucher.vouching_locked {
                voucher.vouching_locked = true;
                self.storage.update_user(&voucher).await?;
                tracing::warn!(
                    "Voucher {} locked: {} vouchees with an active default",
                    voucher_id,
                    defaulted_vouchees
                );
            }
        }

        tracing::info!(
            "Voucher {} penalized: success rate now {:.1}%",
            voucher_id,
            new_rate
        );

        // Delivery failure never affects the cascade outcome.
        if let Err(e) = self
            .notifier
            .notify(
                voucher_id,
                NotificationKind::VouchDefaultAlert,
                "A borrower you vouched for has defaulted",
                "One of your vouchees defaulted on a loan. Your vouching success rate has been reduced.",
            )
            .await
        {
            tracing::warn!("Failed to notify voucher {}: {}", voucher_id, e);
        }

        Ok(())
    }
}
