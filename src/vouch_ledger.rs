//! Vouch ledger: owns vouch records and the strength formula.
//!
//! Strength is always derived, never assigned: tier base + longevity
//! bonus + relationship bonus + vouch-type bonus, multiplied by the
//! voucher's success-rate multiplier, rounded and clamped to [1, 10].
//! `trust_score_boost` always equals the resulting strength.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::RiskError;
use crate::models::{RelationshipType, TrustTier, Vouch, VouchStatus, VouchType};
use crate::storage::Storage;

/// Multiplier applied to the formula based on the voucher's track record.
pub fn success_rate_multiplier(success_rate: f64) -> f64 {
    if success_rate >= 100.0 {
        1.0
    } else if success_rate >= 80.0 {
        0.9
    } else if success_rate >= 60.0 {
        0.75
    } else if success_rate >= 40.0 {
        0.55
    } else {
        0.35
    }
}

/// Longevity bonus banded on whole years known.
pub fn longevity_bonus(years_known: f64) -> f64 {
    if years_known >= 10.0 {
        2.0
    } else if years_known >= 5.0 {
        1.5
    } else if years_known >= 2.0 {
        1.0
    } else if years_known >= 1.0 {
        0.5
    } else {
        0.0
    }
}

/// Computes vouch strength from the voucher's current standing and the
/// declared relationship.
pub fn compute_strength(
    voucher_tier: TrustTier,
    voucher_success_rate: f64,
    relationship: RelationshipType,
    vouch_type: VouchType,
    known_since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i32 {
    let years_known = (now - known_since).num_days() as f64 / 365.25;
    let raw = (voucher_tier.strength_base()
        + longevity_bonus(years_known)
        + relationship.strength_bonus()
        + vouch_type.strength_bonus())
        * success_rate_multiplier(voucher_success_rate);
    (raw.round() as i32).clamp(1, 10)
}

/// Storage-backed vouch operations.
pub struct VouchLedger {
    storage: Arc<dyn Storage>,
}

impl VouchLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Creates a new active vouch.
    ///
    /// Rejects self-vouches, duplicate active edges, and vouchers whose
    /// privileges are locked or who are blocked.
    pub async fn create_vouch(
        &self,
        voucher_id: Uuid,
        vouchee_id: Uuid,
        relationship: RelationshipType,
        vouch_type: VouchType,
        known_since: DateTime<Utc>,
    ) -> Result<Vouch, RiskError> {
        if voucher_id == vouchee_id {
            return Err(RiskError::InvalidInput(
                "Users cannot vouch for themselves".to_string(),
            ));
        }

        let voucher = self.storage.get_user(voucher_id).await?;
        if voucher.vouching_locked {
            return Err(RiskError::InvalidInput(
                "Vouching privileges are locked pending review".to_string(),
            ));
        }
        if voucher.is_blocked {
            return Err(RiskError::InvalidInput(
                "Blocked users cannot vouch".to_string(),
            ));
        }

        let existing = self.storage.active_vouches_by_voucher(voucher_id).await?;
        if existing.iter().any(|v| v.vouchee_id == vouchee_id) {
            return Err(RiskError::InvalidInput(
                "An active vouch for this user already exists".to_string(),
            ));
        }

        let now = Utc::now();
        let strength = compute_strength(
            voucher.tier,
            voucher.vouching_success_rate,
            relationship,
            vouch_type,
            known_since,
            now,
        );

        let vouch = Vouch {
            id: Uuid::new_v4(),
            voucher_id,
            vouchee_id,
            relationship,
            vouch_type,
            known_since,
            strength,
            trust_score_boost: strength,
            status: VouchStatus::Active,
            loans_completed: 0,
            loans_defaulted: 0,
            created_at: now,
        };
        self.storage.insert_vouch(&vouch).await?;
        Ok(vouch)
    }

    /// Revokes an active vouch. Only the voucher may revoke.
    pub async fn revoke_vouch(&self, vouch_id: Uuid, voucher_id: Uuid) -> Result<(), RiskError> {
        let mut vouch = self.storage.get_vouch(vouch_id).await?;
        if vouch.voucher_id != voucher_id {
            return Err(RiskError::InvalidInput(
                "Only the voucher can revoke a vouch".to_string(),
            ));
        }
        if vouch.status != VouchStatus::Active {
            return Err(RiskError::InvalidInput(
                "Only active vouches can be revoked".to_string(),
            ));
        }
        vouch.status = VouchStatus::Revoked;
        self.storage.update_vouch(&vouch).await?;
        tracing::info!("Vouch {} revoked by {}", vouch_id, voucher_id);
        Ok(())
    }

    /// Recomputes strength and boost for every active vouch this user has
    /// given. Fires when the voucher's tier changes. Returns the number of
    /// vouches updated.
    pub async fn recalculate_for_voucher(&self, voucher_id: Uuid) -> Result<usize, RiskError> {
        let voucher = self.storage.get_user(voucher_id).await?;
        let vouches = self.storage.active_vouches_by_voucher(voucher_id).await?;
        let now = Utc::now();

        let mut updated = 0;
        for mut vouch in vouches {
            let strength = compute_strength(
                voucher.tier,
                voucher.vouching_success_rate,
                vouch.relationship,
                vouch.vouch_type,
                vouch.known_since,
                now,
            );
            if strength != vouch.strength {
                vouch.strength = strength;
                vouch.trust_score_boost = strength;
                self.storage.update_vouch(&vouch).await?;
                updated += 1;
            }
        }

        tracing::info!(
            "Recalculated vouch strength for voucher {}: {} updated",
            voucher_id,
            updated
        );
        Ok(updated)
    }

    /// Re-derives the voucher's success rate from the cumulative counters
    /// on their non-revoked vouches and persists it. The read and write
    /// happen in one exclusive storage step, so concurrent defaults can
    /// never leave a rate computed from a stale counter snapshot.
    /// Returns the new rate.
    pub async fn refresh_success_rate(&self, voucher_id: Uuid) -> Result<f64, RiskError> {
        self.storage.refresh_voucher_success_rate(voucher_id).await
    }

    /// Records a completed loan on every active vouch received by the
    /// vouchee and refreshes each voucher's success rate. Returns the
    /// affected voucher ids.
    pub async fn record_vouchee_completion(
        &self,
        vouchee_id: Uuid,
    ) -> Result<Vec<Uuid>, RiskError> {
        let vouches = self.storage.active_vouches_for_vouchee(vouchee_id).await?;
        let mut vouchers = Vec::with_capacity(vouches.len());
        for vouch in vouches {
            self.storage.increment_vouch_completions(vouch.id).await?;
            self.refresh_success_rate(vouch.voucher_id).await?;
            vouchers.push(vouch.voucher_id);
        }
        Ok(vouchers)
    }
}
