//! In-memory [`Storage`] implementation.
//!
//! Backed by a single `RwLock`, which gives the serial-update and
//! snapshot-read semantics the engine requires without a database. Used
//! by the test suite and usable as a reference implementation of the
//! trait's contract.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::RiskError;
use crate::models::{
    BlockStatus, BorrowerBlock, Loan, PaymentObligation, TransferRecord, TrustScore, User, Vouch,
    VouchStatus,
};
use crate::storage::Storage;
use crate::trust_score::ScoreInputs;

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    loans: HashMap<Uuid, Loan>,
    obligations: HashMap<Uuid, PaymentObligation>,
    vouches: HashMap<Uuid, Vouch>,
    blocks: HashMap<Uuid, BorrowerBlock>,
    trust_scores: HashMap<Uuid, TrustScore>,
    transfers: HashMap<(Uuid, Uuid), TransferRecord>,
}

/// In-memory storage for tests.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding helpers for tests.

    pub async fn insert_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id, user);
    }

    pub async fn insert_loan(&self, loan: Loan) {
        self.inner.write().await.loans.insert(loan.id, loan);
    }

    pub async fn insert_obligation(&self, obligation: PaymentObligation) {
        self.inner
            .write()
            .await
            .obligations
            .insert(obligation.id, obligation);
    }

    pub async fn get_obligation(&self, id: Uuid) -> Option<PaymentObligation> {
        self.inner.read().await.obligations.get(&id).cloned()
    }

    pub async fn get_vouch(&self, id: Uuid) -> Option<Vouch> {
        self.inner.read().await.vouches.get(&id).cloned()
    }

    pub async fn blocks_for_user(&self, user_id: Uuid) -> Vec<BorrowerBlock> {
        self.inner
            .read()
            .await
            .blocks
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get_user(&self, id: Uuid) -> Result<User, RiskError> {
        self.inner
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| RiskError::NotFound(format!("user {}", id)))
    }

    async fn update_user(&self, user: &User) -> Result<(), RiskError> {
        self.inner
            .write()
            .await
            .users
            .insert(user.id, user.clone());
        Ok(())
    }

    async fn get_loan(&self, id: Uuid) -> Result<Loan, RiskError> {
        self.inner
            .read()
            .await
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| RiskError::NotFound(format!("loan {}", id)))
    }

    async fn update_loan(&self, loan: &Loan) -> Result<(), RiskError> {
        self.inner
            .write()
            .await
            .loans
            .insert(loan.id, loan.clone());
        Ok(())
    }

    async fn due_obligations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentObligation>, RiskError> {
        let inner = self.inner.read().await;
        let mut due: Vec<PaymentObligation> = inner
            .obligations
            .values()
            .filter(|o| o.status.is_outstanding())
            .filter(|o| {
                (o.retry_count == 0 && o.due_date <= now)
                    || o.next_retry_at.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|o| o.due_date);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn obligations_for_loan(
        &self,
        loan_id: Uuid,
    ) -> Result<Vec<PaymentObligation>, RiskError> {
        let inner = self.inner.read().await;
        let mut obligations: Vec<PaymentObligation> = inner
            .obligations
            .values()
            .filter(|o| o.loan_id == loan_id)
            .cloned()
            .collect();
        obligations.sort_by_key(|o| o.due_date);
        Ok(obligations)
    }

    async fn update_obligation(&self, obligation: &PaymentObligation) -> Result<(), RiskError> {
        self.inner
            .write()
            .await
            .obligations
            .insert(obligation.id, obligation.clone());
        Ok(())
    }

    async fn get_vouch(&self, id: Uuid) -> Result<Vouch, RiskError> {
        self.inner
            .read()
            .await
            .vouches
            .get(&id)
            .cloned()
            .ok_or_else(|| RiskError::NotFound(format!("vouch {}", id)))
    }

    async fn active_vouches_for_vouchee(&self, vouchee_id: Uuid) -> Result<Vec<Vouch>, RiskError> {
        let inner = self.inner.read().await;
        Ok(inner
            .vouches
            .values()
            .filter(|v| v.vouchee_id == vouchee_id && v.status == VouchStatus::Active)
            .cloned()
            .collect())
    }

    async fn active_vouches_by_voucher(&self, voucher_id: Uuid) -> Result<Vec<Vouch>, RiskError> {
        let inner = self.inner.read().await;
        Ok(inner
            .vouches
            .values()
            .filter(|v| v.voucher_id == voucher_id && v.status == VouchStatus::Active)
            .cloned()
            .collect())
    }

    async fn vouches_by_voucher(&self, voucher_id: Uuid) -> Result<Vec<Vouch>, RiskError> {
        let inner = self.inner.read().await;
        Ok(inner
            .vouches
            .values()
            .filter(|v| v.voucher_id == voucher_id)
            .cloned()
            .collect())
    }

    async fn insert_vouch(&self, vouch: &Vouch) -> Result<(), RiskError> {
        self.inner
            .write()
            .await
            .vouches
            .insert(vouch.id, vouch.clone());
        Ok(())
    }

    async fn update_vouch(&self, vouch: &Vouch) -> Result<(), RiskError> {
        self.inner
            .write()
            .await
            .vouches
            .insert(vouch.id, vouch.clone());
        Ok(())
    }

    async fn increment_vouch_defaults(&self, vouch_id: Uuid) -> Result<Vouch, RiskError> {
        let mut inner = self.inner.write().await;
        let vouch = inner
            .vouches
            .get_mut(&vouch_id)
            .ok_or_else(|| RiskError::NotFound(format!("vouch {}", vouch_id)))?;
        vouch.loans_defaulted += 1;
        Ok(vouch.clone())
    }

    async fn increment_vouch_completions(&self, vouch_id: Uuid) -> Result<Vouch, RiskError> {
        let mut inner = self.inner.write().await;
        let vouch = inner
            .vouches
            .get_mut(&vouch_id)
            .ok_or_else(|| RiskError::NotFound(format!("vouch {}", vouch_id)))?;
        vouch.loans_completed += 1;
        Ok(vouch.clone())
    }

    async fn refresh_voucher_success_rate(&self, voucher_id: Uuid) -> Result<f64, RiskError> {
        // One write-lock acquisition covers the counter read and the
        // rate write; a concurrent increment lands fully before or fully
        // after this refresh.
        let mut inner = self.inner.write().await;
        let (successes, defaults) = inner
            .vouches
            .values()
            .filter(|v| v.voucher_id == voucher_id && v.status != VouchStatus::Revoked)
            .fold((0i64, 0i64), |(s, d), v| {
                (s + v.loans_completed as i64, d + v.loans_defaulted as i64)
            });

        let rate = if successes + defaults == 0 {
            100.0
        } else {
            successes as f64 / (successes + defaults) as f64 * 100.0
        };

        let user = inner
            .users
            .get_mut(&voucher_id)
            .ok_or_else(|| RiskError::NotFound(format!("user {}", voucher_id)))?;
        user.vouching_success_rate = rate;
        Ok(rate)
    }

    async fn active_block_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<BorrowerBlock>, RiskError> {
        let inner = self.inner.read().await;
        Ok(inner
            .blocks
            .values()
            .find(|b| b.user_id == user_id && b.status == BlockStatus::Active)
            .cloned())
    }

    async fn insert_block(&self, block: &BorrowerBlock) -> Result<(), RiskError> {
        self.inner
            .write()
            .await
            .blocks
            .insert(block.id, block.clone());
        Ok(())
    }

    async fn update_block(&self, block: &BorrowerBlock) -> Result<(), RiskError> {
        self.inner
            .write()
            .await
            .blocks
            .insert(block.id, block.clone());
        Ok(())
    }

    async fn expired_restrictions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BorrowerBlock>, RiskError> {
        let inner = self.inner.read().await;
        Ok(inner
            .blocks
            .values()
            .filter(|b| b.status == BlockStatus::DebtCleared)
            .filter(|b| b.restriction_ends_at.map(|t| t <= now).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn get_trust_score(&self, user_id: Uuid) -> Result<Option<TrustScore>, RiskError> {
        Ok(self.inner.read().await.trust_scores.get(&user_id).cloned())
    }

    async fn upsert_trust_score(&self, score: &TrustScore) -> Result<(), RiskError> {
        self.inner
            .write()
            .await
            .trust_scores
            .insert(score.user_id, score.clone());
        Ok(())
    }

    async fn find_transfer(
        &self,
        loan_id: Uuid,
        obligation_id: Uuid,
    ) -> Result<Option<TransferRecord>, RiskError> {
        let inner = self.inner.read().await;
        Ok(inner.transfers.get(&(loan_id, obligation_id)).cloned())
    }

    async fn record_transfer(&self, record: &TransferRecord) -> Result<bool, RiskError> {
        let mut inner = self.inner.write().await;
        let key = (record.loan_id, record.obligation_id);
        if inner.transfers.contains_key(&key) {
            return Ok(false);
        }
        inner.transfers.insert(key, record.clone());
        Ok(true)
    }

    async fn load_score_inputs(&self, user_id: Uuid) -> Result<ScoreInputs, RiskError> {
        // Single read lock = one logical point in time.
        let inner = self.inner.read().await;
        let user = inner
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| RiskError::NotFound(format!("user {}", user_id)))?;

        let borrower_loans: Vec<Uuid> = inner
            .loans
            .values()
            .filter(|l| l.borrower_id == user_id)
            .map(|l| l.id)
            .collect();

        let mut obligations: Vec<PaymentObligation> = inner
            .obligations
            .values()
            .filter(|o| borrower_loans.contains(&o.loan_id))
            .cloned()
            .collect();
        obligations.sort_by_key(|o| o.due_date);

        let vouches_received = inner
            .vouches
            .values()
            .filter(|v| v.vouchee_id == user_id)
            .cloned()
            .collect();
        let vouches_given = inner
            .vouches
            .values()
            .filter(|v| v.voucher_id == user_id)
            .cloned()
            .collect();

        Ok(ScoreInputs {
            user,
            obligations,
            vouches_received,
            vouches_given,
        })
    }
}
