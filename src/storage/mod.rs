//! Storage interface consumed by the risk engine.
//!
//! The relational engine itself is an external collaborator; the engine
//! only needs CRUD-style access to the record collections plus a handful
//! of atomic counter operations and one snapshot-consistent read. Two
//! implementations: [`PgStorage`] for production and [`MemoryStorage`]
//! for tests.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::RiskError;
use crate::models::{
    BorrowerBlock, Loan, PaymentObligation, TransferRecord, TrustScore, User, Vouch,
};
use crate::trust_score::ScoreInputs;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// CRUD access to the engine's record collections.
///
/// Counter increments (`increment_vouch_defaults`,
/// `increment_vouch_completions`) must be atomic: two racing callers both
/// observe their own increment. `record_transfer` is the durable
/// idempotency guard: exactly one of two racing callers gets `true`.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // ---- users ----
    async fn get_user(&self, id: Uuid) -> Result<User, RiskError>;
    async fn update_user(&self, user: &User) -> Result<(), RiskError>;

    // ---- loans ----
    async fn get_loan(&self, id: Uuid) -> Result<Loan, RiskError>;
    async fn update_loan(&self, loan: &Loan) -> Result<(), RiskError>;

    // ---- payment obligations ----
    /// Outstanding obligations eligible for a collection attempt at `now`:
    /// never retried and past due, or `next_retry_at` elapsed. Ordered by
    /// due date ascending, bounded by `limit`.
    async fn due_obligations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentObligation>, RiskError>;
    async fn obligations_for_loan(&self, loan_id: Uuid)
        -> Result<Vec<PaymentObligation>, RiskError>;
    async fn update_obligation(&self, obligation: &PaymentObligation) -> Result<(), RiskError>;

    // ---- vouches ----
    async fn get_vouch(&self, id: Uuid) -> Result<Vouch, RiskError>;
    async fn active_vouches_for_vouchee(&self, vouchee_id: Uuid) -> Result<Vec<Vouch>, RiskError>;
    async fn active_vouches_by_voucher(&self, voucher_id: Uuid) -> Result<Vec<Vouch>, RiskError>;
    /// Every vouch the user has given, regardless of status. Feeds the
    /// cumulative voucher-side counters.
    async fn vouches_by_voucher(&self, voucher_id: Uuid) -> Result<Vec<Vouch>, RiskError>;
    async fn insert_vouch(&self, vouch: &Vouch) -> Result<(), RiskError>;
    async fn update_vouch(&self, vouch: &Vouch) -> Result<(), RiskError>;
    /// Atomically bumps the vouch's defaulted-vouchee counter and returns
    /// the updated record.
    async fn increment_vouch_defaults(&self, vouch_id: Uuid) -> Result<Vouch, RiskError>;
    /// Atomically bumps the vouch's completed-vouchee counter and returns
    /// the updated record.
    async fn increment_vouch_completions(&self, vouch_id: Uuid) -> Result<Vouch, RiskError>;
    /// Re-derives the voucher's success rate from the cumulative counters
    /// on their non-revoked vouches and persists it. Counter read and
    /// rate write are one exclusive step: two racing refreshes cannot
    /// leave a stale rate. Returns the new rate; 100 with no counters.
    async fn refresh_voucher_success_rate(&self, voucher_id: Uuid) -> Result<f64, RiskError>;

    // ---- borrower blocks ----
    async fn active_block_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<BorrowerBlock>, RiskError>;
    async fn insert_block(&self, block: &BorrowerBlock) -> Result<(), RiskError>;
    async fn update_block(&self, block: &BorrowerBlock) -> Result<(), RiskError>;
    /// Debt-cleared blocks whose restriction window has elapsed at `now`.
    async fn expired_restrictions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BorrowerBlock>, RiskError>;

    // ---- trust scores ----
    async fn get_trust_score(&self, user_id: Uuid) -> Result<Option<TrustScore>, RiskError>;
    async fn upsert_trust_score(&self, score: &TrustScore) -> Result<(), RiskError>;

    // ---- gateway transfers (idempotency guard) ----
    async fn find_transfer(
        &self,
        loan_id: Uuid,
        obligation_id: Uuid,
    ) -> Result<Option<TransferRecord>, RiskError>;
    /// Insert-if-absent. Returns `false` when a record for the same
    /// (loan, obligation) pair already exists, i.e. this caller lost the
    /// race and must not initiate a transfer.
    async fn record_transfer(&self, record: &TransferRecord) -> Result<bool, RiskError>;

    // ---- calculator snapshot ----
    /// Reads all five score input groups at one logical point in time.
    async fn load_score_inputs(&self, user_id: Uuid) -> Result<ScoreInputs, RiskError>;
}
