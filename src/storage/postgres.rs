//! Postgres-backed [`Storage`] implementation.
//!
//! Sequential runtime queries over the `lending` schema. Counter bumps
//! use single-statement `UPDATE ... RETURNING` so racing callers cannot
//! lose updates, and the score-input snapshot reads inside one
//! repeatable-read transaction.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::RiskError;
use crate::models::{
    BorrowerBlock, Loan, PaymentObligation, TransferRecord, TrustScore, User, Vouch,
};
use crate::storage::Storage;
use crate::trust_score::ScoreInputs;

/// Production storage over a Postgres pool.
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Storage for PgStorage {
    async fn get_user(&self, id: Uuid) -> Result<User, RiskError> {
        sqlx::query_as::<_, User>("SELECT * FROM lending.users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RiskError::DatabaseError)?
            .ok_or_else(|| RiskError::NotFound(format!("user {}", id)))
    }

    async fn update_user(&self, user: &User) -> Result<(), RiskError> {
        sqlx::query(
            r#"
            UPDATE lending.users
            SET is_identity_verified = $2,
                is_selfie_verified = $3,
                is_phone_verified = $4,
                funding_source_id = $5,
                payments_early = $6,
                payments_on_time = $7,
                payments_late = $8,
                payments_missed = $9,
                loans_completed = $10,
                loans_defaulted = $11,
                loans_active = $12,
                is_blocked = $13,
                blocked_at = $14,
                blocked_reason = $15,
                default_count = $16,
                vouching_success_rate = $17,
                vouching_locked = $18,
                tier = $19,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(user.is_identity_verified)
        .bind(user.is_selfie_verified)
        .bind(user.is_phone_verified)
        .bind(&user.funding_source_id)
        .bind(user.payments_early)
        .bind(user.payments_on_time)
        .bind(user.payments_late)
        .bind(user.payments_missed)
        .bind(user.loans_completed)
        .bind(user.loans_defaulted)
        .bind(user.loans_active)
        .bind(user.is_blocked)
        .bind(user.blocked_at)
        .bind(&user.blocked_reason)
        .bind(user.default_count)
        .bind(user.vouching_success_rate)
        .bind(user.vouching_locked)
        .bind(user.tier)
        .execute(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?;
        Ok(())
    }

    async fn get_loan(&self, id: Uuid) -> Result<Loan, RiskError> {
        sqlx::query_as::<_, Loan>("SELECT * FROM lending.loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RiskError::DatabaseError)?
            .ok_or_else(|| RiskError::NotFound(format!("loan {}", id)))
    }

    async fn update_loan(&self, loan: &Loan) -> Result<(), RiskError> {
        sqlx::query("UPDATE lending.loans SET status = $2, updated_at = now() WHERE id = $1")
            .bind(loan.id)
            .bind(loan.status)
            .execute(&self.pool)
            .await
            .map_err(RiskError::DatabaseError)?;
        Ok(())
    }

    async fn due_obligations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentObligation>, RiskError> {
        sqlx::query_as::<_, PaymentObligation>(
            r#"
            SELECT * FROM lending.payment_obligations
            WHERE status IN ('pending', 'overdue', 'failed')
              AND (
                (retry_count = 0 AND due_date <= $1)
                OR (next_retry_at IS NOT NULL AND next_retry_at <= $1)
              )
            ORDER BY due_date ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)
    }

    async fn obligations_for_loan(
        &self,
        loan_id: Uuid,
    ) -> Result<Vec<PaymentObligation>, RiskError> {
        sqlx::query_as::<_, PaymentObligation>(
            "SELECT * FROM lending.payment_obligations WHERE loan_id = $1 ORDER BY due_date ASC",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)
    }

    async fn update_obligation(&self, obligation: &PaymentObligation) -> Result<(), RiskError> {
        sqlx::query(
            r#"
            UPDATE lending.payment_obligations
            SET status = $2,
                paid_at = $3,
                retry_count = $4,
                last_retry_at = $5,
                next_retry_at = $6,
                retry_history = $7,
                caused_block = $8,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(obligation.id)
        .bind(obligation.status)
        .bind(obligation.paid_at)
        .bind(obligation.retry_count)
        .bind(obligation.last_retry_at)
        .bind(obligation.next_retry_at)
        .bind(&obligation.retry_history)
        .bind(obligation.caused_block)
        .execute(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?;
        Ok(())
    }

    async fn get_vouch(&self, id: Uuid) -> Result<Vouch, RiskError> {
        sqlx::query_as::<_, Vouch>("SELECT * FROM lending.vouches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RiskError::DatabaseError)?
            .ok_or_else(|| RiskError::NotFound(format!("vouch {}", id)))
    }

    async fn active_vouches_for_vouchee(&self, vouchee_id: Uuid) -> Result<Vec<Vouch>, RiskError> {
        sqlx::query_as::<_, Vouch>(
            "SELECT * FROM lending.vouches WHERE vouchee_id = $1 AND status = 'active'",
        )
        .bind(vouchee_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)
    }

    async fn active_vouches_by_voucher(&self, voucher_id: Uuid) -> Result<Vec<Vouch>, RiskError> {
        sqlx::query_as::<_, Vouch>(
            "SELECT * FROM lending.vouches WHERE voucher_id = $1 AND status = 'active'",
        )
        .bind(voucher_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)
    }

    async fn vouches_by_voucher(&self, voucher_id: Uuid) -> Result<Vec<Vouch>, RiskError> {
        sqlx::query_as::<_, Vouch>("SELECT * FROM lending.vouches WHERE voucher_id = $1")
            .bind(voucher_id)
            .fetch_all(&self.pool)
            .await
            .map_err(RiskError::DatabaseError)
    }

    async fn insert_vouch(&self, vouch: &Vouch) -> Result<(), RiskError> {
        sqlx::query(
            r#"
            INSERT INTO lending.vouches (
                id, voucher_id, vouchee_id, relationship, vouch_type, known_since,
                strength, trust_score_boost, status, loans_completed, loans_defaulted,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(vouch.id)
        .bind(vouch.voucher_id)
        .bind(vouch.vouchee_id)
        .bind(vouch.relationship)
        .bind(vouch.vouch_type)
        .bind(vouch.known_since)
        .bind(vouch.strength)
        .bind(vouch.trust_score_boost)
        .bind(vouch.status)
        .bind(vouch.loans_completed)
        .bind(vouch.loans_defaulted)
        .bind(vouch.created_at)
        .execute(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?;

        tracing::info!(
            "✓ Vouch created: {} → {} (strength {})",
            vouch.voucher_id,
            vouch.vouchee_id,
            vouch.strength
        );
        Ok(())
    }

    async fn update_vouch(&self, vouch: &Vouch) -> Result<(), RiskError> {
        sqlx::query(
            r#"
            UPDATE lending.vouches
            SET strength = $2,
                trust_score_boost = $3,
                status = $4,
                loans_completed = $5,
                loans_defaulted = $6,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(vouch.id)
        .bind(vouch.strength)
        .bind(vouch.trust_score_boost)
        .bind(vouch.status)
        .bind(vouch.loans_completed)
        .bind(vouch.loans_defaulted)
        .execute(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?;
        Ok(())
    }

    async fn increment_vouch_defaults(&self, vouch_id: Uuid) -> Result<Vouch, RiskError> {
        // Single-statement increment; concurrent defaults on the same
        // voucher cannot lose updates.
        sqlx::query_as::<_, Vouch>(
            r#"
            UPDATE lending.vouches
            SET loans_defaulted = loans_defaulted + 1, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(vouch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?
        .ok_or_else(|| RiskError::NotFound(format!("vouch {}", vouch_id)))
    }

    async fn increment_vouch_completions(&self, vouch_id: Uuid) -> Result<Vouch, RiskError> {
        sqlx::query_as::<_, Vouch>(
            r#"
            UPDATE lending.vouches
            SET loans_completed = loans_completed + 1, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(vouch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?
        .ok_or_else(|| RiskError::NotFound(format!("vouch {}", vouch_id)))
    }

    async fn refresh_voucher_success_rate(&self, voucher_id: Uuid) -> Result<f64, RiskError> {
        // Single statement: the rate is derived inside the UPDATE while
        // the user row is locked, so racing refreshes serialize instead
        // of overwriting each other with stale reads.
        sqlx::query_scalar::<_, f64>(
            r#"
            UPDATE lending.users u
            SET vouching_success_rate = (
                SELECT CASE
                    WHEN COALESCE(SUM(v.loans_completed + v.loans_defaulted), 0) = 0 THEN 100.0
                    ELSE SUM(v.loans_completed)::float8
                         / SUM(v.loans_completed + v.loans_defaulted)::float8 * 100.0
                END
                FROM lending.vouches v
                WHERE v.voucher_id = u.id AND v.status <> 'revoked'
            ),
            updated_at = now()
            WHERE u.id = $1
            RETURNING u.vouching_success_rate
            "#,
        )
        .bind(voucher_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?
        .ok_or_else(|| RiskError::NotFound(format!("user {}", voucher_id)))
    }

    async fn active_block_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<BorrowerBlock>, RiskError> {
        sqlx::query_as::<_, BorrowerBlock>(
            r#"
            SELECT * FROM lending.borrower_blocks
            WHERE user_id = $1 AND status = 'active'
            ORDER BY blocked_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)
    }

    async fn insert_block(&self, block: &BorrowerBlock) -> Result<(), RiskError> {
        sqlx::query(
            r#"
            INSERT INTO lending.borrower_blocks (
                id, user_id, loan_id, reason, total_debt_at_block,
                rating_before_block, status, blocked_at, debt_cleared_at,
                restriction_ends_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(block.id)
        .bind(block.user_id)
        .bind(block.loan_id)
        .bind(&block.reason)
        .bind(&block.total_debt_at_block)
        .bind(block.rating_before_block)
        .bind(block.status)
        .bind(block.blocked_at)
        .bind(block.debt_cleared_at)
        .bind(block.restriction_ends_at)
        .execute(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?;

        tracing::info!(
            "✓ Borrower block recorded for user {} (loan {}, debt {})",
            block.user_id,
            block.loan_id,
            block.total_debt_at_block
        );
        Ok(())
    }

    async fn update_block(&self, block: &BorrowerBlock) -> Result<(), RiskError> {
        sqlx::query(
            r#"
            UPDATE lending.borrower_blocks
            SET status = $2,
                debt_cleared_at = $3,
                restriction_ends_at = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(block.id)
        .bind(block.status)
        .bind(block.debt_cleared_at)
        .bind(block.restriction_ends_at)
        .execute(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?;
        Ok(())
    }

    async fn expired_restrictions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BorrowerBlock>, RiskError> {
        sqlx::query_as::<_, BorrowerBlock>(
            r#"
            SELECT * FROM lending.borrower_blocks
            WHERE status = 'debt_cleared' AND restriction_ends_at <= $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)
    }

    async fn get_trust_score(&self, user_id: Uuid) -> Result<Option<TrustScore>, RiskError> {
        sqlx::query_as::<_, TrustScore>("SELECT * FROM lending.trust_scores WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RiskError::DatabaseError)
    }

    async fn upsert_trust_score(&self, score: &TrustScore) -> Result<(), RiskError> {
        sqlx::query(
            r#"
            INSERT INTO lending.trust_scores (
                user_id, verification_score, tenure_score, payment_score,
                completion_score, social_score, weight_mode, score, grade,
                label, calculated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id) DO UPDATE
            SET verification_score = EXCLUDED.verification_score,
                tenure_score = EXCLUDED.tenure_score,
                payment_score = EXCLUDED.payment_score,
                completion_score = EXCLUDED.completion_score,
                social_score = EXCLUDED.social_score,
                weight_mode = EXCLUDED.weight_mode,
                score = EXCLUDED.score,
                grade = EXCLUDED.grade,
                label = EXCLUDED.label,
                calculated_at = EXCLUDED.calculated_at
            "#,
        )
        .bind(score.user_id)
        .bind(score.verification_score)
        .bind(score.tenure_score)
        .bind(score.payment_score)
        .bind(score.completion_score)
        .bind(score.social_score)
        .bind(score.weight_mode)
        .bind(score.score)
        .bind(&score.grade)
        .bind(&score.label)
        .bind(score.calculated_at)
        .execute(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?;
        Ok(())
    }

    async fn find_transfer(
        &self,
        loan_id: Uuid,
        obligation_id: Uuid,
    ) -> Result<Option<TransferRecord>, RiskError> {
        sqlx::query_as::<_, TransferRecord>(
            r#"
            SELECT * FROM lending.gateway_transfers
            WHERE loan_id = $1 AND obligation_id = $2
            LIMIT 1
            "#,
        )
        .bind(loan_id)
        .bind(obligation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)
    }

    async fn record_transfer(&self, record: &TransferRecord) -> Result<bool, RiskError> {
        // ON CONFLICT DO NOTHING: the loser of a race inserts zero rows
        // and must treat the pair as already processed.
        let result = sqlx::query(
            r#"
            INSERT INTO lending.gateway_transfers (
                id, loan_id, obligation_id, transfer_id, amount, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (loan_id, obligation_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.loan_id)
        .bind(record.obligation_id)
        .bind(&record.transfer_id)
        .bind(&record.amount)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(RiskError::DatabaseError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn load_score_inputs(&self, user_id: Uuid) -> Result<ScoreInputs, RiskError> {
        // One repeatable-read transaction so the five input groups come
        // from a single logical point in time.
        let mut tx = self.pool.begin().await.map_err(RiskError::DatabaseError)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(RiskError::DatabaseError)?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM lending.users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RiskError::DatabaseError)?
            .ok_or_else(|| RiskError::NotFound(format!("user {}", user_id)))?;

        let obligations = sqlx::query_as::<_, PaymentObligation>(
            r#"
            SELECT o.* FROM lending.payment_obligations o
            JOIN lending.loans l ON l.id = o.loan_id
            WHERE l.borrower_id = $1
            ORDER BY o.due_date ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(RiskError::DatabaseError)?;

        let vouches_received =
            sqlx::query_as::<_, Vouch>("SELECT * FROM lending.vouches WHERE vouchee_id = $1")
                .bind(user_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(RiskError::DatabaseError)?;

        let vouches_given =
            sqlx::query_as::<_, Vouch>("SELECT * FROM lending.vouches WHERE voucher_id = $1")
                .bind(user_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(RiskError::DatabaseError)?;

        tx.commit().await.map_err(RiskError::DatabaseError)?;

        Ok(ScoreInputs {
            user,
            obligations,
            vouches_received,
            vouches_given,
        })
    }
}
