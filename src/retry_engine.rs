//! Payment retry state machine.
//!
//! A periodic batch scans due and overdue payment obligations, attempts
//! collection through the Payments Gateway, and advances each
//! obligation's retry state. Exhausting the retries defaults the loan,
//! blocks the borrower and triggers the accountability cascade.
//!
//! One batch runs at a time; obligations are processed sequentially and
//! each gateway call is awaited. A failed payment is data, not an error:
//! only storage faults surface as per-record errors in the summary.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::cascade::{AccountabilityCascade, CascadeError};
use crate::errors::{ResultExt, RiskError};
use crate::gateway::{transfer_idempotency_key, PaymentsGateway};
use crate::models::{
    BlockStatus, BorrowerBlock, Loan, LoanStatus, ObligationStatus, PaymentObligation,
    RetryAttempt, TransferRecord, TrustTier, User,
};
use crate::notifier::{NotificationKind, Notifier};
use crate::storage::Storage;
use crate::trust_score::{classify_payment, PaymentTiming, TrustScoreService};
use crate::vouch_ledger::VouchLedger;

/// Collection attempts before an obligation defaults.
pub const MAX_RETRIES: i32 = 3;
/// Days between collection attempts.
pub const RETRY_INTERVAL_DAYS: i64 = 3;
/// Days a cleared borrower stays restricted after repaying the debt.
pub const RESTRICTION_DAYS: i64 = 90;
/// Default obligation batch bound per run.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Result of one batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Obligations examined.
    pub processed: usize,
    /// Payments collected.
    pub collected: usize,
    /// Failures rescheduled for another attempt.
    pub rescheduled: usize,
    /// Obligations that exhausted retries and defaulted.
    pub defaulted: usize,
    /// Obligations skipped (borrower already blocked).
    pub skipped: usize,
    /// Per-record failures; the batch continues past each one.
    pub errors: Vec<String>,
}

/// Outcome of debt-clearance reconciliation for a blocked borrower.
#[derive(Debug)]
pub enum DebtClearance {
    /// Debt remains; nothing changed.
    Outstanding(BigDecimal),
    /// Outstanding debt hit exactly zero; restriction window started.
    Cleared {
        restriction_ends_at: DateTime<Utc>,
    },
}

enum Outcome {
    Collected,
    Rescheduled,
    Defaulted(Vec<CascadeError>),
    Skipped,
}

/// The batch state machine. All collaborators are injected; the engine
/// owns no global state.
pub struct PaymentRetryEngine {
    storage: Arc<dyn Storage>,
    gateway: Arc<dyn PaymentsGateway>,
    notifier: Arc<dyn Notifier>,
    scores: TrustScoreService,
    ledger: VouchLedger,
    cascade: AccountabilityCascade,
    batch_size: i64,
}

impl PaymentRetryEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        gateway: Arc<dyn PaymentsGateway>,
        notifier: Arc<dyn Notifier>,
        batch_size: i64,
    ) -> Self {
        Self {
            scores: TrustScoreService::new(storage.clone()),
            ledger: VouchLedger::new(storage.clone()),
            cascade: AccountabilityCascade::new(storage.clone(), notifier.clone()),
            storage,
            gateway,
            notifier,
            batch_size,
        }
    }

    /// Runs one collection batch at `now`.
    ///
    /// Storage failure on a single record is fatal for that record only;
    /// the batch continues and the failure lands in `errors`.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchSummary, RiskError> {
        let due = self
            .storage
            .due_obligations(now, self.batch_size)
            .await
            .context("Failed to load due obligations")?;
        tracing::info!("Retry batch started: {} obligation(s) eligible", due.len());

        let mut summary = BatchSummary::default();
        for obligation in due {
            let obligation_id = obligation.id;
            summary.processed += 1;
            match self.process_obligation(obligation, now).await {
                Ok(Outcome::Collected) => summary.collected += 1,
                Ok(Outcome::Rescheduled) => summary.rescheduled += 1,
                Ok(Outcome::Defaulted(cascade_errors)) => {
                    summary.defaulted += 1;
                    for e in cascade_errors {
                        summary.errors.push(format!(
                            "cascade: voucher {} (vouch {}): {}",
                            e.voucher_id, e.vouch_id, e.message
                        ));
                    }
                }
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!("✗ Failed to process obligation {}: {}", obligation_id, e);
                    summary.errors.push(format!("obligation {}: {}", obligation_id, e));
                }
            }
        }

        tracing::info!(
            "Retry batch finished: {} processed, {} collected, {} rescheduled, {} defaulted, {} skipped, {} error(s)",
            summary.processed,
            summary.collected,
            summary.rescheduled,
            summary.defaulted,
            summary.skipped,
            summary.errors.len()
        );
        Ok(summary)
    }

    async fn process_obligation(
        &self,
        mut obligation: PaymentObligation,
        now: DateTime<Utc>,
    ) -> Result<Outcome, RiskError> {
        let loan = self.storage.get_loan(obligation.loan_id).await?;
        let borrower = self.storage.get_user(loan.borrower_id).await?;

        // Step 1: blocked borrowers are out of the collection loop.
        if borrower.is_blocked {
            tracing::info!(
                "Skipping obligation {}: borrower {} is blocked",
                obligation.id,
                borrower.id
            );
            return Ok(Outcome::Skipped);
        }

        // Eligibility guarantees this, but the invariant is load-bearing:
        // retry_count never exceeds MAX_RETRIES.
        if obligation.retry_count >= MAX_RETRIES {
            tracing::warn!(
                "Obligation {} already at {} attempts; skipping",
                obligation.id,
                obligation.retry_count
            );
            return Ok(Outcome::Skipped);
        }

        // Idempotency guard: a durable transfer record for this pair
        // means the money already moved.
        if let Some(existing) = self
            .storage
            .find_transfer(loan.id, obligation.id)
            .await?
        {
            tracing::info!(
                "Obligation {} already processed (transfer {}); marking paid",
                obligation.id,
                existing.transfer_id
            );
            // This pass counts as an attempt: it resolved the obligation
            // against the previously recorded transfer.
            obligation.retry_count += 1;
            obligation.last_retry_at = Some(now);
            obligation.retry_history.0.push(RetryAttempt {
                attempted_at: now,
                attempt_number: obligation.retry_count,
                succeeded: true,
                transfer_id: Some(existing.transfer_id.clone()),
                error: None,
            });
            self.settle_obligation(obligation, &loan, borrower, now).await?;
            return Ok(Outcome::Collected);
        }

        // Step 2: count the attempt.
        obligation.retry_count += 1;
        obligation.last_retry_at = Some(now);
        let attempt_number = obligation.retry_count;
        let is_last_attempt = attempt_number >= MAX_RETRIES;

        // Step 3: attempt collection. A missing funding endpoint on
        // either side is an immediate recorded failure, no network call.
        let lender = self.storage.get_user(loan.lender_id).await?;
        let attempt = match (&borrower.funding_source_id, &lender.funding_source_id) {
            (Some(source), Some(destination)) => {
                let metadata = json!({
                    "loan_id": loan.id,
                    "obligation_id": obligation.id,
                    "attempt": attempt_number,
                    "idempotency_key": transfer_idempotency_key(loan.id, obligation.id),
                });
                self.gateway
                    .initiate_transfer(source, destination, &obligation.amount, metadata)
                    .await
                    .map_err(|e| e.to_string())
            }
            (None, _) => Err("borrower has no connected funding source".to_string()),
            (_, None) => Err("lender has no connected funding source".to_string()),
        };

        match attempt {
            Ok(receipt) => {
                let record = TransferRecord {
                    id: Uuid::new_v4(),
                    loan_id: loan.id,
                    obligation_id: obligation.id,
                    transfer_id: receipt.transfer_id.clone(),
                    amount: obligation.amount.clone(),
                    created_at: now,
                };
                if !self.storage.record_transfer(&record).await? {
                    // Another run recorded first; the gateway-side
                    // idempotency key made our call a no-op.
                    tracing::warn!(
                        "Transfer for obligation {} recorded by a concurrent run",
                        obligation.id
                    );
                }

                // Step 4: append the attempt, then settle.
                obligation.retry_history.0.push(RetryAttempt {
                    attempted_at: now,
                    attempt_number,
                    succeeded: true,
                    transfer_id: Some(receipt.transfer_id),
                    error: None,
                });
                self.settle_obligation(obligation, &loan, borrower, now).await?;
                Ok(Outcome::Collected)
            }
            Err(reason) if !is_last_attempt => {
                obligation.retry_history.0.push(RetryAttempt {
                    attempted_at: now,
                    attempt_number,
                    succeeded: false,
                    transfer_id: None,
                    error: Some(reason.clone()),
                });
                obligation.status = ObligationStatus::Failed;
                obligation.next_retry_at = Some(now + Duration::days(RETRY_INTERVAL_DAYS));
                self.storage.update_obligation(&obligation).await?;

                let remaining = MAX_RETRIES - attempt_number;
                tracing::info!(
                    "Collection failed for obligation {} (attempt {}/{}): {}; retrying in {} days",
                    obligation.id,
                    attempt_number,
                    MAX_RETRIES,
                    reason,
                    RETRY_INTERVAL_DAYS
                );
                self.try_notify(
                    borrower.id,
                    NotificationKind::PaymentRetryScheduled,
                    "Payment failed",
                    &format!(
                        "We could not collect your scheduled payment. We will retry in {} days ({} attempt(s) remaining).",
                        RETRY_INTERVAL_DAYS, remaining
                    ),
                )
                .await;
                Ok(Outcome::Rescheduled)
            }
            Err(reason) => {
                // Step 7: terminal failure in the same step.
                obligation.retry_history.0.push(RetryAttempt {
                    attempted_at: now,
                    attempt_number,
                    succeeded: false,
                    transfer_id: None,
                    error: Some(reason.clone()),
                });
                obligation.status = ObligationStatus::Defaulted;
                obligation.next_retry_at = None;
                obligation.caused_block = true;
                self.storage.update_obligation(&obligation).await?;

                let mut loan = loan;
                loan.status = LoanStatus::Defaulted;
                self.storage.update_loan(&loan).await?;

                tracing::warn!(
                    "Obligation {} exhausted retries ({}); loan {} defaulted",
                    obligation.id,
                    reason,
                    loan.id
                );
                let (_, cascade_errors) = self.block_borrower(&loan, now).await?;
                Ok(Outcome::Defaulted(cascade_errors))
            }
        }
    }

    /// Marks an obligation paid, maintains borrower counters, completes
    /// the loan when it was the last open obligation and propagates the
    /// completion to the vouch ledger.
    async fn settle_obligation(
        &self,
        mut obligation: PaymentObligation,
        loan: &Loan,
        mut borrower: User,
        now: DateTime<Utc>,
    ) -> Result<(), RiskError> {
        obligation.status = ObligationStatus::Paid;
        obligation.paid_at = Some(now);
        obligation.next_retry_at = None;
        self.storage.update_obligation(&obligation).await?;

        match classify_payment(obligation.due_date, now) {
            PaymentTiming::Early => borrower.payments_early += 1,
            PaymentTiming::OnTime => borrower.payments_on_time += 1,
            _ => borrower.payments_late += 1,
        }

        let all_paid = self
            .storage
            .obligations_for_loan(loan.id)
            .await?
            .iter()
            .all(|o| o.status == ObligationStatus::Paid);

        if all_paid && loan.status == LoanStatus::Active {
            let mut loan = loan.clone();
            loan.status = LoanStatus::Completed;
            self.storage.update_loan(&loan).await?;
            borrower.loans_active = (borrower.loans_active - 1).max(0);
            borrower.loans_completed += 1;
            tracing::info!("✓ Loan {} completed by borrower {}", loan.id, borrower.id);
        }
        self.storage.update_user(&borrower).await?;

        if all_paid {
            // Vouchers earn their completion credit here.
            match self.ledger.record_vouchee_completion(borrower.id).await {
                Ok(vouchers) => {
                    for voucher_id in vouchers {
                        self.try_notify(
                            voucher_id,
                            NotificationKind::VouchCompletionNotice,
                            "Your vouchee repaid a loan",
                            "A borrower you vouched for completed a loan. Your vouching record improved.",
                        )
                        .await;
                        self.recompute_score(voucher_id).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to record vouchee completion for {}: {}",
                        borrower.id,
                        e
                    );
                }
            }
        }

        self.try_notify(
            borrower.id,
            NotificationKind::PaymentCollected,
            "Payment collected",
            &format!("Your scheduled payment of {} was collected.", obligation.amount),
        )
        .await;
        self.recompute_score(borrower.id).await;
        Ok(())
    }

    /// Block Procedure. Idempotent: a second invocation for a borrower
    /// with an active block returns that block and changes nothing.
    ///
    /// The block is authoritative once written; cascade errors are
    /// captured and returned, never rolled back.
    pub async fn block_borrower(
        &self,
        loan: &Loan,
        now: DateTime<Utc>,
    ) -> Result<(BorrowerBlock, Vec<CascadeError>), RiskError> {
        if let Some(existing) = self.storage.active_block_for_user(loan.borrower_id).await? {
            tracing::info!(
                "Borrower {} already has an active block; skipping",
                loan.borrower_id
            );
            return Ok((existing, Vec::new()));
        }

        let obligations = self
            .storage
            .obligations_for_loan(loan.id)
            .await
            .context("Failed to load obligations for blocked loan")?;
        let total_debt = obligations
            .iter()
            .filter(|o| o.status != ObligationStatus::Paid)
            .fold(BigDecimal::from(0), |acc, o| acc + &o.amount);

        // Snapshot the pre-block rating before the counters shift it.
        let rating_before_block = self
            .storage
            .get_trust_score(loan.borrower_id)
            .await?
            .map(|s| s.score);

        let mut borrower = self.storage.get_user(loan.borrower_id).await?;
        let reason = format!("Defaulted on loan {} after {} failed attempts", loan.id, MAX_RETRIES);
        borrower.is_blocked = true;
        borrower.blocked_at = Some(now);
        borrower.blocked_reason = Some(reason.clone());
        borrower.default_count += 1;
        borrower.loans_defaulted += 1;
        borrower.loans_active = (borrower.loans_active - 1).max(0);
        borrower.payments_missed += 1;
        borrower.tier = TrustTier::One;
        self.storage.update_user(&borrower).await?;

        let block = BorrowerBlock {
            id: Uuid::new_v4(),
            user_id: borrower.id,
            loan_id: loan.id,
            reason,
            total_debt_at_block: total_debt.clone(),
            rating_before_block,
            status: BlockStatus::Active,
            blocked_at: now,
            debt_cleared_at: None,
            restriction_ends_at: None,
        };
        self.storage.insert_block(&block).await?;
        tracing::warn!(
            "Borrower {} blocked: total debt {} on loan {}",
            borrower.id,
            total_debt,
            loan.id
        );

        self.try_notify(
            borrower.id,
            NotificationKind::BorrowerBlocked,
            "Account blocked",
            &format!(
                "Your account has been blocked after repeated failed payments. Outstanding debt: {}.",
                total_debt
            ),
        )
        .await;
        self.try_notify(
            loan.lender_id,
            NotificationKind::LenderDefaultNotice,
            "A loan you funded has defaulted",
            &format!("The borrower on loan {} defaulted. Collection is suspended.", loan.id),
        )
        .await;

        // The block stands regardless of cascade failures.
        let cascade_errors = match self.cascade.run(borrower.id, loan.id).await {
            Ok(errors) => errors,
            Err(e) => {
                tracing::error!("Cascade failed for borrower {}: {}", borrower.id, e);
                vec![CascadeError {
                    vouch_id: Uuid::nil(),
                    voucher_id: Uuid::nil(),
                    message: e.to_string(),
                }]
            }
        };

        self.recompute_score(borrower.id).await;
        Ok((block, cascade_errors))
    }

    /// Debt Clearance sub-flow, invoked after any payment lands while the
    /// borrower is blocked.
    ///
    /// Only an outstanding balance of exactly zero starts the
    /// restriction window; the borrower stays blocked until it elapses.
    pub async fn clear_debt_if_settled(
        &self,
        borrower_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DebtClearance, RiskError> {
        let mut block = self
            .storage
            .active_block_for_user(borrower_id)
            .await?
            .ok_or_else(|| RiskError::NotFound(format!("no active block for user {}", borrower_id)))?;

        let obligations = self.storage.obligations_for_loan(block.loan_id).await?;
        let outstanding = obligations
            .iter()
            .filter(|o| o.status != ObligationStatus::Paid)
            .fold(BigDecimal::from(0), |acc, o| acc + &o.amount);

        if outstanding > BigDecimal::from(0) {
            tracing::info!(
                "Borrower {} still owes {} on loan {}",
                borrower_id,
                outstanding,
                block.loan_id
            );
            return Ok(DebtClearance::Outstanding(outstanding));
        }

        let restriction_ends_at = now + Duration::days(RESTRICTION_DAYS);
        block.status = BlockStatus::DebtCleared;
        block.debt_cleared_at = Some(now);
        block.restriction_ends_at = Some(restriction_ends_at);
        self.storage.update_block(&block).await?;

        tracing::info!(
            "✓ Borrower {} cleared their debt; restricted until {}",
            borrower_id,
            restriction_ends_at
        );

        let loan = self.storage.get_loan(block.loan_id).await?;
        self.try_notify(
            borrower_id,
            NotificationKind::DebtCleared,
            "Debt cleared",
            &format!(
                "You have repaid your outstanding debt. Account restrictions lift on {}.",
                restriction_ends_at.date_naive()
            ),
        )
        .await;
        self.try_notify(
            loan.lender_id,
            NotificationKind::DebtCleared,
            "Defaulted loan repaid",
            &format!("The borrower on loan {} has repaid the outstanding debt.", loan.id),
        )
        .await;

        Ok(DebtClearance::Cleared { restriction_ends_at })
    }

    /// Scheduled sweep that unblocks borrowers whose restriction window
    /// has elapsed. Returns the number of blocks lifted.
    pub async fn lift_expired_restrictions(&self, now: DateTime<Utc>) -> Result<usize, RiskError> {
        let expired = self.storage.expired_restrictions(now).await?;
        let mut lifted = 0;

        for mut block in expired {
            let mut user = self.storage.get_user(block.user_id).await?;
            user.is_blocked = false;
            user.blocked_reason = None;
            self.storage.update_user(&user).await?;

            block.status = BlockStatus::Lifted;
            self.storage.update_block(&block).await?;
            lifted += 1;

            tracing::info!("✓ Restriction lifted for user {}", user.id);
            self.try_notify(
                user.id,
                NotificationKind::RestrictionLifted,
                "Account restored",
                "Your restriction period has ended and your account is active again.",
            )
            .await;
        }

        Ok(lifted)
    }

    /// Score recomputation after a mutation is bookkeeping: a failure is
    /// logged, never propagated into the state transition that caused it.
    async fn recompute_score(&self, user_id: Uuid) {
        if let Err(e) = self.scores.recompute(user_id).await {
            tracing::warn!("Trust score recompute failed for {}: {}", user_id, e);
        }
    }

    async fn try_notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) {
        if let Err(e) = self.notifier.notify(user_id, kind, title, message).await {
            tracing::warn!("Notification failed for user {}: {}", user_id, e);
        }
    }
}
