//! Multi-factor trust score calculator.
//!
//! Pure functions over a snapshot of a user's stored attributes, payment
//! history and vouch edges. No I/O and no side effects: the calculator
//! never fails on missing history, it resolves absence to neutral
//! baselines. [`TrustScoreService`] wraps the pure core with storage
//! access and a short-TTL read cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use moka::future::Cache;
use uuid::Uuid;

use crate::errors::RiskError;
use crate::models::{
    ObligationStatus, PaymentObligation, TrustScore, User, Vouch, VouchStatus, WeightMode,
};
use crate::storage::Storage;

/// Borrower weight profile: payment history dominates.
const BORROWER_WEIGHTS: Weights = Weights {
    payment: 0.40,
    completion: 0.25,
    social: 0.15,
    verification: 0.10,
    tenure: 0.10,
};

/// Lender weight profile: social and verification signals dominate.
const LENDER_WEIGHTS: Weights = Weights {
    payment: 0.0,
    completion: 0.0,
    social: 0.45,
    verification: 0.30,
    tenure: 0.25,
};

struct Weights {
    verification: f64,
    tenure: f64,
    payment: f64,
    completion: f64,
    social: f64,
}

/// All inputs the calculator reads, captured at one logical point in
/// time by `Storage::load_score_inputs`.
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    pub user: User,
    /// Every obligation across the user's loans as borrower, due date
    /// ascending.
    pub obligations: Vec<PaymentObligation>,
    pub vouches_received: Vec<Vouch>,
    pub vouches_given: Vec<Vouch>,
}

/// How a paid obligation lands relative to its due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTiming {
    /// More than 2 days before the due date.
    Early,
    /// Between 2 days early and the due date.
    OnTime,
    /// 1-7 days late.
    LateMinor,
    /// 8-14 days late.
    LateModerate,
    /// More than 14 days late.
    LateSevere,
}

impl PaymentTiming {
    /// Per-payment score delta.
    pub fn delta(&self) -> f64 {
        match self {
            PaymentTiming::Early => 4.0,
            PaymentTiming::OnTime => 2.0,
            PaymentTiming::LateMinor => -3.0,
            PaymentTiming::LateModerate => -5.0,
            PaymentTiming::LateSevere => -8.0,
        }
    }

    /// Whether this timing extends an early/on-time streak.
    pub fn extends_streak(&self) -> bool {
        matches!(self, PaymentTiming::Early | PaymentTiming::OnTime)
    }
}

/// Classifies a payment by its signed day-offset from the due date
/// (positive = late).
pub fn classify_payment(due_date: DateTime<Utc>, paid_at: DateTime<Utc>) -> PaymentTiming {
    let offset_days = (paid_at.date_naive() - due_date.date_naive()).num_days();
    if offset_days < -2 {
        PaymentTiming::Early
    } else if offset_days <= 0 {
        PaymentTiming::OnTime
    } else if offset_days <= 7 {
        PaymentTiming::LateMinor
    } else if offset_days <= 14 {
        PaymentTiming::LateModerate
    } else {
        PaymentTiming::LateSevere
    }
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Whole calendar months between two instants, floored at zero.
fn whole_months_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i32 {
    let mut months =
        (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32);
    if end.day() < start.day() {
        months -= 1;
    }
    months.max(0)
}

/// Verification sub-score: base 50, +25 identity, +10 selfie, +8 phone,
/// +12 connected funding source.
pub fn verification_score(user: &User) -> f64 {
    let mut score = 50.0;
    if user.is_identity_verified {
        score += 25.0;
    }
    if user.is_selfie_verified {
        score += 10.0;
    }
    if user.is_phone_verified {
        score += 8.0;
    }
    if user.has_funding_source() {
        score += 12.0;
    }
    clamp_score(score)
}

/// Tenure sub-score: base 50, four monthly bands with decreasing slopes,
/// capped at 100. Boundary values: 6 months = 62, 12 = 77, 24 = 89.
pub fn tenure_score(account_created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let months = whole_months_between(account_created_at, now) as f64;
    let score = if months < 6.0 {
        50.0 + 2.0 * months
    } else if months < 12.0 {
        62.0 + 2.5 * (months - 6.0)
    } else if months < 24.0 {
        77.0 + 1.0 * (months - 12.0)
    } else {
        89.0 + 0.25 * (months - 24.0)
    };
    clamp_score(score)
}

/// One-time streak bonus for the longest consecutive early/on-time run.
fn streak_bonus(longest_streak: u32) -> f64 {
    if longest_streak >= 100 {
        50.0
    } else if longest_streak >= 50 {
        35.0
    } else if longest_streak >= 25 {
        20.0
    } else if longest_streak >= 10 {
        10.0
    } else if longest_streak >= 5 {
        5.0
    } else {
        0.0
    }
}

/// Payment sub-score: base 50, per-payment timing deltas, a one-time
/// streak bonus, and -15 for every currently-missed obligation (which
/// also resets the active streak). Obligations must be ordered by due
/// date ascending.
pub fn payment_score(obligations: &[PaymentObligation], now: DateTime<Utc>) -> f64 {
    let mut score = 50.0;
    let mut current_streak: u32 = 0;
    let mut longest_streak: u32 = 0;

    for obligation in obligations {
        match obligation.status {
            ObligationStatus::Paid => {
                let paid_at = obligation.paid_at.unwrap_or(obligation.due_date);
                let timing = classify_payment(obligation.due_date, paid_at);
                score += timing.delta();
                if timing.extends_streak() {
                    current_streak += 1;
                    longest_streak = longest_streak.max(current_streak);
                } else {
                    current_streak = 0;
                }
            }
            // Overdue and unpaid, in any retry state, counts as missed.
            ObligationStatus::Overdue
            | ObligationStatus::Failed
            | ObligationStatus::Defaulted => {
                score -= 15.0;
                current_streak = 0;
            }
            ObligationStatus::Pending => {
                if obligation.due_date < now {
                    score -= 15.0;
                    current_streak = 0;
                }
                // Not yet due: no signal.
            }
        }
    }

    score += streak_bonus(longest_streak);
    clamp_score(score)
}

/// Completion sub-score: base 50 + completion ratio bonus + volume bonus
/// - default penalty.
pub fn completion_score(user: &User) -> f64 {
    let completed = user.loans_completed as f64;
    let defaulted = user.loans_defaulted as f64;
    let total = (user.loans_completed + user.loans_defaulted + user.loans_active) as f64;

    let mut score = 50.0;
    if total > 0.0 {
        score += (completed / total) * 25.0;
    }
    score += (completed * 4.0).min(40.0);
    score -= defaulted * 15.0;
    clamp_score(score)
}

/// Tiered bonus on a voucher's cumulative successful vouchee
/// completions: first 3 worth 15 each, next 4 worth 5 each, remainder
/// worth 2 each.
fn voucher_completion_bonus(completions: i32) -> f64 {
    let n = completions.max(0) as f64;
    if n <= 3.0 {
        n * 15.0
    } else if n <= 7.0 {
        45.0 + (n - 3.0) * 5.0
    } else {
        65.0 + (n - 7.0) * 2.0
    }
}

/// Social sub-score combining the vouchee side (boosts received) and the
/// voucher side (outcomes of users vouched for).
///
/// A user with no vouches in either direction scores exactly 50. A user
/// active on only one side scores that side alone; both sides combine
/// 60/40 vouchee/voucher.
pub fn social_score(vouches_received: &[Vouch], vouches_given: &[Vouch]) -> f64 {
    if vouches_received.is_empty() && vouches_given.is_empty() {
        return 50.0;
    }

    let received_boost: i32 = vouches_received
        .iter()
        .filter(|v| v.status == VouchStatus::Active)
        .map(|v| v.trust_score_boost)
        .sum();
    let vouchee_side = 50.0 + (received_boost as f64).min(50.0);

    // Counters are cumulative history; revoked vouches forfeit theirs.
    let completions: i32 = vouches_given
        .iter()
        .filter(|v| v.status != VouchStatus::Revoked)
        .map(|v| v.loans_completed)
        .sum();
    let defaults: i32 = vouches_given
        .iter()
        .filter(|v| v.status != VouchStatus::Revoked)
        .map(|v| v.loans_defaulted)
        .sum();
    let voucher_side = 50.0 + voucher_completion_bonus(completions) - 20.0 * defaults as f64;

    let combined = match (vouches_received.is_empty(), vouches_given.is_empty()) {
        (false, true) => vouchee_side,
        (true, false) => voucher_side,
        _ => 0.6 * vouchee_side + 0.4 * voucher_side,
    };
    clamp_score(combined)
}

/// Letter grade and label for a final score.
pub fn grade_for(score: i32) -> (&'static str, &'static str) {
    if score >= 90 {
        ("A", "Excellent")
    } else if score >= 75 {
        ("B", "Good")
    } else if score >= 60 {
        ("C", "Fair")
    } else if score >= 40 {
        ("D", "Building")
    } else {
        ("E", "At Risk")
    }
}

/// Computes the full trust score from a consistent input snapshot.
pub fn calculate(inputs: &ScoreInputs, now: DateTime<Utc>) -> TrustScore {
    let verification = verification_score(&inputs.user);
    let tenure = tenure_score(inputs.user.account_created_at, now);
    let payment = payment_score(&inputs.obligations, now);
    let completion = completion_score(&inputs.user);
    let social = social_score(&inputs.vouches_received, &inputs.vouches_given);

    let weight_mode = if inputs.user.has_borrower_history() {
        WeightMode::Borrower
    } else {
        WeightMode::Lender
    };
    let weights = match weight_mode {
        WeightMode::Borrower => &BORROWER_WEIGHTS,
        WeightMode::Lender => &LENDER_WEIGHTS,
    };

    let weighted = verification * weights.verification
        + tenure * weights.tenure
        + payment * weights.payment
        + completion * weights.completion
        + social * weights.social;
    let score = clamp_score(weighted).round() as i32;
    let (grade, label) = grade_for(score);

    TrustScore {
        user_id: inputs.user.id,
        verification_score: verification,
        tenure_score: tenure,
        payment_score: payment,
        completion_score: completion,
        social_score: social,
        weight_mode,
        score,
        grade: grade.to_string(),
        label: label.to_string(),
        calculated_at: now,
    }
}

/// Neutral default score written at user registration.
pub fn neutral_score(user_id: Uuid, now: DateTime<Utc>) -> TrustScore {
    let (grade, label) = grade_for(50);
    TrustScore {
        user_id,
        verification_score: 50.0,
        tenure_score: 50.0,
        payment_score: 50.0,
        completion_score: 50.0,
        social_score: 50.0,
        weight_mode: WeightMode::Lender,
        score: 50,
        grade: grade.to_string(),
        label: label.to_string(),
        calculated_at: now,
    }
}

/// Storage-backed scoring service with a short-TTL read cache.
///
/// Recomputation is read-mostly and safe to run concurrently for
/// different users; the snapshot read keeps a recompute consistent with
/// in-flight counter mutations for the same user.
pub struct TrustScoreService {
    storage: Arc<dyn Storage>,
    cache: Cache<Uuid, TrustScore>,
}

impl TrustScoreService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        // Scores are cheap to recompute; the cache only absorbs repeated
        // reads within a minute.
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(60))
            .max_capacity(10_000)
            .build();
        Self { storage, cache }
    }

    /// Recomputes the user's score from a fresh snapshot, persists it and
    /// refreshes the cache. Called after any relevant mutation.
    pub async fn recompute(&self, user_id: Uuid) -> Result<TrustScore, RiskError> {
        let inputs = self.storage.load_score_inputs(user_id).await?;
        let score = calculate(&inputs, Utc::now());
        self.storage.upsert_trust_score(&score).await?;
        self.cache.insert(user_id, score.clone()).await;
        tracing::debug!(
            "Trust score recomputed for user {}: {} ({})",
            user_id,
            score.score,
            score.grade
        );
        Ok(score)
    }

    /// Serves the cached or stored score, computing one if the user has
    /// never been scored.
    pub async fn get_or_compute(&self, user_id: Uuid) -> Result<TrustScore, RiskError> {
        if let Some(score) = self.cache.get(&user_id).await {
            return Ok(score);
        }
        if let Some(score) = self.storage.get_trust_score(user_id).await? {
            self.cache.insert(user_id, score.clone()).await;
            return Ok(score);
        }
        self.recompute(user_id).await
    }
}
