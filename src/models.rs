use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

// ============ Database Models ============

/// A marketplace member, holding the counters the risk engine reads and
/// mutates.
///
/// Users never mutate their own derived trust attributes; the retry state
/// machine and the accountability cascade are the only writers.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier for the user.
    pub id: Uuid,
    /// Display name.
    pub full_name: String,
    /// Whether the user passed identity-document verification.
    pub is_identity_verified: bool,
    /// Whether the user passed biometric selfie verification.
    pub is_selfie_verified: bool,
    /// Whether the user's phone number is verified.
    pub is_phone_verified: bool,
    /// Funding endpoint at the Payments Gateway, if one is connected.
    pub funding_source_id: Option<String>,
    /// Account registration timestamp; drives the tenure sub-score.
    pub account_created_at: DateTime<Utc>,
    /// Payments made more than 2 days before the due date.
    pub payments_early: i32,
    /// Payments made between 2 days early and the due date.
    pub payments_on_time: i32,
    /// Payments made after the due date.
    pub payments_late: i32,
    /// Lifetime tally of obligations that exhausted their collection
    /// retries. Never decremented; the payment sub-score reads live
    /// obligation state, not this counter.
    pub payments_missed: i32,
    /// Loans fully repaid as borrower.
    pub loans_completed: i32,
    /// Loans defaulted as borrower.
    pub loans_defaulted: i32,
    /// Loans currently open as borrower.
    pub loans_active: i32,
    /// Whether the borrower is blocked from new activity.
    pub is_blocked: bool,
    /// When the block was imposed.
    pub blocked_at: Option<DateTime<Utc>>,
    /// Human-readable block reason.
    pub blocked_reason: Option<String>,
    /// Lifetime count of loan defaults.
    pub default_count: i32,
    /// Ratio of successful vs. defaulted vouchees, 0-100. Starts at 100.
    pub vouching_success_rate: f64,
    /// Whether vouching privileges are locked pending manual review.
    pub vouching_locked: bool,
    /// Social trust tier (1-4 vouch-count bracket).
    pub tier: TrustTier,
}

impl User {
    /// Whether the user has a funding endpoint the gateway can draw from
    /// or pay into.
    pub fn has_funding_source(&self) -> bool {
        self.funding_source_id.is_some()
    }

    /// Whether the user has ever had a loan as borrower. Selects the
    /// weight mode.
    pub fn has_borrower_history(&self) -> bool {
        self.loans_completed + self.loans_defaulted + self.loans_active > 0
    }
}

/// Social trust tier, a discrete vouch-count bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, sqlx::Type, Serialize, Deserialize)]
#[repr(i16)]
pub enum TrustTier {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl TrustTier {
    /// Base contribution of the voucher's tier to vouch strength.
    pub fn strength_base(&self) -> f64 {
        match self {
            TrustTier::Four => 5.0,
            TrustTier::Three => 3.5,
            TrustTier::Two => 2.0,
            TrustTier::One => 1.0,
        }
    }
}

/// Weighting profile applied when combining the five sub-scores.
///
/// An explicit enum rather than a boolean so a future mixed mode does not
/// force a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum WeightMode {
    /// User has at least one loan as borrower: payment history dominates.
    Borrower,
    /// Lender-only user: social and verification signals dominate.
    Lender,
}

/// Derived creditworthiness record, one per user.
///
/// Fully recomputable from `User` + vouch ledger + payment history; never
/// hand-edited and never deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TrustScore {
    /// The scored user.
    pub user_id: Uuid,
    /// Verification sub-score, 0-100.
    pub verification_score: f64,
    /// Tenure sub-score, 0-100.
    pub tenure_score: f64,
    /// Payment-history sub-score, 0-100.
    pub payment_score: f64,
    /// Loan-completion sub-score, 0-100.
    pub completion_score: f64,
    /// Social (vouch) sub-score, 0-100.
    pub social_score: f64,
    /// Weight profile used for the final combination.
    pub weight_mode: WeightMode,
    /// Final weighted score, rounded and clamped to 0-100.
    pub score: i32,
    /// Letter grade for the final score.
    pub grade: String,
    /// Human-readable label for the grade.
    pub label: String,
    /// When this score was computed.
    pub calculated_at: DateTime<Utc>,
}

/// Status of a scheduled payment obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum ObligationStatus {
    /// Not yet due, or due and not yet attempted.
    Pending,
    /// Past due with no collection attempt recorded yet.
    Overdue,
    /// Collected. Terminal.
    Paid,
    /// A collection attempt failed; another retry is scheduled.
    Failed,
    /// Retries exhausted. Terminal and immutable except audit fields.
    Defaulted,
}

impl ObligationStatus {
    /// Whether the obligation still owes money.
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self,
            ObligationStatus::Pending | ObligationStatus::Overdue | ObligationStatus::Failed
        )
    }
}

/// One schedule entry of a loan's repayment plan.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentObligation {
    /// Unique identifier for the obligation.
    pub id: Uuid,
    /// Owning loan.
    pub loan_id: Uuid,
    /// When payment is due.
    pub due_date: DateTime<Utc>,
    /// Amount owed.
    pub amount: BigDecimal,
    /// Current state in the retry machine.
    pub status: ObligationStatus,
    /// When the obligation was actually paid, if ever.
    pub paid_at: Option<DateTime<Utc>>,
    /// Collection attempts made so far. Never exceeds `MAX_RETRIES`.
    pub retry_count: i32,
    /// Timestamp of the most recent attempt.
    pub last_retry_at: Option<DateTime<Utc>>,
    /// When the next attempt becomes eligible.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Append-only log of collection attempts.
    pub retry_history: Json<Vec<RetryAttempt>>,
    /// Whether exhausting this obligation triggered a borrower block.
    pub caused_block: bool,
}

/// One immutable entry in an obligation's retry history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// When the attempt ran.
    pub attempted_at: DateTime<Utc>,
    /// 1-based attempt number.
    pub attempt_number: i32,
    /// Whether the gateway collected the payment.
    pub succeeded: bool,
    /// Gateway transfer id on success.
    pub transfer_id: Option<String>,
    /// Gateway error or local reason on failure.
    pub error: Option<String>,
}

/// Status of a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum LoanStatus {
    Active,
    /// All obligations paid.
    Completed,
    /// Some obligation exhausted its retries.
    Defaulted,
}

/// A funded loan between one borrower and one lender.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Loan {
    /// Unique identifier for the loan.
    pub id: Uuid,
    /// The borrowing user.
    pub borrower_id: Uuid,
    /// The funding user.
    pub lender_id: Uuid,
    /// Principal amount.
    pub principal: BigDecimal,
    /// Current loan state.
    pub status: LoanStatus,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// Relationship class between voucher and vouchee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum RelationshipType {
    Spouse,
    Parent,
    Sibling,
    Child,
    CloseFriend,
    BusinessPartner,
    Colleague,
    Classmate,
    Neighbor,
    Other,
}

impl RelationshipType {
    /// Relationship bonus applied in the vouch strength formula.
    pub fn strength_bonus(&self) -> f64 {
        match self {
            // Family class
            RelationshipType::Spouse
            | RelationshipType::Parent
            | RelationshipType::Sibling
            | RelationshipType::Child => 2.0,
            // Close ties
            RelationshipType::CloseFriend | RelationshipType::BusinessPartner => 1.5,
            // Peers
            RelationshipType::Colleague | RelationshipType::Classmate => 1.0,
            RelationshipType::Neighbor | RelationshipType::Other => 0.5,
        }
    }
}

/// What the voucher is attesting to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum VouchType {
    /// Voucher accepts accountability for the vouchee's repayment.
    Guarantee,
    /// Family attestation.
    Family,
    /// Attestation of stable employment.
    Employment,
    /// General character reference.
    Character,
}

impl VouchType {
    /// Vouch-type bonus applied in the strength formula.
    pub fn strength_bonus(&self) -> f64 {
        match self {
            VouchType::Guarantee => 1.0,
            VouchType::Family => 0.75,
            VouchType::Employment => 0.5,
            VouchType::Character => 0.0,
        }
    }
}

/// Status of a vouch edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum VouchStatus {
    Active,
    /// Withdrawn by the voucher; counters are forfeited.
    Revoked,
    /// Frozen pending manual review.
    Locked,
}

/// A directed social attestation from `voucher_id` to `vouchee_id`.
///
/// `strength` is always recomputed through the ledger formula, never
/// assigned directly; `trust_score_boost` always equals `strength`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Vouch {
    /// Unique identifier for the vouch.
    pub id: Uuid,
    /// The user giving the vouch.
    pub voucher_id: Uuid,
    /// The user being vouched for.
    pub vouchee_id: Uuid,
    /// Relationship between the two users.
    pub relationship: RelationshipType,
    /// What is being attested.
    pub vouch_type: VouchType,
    /// Since when the voucher has known the vouchee.
    pub known_since: DateTime<Utc>,
    /// Derived strength, 1-10.
    pub strength: i32,
    /// Trust score boost granted to the vouchee. Equals `strength`.
    pub trust_score_boost: i32,
    /// Current vouch state.
    pub status: VouchStatus,
    /// Vouchee loans completed since this vouch began.
    pub loans_completed: i32,
    /// Vouchee loans defaulted since this vouch began.
    pub loans_defaulted: i32,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// Status of a borrower block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Debt outstanding; borrower fully blocked.
    Active,
    /// Debt repaid; restriction window running.
    DebtCleared,
    /// Restriction window elapsed; block no longer in force.
    Lifted,
}

/// Audit record created when a borrower is blocked after exhausting
/// payment retries. At most one `Active` block per borrower.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BorrowerBlock {
    /// Unique identifier for the block.
    pub id: Uuid,
    /// The blocked borrower.
    pub user_id: Uuid,
    /// The loan whose default triggered the block.
    pub loan_id: Uuid,
    /// Why the block was imposed.
    pub reason: String,
    /// Sum of outstanding obligation amounts at block time.
    pub total_debt_at_block: BigDecimal,
    /// Trust score snapshot taken just before the block.
    pub rating_before_block: Option<i32>,
    /// Current block state.
    pub status: BlockStatus,
    /// When the block was imposed.
    pub blocked_at: DateTime<Utc>,
    /// When outstanding debt reached exactly zero.
    pub debt_cleared_at: Option<DateTime<Utc>>,
    /// End of the post-clearance restriction window.
    pub restriction_ends_at: Option<DateTime<Utc>>,
}

/// Durable idempotency guard for gateway transfers.
///
/// One row per (loan, obligation) pair; inserting the row is the
/// check-then-act step that guarantees at most one real transfer executes
/// when two batch runs race.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Unique identifier for the record.
    pub id: Uuid,
    /// Loan the transfer belongs to.
    pub loan_id: Uuid,
    /// Obligation the transfer settles.
    pub obligation_id: Uuid,
    /// Opaque transfer id returned by the Payments Gateway.
    pub transfer_id: String,
    /// Amount moved.
    pub amount: BigDecimal,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}
