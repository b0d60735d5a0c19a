/// Property-based tests for the score and strength formulas
/// Whatever the inputs, derived values stay inside their documented ranges
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use proptest::prelude::*;
use sqlx::types::Json;
use uuid::Uuid;

use peerlend_risk::models::{
    ObligationStatus, PaymentObligation, RelationshipType, TrustTier, User, Vouch, VouchStatus,
    VouchType,
};
use peerlend_risk::trust_score::{calculate, grade_for, ScoreInputs};
use peerlend_risk::vouch_ledger::compute_strength;

fn arb_tier() -> impl Strategy<Value = TrustTier> {
    prop_oneof![
        Just(TrustTier::One),
        Just(TrustTier::Two),
        Just(TrustTier::Three),
        Just(TrustTier::Four),
    ]
}

fn arb_relationship() -> impl Strategy<Value = RelationshipType> {
    prop_oneof![
        Just(RelationshipType::Spouse),
        Just(RelationshipType::Parent),
        Just(RelationshipType::Sibling),
        Just(RelationshipType::Child),
        Just(RelationshipType::CloseFriend),
        Just(RelationshipType::BusinessPartner),
        Just(RelationshipType::Colleague),
        Just(RelationshipType::Classmate),
        Just(RelationshipType::Neighbor),
        Just(RelationshipType::Other),
    ]
}

fn arb_vouch_type() -> impl Strategy<Value = VouchType> {
    prop_oneof![
        Just(VouchType::Guarantee),
        Just(VouchType::Family),
        Just(VouchType::Employment),
        Just(VouchType::Character),
    ]
}

fn build_user(
    verified: (bool, bool, bool, bool),
    tenure_days: i64,
    counters: (i32, i32, i32),
) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        full_name: "Prop Test".to_string(),
        is_identity_verified: verified.0,
        is_selfie_verified: verified.1,
        is_phone_verified: verified.2,
        funding_source_id: verified.3.then(|| "fs_prop".to_string()),
        account_created_at: now - Duration::days(tenure_days),
        payments_early: 0,
        payments_on_time: 0,
        payments_late: 0,
        payments_missed: 0,
        loans_completed: counters.0,
        loans_defaulted: counters.1,
        loans_active: counters.2,
        is_blocked: false,
        blocked_at: None,
        blocked_reason: None,
        default_count: counters.1,
        vouching_success_rate: 100.0,
        vouching_locked: false,
        tier: TrustTier::One,
    }
}

fn build_obligation(due_days_ago: i64, pay_delay: Option<i64>) -> PaymentObligation {
    let now = Utc::now();
    let due = now - Duration::days(due_days_ago);
    PaymentObligation {
        id: Uuid::new_v4(),
        loan_id: Uuid::new_v4(),
        due_date: due,
        amount: BigDecimal::from(100),
        status: if pay_delay.is_some() {
            ObligationStatus::Paid
        } else {
            ObligationStatus::Failed
        },
        paid_at: pay_delay.map(|d| due + Duration::days(d)),
        retry_count: 0,
        last_retry_at: None,
        next_retry_at: None,
        retry_history: Json(Vec::new()),
        caused_block: false,
    }
}

fn build_vouch(vouchee_id: Uuid, boost: i32, completed: i32, defaulted: i32) -> Vouch {
    Vouch {
        id: Uuid::new_v4(),
        voucher_id: Uuid::new_v4(),
        vouchee_id,
        relationship: RelationshipType::Colleague,
        vouch_type: VouchType::Character,
        known_since: Utc::now() - Duration::days(500),
        strength: boost,
        trust_score_boost: boost,
        status: VouchStatus::Active,
        loans_completed: completed,
        loans_defaulted: defaulted,
        created_at: Utc::now(),
    }
}

proptest! {
    #[test]
    fn trust_score_stays_in_range(
        verified in (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()),
        tenure_days in 0i64..5000,
        loans in (0i32..50, 0i32..10, 0i32..5),
        payments in prop::collection::vec((0i64..365, prop::option::of(-10i64..30)), 0..40),
        boosts in prop::collection::vec(1i32..=10, 0..10),
        given in prop::collection::vec((0i32..20, 0i32..5), 0..10),
    ) {
        let user = build_user(verified, tenure_days, loans);
        let user_id = user.id;

        let mut obligations: Vec<_> = payments
            .into_iter()
            .map(|(days_ago, delay)| build_obligation(days_ago, delay))
            .collect();
        obligations.sort_by_key(|o| o.due_date);

        let vouches_received: Vec<_> = boosts
            .into_iter()
            .map(|b| build_vouch(user_id, b, 0, 0))
            .collect();
        let vouches_given: Vec<_> = given
            .into_iter()
            .map(|(c, d)| build_vouch(Uuid::new_v4(), 5, c, d))
            .collect();

        let inputs = ScoreInputs { user, obligations, vouches_received, vouches_given };
        let score = calculate(&inputs, Utc::now());

        prop_assert!((0..=100).contains(&score.score));
        prop_assert!((0.0..=100.0).contains(&score.verification_score));
        prop_assert!((0.0..=100.0).contains(&score.tenure_score));
        prop_assert!((0.0..=100.0).contains(&score.payment_score));
        prop_assert!((0.0..=100.0).contains(&score.completion_score));
        prop_assert!((0.0..=100.0).contains(&score.social_score));

        // The stored grade always matches the stored score.
        let (grade, label) = grade_for(score.score);
        prop_assert_eq!(&score.grade, grade);
        prop_assert_eq!(&score.label, label);
    }

    #[test]
    fn vouch_strength_stays_in_range(
        tier in arb_tier(),
        success_rate in 0.0f64..=100.0,
        relationship in arb_relationship(),
        vouch_type in arb_vouch_type(),
        known_days in 0i64..15000,
    ) {
        let now = Utc::now();
        let strength = compute_strength(
            tier,
            success_rate,
            relationship,
            vouch_type,
            now - Duration::days(known_days),
            now,
        );
        prop_assert!((1..=10).contains(&strength));
    }
}
