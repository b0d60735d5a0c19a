/// Tests for the vouch ledger
/// Covers the strength formula, creation guards and recalculation
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use peerlend_risk::errors::RiskError;
use peerlend_risk::models::{RelationshipType, TrustTier, User, VouchStatus, VouchType};
use peerlend_risk::storage::{MemoryStorage, Storage};
use peerlend_risk::vouch_ledger::{compute_strength, VouchLedger};

fn test_user(name: &str, tier: TrustTier) -> User {
    User {
        id: Uuid::new_v4(),
        full_name: name.to_string(),
        is_identity_verified: true,
        is_selfie_verified: true,
        is_phone_verified: true,
        funding_source_id: Some(format!("fs_{}", name)),
        account_created_at: Utc::now() - Duration::days(2000),
        payments_early: 0,
        payments_on_time: 0,
        payments_late: 0,
        payments_missed: 0,
        loans_completed: 0,
        loans_defaulted: 0,
        loans_active: 0,
        is_blocked: false,
        blocked_at: None,
        blocked_reason: None,
        default_count: 0,
        vouching_success_rate: 100.0,
        vouching_locked: false,
        tier,
    }
}

mod strength_formula_tests {
    use super::*;

    #[test]
    fn test_maximum_strength_scenario() {
        // Tier 4 voucher with a perfect record vouching for a spouse of
        // 10+ years with a repayment guarantee: 5 + 2 + 2 + 1 = 10.
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let known_since = Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap();
        let strength = compute_strength(
            TrustTier::Four,
            100.0,
            RelationshipType::Spouse,
            VouchType::Guarantee,
            known_since,
            now,
        );
        assert_eq!(strength, 10);
    }

    #[test]
    fn test_strength_floors_at_one() {
        // Weakest possible vouch: 1 + 0 + 0.5 + 0 = 1.5, scaled by the
        // worst multiplier to 0.525, rounded and clamped to the floor.
        let now = Utc::now();
        let strength = compute_strength(
            TrustTier::One,
            10.0,
            RelationshipType::Other,
            VouchType::Character,
            now,
            now,
        );
        assert_eq!(strength, 1);
    }

    #[test]
    fn test_success_rate_discounts_strength() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let known_since = Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap();
        // Same raw components as the maximum case, 50% rate: 10 * 0.55.
        let strength = compute_strength(
            TrustTier::Four,
            50.0,
            RelationshipType::Spouse,
            VouchType::Guarantee,
            known_since,
            now,
        );
        assert_eq!(strength, 6);
    }

    #[test]
    fn test_longevity_bands() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let base = |years: i64| {
            compute_strength(
                TrustTier::Two,
                100.0,
                RelationshipType::Colleague,
                VouchType::Character,
                now - Duration::days(years * 366),
                now,
            )
        };
        // 2 + longevity + 1 + 0, perfect multiplier.
        assert_eq!(base(0), 3);
        assert_eq!(base(1), 4); // +0.5 rounds up
        assert_eq!(base(2), 4);
        assert_eq!(base(5), 5); // +1.5 rounds up
        assert_eq!(base(10), 5);
    }
}

mod ledger_tests {
    use super::*;

    fn make_ledger(storage: Arc<MemoryStorage>) -> VouchLedger {
        VouchLedger::new(storage)
    }

    #[tokio::test]
    async fn test_create_vouch_persists_derived_strength() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let voucher = test_user("voucher", TrustTier::Four);
        let vouchee = test_user("vouchee", TrustTier::One);
        storage.insert_user(voucher.clone()).await;
        storage.insert_user(vouchee.clone()).await;

        let vouch = ledger
            .create_vouch(
                voucher.id,
                vouchee.id,
                RelationshipType::Sibling,
                VouchType::Family,
                Utc::now() - Duration::days(4000),
            )
            .await
            .unwrap();

        assert_eq!(vouch.status, VouchStatus::Active);
        assert_eq!(vouch.strength, vouch.trust_score_boost);
        assert!((1..=10).contains(&vouch.strength));
        assert!(storage.get_vouch(vouch.id).await.is_some());
    }

    #[tokio::test]
    async fn test_self_vouch_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let user = test_user("narcissist", TrustTier::Two);
        storage.insert_user(user.clone()).await;

        let result = ledger
            .create_vouch(
                user.id,
                user.id,
                RelationshipType::Other,
                VouchType::Character,
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(RiskError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_locked_or_blocked_voucher_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let mut locked = test_user("locked", TrustTier::Three);
        locked.vouching_locked = true;
        let mut blocked = test_user("blocked", TrustTier::Three);
        blocked.is_blocked = true;
        let vouchee = test_user("vouchee", TrustTier::One);
        storage.insert_user(locked.clone()).await;
        storage.insert_user(blocked.clone()).await;
        storage.insert_user(vouchee.clone()).await;

        for voucher_id in [locked.id, blocked.id] {
            let result = ledger
                .create_vouch(
                    voucher_id,
                    vouchee.id,
                    RelationshipType::CloseFriend,
                    VouchType::Character,
                    Utc::now() - Duration::days(800),
                )
                .await;
            assert!(matches!(result, Err(RiskError::InvalidInput(_))));
        }
    }

    #[tokio::test]
    async fn test_duplicate_active_vouch_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let voucher = test_user("voucher", TrustTier::Two);
        let vouchee = test_user("vouchee", TrustTier::One);
        storage.insert_user(voucher.clone()).await;
        storage.insert_user(vouchee.clone()).await;

        ledger
            .create_vouch(
                voucher.id,
                vouchee.id,
                RelationshipType::Colleague,
                VouchType::Character,
                Utc::now() - Duration::days(800),
            )
            .await
            .unwrap();

        let duplicate = ledger
            .create_vouch(
                voucher.id,
                vouchee.id,
                RelationshipType::Colleague,
                VouchType::Character,
                Utc::now() - Duration::days(800),
            )
            .await;
        assert!(matches!(duplicate, Err(RiskError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_revoke_is_voucher_only_and_single_shot() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let voucher = test_user("voucher", TrustTier::Two);
        let vouchee = test_user("vouchee", TrustTier::One);
        storage.insert_user(voucher.clone()).await;
        storage.insert_user(vouchee.clone()).await;

        let vouch = ledger
            .create_vouch(
                voucher.id,
                vouchee.id,
                RelationshipType::Neighbor,
                VouchType::Character,
                Utc::now() - Duration::days(400),
            )
            .await
            .unwrap();

        // The vouchee cannot withdraw a vouch they received.
        let stranger = ledger.revoke_vouch(vouch.id, vouchee.id).await;
        assert!(matches!(stranger, Err(RiskError::InvalidInput(_))));

        ledger.revoke_vouch(vouch.id, voucher.id).await.unwrap();
        let revoked = storage.get_vouch(vouch.id).await.unwrap();
        assert_eq!(revoked.status, VouchStatus::Revoked);

        let again = ledger.revoke_vouch(vouch.id, voucher.id).await;
        assert!(matches!(again, Err(RiskError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_tier_change_recalculates_given_vouches() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let mut voucher = test_user("voucher", TrustTier::One);
        let vouchee = test_user("vouchee", TrustTier::One);
        storage.insert_user(voucher.clone()).await;
        storage.insert_user(vouchee.clone()).await;

        let vouch = ledger
            .create_vouch(
                voucher.id,
                vouchee.id,
                RelationshipType::Parent,
                VouchType::Guarantee,
                Utc::now() - Duration::days(4000),
            )
            .await
            .unwrap();
        // 1 + 2 + 2 + 1 = 6 at tier one.
        assert_eq!(vouch.strength, 6);

        voucher.tier = TrustTier::Four;
        storage.insert_user(voucher.clone()).await;

        let updated = ledger.recalculate_for_voucher(voucher.id).await.unwrap();
        assert_eq!(updated, 1);

        let vouch = storage.get_vouch(vouch.id).await.unwrap();
        // 5 + 2 + 2 + 1 = 10 at tier four.
        assert_eq!(vouch.strength, 10);
        assert_eq!(vouch.trust_score_boost, 10);
    }

    #[tokio::test]
    async fn test_success_rate_ignores_revoked_vouches() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let voucher = test_user("voucher", TrustTier::Three);
        storage.insert_user(voucher.clone()).await;

        let mut revoked = peerlend_risk::models::Vouch {
            id: Uuid::new_v4(),
            voucher_id: voucher.id,
            vouchee_id: Uuid::new_v4(),
            relationship: RelationshipType::Colleague,
            vouch_type: VouchType::Character,
            known_since: Utc::now() - Duration::days(800),
            strength: 3,
            trust_score_boost: 3,
            status: VouchStatus::Revoked,
            loans_completed: 0,
            loans_defaulted: 5,
            created_at: Utc::now(),
        };
        storage.insert_vouch(&revoked).await.unwrap();

        revoked.id = Uuid::new_v4();
        revoked.status = VouchStatus::Active;
        revoked.loans_completed = 3;
        revoked.loans_defaulted = 1;
        storage.insert_vouch(&revoked).await.unwrap();

        // Only the active vouch counts: 3 / 4.
        let rate = ledger.refresh_success_rate(voucher.id).await.unwrap();
        assert_eq!(rate, 75.0);
    }

    #[tokio::test]
    async fn test_fresh_voucher_rate_defaults_to_100() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let voucher = test_user("voucher", TrustTier::Two);
        storage.insert_user(voucher.clone()).await;

        let rate = ledger.refresh_success_rate(voucher.id).await.unwrap();
        assert_eq!(rate, 100.0);
    }

    #[tokio::test]
    async fn test_vouchee_completion_credits_every_active_voucher() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = make_ledger(storage.clone());

        let voucher_a = test_user("voucher_a", TrustTier::Two);
        let voucher_b = test_user("voucher_b", TrustTier::Two);
        let vouchee = test_user("vouchee", TrustTier::One);
        storage.insert_user(voucher_a.clone()).await;
        storage.insert_user(voucher_b.clone()).await;
        storage.insert_user(vouchee.clone()).await;

        let vouch_a = ledger
            .create_vouch(
                voucher_a.id,
                vouchee.id,
                RelationshipType::CloseFriend,
                VouchType::Character,
                Utc::now() - Duration::days(800),
            )
            .await
            .unwrap();
        ledger
            .create_vouch(
                voucher_b.id,
                vouchee.id,
                RelationshipType::Colleague,
                VouchType::Employment,
                Utc::now() - Duration::days(800),
            )
            .await
            .unwrap();

        let mut credited = ledger.record_vouchee_completion(vouchee.id).await.unwrap();
        credited.sort();
        let mut expected = vec![voucher_a.id, voucher_b.id];
        expected.sort();
        assert_eq!(credited, expected);

        let vouch_a = storage.get_vouch(vouch_a.id).await.unwrap();
        assert_eq!(vouch_a.loans_completed, 1);
    }
}
