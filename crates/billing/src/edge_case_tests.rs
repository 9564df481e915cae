// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Subscription Engine
//!
//! Tests critical boundary conditions in:
//! - Plan catalog and free default (ENT-P01 to ENT-P04)
//! - Usage views (ENT-U01 to ENT-U07)
//! - Entitlement decisions (ENT-E01 to ENT-E06)
//! - Lifecycle transitions (ENT-L01 to ENT-L06)
//! - Coupon validation (ENT-C01 to ENT-C08)
//! - Invoice status monotonicity (ENT-I01 to ENT-I04)

#[cfg(test)]
mod plan_catalog_tests {
    use crate::catalog::Plan;
    use receiptly_shared::{FeatureFlag, PlanTier};

    // =========================================================================
    // ENT-P01: Free default is the Free tier with a finite receipt cap
    // =========================================================================
    #[test]
    fn test_free_default_shape() {
        let plan = Plan::free_default();
        assert_eq!(plan.tier, PlanTier::Free);
        assert_eq!(plan.monthly_price_cents, 0);
        assert_eq!(plan.features.receipts_per_month, Some(25));
        assert_eq!(plan.max_users, Some(1));
    }

    // =========================================================================
    // ENT-P02: Free default allows OCR but no paid capability
    // =========================================================================
    #[test]
    fn test_free_default_feature_matrix() {
        let plan = Plan::free_default();
        assert!(plan.features.allows(FeatureFlag::ReceiptOcr));
        assert!(!plan.features.allows(FeatureFlag::ApiAccess));
        assert!(!plan.features.allows(FeatureFlag::PayoutExport));
        assert!(!plan.features.allows(FeatureFlag::ApprovalWorkflows));
        assert!(!plan.features.allows(FeatureFlag::UnlimitedReceipts));
    }

    // =========================================================================
    // ENT-P03: Two calls to the free default are identical (no drift)
    // =========================================================================
    #[test]
    fn test_free_default_is_stable() {
        let a = Plan::free_default();
        let b = Plan::free_default();
        assert_eq!(a.features, b.features);
        assert_eq!(a.max_users, b.max_users);
        assert_eq!(a.tier, b.tier);
    }

    // =========================================================================
    // ENT-P04: UnlimitedReceipts flag tracks the receipt cap being null
    // =========================================================================
    #[test]
    fn test_unlimited_receipts_flag() {
        let mut plan = Plan::free_default();
        assert!(!plan.features.allows(FeatureFlag::UnlimitedReceipts));
        plan.features.receipts_per_month = None;
        assert!(plan.features.allows(FeatureFlag::UnlimitedReceipts));
    }
}

#[cfg(test)]
mod usage_view_tests {
    use crate::usage::UsageView;

    // =========================================================================
    // ENT-U01: Zero limit never divides by zero
    // =========================================================================
    #[test]
    fn test_zero_limit_percentage_is_zero() {
        let view = UsageView::new(10, Some(0));
        assert_eq!(view.percentage, 0);
        assert!(view.at_limit());
    }

    // =========================================================================
    // ENT-U02: Unlimited usage never reports a limit or percentage
    // =========================================================================
    #[test]
    fn test_unlimited_view() {
        let view = UsageView::new(1_000_000, None);
        assert_eq!(view.remaining, None);
        assert_eq!(view.percentage, 0);
        assert!(!view.at_limit());
        assert!(!view.approaching_limit());
    }

    // =========================================================================
    // ENT-U03: Exactly at the limit counts as at_limit
    // =========================================================================
    #[test]
    fn test_exactly_at_limit() {
        let view = UsageView::new(25, Some(25));
        assert!(view.at_limit());
        assert_eq!(view.remaining, Some(0));
        assert_eq!(view.percentage, 100);
    }

    // =========================================================================
    // ENT-U04: One under the limit is not at_limit
    // =========================================================================
    #[test]
    fn test_one_under_limit() {
        let view = UsageView::new(24, Some(25));
        assert!(!view.at_limit());
        assert_eq!(view.remaining, Some(1));
    }

    // =========================================================================
    // ENT-U05: Usage past the limit clamps remaining at zero
    // =========================================================================
    #[test]
    fn test_overrun_clamps_remaining() {
        let view = UsageView::new(30, Some(25));
        assert!(view.at_limit());
        assert_eq!(view.remaining, Some(0));
        assert_eq!(view.percentage, 120);
    }

    // =========================================================================
    // ENT-U06: Exactly 80% is not yet approaching (threshold is strict)
    // =========================================================================
    #[test]
    fn test_exactly_eighty_percent_not_approaching() {
        let view = UsageView::new(80, Some(100));
        assert!(!view.approaching_limit());
        let view = UsageView::new(81, Some(100));
        assert!(view.approaching_limit());
    }

    // =========================================================================
    // ENT-U07: at_limit implies approaching_limit for finite limits
    // =========================================================================
    #[test]
    fn test_at_limit_is_also_approaching() {
        let view = UsageView::new(100, Some(100));
        assert!(view.at_limit());
        assert!(view.approaching_limit());
    }
}

#[cfg(test)]
mod entitlement_tests {
    use crate::catalog::Plan;
    use crate::entitlement::{evaluate_feature, recommend_upgrade, UpgradeTrigger};
    use crate::usage::UsageCounters;
    use receiptly_shared::{FeatureFlag, PlanTier};

    fn usage(receipts: i64, users: i32) -> UsageCounters {
        UsageCounters {
            current_month_receipts: receipts,
            current_user_count: users,
            usage_reset_at: None,
        }
    }

    // =========================================================================
    // ENT-E01: Feature not in matrix denies with next-tier upgrade hint
    // =========================================================================
    #[test]
    fn test_missing_feature_denied_with_hint() {
        let plan = Plan::free_default();
        let decision = evaluate_feature(
            FeatureFlag::ApiAccess,
            plan.tier,
            &plan.features,
            &usage(0, 1),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.upgrade_to, Some(PlanTier::Starter));
    }

    // =========================================================================
    // ENT-E02: OCR denied at receipt cap even though the flag is on
    // =========================================================================
    #[test]
    fn test_ocr_denied_at_receipt_cap() {
        let plan = Plan::free_default();
        let decision = evaluate_feature(
            FeatureFlag::ReceiptOcr,
            plan.tier,
            &plan.features,
            &usage(25, 1),
        );
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("limit of 25"));
    }

    // =========================================================================
    // ENT-E03: OCR allowed one receipt under the cap
    // =========================================================================
    #[test]
    fn test_ocr_allowed_under_cap() {
        let plan = Plan::free_default();
        let decision = evaluate_feature(
            FeatureFlag::ReceiptOcr,
            plan.tier,
            &plan.features,
            &usage(24, 1),
        );
        assert!(decision.allowed);
    }

    // =========================================================================
    // ENT-E04: Top tier denial carries no upgrade hint
    // =========================================================================
    #[test]
    fn test_top_tier_no_upgrade_hint() {
        let mut plan = Plan::free_default();
        plan.tier = PlanTier::Enterprise;
        let decision = evaluate_feature(
            FeatureFlag::ApiAccess,
            plan.tier,
            &plan.features,
            &usage(0, 1),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.upgrade_to, None);
    }

    // =========================================================================
    // ENT-E05: Receipt-limit trigger outranks seat-limit trigger
    // =========================================================================
    #[test]
    fn test_upgrade_trigger_priority() {
        let plan = Plan::free_default();
        let rec = recommend_upgrade(plan.tier, &plan.features, plan.max_users, &usage(25, 1))
            .expect("should recommend");
        assert_eq!(rec.trigger, UpgradeTrigger::AtReceiptLimit);
        assert_eq!(rec.recommended_tier, PlanTier::Starter);
    }

    // =========================================================================
    // ENT-E06: No recommendation at the top tier regardless of usage
    // =========================================================================
    #[test]
    fn test_no_recommendation_at_top_tier() {
        let plan = Plan::free_default();
        let rec = recommend_upgrade(
            PlanTier::Enterprise,
            &plan.features,
            plan.max_users,
            &usage(1_000, 100),
        );
        assert!(rec.is_none());
    }
}

#[cfg(test)]
mod lifecycle_transition_tests {
    use receiptly_shared::SubscriptionStatus::*;

    // =========================================================================
    // ENT-L01: Happy-path transitions are legal
    // =========================================================================
    #[test]
    fn test_happy_path_transitions() {
        assert!(Trialing.can_transition_to(Active));
        assert!(Active.can_transition_to(PastDue));
        assert!(PastDue.can_transition_to(Active));
        assert!(Active.can_transition_to(Canceled));
    }

    // =========================================================================
    // ENT-L02: Skipping the dunning path is illegal
    // =========================================================================
    #[test]
    fn test_cannot_skip_dunning() {
        assert!(!Active.can_transition_to(Unpaid));
        assert!(!Trialing.can_transition_to(PastDue));
        assert!(!Trialing.can_transition_to(Unpaid));
    }

    // =========================================================================
    // ENT-L03: Self transitions are never legal
    // =========================================================================
    #[test]
    fn test_no_self_transitions() {
        for status in [Trialing, Active, PastDue, Canceled, Unpaid, Paused] {
            assert!(!status.can_transition_to(status), "{status} -> {status}");
        }
    }

    // =========================================================================
    // ENT-L04: Pause is only reachable from Active and returns to Active
    // =========================================================================
    #[test]
    fn test_pause_reachability() {
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(!Trialing.can_transition_to(Paused));
        assert!(!PastDue.can_transition_to(Paused));
    }

    // =========================================================================
    // ENT-L05: Entitled statuses include the grace period
    // =========================================================================
    #[test]
    fn test_entitled_statuses() {
        assert!(Active.is_entitled());
        assert!(Trialing.is_entitled());
        assert!(PastDue.is_entitled());
        assert!(!Unpaid.is_entitled());
        assert!(!Canceled.is_entitled());
        assert!(!Paused.is_entitled());
    }

    // =========================================================================
    // ENT-L06: Canceled is the only terminal status
    // =========================================================================
    #[test]
    fn test_terminal_statuses() {
        assert!(Canceled.is_terminal());
        for status in [Trialing, Active, PastDue, Unpaid, Paused] {
            assert!(!status.is_terminal());
        }
    }
}

#[cfg(test)]
mod coupon_validation_tests {
    use crate::coupons::{normalize_code, validate_coupon, Coupon};
    use crate::error::BillingError;
    use receiptly_shared::{CouponDuration, CouponId, DiscountType, PlanTier};
    use time::{Duration, OffsetDateTime};

    fn coupon(code: &str) -> Coupon {
        let now = OffsetDateTime::now_utc();
        Coupon {
            id: CouponId::new(),
            code: code.to_string(),
            discount_type: DiscountType::Percent,
            value: 20,
            applies_to_plans: None,
            min_users: None,
            max_redemptions: Some(100),
            max_redemptions_per_org: 1,
            redemption_count: 0,
            duration: CouponDuration::Once,
            duration_in_months: None,
            valid_from: now - Duration::days(1),
            valid_until: Some(now + Duration::days(30)),
            active: true,
            created_at: now,
        }
    }

    // =========================================================================
    // ENT-C01: A fresh coupon validates cleanly
    // =========================================================================
    #[test]
    fn test_fresh_coupon_validates() {
        let c = coupon("WELCOME20");
        let now = OffsetDateTime::now_utc();
        assert!(validate_coupon(&c, now, 0, PlanTier::Starter, 5).is_ok());
    }

    // =========================================================================
    // ENT-C02: Last redemption slot passes, one past it fails
    // =========================================================================
    #[test]
    fn test_redemption_cap_boundary() {
        let mut c = coupon("LAST-SLOT");
        let now = OffsetDateTime::now_utc();

        c.redemption_count = 99;
        assert!(validate_coupon(&c, now, 0, PlanTier::Starter, 5).is_ok());

        c.redemption_count = 100;
        let err = validate_coupon(&c, now, 0, PlanTier::Starter, 5).unwrap_err();
        assert!(matches!(err, BillingError::Conflict(msg) if msg.contains("redemption limit")));
    }

    // =========================================================================
    // ENT-C03: validity window boundaries
    // =========================================================================
    #[test]
    fn test_validity_window() {
        let mut c = coupon("WINDOW");
        let now = OffsetDateTime::now_utc();

        c.valid_from = now + Duration::hours(1);
        assert!(validate_coupon(&c, now, 0, PlanTier::Starter, 5).is_err());

        c.valid_from = now - Duration::days(10);
        c.valid_until = Some(now - Duration::hours(1));
        assert!(validate_coupon(&c, now, 0, PlanTier::Starter, 5).is_err());
    }

    // =========================================================================
    // ENT-C04: Per-org cap is independent of the global cap
    // =========================================================================
    #[test]
    fn test_per_org_cap() {
        let c = coupon("ONE-PER-ORG");
        let now = OffsetDateTime::now_utc();
        let err = validate_coupon(&c, now, 1, PlanTier::Starter, 5).unwrap_err();
        assert!(matches!(err, BillingError::Conflict(msg) if msg.contains("already redeemed")));
    }

    // =========================================================================
    // ENT-C05: Plan restriction only admits listed tiers
    // =========================================================================
    #[test]
    fn test_plan_restriction() {
        let mut c = coupon("TEAM-ONLY");
        c.applies_to_plans = Some(vec!["team".to_string(), "business".to_string()]);
        let now = OffsetDateTime::now_utc();

        assert!(validate_coupon(&c, now, 0, PlanTier::Team, 5).is_ok());
        assert!(validate_coupon(&c, now, 0, PlanTier::Starter, 5).is_err());
    }

    // =========================================================================
    // ENT-C06: Minimum-seat requirement at the boundary
    // =========================================================================
    #[test]
    fn test_min_users_boundary() {
        let mut c = coupon("BIG-TEAM");
        c.min_users = Some(10);
        let now = OffsetDateTime::now_utc();

        assert!(validate_coupon(&c, now, 0, PlanTier::Team, 10).is_ok());
        assert!(validate_coupon(&c, now, 0, PlanTier::Team, 9).is_err());
    }

    // =========================================================================
    // ENT-C07: Inactive coupon fails before any other check
    // =========================================================================
    #[test]
    fn test_inactive_checked_first() {
        let mut c = coupon("DEAD");
        c.active = false;
        c.redemption_count = 100;
        let now = OffsetDateTime::now_utc();
        let err = validate_coupon(&c, now, 5, PlanTier::Free, 0).unwrap_err();
        assert!(matches!(err, BillingError::Conflict(msg) if msg.contains("no longer active")));
    }

    // =========================================================================
    // ENT-C08: Code normalization trims, uppercases, and rejects junk
    // =========================================================================
    #[test]
    fn test_code_normalization() {
        assert_eq!(normalize_code("  welcome20 ").unwrap(), "WELCOME20");
        assert_eq!(normalize_code("spring-SALE_24").unwrap(), "SPRING-SALE_24");
        assert!(normalize_code("").is_err());
        assert!(normalize_code("has spaces").is_err());
        assert!(normalize_code(&"X".repeat(65)).is_err());
    }
}

#[cfg(test)]
mod invoice_status_tests {
    use receiptly_shared::InvoiceStatus::*;

    // =========================================================================
    // ENT-I01: Forward settlement path is legal
    // =========================================================================
    #[test]
    fn test_settlement_path() {
        assert!(Draft.can_transition_to(Open));
        assert!(Open.can_transition_to(Paid));
        assert!(Failed.can_transition_to(Paid));
    }

    // =========================================================================
    // ENT-I02: Paid never moves backwards
    // =========================================================================
    #[test]
    fn test_paid_never_regresses() {
        assert!(!Paid.can_transition_to(Open));
        assert!(!Paid.can_transition_to(Draft));
        assert!(!Paid.can_transition_to(Failed));
    }

    // =========================================================================
    // ENT-I03: The refund path is the only exit from Paid
    // =========================================================================
    #[test]
    fn test_refund_path_from_paid() {
        assert!(Paid.can_transition_to(PartiallyRefunded));
        assert!(Paid.can_transition_to(Refunded));
        assert!(PartiallyRefunded.can_transition_to(Refunded));
        assert!(!Refunded.can_transition_to(Paid));
    }

    // =========================================================================
    // ENT-I04: Void and Uncollectible are dead ends
    // =========================================================================
    #[test]
    fn test_void_is_terminal() {
        assert!(!Void.can_transition_to(Open));
        assert!(!Void.can_transition_to(Paid));
        assert!(!Uncollectible.can_transition_to(Open));
    }
}
