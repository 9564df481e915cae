//! Entitlement evaluator
//!
//! Answers "what can this organization do right now?" from the plan
//! catalog, the current subscription, and live usage counters. The core is
//! pure; the service wraps it with data loading and fails closed on
//! datastore trouble, evaluating against the canonical free default rather
//! than granting paid capability.

use receiptly_shared::{FeatureFlag, OrgId, PlanTier};
use serde::Serialize;

use crate::catalog::{FeatureMatrix, Plan, PlanCatalog};
use crate::error::BillingResult;
use crate::lifecycle::{LifecycleManager, Subscription};
use crate::usage::{UsageCounter, UsageCounters, UsageView};

/// The resolved allow/deny decision for one feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_to: Option<PlanTier>,
}

impl FeatureDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            upgrade_to: None,
        }
    }

    fn deny(reason: String, current_tier: PlanTier) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            upgrade_to: (!current_tier.is_top()).then(|| current_tier.next()),
        }
    }
}

/// Why an upgrade is being recommended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeTrigger {
    AtReceiptLimit,
    AtUserLimit,
    ApproachingReceiptLimit,
}

/// Recommendation to move to a higher tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeRecommendation {
    pub should_upgrade: bool,
    pub trigger: UpgradeTrigger,
    pub reason: String,
    pub recommended_tier: PlanTier,
}

/// Pure evaluation of one feature flag against a plan matrix and usage.
pub fn evaluate_feature(
    flag: FeatureFlag,
    tier: PlanTier,
    matrix: &FeatureMatrix,
    usage: &UsageCounters,
) -> FeatureDecision {
    if !matrix.allows(flag) {
        return FeatureDecision::deny(
            format!("{} is not included in the {} plan", flag, tier),
            tier,
        );
    }

    // Receipt-dependent flags also respect the live counter; the limit is
    // always compared against current usage, never a cached value.
    if flag == FeatureFlag::ReceiptOcr {
        let receipts = UsageView::new(usage.current_month_receipts, matrix.receipts_per_month);
        if receipts.at_limit() {
            return FeatureDecision::deny(
                format!(
                    "monthly receipt limit of {} reached",
                    matrix.receipts_per_month.unwrap_or(0)
                ),
                tier,
            );
        }
    }

    FeatureDecision::allow()
}

/// Pure upgrade recommendation, evaluated in priority order:
/// at-receipt-limit, at-user-limit, approaching receipt limit (> 80%).
pub fn recommend_upgrade(
    tier: PlanTier,
    matrix: &FeatureMatrix,
    max_users: Option<i32>,
    usage: &UsageCounters,
) -> Option<UpgradeRecommendation> {
    if tier.is_top() {
        return None;
    }

    let receipts = UsageView::new(usage.current_month_receipts, matrix.receipts_per_month);
    let seats = UsageView::new(
        usage.current_user_count as i64,
        max_users.map(|u| u as i64),
    );

    let (trigger, reason) = if receipts.at_limit() {
        (
            UpgradeTrigger::AtReceiptLimit,
            format!(
                "you have used all {} receipts included this month",
                receipts.limit.unwrap_or(0)
            ),
        )
    } else if seats.at_limit() {
        (
            UpgradeTrigger::AtUserLimit,
            format!(
                "your team has reached the {} seat limit",
                seats.limit.unwrap_or(0)
            ),
        )
    } else if receipts.approaching_limit() {
        (
            UpgradeTrigger::ApproachingReceiptLimit,
            format!(
                "you are approaching your monthly receipt limit ({}% used)",
                receipts.percentage
            ),
        )
    } else {
        return None;
    };

    Some(UpgradeRecommendation {
        should_upgrade: true,
        trigger,
        reason,
        recommended_tier: tier.next(),
    })
}

/// Per-org limit/usage summary for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementSummary {
    pub tier: PlanTier,
    pub receipt_usage: UsageView,
    pub seat_usage: UsageView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeRecommendation>,
}

/// Entitlement evaluation service
#[derive(Clone)]
pub struct EntitlementEvaluator {
    catalog: PlanCatalog,
    lifecycle: LifecycleManager,
    usage: UsageCounter,
}

impl EntitlementEvaluator {
    pub fn new(catalog: PlanCatalog, lifecycle: LifecycleManager, usage: UsageCounter) -> Self {
        Self {
            catalog,
            lifecycle,
            usage,
        }
    }

    /// Resolve the effective plan for an org: no subscription row, or a
    /// subscription in a non-entitled state, evaluates as the canonical
    /// free default. Datastore failure also resolves to the free default
    /// (fail closed) after logging.
    async fn effective_plan(&self, org_id: OrgId) -> (Plan, Option<Subscription>) {
        let sub = match self.lifecycle.get_subscription(org_id).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(
                    org_id = %org_id,
                    error = %e,
                    "Failed to load subscription; failing closed to free tier"
                );
                return (Plan::free_default(), None);
            }
        };

        let entitled_tier = sub
            .as_ref()
            .filter(|s| s.status.is_entitled())
            .map(|s| s.tier);

        let plan = match entitled_tier {
            Some(tier) => match self.catalog.get_plan(tier).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::error!(
                        org_id = %org_id,
                        tier = %tier,
                        error = %e,
                        "Failed to load plan; failing closed to free tier"
                    );
                    Plan::free_default()
                }
            },
            None => Plan::free_default(),
        };

        (plan, sub)
    }

    async fn usage_or_zero(&self, org_id: OrgId) -> UsageCounters {
        match self.usage.get(org_id).await {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(
                    org_id = %org_id,
                    error = %e,
                    "Failed to load usage counters; treating as empty"
                );
                UsageCounters {
                    current_month_receipts: 0,
                    current_user_count: 1,
                    usage_reset_at: None,
                }
            }
        }
    }

    /// Can this organization use a feature right now?
    pub async fn can_use_feature(
        &self,
        org_id: OrgId,
        flag: FeatureFlag,
    ) -> BillingResult<FeatureDecision> {
        let (plan, _) = self.effective_plan(org_id).await;
        let usage = self.usage_or_zero(org_id).await;

        Ok(evaluate_feature(flag, plan.tier, &plan.features, &usage))
    }

    /// Limit/usage summary plus any upgrade recommendation
    pub async fn summary(&self, org_id: OrgId) -> BillingResult<EntitlementSummary> {
        let (plan, _) = self.effective_plan(org_id).await;
        let usage = self.usage_or_zero(org_id).await;

        let receipt_usage =
            UsageView::new(usage.current_month_receipts, plan.features.receipts_per_month);
        let seat_usage = UsageView::new(
            usage.current_user_count as i64,
            plan.max_users.map(|u| u as i64),
        );
        let upgrade = recommend_upgrade(plan.tier, &plan.features, plan.max_users, &usage);

        Ok(EntitlementSummary {
            tier: plan.tier,
            receipt_usage,
            seat_usage,
            upgrade,
        })
    }

    /// Upgrade recommendation only
    pub async fn upgrade_recommendation(
        &self,
        org_id: OrgId,
    ) -> BillingResult<Option<UpgradeRecommendation>> {
        Ok(self.summary(org_id).await?.upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starter_matrix() -> FeatureMatrix {
        FeatureMatrix {
            receipts_per_month: Some(100),
            receipt_ocr: true,
            auto_gl_coding: true,
            multi_currency: false,
            approval_workflows: false,
            api_access: true,
            payout_export: true,
            custom_categories: true,
            priority_support: false,
            support_tier: "email".to_string(),
        }
    }

    fn usage(receipts: i64, users: i32) -> UsageCounters {
        UsageCounters {
            current_month_receipts: receipts,
            current_user_count: users,
            usage_reset_at: None,
        }
    }

    #[test]
    fn test_free_default_denies_payout_export_with_starter_hint() {
        let free = Plan::free_default();
        let decision = evaluate_feature(
            FeatureFlag::PayoutExport,
            free.tier,
            &free.features,
            &usage(0, 1),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.upgrade_to, Some(PlanTier::Starter));
        assert!(decision.reason.is_some());
    }

    #[test]
    fn test_allowed_flag_passes() {
        let matrix = starter_matrix();
        let decision = evaluate_feature(
            FeatureFlag::PayoutExport,
            PlanTier::Starter,
            &matrix,
            &usage(10, 2),
        );
        assert!(decision.allowed);
        assert_eq!(decision.upgrade_to, None);
    }

    #[test]
    fn test_receipt_limit_denies_ocr_against_live_usage() {
        let matrix = starter_matrix();
        let decision = evaluate_feature(
            FeatureFlag::ReceiptOcr,
            PlanTier::Starter,
            &matrix,
            &usage(100, 2),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.upgrade_to, Some(PlanTier::Team));
    }

    #[test]
    fn test_top_tier_deny_has_no_upgrade_hint() {
        let mut matrix = starter_matrix();
        matrix.multi_currency = false;
        let decision = evaluate_feature(
            FeatureFlag::MultiCurrency,
            PlanTier::Enterprise,
            &matrix,
            &usage(0, 1),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.upgrade_to, None);
    }

    #[test]
    fn test_recommendation_priority_receipt_limit_first() {
        let matrix = starter_matrix();
        // Both limits hit; receipt limit wins
        let rec = recommend_upgrade(PlanTier::Starter, &matrix, Some(3), &usage(100, 3))
            .expect("recommendation");
        assert_eq!(rec.trigger, UpgradeTrigger::AtReceiptLimit);
        assert_eq!(rec.recommended_tier, PlanTier::Team);
    }

    #[test]
    fn test_recommendation_user_limit() {
        let matrix = starter_matrix();
        let rec = recommend_upgrade(PlanTier::Starter, &matrix, Some(3), &usage(10, 3))
            .expect("recommendation");
        assert_eq!(rec.trigger, UpgradeTrigger::AtUserLimit);
    }

    #[test]
    fn test_recommendation_approaching() {
        let matrix = starter_matrix();
        let rec = recommend_upgrade(PlanTier::Starter, &matrix, Some(10), &usage(85, 2))
            .expect("recommendation");
        assert_eq!(rec.trigger, UpgradeTrigger::ApproachingReceiptLimit);
        assert!(rec.reason.contains("approaching"));
        assert!(rec.should_upgrade);
    }

    #[test]
    fn test_no_recommendation_under_threshold() {
        let matrix = starter_matrix();
        assert!(recommend_upgrade(PlanTier::Starter, &matrix, Some(10), &usage(80, 2)).is_none());
    }

    #[test]
    fn test_top_tier_never_recommends() {
        let matrix = starter_matrix();
        // Maxed usage on the top tier still yields nothing
        assert!(
            recommend_upgrade(PlanTier::Enterprise, &matrix, Some(1), &usage(1_000_000, 50))
                .is_none()
        );
    }

    #[test]
    fn test_unlimited_plan_never_recommends() {
        let mut matrix = starter_matrix();
        matrix.receipts_per_month = None;
        assert!(recommend_upgrade(PlanTier::Business, &matrix, None, &usage(500_000, 99)).is_none());
    }
}
