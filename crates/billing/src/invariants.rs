//! Billing Invariants Module
//!
//! Provides runnable consistency checks for the subscription engine.
//! These invariants can be run after any mutation or webhook replay to ensure
//! the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write
//! 4. **Complete**: Covers all critical billing consistency requirements

use receiptly_shared::SubscriptionStatus;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Organization(s) affected
    pub org_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - system may be charging or entitling incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for discount range violation
#[derive(Debug, sqlx::FromRow)]
struct DiscountRangeRow {
    org_id: Uuid,
    discount_percent: i32,
}

/// Row type for coupon over-redemption violation
#[derive(Debug, sqlx::FromRow)]
struct OverRedeemedCouponRow {
    coupon_id: Uuid,
    code: String,
    redemption_count: i32,
    max_redemptions: i32,
}

/// Row type for redemption tally mismatch violation
#[derive(Debug, sqlx::FromRow)]
struct RedemptionTallyRow {
    coupon_id: Uuid,
    code: String,
    redemption_count: i32,
    redemption_rows: i64,
}

/// Row type for discount without reason violation
#[derive(Debug, sqlx::FromRow)]
struct DiscountNoReasonRow {
    org_id: Uuid,
    discount_percent: i32,
}

/// Row type for negative usage violation
#[derive(Debug, sqlx::FromRow)]
struct NegativeUsageRow {
    org_id: Uuid,
    current_month_receipts: i64,
    current_user_count: i32,
}

/// Row type for unaudited status change violation
#[derive(Debug, sqlx::FromRow)]
struct UnauditedChangeRow {
    org_id: Uuid,
    last_event_at: Option<OffsetDateTime>,
}

/// Row type for duplicate entitled subscription violation
#[derive(Debug, sqlx::FromRow)]
struct DuplicateSubscriptionRow {
    org_id: Uuid,
    row_count: i64,
}

/// Row type for canceled subscription without period end violation
#[derive(Debug, sqlx::FromRow)]
struct CanceledNoPeriodEndRow {
    org_id: Uuid,
}

/// Service for running billing invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_discount_in_range().await?);
        violations.extend(self.check_coupons_within_cap().await?);
        violations.extend(self.check_redemption_tally().await?);
        violations.extend(self.check_discount_has_reason().await?);
        violations.extend(self.check_usage_non_negative().await?);
        violations.extend(self.check_status_changes_audited().await?);
        violations.extend(self.check_single_subscription_per_org().await?);
        violations.extend(self.check_canceled_has_period_end().await?);

        let checks_run = 8;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Subscription discount percent is within [0, 100]
    ///
    /// An out-of-range discount would produce negative or inflated charges.
    async fn check_discount_in_range(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DiscountRangeRow> = sqlx::query_as(
            r#"
            SELECT org_id, discount_percent
            FROM subscriptions
            WHERE discount_percent < 0 OR discount_percent > 100
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "discount_in_range".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Subscription has discount of {}% (expected 0..=100)",
                    row.discount_percent
                ),
                context: serde_json::json!({
                    "discount_percent": row.discount_percent,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Coupon redemption counts never exceed their cap
    ///
    /// The redemption increment is guarded by a conditional UPDATE, so an
    /// over-cap count means that guard was bypassed somewhere.
    async fn check_coupons_within_cap(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OverRedeemedCouponRow> = sqlx::query_as(
            r#"
            SELECT id as coupon_id, code, redemption_count, max_redemptions
            FROM coupons
            WHERE max_redemptions IS NOT NULL
              AND redemption_count > max_redemptions
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "coupons_within_cap".to_string(),
                org_ids: vec![],
                description: format!(
                    "Coupon '{}' redeemed {} times (cap {})",
                    row.code, row.redemption_count, row.max_redemptions
                ),
                context: serde_json::json!({
                    "coupon_id": row.coupon_id,
                    "code": row.code,
                    "redemption_count": row.redemption_count,
                    "max_redemptions": row.max_redemptions,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Coupon counters match their redemption rows
    ///
    /// The counter can drift above the row count only if a redemption insert
    /// failed after the counter increment committed.
    async fn check_redemption_tally(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<RedemptionTallyRow> = sqlx::query_as(
            r#"
            SELECT
                c.id as coupon_id,
                c.code,
                c.redemption_count,
                COUNT(r.id) as redemption_rows
            FROM coupons c
            LEFT JOIN redemptions r ON r.coupon_id = c.id
            GROUP BY c.id, c.code, c.redemption_count
            HAVING c.redemption_count <> COUNT(r.id)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "redemption_tally".to_string(),
                org_ids: vec![],
                description: format!(
                    "Coupon '{}' counter is {} but has {} redemption rows",
                    row.code, row.redemption_count, row.redemption_rows
                ),
                context: serde_json::json!({
                    "coupon_id": row.coupon_id,
                    "code": row.code,
                    "redemption_count": row.redemption_count,
                    "redemption_rows": row.redemption_rows,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 4: Active discounts carry a reason
    ///
    /// Both the coupon path and the admin path stamp discount_reason, so
    /// a reasonless discount means an out-of-band write.
    async fn check_discount_has_reason(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DiscountNoReasonRow> = sqlx::query_as(
            r#"
            SELECT org_id, discount_percent
            FROM subscriptions
            WHERE discount_percent > 0
              AND (discount_reason IS NULL OR discount_reason = '')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "discount_has_reason".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Subscription carries a {}% discount with no recorded reason",
                    row.discount_percent
                ),
                context: serde_json::json!({
                    "discount_percent": row.discount_percent,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Usage counters are non-negative
    ///
    /// Counters only move up via increments and down via monthly resets,
    /// so a negative value means corrupted writes.
    async fn check_usage_non_negative(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeUsageRow> = sqlx::query_as(
            r#"
            SELECT org_id, current_month_receipts, current_user_count
            FROM org_usage
            WHERE current_month_receipts < 0 OR current_user_count < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "usage_non_negative".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization has negative usage (receipts={}, users={})",
                    row.current_month_receipts, row.current_user_count
                ),
                context: serde_json::json!({
                    "current_month_receipts": row.current_month_receipts,
                    "current_user_count": row.current_user_count,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 6: Subscription state changes have audit records
    ///
    /// Every applied lifecycle event updates last_event_at and writes an
    /// audit entry; a recent last_event_at with no nearby audit row means
    /// the change went unrecorded.
    async fn check_status_changes_audited(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnauditedChangeRow> = sqlx::query_as(
            r#"
            SELECT s.org_id, s.last_event_at
            FROM subscriptions s
            WHERE s.last_event_at IS NOT NULL
              AND NOT EXISTS (
                  SELECT 1 FROM audit_log a
                  WHERE a.org_id = s.org_id
                    AND a.created_at BETWEEN s.last_event_at - INTERVAL '5 minutes'
                                         AND s.last_event_at + INTERVAL '5 minutes'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "status_changes_audited".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Subscription changed at {:?} with no audit record",
                    row.last_event_at
                ),
                context: serde_json::json!({
                    "last_event_at": row.last_event_at,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 7: At most one entitled subscription per organization
    ///
    /// `org_id` is the subscriptions primary key, so this can only fire if
    /// a schema migration loosens that key.
    async fn check_single_subscription_per_org(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateSubscriptionRow> = sqlx::query_as(
            r#"
            SELECT org_id, COUNT(*) as row_count
            FROM subscriptions
            WHERE status IN ($1, $2)
            GROUP BY org_id
            HAVING COUNT(*) > 1
            "#,
        )
        .bind(SubscriptionStatus::Active)
        .bind(SubscriptionStatus::Trialing)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_subscription_per_org".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization has {} concurrent entitled subscriptions",
                    row.row_count
                ),
                context: serde_json::json!({
                    "row_count": row.row_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 8: Canceled subscriptions keep their period end
    ///
    /// `current_period_end` is NOT NULL in the schema; the deferred-resume
    /// window depends on it staying that way.
    async fn check_canceled_has_period_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CanceledNoPeriodEndRow> = sqlx::query_as(
            r#"
            SELECT org_id
            FROM subscriptions
            WHERE status = $1 AND current_period_end IS NULL
            "#,
        )
        .bind(SubscriptionStatus::Canceled)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "canceled_has_period_end".to_string(),
                org_ids: vec![row.org_id],
                description: "Canceled subscription has no period end".to_string(),
                context: serde_json::json!({}),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "discount_in_range" => self.check_discount_in_range().await,
            "coupons_within_cap" => self.check_coupons_within_cap().await,
            "redemption_tally" => self.check_redemption_tally().await,
            "discount_has_reason" => self.check_discount_has_reason().await,
            "usage_non_negative" => self.check_usage_non_negative().await,
            "status_changes_audited" => self.check_status_changes_audited().await,
            "single_subscription_per_org" => self.check_single_subscription_per_org().await,
            "canceled_has_period_end" => self.check_canceled_has_period_end().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "discount_in_range",
            "coupons_within_cap",
            "redemption_tally",
            "discount_has_reason",
            "usage_non_negative",
            "status_changes_audited",
            "single_subscription_per_org",
            "canceled_has_period_end",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 8);
        assert!(checks.contains(&"discount_in_range"));
        assert!(checks.contains(&"coupons_within_cap"));
        assert!(checks.contains(&"single_subscription_per_org"));
        assert!(checks.contains(&"canceled_has_period_end"));
    }

    #[test]
    fn test_summary_serializes() {
        let summary = InvariantCheckSummary {
            checked_at: OffsetDateTime::now_utc(),
            checks_run: 6,
            checks_passed: 6,
            checks_failed: 0,
            violations: vec![],
            healthy: true,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["healthy"], true);
        assert_eq!(json["checks_run"], 6);
    }
}
