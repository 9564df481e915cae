//! Per-organization usage counters
//!
//! Tracks `current_month_receipts` and `current_user_count`. The receipt
//! limit is a soft limit: the check is advisory and a brief overage under
//! concurrent uploads is accepted, so increment and check stay two separate
//! operations. Resets are driven by the external scheduler, never by the
//! counter itself.

use receiptly_shared::OrgId;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::ChangeNotifier;

/// A limit/usage pair as seen by callers and dashboards
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageView {
    pub used: i64,
    /// None = unlimited
    pub limit: Option<i64>,
    /// None when the limit is unlimited
    pub remaining: Option<i64>,
    /// 0 when the limit is unlimited (or zero)
    pub percentage: i64,
}

impl UsageView {
    pub fn new(used: i64, limit: Option<i64>) -> Self {
        let remaining = limit.map(|l| (l - used).max(0));
        let percentage = match limit {
            Some(l) if l > 0 => ((used as f64 / l as f64) * 100.0).round() as i64,
            _ => 0,
        };
        Self {
            used,
            limit,
            remaining,
            percentage,
        }
    }

    pub fn at_limit(&self) -> bool {
        matches!(self.limit, Some(l) if self.used >= l)
    }

    /// Above 80% of a finite limit
    pub fn approaching_limit(&self) -> bool {
        match self.limit {
            Some(l) if l > 0 => (self.used as f64 / l as f64) > 0.8,
            _ => false,
        }
    }
}

/// Current raw counters for an organization
#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow)]
pub struct UsageCounters {
    pub current_month_receipts: i64,
    pub current_user_count: i32,
    pub usage_reset_at: Option<OffsetDateTime>,
}

/// Usage counter service
#[derive(Clone)]
pub struct UsageCounter {
    pool: PgPool,
    notifier: ChangeNotifier,
}

impl UsageCounter {
    pub fn new(pool: PgPool, notifier: ChangeNotifier) -> Self {
        Self { pool, notifier }
    }

    /// Current counters for an org. Missing row means no usage yet.
    pub async fn get(&self, org_id: OrgId) -> BillingResult<UsageCounters> {
        let counters: Option<UsageCounters> = sqlx::query_as(
            r#"
            SELECT current_month_receipts, current_user_count, usage_reset_at
            FROM org_usage
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(counters.unwrap_or(UsageCounters {
            current_month_receipts: 0,
            current_user_count: 1,
            usage_reset_at: None,
        }))
    }

    /// Record one uploaded receipt. Single atomic increment; the limit
    /// check happens separately in the entitlement evaluator (soft limit).
    pub async fn record_receipt(&self, org_id: OrgId) -> BillingResult<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO org_usage (org_id, current_month_receipts, current_user_count)
            VALUES ($1, 1, 1)
            ON CONFLICT (org_id) DO UPDATE SET
                current_month_receipts = org_usage.current_month_receipts + 1,
                updated_at = NOW()
            RETURNING current_month_receipts
            "#,
        )
        .bind(org_id)
        .fetch_one(&self.pool)
        .await?;

        self.notifier.usage_changed(org_id);
        Ok(count.0)
    }

    /// Set the org's seat count (driven by member add/remove elsewhere)
    pub async fn set_user_count(&self, org_id: OrgId, count: i32) -> BillingResult<()> {
        if count < 0 {
            return Err(BillingError::Validation(
                "user count cannot be negative".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO org_usage (org_id, current_month_receipts, current_user_count)
            VALUES ($1, 0, $2)
            ON CONFLICT (org_id) DO UPDATE SET
                current_user_count = $2,
                updated_at = NOW()
            "#,
        )
        .bind(org_id)
        .bind(count)
        .execute(&self.pool)
        .await?;

        self.notifier.usage_changed(org_id);
        Ok(())
    }

    /// Reset the monthly receipt counter. Driven by the external scheduler
    /// at billing-cycle boundaries; the `usage_reset_at` guard makes a
    /// double-fired reset within the same cycle a no-op.
    pub async fn reset_monthly_usage(&self, org_id: OrgId) -> BillingResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE org_usage SET
                current_month_receipts = 0,
                usage_reset_at = NOW(),
                updated_at = NOW()
            WHERE org_id = $1
              AND (usage_reset_at IS NULL OR usage_reset_at < date_trunc('month', NOW()))
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        let did_reset = updated.rows_affected() > 0;
        if did_reset {
            tracing::info!(org_id = %org_id, "Monthly usage reset");
            self.notifier.usage_changed(org_id);
        }
        Ok(did_reset)
    }

    /// All org ids with a usage row, for the worker's reset sweep
    pub async fn all_org_ids(&self) -> BillingResult<Vec<OrgId>> {
        let ids: Vec<(OrgId,)> = sqlx::query_as("SELECT org_id FROM org_usage")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_clamps_at_zero() {
        let view = UsageView::new(120, Some(100));
        assert_eq!(view.remaining, Some(0));
        assert!(view.at_limit());
    }

    #[test]
    fn test_percentage_rounds() {
        let view = UsageView::new(85, Some(100));
        assert_eq!(view.percentage, 85);

        let view = UsageView::new(1, Some(3));
        assert_eq!(view.percentage, 33);

        let view = UsageView::new(2, Some(3));
        assert_eq!(view.percentage, 67);
    }

    #[test]
    fn test_unlimited_is_zero_percent_and_no_remaining() {
        let view = UsageView::new(10_000, None);
        assert_eq!(view.percentage, 0);
        assert_eq!(view.remaining, None);
        assert!(!view.at_limit());
        assert!(!view.approaching_limit());
    }

    #[test]
    fn test_zero_limit_never_divides() {
        let view = UsageView::new(5, Some(0));
        assert_eq!(view.percentage, 0);
        assert_eq!(view.remaining, Some(0));
        assert!(view.at_limit());
    }

    #[test]
    fn test_approaching_limit_above_80_percent() {
        assert!(!UsageView::new(80, Some(100)).approaching_limit());
        assert!(UsageView::new(81, Some(100)).approaching_limit());
        assert!(UsageView::new(85, Some(100)).approaching_limit());
    }
}
