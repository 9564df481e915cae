//! Plan catalog
//!
//! Immutable, cached view of tiers and their feature matrices. The read path
//! is cache-first; the only mutation path is the explicit admin plan update,
//! which invalidates the cache synchronously before returning.

use std::sync::Arc;
use std::time::{Duration, Instant};

use receiptly_shared::{FeatureFlag, PlanTier};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::audit::{AuditActor, AuditLogRecorder};
use crate::error::{BillingError, BillingResult};

/// Per-plan feature matrix: booleans for gated capabilities, nullable
/// numeric limits where null means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    /// Monthly receipt cap; None = unlimited
    pub receipts_per_month: Option<i64>,
    pub receipt_ocr: bool,
    pub auto_gl_coding: bool,
    pub multi_currency: bool,
    pub approval_workflows: bool,
    pub api_access: bool,
    pub payout_export: bool,
    pub custom_categories: bool,
    pub priority_support: bool,
    /// "community", "email", "priority", "dedicated"
    pub support_tier: String,
}

impl FeatureMatrix {
    /// Evaluate a boolean flag against this matrix. Numeric limits
    /// (receipts, seats) are evaluated by the entitlement module against
    /// live usage, not here.
    pub fn allows(&self, flag: FeatureFlag) -> bool {
        match flag {
            FeatureFlag::ReceiptOcr => self.receipt_ocr,
            FeatureFlag::AutoGlCoding => self.auto_gl_coding,
            FeatureFlag::MultiCurrency => self.multi_currency,
            FeatureFlag::ApprovalWorkflows => self.approval_workflows,
            FeatureFlag::ApiAccess => self.api_access,
            FeatureFlag::PayoutExport => self.payout_export,
            FeatureFlag::CustomCategories => self.custom_categories,
            FeatureFlag::PrioritySupport => self.priority_support,
            FeatureFlag::UnlimitedReceipts => self.receipts_per_month.is_none(),
        }
    }
}

/// A pricing plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tier: PlanTier,
    pub name: String,
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
    pub min_users: i32,
    /// None = unlimited seats
    pub max_users: Option<i32>,
    pub features: FeatureMatrix,
    pub active: bool,
    pub public: bool,
}

impl Plan {
    /// The canonical free tier.
    ///
    /// This is THE single definition of what an organization without a
    /// subscription row gets. The migration seeds the `plans` table from
    /// these same values and the entitlement evaluator falls back to this
    /// function; there is no second copy to drift.
    pub fn free_default() -> Self {
        Self {
            tier: PlanTier::Free,
            name: "Free".to_string(),
            monthly_price_cents: 0,
            annual_price_cents: 0,
            min_users: 1,
            max_users: Some(1),
            features: FeatureMatrix {
                receipts_per_month: Some(25),
                receipt_ocr: true,
                auto_gl_coding: false,
                multi_currency: false,
                approval_workflows: false,
                api_access: false,
                payout_export: false,
                custom_categories: false,
                priority_support: false,
                support_tier: "community".to_string(),
            },
            active: true,
            public: true,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    tier: PlanTier,
    name: String,
    monthly_price_cents: i64,
    annual_price_cents: i64,
    min_users: i32,
    max_users: Option<i32>,
    receipts_per_month: Option<i64>,
    receipt_ocr: bool,
    auto_gl_coding: bool,
    multi_currency: bool,
    approval_workflows: bool,
    api_access: bool,
    payout_export: bool,
    custom_categories: bool,
    priority_support: bool,
    support_tier: String,
    active: bool,
    public: bool,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Plan {
            tier: row.tier,
            name: row.name,
            monthly_price_cents: row.monthly_price_cents,
            annual_price_cents: row.annual_price_cents,
            min_users: row.min_users,
            max_users: row.max_users,
            features: FeatureMatrix {
                receipts_per_month: row.receipts_per_month,
                receipt_ocr: row.receipt_ocr,
                auto_gl_coding: row.auto_gl_coding,
                multi_currency: row.multi_currency,
                approval_workflows: row.approval_workflows,
                api_access: row.api_access,
                payout_export: row.payout_export,
                custom_categories: row.custom_categories,
                priority_support: row.priority_support,
                support_tier: row.support_tier,
            },
            active: row.active,
            public: row.public,
        }
    }
}

/// Admin request to update a plan's prices/limits/features
#[derive(Debug, Clone, Deserialize)]
pub struct PlanUpdate {
    pub monthly_price_cents: Option<i64>,
    pub annual_price_cents: Option<i64>,
    pub max_users: Option<Option<i32>>,
    pub receipts_per_month: Option<Option<i64>>,
    pub active: Option<bool>,
    pub public: Option<bool>,
}

struct CachedPlans {
    plans: Vec<Plan>,
    loaded_at: Instant,
}

/// Cache-first view of the plan table.
///
/// The cache is an explicitly owned value with a bounded lifetime; any
/// admin edit calls `invalidate()` before the update returns success, so
/// no evaluator ever reads a stale feature matrix.
#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
    cache: Arc<RwLock<Option<CachedPlans>>>,
    ttl: Duration,
    audit: AuditLogRecorder,
}

impl PlanCatalog {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        let audit = AuditLogRecorder::new(pool.clone());
        Self {
            pool,
            cache: Arc::new(RwLock::new(None)),
            ttl,
            audit,
        }
    }

    /// All plans, lowest tier first
    pub async fn list_plans(&self) -> BillingResult<Vec<Plan>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < self.ttl {
                    return Ok(cached.plans.clone());
                }
            }
        }

        let plans = self.load_from_db().await?;

        let mut cache = self.cache.write().await;
        *cache = Some(CachedPlans {
            plans: plans.clone(),
            loaded_at: Instant::now(),
        });

        Ok(plans)
    }

    /// Look up one plan by tier
    pub async fn get_plan(&self, tier: PlanTier) -> BillingResult<Plan> {
        let plans = self.list_plans().await?;
        plans
            .into_iter()
            .find(|p| p.tier == tier)
            .ok_or_else(|| BillingError::NotFound(format!("plan '{}'", tier)))
    }

    /// Drop the cached view. Must be called synchronously before any
    /// "plan updated" success response is returned.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
        tracing::debug!("Plan catalog cache invalidated");
    }

    /// Admin plan edit. Writes, invalidates the cache, then records the
    /// audit entry, in that order.
    pub async fn update_plan(
        &self,
        tier: PlanTier,
        update: PlanUpdate,
        actor: &AuditActor,
    ) -> BillingResult<Plan> {
        let updated = sqlx::query(
            r#"
            UPDATE plans SET
                monthly_price_cents = COALESCE($2, monthly_price_cents),
                annual_price_cents = COALESCE($3, annual_price_cents),
                max_users = CASE WHEN $4 THEN $5 ELSE max_users END,
                receipts_per_month = CASE WHEN $6 THEN $7 ELSE receipts_per_month END,
                active = COALESCE($8, active),
                public = COALESCE($9, public),
                updated_at = NOW()
            WHERE tier = $1
            "#,
        )
        .bind(tier)
        .bind(update.monthly_price_cents)
        .bind(update.annual_price_cents)
        .bind(update.max_users.is_some())
        .bind(update.max_users.flatten())
        .bind(update.receipts_per_month.is_some())
        .bind(update.receipts_per_month.flatten())
        .bind(update.active)
        .bind(update.public)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("plan '{}'", tier)));
        }

        // Drop the stale matrix before anyone can observe success.
        self.invalidate().await;

        self.audit
            .record(
                "admin_update_plan",
                None,
                serde_json::json!({
                    "tier": tier.as_str(),
                    "monthly_price_cents": update.monthly_price_cents,
                    "annual_price_cents": update.annual_price_cents,
                    "active": update.active,
                    "public": update.public,
                }),
                None,
                actor,
            )
            .await?;

        self.get_plan(tier).await
    }

    async fn load_from_db(&self) -> BillingResult<Vec<Plan>> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            r#"
            SELECT
                tier, name, monthly_price_cents, annual_price_cents,
                min_users, max_users, receipts_per_month,
                receipt_ocr, auto_gl_coding, multi_currency,
                approval_workflows, api_access, payout_export,
                custom_categories, priority_support, support_tier,
                active, public
            FROM plans
            ORDER BY sort_order ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Plan::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_default_is_the_free_tier() {
        let plan = Plan::free_default();
        assert_eq!(plan.tier, PlanTier::Free);
        assert_eq!(plan.monthly_price_cents, 0);
        assert_eq!(plan.max_users, Some(1));
        assert!(plan.features.receipts_per_month.is_some());
    }

    #[test]
    fn test_matrix_boolean_flags() {
        let free = Plan::free_default().features;
        assert!(free.allows(FeatureFlag::ReceiptOcr));
        assert!(!free.allows(FeatureFlag::PayoutExport));
        assert!(!free.allows(FeatureFlag::ApiAccess));
    }

    #[test]
    fn test_unlimited_receipts_checks_null_limit() {
        let mut matrix = Plan::free_default().features;
        assert!(!matrix.allows(FeatureFlag::UnlimitedReceipts));

        matrix.receipts_per_month = None;
        assert!(matrix.allows(FeatureFlag::UnlimitedReceipts));
    }
}
