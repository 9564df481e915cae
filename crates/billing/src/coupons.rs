//! Discount & coupon engine
//!
//! Validates and applies promotional and administrative discounts with
//! redemption accounting. A redemption is one transaction that locks the
//! coupon row first, so concurrent redemptions serialize: two redemptions
//! of a `max_redemptions = 1` coupon, or of a per-org cap of 1 by the same
//! organization, cannot both succeed, and a failure before commit releases
//! the counter increment with everything else.

use receiptly_shared::{CouponDuration, CouponId, DiscountType, OrgId, PlanTier};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{AuditActor, AuditLogRecorder};
use crate::error::{BillingError, BillingResult};
use crate::events::ChangeNotifier;
use crate::lifecycle::Subscription;

/// A reusable, constrained discount code
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: CouponId,
    /// Unique, stored uppercase
    pub code: String,
    pub discount_type: DiscountType,
    /// Percent (0-100) for percent coupons, cents for fixed coupons
    pub value: i64,
    /// Tier names this coupon applies to; None = unrestricted
    pub applies_to_plans: Option<Vec<String>>,
    pub min_users: Option<i32>,
    /// None = unlimited total redemptions
    pub max_redemptions: Option<i32>,
    pub max_redemptions_per_org: i32,
    pub redemption_count: i32,
    pub duration: CouponDuration,
    pub duration_in_months: Option<i32>,
    pub valid_from: OffsetDateTime,
    pub valid_until: Option<OffsetDateTime>,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

/// One application of a coupon to one organization, with terms frozen at
/// redemption time and decoupled from later coupon edits.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Redemption {
    pub id: Uuid,
    pub coupon_id: CouponId,
    pub org_id: OrgId,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: i64,
    pub duration: CouponDuration,
    /// Months left for repeating coupons; None otherwise
    pub remaining_months: Option<i32>,
    pub redeemed_at: OffsetDateTime,
}

/// Request to create a coupon (admin)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: i64,
    pub applies_to_plans: Option<Vec<PlanTier>>,
    pub min_users: Option<i32>,
    pub max_redemptions: Option<i32>,
    pub max_redemptions_per_org: Option<i32>,
    pub duration: CouponDuration,
    pub duration_in_months: Option<i32>,
    pub valid_from: Option<OffsetDateTime>,
    pub valid_until: Option<OffsetDateTime>,
}

/// Normalize a user-entered coupon code: trim, uppercase.
pub fn normalize_code(code: &str) -> BillingResult<String> {
    let normalized = code.trim().to_uppercase();
    if normalized.is_empty() || normalized.len() > 64 {
        return Err(BillingError::Validation(
            "coupon code must be 1-64 characters".to_string(),
        ));
    }
    if !normalized.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(BillingError::Validation(
            "coupon code may contain only letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(normalized)
}

/// Pure validation chain, checked in contract order: active, validity
/// window, global headroom, per-org headroom, plan restriction, min users.
///
/// [`CouponService::apply_coupon`] runs this under the coupon row lock, so
/// the counts it sees there are settled, not snapshots.
pub fn validate_coupon(
    coupon: &Coupon,
    now: OffsetDateTime,
    org_redemptions: i64,
    current_tier: PlanTier,
    current_user_count: i32,
) -> BillingResult<()> {
    if !coupon.active {
        return Err(BillingError::Conflict(format!(
            "coupon {} is no longer active",
            coupon.code
        )));
    }

    if now < coupon.valid_from {
        return Err(BillingError::Conflict(format!(
            "coupon {} is not yet valid",
            coupon.code
        )));
    }
    if let Some(until) = coupon.valid_until {
        if now > until {
            return Err(BillingError::Conflict(format!(
                "coupon {} has expired",
                coupon.code
            )));
        }
    }

    if let Some(max) = coupon.max_redemptions {
        if coupon.redemption_count >= max {
            return Err(BillingError::Conflict("redemption limit reached".to_string()));
        }
    }

    if org_redemptions >= coupon.max_redemptions_per_org as i64 {
        return Err(BillingError::Conflict(format!(
            "coupon {} already redeemed by this organization",
            coupon.code
        )));
    }

    if let Some(plans) = &coupon.applies_to_plans {
        if !plans.iter().any(|p| p == current_tier.as_str()) {
            return Err(BillingError::Conflict(format!(
                "coupon {} does not apply to the {} plan",
                coupon.code, current_tier
            )));
        }
    }

    if let Some(min_users) = coupon.min_users {
        if current_user_count < min_users {
            return Err(BillingError::Conflict(format!(
                "coupon {} requires at least {} users",
                coupon.code, min_users
            )));
        }
    }

    Ok(())
}

/// Coupon and administrative discount service
#[derive(Clone)]
pub struct CouponService {
    pool: PgPool,
    audit: AuditLogRecorder,
    notifier: ChangeNotifier,
}

impl CouponService {
    pub fn new(pool: PgPool, notifier: ChangeNotifier) -> Self {
        let audit = AuditLogRecorder::new(pool.clone());
        Self {
            pool,
            audit,
            notifier,
        }
    }

    pub async fn get_coupon(&self, code: &str) -> BillingResult<Coupon> {
        let code = normalize_code(code)?;
        let coupon: Option<Coupon> = sqlx::query_as(
            r#"
            SELECT
                id, code, discount_type, value, applies_to_plans, min_users,
                max_redemptions, max_redemptions_per_org, redemption_count,
                duration, duration_in_months, valid_from, valid_until,
                active, created_at
            FROM coupons
            WHERE code = $1
            "#,
        )
        .bind(&code)
        .fetch_optional(&self.pool)
        .await?;

        coupon.ok_or_else(|| BillingError::NotFound(format!("coupon '{}'", code)))
    }

    /// Redeem a coupon for an organization.
    ///
    /// One transaction, coupon row locked first. The lock serializes
    /// concurrent redemptions, so the per-org count and the global counter
    /// are both checked against settled state; an error anywhere before
    /// commit rolls the counter increment back with the rest.
    pub async fn apply_coupon(
        &self,
        org_id: OrgId,
        code: &str,
        subscription: &Subscription,
        current_user_count: i32,
        actor: &AuditActor,
    ) -> BillingResult<Redemption> {
        let code = normalize_code(code)?;
        let now = OffsetDateTime::now_utc();

        let mut tx = self.pool.begin().await?;

        let coupon: Option<Coupon> = sqlx::query_as(
            r#"
            SELECT
                id, code, discount_type, value, applies_to_plans, min_users,
                max_redemptions, max_redemptions_per_org, redemption_count,
                duration, duration_in_months, valid_from, valid_until,
                active, created_at
            FROM coupons
            WHERE code = $1
            FOR UPDATE
            "#,
        )
        .bind(&code)
        .fetch_optional(&mut *tx)
        .await?;
        let coupon =
            coupon.ok_or_else(|| BillingError::NotFound(format!("coupon '{}'", code)))?;

        let org_redemptions: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM redemptions WHERE coupon_id = $1 AND org_id = $2",
        )
        .bind(coupon.id)
        .bind(org_id)
        .fetch_one(&mut *tx)
        .await?;

        validate_coupon(
            &coupon,
            now,
            org_redemptions.0,
            subscription.tier,
            current_user_count,
        )?;

        // The conditional increment stays as a second guard on the global
        // cap even though the row lock has already settled the count.
        let claimed: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE coupons SET redemption_count = redemption_count + 1
            WHERE id = $1
              AND active = TRUE
              AND (max_redemptions IS NULL OR redemption_count < max_redemptions)
            RETURNING redemption_count
            "#,
        )
        .bind(coupon.id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            return Err(BillingError::Conflict("redemption limit reached".to_string()));
        }

        let remaining_months = match coupon.duration {
            CouponDuration::Repeating => coupon.duration_in_months,
            _ => None,
        };

        // Snapshot the terms at redemption time.
        let redemption: Redemption = sqlx::query_as(
            r#"
            INSERT INTO redemptions (
                coupon_id, org_id, code, discount_type, value,
                duration, remaining_months
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING
                id, coupon_id, org_id, code, discount_type, value,
                duration, remaining_months, redeemed_at
            "#,
        )
        .bind(coupon.id)
        .bind(org_id)
        .bind(&coupon.code)
        .bind(coupon.discount_type)
        .bind(coupon.value)
        .bind(coupon.duration)
        .bind(remaining_months)
        .fetch_one(&mut *tx)
        .await?;

        // Percent coupons surface directly on the subscription; fixed
        // amounts live in the snapshot and are applied by invoicing.
        if coupon.discount_type == DiscountType::Percent {
            let expires_at = match coupon.duration {
                CouponDuration::Once => Some(subscription.current_period_end),
                CouponDuration::Repeating => remaining_months
                    .map(|m| now + time::Duration::days(30 * m as i64)),
                CouponDuration::Forever => None,
            };

            sqlx::query(
                r#"
                UPDATE subscriptions SET
                    discount_percent = $2,
                    discount_expires_at = $3,
                    discount_reason = $4,
                    updated_at = NOW()
                WHERE org_id = $1
                "#,
            )
            .bind(org_id)
            .bind(coupon.value as i32)
            .bind(expires_at)
            .bind(format!("coupon:{}", coupon.code))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.audit
            .record(
                "apply_coupon",
                Some(org_id),
                serde_json::json!({
                    "code": coupon.code,
                    "discount_type": coupon.discount_type.as_str(),
                    "value": coupon.value,
                    "duration": coupon.duration.as_str(),
                }),
                None,
                actor,
            )
            .await?;
        self.notifier.subscription_changed(org_id);

        tracing::info!(
            org_id = %org_id,
            code = %coupon.code,
            "Coupon redeemed"
        );

        Ok(redemption)
    }

    /// Administrative discount override.
    ///
    /// Requires a non-empty reason and writes an audit entry whether or not
    /// the underlying mutation succeeds, so failed attempts stay traceable.
    pub async fn apply_discount(
        &self,
        org_id: OrgId,
        percent: i32,
        expires_at: Option<OffsetDateTime>,
        reason: &str,
        actor: &AuditActor,
    ) -> BillingResult<()> {
        let result = self
            .apply_discount_inner(org_id, percent, expires_at, reason)
            .await;

        let details = serde_json::json!({
            "percent": percent,
            "expires_at": expires_at,
            "reason": reason,
            "outcome": match &result {
                Ok(()) => "applied".to_string(),
                Err(e) => format!("failed: {}", e),
            },
        });
        self.audit
            .record_best_effort("admin_apply_discount", Some(org_id), details, None, actor)
            .await;

        if result.is_ok() {
            self.notifier.subscription_changed(org_id);
        }
        result
    }

    async fn apply_discount_inner(
        &self,
        org_id: OrgId,
        percent: i32,
        expires_at: Option<OffsetDateTime>,
        reason: &str,
    ) -> BillingResult<()> {
        if reason.trim().is_empty() {
            return Err(BillingError::Validation(
                "a reason is required for administrative discounts".to_string(),
            ));
        }
        if !(0..=100).contains(&percent) {
            return Err(BillingError::Validation(format!(
                "discount percent must be between 0 and 100, got {}",
                percent
            )));
        }
        if let Some(expiry) = expires_at {
            if expiry <= OffsetDateTime::now_utc() {
                return Err(BillingError::Validation(
                    "discount expiry must be in the future".to_string(),
                ));
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions SET
                discount_percent = $2,
                discount_expires_at = $3,
                discount_reason = $4,
                updated_at = NOW()
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .bind(percent)
        .bind(expires_at)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!(
                "no subscription for {}",
                org_id
            )));
        }
        Ok(())
    }

    /// Create a coupon (admin)
    pub async fn create_coupon(
        &self,
        req: CreateCoupon,
        actor: &AuditActor,
    ) -> BillingResult<Coupon> {
        let code = normalize_code(&req.code)?;

        match req.discount_type {
            DiscountType::Percent => {
                if !(1..=100).contains(&req.value) {
                    return Err(BillingError::Validation(
                        "percent coupon value must be between 1 and 100".to_string(),
                    ));
                }
            }
            DiscountType::Fixed => {
                if req.value <= 0 {
                    return Err(BillingError::Validation(
                        "fixed coupon value must be a positive amount in cents".to_string(),
                    ));
                }
            }
        }
        if req.duration == CouponDuration::Repeating
            && !matches!(req.duration_in_months, Some(m) if m > 0)
        {
            return Err(BillingError::Validation(
                "repeating coupons require duration_in_months > 0".to_string(),
            ));
        }

        let applies_to: Option<Vec<String>> = req
            .applies_to_plans
            .map(|plans| plans.iter().map(|p| p.as_str().to_string()).collect());

        let coupon: Coupon = sqlx::query_as(
            r#"
            INSERT INTO coupons (
                code, discount_type, value, applies_to_plans, min_users,
                max_redemptions, max_redemptions_per_org,
                duration, duration_in_months, valid_from, valid_until
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, NOW()), $11)
            RETURNING
                id, code, discount_type, value, applies_to_plans, min_users,
                max_redemptions, max_redemptions_per_org, redemption_count,
                duration, duration_in_months, valid_from, valid_until,
                active, created_at
            "#,
        )
        .bind(&code)
        .bind(req.discount_type)
        .bind(req.value)
        .bind(&applies_to)
        .bind(req.min_users)
        .bind(req.max_redemptions)
        .bind(req.max_redemptions_per_org.unwrap_or(1))
        .bind(req.duration)
        .bind(req.duration_in_months)
        .bind(req.valid_from)
        .bind(req.valid_until)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                BillingError::Conflict(format!("coupon code '{}' already exists", code))
            }
            _ => BillingError::Database(e),
        })?;

        self.audit
            .record(
                "admin_create_coupon",
                None,
                serde_json::json!({
                    "code": coupon.code,
                    "discount_type": coupon.discount_type.as_str(),
                    "value": coupon.value,
                    "max_redemptions": coupon.max_redemptions,
                }),
                None,
                actor,
            )
            .await?;

        Ok(coupon)
    }

    /// Deactivate a coupon (admin). Existing redemption snapshots are
    /// unaffected.
    pub async fn deactivate_coupon(&self, code: &str, actor: &AuditActor) -> BillingResult<()> {
        let code = normalize_code(code)?;
        let updated = sqlx::query("UPDATE coupons SET active = FALSE WHERE code = $1")
            .bind(&code)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("coupon '{}'", code)));
        }

        self.audit
            .record(
                "admin_deactivate_coupon",
                None,
                serde_json::json!({ "code": code }),
                None,
                actor,
            )
            .await?;

        Ok(())
    }

    /// Decrement `remaining_months` on repeating redemptions; clear the
    /// subscription discount when a redemption hits zero. Driven by the
    /// external scheduler once per billing cycle.
    pub async fn tick_repeating_discounts(&self) -> BillingResult<u64> {
        let ticked: Vec<(OrgId, i32)> = sqlx::query_as(
            r#"
            UPDATE redemptions SET remaining_months = remaining_months - 1
            WHERE duration = $1 AND remaining_months > 0
            RETURNING org_id, remaining_months
            "#,
        )
        .bind(CouponDuration::Repeating)
        .fetch_all(&self.pool)
        .await?;

        let mut cleared = 0u64;
        for (org_id, _) in ticked.into_iter().filter(|(_, left)| *left == 0) {
            let updated = sqlx::query(
                r#"
                UPDATE subscriptions SET
                    discount_percent = NULL,
                    discount_expires_at = NULL,
                    discount_reason = NULL,
                    updated_at = NOW()
                WHERE org_id = $1 AND discount_reason LIKE 'coupon:%'
                "#,
            )
            .bind(org_id)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() > 0 {
                cleared += 1;
                self.audit
                    .record_best_effort(
                        "discount_expired",
                        Some(org_id),
                        serde_json::json!({ "reason": "repeating coupon exhausted" }),
                        None,
                        &AuditActor::system(),
                    )
                    .await;
                self.notifier.subscription_changed(org_id);
            }
        }

        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use receiptly_shared::{BillingCycle, SubscriptionStatus};

    async fn seed_subscription(pool: &PgPool, org_id: OrgId) -> Subscription {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                org_id, tier, status, billing_cycle,
                current_period_start, current_period_end
            )
            VALUES ($1, $2, $3, $4, NOW() - INTERVAL '1 day', NOW() + INTERVAL '29 days')
            "#,
        )
        .bind(org_id)
        .bind(PlanTier::Starter)
        .bind(SubscriptionStatus::Active)
        .bind(BillingCycle::Monthly)
        .execute(pool)
        .await
        .unwrap();

        Subscription {
            org_id,
            tier: PlanTier::Starter,
            status: SubscriptionStatus::Active,
            billing_cycle: BillingCycle::Monthly,
            current_period_start: now - time::Duration::days(1),
            current_period_end: now + time::Duration::days(29),
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            discount_percent: None,
            discount_expires_at: None,
            discount_reason: None,
            billing_email: None,
            last_event_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_per_org_cap_holds_under_concurrent_redemptions(pool: PgPool) {
        let service = CouponService::new(pool.clone(), ChangeNotifier::new());
        service
            .create_coupon(
                CreateCoupon {
                    code: "ONEPERORG".to_string(),
                    discount_type: DiscountType::Percent,
                    value: 10,
                    applies_to_plans: None,
                    min_users: None,
                    max_redemptions: None,
                    max_redemptions_per_org: Some(1),
                    duration: CouponDuration::Once,
                    duration_in_months: None,
                    valid_from: None,
                    valid_until: None,
                },
                &AuditActor::system(),
            )
            .await
            .unwrap();

        let org = OrgId::new();
        let subscription = seed_subscription(&pool, org).await;

        let actor = AuditActor::system();
        let first = service.apply_coupon(org, "ONEPERORG", &subscription, 3, &actor);
        let second = service.apply_coupon(org, "ONEPERORG", &subscription, 3, &actor);
        let (r1, r2) = tokio::join!(first, second);

        let successes = u8::from(r1.is_ok()) + u8::from(r2.is_ok());
        assert_eq!(successes, 1, "exactly one redemption may win the cap");

        let rows: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM redemptions WHERE org_id = $1")
            .bind(org)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows.0, 1);

        let count: (i32,) =
            sqlx::query_as("SELECT redemption_count FROM coupons WHERE code = 'ONEPERORG'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count.0, 1);
    }

    fn test_coupon() -> Coupon {
        Coupon {
            id: CouponId::new(),
            code: "WELCOME20".to_string(),
            discount_type: DiscountType::Percent,
            value: 20,
            applies_to_plans: None,
            min_users: None,
            max_redemptions: Some(100),
            max_redemptions_per_org: 1,
            redemption_count: 0,
            duration: CouponDuration::Once,
            duration_in_months: None,
            valid_from: OffsetDateTime::now_utc() - time::Duration::days(1),
            valid_until: Some(OffsetDateTime::now_utc() + time::Duration::days(30)),
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  welcome20 ").unwrap(), "WELCOME20");
        assert_eq!(normalize_code("SAVE-10_x").unwrap(), "SAVE-10_X");
        assert!(normalize_code("").is_err());
        assert!(normalize_code("bad code!").is_err());
    }

    #[test]
    fn test_valid_coupon_passes() {
        let coupon = test_coupon();
        let now = OffsetDateTime::now_utc();
        assert!(validate_coupon(&coupon, now, 0, PlanTier::Starter, 3).is_ok());
    }

    #[test]
    fn test_exhausted_coupon_is_conflict() {
        let mut coupon = test_coupon();
        coupon.redemption_count = 100;
        let err = validate_coupon(
            &coupon,
            OffsetDateTime::now_utc(),
            0,
            PlanTier::Starter,
            3,
        )
        .unwrap_err();
        match err {
            BillingError::Conflict(msg) => assert!(msg.contains("redemption limit reached")),
            other => panic!("expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_inactive_checked_before_window() {
        let mut coupon = test_coupon();
        coupon.active = false;
        coupon.valid_until = Some(OffsetDateTime::now_utc() - time::Duration::days(1));
        let err = validate_coupon(
            &coupon,
            OffsetDateTime::now_utc(),
            0,
            PlanTier::Starter,
            1,
        )
        .unwrap_err();
        // Active is the first check in the chain
        match err {
            BillingError::Conflict(msg) => assert!(msg.contains("no longer active")),
            other => panic!("expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_not_yet_valid_and_expired() {
        let mut coupon = test_coupon();
        coupon.valid_from = OffsetDateTime::now_utc() + time::Duration::days(1);
        let err = validate_coupon(
            &coupon,
            OffsetDateTime::now_utc(),
            0,
            PlanTier::Starter,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(ref m) if m.contains("not yet valid")));

        let mut coupon = test_coupon();
        coupon.valid_until = Some(OffsetDateTime::now_utc() - time::Duration::hours(1));
        let err = validate_coupon(
            &coupon,
            OffsetDateTime::now_utc(),
            0,
            PlanTier::Starter,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(ref m) if m.contains("expired")));
    }

    #[test]
    fn test_per_org_limit() {
        let coupon = test_coupon();
        let err = validate_coupon(
            &coupon,
            OffsetDateTime::now_utc(),
            1,
            PlanTier::Starter,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(ref m) if m.contains("already redeemed")));
    }

    #[test]
    fn test_plan_restriction() {
        let mut coupon = test_coupon();
        coupon.applies_to_plans = Some(vec!["team".to_string(), "business".to_string()]);

        assert!(validate_coupon(&coupon, OffsetDateTime::now_utc(), 0, PlanTier::Team, 1).is_ok());

        let err = validate_coupon(
            &coupon,
            OffsetDateTime::now_utc(),
            0,
            PlanTier::Starter,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(ref m) if m.contains("does not apply")));
    }

    #[test]
    fn test_min_users_requirement() {
        let mut coupon = test_coupon();
        coupon.min_users = Some(5);

        assert!(validate_coupon(&coupon, OffsetDateTime::now_utc(), 0, PlanTier::Team, 5).is_ok());

        let err =
            validate_coupon(&coupon, OffsetDateTime::now_utc(), 0, PlanTier::Team, 4).unwrap_err();
        assert!(matches!(err, BillingError::Conflict(ref m) if m.contains("at least 5 users")));
    }

    #[test]
    fn test_unlimited_redemptions() {
        let mut coupon = test_coupon();
        coupon.max_redemptions = None;
        coupon.redemption_count = 1_000_000;
        assert!(
            validate_coupon(&coupon, OffsetDateTime::now_utc(), 0, PlanTier::Starter, 1).is_ok()
        );
    }
}
