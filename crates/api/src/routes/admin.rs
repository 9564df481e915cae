//! Platform admin routes
//!
//! Every handler resolves the caller's authorization gate and checks the
//! specific permission before touching anything. Mutations are audited as
//! the super-admin actor with the caller's request context attached.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use receiptly_billing::{
    AuditActor, AuditLogFilter, Coupon, CreateCoupon, InvariantCheckSummary, InvariantViolation,
    Permission, PlanUpdate, RefundResult, Subscription,
};
use receiptly_shared::{BillingCycle, OrgId, PlanTier, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::{extract_client_ip, extract_user_agent};
use crate::state::AppState;

fn admin_actor(user: &AuthUser, headers: &HeaderMap) -> AuditActor {
    AuditActor::super_admin(user.user_id)
        .with_request_context(extract_client_ip(headers), extract_user_agent(headers))
}

fn parse_rfc3339(value: &str, field: &str) -> Result<OffsetDateTime, ApiError> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|_| ApiError::BadRequest(format!("'{}' must be an RFC 3339 timestamp", field)))
}

// =============================================================================
// Subscriptions
// =============================================================================

/// GET /api/admin/subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<Subscription>>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ManageSubscriptions)
        .await?;

    let subs = state.billing.lifecycle.list_subscriptions().await?;
    Ok(Json(subs))
}

#[derive(Debug, Deserialize)]
pub struct DiscountRequest {
    pub percent: i32,
    pub expires_at: Option<String>,
    pub reason: String,
}

/// POST /api/admin/orgs/{org_id}/discount
pub async fn apply_discount(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<DiscountRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ApplyDiscounts)
        .await?;

    let expires_at = req
        .expires_at
        .as_deref()
        .map(|s| parse_rfc3339(s, "expires_at"))
        .transpose()?;

    let actor = admin_actor(&user, &headers);
    state
        .billing
        .coupons
        .apply_discount(OrgId(org_id), req.percent, expires_at, &req.reason, &actor)
        .await?;

    Ok(Json(json!({ "applied": true, "percent": req.percent })))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub invoice_id: String,
    /// None = full refund of the invoice
    pub amount_cents: Option<i64>,
    pub reason: String,
}

/// POST /api/admin/orgs/{org_id}/refund
pub async fn issue_refund(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Json<RefundResult>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::IssueRefunds)
        .await?;

    let actor = admin_actor(&user, &headers);
    let result = state
        .billing
        .refunds
        .issue_refund(
            OrgId(org_id),
            user.user_id,
            &req.invoice_id,
            req.amount_cents,
            &req.reason,
            &actor,
        )
        .await?;

    Ok(Json(result))
}

/// POST /api/admin/orgs/{org_id}/pause
pub async fn pause_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Subscription>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::PauseSubscriptions)
        .await?;

    let actor = admin_actor(&user, &headers);
    let sub = state
        .billing
        .lifecycle
        .pause_subscription(OrgId(org_id), &actor)
        .await?;
    Ok(Json(sub))
}

/// POST /api/admin/orgs/{org_id}/resume
pub async fn unpause_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Subscription>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::PauseSubscriptions)
        .await?;

    let actor = admin_actor(&user, &headers);
    let sub = state
        .billing
        .lifecycle
        .unpause_subscription(OrgId(org_id), &actor)
        .await?;
    Ok(Json(sub))
}

#[derive(Debug, Deserialize)]
pub struct ExtendTrialRequest {
    pub days: i64,
}

/// POST /api/admin/orgs/{org_id}/extend-trial
pub async fn extend_trial(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ExtendTrialRequest>,
) -> ApiResult<Json<Subscription>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ExtendTrials)
        .await?;

    let actor = admin_actor(&user, &headers);
    let sub = state
        .billing
        .lifecycle
        .extend_trial(OrgId(org_id), req.days, &actor)
        .await?;
    Ok(Json(sub))
}

/// DELETE /api/admin/orgs/{org_id}
pub async fn delete_organization(
    State(state): State<AppState>,
    user: AuthUser,
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::DeleteOrganizations)
        .await?;

    let actor = admin_actor(&user, &headers);
    state
        .billing
        .lifecycle
        .delete_organization(OrgId(org_id), &actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Coupons
// =============================================================================

/// POST /api/admin/coupons
pub async fn create_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<CreateCoupon>,
) -> ApiResult<Json<Coupon>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ManageCoupons)
        .await?;

    let actor = admin_actor(&user, &headers);
    let coupon = state.billing.coupons.create_coupon(req, &actor).await?;
    Ok(Json(coupon))
}

#[derive(Debug, Deserialize)]
pub struct CouponQuery {
    pub code: String,
}

/// GET /api/admin/coupons?code=...
pub async fn get_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CouponQuery>,
) -> ApiResult<Json<Coupon>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ManageCoupons)
        .await?;

    let coupon = state.billing.coupons.get_coupon(&query.code).await?;
    Ok(Json(coupon))
}

/// POST /api/admin/coupons/{code}/deactivate
pub async fn deactivate_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ManageCoupons)
        .await?;

    let actor = admin_actor(&user, &headers);
    state.billing.coupons.deactivate_coupon(&code, &actor).await?;
    Ok(Json(json!({ "deactivated": true })))
}

// =============================================================================
// Plans
// =============================================================================

/// PATCH /api/admin/plans/{tier}
pub async fn update_plan(
    State(state): State<AppState>,
    user: AuthUser,
    Path(tier): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PlanUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ManagePlans)
        .await?;

    let tier = PlanTier::parse(&tier)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown plan tier '{}'", tier)))?;

    let actor = admin_actor(&user, &headers);
    state.billing.catalog.update_plan(tier, req, &actor).await?;
    Ok(Json(json!({ "updated": tier.as_str() })))
}

// =============================================================================
// Analytics
// =============================================================================

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    /// Monthly recurring revenue in cents, after discounts
    pub mrr_cents: i64,
    pub total_subscriptions: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_tier: BTreeMap<String, i64>,
}

/// GET /api/admin/analytics
///
/// MRR counts active and trialing subscriptions at their monthly-equivalent
/// price (annual / 12) with any live discount applied.
pub async fn get_analytics(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<AnalyticsResponse>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ViewAnalytics)
        .await?;

    let subs = state.billing.lifecycle.list_subscriptions().await?;
    let plans = state.billing.catalog.list_plans().await?;
    let now = OffsetDateTime::now_utc();

    let mut mrr_cents: i64 = 0;
    let mut by_status: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_tier: BTreeMap<String, i64> = BTreeMap::new();

    for sub in &subs {
        *by_status.entry(sub.status.to_string()).or_insert(0) += 1;
        *by_tier.entry(sub.tier.to_string()).or_insert(0) += 1;

        if !matches!(
            sub.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) {
            continue;
        }

        let Some(plan) = plans.iter().find(|p| p.tier == sub.tier) else {
            continue;
        };

        let monthly = match sub.billing_cycle {
            BillingCycle::Monthly => plan.monthly_price_cents,
            BillingCycle::Annual => plan.annual_price_cents / 12,
        };

        let discount = match (sub.discount_percent, sub.discount_expires_at) {
            (Some(pct), None) => pct,
            (Some(pct), Some(expires)) if expires > now => pct,
            _ => 0,
        };

        mrr_cents += monthly * i64::from(100 - discount) / 100;
    }

    Ok(Json(AnalyticsResponse {
        mrr_cents,
        total_subscriptions: subs.len() as i64,
        by_status,
        by_tier,
    }))
}

// =============================================================================
// Audit log
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub action: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub org: Option<String>,
    pub limit: Option<i64>,
    /// "json" (default) or "csv"
    pub format: Option<String>,
}

/// GET /api/admin/audit-log
///
/// CSV export needs the export permission on top of read access.
pub async fn get_audit_log(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AuditLogQuery>,
) -> ApiResult<Response> {
    let gate = state.billing.gate_for(user.user_id);
    gate.require(Permission::ViewAuditLog).await?;

    let want_csv = query.format.as_deref() == Some("csv");
    if want_csv {
        gate.require(Permission::ExportAuditLog).await?;
    }

    let filter = AuditLogFilter {
        action: query.action,
        from: query
            .from
            .as_deref()
            .map(|s| parse_rfc3339(s, "from"))
            .transpose()?,
        to: query
            .to
            .as_deref()
            .map(|s| parse_rfc3339(s, "to"))
            .transpose()?,
        org_contains: query.org,
        limit: query.limit,
    };

    let entries = state.billing.audit.query(&filter).await?;

    if want_csv {
        let csv = audit_entries_to_csv(&entries);
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"audit-log.csv\"",
                ),
            ],
            csv,
        )
            .into_response());
    }

    Ok(Json(entries).into_response())
}

/// Escape one CSV cell. Leading formula characters get an apostrophe
/// prefix so exported cells cannot execute when opened in a spreadsheet.
fn csv_escape(value: &str) -> String {
    let defused = if value.starts_with(['=', '+', '-', '@', '\t', '\r']) {
        format!("'{}", value)
    } else {
        value.to_string()
    };

    if defused.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", defused.replace('"', "\"\""))
    } else {
        defused
    }
}

fn audit_entries_to_csv(entries: &[receiptly_billing::AuditLogEntry]) -> String {
    let mut out =
        String::from("Date/Time,Action,Category,Organization,Amount,Performed By,Details\n");

    for entry in entries {
        let category = if entry.is_system {
            "system"
        } else if entry.is_super_admin {
            "admin"
        } else {
            "user"
        };

        let timestamp = entry
            .created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| entry.created_at.to_string());
        let amount = entry
            .amount_cents
            .map(|c| format!("{:.2}", c as f64 / 100.0))
            .unwrap_or_default();
        let performed_by = entry
            .performed_by
            .map(|u| u.to_string())
            .unwrap_or_else(|| "system".to_string());
        let org = entry
            .org_id
            .map(|o| o.to_string())
            .unwrap_or_default();
        let details = if entry.details.is_null() {
            String::new()
        } else {
            entry.details.to_string()
        };

        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            csv_escape(&timestamp),
            csv_escape(&entry.action),
            csv_escape(category),
            csv_escape(&org),
            csv_escape(&amount),
            csv_escape(&performed_by),
            csv_escape(&details),
        ));
    }

    out
}

// =============================================================================
// Invariants
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct InvariantQuery {
    /// Run a single named check instead of the full suite
    pub check: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InvariantRunResponse {
    Full(InvariantCheckSummary),
    Single {
        check: String,
        violations: Vec<InvariantViolation>,
    },
}

/// POST /api/admin/invariants/run
pub async fn run_invariants(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<InvariantQuery>,
) -> ApiResult<Json<InvariantRunResponse>> {
    state
        .billing
        .gate_for(user.user_id)
        .require(Permission::ViewAnalytics)
        .await?;

    let response = match query.check {
        Some(check) => {
            let violations = state.billing.invariants.run_check(&check).await?;
            InvariantRunResponse::Single { check, violations }
        }
        None => InvariantRunResponse::Full(state.billing.invariants.run_all_checks().await?),
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    // CSV formula injection: leading =, +, -, @ and tab must be defused
    #[test]
    fn test_csv_escape_defuses_formula_prefixes() {
        assert_eq!(csv_escape("=1+2"), "'=1+2");
        assert_eq!(csv_escape("+SUM(A1:A9)"), "'+SUM(A1:A9)");
        assert_eq!(csv_escape("-2+3"), "'-2+3");
        assert_eq!(csv_escape("@cmd"), "'@cmd");
        assert_eq!(csv_escape("\tpayload"), "'\tpayload");
    }

    #[test]
    fn test_csv_escape_quotes_separators() {
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("line1\nline2"), "\"line1\nline2\"");
    }

    #[test]
    fn test_csv_escape_leaves_plain_values_alone() {
        assert_eq!(csv_escape("subscription_created"), "subscription_created");
        assert_eq!(csv_escape("42.00"), "42.00");
        assert_eq!(csv_escape(""), "");
    }

    #[test]
    fn test_csv_escape_formula_with_comma_gets_both() {
        assert_eq!(csv_escape("=A1,B1"), "\"'=A1,B1\"");
    }
}
