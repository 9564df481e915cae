//! Organization-facing billing routes
//!
//! Everything here is scoped to the caller's own organization; the org id
//! comes from the token, never from the request body. The webhook endpoint
//! is the one exception: it is unauthenticated and relies on signature
//! verification instead.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use receiptly_billing::{
    AuditActor, CheckoutSession, EntitlementSummary, FeatureDecision, Invoice, Plan, Redemption,
    RefundRecord, Subscription,
};
use receiptly_shared::{BillingCycle, FeatureFlag, PlanTier};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::{extract_client_ip, extract_user_agent};
use crate::state::AppState;

fn user_actor(user: &AuthUser, headers: &HeaderMap) -> AuditActor {
    AuditActor::user(user.user_id)
        .with_request_context(extract_client_ip(headers), extract_user_agent(headers))
}

// =============================================================================
// Plans
// =============================================================================

/// GET /api/billing/plans
///
/// Publicly purchasable plans only; retired and hidden plans stay out of
/// the pricing page.
pub async fn get_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    let plans = state.billing.catalog.list_plans().await?;
    Ok(Json(
        plans.into_iter().filter(|p| p.active && p.public).collect(),
    ))
}

// =============================================================================
// Checkout and portal
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub tier: PlanTier,
    pub cycle: BillingCycle,
}

/// POST /api/billing/checkout
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutSession>> {
    if req.tier == PlanTier::Free {
        return Err(ApiError::BadRequest(
            "the free plan does not require checkout".to_string(),
        ));
    }

    let plan = state.billing.catalog.get_plan(req.tier).await?;
    if !plan.active {
        return Err(ApiError::BadRequest(format!(
            "the {} plan is no longer available",
            req.tier
        )));
    }

    let session = state
        .billing
        .processor
        .create_checkout_session(user.org_id, req.tier, req.cycle)
        .await?;

    tracing::info!(
        org_id = %user.org_id,
        tier = %req.tier,
        cycle = %req.cycle,
        session_id = %session.session_id,
        "Checkout session created"
    );

    Ok(Json(session))
}

/// POST /api/billing/portal
pub async fn create_customer_portal(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let url = state.billing.processor.customer_portal_url(user.org_id).await?;
    Ok(Json(json!({ "url": url })))
}

// =============================================================================
// Subscription
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// None means the organization is on the implicit free tier
    pub subscription: Option<Subscription>,
    pub entitlements: EntitlementSummary,
}

/// GET /api/billing/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state.billing.lifecycle.get_subscription(user.org_id).await?;
    let entitlements = state.billing.entitlement.summary(user.org_id).await?;
    Ok(Json(SubscriptionResponse {
        subscription,
        entitlements,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediate: bool,
}

/// POST /api/billing/subscription/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<Subscription>> {
    let actor = user_actor(&user, &headers);
    let sub = state
        .billing
        .lifecycle
        .cancel_subscription(user.org_id, req.immediate, &actor)
        .await?;
    Ok(Json(sub))
}

/// POST /api/billing/subscription/resume
///
/// Undoes a pending end-of-period cancellation.
pub async fn resume_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
) -> ApiResult<Json<Subscription>> {
    let actor = user_actor(&user, &headers);
    let sub = state
        .billing
        .lifecycle
        .resume_subscription(user.org_id, &actor)
        .await?;
    Ok(Json(sub))
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub tier: PlanTier,
    pub cycle: Option<BillingCycle>,
}

/// POST /api/billing/subscription/change-plan
pub async fn change_plan(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<Subscription>> {
    let actor = user_actor(&user, &headers);
    let sub = state
        .billing
        .lifecycle
        .change_plan(user.org_id, req.tier, req.cycle, &actor)
        .await?;
    Ok(Json(sub))
}

// =============================================================================
// Coupons
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

/// POST /api/billing/coupons/apply
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<ApplyCouponRequest>,
) -> ApiResult<Json<Redemption>> {
    let subscription = state
        .billing
        .lifecycle
        .get_subscription(user.org_id)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest("coupons require an active subscription".to_string())
        })?;
    let usage = state.billing.usage.get(user.org_id).await?;

    let actor = user_actor(&user, &headers);
    let redemption = state
        .billing
        .coupons
        .apply_coupon(
            user.org_id,
            &req.code,
            &subscription,
            usage.current_user_count,
            &actor,
        )
        .await?;

    Ok(Json(redemption))
}

// =============================================================================
// Entitlements
// =============================================================================

/// GET /api/billing/entitlements
pub async fn get_entitlements(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<EntitlementSummary>> {
    let summary = state.billing.entitlement.summary(user.org_id).await?;
    Ok(Json(summary))
}

/// GET /api/billing/entitlements/{feature}
pub async fn check_feature(
    State(state): State<AppState>,
    user: AuthUser,
    Path(feature): Path<String>,
) -> ApiResult<Json<FeatureDecision>> {
    let flag = FeatureFlag::parse(&feature)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown feature '{}'", feature)))?;
    let decision = state
        .billing
        .entitlement
        .can_use_feature(user.org_id, flag)
        .await?;
    Ok(Json(decision))
}

// =============================================================================
// Invoices and refunds
// =============================================================================

/// GET /api/billing/invoices
pub async fn list_invoices(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<Invoice>>> {
    let invoices = state.billing.invoices.list_for_org(user.org_id).await?;
    Ok(Json(invoices))
}

/// GET /api/billing/refunds
pub async fn list_refunds(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<RefundRecord>>> {
    let refunds = state.billing.refunds.refund_history(user.org_id).await?;
    Ok(Json(refunds))
}

// =============================================================================
// Webhooks
// =============================================================================

/// POST /api/webhooks/processor
///
/// Unauthenticated; trust comes from the HMAC signature header. Duplicate
/// deliveries are a 200 no-op so the processor stops redelivering; a
/// processing failure propagates as an error status, which keeps the
/// event in the processor's redelivery queue for another attempt.
pub async fn processor_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("processor-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(receiptly_billing::BillingError::WebhookSignatureInvalid)
        .map_err(ApiError::from)?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;

    tracing::info!(event_id = %event.id, event_type = %event.kind, "Webhook received");
    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}
