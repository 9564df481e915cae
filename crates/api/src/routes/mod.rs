//! HTTP route registration

pub mod admin;
pub mod billing;

use axum::http::HeaderMap;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::state::AppState;

/// Best-effort client IP for audit records. Trusts the first hop of
/// `X-Forwarded-For` because the service always sits behind the load
/// balancer.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

pub fn create_router(state: AppState) -> Router {
    let billing_routes = Router::new()
        .route("/plans", get(billing::get_plans))
        .route("/checkout", post(billing::create_checkout_session))
        .route("/portal", post(billing::create_customer_portal))
        .route("/subscription", get(billing::get_subscription))
        .route("/subscription/cancel", post(billing::cancel_subscription))
        .route("/subscription/resume", post(billing::resume_subscription))
        .route(
            "/subscription/change-plan",
            post(billing::change_plan),
        )
        .route("/coupons/apply", post(billing::apply_coupon))
        .route("/entitlements", get(billing::get_entitlements))
        .route(
            "/entitlements/{feature}",
            get(billing::check_feature),
        )
        .route("/invoices", get(billing::list_invoices))
        .route("/refunds", get(billing::list_refunds));

    let admin_routes = Router::new()
        .route("/subscriptions", get(admin::list_subscriptions))
        .route("/orgs/{org_id}/discount", post(admin::apply_discount))
        .route("/orgs/{org_id}/refund", post(admin::issue_refund))
        .route("/orgs/{org_id}/pause", post(admin::pause_subscription))
        .route("/orgs/{org_id}/resume", post(admin::unpause_subscription))
        .route(
            "/orgs/{org_id}/extend-trial",
            post(admin::extend_trial),
        )
        .route("/orgs/{org_id}", delete(admin::delete_organization))
        .route(
            "/coupons",
            post(admin::create_coupon).get(admin::get_coupon),
        )
        .route(
            "/coupons/{code}/deactivate",
            post(admin::deactivate_coupon),
        )
        .route("/plans/{tier}", patch(admin::update_plan))
        .route("/analytics", get(admin::get_analytics))
        .route("/audit-log", get(admin::get_audit_log))
        .route("/invariants/run", post(admin::run_invariants));

    Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/processor", post(billing::processor_webhook))
        .nest("/api/billing", billing_routes)
        .nest("/api/admin", admin_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
