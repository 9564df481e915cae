//! API error type and HTTP status mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use receiptly_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced to HTTP callers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Authentication required".into())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Billing(e) => match e {
                BillingError::Validation(msg) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, msg.clone())
                }
                BillingError::NotFound(what) => {
                    (StatusCode::NOT_FOUND, format!("{} not found", what))
                }
                BillingError::PermissionDenied(_) => {
                    (StatusCode::FORBIDDEN, e.to_string())
                }
                BillingError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
                BillingError::IllegalTransition { .. } | BillingError::State(_) => {
                    (StatusCode::CONFLICT, e.to_string())
                }
                BillingError::WebhookSignatureInvalid => {
                    (StatusCode::BAD_REQUEST, "Invalid webhook signature".into())
                }
                // Externals get a generic body; the detail goes to logs
                BillingError::ExternalService { message, .. } => {
                    tracing::error!(detail = %message, "Payment processor failure");
                    (
                        StatusCode::BAD_GATEWAY,
                        "Payment processor unavailable".into(),
                    )
                }
                BillingError::Database(e) => {
                    tracing::error!(error = %e, "Database error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".into(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use receiptly_shared::SubscriptionStatus;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ApiError::BadRequest("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::Validation("v".into()).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                BillingError::NotFound("plan".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                BillingError::PermissionDenied("issue_refunds".into()).into(),
                StatusCode::FORBIDDEN,
            ),
            (
                BillingError::Conflict("busy".into()).into(),
                StatusCode::CONFLICT,
            ),
            (
                BillingError::IllegalTransition {
                    from: SubscriptionStatus::Canceled,
                    to: SubscriptionStatus::PastDue,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                BillingError::ExternalService {
                    message: "boom".into(),
                    retryable: false,
                }
                .into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                BillingError::WebhookSignatureInvalid.into(),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_and_message().0, expected);
        }
    }

    #[test]
    fn test_external_error_body_is_generic() {
        let err: ApiError = BillingError::ExternalService {
            message: "card network timeout at hop 3".into(),
            retryable: true,
        }
        .into();
        let (_, message) = err.status_and_message();
        assert!(!message.contains("hop 3"));
    }
}
