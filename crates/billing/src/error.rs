//! Billing error types

use receiptly_shared::SubscriptionStatus;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by the billing engine.
///
/// Variants map one-to-one onto the caller-visible error taxonomy: callers
/// branch on the variant, not on message text.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Malformed input (bad coupon code, discount percent out of range, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown plan, organization, invoice, or coupon
    #[error("not found: {0}")]
    NotFound(String),

    /// Authorization gate rejected the action
    #[error("permission denied: missing '{0}'")]
    PermissionDenied(String),

    /// Coupon exhausted/expired, redemption race lost, stale event
    #[error("conflict: {0}")]
    Conflict(String),

    /// Illegal subscription state transition
    #[error("illegal subscription transition: {from} -> {to}")]
    IllegalTransition {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    /// Operation does not apply to the subscription's current state
    /// (e.g., resuming a subscription that was never cancel-pending)
    #[error("state error: {0}")]
    State(String),

    /// Payment processor failure. `retryable` distinguishes transient
    /// network errors from terminal declines.
    #[error("payment processor error: {message}")]
    ExternalService { message: String, retryable: bool },

    /// Inbound webhook failed signature verification
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BillingError {
    /// Whether retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::ExternalService {
                retryable: true,
                ..
            }
        )
    }
}
