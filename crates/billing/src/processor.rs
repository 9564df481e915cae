//! Payment processor interface
//!
//! The engine consumes a payment processor; it never implements one. This
//! trait is the contract any processor adapter must satisfy. Read-style
//! calls go through a bounded timeout with exponential-backoff retry;
//! mutating calls (charge, refund) carry an idempotency key and are never
//! blindly retried.

use std::time::Duration;

use receiptly_shared::{BillingCycle, OrgId, PlanTier};
use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Key sent with mutating processor calls so a network-level retry cannot
/// double-charge or double-refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub Uuid);

impl IdempotencyKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hosted checkout session created by the processor
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// Result of a refund call
#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub amount_cents: i64,
}

/// Contract the external payment processor must satisfy.
#[async_trait::async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a hosted checkout session for a plan/cycle pair
    async fn create_checkout_session(
        &self,
        org_id: OrgId,
        tier: PlanTier,
        cycle: BillingCycle,
    ) -> BillingResult<CheckoutSession>;

    /// Hosted customer portal URL for self-service billing management
    async fn customer_portal_url(&self, org_id: OrgId) -> BillingResult<String>;

    /// Refund an invoice, fully or partially. Mutating: callers pass an
    /// idempotency key and must not retry on ambiguous failure.
    async fn refund(
        &self,
        invoice_id: &str,
        amount_cents: Option<i64>,
        idempotency_key: IdempotencyKey,
    ) -> BillingResult<RefundOutcome>;
}

/// Wrap an idempotent/read processor call with a bounded timeout and
/// exponential backoff. Terminal errors short-circuit; only retryable
/// failures and timeouts are retried, at most three extra attempts.
pub async fn with_retry<T, F, Fut>(timeout: Duration, call: F) -> BillingResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = BillingResult<T>>,
{
    let backoff = ExponentialBackoff::from_millis(100)
        .max_delay(Duration::from_secs(2))
        .map(jitter)
        .take(3);

    let mut last_err = None;
    for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => {
                tracing::warn!(attempt, error = %e, "Retryable processor failure");
                last_err = Some(e);
            }
            Err(_) => {
                tracing::warn!(attempt, ?timeout, "Processor call timed out");
                last_err = Some(BillingError::ExternalService {
                    message: format!("processor call timed out after {:?}", timeout),
                    retryable: true,
                });
            }
        }
    }

    Err(last_err.unwrap_or(BillingError::ExternalService {
        message: "processor call failed".to_string(),
        retryable: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: BillingResult<u32> = with_retry(Duration::from_secs(1), || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(BillingError::ExternalService {
                    message: "connection reset".to_string(),
                    retryable: true,
                })
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_decline_is_not_retried_forever() {
        let attempts = AtomicU32::new(0);
        let result: BillingResult<u32> = with_retry(Duration::from_secs(1), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(BillingError::ExternalService {
                message: "card declined".to_string(),
                retryable: false,
            })
        })
        .await;

        assert!(result.is_err());
        assert!(!result.unwrap_err().is_retryable());
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "no retry after decline");
    }

    #[test]
    fn test_idempotency_keys_are_unique() {
        assert_ne!(IdempotencyKey::new().0, IdempotencyKey::new().0);
    }
}
