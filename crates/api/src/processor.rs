//! HTTP adapter for the external payment processor
//!
//! Speaks a small JSON API over HTTPS. Session-creation calls are
//! idempotent on the processor side and go through the shared retry
//! wrapper; refunds carry an `Idempotency-Key` header and are issued
//! exactly once.

use std::time::Duration;

use receiptly_billing::{
    with_retry, BillingError, BillingResult, CheckoutSession, IdempotencyKey, PaymentProcessor,
    RefundOutcome,
};
use receiptly_shared::{BillingCycle, OrgId, PlanTier};
use serde::Deserialize;
use serde_json::json;

#[derive(Clone)]
pub struct HttpProcessor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
}

#[derive(Deserialize)]
struct PortalResponse {
    url: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    amount_cents: i64,
}

impl HttpProcessor {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> BillingResult<T> {
        let response = response.map_err(|e| BillingError::ExternalService {
            message: format!("processor request failed: {}", e),
            retryable: true,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::ExternalService {
                message: format!("processor returned {}: {}", status, body),
                retryable: status.is_server_error(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BillingError::ExternalService {
                message: format!("processor returned malformed response: {}", e),
                retryable: false,
            })
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for HttpProcessor {
    async fn create_checkout_session(
        &self,
        org_id: OrgId,
        tier: PlanTier,
        cycle: BillingCycle,
    ) -> BillingResult<CheckoutSession> {
        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let body = json!({
            "org_id": org_id,
            "tier": tier.as_str(),
            "cycle": cycle.as_str(),
        });

        let session: SessionResponse = with_retry(self.timeout, || async {
            Self::decode(
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
                    .send()
                    .await,
            )
            .await
        })
        .await?;

        Ok(CheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }

    async fn customer_portal_url(&self, org_id: OrgId) -> BillingResult<String> {
        let url = format!("{}/v1/portal/sessions", self.base_url);
        let body = json!({ "org_id": org_id });

        let portal: PortalResponse = with_retry(self.timeout, || async {
            Self::decode(
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
                    .send()
                    .await,
            )
            .await
        })
        .await?;

        Ok(portal.url)
    }

    async fn refund(
        &self,
        invoice_id: &str,
        amount_cents: Option<i64>,
        idempotency_key: IdempotencyKey,
    ) -> BillingResult<RefundOutcome> {
        let url = format!("{}/v1/refunds", self.base_url);
        let body = json!({
            "invoice_id": invoice_id,
            "amount_cents": amount_cents,
        });

        // Single attempt. The idempotency key protects against the one
        // retry we do allow: the caller resubmitting after an ambiguous
        // network failure.
        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send).await.map_err(|_| {
            BillingError::ExternalService {
                message: format!("refund call timed out after {:?}", self.timeout),
                retryable: false,
            }
        })?;

        let refund: RefundResponse = Self::decode(response).await?;
        Ok(RefundOutcome {
            refund_id: refund.id,
            amount_cents: refund.amount_cents,
        })
    }
}
