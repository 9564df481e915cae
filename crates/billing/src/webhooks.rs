//! Processor webhook handling
//!
//! Verifies inbound event signatures and feeds lifecycle and invoice
//! updates into the engine. Idempotency is atomic: an INSERT..ON CONFLICT
//! claim decides exactly one winner per event id before any processing
//! happens, so two concurrently delivered copies cannot both run.

use hmac::{Hmac, Mac};
use receiptly_shared::{BillingCycle, InvoiceStatus, OrgId, PlanTier, SubscriptionStatus};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::ChangeNotifier;
use crate::invoices::InvoiceStore;
use crate::lifecycle::{LifecycleEvent, LifecycleManager};

type HmacSha256 = Hmac<Sha256>;

/// Signature timestamp tolerance in seconds
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Events stuck in `processing` longer than this may be re-claimed
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Raw processor event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix timestamp; the ordering token for state updates
    pub created: i64,
    pub data: serde_json::Value,
}

impl ProcessorEvent {
    pub fn timestamp(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionPayload {
    org_id: OrgId,
    #[serde(default)]
    tier: Option<PlanTier>,
    #[serde(default)]
    cycle: Option<BillingCycle>,
    #[serde(default)]
    period_start: Option<i64>,
    #[serde(default)]
    period_end: Option<i64>,
    #[serde(default)]
    trial_end: Option<i64>,
    #[serde(default)]
    billing_email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoicePayload {
    invoice_id: String,
    org_id: OrgId,
    amount_cents: i64,
    #[serde(default)]
    amount_paid_cents: i64,
    #[serde(default)]
    amount_refunded_cents: i64,
    currency: String,
    status: InvoiceStatus,
    #[serde(default)]
    line_items: serde_json::Value,
    #[serde(default)]
    period_start: Option<i64>,
    #[serde(default)]
    period_end: Option<i64>,
}

fn to_datetime(ts: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(ts).unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Webhook handler for processor events
#[derive(Clone)]
pub struct WebhookHandler {
    pool: PgPool,
    webhook_secret: String,
    lifecycle: LifecycleManager,
    invoices: InvoiceStore,
}

impl WebhookHandler {
    pub fn new(pool: PgPool, webhook_secret: String, notifier: ChangeNotifier) -> Self {
        let lifecycle = LifecycleManager::new(pool.clone(), notifier);
        let invoices = InvoiceStore::new(pool.clone());
        Self {
            pool,
            webhook_secret,
            lifecycle,
            invoices,
        }
    }

    /// Verify a webhook signature header of the form
    /// `t=<unix>,v1=<hex hmac-sha256 of "{t}.{payload}">` and parse the
    /// event. Signatures outside the tolerance window are rejected.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<ProcessorEvent> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::error!("Missing timestamp in webhook signature header");
            BillingError::WebhookSignatureInvalid
        })?;
        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::error!("Missing v1 signature in webhook signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        // Check timestamp tolerance (5 minutes)
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp,
                now,
                diff = (now - timestamp).abs(),
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: ProcessorEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        Ok(event)
    }

    /// Handle a verified event.
    ///
    /// The claim INSERT ensures only one concurrent delivery processes the
    /// event. A redelivery re-claims rows whose last attempt ended in
    /// `error`, and rows stuck in `processing` past the timeout window;
    /// only a `success` row is a true duplicate. The processing result is
    /// recorded for replay debugging.
    pub async fn handle_event(&self, event: ProcessorEvent) -> BillingResult<()> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events
                (event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW()
            WHERE webhook_events.processing_result = 'error'
               OR (webhook_events.processing_result = 'processing'
                   AND webhook_events.processing_started_at < NOW() - make_interval(mins => $4))
            RETURNING id
            "#,
        )
        .bind(&event.id)
        .bind(&event.kind)
        .bind(event.timestamp())
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.kind,
                "Duplicate webhook event, skipping"
            );
            return Ok(());
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.kind,
            "Processing webhook event"
        );

        let result = self.process(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        if let Err(e) = sqlx::query(
            "UPDATE webhook_events SET processing_result = $1, error_message = $2
             WHERE event_id = $3",
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event.id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event.id,
                error = %e,
                "Failed to record webhook processing result"
            );
        }

        result
    }

    async fn process(&self, event: &ProcessorEvent) -> BillingResult<()> {
        match event.kind.as_str() {
            "checkout.completed" => self.handle_checkout_completed(event).await,
            "invoice.paid" => self.handle_invoice_paid(event).await,
            "invoice.payment_failed" => self.handle_invoice_payment_failed(event).await,
            "invoice.finalized" | "charge.refunded" => self.handle_invoice_sync(event).await,
            "subscription.retries_exhausted" => {
                let payload: SubscriptionPayload = self.decode(event)?;
                self.lifecycle
                    .apply_event(
                        payload.org_id,
                        &event.id,
                        event.timestamp(),
                        LifecycleEvent::RetriesExhausted,
                    )
                    .await?;
                Ok(())
            }
            "subscription.deleted" => {
                let payload: SubscriptionPayload = self.decode(event)?;
                self.lifecycle
                    .apply_event(
                        payload.org_id,
                        &event.id,
                        event.timestamp(),
                        LifecycleEvent::SubscriptionEnded,
                    )
                    .await?;
                Ok(())
            }
            other => {
                // Surface new processor event kinds in logs without failing
                tracing::info!(
                    event_id = %event.id,
                    event_type = %other,
                    "Unhandled processor event type"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, event: &ProcessorEvent) -> BillingResult<()> {
        let payload: SubscriptionPayload = self.decode(event)?;
        let tier = payload.tier.ok_or_else(|| {
            BillingError::Validation(format!("checkout event {} missing tier", event.id))
        })?;
        let now = OffsetDateTime::now_utc();
        self.lifecycle
            .apply_event(
                payload.org_id,
                &event.id,
                event.timestamp(),
                LifecycleEvent::CheckoutCompleted {
                    tier,
                    cycle: payload.cycle.unwrap_or(BillingCycle::Monthly),
                    period_start: payload.period_start.map(to_datetime).unwrap_or(now),
                    period_end: payload.period_end.map(to_datetime).unwrap_or(now),
                    trial_end: payload.trial_end.map(to_datetime),
                    billing_email: payload.billing_email,
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_invoice_paid(&self, event: &ProcessorEvent) -> BillingResult<()> {
        let payload: InvoicePayload = self.decode(event)?;
        self.sync_invoice(&payload).await?;

        // A paid invoice recovers a past-due subscription and converts an
        // ending trial; a plain renewal just rolls the billing period.
        let sub = self.lifecycle.get_subscription(payload.org_id).await?;
        match sub.map(|s| s.status) {
            Some(SubscriptionStatus::PastDue) | Some(SubscriptionStatus::Unpaid) => {
                let now = OffsetDateTime::now_utc();
                self.lifecycle
                    .apply_event(
                        payload.org_id,
                        &event.id,
                        event.timestamp(),
                        LifecycleEvent::PaymentRecovered {
                            period_start: payload.period_start.map(to_datetime).unwrap_or(now),
                            period_end: payload.period_end.map(to_datetime).unwrap_or(now),
                        },
                    )
                    .await?;
            }
            Some(SubscriptionStatus::Trialing) => {
                self.lifecycle
                    .apply_event(
                        payload.org_id,
                        &event.id,
                        event.timestamp(),
                        LifecycleEvent::TrialConverted,
                    )
                    .await?;
            }
            _ => {
                if let (Some(start), Some(end)) = (payload.period_start, payload.period_end) {
                    sqlx::query(
                        "UPDATE subscriptions SET current_period_start = $2,
                             current_period_end = $3, updated_at = NOW()
                         WHERE org_id = $1",
                    )
                    .bind(payload.org_id)
                    .bind(to_datetime(start))
                    .bind(to_datetime(end))
                    .execute(&self.pool)
                    .await?;
                }
            }
        }

        Ok(())
    }

    async fn handle_invoice_payment_failed(&self, event: &ProcessorEvent) -> BillingResult<()> {
        let payload: InvoicePayload = self.decode(event)?;
        self.sync_invoice(&payload).await?;

        let sub = self.lifecycle.get_subscription(payload.org_id).await?;
        if let Some(sub) = sub {
            if sub.status == SubscriptionStatus::Active {
                self.lifecycle
                    .apply_event(
                        payload.org_id,
                        &event.id,
                        event.timestamp(),
                        LifecycleEvent::PaymentFailed,
                    )
                    .await?;
            }
        }

        Ok(())
    }

    async fn handle_invoice_sync(&self, event: &ProcessorEvent) -> BillingResult<()> {
        let payload: InvoicePayload = self.decode(event)?;
        self.sync_invoice(&payload).await?;
        Ok(())
    }

    async fn sync_invoice(&self, payload: &InvoicePayload) -> BillingResult<()> {
        self.invoices
            .upsert_from_processor(
                &payload.invoice_id,
                payload.org_id,
                payload.amount_cents,
                payload.amount_paid_cents,
                payload.amount_refunded_cents,
                &payload.currency,
                payload.status,
                payload.line_items.clone(),
                payload.period_start.map(to_datetime),
                payload.period_end.map(to_datetime),
            )
            .await?;
        Ok(())
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, event: &ProcessorEvent) -> BillingResult<T> {
        serde_json::from_value(event.data.clone()).map_err(|e| {
            BillingError::Validation(format!(
                "malformed {} payload in event {}: {}",
                event.kind, event.id, e
            ))
        })
    }
}
