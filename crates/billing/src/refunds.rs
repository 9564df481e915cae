//! Admin-initiated refunds
//!
//! A refund writes its audit record first with a pending status, then calls
//! the processor with an idempotency key, then completes the record as
//! completed or failed. Failed processor calls stay traceable.

use std::sync::Arc;

use receiptly_shared::{InvoiceStatus, OrgId, UserId};
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{AuditActor, AuditLogRecorder};
use crate::error::{BillingError, BillingResult};
use crate::invoices::InvoiceStore;
use crate::processor::{IdempotencyKey, PaymentProcessor};

/// Result of an admin refund
#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    pub refund_id: String,
    pub invoice_id: String,
    pub amount_cents: i64,
}

/// Refund record for the audit trail
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RefundRecord {
    pub id: Uuid,
    pub org_id: OrgId,
    pub admin_user_id: UserId,
    pub invoice_id: String,
    pub processor_refund_id: Option<String>,
    pub amount_cents: i64,
    pub reason: String,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

/// Admin refund service
#[derive(Clone)]
pub struct RefundService {
    pool: PgPool,
    processor: Arc<dyn PaymentProcessor>,
    invoices: InvoiceStore,
    audit: AuditLogRecorder,
}

impl RefundService {
    pub fn new(pool: PgPool, processor: Arc<dyn PaymentProcessor>) -> Self {
        let invoices = InvoiceStore::new(pool.clone());
        let audit = AuditLogRecorder::new(pool.clone());
        Self {
            pool,
            processor,
            invoices,
            audit,
        }
    }

    /// Refund an invoice fully or partially.
    ///
    /// `amount_cents = None` refunds the full paid amount. The mutating
    /// processor call carries an idempotency key and is not retried;
    /// ambiguous failures are surfaced, never repeated.
    pub async fn issue_refund(
        &self,
        org_id: OrgId,
        admin_user_id: UserId,
        invoice_id: &str,
        amount_cents: Option<i64>,
        reason: &str,
        actor: &AuditActor,
    ) -> BillingResult<RefundResult> {
        if reason.trim().is_empty() {
            return Err(BillingError::Validation(
                "a reason is required for refunds".to_string(),
            ));
        }

        let invoice = self.invoices.get(invoice_id).await?;
        if invoice.org_id != org_id {
            return Err(BillingError::NotFound(format!(
                "invoice '{}' for organization {}",
                invoice_id, org_id
            )));
        }
        if !matches!(
            invoice.status,
            InvoiceStatus::Paid | InvoiceStatus::PartiallyRefunded
        ) {
            return Err(BillingError::State(format!(
                "invoice {} is {}, not refundable",
                invoice_id, invoice.status
            )));
        }

        let refundable = invoice.amount_paid_cents - invoice.amount_refunded_cents;
        let amount = amount_cents.unwrap_or(refundable);
        if amount <= 0 || amount > refundable {
            return Err(BillingError::Validation(format!(
                "refund amount must be between 1 and {} cents",
                refundable
            )));
        }

        // Pending record first, so a crash mid-call leaves a trace.
        let record_id = self
            .create_record(org_id, admin_user_id, invoice_id, amount, reason)
            .await?;

        let key = IdempotencyKey::new();
        match self.processor.refund(invoice_id, Some(amount), key).await {
            Ok(outcome) => {
                self.complete_record(record_id, Some(&outcome.refund_id), "completed", None)
                    .await?;

                let new_refunded = invoice.amount_refunded_cents + amount;
                let new_status = if new_refunded >= invoice.amount_paid_cents {
                    InvoiceStatus::Refunded
                } else {
                    InvoiceStatus::PartiallyRefunded
                };
                sqlx::query(
                    "UPDATE invoices SET amount_refunded_cents = $2, status = $3, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(invoice_id)
                .bind(new_refunded)
                .bind(new_status)
                .execute(&self.pool)
                .await?;

                self.audit
                    .record(
                        "admin_issue_refund",
                        Some(org_id),
                        serde_json::json!({
                            "invoice_id": invoice_id,
                            "refund_id": outcome.refund_id,
                            "reason": reason,
                        }),
                        Some(amount),
                        actor,
                    )
                    .await?;

                tracing::info!(
                    org_id = %org_id,
                    invoice_id = %invoice_id,
                    amount_cents = amount,
                    "Refund issued"
                );

                Ok(RefundResult {
                    refund_id: outcome.refund_id,
                    invoice_id: invoice_id.to_string(),
                    amount_cents: amount,
                })
            }
            Err(e) => {
                let msg = e.to_string();
                self.complete_record(record_id, None, "failed", Some(&msg))
                    .await?;

                // Failed attempts are audited too.
                self.audit
                    .record_best_effort(
                        "admin_issue_refund",
                        Some(org_id),
                        serde_json::json!({
                            "invoice_id": invoice_id,
                            "reason": reason,
                            "outcome": format!("failed: {}", msg),
                        }),
                        Some(amount),
                        actor,
                    )
                    .await;

                tracing::error!(
                    org_id = %org_id,
                    invoice_id = %invoice_id,
                    error = %msg,
                    "Refund failed"
                );

                Err(e)
            }
        }
    }

    /// Refund history for an organization
    pub async fn refund_history(&self, org_id: OrgId) -> BillingResult<Vec<RefundRecord>> {
        let records: Vec<RefundRecord> = sqlx::query_as(
            r#"
            SELECT id, org_id, admin_user_id, invoice_id, processor_refund_id,
                   amount_cents, reason, status, error_message,
                   created_at, completed_at
            FROM refund_records
            WHERE org_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn create_record(
        &self,
        org_id: OrgId,
        admin_user_id: UserId,
        invoice_id: &str,
        amount_cents: i64,
        reason: &str,
    ) -> BillingResult<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO refund_records (org_id, admin_user_id, invoice_id, amount_cents, reason, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING id
            "#,
        )
        .bind(org_id)
        .bind(admin_user_id)
        .bind(invoice_id)
        .bind(amount_cents)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(id.0)
    }

    async fn complete_record(
        &self,
        record_id: Uuid,
        refund_id: Option<&str>,
        status: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE refund_records
            SET processor_refund_id = $2, status = $3, error_message = $4, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .bind(refund_id)
        .bind(status)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
