//! Invoice records
//!
//! Invoices are created by the payment processor's billing cycle; the
//! engine only mirrors them. Status is monotonic except for the refund
//! path (paid -> partially_refunded -> refunded), enforced before any
//! persist.

use receiptly_shared::{InvoiceStatus, OrgId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// Mirrored processor invoice
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    /// Processor-side invoice id
    pub id: String,
    pub org_id: OrgId,
    pub amount_cents: i64,
    pub amount_paid_cents: i64,
    pub amount_refunded_cents: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub line_items: serde_json::Value,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Invoice mirror store
#[derive(Clone)]
pub struct InvoiceStore {
    pool: PgPool,
}

impl InvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, invoice_id: &str) -> BillingResult<Invoice> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            SELECT id, org_id, amount_cents, amount_paid_cents, amount_refunded_cents,
                   currency, status, line_items, period_start, period_end,
                   created_at, updated_at
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        invoice.ok_or_else(|| BillingError::NotFound(format!("invoice '{}'", invoice_id)))
    }

    pub async fn list_for_org(&self, org_id: OrgId) -> BillingResult<Vec<Invoice>> {
        let invoices: Vec<Invoice> = sqlx::query_as(
            r#"
            SELECT id, org_id, amount_cents, amount_paid_cents, amount_refunded_cents,
                   currency, status, line_items, period_start, period_end,
                   created_at, updated_at
            FROM invoices
            WHERE org_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }

    /// Upsert an invoice from a processor event, rejecting status moves
    /// the monotonic contract forbids.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_from_processor(
        &self,
        invoice_id: &str,
        org_id: OrgId,
        amount_cents: i64,
        amount_paid_cents: i64,
        amount_refunded_cents: i64,
        currency: &str,
        status: InvoiceStatus,
        line_items: serde_json::Value,
        period_start: Option<OffsetDateTime>,
        period_end: Option<OffsetDateTime>,
    ) -> BillingResult<Invoice> {
        let existing: Option<(InvoiceStatus,)> =
            sqlx::query_as("SELECT status FROM invoices WHERE id = $1")
                .bind(invoice_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((current,)) = existing {
            if current != status && !current.can_transition_to(status) {
                return Err(BillingError::Conflict(format!(
                    "invoice {} cannot move from {} to {}",
                    invoice_id, current, status
                )));
            }
        }

        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices (
                id, org_id, amount_cents, amount_paid_cents, amount_refunded_cents,
                currency, status, line_items, period_start, period_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                amount_paid_cents = $4,
                amount_refunded_cents = $5,
                status = $7,
                line_items = $8,
                updated_at = NOW()
            RETURNING id, org_id, amount_cents, amount_paid_cents, amount_refunded_cents,
                      currency, status, line_items, period_start, period_end,
                      created_at, updated_at
            "#,
        )
        .bind(invoice_id)
        .bind(org_id)
        .bind(amount_cents)
        .bind(amount_paid_cents)
        .bind(amount_refunded_cents)
        .bind(currency)
        .bind(status)
        .bind(&line_items)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(invoice)
    }
}
