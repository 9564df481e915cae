//! Audit log recorder
//!
//! Append-only ledger of every money-affecting action. Entries are never
//! updated or deleted; there is deliberately no mutation surface beyond
//! `record`.

use receiptly_shared::{OrgId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// One append-only audit entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub org_id: Option<OrgId>,
    pub details: serde_json::Value,
    pub amount_cents: Option<i64>,
    pub performed_by: Option<UserId>,
    pub is_super_admin: bool,
    pub is_system: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Who performed an audited action
#[derive(Debug, Clone, Default)]
pub struct AuditActor {
    pub performed_by: Option<UserId>,
    pub is_super_admin: bool,
    pub is_system: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditActor {
    /// System actor for scheduler/webhook-driven mutations
    pub fn system() -> Self {
        Self {
            is_system: true,
            ..Default::default()
        }
    }

    pub fn super_admin(user_id: UserId) -> Self {
        Self {
            performed_by: Some(user_id),
            is_super_admin: true,
            ..Default::default()
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            performed_by: Some(user_id),
            ..Default::default()
        }
    }

    pub fn with_request_context(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }
}

/// Filters for querying the audit log
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilter {
    /// Exact action name
    pub action: Option<String>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    /// Substring match on organization id
    pub org_contains: Option<String>,
    pub limit: Option<i64>,
}

/// Append-only recorder for billing-affecting actions
#[derive(Clone)]
pub struct AuditLogRecorder {
    pool: PgPool,
}

impl AuditLogRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one entry. Callers invoke this before returning success, and
    /// also on failure paths where a side effect may have partially occurred.
    pub async fn record(
        &self,
        action: &str,
        org_id: Option<OrgId>,
        details: serde_json::Value,
        amount_cents: Option<i64>,
        actor: &AuditActor,
    ) -> BillingResult<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO audit_log (
                action, org_id, details, amount_cents,
                performed_by, is_super_admin, is_system,
                ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(action)
        .bind(org_id)
        .bind(&details)
        .bind(amount_cents)
        .bind(actor.performed_by)
        .bind(actor.is_super_admin)
        .bind(actor.is_system)
        .bind(actor.ip_address.as_deref())
        .bind(actor.user_agent.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(id.0)
    }

    /// Best-effort record for failure paths: a failed audit insert must not
    /// mask the caller's primary error, so it is logged and swallowed here.
    pub async fn record_best_effort(
        &self,
        action: &str,
        org_id: Option<OrgId>,
        details: serde_json::Value,
        amount_cents: Option<i64>,
        actor: &AuditActor,
    ) {
        if let Err(e) = self
            .record(action, org_id, details, amount_cents, actor)
            .await
        {
            tracing::error!(
                action = %action,
                org_id = ?org_id,
                error = %e,
                "Failed to write audit log entry"
            );
        }
    }

    /// Read-only projection for reporting. Export formatting is the
    /// caller's responsibility.
    pub async fn query(&self, filter: &AuditLogFilter) -> BillingResult<Vec<AuditLogEntry>> {
        let limit = filter.limit.unwrap_or(500).clamp(1, 5000);

        let entries: Vec<AuditLogEntry> = sqlx::query_as(
            r#"
            SELECT
                id, action, org_id, details, amount_cents,
                performed_by, is_super_admin, is_system,
                ip_address, user_agent, created_at
            FROM audit_log
            WHERE ($1::TEXT IS NULL OR action = $1)
              AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)
              AND ($3::TIMESTAMPTZ IS NULL OR created_at <= $3)
              AND ($4::TEXT IS NULL OR org_id::TEXT ILIKE '%' || $4 || '%')
            ORDER BY created_at DESC
            LIMIT $5
            "#,
        )
        .bind(filter.action.as_deref())
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.org_contains.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
