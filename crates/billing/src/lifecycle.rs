//! Subscription lifecycle manager
//!
//! The state machine governing subscription status. Status updates arrive
//! from two racing sources, processor webhooks and admin actions, so every
//! external event carries an id (deduped atomically) and a timestamp
//! (events older than the stored `last_event_at` are rejected). Exactly one
//! audit entry is written per logical transition, never per delivery
//! attempt.

use receiptly_shared::{BillingCycle, OrgId, PlanTier, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{AuditActor, AuditLogRecorder};
use crate::error::{BillingError, BillingResult};
use crate::events::ChangeNotifier;

/// One subscription row per organization. Absence = implicit free tier.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub org_id: OrgId,
    pub tier: PlanTier,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub discount_percent: Option<i32>,
    pub discount_expires_at: Option<OffsetDateTime>,
    pub discount_reason: Option<String>,
    pub billing_email: Option<String>,
    /// Ordering token: timestamp of the newest applied external event
    pub last_event_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// External lifecycle event from the payment processor
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Checkout succeeded; opens a trial if `trial_end` is set
    CheckoutCompleted {
        tier: PlanTier,
        cycle: BillingCycle,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        trial_end: Option<OffsetDateTime>,
        billing_email: Option<String>,
    },
    /// Trial ended with a successful first payment
    TrialConverted,
    /// Trial ended with no payment method
    TrialAbandoned,
    /// Recurring payment failed
    PaymentFailed,
    /// Payment recovered after failure
    PaymentRecovered {
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    },
    /// Processor gave up retrying
    RetriesExhausted,
    /// Processor-side cancellation took effect
    SubscriptionEnded,
}

impl LifecycleEvent {
    /// Audit action name for the logical transition this event causes
    pub fn audit_action(&self) -> &'static str {
        match self {
            LifecycleEvent::CheckoutCompleted { .. } => "subscription_created",
            LifecycleEvent::TrialConverted => "trial_converted",
            LifecycleEvent::TrialAbandoned => "trial_abandoned",
            LifecycleEvent::PaymentFailed => "payment_failed",
            LifecycleEvent::PaymentRecovered { .. } => "payment_received",
            LifecycleEvent::RetriesExhausted => "subscription_canceled",
            LifecycleEvent::SubscriptionEnded => "subscription_canceled",
        }
    }
}

/// Outcome of feeding one external event through the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Event applied and a transition happened
    Applied,
    /// Same event id seen before; nothing done
    Duplicate,
}

/// Subscription lifecycle service
#[derive(Clone)]
pub struct LifecycleManager {
    pool: PgPool,
    audit: AuditLogRecorder,
    notifier: ChangeNotifier,
}

impl LifecycleManager {
    pub fn new(pool: PgPool, notifier: ChangeNotifier) -> Self {
        let audit = AuditLogRecorder::new(pool.clone());
        Self {
            pool,
            audit,
            notifier,
        }
    }

    /// Current subscription for an org, if any
    pub async fn get_subscription(&self, org_id: OrgId) -> BillingResult<Option<Subscription>> {
        Self::fetch_subscription(&self.pool, org_id).await
    }

    async fn fetch_subscription<'e, E>(
        executor: E,
        org_id: OrgId,
    ) -> BillingResult<Option<Subscription>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sub: Option<Subscription> = sqlx::query_as(
            r#"
            SELECT
                org_id, tier, status, billing_cycle,
                current_period_start, current_period_end,
                trial_start, trial_end, cancel_at_period_end,
                discount_percent, discount_expires_at, discount_reason,
                billing_email, last_event_at, created_at, updated_at
            FROM subscriptions
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(executor)
        .await?;

        Ok(sub)
    }

    /// All subscriptions, newest first (admin listing)
    pub async fn list_subscriptions(&self) -> BillingResult<Vec<Subscription>> {
        let subs: Vec<Subscription> = sqlx::query_as(
            r#"
            SELECT
                org_id, tier, status, billing_cycle,
                current_period_start, current_period_end,
                trial_start, trial_end, cancel_at_period_end,
                discount_percent, discount_expires_at, discount_reason,
                billing_email, last_event_at, created_at, updated_at
            FROM subscriptions
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    // =========================================================================
    // External event path (webhooks)
    // =========================================================================

    /// Apply one external event.
    ///
    /// Dedupe and ordering happen before any mutation:
    /// 1. Atomically claim the event id; an already-claimed id is a no-op.
    /// 2. Reject events older than the subscription's `last_event_at`.
    /// 3. Validate and apply the transition, stamp the ordering token,
    ///    write exactly one audit entry.
    ///
    /// The claim and the transition share one transaction. A rejected or
    /// failed event rolls the claim back with it, so a redelivery of that
    /// event id gets a fresh attempt instead of a false duplicate.
    pub async fn apply_event(
        &self,
        org_id: OrgId,
        event_id: &str,
        event_timestamp: OffsetDateTime,
        event: LifecycleEvent,
    ) -> BillingResult<EventOutcome> {
        let mut tx = self.pool.begin().await?;

        // Claim the event id. INSERT..ON CONFLICT DO NOTHING RETURNING means
        // exactly one delivery attempt wins, no read-then-write window.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO lifecycle_events (event_id, org_id, event_timestamp)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(org_id)
        .bind(event_timestamp)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tracing::info!(
                org_id = %org_id,
                event_id = %event_id,
                "Duplicate lifecycle event, skipping"
            );
            return Ok(EventOutcome::Duplicate);
        }

        let current = Self::fetch_subscription(&mut *tx, org_id).await?;

        // Reject out-of-order delivery against the stored ordering token.
        if let Some(sub) = &current {
            if let Some(last) = sub.last_event_at {
                if event_timestamp < last {
                    return Err(BillingError::Conflict(format!(
                        "event {} is older than last applied update ({} < {})",
                        event_id, event_timestamp, last
                    )));
                }
            }
        }

        let new_status = match (&event, current) {
            (
                LifecycleEvent::CheckoutCompleted {
                    tier,
                    cycle,
                    period_start,
                    period_end,
                    trial_end,
                    billing_email,
                },
                existing,
            ) => {
                let status = if trial_end.is_some() {
                    SubscriptionStatus::Trialing
                } else {
                    SubscriptionStatus::Active
                };

                if let Some(sub) = &existing {
                    if !sub.status.is_terminal() {
                        return Err(BillingError::Conflict(format!(
                            "organization {} already has a {} subscription",
                            org_id, sub.status
                        )));
                    }
                }

                sqlx::query(
                    r#"
                    INSERT INTO subscriptions (
                        org_id, tier, status, billing_cycle,
                        current_period_start, current_period_end,
                        trial_start, trial_end, billing_email, last_event_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6,
                            CASE WHEN $7::TIMESTAMPTZ IS NULL THEN NULL ELSE $5 END,
                            $7, $8, $9)
                    ON CONFLICT (org_id) DO UPDATE SET
                        tier = $2, status = $3, billing_cycle = $4,
                        current_period_start = $5, current_period_end = $6,
                        trial_start = CASE WHEN $7::TIMESTAMPTZ IS NULL THEN NULL ELSE $5 END,
                        trial_end = $7,
                        cancel_at_period_end = FALSE,
                        billing_email = COALESCE($8, subscriptions.billing_email),
                        last_event_at = $9,
                        updated_at = NOW()
                    "#,
                )
                .bind(org_id)
                .bind(tier)
                .bind(status)
                .bind(cycle)
                .bind(period_start)
                .bind(period_end)
                .bind(*trial_end)
                .bind(billing_email.as_deref())
                .bind(event_timestamp)
                .execute(&mut *tx)
                .await?;

                status
            }

            (LifecycleEvent::TrialConverted, Some(sub)) => {
                Self::transition_in(&mut tx, &sub, SubscriptionStatus::Active, event_timestamp)
                    .await?;
                SubscriptionStatus::Active
            }

            (LifecycleEvent::TrialAbandoned, Some(sub)) => {
                Self::transition_in(&mut tx, &sub, SubscriptionStatus::Canceled, event_timestamp)
                    .await?;
                SubscriptionStatus::Canceled
            }

            (LifecycleEvent::PaymentFailed, Some(sub)) => {
                Self::transition_in(&mut tx, &sub, SubscriptionStatus::PastDue, event_timestamp)
                    .await?;
                SubscriptionStatus::PastDue
            }

            (
                LifecycleEvent::PaymentRecovered {
                    period_start,
                    period_end,
                },
                Some(sub),
            ) => {
                Self::transition_in(&mut tx, &sub, SubscriptionStatus::Active, event_timestamp)
                    .await?;

                // A recovered payment also opens the period it paid for.
                sqlx::query(
                    r#"
                    UPDATE subscriptions SET
                        current_period_start = $2,
                        current_period_end = $3,
                        updated_at = NOW()
                    WHERE org_id = $1
                    "#,
                )
                .bind(org_id)
                .bind(period_start)
                .bind(period_end)
                .execute(&mut *tx)
                .await?;

                SubscriptionStatus::Active
            }

            (LifecycleEvent::RetriesExhausted, Some(sub))
            | (LifecycleEvent::SubscriptionEnded, Some(sub)) => {
                Self::transition_in(&mut tx, &sub, SubscriptionStatus::Canceled, event_timestamp)
                    .await?;
                SubscriptionStatus::Canceled
            }

            (_, None) => {
                return Err(BillingError::NotFound(format!(
                    "no subscription for organization {}",
                    org_id
                )));
            }
        };

        tx.commit().await?;

        self.finish_transition(org_id, event.audit_action(), new_status, event_id)
            .await?;

        Ok(EventOutcome::Applied)
    }

    // =========================================================================
    // Caller-initiated actions
    // =========================================================================

    /// Cancel a subscription. Deferred cancellation keeps status `active`
    /// with `cancel_at_period_end` set; the period-boundary sweep realizes
    /// it. Immediate cancellation transitions right away.
    pub async fn cancel_subscription(
        &self,
        org_id: OrgId,
        immediate: bool,
        actor: &AuditActor,
    ) -> BillingResult<Subscription> {
        let sub = self.require_subscription(org_id).await?;

        if sub.status.is_terminal() {
            return Err(BillingError::State(
                "subscription is already canceled".to_string(),
            ));
        }

        if immediate {
            self.guarded_status_update(&sub, SubscriptionStatus::Canceled)
                .await?;
        } else {
            if sub.cancel_at_period_end {
                return Err(BillingError::State(
                    "subscription is already scheduled for cancellation".to_string(),
                ));
            }
            sqlx::query(
                "UPDATE subscriptions SET cancel_at_period_end = TRUE, updated_at = NOW()
                 WHERE org_id = $1 AND status = $2",
            )
            .bind(org_id)
            .bind(sub.status)
            .execute(&self.pool)
            .await?;
        }

        self.audit
            .record(
                "subscription_canceled",
                Some(org_id),
                serde_json::json!({
                    "immediate": immediate,
                    "tier": sub.tier.as_str(),
                    "period_end": sub.current_period_end,
                }),
                None,
                actor,
            )
            .await?;
        self.notifier.subscription_changed(org_id);

        self.require_subscription(org_id).await
    }

    /// Undo a pending cancellation. Legal while the period has not ended:
    /// while still `active` it just clears the flag; if the status already
    /// flipped to `canceled` but `cancel_at_period_end` is still set and the
    /// period end is in the future, it restores `active`. Anything later is
    /// a state error.
    pub async fn resume_subscription(
        &self,
        org_id: OrgId,
        actor: &AuditActor,
    ) -> BillingResult<Subscription> {
        let sub = self.require_subscription(org_id).await?;
        let now = OffsetDateTime::now_utc();

        if !sub.cancel_at_period_end {
            return Err(BillingError::State(
                "subscription is not pending cancellation".to_string(),
            ));
        }
        if now >= sub.current_period_end {
            return Err(BillingError::State(
                "billing period has already ended; start a new checkout instead".to_string(),
            ));
        }

        match sub.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => {
                sqlx::query(
                    "UPDATE subscriptions SET cancel_at_period_end = FALSE, updated_at = NOW()
                     WHERE org_id = $1",
                )
                .bind(org_id)
                .execute(&self.pool)
                .await?;
            }
            SubscriptionStatus::Canceled => {
                sqlx::query(
                    r#"
                    UPDATE subscriptions SET
                        status = $2,
                        cancel_at_period_end = FALSE,
                        updated_at = NOW()
                    WHERE org_id = $1 AND status = $3
                    "#,
                )
                .bind(org_id)
                .bind(SubscriptionStatus::Active)
                .bind(SubscriptionStatus::Canceled)
                .execute(&self.pool)
                .await?;
            }
            other => {
                return Err(BillingError::State(format!(
                    "cannot resume a {} subscription",
                    other
                )));
            }
        }

        self.audit
            .record(
                "subscription_resumed",
                Some(org_id),
                serde_json::json!({ "tier": sub.tier.as_str() }),
                None,
                actor,
            )
            .await?;
        self.notifier.subscription_changed(org_id);

        self.require_subscription(org_id).await
    }

    /// Admin-only pause
    pub async fn pause_subscription(
        &self,
        org_id: OrgId,
        actor: &AuditActor,
    ) -> BillingResult<Subscription> {
        let sub = self.require_subscription(org_id).await?;
        self.guarded_status_update(&sub, SubscriptionStatus::Paused)
            .await?;

        self.audit
            .record(
                "admin_pause_subscription",
                Some(org_id),
                serde_json::json!({ "previous_status": sub.status.as_str() }),
                None,
                actor,
            )
            .await?;
        self.notifier.subscription_changed(org_id);

        self.require_subscription(org_id).await
    }

    /// Admin-only resume from pause
    pub async fn unpause_subscription(
        &self,
        org_id: OrgId,
        actor: &AuditActor,
    ) -> BillingResult<Subscription> {
        let sub = self.require_subscription(org_id).await?;
        if sub.status != SubscriptionStatus::Paused {
            return Err(BillingError::State(format!(
                "subscription is {}, not paused",
                sub.status
            )));
        }
        self.guarded_status_update(&sub, SubscriptionStatus::Active)
            .await?;

        self.audit
            .record(
                "admin_resume_subscription",
                Some(org_id),
                serde_json::json!({}),
                None,
                actor,
            )
            .await?;
        self.notifier.subscription_changed(org_id);

        self.require_subscription(org_id).await
    }

    /// Extend an active trial by `days`
    pub async fn extend_trial(
        &self,
        org_id: OrgId,
        days: i64,
        actor: &AuditActor,
    ) -> BillingResult<Subscription> {
        if !(1..=730).contains(&days) {
            return Err(BillingError::Validation(format!(
                "trial extension must be between 1 and 730 days, got {}",
                days
            )));
        }

        let sub = self.require_subscription(org_id).await?;
        if sub.status != SubscriptionStatus::Trialing {
            return Err(BillingError::State(format!(
                "subscription is {}, not trialing",
                sub.status
            )));
        }
        let Some(trial_end) = sub.trial_end else {
            return Err(BillingError::State(
                "trialing subscription has no trial end date".to_string(),
            ));
        };

        let new_end = trial_end + time::Duration::days(days);
        sqlx::query(
            "UPDATE subscriptions SET trial_end = $2, current_period_end = $2, updated_at = NOW()
             WHERE org_id = $1",
        )
        .bind(org_id)
        .bind(new_end)
        .execute(&self.pool)
        .await?;

        self.audit
            .record(
                "admin_extend_trial",
                Some(org_id),
                serde_json::json!({ "days": days, "new_trial_end": new_end }),
                None,
                actor,
            )
            .await?;
        self.notifier.subscription_changed(org_id);

        self.require_subscription(org_id).await
    }

    /// Change an org's plan. Proration is the processor's job; the engine
    /// records the tier change and later persists the resulting invoice
    /// when the webhook arrives.
    pub async fn change_plan(
        &self,
        org_id: OrgId,
        new_tier: PlanTier,
        cycle: Option<BillingCycle>,
        actor: &AuditActor,
    ) -> BillingResult<Subscription> {
        let sub = self.require_subscription(org_id).await?;

        if !sub.status.is_entitled() {
            return Err(BillingError::State(format!(
                "cannot change plan while subscription is {}",
                sub.status
            )));
        }
        if sub.tier == new_tier && cycle.map(|c| c == sub.billing_cycle).unwrap_or(true) {
            return Err(BillingError::Validation(
                "subscription is already on that plan".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE subscriptions SET tier = $2, billing_cycle = COALESCE($3, billing_cycle),
                 updated_at = NOW()
             WHERE org_id = $1",
        )
        .bind(org_id)
        .bind(new_tier)
        .bind(cycle)
        .execute(&self.pool)
        .await?;

        self.audit
            .record(
                "plan_changed",
                Some(org_id),
                serde_json::json!({
                    "from_tier": sub.tier.as_str(),
                    "to_tier": new_tier.as_str(),
                    "cycle": cycle.map(|c| c.as_str()),
                }),
                None,
                actor,
            )
            .await?;
        self.notifier.subscription_changed(org_id);

        self.require_subscription(org_id).await
    }

    /// Admin-only hard delete of an organization's billing data. The
    /// subscription, usage counters, and redemptions go; the audit trail
    /// stays, including the entry this writes.
    pub async fn delete_organization(
        &self,
        org_id: OrgId,
        actor: &AuditActor,
    ) -> BillingResult<()> {
        let sub = self.get_subscription(org_id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM redemptions WHERE org_id = $1")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM org_usage WHERE org_id = $1")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM subscriptions WHERE org_id = $1")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.audit
            .record(
                "admin_delete_organization",
                Some(org_id),
                serde_json::json!({
                    "had_subscription": sub.is_some(),
                    "tier": sub.as_ref().map(|s| s.tier.as_str()),
                }),
                None,
                actor,
            )
            .await?;
        self.notifier.subscription_changed(org_id);

        Ok(())
    }

    // =========================================================================
    // Worker-driven sweeps
    // =========================================================================

    /// Realize deferred cancellations whose period has ended and expire
    /// abandoned trials. Returns the orgs transitioned.
    pub async fn realize_period_boundaries(&self) -> BillingResult<Vec<OrgId>> {
        let mut transitioned = Vec::new();

        let deferred: Vec<(OrgId,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET
                status = $1,
                updated_at = NOW()
            WHERE cancel_at_period_end = TRUE
              AND status IN ($2, $3)
              AND current_period_end <= NOW()
            RETURNING org_id
            "#,
        )
        .bind(SubscriptionStatus::Canceled)
        .bind(SubscriptionStatus::Active)
        .bind(SubscriptionStatus::Trialing)
        .fetch_all(&self.pool)
        .await?;

        for (org_id,) in deferred {
            self.audit
                .record(
                    "subscription_canceled",
                    Some(org_id),
                    serde_json::json!({ "reason": "cancel_at_period_end realized" }),
                    None,
                    &AuditActor::system(),
                )
                .await?;
            self.notifier.subscription_changed(org_id);
            transitioned.push(org_id);
        }

        // Trials the processor never closed out. A trial past its end date
        // with no conversion event is abandoned and loses entitlement here.
        let expired_trials: Vec<(OrgId,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET
                status = $1,
                updated_at = NOW()
            WHERE status = $2
              AND trial_end IS NOT NULL
              AND trial_end <= NOW()
            RETURNING org_id
            "#,
        )
        .bind(SubscriptionStatus::Canceled)
        .bind(SubscriptionStatus::Trialing)
        .fetch_all(&self.pool)
        .await?;

        for (org_id,) in expired_trials {
            self.audit
                .record(
                    "trial_abandoned",
                    Some(org_id),
                    serde_json::json!({ "reason": "trial ended without conversion" }),
                    None,
                    &AuditActor::system(),
                )
                .await?;
            self.notifier.subscription_changed(org_id);
            transitioned.push(org_id);
        }

        Ok(transitioned)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn require_subscription(&self, org_id: OrgId) -> BillingResult<Subscription> {
        self.get_subscription(org_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("no subscription for {}", org_id)))
    }

    /// Validate + apply one transition inside the caller's transaction and
    /// stamp the ordering token.
    async fn transition_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        sub: &Subscription,
        to: SubscriptionStatus,
        event_timestamp: OffsetDateTime,
    ) -> BillingResult<()> {
        if !sub.status.can_transition_to(to) {
            return Err(BillingError::IllegalTransition {
                from: sub.status,
                to,
            });
        }

        // Optimistic guard on the previous status: a racing update makes
        // rows_affected 0 and this delivery loses cleanly.
        let updated = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                last_event_at = $3,
                updated_at = NOW()
            WHERE org_id = $1 AND status = $4
            "#,
        )
        .bind(sub.org_id)
        .bind(to)
        .bind(event_timestamp)
        .bind(sub.status)
        .execute(&mut **tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::Conflict(format!(
                "subscription for {} changed concurrently",
                sub.org_id
            )));
        }

        Ok(())
    }

    async fn finish_transition(
        &self,
        org_id: OrgId,
        action: &'static str,
        new_status: SubscriptionStatus,
        event_id: &str,
    ) -> BillingResult<()> {
        self.audit
            .record(
                action,
                Some(org_id),
                serde_json::json!({
                    "new_status": new_status.as_str(),
                    "event_id": event_id,
                }),
                None,
                &AuditActor::system(),
            )
            .await?;

        tracing::info!(
            org_id = %org_id,
            new_status = %new_status,
            event_id = %event_id,
            "Subscription transition applied"
        );

        self.notifier.subscription_changed(org_id);
        Ok(())
    }

    /// Status update guarded by the transition table and the previous status
    async fn guarded_status_update(
        &self,
        sub: &Subscription,
        to: SubscriptionStatus,
    ) -> BillingResult<()> {
        if !sub.status.can_transition_to(to) {
            return Err(BillingError::IllegalTransition {
                from: sub.status,
                to,
            });
        }

        let updated = sqlx::query(
            "UPDATE subscriptions SET status = $2, updated_at = NOW()
             WHERE org_id = $1 AND status = $3",
        )
        .bind(sub.org_id)
        .bind(to)
        .bind(sub.status)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::Conflict(format!(
                "subscription for {} changed concurrently",
                sub.org_id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(pool: &PgPool) -> LifecycleManager {
        LifecycleManager::new(pool.clone(), ChangeNotifier::new())
    }

    async fn seed_subscription(
        pool: &PgPool,
        org_id: OrgId,
        status: SubscriptionStatus,
        period_end: OffsetDateTime,
        cancel_at_period_end: bool,
    ) {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                org_id, tier, status, billing_cycle,
                current_period_start, current_period_end, cancel_at_period_end
            )
            VALUES ($1, $2, $3, $4, NOW() - INTERVAL '10 days', $5, $6)
            "#,
        )
        .bind(org_id)
        .bind(PlanTier::Starter)
        .bind(status)
        .bind(BillingCycle::Monthly)
        .bind(period_end)
        .bind(cancel_at_period_end)
        .execute(pool)
        .await
        .unwrap();
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_failed_event_claim_is_released(pool: PgPool) {
        let manager = manager(&pool);
        let org = OrgId::new();
        let period_end = OffsetDateTime::now_utc() + time::Duration::days(20);
        seed_subscription(&pool, org, SubscriptionStatus::Paused, period_end, false).await;

        // Paused cannot go past-due, so this delivery fails.
        let ts = OffsetDateTime::now_utc();
        let err = manager
            .apply_event(org, "evt_pf_1", ts, LifecycleEvent::PaymentFailed)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::IllegalTransition { .. }));

        sqlx::query("UPDATE subscriptions SET status = $2 WHERE org_id = $1")
            .bind(org)
            .bind(SubscriptionStatus::Active)
            .execute(&pool)
            .await
            .unwrap();

        // A redelivery of the same event id must get a fresh attempt, not
        // a false duplicate.
        let outcome = manager
            .apply_event(org, "evt_pf_1", ts, LifecycleEvent::PaymentFailed)
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Applied);

        let sub = manager.get_subscription(org).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_event_is_noop(pool: PgPool) {
        let manager = manager(&pool);
        let org = OrgId::new();
        let period_end = OffsetDateTime::now_utc() + time::Duration::days(20);
        seed_subscription(&pool, org, SubscriptionStatus::Active, period_end, false).await;

        let ts = OffsetDateTime::now_utc();
        let first = manager
            .apply_event(org, "evt_dup_1", ts, LifecycleEvent::PaymentFailed)
            .await
            .unwrap();
        assert_eq!(first, EventOutcome::Applied);

        let second = manager
            .apply_event(org, "evt_dup_1", ts, LifecycleEvent::PaymentFailed)
            .await
            .unwrap();
        assert_eq!(second, EventOutcome::Duplicate);

        let sub = manager.get_subscription(org).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_sweep_expires_past_trials(pool: PgPool) {
        let manager = manager(&pool);
        let expired = OrgId::new();
        let live = OrgId::new();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                org_id, tier, status, billing_cycle,
                current_period_start, current_period_end, trial_start, trial_end
            )
            VALUES
                ($1, $3, $4, $5, NOW() - INTERVAL '24 days',
                 NOW() - INTERVAL '10 days', NOW() - INTERVAL '24 days',
                 NOW() - INTERVAL '10 days'),
                ($2, $3, $4, $5, NOW() - INTERVAL '4 days',
                 NOW() + INTERVAL '10 days', NOW() - INTERVAL '4 days',
                 NOW() + INTERVAL '10 days')
            "#,
        )
        .bind(expired)
        .bind(live)
        .bind(PlanTier::Starter)
        .bind(SubscriptionStatus::Trialing)
        .bind(BillingCycle::Monthly)
        .execute(&pool)
        .await
        .unwrap();

        let swept = manager.realize_period_boundaries().await.unwrap();
        assert!(swept.contains(&expired));
        assert!(!swept.contains(&live));

        let sub = manager.get_subscription(expired).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        let sub = manager.get_subscription(live).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_resume_clears_pending_cancellation_within_period(pool: PgPool) {
        let manager = manager(&pool);
        let org = OrgId::new();
        let period_end = OffsetDateTime::now_utc() + time::Duration::days(12);
        seed_subscription(&pool, org, SubscriptionStatus::Active, period_end, true).await;

        let sub = manager
            .resume_subscription(org, &AuditActor::system())
            .await
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(!sub.cancel_at_period_end);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_resume_rejected_after_period_end(pool: PgPool) {
        let manager = manager(&pool);
        let org = OrgId::new();
        let period_end = OffsetDateTime::now_utc() - time::Duration::days(1);
        seed_subscription(&pool, org, SubscriptionStatus::Active, period_end, true).await;

        let err = manager
            .resume_subscription(org, &AuditActor::system())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::State(_)));

        let sub = manager.get_subscription(org).await.unwrap().unwrap();
        assert!(sub.cancel_at_period_end);
    }

    #[test]
    fn test_event_audit_actions() {
        assert_eq!(
            LifecycleEvent::PaymentRecovered {
                period_start: OffsetDateTime::UNIX_EPOCH,
                period_end: OffsetDateTime::UNIX_EPOCH,
            }
            .audit_action(),
            "payment_received"
        );
        assert_eq!(
            LifecycleEvent::RetriesExhausted.audit_action(),
            "subscription_canceled"
        );
        assert_eq!(LifecycleEvent::TrialConverted.audit_action(), "trial_converted");
    }
}
