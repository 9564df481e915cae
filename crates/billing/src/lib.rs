// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Invoice upserts carry many processor fields
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Receiptly Billing Module
//!
//! Subscription and entitlement engine for the expense platform.
//!
//! ## Features
//!
//! - **Plan Catalog**: Tiered plans with per-feature limits, cached with a TTL
//! - **Usage Tracking**: Monthly receipt counters and seat counts per org
//! - **Entitlement**: Feature gating with fail-closed free-tier fallback
//! - **Lifecycle**: Subscription state machine driven by processor events
//! - **Coupons & Discounts**: Capped redemptions and admin discounts
//! - **Refunds**: Idempotent refund issuance with full audit trail
//! - **Audit Log**: Append-only record of every billing mutation
//! - **Webhooks**: Signature-verified, exactly-once processor event handling

pub mod audit;
pub mod authz;
pub mod catalog;
pub mod coupons;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod invariants;
pub mod invoices;
pub mod lifecycle;
pub mod processor;
pub mod refunds;
pub mod usage;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Audit
pub use audit::{AuditActor, AuditLogEntry, AuditLogFilter, AuditLogRecorder};

// Authz
pub use authz::{AuthorizationGate, Permission, SuperAdmin};

// Catalog
pub use catalog::{FeatureMatrix, Plan, PlanCatalog, PlanUpdate};

// Coupons
pub use coupons::{Coupon, CouponService, CreateCoupon, Redemption};

// Entitlement
pub use entitlement::{
    EntitlementEvaluator, EntitlementSummary, FeatureDecision, UpgradeRecommendation,
    UpgradeTrigger,
};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ChangeEvent, ChangeNotifier};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Invoices
pub use invoices::{Invoice, InvoiceStore};

// Lifecycle
pub use lifecycle::{
    EventOutcome, LifecycleEvent, LifecycleManager, Subscription,
};

// Processor
pub use processor::{with_retry, CheckoutSession, IdempotencyKey, PaymentProcessor, RefundOutcome};

// Refunds
pub use refunds::{RefundRecord, RefundResult, RefundService};

// Usage
pub use usage::{UsageCounter, UsageCounters, UsageView};

// Webhooks
pub use webhooks::{ProcessorEvent, WebhookHandler};

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pool: PgPool,
    pub notifier: ChangeNotifier,
    pub audit: AuditLogRecorder,
    pub catalog: PlanCatalog,
    pub usage: UsageCounter,
    pub lifecycle: LifecycleManager,
    pub coupons: CouponService,
    pub entitlement: EntitlementEvaluator,
    pub invoices: InvoiceStore,
    pub refunds: RefundService,
    pub webhooks: WebhookHandler,
    pub invariants: InvariantChecker,
    pub processor: Arc<dyn PaymentProcessor>,
}

impl BillingService {
    /// Wire up all billing services over a shared pool and change notifier
    pub fn new(
        pool: PgPool,
        catalog_cache_ttl: Duration,
        webhook_secret: String,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let notifier = ChangeNotifier::new();

        let catalog = PlanCatalog::new(pool.clone(), catalog_cache_ttl);
        let usage = UsageCounter::new(pool.clone(), notifier.clone());
        let lifecycle = LifecycleManager::new(pool.clone(), notifier.clone());
        let entitlement =
            EntitlementEvaluator::new(catalog.clone(), lifecycle.clone(), usage.clone());

        Self {
            audit: AuditLogRecorder::new(pool.clone()),
            catalog,
            usage,
            lifecycle,
            coupons: CouponService::new(pool.clone(), notifier.clone()),
            entitlement,
            invoices: InvoiceStore::new(pool.clone()),
            refunds: RefundService::new(pool.clone(), processor.clone()),
            webhooks: WebhookHandler::new(pool.clone(), webhook_secret, notifier.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            processor,
            notifier,
            pool,
        }
    }

    /// Gate for a specific admin user, backed by the shared pool
    pub fn gate_for(&self, user_id: receiptly_shared::UserId) -> AuthorizationGate {
        AuthorizationGate::new(self.pool.clone(), user_id)
    }
}
