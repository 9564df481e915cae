//! Shared types for Receiptly
//!
//! ID newtypes, billing enums, and runtime configuration used by the
//! billing engine, API, and worker crates.

pub mod config;
pub mod db;
pub mod types;

pub use config::Config;
pub use db::{create_pool, run_migrations};
pub use types::{
    BillingCycle, CouponDuration, CouponId, DiscountType, FeatureFlag, InvoiceStatus, OrgId,
    PlanTier, SubscriptionStatus, UserId,
};
