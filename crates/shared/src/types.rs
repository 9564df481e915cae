//! Common types used across Receiptly

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Organization ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct OrgId(pub Uuid);

impl OrgId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for OrgId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coupon ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct CouponId(pub Uuid);

impl CouponId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CouponId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CouponId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CouponId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Plan tier, ordered from lowest to highest.
///
/// The derived `Ord` follows declaration order, which drives upgrade
/// recommendations and downgrade detection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Team,
    Business,
    Enterprise,
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl PlanTier {
    /// All tiers in ascending order
    pub const ORDERED: [PlanTier; 5] = [
        PlanTier::Free,
        PlanTier::Starter,
        PlanTier::Team,
        PlanTier::Business,
        PlanTier::Enterprise,
    ];

    /// The highest tier
    pub const TOP: PlanTier = PlanTier::Enterprise;

    /// The next tier up, clamped at the top tier
    pub fn next(&self) -> PlanTier {
        match self {
            PlanTier::Free => PlanTier::Starter,
            PlanTier::Starter => PlanTier::Team,
            PlanTier::Team => PlanTier::Business,
            PlanTier::Business => PlanTier::Enterprise,
            PlanTier::Enterprise => PlanTier::Enterprise,
        }
    }

    pub fn is_top(&self) -> bool {
        *self == Self::TOP
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Team => "team",
            PlanTier::Business => "business",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<PlanTier> {
        match s {
            "free" => Some(PlanTier::Free),
            "starter" => Some(PlanTier::Starter),
            "team" => Some(PlanTier::Team),
            "business" => Some(PlanTier::Business),
            "enterprise" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription lifecycle status
///
/// Absence of a subscription row means the implicit free tier; that case is
/// represented by `Option<Subscription>`, not by a status variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    /// The legal transition table.
    ///
    /// `Canceled` is terminal except for the deferred-cancel resume path
    /// (cancel_at_period_end still set and the period not yet over), which
    /// the lifecycle manager checks separately before calling this with
    /// `Canceled -> Active`.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match (*self, next) {
            // Trial end with successful payment / trial abandonment
            (Trialing, Active) | (Trialing, Canceled) => true,
            // Payment failure and recovery
            (Active, PastDue) | (PastDue, Active) => true,
            // Exhausted retries
            (PastDue, Canceled) | (PastDue, Unpaid) => true,
            (Unpaid, Canceled) | (Unpaid, Active) => true,
            // Admin pause/resume
            (Active, Paused) | (Paused, Active) => true,
            // Cancel from any non-terminal state
            (Active, Canceled) | (Paused, Canceled) => true,
            // Deferred-cancel resume; guarded by the lifecycle manager
            (Canceled, Active) => true,
            _ => false,
        }
    }

    /// Statuses that grant paid entitlements
    pub fn is_entitled(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing cycle for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Annual,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Annual => "annual",
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice status as reported by the payment processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Pending,
    Paid,
    Failed,
    Void,
    Uncollectible,
    PartiallyRefunded,
    Refunded,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Open => "open",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Void => "void",
            InvoiceStatus::Uncollectible => "uncollectible",
            InvoiceStatus::PartiallyRefunded => "partially_refunded",
            InvoiceStatus::Refunded => "refunded",
        }
    }

    /// Invoice status is monotonic except for the refund path
    /// (paid -> partially_refunded -> refunded).
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        if *self == next {
            return false;
        }
        match (*self, next) {
            (Draft, Open) | (Draft, Void) => true,
            (Open, Paid) | (Open, Failed) | (Open, Void) | (Open, Uncollectible) => true,
            (Pending, Paid) | (Pending, Failed) => true,
            (Failed, Paid) | (Failed, Uncollectible) => true,
            (Paid, PartiallyRefunded) | (Paid, Refunded) => true,
            (PartiallyRefunded, Refunded) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Discount type for a coupon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percent,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percent => "percent",
            DiscountType::Fixed => "fixed",
        }
    }
}

/// How long a coupon's discount applies once redeemed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CouponDuration {
    Once,
    Repeating,
    Forever,
}

impl CouponDuration {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponDuration::Once => "once",
            CouponDuration::Repeating => "repeating",
            CouponDuration::Forever => "forever",
        }
    }
}

/// Named capability whose availability depends on plan and usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    ReceiptOcr,
    AutoGlCoding,
    MultiCurrency,
    ApprovalWorkflows,
    ApiAccess,
    PayoutExport,
    CustomCategories,
    PrioritySupport,
    UnlimitedReceipts,
}

impl FeatureFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureFlag::ReceiptOcr => "receipt_ocr",
            FeatureFlag::AutoGlCoding => "auto_gl_coding",
            FeatureFlag::MultiCurrency => "multi_currency",
            FeatureFlag::ApprovalWorkflows => "approval_workflows",
            FeatureFlag::ApiAccess => "api_access",
            FeatureFlag::PayoutExport => "payout_export",
            FeatureFlag::CustomCategories => "custom_categories",
            FeatureFlag::PrioritySupport => "priority_support",
            FeatureFlag::UnlimitedReceipts => "unlimited_receipts",
        }
    }

    pub fn parse(s: &str) -> Option<FeatureFlag> {
        match s {
            "receipt_ocr" => Some(FeatureFlag::ReceiptOcr),
            "auto_gl_coding" => Some(FeatureFlag::AutoGlCoding),
            "multi_currency" => Some(FeatureFlag::MultiCurrency),
            "approval_workflows" => Some(FeatureFlag::ApprovalWorkflows),
            "api_access" => Some(FeatureFlag::ApiAccess),
            "payout_export" => Some(FeatureFlag::PayoutExport),
            "custom_categories" => Some(FeatureFlag::CustomCategories),
            "priority_support" => Some(FeatureFlag::PrioritySupport),
            "unlimited_receipts" => Some(FeatureFlag::UnlimitedReceipts),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(PlanTier::Free < PlanTier::Starter);
        assert!(PlanTier::Starter < PlanTier::Team);
        assert!(PlanTier::Team < PlanTier::Business);
        assert!(PlanTier::Business < PlanTier::Enterprise);
    }

    #[test]
    fn test_next_tier_advances_one_step_and_clamps() {
        assert_eq!(PlanTier::Free.next(), PlanTier::Starter);
        assert_eq!(PlanTier::Starter.next(), PlanTier::Team);
        assert_eq!(PlanTier::Team.next(), PlanTier::Business);
        assert_eq!(PlanTier::Business.next(), PlanTier::Enterprise);
        assert_eq!(PlanTier::Enterprise.next(), PlanTier::Enterprise);
    }

    #[test]
    fn test_tier_parse_round_trip() {
        for tier in PlanTier::ORDERED {
            assert_eq!(PlanTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(PlanTier::parse("platinum"), None);
    }

    #[test]
    fn test_status_transition_table() {
        use SubscriptionStatus::*;
        assert!(Trialing.can_transition_to(Active));
        assert!(Trialing.can_transition_to(Canceled));
        assert!(Active.can_transition_to(PastDue));
        assert!(PastDue.can_transition_to(Active));
        assert!(PastDue.can_transition_to(Canceled));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));

        // Never sideways into trialing
        assert!(!Active.can_transition_to(Trialing));
        assert!(!Canceled.can_transition_to(Trialing));
        assert!(!Paused.can_transition_to(PastDue));
    }

    #[test]
    fn test_entitled_statuses() {
        assert!(SubscriptionStatus::Active.is_entitled());
        assert!(SubscriptionStatus::Trialing.is_entitled());
        assert!(SubscriptionStatus::PastDue.is_entitled());
        assert!(!SubscriptionStatus::Canceled.is_entitled());
        assert!(!SubscriptionStatus::Unpaid.is_entitled());
        assert!(!SubscriptionStatus::Paused.is_entitled());
    }

    #[test]
    fn test_invoice_refund_path() {
        assert!(InvoiceStatus::Paid.can_transition_to(InvoiceStatus::PartiallyRefunded));
        assert!(InvoiceStatus::PartiallyRefunded.can_transition_to(InvoiceStatus::Refunded));
        assert!(InvoiceStatus::Paid.can_transition_to(InvoiceStatus::Refunded));
        // No going backwards
        assert!(!InvoiceStatus::Refunded.can_transition_to(InvoiceStatus::Paid));
        assert!(!InvoiceStatus::Paid.can_transition_to(InvoiceStatus::Open));
    }

    #[test]
    fn test_feature_flag_round_trip() {
        assert_eq!(
            FeatureFlag::parse("payout_export"),
            Some(FeatureFlag::PayoutExport)
        );
        assert_eq!(FeatureFlag::parse("time_travel"), None);
    }
}
