//! Authorization gate for administrative mutations
//!
//! Backed by a loaded SuperAdmin record with a named boolean permission set.
//! Absence of an active record means every permission is false. The gate is
//! loaded once per authenticated actor; `wait_for_admin_check` resolves only
//! after that initial load completes, so the first authorization decision is
//! never served from a "not yet loaded" state.

use std::sync::Arc;

use receiptly_shared::UserId;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::OnceCell;

use crate::error::{BillingError, BillingResult};

/// Named capability a super admin may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageSubscriptions,
    ApplyDiscounts,
    IssueRefunds,
    ManageCoupons,
    PauseSubscriptions,
    ExtendTrials,
    DeleteOrganizations,
    ManagePlans,
    ViewAnalytics,
    ViewAuditLog,
    ExportAuditLog,
    ManageSuperAdmins,
    ImpersonateOrgs,
    ManageTaxRates,
    ManageFeatureFlags,
    ViewInvoices,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageSubscriptions => "manage_subscriptions",
            Permission::ApplyDiscounts => "apply_discounts",
            Permission::IssueRefunds => "issue_refunds",
            Permission::ManageCoupons => "manage_coupons",
            Permission::PauseSubscriptions => "pause_subscriptions",
            Permission::ExtendTrials => "extend_trials",
            Permission::DeleteOrganizations => "delete_organizations",
            Permission::ManagePlans => "manage_plans",
            Permission::ViewAnalytics => "view_analytics",
            Permission::ViewAuditLog => "view_audit_log",
            Permission::ExportAuditLog => "export_audit_log",
            Permission::ManageSuperAdmins => "manage_super_admins",
            Permission::ImpersonateOrgs => "impersonate_orgs",
            Permission::ManageTaxRates => "manage_tax_rates",
            Permission::ManageFeatureFlags => "manage_feature_flags",
            Permission::ViewInvoices => "view_invoices",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A platform operator's permission record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SuperAdmin {
    pub user_id: UserId,
    pub active: bool,
    pub manage_subscriptions: bool,
    pub apply_discounts: bool,
    pub issue_refunds: bool,
    pub manage_coupons: bool,
    pub pause_subscriptions: bool,
    pub extend_trials: bool,
    pub delete_organizations: bool,
    pub manage_plans: bool,
    pub view_analytics: bool,
    pub view_audit_log: bool,
    pub export_audit_log: bool,
    pub manage_super_admins: bool,
    pub impersonate_orgs: bool,
    pub manage_tax_rates: bool,
    pub manage_feature_flags: bool,
    pub view_invoices: bool,
}

impl SuperAdmin {
    pub fn has(&self, permission: Permission) -> bool {
        if !self.active {
            return false;
        }
        match permission {
            Permission::ManageSubscriptions => self.manage_subscriptions,
            Permission::ApplyDiscounts => self.apply_discounts,
            Permission::IssueRefunds => self.issue_refunds,
            Permission::ManageCoupons => self.manage_coupons,
            Permission::PauseSubscriptions => self.pause_subscriptions,
            Permission::ExtendTrials => self.extend_trials,
            Permission::DeleteOrganizations => self.delete_organizations,
            Permission::ManagePlans => self.manage_plans,
            Permission::ViewAnalytics => self.view_analytics,
            Permission::ViewAuditLog => self.view_audit_log,
            Permission::ExportAuditLog => self.export_audit_log,
            Permission::ManageSuperAdmins => self.manage_super_admins,
            Permission::ImpersonateOrgs => self.impersonate_orgs,
            Permission::ManageTaxRates => self.manage_tax_rates,
            Permission::ManageFeatureFlags => self.manage_feature_flags,
            Permission::ViewInvoices => self.view_invoices,
        }
    }
}

/// Permission-set check guarding all administrative mutations.
///
/// One gate per authenticated actor. The record is loaded lazily exactly
/// once; every check waits for that load, so concurrent first requests all
/// see the loaded state.
#[derive(Clone)]
pub struct AuthorizationGate {
    pool: PgPool,
    user_id: UserId,
    record: Arc<OnceCell<Option<SuperAdmin>>>,
}

impl AuthorizationGate {
    pub fn new(pool: PgPool, user_id: UserId) -> Self {
        Self {
            pool,
            user_id,
            record: Arc::new(OnceCell::new()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Resolve once the initial permission load has completed. A load
    /// failure resolves to "no record" (all permissions false).
    pub async fn wait_for_admin_check(&self) -> &Option<SuperAdmin> {
        self.record
            .get_or_init(|| async {
                match self.load().await {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::error!(
                            user_id = %self.user_id,
                            error = %e,
                            "Failed to load super admin record; denying all permissions"
                        );
                        None
                    }
                }
            })
            .await
    }

    /// Does the actor hold the named permission? Always waits for the
    /// initial load.
    pub async fn has_permission(&self, permission: Permission) -> bool {
        match self.wait_for_admin_check().await {
            Some(admin) => admin.has(permission),
            None => false,
        }
    }

    /// Gate an admin action: error out before the target mutation runs.
    pub async fn require(&self, permission: Permission) -> BillingResult<()> {
        if self.has_permission(permission).await {
            Ok(())
        } else {
            Err(BillingError::PermissionDenied(
                permission.as_str().to_string(),
            ))
        }
    }

    async fn load(&self) -> BillingResult<Option<SuperAdmin>> {
        let record: Option<SuperAdmin> = sqlx::query_as(
            r#"
            SELECT
                user_id, active,
                manage_subscriptions, apply_discounts, issue_refunds,
                manage_coupons, pause_subscriptions, extend_trials,
                delete_organizations, manage_plans, view_analytics,
                view_audit_log, export_audit_log, manage_super_admins,
                impersonate_orgs, manage_tax_rates, manage_feature_flags,
                view_invoices
            FROM super_admins
            WHERE user_id = $1 AND active = TRUE
            "#,
        )
        .bind(self.user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_admin() -> SuperAdmin {
        SuperAdmin {
            user_id: UserId::new(),
            active: true,
            manage_subscriptions: true,
            apply_discounts: true,
            issue_refunds: true,
            manage_coupons: true,
            pause_subscriptions: true,
            extend_trials: true,
            delete_organizations: true,
            manage_plans: true,
            view_analytics: true,
            view_audit_log: true,
            export_audit_log: true,
            manage_super_admins: true,
            impersonate_orgs: true,
            manage_tax_rates: true,
            manage_feature_flags: true,
            view_invoices: true,
        }
    }

    #[test]
    fn test_inactive_record_denies_everything() {
        let mut admin = full_admin();
        admin.active = false;
        assert!(!admin.has(Permission::ManageSubscriptions));
        assert!(!admin.has(Permission::ViewAuditLog));
    }

    #[test]
    fn test_permission_flags_are_independent() {
        let mut admin = full_admin();
        admin.manage_super_admins = false;
        assert!(!admin.has(Permission::ManageSuperAdmins));
        assert!(admin.has(Permission::ApplyDiscounts));
    }

    #[test]
    fn test_permission_names() {
        assert_eq!(
            Permission::ManageSuperAdmins.as_str(),
            "manage_super_admins"
        );
        assert_eq!(Permission::IssueRefunds.as_str(), "issue_refunds");
    }
}
