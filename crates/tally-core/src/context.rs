//! Tenant-scoped call contexts.
//!
//! Every storage call carries a [`TenantContext`]; there is no unscoped
//! access path. Writes carry a [`CallContext`], which adds who asked for the
//! change and a correlation token propagated into published notifications.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record identifiers scoping reads and writes to one tenant (and account).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    /// Account record the call acts on, if any.
    pub account_record_id: Option<i64>,
    /// Tenant record owning every row the call touches.
    pub tenant_record_id: i64,
}

impl TenantContext {
    /// Context scoped to a tenant and a specific account.
    pub fn new(tenant_record_id: i64, account_record_id: i64) -> Self {
        Self {
            account_record_id: Some(account_record_id),
            tenant_record_id,
        }
    }

    /// Context scoped to a tenant only (tenant-wide reads).
    pub fn tenant_only(tenant_record_id: i64) -> Self {
        Self {
            account_record_id: None,
            tenant_record_id,
        }
    }
}

/// Context for a mutating call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    /// Tenant/account scope.
    pub tenant: TenantContext,
    /// Correlation token for everything emitted by this call.
    pub user_token: Uuid,
    /// Who initiated the change.
    pub created_by: String,
    /// Optional free-form reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CallContext {
    /// Build a call context with a fresh correlation token.
    pub fn new(tenant: TenantContext, created_by: impl Into<String>) -> Self {
        Self {
            tenant,
            user_token: Uuid::now_v7(),
            created_by: created_by.into(),
            reason: None,
        }
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Read-side view of this context.
    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_only_has_no_account() {
        let ctx = TenantContext::tenant_only(7);
        assert_eq!(ctx.tenant_record_id, 7);
        assert!(ctx.account_record_id.is_none());
    }

    #[test]
    fn call_context_tokens_are_unique() {
        let tenant = TenantContext::new(1, 2);
        let a = CallContext::new(tenant, "admin");
        let b = CallContext::new(tenant, "admin");
        assert_ne!(a.user_token, b.user_token);
        assert_eq!(a.tenant(), &tenant);
    }

    #[test]
    fn with_reason_sets_reason() {
        let ctx = CallContext::new(TenantContext::new(1, 2), "admin").with_reason("migration");
        assert_eq!(ctx.reason.as_deref(), Some("migration"));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(TenantContext::new(1, 2)).unwrap();
        assert_eq!(json["tenantRecordId"], 1);
        assert_eq!(json["accountRecordId"], 2);
    }
}
