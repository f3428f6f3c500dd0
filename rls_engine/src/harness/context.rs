//! Simulated identities.
//!
//! A [`SecurityContext`] is created per scenario and applied to exactly one
//! transaction. It maps to a database role (`SET LOCAL ROLE`) plus a JWT-style
//! claims document stored in a transaction-local setting, the way hosted
//! Postgres platforms expose the caller's identity to policies.

use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::harness::HarnessError;

/// What kind of caller a context simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextKind {
    /// No signed-in user.
    Anonymous,
    /// A signed-in user with no tenant or application role.
    AuthenticatedUser,
    /// A signed-in user acting inside a tenant.
    TenantMember,
    /// A signed-in user carrying an application role.
    RoleBound,
}

/// Claims presented with the identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Claims {
    /// Database role assumed for the probe.
    pub role: String,
    pub tenant_id: Option<Uuid>,
    /// Server-controlled application role (`app_metadata.role`).
    pub app_role: Option<String>,
    /// User-writable role claim (`user_metadata.role`); policies must not trust it.
    pub user_metadata_role: Option<String>,
}

/// Identity under which one probe executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityContext {
    pub kind: ContextKind,
    pub subject_id: Option<Uuid>,
    pub claims: Claims,
    /// Short name used in reports, e.g. `"user B"`.
    pub label: String,
}

impl SecurityContext {
    #[must_use]
    pub fn anonymous(config: &HarnessConfig) -> Self {
        Self {
            kind: ContextKind::Anonymous,
            subject_id: None,
            claims: Claims {
                role: config.anon_role.clone(),
                ..Claims::default()
            },
            label: "anonymous".to_owned(),
        }
    }

    #[must_use]
    pub fn user(id: Uuid, label: &str, config: &HarnessConfig) -> Self {
        Self {
            kind: ContextKind::AuthenticatedUser,
            subject_id: Some(id),
            claims: Claims {
                role: config.authenticated_role.clone(),
                ..Claims::default()
            },
            label: label.to_owned(),
        }
    }

    #[must_use]
    pub fn tenant_member(id: Uuid, tenant: Uuid, label: &str, config: &HarnessConfig) -> Self {
        Self {
            kind: ContextKind::TenantMember,
            subject_id: Some(id),
            claims: Claims {
                role: config.authenticated_role.clone(),
                tenant_id: Some(tenant),
                ..Claims::default()
            },
            label: label.to_owned(),
        }
    }

    #[must_use]
    pub fn role_bound(id: Uuid, app_role: &str, config: &HarnessConfig) -> Self {
        Self {
            kind: ContextKind::RoleBound,
            subject_id: Some(id),
            claims: Claims {
                role: config.authenticated_role.clone(),
                app_role: Some(app_role.to_owned()),
                ..Claims::default()
            },
            label: format!("{app_role} user"),
        }
    }

    /// Add the tenant claim to a role-bound identity.
    #[must_use]
    pub fn in_tenant(mut self, tenant: Uuid) -> Self {
        self.claims.tenant_id = Some(tenant);
        self
    }

    /// Add a user-writable role claim, as an escalation attempt would.
    #[must_use]
    pub fn claiming_user_metadata_role(mut self, role: &str) -> Self {
        self.claims.user_metadata_role = Some(role.to_owned());
        self.label = format!("{} claiming {role} in user metadata", self.label);
        self
    }

    /// Check the context is well formed before any SQL is issued.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Identity`] describing the first problem found.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let fail = |reason: &str| {
            Err(HarnessError::Identity {
                identity: self.label.clone(),
                reason: reason.to_owned(),
            })
        };
        if self.claims.role.trim().is_empty() {
            return fail("no database role");
        }
        if self.claims.role.contains('\0') {
            return fail("database role contains a NUL byte");
        }
        match self.kind {
            ContextKind::Anonymous if self.subject_id.is_some() => {
                fail("anonymous identity must not carry a subject id")
            }
            ContextKind::Anonymous => Ok(()),
            _ if self.subject_id.is_none() => fail("signed-in identity needs a subject id"),
            ContextKind::TenantMember if self.claims.tenant_id.is_none() => {
                fail("tenant member needs a tenant id")
            }
            ContextKind::RoleBound if self.claims.app_role.is_none() => {
                fail("role-bound identity needs an application role")
            }
            _ => Ok(()),
        }
    }

    /// The claims document stored in the configured claims setting.
    #[must_use]
    pub fn claims_json(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("role".to_owned(), json!(self.claims.role));
        if let Some(id) = self.subject_id {
            doc.insert("sub".to_owned(), json!(id.to_string()));
        }

        let mut app = Map::new();
        if let Some(ref role) = self.claims.app_role {
            app.insert("role".to_owned(), json!(role));
        }
        if let Some(tenant) = self.claims.tenant_id {
            app.insert("tenant_id".to_owned(), json!(tenant.to_string()));
        }
        if !app.is_empty() {
            doc.insert("app_metadata".to_owned(), Value::Object(app));
        }
        if let Some(ref role) = self.claims.user_metadata_role {
            doc.insert("user_metadata".to_owned(), json!({ "role": role }));
        }
        Value::Object(doc)
    }

    /// Value for `request.jwt.claim.sub`; empty for anonymous callers.
    #[must_use]
    pub fn subject_claim(&self) -> String {
        self.subject_id.map(|id| id.to_string()).unwrap_or_default()
    }
}
