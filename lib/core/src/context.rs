//! The invoking context carried by every engine operation.

use crate::entity::Tenant;
use ulid::Ulid;

/// Who is invoking an operation, and on behalf of which tenant.
///
/// The tenant scopes every store access. The remaining fields only flow into
/// the metadata of events published as a consequence of the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// Tenant the operation runs for.
    pub tenant: Tenant,
    /// Trace id propagated into published events.
    pub trace_id: String,
    /// Acting user id, if the operation was user-initiated.
    pub user_id: Option<String>,
    /// Acting user email, if known.
    pub user_email: Option<String>,
}

impl OperationContext {
    /// Creates a system context for a tenant with a fresh trace id.
    #[must_use]
    pub fn system(tenant: Tenant) -> Self {
        Self {
            tenant,
            trace_id: Ulid::new().to_string(),
            user_id: None,
            user_email: None,
        }
    }

    /// Continues an existing trace.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Attributes the operation to a user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>, user_email: Option<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.user_email = user_email;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_contexts_get_distinct_traces() {
        let a = OperationContext::system(Tenant::new("acme"));
        let b = OperationContext::system(Tenant::new("acme"));
        assert_ne!(a.trace_id, b.trace_id);
        assert!(a.user_id.is_none());
    }

    #[test]
    fn with_user_sets_actor() {
        let ctx = OperationContext::system(Tenant::new("acme"))
            .with_user("usr_1", Some("ops@acme.com".to_string()));
        assert_eq!(ctx.user_id.as_deref(), Some("usr_1"));
        assert_eq!(ctx.user_email.as_deref(), Some("ops@acme.com"));
    }
}
