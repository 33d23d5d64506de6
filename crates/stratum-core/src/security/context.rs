//! Per-request session context.
//!
//! The session context is the only input the policy evaluator sees about the
//! caller. It is built fresh for every request and never persisted.

use std::collections::BTreeSet;

/// Resolved identity of the caller of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    /// Authenticated user id; `None` for anonymous callers.
    pub user_id: Option<String>,
    /// Roles held in this request (opaque strings, no hierarchy).
    pub roles: BTreeSet<String>,
    /// Active organization; `None` when none could be resolved.
    pub organization_id: Option<String>,
}

impl SessionContext {
    /// Anonymous session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Session of an authenticated user without roles or organization.
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Add a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Set the active organization.
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Check if the session carries a user id.
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Check if the session holds at least one of `roles`.
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|role| self.roles.contains(role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous() {
        let session = SessionContext::anonymous();
        assert!(!session.is_authenticated());
        assert!(session.roles.is_empty());
        assert!(session.organization_id.is_none());
    }

    #[test]
    fn test_roles() {
        let session = SessionContext::authenticated("u1").with_role("editor");
        assert!(session.has_any_role(&["admin".to_string(), "editor".to_string()]));
        assert!(!session.has_any_role(&["admin".to_string()]));
        assert!(!session.has_any_role(&[]));
    }
}
