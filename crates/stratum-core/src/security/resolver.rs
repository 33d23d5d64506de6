//! Session context resolution.
//!
//! Projects an identity verified by the authentication collaborator into a
//! [`SessionContext`]. Credentials never reach this layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::context::SessionContext;

/// Membership of a user in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// Organization id.
    pub organization_id: String,
    /// Role within the organization.
    pub role: String,
}

/// An externally verified identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// User id.
    pub user_id: String,
    /// Global roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Organization the user selected for this session.
    #[serde(default)]
    pub active_organization_id: Option<String>,
    /// Known memberships.
    #[serde(default)]
    pub memberships: Vec<Membership>,
}

impl Identity {
    /// Identity with no roles or memberships.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Add a global role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Add a membership and make it the active organization.
    pub fn with_active_membership(
        mut self,
        organization_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        let organization_id = organization_id.into();
        self.active_organization_id = Some(organization_id.clone());
        self.memberships.push(Membership {
            organization_id,
            role: role.into(),
        });
        self
    }
}

/// Membership lookup failure.
#[derive(Debug, Clone, Error)]
#[error("membership lookup failed: {0}")]
pub struct DirectoryError(pub String);

/// Source of organization memberships.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// The membership backing the identity's active organization, if any.
    async fn active_membership(
        &self,
        identity: &Identity,
    ) -> Result<Option<Membership>, DirectoryError>;
}

/// Directory answering from the membership list carried by the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsDirectory;

#[async_trait]
impl MembershipDirectory for ClaimsDirectory {
    async fn active_membership(
        &self,
        identity: &Identity,
    ) -> Result<Option<Membership>, DirectoryError> {
        let Some(active) = identity.active_organization_id.as_deref() else {
            return Ok(None);
        };
        Ok(identity
            .memberships
            .iter()
            .find(|m| m.organization_id == active)
            .cloned())
    }
}

/// Builds session contexts from verified identities.
#[derive(Clone)]
pub struct SessionResolver {
    directory: Arc<dyn MembershipDirectory>,
}

impl Default for SessionResolver {
    fn default() -> Self {
        Self::new(Arc::new(ClaimsDirectory))
    }
}

impl SessionResolver {
    /// Create a resolver backed by `directory`.
    pub fn new(directory: Arc<dyn MembershipDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve the session for an optional identity.
    ///
    /// A failed membership lookup leaves the session without organization,
    /// so organization-scoped tables yield nothing.
    pub async fn resolve(&self, identity: Option<&Identity>) -> SessionContext {
        let Some(identity) = identity else {
            return SessionContext::anonymous();
        };

        let mut session = SessionContext::authenticated(identity.user_id.clone());
        session.roles.extend(identity.roles.iter().cloned());

        match self.directory.active_membership(identity).await {
            Ok(Some(membership)) => {
                session.roles.insert(membership.role);
                session.organization_id = Some(membership.organization_id);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %identity.user_id, error = %e, "membership lookup failed");
            }
        }

        debug!(
            user_id = %identity.user_id,
            organization_id = ?session.organization_id,
            roles = ?session.roles,
            "session resolved"
        );
        session
    }
}
