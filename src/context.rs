//! Request-scoped tenant identity.
//!
//! The acting user and active workspace are passed explicitly into every
//! engine call. Nothing is stored in thread-locals or globals, so two
//! requests running concurrently can never observe each other's identity,
//! and the identity is gone as soon as the caller drops its context.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Resolved identity of the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    workspace_id: String,
    user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    organization_id: Option<String>,
}

impl TenantContext {
    /// Build a context. Both identifiers must be non-blank.
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>) -> EngineResult<Self> {
        let workspace_id = workspace_id.into();
        let user_id = user_id.into();
        if workspace_id.trim().is_empty() {
            return Err(EngineError::bad_request("Workspace context is required"));
        }
        if user_id.trim().is_empty() {
            return Err(EngineError::bad_request("User context is required"));
        }
        Ok(Self {
            workspace_id,
            user_id,
            organization_id: None,
        })
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }
}

/// Boundary to the external user directory.
///
/// Consulted before a user is made assignee or follower of a task.
pub trait UserDirectory: Send + Sync {
    fn contains(&self, workspace_id: &str, user_id: &str) -> bool;
}

/// Directory that accepts every user; used when no directory is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

impl UserDirectory for OpenDirectory {
    fn contains(&self, _workspace_id: &str, _user_id: &str) -> bool {
        true
    }
}
