//! Verified caller identity, capability checks and instance ownership

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::models::{Deployment, ProviderRequest};

/// Permission roles gating the endpoint groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    CloudUser,
    CloudProvider,
    CloudOperator,
}

impl Role {
    /// Permission string carried in access tokens
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::CloudUser => "cloud-user",
            Role::CloudProvider => "cloud-provider",
            Role::CloudOperator => "cloud-operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity attached to a request once its bearer token has been verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    #[serde(rename = "sub")]
    pub subject_id: String,

    pub permissions: BTreeSet<String>,
}

impl IdentityContext {
    pub fn new<I, S>(subject_id: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject_id: subject_id.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.permissions.contains(role.as_str())
    }
}

/// Capability check. A missing context is treated like a missing permission.
pub fn require_role(context: Option<&IdentityContext>, role: Role) -> Result<&IdentityContext> {
    match context {
        Some(ctx) if ctx.has_role(role) => Ok(ctx),
        _ => Err(Error::Forbidden("Insufficient permissions".to_string())),
    }
}

/// Resources possessed by a single subject
pub trait Owned {
    fn owner_subject_id(&self) -> &str;
}

impl Owned for Deployment {
    fn owner_subject_id(&self) -> &str {
        &self.owner_subject_id
    }
}

impl Owned for ProviderRequest {
    fn owner_subject_id(&self) -> &str {
        &self.requesting_subject_id
    }
}

/// Instance-level check, applied after the resource is known to exist
pub fn assert_ownership<T: Owned>(resource: &T, context: &IdentityContext) -> Result<()> {
    if resource.owner_subject_id() == context.subject_id {
        Ok(())
    } else {
        Err(Error::Forbidden(
            "You do not have access to this resource".to_string(),
        ))
    }
}
