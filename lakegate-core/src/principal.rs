//! Principals and groups.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    /// Interactive user.
    User,
    /// Machine identity.
    ServicePrincipal,
}

/// An authenticated identity bearing grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Opaque identifier (UUIDv7 for newly created principals).
    pub id: String,
    /// Unique name the identity authenticates as.
    pub name: String,
    /// User or service principal.
    pub principal_type: PrincipalType,
    /// Admins bypass all privilege checks.
    pub is_admin: bool,
    /// Subject claim from the upstream identity provider, if any.
    pub external_id: Option<String>,
    /// Issuer of the upstream identity, if any.
    pub external_issuer: Option<String>,
}

impl Principal {
    /// Create a new user principal with a fresh id.
    pub fn new_user(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            principal_type: PrincipalType::User,
            is_admin: false,
            external_id: None,
            external_issuer: None,
        }
    }

    /// Create a new service principal with a fresh id.
    pub fn new_service_principal(name: impl Into<String>) -> Self {
        Self {
            principal_type: PrincipalType::ServicePrincipal,
            ..Self::new_user(name)
        }
    }

    /// Mark the principal as admin.
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// A named collection of principals and other groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Opaque identifier.
    pub id: String,
    /// Unique group name.
    pub name: String,
    /// Free-form description.
    pub description: String,
}

impl Group {
    /// Create a new group with a fresh id.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Kind of group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    /// A user or service principal.
    User,
    /// A nested group; membership is transitive.
    Group,
}

/// A membership edge. The graph must stay acyclic; insertion rejects cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    /// The containing group.
    pub group_id: String,
    /// Whether the member is a principal or a nested group.
    pub member_type: MemberType,
    /// Id of the member.
    pub member_id: String,
}
