//! Securables and the privilege lattice.

use serde::{Deserialize, Serialize};

/// Offset applied to metastore-issued integer ids when a table is exposed as
/// an external table, so the two id spaces can never collide.
pub const EXTERNAL_TABLE_ID_OFFSET: i64 = 10_000_000;

/// Sentinel securable id for catalog-scoped grants. There is exactly one
/// catalog node per attached catalog.
pub const CATALOG_SECURABLE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Object kinds privileges can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurableType {
    Catalog,
    Schema,
    Table,
    ExternalLocation,
    StorageCredential,
    Volume,
}

impl SecurableType {
    /// Display name used in error messages and audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Schema => "schema",
            Self::Table => "table",
            Self::ExternalLocation => "external_location",
            Self::StorageCredential => "storage_credential",
            Self::Volume => "volume",
        }
    }
}

/// Privileges grantable on securables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Usage,
    CreateTable,
    CreateSchema,
    AllPrivileges,
    CreateExternalLocation,
    CreateStorageCredential,
    CreateVolume,
    ReadVolume,
    WriteVolume,
    ReadFiles,
    WriteFiles,
    Manage,
    ManageCompute,
}

impl Privilege {
    /// SQL-style keyword rendering.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Usage => "USAGE",
            Self::CreateTable => "CREATE_TABLE",
            Self::CreateSchema => "CREATE_SCHEMA",
            Self::AllPrivileges => "ALL_PRIVILEGES",
            Self::CreateExternalLocation => "CREATE_EXTERNAL_LOCATION",
            Self::CreateStorageCredential => "CREATE_STORAGE_CREDENTIAL",
            Self::CreateVolume => "CREATE_VOLUME",
            Self::ReadVolume => "READ_VOLUME",
            Self::WriteVolume => "WRITE_VOLUME",
            Self::ReadFiles => "READ_FILES",
            Self::WriteFiles => "WRITE_FILES",
            Self::Manage => "MANAGE",
            Self::ManageCompute => "MANAGE_COMPUTE",
        }
    }

    /// Parse a SQL-style keyword.
    pub fn parse(s: &str) -> Option<Self> {
        let norm = s.trim().to_ascii_uppercase();
        let p = match norm.as_str() {
            "SELECT" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "USAGE" => Self::Usage,
            "CREATE_TABLE" => Self::CreateTable,
            "CREATE_SCHEMA" => Self::CreateSchema,
            "ALL_PRIVILEGES" => Self::AllPrivileges,
            "CREATE_EXTERNAL_LOCATION" => Self::CreateExternalLocation,
            "CREATE_STORAGE_CREDENTIAL" => Self::CreateStorageCredential,
            "CREATE_VOLUME" => Self::CreateVolume,
            "READ_VOLUME" => Self::ReadVolume,
            "WRITE_VOLUME" => Self::WriteVolume,
            "READ_FILES" => Self::ReadFiles,
            "WRITE_FILES" => Self::WriteFiles,
            "MANAGE" => Self::Manage,
            "MANAGE_COMPUTE" => Self::ManageCompute,
            _ => return None,
        };
        Some(p)
    }
}

/// Which side of a grant the principal reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GranteeType {
    User,
    Group,
}

/// A privilege grant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeGrant {
    /// Principal or group receiving the privilege.
    pub principal_id: String,
    /// Whether `principal_id` names a user or a group.
    pub principal_type: GranteeType,
    /// Kind of securable granted on.
    pub securable_type: SecurableType,
    /// Securable id; the all-zero sentinel for catalog-level grants.
    pub securable_id: String,
    /// The granted privilege.
    pub privilege: Privilege,
}

/// Resolution of a table name against the attached metastores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableHandle {
    /// Table id; external tables carry the metastore id plus
    /// [`EXTERNAL_TABLE_ID_OFFSET`].
    pub table_id: i64,
    /// Enclosing schema id.
    pub schema_id: i64,
    /// External tables are read-only regardless of grants.
    pub is_external: bool,
}
