//! Collaborator interfaces consumed and exposed by the gateway core.
//!
//! The HTTP/CLI surface, JWT verification, metastore persistence, cloud
//! presigning, notebooks, and compute lifecycle all live outside this
//! workspace; the core reaches them only through these traits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LakegateResult;
use crate::model::{ModelRun, RunRequest};
use crate::policy::RowFilter;
use crate::rows::RowSet;
use crate::securable::{Privilege, SecurableType, TableHandle};

/// Authorization decisions over the securable graph.
///
/// Implementations answer the *effective* question: table privileges already
/// account for USAGE on the enclosing schema and catalog, and group
/// membership is expanded transitively. Callers never walk the hierarchy.
#[async_trait::async_trait]
pub trait AuthorizationService: Send + Sync {
    /// Resolve a possibly-qualified table name against the attached
    /// metastores. Fails with NotFound if unresolved.
    async fn lookup_table_id(&self, name: &str) -> LakegateResult<TableHandle>;

    /// Whether the named principal holds `privilege` on the securable.
    /// OR-semantics over all grant paths; admins always pass.
    async fn check_privilege(
        &self,
        principal_name: &str,
        securable_type: SecurableType,
        securable_id: &str,
        privilege: Privilege,
    ) -> LakegateResult<bool>;

    /// Every row filter bound to the principal on the table via any group
    /// path, ordered by ascending filter id. Empty for admins.
    async fn effective_row_filters(
        &self,
        principal_name: &str,
        table_id: i64,
    ) -> LakegateResult<Vec<RowFilter>>;

    /// Masked columns for the principal: column name to mask expression.
    /// `see_original` bindings suppress the mask; a user-level binding beats
    /// a group-level one; ties break by ascending mask id.
    async fn effective_column_masks(
        &self,
        principal_name: &str,
        table_id: i64,
    ) -> LakegateResult<BTreeMap<String, String>>;

    /// Column names of the table in position order, for `SELECT *` expansion.
    async fn table_column_names(&self, table_id: i64) -> LakegateResult<Vec<String>>;

    /// Whether the principal exists and is an admin.
    async fn is_admin(&self, principal_name: &str) -> LakegateResult<bool>;
}

/// Something that can execute SQL on behalf of a principal.
#[async_trait::async_trait]
pub trait QueryEngine: Send + Sync {
    /// Run one governed statement and return its rows.
    async fn query(&self, principal_name: &str, sql: &str) -> LakegateResult<RowSet>;
}

/// Credential for S3-compatible object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3SecretSpec {
    pub name: String,
    pub key_id: String,
    pub secret: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub use_ssl: bool,
}

/// Credential for Azure blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureSecretSpec {
    pub name: String,
    pub connection_string: String,
}

/// Credential for Google Cloud Storage (HMAC keys).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcsSecretSpec {
    pub name: String,
    pub key_id: String,
    pub secret: String,
}

/// Storage-credential management on the analytical engine.
#[async_trait::async_trait]
pub trait SecretManager: Send + Sync {
    async fn create_s3_secret(&self, spec: &S3SecretSpec) -> LakegateResult<()>;
    async fn create_azure_secret(&self, spec: &AzureSecretSpec) -> LakegateResult<()>;
    async fn create_gcs_secret(&self, spec: &GcsSecretSpec) -> LakegateResult<()>;
    async fn drop_secret(&self, name: &str) -> LakegateResult<()>;
}

/// Metastore backend flavor for an attached catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetastoreType {
    Sqlite,
    Postgres,
}

/// Registration of one lakehouse catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRegistration {
    /// Catalog name as referenced from SQL.
    pub name: String,
    pub metastore_type: MetastoreType,
    /// DSN of the metastore (file path for sqlite, URL for postgres).
    pub dsn: String,
    /// Root path table data files live under.
    pub data_path: String,
}

/// Lifecycle state of an attached catalog. Only ACTIVE catalogs participate
/// in information-schema virtualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CatalogStatus {
    Active,
    Detached,
}

/// An attached catalog with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedCatalog {
    pub registration: CatalogRegistration,
    pub status: CatalogStatus,
    pub is_default: bool,
}

/// Catalog attachment on the analytical engine.
#[async_trait::async_trait]
pub trait CatalogAttacher: Send + Sync {
    async fn attach(&self, registration: CatalogRegistration) -> LakegateResult<()>;
    async fn detach(&self, name: &str) -> LakegateResult<()>;
    async fn set_default(&self, name: &str) -> LakegateResult<()>;
    /// All attachments this process knows about.
    fn list_attached(&self) -> Vec<AttachedCatalog>;
}

/// Read access to metastore bookkeeping.
#[async_trait::async_trait]
pub trait MetastoreQuerier: Send + Sync {
    async fn read_data_path(&self, catalog: &str) -> LakegateResult<String>;
    async fn read_schema_path(&self, catalog: &str, schema_id: i64) -> LakegateResult<String>;
    /// Data file paths of a table and whether they are relative to the
    /// catalog data path.
    async fn list_data_files(&self, table_id: i64) -> LakegateResult<(Vec<String>, bool)>;
}

/// Source of notebook SQL blocks, used only for notebook-to-model promotion.
#[async_trait::async_trait]
pub trait NotebookProvider: Send + Sync {
    async fn get_sql_blocks(&self, notebook_id: &str) -> LakegateResult<Vec<String>>;
}

/// Synchronous run triggering, consumed by orchestrating surfaces.
#[async_trait::async_trait]
pub trait ModelRunner: Send + Sync {
    async fn trigger_run_sync(
        &self,
        principal_name: &str,
        request: RunRequest,
    ) -> LakegateResult<ModelRun>;
}
