//! Shared domain types for the Lakegate data gateway.
//!
//! This crate carries the vocabulary the rest of the workspace speaks:
//! principals and groups, the securable graph and privilege lattice, row
//! filters and column masks, models with their runs and steps, audit events,
//! the error taxonomy, and the traits behind which external collaborators
//! (metastores, notebooks, secret stores) live.

pub mod audit;
pub mod error;
pub mod interfaces;
pub mod model;
pub mod policy;
pub mod principal;
pub mod rows;
pub mod securable;

pub use audit::{AuditEvent, AuditRepository, AuditStatus, MemoryAuditRepository};
pub use error::{LakegateError, LakegateResult, ResultExt};
pub use interfaces::{
    AttachedCatalog, AuthorizationService, AzureSecretSpec, CatalogAttacher, CatalogRegistration,
    CatalogStatus, GcsSecretSpec, MetastoreQuerier, MetastoreType, ModelRunner, NotebookProvider,
    QueryEngine, S3SecretSpec, SecretManager,
};
pub use model::{
    CompileManifest, Contract, ContractColumn, DataTest, Freshness, IncrementalStrategy, Macro,
    ManifestEntry, Materialization, Model, ModelConfig, ModelRun, ModelRunStep, OnSchemaChange,
    RunRequest, RunStatus, StepStatus, TestKind, TestResult, TriggerType,
};
pub use policy::{ColumnMask, ColumnMaskBinding, RowFilter, RowFilterBinding};
pub use principal::{Group, GroupMember, MemberType, Principal, PrincipalType};
pub use rows::RowSet;
pub use securable::{
    GranteeType, Privilege, PrivilegeGrant, SecurableType, TableHandle, CATALOG_SECURABLE_ID,
    EXTERNAL_TABLE_ID_OFFSET,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditRepository, AuditStatus};
    pub use crate::error::{LakegateError, LakegateResult, ResultExt};
    pub use crate::interfaces::{AuthorizationService, QueryEngine};
    pub use crate::model::{Materialization, Model, ModelRun, RunRequest, RunStatus, StepStatus};
    pub use crate::principal::{Principal, PrincipalType};
    pub use crate::rows::RowSet;
    pub use crate::securable::{Privilege, SecurableType, TableHandle};
}
