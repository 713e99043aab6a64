//! # Lakegate
//!
//! A governed SQL gateway and transformation engine in front of an embedded
//! analytical database over lakehouse tables.
//!
//! Lakegate provides:
//! - Row-level security, column masking, and privilege checks enforced by
//!   rewriting SQL before execution
//! - An information-schema virtualizer that aggregates catalog metadata
//!   under RBAC filtering
//! - Named SQL models with view / table / incremental / snapshot / seed /
//!   ephemeral materializations, scheduled in dependency tiers with
//!   contract checks and data tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lakegate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lakegate::Error> {
//!     let service = LakegateService::connect(DuckDbConfig::in_memory()).await?;
//!
//!     service.create_principal(Principal::new_user("root").admin())?;
//!     let rows = service.query("root", "SELECT 42 AS answer").await?;
//!     assert_eq!(rows.scalar_i64(), Some(42));
//!
//!     Ok(())
//! }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

mod service;

pub use service::LakegateService;

/// Shared domain types, errors, and collaborator interfaces.
pub mod core {
    pub use lakegate_core::*;
}

/// Embedded DuckDB layer: pool, pinned connections, catalogs, secrets.
pub mod duckdb {
    pub use lakegate_duckdb::*;
}

/// Authorization: catalog lookup, stores, and the evaluator.
pub mod auth {
    pub use lakegate_auth::*;
}

/// The secure query pipeline and SQL rewriting.
pub mod query {
    pub use lakegate_query::*;
}

/// Model compilation, DAG scheduling, and materialization.
pub mod model {
    pub use lakegate_model::*;
}

/// Gateway error type.
pub type Error = lakegate_core::LakegateError;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::LakegateService;
    pub use lakegate_core::prelude::*;
    pub use lakegate_duckdb::prelude::*;
}
