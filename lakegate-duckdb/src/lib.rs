//! Embedded DuckDB layer for the Lakegate gateway.
//!
//! Everything the rest of the workspace needs from the analytical engine
//! lives here: configuration, the mutex-wrapped connection, the semaphore-
//! bounded pool whose [`PooledConnection`] guard is the gateway's pinned
//! connection, DuckLake catalog attachment, storage secrets, and guarded
//! extension loading.

pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod extension;
pub mod metastore;
pub mod pool;
pub mod secrets;
pub mod value;

pub use catalog::DuckLakeAttacher;
pub use config::{DatabasePath, DuckDbConfig, DuckDbConfigBuilder};
pub use connection::DuckDbConnection;
pub use error::{DuckDbError, DuckDbResult};
pub use extension::ExtensionLoader;
pub use metastore::DuckLakeMetastoreQuerier;
pub use pool::{DuckDbPool, PoolConfig, PoolStatus, PooledConnection};
pub use secrets::DuckDbSecretManager;
pub use value::{duckdb_value_ref_to_json, duckdb_value_to_json, quote_ident, quote_literal};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::DuckDbConfig;
    pub use crate::connection::DuckDbConnection;
    pub use crate::error::{DuckDbError, DuckDbResult};
    pub use crate::pool::{DuckDbPool, PoolConfig, PooledConnection};
}
