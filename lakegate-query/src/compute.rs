//! Compute resolution.
//!
//! "Given a principal, give me something that can run a query." A `None`
//! resolver on the pipeline means every statement runs on the local embedded
//! database. The pinned-connection executor lets the materializer share one
//! session with the pipeline.

use std::sync::Arc;

use lakegate_core::{LakegateError, LakegateResult, RowSet};
use lakegate_duckdb::{DuckDbPool, PooledConnection};

/// Something that can run one SQL statement and return rows.
#[async_trait::async_trait]
pub trait ComputeExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> LakegateResult<RowSet>;
}

/// Maps a principal to an executor.
#[async_trait::async_trait]
pub trait ComputeResolver: Send + Sync {
    async fn resolve(&self, principal_name: &str) -> LakegateResult<Arc<dyn ComputeExecutor>>;
}

/// Executes on the local embedded database, pinning a fresh connection per
/// statement.
pub struct LocalPoolExecutor {
    pool: DuckDbPool,
}

impl LocalPoolExecutor {
    pub fn new(pool: DuckDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ComputeExecutor for LocalPoolExecutor {
    async fn execute(&self, sql: &str) -> LakegateResult<RowSet> {
        let conn = self.pool.pin().await.map_err(LakegateError::from)?;
        let rows = conn.query(sql).await.map_err(LakegateError::from)?;
        Ok(RowSet::new(rows))
    }
}

/// Executes every statement on one shared pinned connection.
pub struct PinnedExecutor {
    conn: Arc<PooledConnection>,
}

impl PinnedExecutor {
    pub fn new(conn: Arc<PooledConnection>) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl ComputeExecutor for PinnedExecutor {
    async fn execute(&self, sql: &str) -> LakegateResult<RowSet> {
        let rows = self.conn.query(sql).await.map_err(LakegateError::from)?;
        Ok(RowSet::new(rows))
    }
}
