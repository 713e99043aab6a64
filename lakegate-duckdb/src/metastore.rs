//! Read access to DuckLake metastore bookkeeping.
//!
//! Every attached catalog `<name>` exposes its metastore under the
//! `__ducklake_metadata_<name>` database. Only the handful of reads the
//! gateway needs live here; the metastore's persistence layout is otherwise
//! out of scope.

use lakegate_core::{LakegateError, LakegateResult, MetastoreQuerier};
use tracing::instrument;

use crate::pool::DuckDbPool;
use crate::value::quote_ident;

/// Queries DuckLake metastore tables through the engine.
pub struct DuckLakeMetastoreQuerier {
    pool: DuckDbPool,
    /// Catalog whose metastore is being read.
    catalog: String,
}

impl DuckLakeMetastoreQuerier {
    pub fn new(pool: DuckDbPool, catalog: impl Into<String>) -> Self {
        Self {
            pool,
            catalog: catalog.into(),
        }
    }

    fn meta_db(&self) -> String {
        quote_ident(&format!("__ducklake_metadata_{}", self.catalog))
    }
}

#[async_trait::async_trait]
impl MetastoreQuerier for DuckLakeMetastoreQuerier {
    #[instrument(skip(self))]
    async fn read_data_path(&self, catalog: &str) -> LakegateResult<String> {
        let sql = format!(
            "SELECT value FROM {}.ducklake_metadata WHERE key = 'data_path'",
            self.meta_db()
        );
        let conn = self.pool.pin().await.map_err(LakegateError::from)?;
        let row = conn
            .query_optional(&sql)
            .await
            .map_err(LakegateError::from)?
            .ok_or_else(|| LakegateError::not_found(format!("data path of catalog '{catalog}'")))?;
        row["value"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| LakegateError::internal("data_path value is not a string"))
    }

    #[instrument(skip(self))]
    async fn read_schema_path(&self, catalog: &str, schema_id: i64) -> LakegateResult<String> {
        let sql = format!(
            "SELECT path FROM {}.ducklake_schema WHERE schema_id = {schema_id}",
            self.meta_db()
        );
        let conn = self.pool.pin().await.map_err(LakegateError::from)?;
        let row = conn
            .query_optional(&sql)
            .await
            .map_err(LakegateError::from)?
            .ok_or_else(|| {
                LakegateError::not_found(format!("schema {schema_id} in catalog '{catalog}'"))
            })?;
        row["path"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| LakegateError::internal("schema path value is not a string"))
    }

    #[instrument(skip(self))]
    async fn list_data_files(&self, table_id: i64) -> LakegateResult<(Vec<String>, bool)> {
        let sql = format!(
            "SELECT path, path_is_relative FROM {}.ducklake_data_file \
             WHERE table_id = {table_id} AND end_snapshot IS NULL ORDER BY path",
            self.meta_db()
        );
        let conn = self.pool.pin().await.map_err(LakegateError::from)?;
        let rows = conn.query(&sql).await.map_err(LakegateError::from)?;

        let mut paths = Vec::with_capacity(rows.len());
        let mut relative = true;
        for row in &rows {
            if let Some(p) = row["path"].as_str() {
                paths.push(p.to_owned());
            }
            relative = row["path_is_relative"].as_bool().unwrap_or(true);
        }
        Ok((paths, relative))
    }
}
