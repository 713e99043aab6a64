//! DuckDB connection management.

use std::sync::Arc;

use duckdb::Connection;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::config::DuckDbConfig;
use crate::error::DuckDbResult;
use crate::value::duckdb_value_ref_to_json;

/// A DuckDB connection wrapper.
///
/// DuckDB connections are not thread-safe by default, so we wrap them
/// in a Mutex for safe concurrent access.
#[derive(Clone)]
pub struct DuckDbConnection {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbConnection {
    /// Create a new connection from configuration.
    pub fn new(config: &DuckDbConfig) -> DuckDbResult<Self> {
        let conn = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            Connection::open(config.path_str())?
        };

        Self::apply_config(&conn, config)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory connection.
    pub fn open_in_memory() -> DuckDbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Clone the connection against the same database instance.
    ///
    /// Cloned connections share catalogs and data but keep their own session
    /// state (temp relations, variables, macros).
    pub fn try_clone(&self) -> DuckDbResult<Self> {
        let conn = self.conn.lock().try_clone()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Apply configuration settings to the connection.
    fn apply_config(conn: &Connection, config: &DuckDbConfig) -> DuckDbResult<()> {
        if let Some(threads) = config.threads {
            conn.execute(&format!("SET threads = {}", threads), [])?;
        }

        if let Some(ref limit) = config.memory_limit {
            conn.execute(&format!("SET memory_limit = '{}'", limit), [])?;
        }

        if let Some(ref temp_dir) = config.temp_directory {
            let path = temp_dir.to_string_lossy();
            conn.execute(&format!("SET temp_directory = '{}'", path), [])?;
        }

        if !config.enable_external_access {
            conn.execute("SET enable_external_access = false", [])?;
        }

        Ok(())
    }

    /// Execute a query and return all rows as JSON objects keyed by column.
    #[instrument(skip(self), fields(sql = %sql))]
    pub fn query(&self, sql: &str) -> DuckDbResult<Vec<JsonValue>> {
        debug!("Executing query");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;

        let column_names: Vec<String> = rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default();

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut obj = serde_json::Map::new();

            for (i, name) in column_names.iter().enumerate() {
                let value = row.get_ref(i)?;
                obj.insert(name.clone(), duckdb_value_ref_to_json(value));
            }

            results.push(JsonValue::Object(obj));
        }

        Ok(results)
    }

    /// Execute a query and return the first row, if any.
    #[instrument(skip(self), fields(sql = %sql))]
    pub fn query_optional(&self, sql: &str) -> DuckDbResult<Option<JsonValue>> {
        let results = self.query(sql)?;
        Ok(results.into_iter().next())
    }

    /// Execute a query and return only the result column names, in order.
    /// Works on zero-row results, which is what `WHERE 1=0` probes produce.
    #[instrument(skip(self), fields(sql = %sql))]
    pub fn query_columns(&self, sql: &str) -> DuckDbResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query([])?;
        Ok(rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default())
    }

    /// Execute a statement and return the number of affected rows.
    #[instrument(skip(self), fields(sql = %sql))]
    pub fn execute(&self, sql: &str) -> DuckDbResult<usize> {
        debug!("Executing statement");

        let conn = self.conn.lock();
        let affected = conn.execute(sql, [])?;
        Ok(affected)
    }

    /// Execute a batch of SQL statements.
    #[instrument(skip(self), fields(sql_len = %sql.len()))]
    pub fn execute_batch(&self, sql: &str) -> DuckDbResult<()> {
        debug!("Executing batch");

        let conn = self.conn.lock();
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl std::fmt::Debug for DuckDbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbConnection").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_returns_named_columns() {
        let conn = DuckDbConnection::open_in_memory().unwrap();
        let rows = conn.query("SELECT 1 AS one, 'x' AS name").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["one"], serde_json::json!(1));
        assert_eq!(rows[0]["name"], serde_json::json!("x"));
    }

    #[test]
    fn test_execute_reports_affected_rows() {
        let conn = DuckDbConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        let affected = conn.execute("INSERT INTO t VALUES (1), (2), (3)").unwrap();
        assert_eq!(affected, 3);
    }

    #[test]
    fn test_query_optional_empty() {
        let conn = DuckDbConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(conn.query_optional("SELECT * FROM t").unwrap().is_none());
    }
}
