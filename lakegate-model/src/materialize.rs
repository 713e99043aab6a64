//! Materialization strategies.
//!
//! Runs on one pinned connection. Macros are created first (session-local),
//! then the session variables, then the strategy DDL/DML. Engine-synthesized
//! DDL runs directly on the connection; model-shaped DML routes through the
//! secure pipeline when an engine is wired in, sharing the same session.

use std::collections::BTreeSet;

use tracing::{debug, instrument, warn};

use lakegate_auth::{CatalogRegistry, ColumnInfo};
use lakegate_core::{
    IncrementalStrategy, LakegateError, LakegateResult, Macro, Materialization, Model,
    OnSchemaChange, RowSet,
};
use lakegate_duckdb::{quote_ident, quote_literal, PooledConnection};
use lakegate_query::SessionEngine;

use crate::compile::{fqn, CompileContext};

/// Snapshot bookkeeping columns.
const SNAPSHOT_VALID_FROM: &str = "dbt_valid_from";
const SNAPSHOT_VALID_TO: &str = "dbt_valid_to";
const SNAPSHOT_IS_CURRENT: &str = "dbt_is_current";

/// Engine-synthesized statements allowed to bypass the secure pipeline on
/// the pinned connection. Everything else the materializer runs is
/// model-shaped and goes through [`SessionEngine::query_on_conn`].
const DIRECT_STATEMENT_PREFIXES: &[&str] = &[
    "SET VARIABLE ",
    "CREATE OR REPLACE VIEW ",
    "CREATE OR REPLACE TABLE ",
    "CREATE TEMP TABLE ",
    "DROP TABLE ",
    "CREATE OR REPLACE MACRO ",
];

fn direct_statement_allowed(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    DIRECT_STATEMENT_PREFIXES
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

/// Result of materializing one model.
#[derive(Debug, Clone, Default)]
pub struct MaterializeOutcome {
    /// Best-effort row count of the target after materialization.
    pub rows_affected: Option<i64>,
}

/// Per-step materializer bound to a pinned connection.
pub struct Materializer<'a> {
    conn: &'a PooledConnection,
    context: &'a CompileContext,
    macros: &'a [Macro],
    engine: Option<(&'a dyn SessionEngine, &'a str)>,
    registry: Option<&'a CatalogRegistry>,
}

impl<'a> Materializer<'a> {
    pub fn new(
        conn: &'a PooledConnection,
        context: &'a CompileContext,
        macros: &'a [Macro],
    ) -> Self {
        Self {
            conn,
            context,
            macros,
            engine: None,
            registry: None,
        }
    }

    /// Route model-shaped DML through the secure pipeline as this principal.
    pub fn with_engine(mut self, engine: &'a dyn SessionEngine, principal: &'a str) -> Self {
        self.engine = Some((engine, principal));
        self
    }

    /// Sync materialized targets into the catalog registry so later
    /// governed statements can resolve them.
    pub fn with_registry(mut self, registry: &'a CatalogRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Create all macros and set the session variables. Must run before the
    /// first model on every pinned connection; macros never outlive a
    /// session.
    #[instrument(skip(self))]
    pub async fn prepare_session(&self) -> LakegateResult<()> {
        for definition in self.macros {
            self.run_direct(&definition.create_sql()).await?;
        }

        self.set_variable("target_catalog", &self.context.target_catalog)
            .await?;
        self.set_variable("target_schema", &self.context.target_schema)
            .await?;
        self.set_variable("model_name", &self.context.model_name).await?;
        self.set_variable("project_name", &self.context.project_name)
            .await?;
        for (name, value) in &self.context.vars {
            self.set_variable(name, value).await?;
        }
        Ok(())
    }

    async fn set_variable(&self, name: &str, value: &str) -> LakegateResult<()> {
        let name_re = regex_lite::Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex");
        if !name_re.is_match(name) {
            return Err(LakegateError::validation(format!(
                "invalid session variable name '{name}'"
            )));
        }
        self.run_direct(&format!("SET VARIABLE {name} = {}", quote_literal(value)))
            .await
    }

    /// Execute one strategy for the model's compiled SQL.
    #[instrument(skip(self, compiled_sql), fields(model = %model.qualified_name()))]
    pub async fn materialize(
        &self,
        model: &Model,
        compiled_sql: &str,
    ) -> LakegateResult<MaterializeOutcome> {
        match model.materialization {
            Materialization::View => self.materialize_view(model, compiled_sql).await?,
            Materialization::Table | Materialization::Seed => {
                self.materialize_table(model, compiled_sql).await?
            }
            Materialization::Incremental => {
                self.materialize_incremental(model, compiled_sql).await?
            }
            Materialization::Snapshot => self.materialize_snapshot(model, compiled_sql).await?,
            Materialization::Ephemeral => {
                return Err(LakegateError::validation(format!(
                    "model '{}' is ephemeral and never materialized",
                    model.qualified_name()
                )));
            }
        }

        // Sync first: the governed row-count query resolves the target
        // through the registry.
        self.sync_registry(model).await;

        let rows_affected = match model.materialization {
            Materialization::View => None,
            _ => self.count_rows(&self.target_fqn(model)).await,
        };
        Ok(MaterializeOutcome { rows_affected })
    }

    fn target_fqn(&self, model: &Model) -> String {
        fqn(
            &self.context.target_catalog,
            &self.context.target_schema,
            &model.name,
        )
    }

    /// Model-shaped DML goes through the pipeline when available so row
    /// filters, privileges, and auditing apply to transformation writes too.
    async fn run_governed(&self, sql: &str) -> LakegateResult<RowSet> {
        match self.engine {
            Some((engine, principal)) => engine.query_on_conn(self.conn, principal, sql).await,
            None => {
                let rows = self.conn.query(sql).await.map_err(LakegateError::from)?;
                Ok(RowSet::new(rows))
            }
        }
    }

    async fn run_direct(&self, sql: &str) -> LakegateResult<()> {
        if !direct_statement_allowed(sql) {
            return Err(LakegateError::internal(format!(
                "statement not on the direct-execution whitelist: {sql}"
            )));
        }
        debug!(sql = %sql, "Direct statement");
        self.conn
            .execute_batch(sql)
            .await
            .map_err(LakegateError::from)
    }

    async fn count_rows(&self, target: &str) -> Option<i64> {
        match self
            .run_governed(&format!("SELECT COUNT(*) AS n FROM {target}"))
            .await
        {
            Ok(rows) => rows.scalar_i64(),
            Err(e) => {
                warn!(error = %e, "Row count query failed");
                None
            }
        }
    }

    async fn materialize_view(
        &self,
        model: &Model,
        compiled_sql: &str,
    ) -> LakegateResult<()> {
        let target = self.target_fqn(model);
        self.run_direct(&format!("CREATE OR REPLACE VIEW {target} AS ({compiled_sql})"))
            .await
    }

    async fn materialize_table(
        &self,
        model: &Model,
        compiled_sql: &str,
    ) -> LakegateResult<()> {
        let target = self.target_fqn(model);
        self.run_direct(&format!(
            "CREATE OR REPLACE TABLE {target} AS ({compiled_sql})"
        ))
        .await
    }

    async fn target_exists(&self, model: &Model) -> LakegateResult<bool> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM information_schema.tables \
             WHERE table_catalog = {} AND table_schema = {} AND table_name = {}",
            quote_literal(&self.context.target_catalog),
            quote_literal(&self.context.target_schema),
            quote_literal(&model.name),
        );
        let rows = self.conn.query(&sql).await.map_err(LakegateError::from)?;
        Ok(RowSet::new(rows).scalar_i64().unwrap_or(0) > 0)
    }

    fn unique_key(&self, model: &Model) -> LakegateResult<Vec<String>> {
        if model.config.unique_key.is_empty() {
            return Err(LakegateError::validation(format!(
                "model '{}' requires config.unique_key for {} materialization",
                model.qualified_name(),
                model.materialization.as_str()
            )));
        }
        Ok(model.config.unique_key.clone())
    }

    /// `target.k = source.k AND …` over the unique key.
    fn key_equality(keys: &[String]) -> String {
        keys.iter()
            .map(|k| {
                format!(
                    "target.{k} = source.{k}",
                    k = quote_ident(k)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    async fn materialize_incremental(
        &self,
        model: &Model,
        compiled_sql: &str,
    ) -> LakegateResult<()> {
        if self.context.full_refresh || !self.target_exists(model).await? {
            return self.materialize_table(model, compiled_sql).await;
        }

        let keys = self.unique_key(model)?;
        let target = self.target_fqn(model);

        self.enforce_schema_change_policy(model, compiled_sql, &target)
            .await?;

        let strategy = match &model.config.incremental_strategy {
            None => IncrementalStrategy::Merge,
            Some(raw) => IncrementalStrategy::parse(raw).ok_or_else(|| {
                LakegateError::validation(format!(
                    "unknown incremental strategy '{raw}' on model '{}'",
                    model.qualified_name()
                ))
            })?,
        };

        let key_eq = Self::key_equality(&keys);
        match strategy {
            IncrementalStrategy::Merge => {
                let sql = format!(
                    "MERGE INTO {target} AS target USING ({compiled_sql}) AS source ON {key_eq} \
                     WHEN MATCHED THEN UPDATE SET * WHEN NOT MATCHED THEN INSERT *"
                );
                self.run_governed(&sql).await?;
            }
            IncrementalStrategy::DeleteInsert => {
                let delete = format!(
                    "DELETE FROM {target} AS target USING ({compiled_sql}) AS source WHERE {key_eq}"
                );
                self.run_governed(&delete).await?;
                let insert = format!(
                    "INSERT INTO {target} SELECT * FROM ({compiled_sql}) AS source"
                );
                self.run_governed(&insert).await?;
            }
        }

        Ok(())
    }

    /// Compare source and target column sets according to the
    /// `on_schema_change` policy.
    async fn enforce_schema_change_policy(
        &self,
        model: &Model,
        compiled_sql: &str,
        target: &str,
    ) -> LakegateResult<()> {
        let policy = match &model.config.on_schema_change {
            None => OnSchemaChange::Ignore,
            Some(raw) => OnSchemaChange::parse(raw).ok_or_else(|| {
                LakegateError::validation(format!(
                    "unknown on_schema_change policy '{raw}' on model '{}'",
                    model.qualified_name()
                ))
            })?,
        };
        if policy == OnSchemaChange::Ignore {
            return Ok(());
        }

        let source_columns: BTreeSet<String> = self
            .conn
            .query_columns(&format!("SELECT * FROM ({compiled_sql}) AS source WHERE 1=0"))
            .await
            .map_err(LakegateError::from)?
            .into_iter()
            .collect();
        let target_columns: BTreeSet<String> = self
            .conn
            .query_columns(&format!("SELECT * FROM {target} WHERE 1=0"))
            .await
            .map_err(LakegateError::from)?
            .into_iter()
            .collect();

        if source_columns != target_columns {
            let added: Vec<&String> = source_columns.difference(&target_columns).collect();
            let removed: Vec<&String> = target_columns.difference(&source_columns).collect();
            return Err(LakegateError::validation(format!(
                "schema change on model '{}': added {:?}, removed {:?}",
                model.qualified_name(),
                added,
                removed
            )));
        }
        Ok(())
    }

    async fn materialize_snapshot(
        &self,
        model: &Model,
        compiled_sql: &str,
    ) -> LakegateResult<()> {
        let keys = self.unique_key(model)?;
        let target = self.target_fqn(model);

        let source_columns = self
            .conn
            .query_columns(&format!("SELECT * FROM ({compiled_sql}) AS source WHERE 1=0"))
            .await
            .map_err(LakegateError::from)?;
        let non_key: Vec<&String> = source_columns
            .iter()
            .filter(|c| !keys.iter().any(|k| k.eq_ignore_ascii_case(c)))
            .collect();
        if non_key.is_empty() {
            return Err(LakegateError::validation(format!(
                "snapshot '{}' needs at least one non-key column",
                model.qualified_name()
            )));
        }

        if self.context.full_refresh || !self.target_exists(model).await? {
            self.run_direct(&format!(
                "CREATE OR REPLACE TABLE {target} AS (\
                 SELECT *, CURRENT_TIMESTAMP AS {SNAPSHOT_VALID_FROM}, \
                 CAST(NULL AS TIMESTAMP) AS {SNAPSHOT_VALID_TO}, \
                 TRUE AS {SNAPSHOT_IS_CURRENT} FROM ({compiled_sql}) AS source)"
            ))
            .await?;
            return Ok(());
        }

        let key_eq = Self::key_equality(&keys);
        let changed = non_key
            .iter()
            .map(|c| {
                format!(
                    "target.{c} IS DISTINCT FROM source.{c}",
                    c = quote_ident(c)
                )
            })
            .collect::<Vec<_>>()
            .join(" OR ");

        // Close out rows whose tracked columns drifted.
        let close = format!(
            "UPDATE {target} AS target SET {SNAPSHOT_VALID_TO} = CURRENT_TIMESTAMP, \
             {SNAPSHOT_IS_CURRENT} = FALSE \
             FROM ({compiled_sql}) AS source \
             WHERE target.{SNAPSHOT_IS_CURRENT} AND {key_eq} AND ({changed})"
        );
        self.run_governed(&close).await?;

        // Insert fresh current rows for new keys and for keys just closed.
        let source_list = source_columns
            .iter()
            .map(|c| format!("source.{}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let first_key = quote_ident(&keys[0]);
        let insert = format!(
            "INSERT INTO {target} \
             SELECT {source_list}, CURRENT_TIMESTAMP, CAST(NULL AS TIMESTAMP), TRUE \
             FROM ({compiled_sql}) AS source \
             LEFT JOIN {target} AS target ON {key_eq} AND target.{SNAPSHOT_IS_CURRENT} \
             WHERE target.{first_key} IS NULL"
        );
        self.run_governed(&insert).await?;

        Ok(())
    }

    /// Best-effort registry sync so governed statements can resolve the
    /// target afterwards. The metastore owns the durable ids; this mirrors
    /// the freshly materialized shape into the in-process view.
    async fn sync_registry(&self, model: &Model) {
        let Some(registry) = self.registry else {
            return;
        };
        let target = self.target_fqn(model);
        let described = self.conn.query(&format!("DESCRIBE {target}")).await;
        let columns = match described {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| {
                    Some(ColumnInfo::new(
                        row["column_name"].as_str()?,
                        row["column_type"].as_str().unwrap_or("VARCHAR"),
                    ))
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "DESCRIBE failed; registry not synced");
                return;
            }
        };
        registry.sync_table(
            &self.context.target_catalog,
            &self.context.target_schema,
            &model.name,
            columns,
        );
    }
}
