//! The secure query pipeline.
//!
//! One call per submitted statement: classify, extract, authorize, rewrite,
//! execute, audit. Nothing retries; every error surfaces wrapped with the
//! step that produced it. The audit row is written even on denial, and an
//! audit insert failure never masks the query outcome.

use std::sync::Arc;
use std::time::Instant;

use sqlparser::ast::Statement;
use tracing::{debug, instrument, warn};

use lakegate_auth::CatalogRegistry;
use lakegate_core::{
    AuditEvent, AuditRepository, AuditStatus, AuthorizationService, CatalogAttacher,
    LakegateError, LakegateResult, Privilege, QueryEngine, ResultExt, RowSet, SecurableType,
    CATALOG_SECURABLE_ID,
};
use lakegate_duckdb::{DuckDbPool, PooledConnection};

use crate::classify::{classify, StatementClass};
use crate::compute::{ComputeResolver, LocalPoolExecutor};
use crate::info_schema::{InfoSchemaTable, InfoSchemaVirtualizer};
use crate::rewrite::{apply_column_masks, inject_row_filters};
use crate::tables::{extract_table_refs, is_func_source};

/// Engine interface extended with execution on a caller-held pinned
/// connection, used by the materializer to run governed SQL inside its own
/// session.
#[async_trait::async_trait]
pub trait SessionEngine: QueryEngine {
    async fn query_on_conn(
        &self,
        conn: &PooledConnection,
        principal_name: &str,
        sql: &str,
    ) -> LakegateResult<RowSet>;
}

/// Orchestrates authorization and rewriting in front of the embedded engine.
pub struct SecureQueryPipeline {
    auth: Arc<dyn AuthorizationService>,
    pool: DuckDbPool,
    audit: Arc<dyn AuditRepository>,
    resolver: Option<Arc<dyn ComputeResolver>>,
    virtualizer: InfoSchemaVirtualizer,
}

impl SecureQueryPipeline {
    pub fn new(
        auth: Arc<dyn AuthorizationService>,
        pool: DuckDbPool,
        audit: Arc<dyn AuditRepository>,
        attacher: Arc<dyn CatalogAttacher>,
        registry: Arc<CatalogRegistry>,
    ) -> Self {
        let virtualizer =
            InfoSchemaVirtualizer::new(pool.clone(), auth.clone(), attacher, registry);
        Self {
            auth,
            pool,
            audit,
            resolver: None,
            virtualizer,
        }
    }

    /// Route execution through a compute resolver. Without one, every
    /// statement runs on the local embedded database.
    pub fn with_resolver(mut self, resolver: Arc<dyn ComputeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[instrument(skip(self, sql, pinned, event), fields(principal = %principal_name))]
    async fn run(
        &self,
        principal_name: &str,
        sql: &str,
        pinned: Option<&PooledConnection>,
        event: &mut AuditEvent,
    ) -> LakegateResult<RowSet> {
        // The principal must at least exist; unknown callers never execute.
        self.auth
            .is_admin(principal_name)
            .await
            .context("principal lookup")?;

        let (mut statement, class) = classify(sql).context("classify")?;
        event.action = class.as_str().to_owned();
        event.statement_type = Some(class.as_str().to_owned());

        let refs = extract_table_refs(&statement);
        event.tables_accessed = refs
            .iter()
            .filter(|r| !is_func_source(r))
            .cloned()
            .collect();

        // Catalog metadata queries take the virtualized path.
        if let Some(kind) = InfoSchemaTable::detect(&refs) {
            if class != StatementClass::Select {
                return Err(LakegateError::validation(
                    "information_schema relations are read-only",
                ));
            }
            return self
                .virtualizer
                .execute(principal_name, &mut statement, kind)
                .await
                .context("information schema");
        }

        let Some(required) = class.required_privilege() else {
            return Err(match class {
                StatementClass::Ddl => {
                    LakegateError::validation("DDL is not allowed through the gateway")
                }
                _ => LakegateError::validation(format!(
                    "unsupported statement class {}",
                    class.as_str()
                )),
            });
        };

        let (tables, funcs): (Vec<&String>, Vec<&String>) =
            refs.iter().partition(|r| !is_func_source(r));

        if tables.is_empty() {
            // Bare SELECT of constants is open to any authenticated
            // principal; anything else without a table target needs the
            // privilege at catalog scope. Function-like sources (bulk file
            // readers) always need the catalog-scope privilege.
            if class != StatementClass::Select || !funcs.is_empty() {
                let allowed = self
                    .auth
                    .check_privilege(
                        principal_name,
                        SecurableType::Catalog,
                        CATALOG_SECURABLE_ID,
                        required,
                    )
                    .await
                    .context("privilege check")?;
                if !allowed {
                    return Err(LakegateError::access_denied(format!(
                        "{} at catalog scope",
                        required.as_str()
                    )));
                }
            }
        }

        for table in &tables {
            self.authorize_and_rewrite(principal_name, table, class, required, &mut statement)
                .await?;
        }

        let final_sql = statement.to_string();
        if final_sql != sql {
            event.rewritten_sql = Some(final_sql.clone());
        }
        debug!(sql = %final_sql, "Executing governed statement");

        let rows = match pinned {
            Some(conn) => RowSet::new(conn.query(&final_sql).await.map_err(LakegateError::from)?),
            None => {
                let executor = match &self.resolver {
                    Some(resolver) => resolver
                        .resolve(principal_name)
                        .await
                        .context("compute resolve")?,
                    None => Arc::new(LocalPoolExecutor::new(self.pool.clone())),
                };
                executor.execute(&final_sql).await.context("execute")?
            }
        };

        Ok(rows)
    }

    async fn authorize_and_rewrite(
        &self,
        principal_name: &str,
        table: &str,
        class: StatementClass,
        required: Privilege,
        statement: &mut Statement,
    ) -> LakegateResult<()> {
        let handle = self
            .auth
            .lookup_table_id(table)
            .await
            .context("table lookup")?;

        // External tables are read-only regardless of grants.
        if class != StatementClass::Select && handle.is_external {
            return Err(LakegateError::access_denied(format!(
                "table '{table}' is externally backed and read-only"
            )));
        }

        let allowed = self
            .auth
            .check_privilege(
                principal_name,
                SecurableType::Table,
                &handle.table_id.to_string(),
                required,
            )
            .await
            .context("privilege check")?;
        if !allowed {
            return Err(LakegateError::access_denied(format!(
                "{} on table '{table}'",
                required.as_str()
            )));
        }

        if class == StatementClass::Select {
            let filters = self
                .auth
                .effective_row_filters(principal_name, handle.table_id)
                .await
                .context("row filters")?;
            if !filters.is_empty() {
                let filter_sqls: Vec<String> =
                    filters.into_iter().map(|f| f.filter_sql).collect();
                inject_row_filters(statement, table, &filter_sqls).context("row filters")?;
            }

            let masks = self
                .auth
                .effective_column_masks(principal_name, handle.table_id)
                .await
                .context("column masks")?;
            if !masks.is_empty() {
                let columns = self
                    .auth
                    .table_column_names(handle.table_id)
                    .await
                    .context("column masks")?;
                apply_column_masks(statement, table, &masks, &columns).context("column masks")?;
            }
        }

        Ok(())
    }

    async fn record(&self, mut event: AuditEvent, result: &LakegateResult<RowSet>, started: Instant) {
        event.duration_ms = Some(started.elapsed().as_millis() as i64);
        match result {
            Ok(rows) => {
                event.status = AuditStatus::Allowed;
                event.rows_returned = Some(rows.len() as i64);
            }
            Err(e) if e.is_access_denied() => {
                event.status = AuditStatus::Denied;
                event.error_message = Some(e.to_string());
            }
            Err(e) => {
                event.status = AuditStatus::Error;
                event.error_message = Some(e.to_string());
            }
        }

        // Best effort only; the query outcome stands regardless.
        if let Err(audit_err) = self.audit.insert(event).await {
            warn!(error = %audit_err, "Audit insert failed");
        }
    }
}

#[async_trait::async_trait]
impl QueryEngine for SecureQueryPipeline {
    async fn query(&self, principal_name: &str, sql: &str) -> LakegateResult<RowSet> {
        let started = Instant::now();
        let mut event = AuditEvent::new(principal_name, "QUERY");
        event.original_sql = Some(sql.to_owned());

        let result = self.run(principal_name, sql, None, &mut event).await;
        self.record(event, &result, started).await;
        result
    }
}

#[async_trait::async_trait]
impl SessionEngine for SecureQueryPipeline {
    async fn query_on_conn(
        &self,
        conn: &PooledConnection,
        principal_name: &str,
        sql: &str,
    ) -> LakegateResult<RowSet> {
        let started = Instant::now();
        let mut event = AuditEvent::new(principal_name, "QUERY");
        event.original_sql = Some(sql.to_owned());

        let result = self.run(principal_name, sql, Some(conn), &mut event).await;
        self.record(event, &result, started).await;
        result
    }
}
