//! Information-schema virtualization.
//!
//! Catalog metadata queries are never rewritten onto physical relations.
//! The authorized rows are materialized into a collision-free temp relation
//! on a dedicated pooled connection, the caller's statement is re-pointed at
//! that relation, and the temp relation dies with the session. Caller SQL is
//! never concatenated with trusted identifiers beyond the table
//! substitution.

use std::sync::Arc;

use sqlparser::ast::{Ident, ObjectName, Query, SetExpr, Statement, TableAlias, TableFactor};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use lakegate_auth::CatalogRegistry;
use lakegate_core::{
    AuthorizationService, CatalogAttacher, CatalogStatus, LakegateError, LakegateResult,
    Privilege, RowSet, SecurableType,
};
use lakegate_duckdb::{quote_ident, quote_literal, DuckDbPool};

/// The three virtualized relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoSchemaTable {
    Schemata,
    Tables,
    Columns,
}

impl InfoSchemaTable {
    pub fn base_name(&self) -> &'static str {
        match self {
            Self::Schemata => "schemata",
            Self::Tables => "tables",
            Self::Columns => "columns",
        }
    }

    /// VARCHAR columns matching the info-schema shape.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Schemata => &["catalog_name", "schema_name"],
            Self::Tables => &["table_catalog", "table_schema", "table_name", "table_type"],
            Self::Columns => &[
                "table_catalog",
                "table_schema",
                "table_name",
                "column_name",
                "ordinal_position",
                "data_type",
            ],
        }
    }

    /// Detect an `information_schema.*` reference among extracted tables.
    pub fn detect(refs: &[String]) -> Option<Self> {
        for reference in refs {
            let lower = reference.to_ascii_lowercase();
            match lower.as_str() {
                "information_schema.schemata" => return Some(Self::Schemata),
                "information_schema.tables" => return Some(Self::Tables),
                "information_schema.columns" => return Some(Self::Columns),
                _ => {}
            }
        }
        None
    }
}

/// Builds per-connection materializations of catalog metadata under RBAC
/// filtering.
pub struct InfoSchemaVirtualizer {
    pool: DuckDbPool,
    auth: Arc<dyn AuthorizationService>,
    attacher: Arc<dyn CatalogAttacher>,
    registry: Arc<CatalogRegistry>,
}

impl InfoSchemaVirtualizer {
    pub fn new(
        pool: DuckDbPool,
        auth: Arc<dyn AuthorizationService>,
        attacher: Arc<dyn CatalogAttacher>,
        registry: Arc<CatalogRegistry>,
    ) -> Self {
        Self {
            pool,
            auth,
            attacher,
            registry,
        }
    }

    /// Execute a caller statement that references the given info-schema
    /// relation.
    #[instrument(skip(self, statement), fields(principal = %principal_name, relation = kind.base_name()))]
    pub async fn execute(
        &self,
        principal_name: &str,
        statement: &mut Statement,
        kind: InfoSchemaTable,
    ) -> LakegateResult<RowSet> {
        let rows = self.collect_rows(principal_name, kind).await?;

        let conn = self.pool.pin().await.map_err(LakegateError::from)?;
        let temp_name = format!(
            "__lakegate_is_{}_{}",
            kind.base_name(),
            Uuid::new_v4().simple()
        );

        let column_defs = kind
            .columns()
            .iter()
            .map(|c| format!("{} VARCHAR", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!(
            "CREATE TEMP TABLE {} ({})",
            quote_ident(&temp_name),
            column_defs
        ))
        .await
        .map_err(LakegateError::from)?;

        if !rows.is_empty() {
            let values = rows
                .iter()
                .map(|row| {
                    format!(
                        "({})",
                        row.iter()
                            .map(|v| quote_literal(v))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute(&format!(
                "INSERT INTO {} VALUES {}",
                quote_ident(&temp_name),
                values
            ))
            .await
            .map_err(LakegateError::from)?;
        }

        substitute_relation(statement, kind, &temp_name);
        let final_sql = statement.to_string();
        debug!(sql = %final_sql, "Executing virtualized info-schema query");

        let result = conn.query(&final_sql).await.map_err(LakegateError::from);

        // The temp relation is session-scoped; dropping it eagerly keeps the
        // pooled session clean for the next pin.
        if let Err(e) = conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&temp_name)))
            .await
        {
            warn!(error = %e, "Failed to drop info-schema temp relation");
        }

        result.map(RowSet::new)
    }

    /// Enumerate and authorize metadata rows across all ACTIVE catalogs.
    /// A failing catalog contributes zero rows without failing the query.
    async fn collect_rows(
        &self,
        principal_name: &str,
        kind: InfoSchemaTable,
    ) -> LakegateResult<Vec<Vec<String>>> {
        let mut rows = Vec::new();

        for catalog in self.attacher.list_attached() {
            if catalog.status != CatalogStatus::Active {
                continue;
            }
            let name = catalog.registration.name.clone();
            match self.catalog_rows(principal_name, &name, kind).await {
                Ok(mut catalog_rows) => rows.append(&mut catalog_rows),
                Err(e) => {
                    warn!(catalog = %name, error = %e, "Catalog enumeration failed; skipping");
                }
            }
        }

        Ok(rows)
    }

    async fn catalog_rows(
        &self,
        principal_name: &str,
        catalog: &str,
        kind: InfoSchemaTable,
    ) -> LakegateResult<Vec<Vec<String>>> {
        let mut rows = Vec::new();

        match kind {
            InfoSchemaTable::Schemata => {
                for (schema, schema_id) in self.registry.schemas_of_catalog(catalog) {
                    let visible = self
                        .auth
                        .check_privilege(
                            principal_name,
                            SecurableType::Schema,
                            &schema_id.to_string(),
                            Privilege::Usage,
                        )
                        .await?;
                    if visible {
                        rows.push(vec![catalog.to_owned(), schema]);
                    }
                }
            }
            InfoSchemaTable::Tables => {
                for table in self.registry.tables_of_catalog(catalog) {
                    if self.table_visible(principal_name, table.table_id).await? {
                        let table_type = if table.is_external {
                            "EXTERNAL"
                        } else {
                            "BASE TABLE"
                        };
                        rows.push(vec![
                            catalog.to_owned(),
                            table.schema,
                            table.name,
                            table_type.to_owned(),
                        ]);
                    }
                }
            }
            InfoSchemaTable::Columns => {
                for table in self.registry.tables_of_catalog(catalog) {
                    if !self.table_visible(principal_name, table.table_id).await? {
                        continue;
                    }
                    for (position, column) in table.columns.iter().enumerate() {
                        rows.push(vec![
                            catalog.to_owned(),
                            table.schema.clone(),
                            table.name.clone(),
                            column.name.clone(),
                            (position + 1).to_string(),
                            column.data_type.clone(),
                        ]);
                    }
                }
            }
        }

        Ok(rows)
    }

    /// Any privilege on the table makes its rows visible.
    async fn table_visible(&self, principal_name: &str, table_id: i64) -> LakegateResult<bool> {
        let securable_id = table_id.to_string();
        for privilege in [
            Privilege::Select,
            Privilege::Insert,
            Privilege::Update,
            Privilege::Delete,
        ] {
            if self
                .auth
                .check_privilege(
                    principal_name,
                    SecurableType::Table,
                    &securable_id,
                    privilege,
                )
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Re-point every `information_schema.<base>` reference at the temp
/// relation. Unaliased occurrences get the base name as alias so column
/// qualifications in the caller SQL keep resolving.
fn substitute_relation(statement: &mut Statement, kind: InfoSchemaTable, temp_name: &str) {
    if let Statement::Query(query) = statement {
        subst_query(query, kind, temp_name);
    }
}

fn subst_query(query: &mut Query, kind: InfoSchemaTable, temp_name: &str) {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            subst_query(&mut cte.query, kind, temp_name);
        }
    }
    subst_set_expr(&mut query.body, kind, temp_name);
}

fn subst_set_expr(body: &mut SetExpr, kind: InfoSchemaTable, temp_name: &str) {
    match body {
        SetExpr::Select(select) => {
            for twj in &mut select.from {
                subst_factor(&mut twj.relation, kind, temp_name);
                for join in &mut twj.joins {
                    subst_factor(&mut join.relation, kind, temp_name);
                }
            }
        }
        SetExpr::Query(query) => subst_query(query, kind, temp_name),
        SetExpr::SetOperation { left, right, .. } => {
            subst_set_expr(left, kind, temp_name);
            subst_set_expr(right, kind, temp_name);
        }
        _ => {}
    }
}

fn subst_factor(factor: &mut TableFactor, kind: InfoSchemaTable, temp_name: &str) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let target = format!("information_schema.{}", kind.base_name());
            let rendered = name
                .0
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(".");
            if rendered.eq_ignore_ascii_case(&target) {
                *name = ObjectName::from(vec![Ident::new(temp_name)]);
                if alias.is_none() {
                    *alias = Some(TableAlias {
                        explicit: true,
                        name: Ident::new(kind.base_name()),
                        columns: vec![],
                    });
                }
            }
        }
        TableFactor::Derived { subquery, .. } => subst_query(subquery, kind, temp_name),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            subst_factor(&mut table_with_joins.relation, kind, temp_name);
            for join in &mut table_with_joins.joins {
                subst_factor(&mut join.relation, kind, temp_name);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_detect_case_insensitive() {
        assert_eq!(
            InfoSchemaTable::detect(&["INFORMATION_SCHEMA.Tables".to_string()]),
            Some(InfoSchemaTable::Tables)
        );
        assert_eq!(
            InfoSchemaTable::detect(&["information_schema.schemata".to_string()]),
            Some(InfoSchemaTable::Schemata)
        );
        assert_eq!(InfoSchemaTable::detect(&["orders".to_string()]), None);
    }

    #[test]
    fn test_substitution_aliases_unaliased_reference() {
        let (mut statement, _) =
            classify("SELECT table_name FROM information_schema.tables WHERE table_schema = 'main'")
                .unwrap();
        substitute_relation(&mut statement, InfoSchemaTable::Tables, "__tmp_x");
        assert_eq!(
            statement.to_string(),
            "SELECT table_name FROM __tmp_x AS tables WHERE table_schema = 'main'"
        );
    }

    #[test]
    fn test_substitution_keeps_existing_alias() {
        let (mut statement, _) =
            classify("SELECT t.table_name FROM information_schema.tables AS t").unwrap();
        substitute_relation(&mut statement, InfoSchemaTable::Tables, "__tmp_x");
        assert_eq!(
            statement.to_string(),
            "SELECT t.table_name FROM __tmp_x AS t"
        );
    }
}
