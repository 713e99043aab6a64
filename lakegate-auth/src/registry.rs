//! Catalog metadata registry.
//!
//! Resolves possibly-qualified table names to metastore ids and serves
//! column metadata. The registry is synced from the attached metastores by
//! the hosting service; the evaluator and the information-schema virtualizer
//! only read it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use lakegate_core::{LakegateError, LakegateResult, TableHandle, EXTERNAL_TABLE_ID_OFFSET};

/// Id space for tables synced from freshly materialized relations rather
/// than read from a metastore. Kept below the external-table offset so the
/// three id spaces stay disjoint.
const SYNTHETIC_TABLE_ID_BASE: i64 = 5_000_000;

/// One column of a registered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A table known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub catalog: String,
    pub schema: String,
    pub name: String,
    pub table_id: i64,
    pub schema_id: i64,
    /// External tables are read-only through the gateway.
    pub is_external: bool,
    /// Columns in position order.
    pub columns: Vec<ColumnInfo>,
}

impl TableEntry {
    pub fn handle(&self) -> TableHandle {
        TableHandle {
            table_id: self.table_id,
            schema_id: self.schema_id,
            is_external: self.is_external,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: Vec<TableEntry>,
    by_id: HashMap<i64, usize>,
}

/// In-process view of the attached catalogs' table metadata.
#[derive(Debug, Default)]
pub struct CatalogRegistry {
    inner: RwLock<Inner>,
    next_synthetic_id: AtomicI64,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a table from a freshly materialized relation. An existing
    /// entry keeps its id and schema id; a new one gets a synthetic id.
    /// Returns the table id.
    pub fn sync_table(
        &self,
        catalog: &str,
        schema: &str,
        name: &str,
        columns: Vec<ColumnInfo>,
    ) -> i64 {
        let mut inner = self.inner.write();
        if let Some(existing) = inner
            .tables
            .iter_mut()
            .find(|t| t.catalog == catalog && t.schema == schema && t.name == name)
        {
            existing.columns = columns;
            return existing.table_id;
        }

        let table_id =
            SYNTHETIC_TABLE_ID_BASE + self.next_synthetic_id.fetch_add(1, Ordering::Relaxed);
        let schema_id = inner
            .tables
            .iter()
            .find(|t| t.catalog == catalog && t.schema == schema)
            .map(|t| t.schema_id)
            .unwrap_or(table_id);
        let idx = inner.tables.len();
        inner.by_id.insert(table_id, idx);
        inner.tables.push(TableEntry {
            catalog: catalog.to_owned(),
            schema: schema.to_owned(),
            name: name.to_owned(),
            table_id,
            schema_id,
            is_external: false,
            columns,
        });
        table_id
    }

    /// Register a managed table.
    pub fn register_table(&self, entry: TableEntry) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        if inner
            .tables
            .iter()
            .any(|t| t.schema == entry.schema && t.name == entry.name && t.catalog == entry.catalog)
        {
            return Err(LakegateError::conflict(format!(
                "table '{}.{}.{}' is already registered",
                entry.catalog, entry.schema, entry.name
            )));
        }
        if inner.by_id.contains_key(&entry.table_id) {
            return Err(LakegateError::conflict(format!(
                "table id {} is already registered",
                entry.table_id
            )));
        }
        let idx = inner.tables.len();
        inner.by_id.insert(entry.table_id, idx);
        inner.tables.push(entry);
        Ok(())
    }

    /// Register an external table, offsetting the metastore-issued id so it
    /// cannot collide with managed ids.
    pub fn register_external_table(
        &self,
        catalog: impl Into<String>,
        schema: impl Into<String>,
        name: impl Into<String>,
        metastore_table_id: i64,
        schema_id: i64,
        columns: Vec<ColumnInfo>,
    ) -> LakegateResult<()> {
        self.register_table(TableEntry {
            catalog: catalog.into(),
            schema: schema.into(),
            name: name.into(),
            table_id: metastore_table_id + EXTERNAL_TABLE_ID_OFFSET,
            schema_id,
            is_external: true,
            columns,
        })
    }

    /// Remove a table by id.
    pub fn unregister_table(&self, table_id: i64) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        let Some(idx) = inner.by_id.remove(&table_id) else {
            return Err(LakegateError::not_found(format!("table id {table_id}")));
        };
        inner.tables.remove(idx);
        // Rebuild the index map after the removal shifted positions.
        inner.by_id = inner
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.table_id, i))
            .collect();
        Ok(())
    }

    /// Resolve a possibly-qualified table name.
    ///
    /// Accepts `table`, `schema.table`, and `catalog.schema.table`. A bare
    /// name must resolve uniquely across all schemas.
    pub fn lookup(&self, name: &str) -> LakegateResult<TableHandle> {
        let inner = self.inner.read();
        let parts: Vec<&str> = name.split('.').collect();

        let matches: Vec<&TableEntry> = match parts.as_slice() {
            [table] => inner.tables.iter().filter(|t| t.name == *table).collect(),
            [schema, table] => inner
                .tables
                .iter()
                .filter(|t| t.schema == *schema && t.name == *table)
                .collect(),
            [catalog, schema, table] => inner
                .tables
                .iter()
                .filter(|t| t.catalog == *catalog && t.schema == *schema && t.name == *table)
                .collect(),
            _ => {
                return Err(LakegateError::validation(format!(
                    "malformed table name '{name}'"
                )));
            }
        };

        match matches.as_slice() {
            [] => Err(LakegateError::not_found(format!("table '{name}'"))),
            [entry] => Ok(entry.handle()),
            _ => Err(LakegateError::validation(format!(
                "table name '{name}' is ambiguous across schemas"
            ))),
        }
    }

    /// Column names of a table in position order.
    pub fn column_names(&self, table_id: i64) -> LakegateResult<Vec<String>> {
        let inner = self.inner.read();
        let idx = inner
            .by_id
            .get(&table_id)
            .ok_or_else(|| LakegateError::not_found(format!("table id {table_id}")))?;
        Ok(inner.tables[*idx].columns.iter().map(|c| c.name.clone()).collect())
    }

    /// Full entry for a table id.
    pub fn entry(&self, table_id: i64) -> LakegateResult<TableEntry> {
        let inner = self.inner.read();
        let idx = inner
            .by_id
            .get(&table_id)
            .ok_or_else(|| LakegateError::not_found(format!("table id {table_id}")))?;
        Ok(inner.tables[*idx].clone())
    }

    /// All tables of one catalog, for information-schema virtualization.
    pub fn tables_of_catalog(&self, catalog: &str) -> Vec<TableEntry> {
        self.inner
            .read()
            .tables
            .iter()
            .filter(|t| t.catalog == catalog)
            .cloned()
            .collect()
    }

    /// Distinct `(schema, schema_id)` pairs of one catalog.
    pub fn schemas_of_catalog(&self, catalog: &str) -> Vec<(String, i64)> {
        let inner = self.inner.read();
        let mut out: Vec<(String, i64)> = Vec::new();
        for t in inner.tables.iter().filter(|t| t.catalog == catalog) {
            if !out.iter().any(|(s, _)| s == &t.schema) {
                out.push((t.schema.clone(), t.schema_id));
            }
        }
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(schema: &str, name: &str, id: i64) -> TableEntry {
        TableEntry {
            catalog: "lake".into(),
            schema: schema.into(),
            name: name.into(),
            table_id: id,
            schema_id: 1,
            is_external: false,
            columns: vec![ColumnInfo::new("id", "BIGINT")],
        }
    }

    #[test]
    fn test_lookup_qualified_and_bare() {
        let registry = CatalogRegistry::new();
        registry.register_table(entry("main", "orders", 1)).unwrap();
        registry.register_table(entry("staging", "events", 2)).unwrap();

        assert_eq!(registry.lookup("orders").unwrap().table_id, 1);
        assert_eq!(registry.lookup("main.orders").unwrap().table_id, 1);
        assert_eq!(registry.lookup("lake.staging.events").unwrap().table_id, 2);
        assert!(registry.lookup("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_bare_lookup_must_be_unique() {
        let registry = CatalogRegistry::new();
        registry.register_table(entry("a", "orders", 1)).unwrap();
        registry.register_table(entry("b", "orders", 2)).unwrap();

        let err = registry.lookup("orders").unwrap_err();
        assert!(err.is_validation());
        // Qualification disambiguates.
        assert_eq!(registry.lookup("b.orders").unwrap().table_id, 2);
    }

    #[test]
    fn test_external_offset_applied() {
        let registry = CatalogRegistry::new();
        registry
            .register_external_table("lake", "ext", "files", 42, 7, vec![])
            .unwrap();

        let handle = registry.lookup("ext.files").unwrap();
        assert!(handle.is_external);
        assert_eq!(handle.table_id, 10_000_042);
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let registry = CatalogRegistry::new();
        registry.register_table(entry("main", "orders", 1)).unwrap();
        let err = registry.register_table(entry("main", "orders", 9)).unwrap_err();
        assert!(err.is_conflict());
    }
}
