//! Concurrency and RBAC tests for the information-schema virtualizer.

use std::sync::Arc;

use lakegate_auth::{AuthEvaluator, AuthStore, CatalogRegistry, ColumnInfo, TableEntry};
use lakegate_core::{
    AttachedCatalog, AuthorizationService, CatalogAttacher, CatalogRegistration, CatalogStatus,
    GranteeType, LakegateResult, MemoryAuditRepository, MetastoreType, Principal, Privilege,
    PrivilegeGrant, QueryEngine, SecurableType, CATALOG_SECURABLE_ID,
};
use lakegate_duckdb::{DuckDbConfig, DuckDbPool};
use lakegate_query::SecureQueryPipeline;
use pretty_assertions::assert_eq;

/// Catalog directory stub: the engine-side ATTACH already happened
/// elsewhere; the virtualizer only needs the directory listing.
struct StaticCatalogs(Vec<AttachedCatalog>);

#[async_trait::async_trait]
impl CatalogAttacher for StaticCatalogs {
    async fn attach(&self, _registration: CatalogRegistration) -> LakegateResult<()> {
        Ok(())
    }
    async fn detach(&self, _name: &str) -> LakegateResult<()> {
        Ok(())
    }
    async fn set_default(&self, _name: &str) -> LakegateResult<()> {
        Ok(())
    }
    fn list_attached(&self) -> Vec<AttachedCatalog> {
        self.0.clone()
    }
}

fn lake_catalog() -> AttachedCatalog {
    AttachedCatalog {
        registration: CatalogRegistration {
            name: "lake".into(),
            metastore_type: MetastoreType::Sqlite,
            dsn: "meta.sqlite".into(),
            data_path: "/data".into(),
        },
        status: CatalogStatus::Active,
        is_default: true,
    }
}

async fn pipeline_fixture() -> (Arc<SecureQueryPipeline>, Arc<AuthStore>) {
    let pool = DuckDbPool::new(DuckDbConfig::in_memory()).await.unwrap();
    let store = Arc::new(AuthStore::new());
    let registry = Arc::new(CatalogRegistry::new());

    for (name, id) in [("orders", 1i64), ("customers", 2i64)] {
        registry
            .register_table(TableEntry {
                catalog: "lake".into(),
                schema: "main".into(),
                name: name.into(),
                table_id: id,
                schema_id: 10,
                is_external: false,
                columns: vec![ColumnInfo::new("id", "BIGINT")],
            })
            .unwrap();
    }

    store
        .create_principal(Principal::new_user("root").admin())
        .unwrap();
    store.create_principal(Principal::new_user("alice")).unwrap();

    let evaluator = Arc::new(AuthEvaluator::new(store.clone(), registry.clone()));
    let pipeline = Arc::new(SecureQueryPipeline::new(
        evaluator as Arc<dyn AuthorizationService>,
        pool,
        Arc::new(MemoryAuditRepository::new()),
        Arc::new(StaticCatalogs(vec![lake_catalog()])),
        registry,
    ));
    (pipeline, store)
}

#[tokio::test]
async fn test_admin_sees_all_table_rows() {
    let (pipeline, _store) = pipeline_fixture().await;

    let rows = pipeline
        .query(
            "root",
            "SELECT table_name FROM information_schema.tables ORDER BY table_name",
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.rows[0]["table_name"], serde_json::json!("customers"));
    assert_eq!(rows.rows[1]["table_name"], serde_json::json!("orders"));
}

#[tokio::test]
async fn test_rows_filtered_by_privilege() {
    let (pipeline, store) = pipeline_fixture().await;

    let alice = store.principal_by_name("alice").unwrap();
    for (securable_type, securable_id, privilege) in [
        (SecurableType::Table, "1", Privilege::Select),
        (SecurableType::Schema, "10", Privilege::Usage),
        (
            SecurableType::Catalog,
            CATALOG_SECURABLE_ID,
            Privilege::Usage,
        ),
    ] {
        store
            .create_grant(PrivilegeGrant {
                principal_id: alice.id.clone(),
                principal_type: GranteeType::User,
                securable_type,
                securable_id: securable_id.into(),
                privilege,
            })
            .unwrap();
    }

    let rows = pipeline
        .query(
            "alice",
            "SELECT table_name FROM information_schema.tables",
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.rows[0]["table_name"], serde_json::json!("orders"));

    // Schemata rows gate on schema USAGE.
    let rows = pipeline
        .query(
            "alice",
            "SELECT schema_name FROM information_schema.schemata",
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    // Column rows follow table visibility.
    let rows = pipeline
        .query(
            "alice",
            "SELECT column_name, data_type FROM information_schema.columns",
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.rows[0]["data_type"], serde_json::json!("BIGINT"));
}

#[tokio::test]
async fn test_ten_concurrent_virtualized_queries() {
    let (pipeline, _store) = pipeline_fixture().await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .query(
                    "root",
                    "SELECT table_name FROM information_schema.tables ORDER BY table_name",
                )
                .await
        }));
    }

    for handle in handles {
        let rows = handle.await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
    }
}

#[tokio::test]
async fn test_write_against_info_schema_rejected() {
    let (pipeline, _store) = pipeline_fixture().await;
    let err = pipeline
        .query(
            "root",
            "DELETE FROM information_schema.tables WHERE table_name = 'orders'",
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}
