//! End-to-end tests for the secure query pipeline.

use std::sync::Arc;

use lakegate::LakegateService;
use lakegate_auth::{ColumnInfo, TableEntry};
use lakegate_core::{
    AuditStatus, ColumnMask, ColumnMaskBinding, GranteeType, Group, GroupMember,
    MemberType, MemoryAuditRepository, Principal, Privilege, PrivilegeGrant, RowFilter,
    RowFilterBinding, SecurableType, CATALOG_SECURABLE_ID,
};
use lakegate_duckdb::DuckDbConfig;
use pretty_assertions::assert_eq;

struct Fixture {
    service: LakegateService,
    audit: Arc<MemoryAuditRepository>,
    analysts_id: String,
}

/// Titanic-shaped table with grants for `first_class_analyst` via the
/// `analysts` group, plus an ungranted `no_access` principal and an admin.
async fn fixture() -> Fixture {
    let audit = Arc::new(MemoryAuditRepository::new());
    let service = LakegateService::connect_with_audit(DuckDbConfig::in_memory(), audit.clone())
        .await
        .unwrap();

    {
        let conn = service.pool().pin().await.unwrap();
        conn.execute_batch(
            "CREATE TABLE titanic (\"PassengerId\" BIGINT, \"Pclass\" BIGINT, \"Name\" VARCHAR); \
             INSERT INTO titanic VALUES \
             (1, 1, 'Owen'), (2, 2, 'Florence'), (3, 1, 'Laina'), (4, 3, 'Lily')",
        )
        .await
        .unwrap();
    }

    service
        .catalog_registry()
        .register_table(TableEntry {
            catalog: "memory".into(),
            schema: "main".into(),
            name: "titanic".into(),
            table_id: 1,
            schema_id: 10,
            is_external: false,
            columns: vec![
                ColumnInfo::new("PassengerId", "BIGINT"),
                ColumnInfo::new("Pclass", "BIGINT"),
                ColumnInfo::new("Name", "VARCHAR"),
            ],
        })
        .unwrap();

    service
        .create_principal(Principal::new_user("root").admin())
        .unwrap();
    service
        .create_principal(Principal::new_user("no_access"))
        .unwrap();
    let analyst = Principal::new_user("first_class_analyst");
    service.create_principal(analyst.clone()).unwrap();

    let auth = service.auth_store();
    let analysts = Group::new("analysts", "first-class analysts");
    auth.create_group(analysts.clone()).unwrap();
    auth.add_group_member(GroupMember {
        group_id: analysts.id.clone(),
        member_type: MemberType::User,
        member_id: analyst.id.clone(),
    })
    .unwrap();

    for (securable_type, securable_id, privilege) in [
        (SecurableType::Table, "1", Privilege::Select),
        (SecurableType::Schema, "10", Privilege::Usage),
        (
            SecurableType::Catalog,
            CATALOG_SECURABLE_ID,
            Privilege::Usage,
        ),
    ] {
        auth.create_grant(PrivilegeGrant {
            principal_id: analysts.id.clone(),
            principal_type: GranteeType::Group,
            securable_type,
            securable_id: securable_id.into(),
            privilege,
        })
        .unwrap();
    }

    auth.create_row_filter(RowFilter {
        id: "0001".into(),
        table_id: 1,
        filter_sql: "\"Pclass\" = 1".into(),
        description: "first class only".into(),
    })
    .unwrap();
    auth.bind_row_filter(RowFilterBinding {
        row_filter_id: "0001".into(),
        principal_id: analysts.id.clone(),
        principal_type: GranteeType::Group,
    })
    .unwrap();

    Fixture {
        service,
        audit,
        analysts_id: analysts.id,
    }
}

#[tokio::test]
async fn test_row_filter_restricts_analyst_rows() {
    let f = fixture().await;

    let rows = f
        .service
        .query("first_class_analyst", "SELECT \"Pclass\" FROM titanic")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows.rows {
        assert_eq!(row["Pclass"], serde_json::json!(1));
    }

    let analyst_count = f
        .service
        .query("first_class_analyst", "SELECT count(*) FROM titanic")
        .await
        .unwrap()
        .scalar_i64()
        .unwrap();
    let admin_count = f
        .service
        .query("root", "SELECT count(*) FROM titanic")
        .await
        .unwrap()
        .scalar_i64()
        .unwrap();
    assert_eq!(admin_count, 4);
    assert!(analyst_count < admin_count);
    assert_eq!(analyst_count, 2);
}

#[tokio::test]
async fn test_denied_principal_gets_audited_denial() {
    let f = fixture().await;

    let err = f
        .service
        .query("no_access", "SELECT * FROM titanic LIMIT 10")
        .await
        .unwrap_err();
    assert!(err.is_access_denied());

    let event = f.audit.last().unwrap();
    assert_eq!(event.status, AuditStatus::Denied);
    assert_eq!(event.action, "SELECT");
    assert_eq!(event.tables_accessed, vec!["titanic"]);
    assert_eq!(event.principal_name, "no_access");
}

#[tokio::test]
async fn test_multi_statement_rejected_even_for_admin() {
    let f = fixture().await;

    let err = f
        .service
        .query("root", "SELECT 1; DROP TABLE titanic")
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("multi-statement"));

    // Nothing executed.
    let count = f
        .service
        .query("root", "SELECT count(*) FROM titanic")
        .await
        .unwrap()
        .scalar_i64()
        .unwrap();
    assert_eq!(count, 4);
}

#[tokio::test]
async fn test_ddl_through_gateway_always_fails() {
    let f = fixture().await;
    let err = f
        .service
        .query("root", "CREATE TABLE sneaky (id INTEGER)")
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("DDL"));
}

#[tokio::test]
async fn test_bare_constant_select_is_open() {
    let f = fixture().await;
    let rows = f
        .service
        .query("no_access", "SELECT 1 + 1 AS two")
        .await
        .unwrap();
    assert_eq!(rows.scalar_i64(), Some(2));
}

#[tokio::test]
async fn test_function_source_needs_catalog_privilege() {
    let f = fixture().await;
    let err = f
        .service
        .query(
            "first_class_analyst",
            "SELECT * FROM read_parquet('secret.parquet')",
        )
        .await
        .unwrap_err();
    assert!(err.is_access_denied());
}

#[tokio::test]
async fn test_star_expansion_applies_masks_in_catalog_order() {
    let f = fixture().await;

    let auth = f.service.auth_store();
    auth.create_column_mask(ColumnMask {
        id: "0001".into(),
        table_id: 1,
        column_name: "Name".into(),
        mask_expression: "md5(\"Name\")".into(),
    })
    .unwrap();
    auth.bind_column_mask(ColumnMaskBinding {
        column_mask_id: "0001".into(),
        principal_id: f.analysts_id.clone(),
        principal_type: GranteeType::Group,
        see_original: false,
    })
    .unwrap();

    let rows = f
        .service
        .query("first_class_analyst", "SELECT * FROM titanic")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let first = rows.rows[0].as_object().unwrap();
    let keys: Vec<&String> = first.keys().collect();
    assert_eq!(keys, vec!["PassengerId", "Pclass", "Name"]);
    // md5('Owen') is a 32-char hex digest, not the raw name.
    let masked = first["Name"].as_str().unwrap();
    assert_eq!(masked.len(), 32);
    assert_ne!(masked, "Owen");

    // Admin sees originals.
    let admin_rows = f
        .service
        .query("root", "SELECT \"Name\" FROM titanic ORDER BY \"PassengerId\" LIMIT 1")
        .await
        .unwrap();
    assert_eq!(admin_rows.rows[0]["Name"], serde_json::json!("Owen"));
}

#[tokio::test]
async fn test_unknown_principal_rejected() {
    let f = fixture().await;
    let err = f.service.query("ghost", "SELECT 1").await.unwrap_err();
    assert!(err.is_not_found());
}
