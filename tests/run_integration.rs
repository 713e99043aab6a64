//! End-to-end tests for model runs through the assembled service.

use lakegate::LakegateService;
use lakegate_auth::ColumnInfo;
use lakegate_core::{
    LakegateResult, Materialization, Model, NotebookProvider, Principal, RunRequest, RunStatus,
    StepStatus,
};
use lakegate_duckdb::DuckDbConfig;
use pretty_assertions::assert_eq;

async fn service() -> LakegateService {
    let service = LakegateService::connect(DuckDbConfig::in_memory())
        .await
        .unwrap();
    service
        .create_principal(Principal::new_user("root").admin())
        .unwrap();
    service
}

fn request() -> RunRequest {
    RunRequest::new("memory", "main")
}

#[tokio::test]
async fn test_chain_run_tiers_and_failure_skip() {
    let service = service().await;

    service
        .create_model(Model::new(
            "p",
            "a",
            "SELECT 1 AS id",
            Materialization::Table,
        ))
        .unwrap();
    service
        .create_model(Model::new(
            "p",
            "b",
            "SELECT no_such_column FROM {{ ref('a') }}",
            Materialization::Table,
        ))
        .unwrap();
    service
        .create_model(Model::new(
            "p",
            "c",
            "SELECT * FROM {{ ref('b') }}",
            Materialization::Table,
        ))
        .unwrap();

    let mut req = request();
    req.selector = "+c".into();
    let run = service.trigger_run_sync("root", req).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);

    let steps = service.list_run_steps(&run.id);
    assert_eq!(
        steps
            .iter()
            .map(|s| (s.model_name.as_str(), s.tier, s.status))
            .collect::<Vec<_>>(),
        vec![
            ("p.a", 0, StepStatus::Success),
            ("p.b", 1, StepStatus::Failed),
            ("p.c", 2, StepStatus::Skipped),
        ]
    );
    assert!(steps[1].error_message.is_some());
}

#[tokio::test]
async fn test_incremental_merge_through_governed_path() {
    let service = service().await;

    {
        let conn = service.pool().pin().await.unwrap();
        conn.execute_batch(
            "CREATE TABLE source_rows (id BIGINT, v BIGINT); \
             INSERT INTO source_rows VALUES (1, 10), (2, 20)",
        )
        .await
        .unwrap();
    }
    service.catalog_registry().sync_table(
        "memory",
        "main",
        "source_rows",
        vec![ColumnInfo::new("id", "BIGINT"), ColumnInfo::new("v", "BIGINT")],
    );

    let mut model = Model::new(
        "p",
        "inc",
        "SELECT * FROM source_rows",
        Materialization::Incremental,
    );
    model.config.unique_key = vec!["id".into()];
    service.create_model(model).unwrap();

    let run = service.trigger_run_sync("root", request()).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(service.list_run_steps(&run.id)[0].rows_affected, Some(2));

    {
        let conn = service.pool().pin().await.unwrap();
        conn.execute_batch(
            "DELETE FROM source_rows; INSERT INTO source_rows VALUES (2, 200), (3, 30)",
        )
        .await
        .unwrap();
    }

    let run = service.trigger_run_sync("root", request()).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(service.list_run_steps(&run.id)[0].rows_affected, Some(3));

    // Merging the same source again changes nothing.
    let run = service.trigger_run_sync("root", request()).await.unwrap();
    assert_eq!(service.list_run_steps(&run.id)[0].rows_affected, Some(3));

    let rows = service
        .query("root", "SELECT id, v FROM \"memory\".\"main\".\"inc\" ORDER BY id")
        .await
        .unwrap();
    let values: Vec<(i64, i64)> = rows
        .rows
        .iter()
        .map(|r| (r["id"].as_i64().unwrap(), r["v"].as_i64().unwrap()))
        .collect();
    assert_eq!(values, vec![(1, 10), (2, 200), (3, 30)]);
}

#[tokio::test]
async fn test_state_modified_selector_after_success() {
    let service = service().await;
    service
        .create_model(Model::new(
            "p",
            "stable",
            "SELECT 1 AS id",
            Materialization::Table,
        ))
        .unwrap();

    let run = service.trigger_run_sync("root", request()).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);

    // Nothing changed since the last successful run.
    let mut req = request();
    req.selector = "state:modified".into();
    let err = service.trigger_run_sync("root", req).await.unwrap_err();
    assert!(err.is_validation());

    // Changing the model SQL makes it modified again.
    let mut changed = service.get_model("p.stable").unwrap();
    changed.sql = "SELECT 2 AS id".into();
    service.update_model(changed).unwrap();

    let mut req = request();
    req.selector = "state:modified".into();
    let run = service.trigger_run_sync("root", req).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(service.list_run_steps(&run.id).len(), 1);
}

#[tokio::test]
async fn test_trigger_run_background_completes() {
    let service = service().await;
    service
        .create_model(Model::new(
            "p",
            "bg",
            "SELECT 7 AS id",
            Materialization::Table,
        ))
        .unwrap();

    let run = service.trigger_run("root", request()).await.unwrap();

    // Poll until the background task finishes.
    let mut status = run.status;
    for _ in 0..100 {
        status = service.list_runs()[0].status;
        if matches!(status, RunStatus::Success | RunStatus::Failed) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(status, RunStatus::Success);
}

struct StubNotebook;

#[async_trait::async_trait]
impl NotebookProvider for StubNotebook {
    async fn get_sql_blocks(&self, _notebook_id: &str) -> LakegateResult<Vec<String>> {
        Ok(vec![
            "SELECT 1 AS id".to_string(),
            "SELECT * FROM {{ ref('nb_1') }}".to_string(),
        ])
    }
}

#[tokio::test]
async fn test_promote_notebook_creates_view_models() {
    let service = service().await;

    let created = service
        .promote_notebook(&StubNotebook, "root", "nb-123", "analytics", "nb")
        .await
        .unwrap();

    assert_eq!(created.len(), 2);
    assert_eq!(created[0].name, "nb_1");
    assert_eq!(created[1].name, "nb_2");
    assert!(created
        .iter()
        .all(|m| m.materialization == Materialization::View));
    assert_eq!(service.list_models().len(), 2);
}
