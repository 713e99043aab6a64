//! Run scheduling and execution.
//!
//! Tiers execute strictly in order. A step failure lets the rest of its tier
//! run and records every later tier as SKIPPED. Cancellation is
//! message-passing: each in-flight run holds a handle in a process-wide
//! registry; once signalled, every step that has not started becomes
//! CANCELLED. Panics inside a step are captured into a FAILED step rather
//! than poisoning the run loop. Run status resolves CANCELLED > FAILED >
//! SUCCESS.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use lakegate_auth::CatalogRegistry;
use lakegate_core::{
    CompileManifest, LakegateError, LakegateResult, ManifestEntry, Model, ModelRun, ModelRunner,
    RunRequest, RunStatus, StepStatus,
};
use lakegate_duckdb::DuckDbPool;
use lakegate_query::SessionEngine;

use crate::compile::{fqn, CompileContext, CompiledModel, ModelCompiler};
use crate::contract::validate_contract;
use crate::dag::ModelDag;
use crate::datatest::execute_test;
use crate::ephemeral::inline_ephemerals;
use crate::materialize::Materializer;
use crate::selector::{select_models, SelectionInput};
use crate::store::{new_step, ModelStore};

/// Process-wide registry of cancellation handles keyed by run id.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    inner: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and get the receiving side of its handle.
    pub fn register(&self, run_id: &str) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.inner.lock().insert(run_id.to_owned(), tx);
        rx
    }

    /// Signal and remove a run's handle. Returns false when the run is not
    /// in flight.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.inner.lock().remove(run_id) {
            Some(tx) => {
                let _ = tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Drop a finished run's handle.
    pub fn deregister(&self, run_id: &str) {
        self.inner.lock().remove(run_id);
    }
}

/// A scheduled run whose steps exist but have not started.
pub struct PlannedRun {
    run: ModelRun,
    tiers: Vec<Vec<String>>,
    step_ids: BTreeMap<String, String>,
    models_by_name: BTreeMap<String, Model>,
    compiled: BTreeMap<String, CompiledModel>,
    request: RunRequest,
    principal: String,
}

impl PlannedRun {
    /// The run row as created (PENDING).
    pub fn run(&self) -> &ModelRun {
        &self.run
    }
}

/// Allocate a run row in PENDING.
pub fn new_run(principal_name: &str, request: &RunRequest) -> ModelRun {
    ModelRun {
        id: Uuid::now_v7().to_string(),
        status: RunStatus::Pending,
        trigger_type: request.trigger_type,
        triggered_by: principal_name.to_owned(),
        target_catalog: request.target_catalog.clone(),
        target_schema: request.target_schema.clone(),
        selector: request.selector.clone(),
        variables: request.variables.clone(),
        full_refresh: request.full_refresh,
        compile_manifest: None,
        created_at: Utc::now(),
        finished_at: None,
    }
}

/// Walks tiers and materializes the selected models.
pub struct RunExecutor {
    pool: DuckDbPool,
    store: Arc<ModelStore>,
    engine: Option<Arc<dyn SessionEngine>>,
    registry: Option<Arc<CatalogRegistry>>,
    cancels: Arc<CancelRegistry>,
}

impl RunExecutor {
    pub fn new(pool: DuckDbPool, store: Arc<ModelStore>) -> Self {
        Self {
            pool,
            store,
            engine: None,
            registry: None,
            cancels: Arc::new(CancelRegistry::new()),
        }
    }

    /// Route model DML through the secure pipeline as the triggering
    /// principal.
    pub fn with_engine(mut self, engine: Arc<dyn SessionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sync materialized targets into the catalog registry.
    pub fn with_registry(mut self, registry: Arc<CatalogRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cancel_registry(&self) -> Arc<CancelRegistry> {
        self.cancels.clone()
    }

    /// Signal cancellation of an in-flight run.
    pub fn cancel_run(&self, run_id: &str) -> LakegateResult<()> {
        if self.cancels.cancel(run_id) {
            info!(run_id = %run_id, "Run cancellation requested");
            Ok(())
        } else {
            Err(LakegateError::not_found(format!(
                "no in-flight run '{run_id}'"
            )))
        }
    }

    /// Compile, select, schedule, and execute a run to completion.
    #[instrument(skip(self, request), fields(principal = %principal_name, selector = %request.selector))]
    pub async fn run_sync(
        &self,
        principal_name: &str,
        request: RunRequest,
    ) -> LakegateResult<ModelRun> {
        let planned = self.plan(principal_name, request).await?;
        self.execute_planned(planned).await
    }

    /// Compile, select, and schedule a run: the run row and its PENDING
    /// steps exist once this returns. Validation failures (bad selector,
    /// cycles, compile errors) surface here, before anything durable is
    /// created.
    pub async fn plan(
        &self,
        principal_name: &str,
        request: RunRequest,
    ) -> LakegateResult<PlannedRun> {
        let models = self.store.list_models();
        if models.is_empty() {
            return Err(LakegateError::validation("no models to run"));
        }

        // Compile everything up front: the manifest and state:modified need
        // hashes for the full model set.
        let mut models_by_name: BTreeMap<String, Model> = BTreeMap::new();
        let mut compiled: BTreeMap<String, CompiledModel> = BTreeMap::new();
        let compiler = ModelCompiler::new(&models);
        for model in &models {
            let context = self.context_for(model, &request);
            let unit = compiler
                .compile(model, &context)
                .map_err(|e| e.with_context(&format!("compile '{}'", model.qualified_name())))?;
            compiled.insert(model.qualified_name(), unit);
            models_by_name.insert(model.qualified_name(), model.clone());
        }

        inline_ephemerals(&models_by_name, &mut compiled)?;

        // The execution graph excludes ephemerals entirely.
        let exec_models: Vec<&Model> = models
            .iter()
            .filter(|m| m.materialization != lakegate_core::Materialization::Ephemeral)
            .collect();
        let edges: Vec<(String, Vec<String>)> = exec_models
            .iter()
            .map(|m| {
                (
                    m.qualified_name(),
                    compiled[&m.qualified_name()].depends_on.clone(),
                )
            })
            .collect();
        let dag = ModelDag::build(edges.iter().map(|(n, d)| (n.as_str(), d.as_slice())))?;

        let previous_manifest = self.store.last_successful_manifest();
        let hashes = |name: &str| compiled.get(name).map(|c| c.compiled_hash.clone());
        let selection = select_models(
            &request.selector,
            &SelectionInput {
                models: &models,
                dag: &dag,
                current_hashes: &hashes,
                previous_manifest: previous_manifest.as_ref(),
            },
        )?;
        let selected: BTreeSet<String> = selection
            .into_iter()
            .filter(|name| {
                models_by_name[name].materialization != lakegate_core::Materialization::Ephemeral
            })
            .collect();
        if selected.is_empty() {
            return Err(LakegateError::validation(format!(
                "selector '{}' matches no executable models",
                request.selector
            )));
        }

        // Tier the selected sub-DAG; edges leaving the selection drop away.
        let sub_edges: Vec<(String, Vec<String>)> = selected
            .iter()
            .map(|name| {
                let deps = compiled[name]
                    .depends_on
                    .iter()
                    .filter(|d| selected.contains(*d))
                    .cloned()
                    .collect();
                (name.clone(), deps)
            })
            .collect();
        let sub_dag = ModelDag::build(sub_edges.iter().map(|(n, d)| (n.as_str(), d.as_slice())))?;
        let tiers = sub_dag.tiers()?;

        // Only now does anything durable get created.
        let run = self.store.insert_run(new_run(principal_name, &request));
        let manifest = CompileManifest::new(
            compiled
                .iter()
                .map(|(name, unit)| ManifestEntry {
                    model_name: name.clone(),
                    compiled_hash: unit.compiled_hash.clone(),
                    depends_on: unit.depends_on.clone(),
                    vars_used: unit.vars_used.clone(),
                    macros_used: unit.macros_used.clone(),
                })
                .collect(),
        );
        self.store.set_run_manifest(&run.id, &manifest)?;

        let mut step_ids: BTreeMap<String, String> = BTreeMap::new();
        for (tier_index, tier) in tiers.iter().enumerate() {
            for name in tier {
                let model = &models_by_name[name];
                let unit = &compiled[name];
                let mut step = new_step(&run.id, model, tier_index);
                step.compiled_sql = Some(unit.rendered_sql.clone());
                step.compiled_hash = Some(unit.compiled_hash.clone());
                step.depends_on = unit.depends_on.clone();
                step.vars_used = unit.vars_used.clone();
                step.macros_used = unit.macros_used.clone();
                let step = self.store.insert_step(step);
                step_ids.insert(name.clone(), step.id);
            }
        }

        Ok(PlannedRun {
            run,
            tiers,
            step_ids,
            models_by_name,
            compiled,
            request,
            principal: principal_name.to_owned(),
        })
    }

    /// Walk a planned run's tiers to completion.
    pub async fn execute_planned(&self, planned: PlannedRun) -> LakegateResult<ModelRun> {
        let PlannedRun {
            run,
            tiers,
            step_ids,
            models_by_name,
            compiled,
            request,
            principal,
        } = planned;
        let principal_name = principal.as_str();

        self.store.set_run_status(&run.id, RunStatus::Running)?;
        let cancel_rx = self.cancels.register(&run.id);
        info!(run_id = %run.id, tiers = tiers.len(), "Run started");

        let mut run_failed = false;
        let mut run_cancelled = false;

        for tier in &tiers {
            // A failure in an earlier tier skips this whole tier; a failure
            // inside this tier lets its remaining members run.
            let skip_tier = run_failed;
            let mut tier_failed = false;

            for name in tier {
                let step_id = step_ids[name].clone();

                if run_cancelled || *cancel_rx.borrow() {
                    run_cancelled = true;
                    self.store.set_step_status(&step_id, StepStatus::Cancelled)?;
                    continue;
                }
                if skip_tier {
                    self.store.set_step_status(&step_id, StepStatus::Skipped)?;
                    continue;
                }

                self.store.set_step_status(&step_id, StepStatus::Running)?;
                let outcome = self
                    .execute_step(principal_name, &run.id, &models_by_name[name], &compiled[name], &request)
                    .await;

                match outcome {
                    Ok(rows_affected) => {
                        self.store.update_step(&step_id, |step| {
                            step.status = StepStatus::Success;
                            step.rows_affected = rows_affected;
                        })?;
                    }
                    Err(e) => {
                        error!(model = %name, error = %e, "Step failed");
                        self.store.update_step(&step_id, |step| {
                            step.status = StepStatus::Failed;
                            step.error_message = Some(e.to_string());
                        })?;
                        tier_failed = true;
                    }
                }
            }

            run_failed = run_failed || tier_failed;
        }

        let final_status = if run_cancelled {
            RunStatus::Cancelled
        } else if run_failed {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        self.store.set_run_status(&run.id, final_status)?;
        self.cancels.deregister(&run.id);
        info!(run_id = %run.id, status = ?final_status, "Run finished");

        self.store.get_run(&run.id)
    }

    fn context_for(&self, model: &Model, request: &RunRequest) -> CompileContext {
        CompileContext {
            target_catalog: request.target_catalog.clone(),
            target_schema: request.target_schema.clone(),
            vars: request.variables.clone(),
            full_refresh: request.full_refresh,
            project_name: model.project_name.clone(),
            model_name: model.name.clone(),
            materialization: model.materialization,
        }
    }

    /// Materialize one model and run its post-materialization validation.
    /// Panics inside the step are captured into an error.
    async fn execute_step(
        &self,
        principal_name: &str,
        run_id: &str,
        model: &Model,
        unit: &CompiledModel,
        request: &RunRequest,
    ) -> LakegateResult<Option<i64>> {
        let pool = self.pool.clone();
        let store = self.store.clone();
        let engine = self.engine.clone();
        let registry = self.registry.clone();
        let model = model.clone();
        let unit = unit.clone();
        let request = request.clone();
        let principal = principal_name.to_owned();
        let run_id = run_id.to_owned();
        let context = self.context_for(&model, &request);
        let macros = store.list_macros();

        let handle = tokio::spawn(async move {
            step_body(
                pool, store, engine, registry, model, unit, context, macros, principal, run_id,
            )
            .await
        });

        match handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                Err(LakegateError::internal(format!("step panicked: {message}")))
            }
            Err(join_error) => Err(LakegateError::internal(format!(
                "step task failed: {join_error}"
            ))),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn step_body(
    pool: DuckDbPool,
    store: Arc<ModelStore>,
    engine: Option<Arc<dyn SessionEngine>>,
    registry: Option<Arc<CatalogRegistry>>,
    model: Model,
    unit: CompiledModel,
    context: CompileContext,
    macros: Vec<lakegate_core::Macro>,
    principal: String,
    run_id: String,
) -> LakegateResult<Option<i64>> {
    // Materialization session.
    let rows_affected = {
        let conn = pool.pin().await.map_err(LakegateError::from)?;
        let mut materializer = Materializer::new(&conn, &context, &macros);
        if let Some(engine) = engine.as_deref() {
            materializer = materializer.with_engine(engine, &principal);
        }
        if let Some(registry) = registry.as_deref() {
            materializer = materializer.with_registry(registry);
        }
        materializer.prepare_session().await?;
        let outcome = materializer.materialize(&model, &unit.rendered_sql).await?;
        outcome.rows_affected
        // Connection releases here; validation must not share it.
    };

    // Validation session.
    let validation_conn = pool.pin().await.map_err(LakegateError::from)?;

    if let Some(contract) = &model.contract {
        validate_contract(
            &validation_conn,
            &context.target_catalog,
            &context.target_schema,
            &model.name,
            contract,
        )
        .await?;
    }

    let target = fqn(&context.target_catalog, &context.target_schema, &model.name);
    let mut failed_tests = Vec::new();
    for test in store.list_tests(Some(&model.qualified_name())) {
        let result = execute_test(&validation_conn, &test, &run_id, &target).await;
        if !result.passed {
            failed_tests.push(format!(
                "{} ({} failing rows)",
                result.test_kind, result.failing_rows
            ));
        }
        store.record_test_result(result);
    }
    if !failed_tests.is_empty() {
        return Err(LakegateError::validation(format!(
            "data tests failed on '{}': {}",
            model.qualified_name(),
            failed_tests.join("; ")
        )));
    }

    if rows_affected.is_none() {
        warn!(model = %model.qualified_name(), "No row count reported");
    }
    Ok(rows_affected)
}

#[async_trait::async_trait]
impl ModelRunner for RunExecutor {
    async fn trigger_run_sync(
        &self,
        principal_name: &str,
        request: RunRequest,
    ) -> LakegateResult<ModelRun> {
        self.run_sync(principal_name, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakegate_core::{Materialization, TestKind};
    use lakegate_duckdb::DuckDbConfig;
    use pretty_assertions::assert_eq;

    async fn fixture() -> (RunExecutor, Arc<ModelStore>) {
        let pool = DuckDbPool::new(DuckDbConfig::in_memory()).await.unwrap();
        let store = Arc::new(ModelStore::new());
        (RunExecutor::new(pool, store.clone()), store)
    }

    fn request() -> RunRequest {
        RunRequest::new("memory", "main")
    }

    fn chain_models(store: &ModelStore) {
        store
            .create_model(Model::new(
                "p",
                "a",
                "SELECT 1 AS id, 'x' AS tag",
                Materialization::Table,
            ))
            .unwrap();
        store
            .create_model(Model::new(
                "p",
                "b",
                "SELECT * FROM {{ ref('a') }}",
                Materialization::Table,
            ))
            .unwrap();
        store
            .create_model(Model::new(
                "p",
                "c",
                "SELECT * FROM {{ ref('b') }}",
                Materialization::View,
            ))
            .unwrap();
    }

    #[tokio::test]
    async fn test_linear_run_succeeds_in_tier_order() {
        let (executor, store) = fixture().await;
        let mut req = request();
        req.selector = "+c".into();
        chain_models(&store);

        let run = executor.run_sync("admin", req).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);

        let steps = store.list_steps(&run.id);
        assert_eq!(
            steps
                .iter()
                .map(|s| (s.model_name.as_str(), s.tier))
                .collect::<Vec<_>>(),
            vec![("p.a", 0), ("p.b", 1), ("p.c", 2)]
        );
        assert!(steps.iter().all(|s| s.status == StepStatus::Success));
        assert_eq!(steps[0].rows_affected, Some(1));
        assert!(run.compile_manifest.is_some());
    }

    #[tokio::test]
    async fn test_failure_skips_later_tiers() {
        let (executor, store) = fixture().await;
        chain_models(&store);
        // Break b: references a column that does not exist.
        let mut broken = store.get_model("p.b").unwrap();
        broken.sql = "SELECT nope FROM {{ ref('a') }}".into();
        store.update_model(broken).unwrap();

        let run = executor.run_sync("admin", request()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        let steps = store.list_steps(&run.id);
        let by_name: std::collections::HashMap<&str, StepStatus> = steps
            .iter()
            .map(|s| (s.model_name.as_str(), s.status))
            .collect();
        assert_eq!(by_name["p.a"], StepStatus::Success);
        assert_eq!(by_name["p.b"], StepStatus::Failed);
        assert_eq!(by_name["p.c"], StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_cycle_creates_no_run() {
        let (executor, store) = fixture().await;
        store
            .create_model(Model::new(
                "p",
                "x",
                "SELECT * FROM {{ ref('y') }}",
                Materialization::Table,
            ))
            .unwrap();
        store
            .create_model(Model::new(
                "p",
                "y",
                "SELECT * FROM {{ ref('x') }}",
                Materialization::Table,
            ))
            .unwrap();

        let err = executor.run_sync("admin", request()).await.unwrap_err();
        assert!(err.is_validation());
        assert!(store.list_runs().is_empty());
    }

    #[tokio::test]
    async fn test_failing_data_test_fails_step() {
        let (executor, store) = fixture().await;
        store
            .create_model(Model::new(
                "p",
                "a",
                "SELECT NULL AS id",
                Materialization::Table,
            ))
            .unwrap();
        store
            .create_test(lakegate_core::DataTest::new(
                "p.a",
                TestKind::NotNull { column: "id".into() },
            ))
            .unwrap();

        let run = executor.run_sync("admin", request()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let results = store.list_test_results(Some(&run.id));
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
    }

    #[tokio::test]
    async fn test_incremental_merge_end_to_end() {
        let (executor, store) = fixture().await;
        let mut model = Model::new(
            "p",
            "inc",
            "SELECT * FROM source_rows",
            Materialization::Incremental,
        );
        model.config.unique_key = vec!["id".into()];
        store.create_model(model).unwrap();

        // Seed the source relation directly.
        {
            let conn = executor.pool.pin().await.unwrap();
            conn.execute_batch(
                "CREATE TABLE source_rows (id BIGINT, v BIGINT); \
                 INSERT INTO source_rows VALUES (1, 10), (2, 20)",
            )
            .await
            .unwrap();
        }

        // First run creates the target.
        let run = executor.run_sync("admin", request()).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);

        // Mutate the source: update one key, add one key.
        {
            let conn = executor.pool.pin().await.unwrap();
            conn.execute_batch(
                "DELETE FROM source_rows; \
                 INSERT INTO source_rows VALUES (2, 200), (3, 30)",
            )
            .await
            .unwrap();
        }

        let run = executor.run_sync("admin", request()).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        let steps = store.list_steps(&run.id);
        assert_eq!(steps[0].rows_affected, Some(3));

        // Idempotence: same source, same target count.
        let run = executor.run_sync("admin", request()).await.unwrap();
        let steps = store.list_steps(&run.id);
        assert_eq!(steps[0].rows_affected, Some(3));

        let conn = executor.pool.pin().await.unwrap();
        let rows = conn
            .query("SELECT id, v FROM \"memory\".\"main\".\"inc\" ORDER BY id")
            .await
            .unwrap();
        let values: Vec<(i64, i64)> = rows
            .iter()
            .map(|r| (r["id"].as_i64().unwrap(), r["v"].as_i64().unwrap()))
            .collect();
        assert_eq!(values, vec![(1, 10), (2, 200), (3, 30)]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_is_not_found() {
        let (executor, _store) = fixture().await;
        assert!(executor.cancel_run("missing").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_registry_signals_once() {
        let registry = CancelRegistry::new();
        let rx = registry.register("r1");
        assert!(!*rx.borrow());

        assert!(registry.cancel("r1"));
        assert!(*rx.borrow());
        // The handle is removed on cancel.
        assert!(!registry.cancel("r1"));
    }

    #[tokio::test]
    async fn test_cancelled_run_marks_remaining_steps() {
        // One-connection pool: holding the connection parks the first step
        // mid-flight so the cancellation lands deterministically.
        let pool = DuckDbPool::with_pool_config(
            DuckDbConfig::in_memory(),
            lakegate_duckdb::PoolConfig {
                max_connections: 1,
                min_connections: 0,
            },
        )
        .await
        .unwrap();
        let store = Arc::new(ModelStore::new());
        let executor = Arc::new(RunExecutor::new(pool.clone(), store.clone()));
        chain_models(&store);

        let planned = executor.plan("admin", request()).await.unwrap();
        let run_id = planned.run().id.clone();

        let guard = pool.pin().await.unwrap();
        let handle = tokio::spawn({
            let executor = executor.clone();
            async move { executor.execute_planned(planned).await }
        });

        // Wait for the run to register its cancel handle, then signal while
        // the first step is still waiting on the pool.
        for _ in 0..1000 {
            if executor.cancel_run(&run_id).is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        drop(guard);

        let run = handle.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);

        // The in-flight step may have finished; everything after it is
        // CANCELLED, never SKIPPED.
        let steps = store.list_steps(&run.id);
        assert!(steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Success | StepStatus::Cancelled)));
        assert!(steps.iter().any(|s| s.status == StepStatus::Cancelled));
    }
}
