//! Service glue.
//!
//! `LakegateService` wires the workspace together: one DuckDB pool, the
//! authorization evaluator over the auth store and catalog registry, the
//! secure query pipeline with its audit sink, and the run executor routing
//! model DML back through the pipeline. This is the surface the external
//! HTTP/CLI layer consumes.

use std::sync::Arc;

use tracing::{info, instrument};

use lakegate_auth::{AuthEvaluator, AuthStore, CatalogRegistry};
use lakegate_core::{
    AuditRepository, AuthorizationService, AzureSecretSpec, CatalogAttacher, CatalogRegistration,
    DataTest, GcsSecretSpec, LakegateError, LakegateResult, MemoryAuditRepository, Model,
    ModelRun, ModelRunStep, NotebookProvider, Principal, RowSet, RunRequest, S3SecretSpec,
    SecretManager, TestResult,
};
use lakegate_duckdb::{
    DuckDbConfig, DuckDbPool, DuckDbSecretManager, DuckLakeAttacher, ExtensionLoader,
};
use lakegate_model::{check_freshness, FreshnessReport, ModelCompiler, ModelStore, RunExecutor};
use lakegate_model::CompileContext;
use lakegate_query::SecureQueryPipeline;

/// The assembled gateway.
pub struct LakegateService {
    pool: DuckDbPool,
    auth_store: Arc<AuthStore>,
    registry: Arc<CatalogRegistry>,
    evaluator: Arc<AuthEvaluator>,
    audit: Arc<dyn AuditRepository>,
    attacher: Arc<DuckLakeAttacher>,
    secrets: DuckDbSecretManager,
    pipeline: Arc<SecureQueryPipeline>,
    model_store: Arc<ModelStore>,
    executor: Arc<RunExecutor>,
}

impl LakegateService {
    /// Assemble a gateway over the given engine configuration with an
    /// in-process audit sink.
    pub async fn connect(config: DuckDbConfig) -> LakegateResult<Self> {
        Self::connect_with_audit(config, Arc::new(MemoryAuditRepository::new())).await
    }

    /// Assemble a gateway with a caller-provided audit repository.
    pub async fn connect_with_audit(
        config: DuckDbConfig,
        audit: Arc<dyn AuditRepository>,
    ) -> LakegateResult<Self> {
        let pool = DuckDbPool::new(config).await.map_err(LakegateError::from)?;

        let extensions = Arc::new(ExtensionLoader::new());
        let attacher = Arc::new(DuckLakeAttacher::new(pool.clone(), extensions));
        let secrets = DuckDbSecretManager::new(pool.clone());

        let auth_store = Arc::new(AuthStore::new());
        let registry = Arc::new(CatalogRegistry::new());
        let evaluator = Arc::new(AuthEvaluator::new(auth_store.clone(), registry.clone()));

        let pipeline = Arc::new(SecureQueryPipeline::new(
            evaluator.clone() as Arc<dyn AuthorizationService>,
            pool.clone(),
            audit.clone(),
            attacher.clone() as Arc<dyn CatalogAttacher>,
            registry.clone(),
        ));

        let model_store = Arc::new(ModelStore::new());
        let executor = Arc::new(
            RunExecutor::new(pool.clone(), model_store.clone())
                .with_engine(pipeline.clone())
                .with_registry(registry.clone()),
        );

        info!("Lakegate service assembled");
        Ok(Self {
            pool,
            auth_store,
            registry,
            evaluator,
            audit,
            attacher,
            secrets,
            pipeline,
            model_store,
            executor,
        })
    }

    // ------------------------------------------------------------------
    // Governed queries
    // ------------------------------------------------------------------

    /// Execute one governed statement as the named principal.
    pub async fn query(&self, principal_name: &str, sql: &str) -> LakegateResult<RowSet> {
        use lakegate_core::QueryEngine;
        self.pipeline.query(principal_name, sql).await
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Plan a run and execute it in the background. The returned row is the
    /// PENDING run; poll `list_runs`/`list_run_steps` for progress.
    pub async fn trigger_run(
        &self,
        principal_name: &str,
        request: RunRequest,
    ) -> LakegateResult<ModelRun> {
        let planned = self.executor.plan(principal_name, request).await?;
        let run = planned.run().clone();

        let executor = self.executor.clone();
        let run_id = run.id.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.execute_planned(planned).await {
                tracing::error!(run_id = %run_id, error = %e, "Background run failed");
            }
        });

        Ok(run)
    }

    /// Plan and execute a run to completion.
    pub async fn trigger_run_sync(
        &self,
        principal_name: &str,
        request: RunRequest,
    ) -> LakegateResult<ModelRun> {
        self.executor.run_sync(principal_name, request).await
    }

    /// Signal cancellation of an in-flight run.
    pub fn cancel_run(&self, run_id: &str) -> LakegateResult<()> {
        self.executor.cancel_run(run_id)
    }

    /// Runs, most recent first.
    pub fn list_runs(&self) -> Vec<ModelRun> {
        self.model_store.list_runs()
    }

    /// Steps of a run in tier order.
    pub fn list_run_steps(&self, run_id: &str) -> Vec<ModelRunStep> {
        self.model_store.list_steps(run_id)
    }

    /// Freshness reports for every model declaring an expectation.
    pub async fn check_freshness(
        &self,
        target_catalog: &str,
        target_schema: &str,
    ) -> LakegateResult<Vec<FreshnessReport>> {
        let models = self.model_store.list_models();
        check_freshness(&self.pool, target_catalog, target_schema, &models).await
    }

    // ------------------------------------------------------------------
    // Models and tests
    // ------------------------------------------------------------------

    pub fn create_model(&self, model: Model) -> LakegateResult<Model> {
        self.model_store.create_model(model)
    }

    pub fn update_model(&self, model: Model) -> LakegateResult<Model> {
        self.model_store.update_model(model)
    }

    pub fn delete_model(&self, qualified_name: &str) -> LakegateResult<()> {
        self.model_store.delete_model(qualified_name)
    }

    pub fn get_model(&self, qualified_name: &str) -> LakegateResult<Model> {
        self.model_store.get_model(qualified_name)
    }

    pub fn list_models(&self) -> Vec<Model> {
        self.model_store.list_models()
    }

    pub fn create_test(&self, test: DataTest) -> LakegateResult<DataTest> {
        self.model_store.create_test(test)
    }

    pub fn list_tests(&self, model_name: Option<&str>) -> Vec<DataTest> {
        self.model_store.list_tests(model_name)
    }

    pub fn delete_test(&self, test_id: &str) -> LakegateResult<()> {
        self.model_store.delete_test(test_id)
    }

    pub fn list_test_results(&self, run_id: Option<&str>) -> Vec<TestResult> {
        self.model_store.list_test_results(run_id)
    }

    /// Promote a notebook's SQL blocks into one VIEW model per block, named
    /// `<prefix>_<ordinal>`. Every block must compile before anything is
    /// created.
    #[instrument(skip(self, provider), fields(principal = %principal_name))]
    pub async fn promote_notebook(
        &self,
        provider: &dyn NotebookProvider,
        principal_name: &str,
        notebook_id: &str,
        project: &str,
        prefix: &str,
    ) -> LakegateResult<Vec<Model>> {
        let blocks = provider.get_sql_blocks(notebook_id).await?;
        if blocks.is_empty() {
            return Err(LakegateError::validation(format!(
                "notebook '{notebook_id}' has no SQL blocks"
            )));
        }

        let mut candidates = Vec::with_capacity(blocks.len());
        for (index, sql) in blocks.iter().enumerate() {
            candidates.push(Model::new(
                project,
                format!("{prefix}_{}", index + 1),
                sql.clone(),
                lakegate_core::Materialization::View,
            ));
        }

        // Validate compilation against the combined model set first.
        let mut known = self.model_store.list_models();
        known.extend(candidates.iter().cloned());
        let compiler = ModelCompiler::new(&known);
        for model in &candidates {
            let context = CompileContext {
                target_catalog: "lake".into(),
                target_schema: "main".into(),
                vars: Default::default(),
                full_refresh: false,
                project_name: model.project_name.clone(),
                model_name: model.name.clone(),
                materialization: model.materialization,
            };
            compiler
                .compile(model, &context)
                .map_err(|e| e.with_context(&format!("notebook block '{}'", model.name)))?;
        }

        let mut created = Vec::with_capacity(candidates.len());
        for model in candidates {
            created.push(self.model_store.create_model(model)?);
        }
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Catalogs and secrets
    // ------------------------------------------------------------------

    pub async fn attach_catalog(&self, registration: CatalogRegistration) -> LakegateResult<()> {
        self.attacher.attach(registration).await
    }

    pub async fn detach_catalog(&self, name: &str) -> LakegateResult<()> {
        self.attacher.detach(name).await
    }

    pub async fn set_default_catalog(&self, name: &str) -> LakegateResult<()> {
        self.attacher.set_default(name).await
    }

    pub async fn create_s3_secret(&self, spec: &S3SecretSpec) -> LakegateResult<()> {
        self.secrets.create_s3_secret(spec).await
    }

    pub async fn create_azure_secret(&self, spec: &AzureSecretSpec) -> LakegateResult<()> {
        self.secrets.create_azure_secret(spec).await
    }

    pub async fn create_gcs_secret(&self, spec: &GcsSecretSpec) -> LakegateResult<()> {
        self.secrets.create_gcs_secret(spec).await
    }

    pub async fn drop_secret(&self, name: &str) -> LakegateResult<()> {
        self.secrets.drop_secret(name).await
    }

    // ------------------------------------------------------------------
    // Administration handles
    // ------------------------------------------------------------------

    /// Register a principal.
    pub fn create_principal(&self, principal: Principal) -> LakegateResult<()> {
        self.auth_store.create_principal(principal)
    }

    /// Authorization state: grants, groups, filters, masks.
    pub fn auth_store(&self) -> &Arc<AuthStore> {
        &self.auth_store
    }

    /// Catalog metadata registry.
    pub fn catalog_registry(&self) -> &Arc<CatalogRegistry> {
        &self.registry
    }

    /// The authorization evaluator, for callers composing their own
    /// pipelines.
    pub fn authorization(&self) -> Arc<dyn AuthorizationService> {
        self.evaluator.clone()
    }

    /// The audit sink.
    pub fn audit(&self) -> &Arc<dyn AuditRepository> {
        &self.audit
    }

    /// The underlying engine pool.
    pub fn pool(&self) -> &DuckDbPool {
        &self.pool
    }
}
