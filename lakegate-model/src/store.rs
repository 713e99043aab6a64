//! Durable model and run state.
//!
//! Models, macros, runs, steps, data tests, and test results live behind one
//! RwLock. Service operations enforce name uniqueness and dependency-token
//! validity at write time.

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use lakegate_core::{
    CompileManifest, DataTest, LakegateError, LakegateResult, Macro, Model, ModelRun,
    ModelRunStep, RunStatus, StepStatus, TestResult,
};

#[derive(Debug, Default)]
struct Inner {
    models: Vec<Model>,
    macros: Vec<Macro>,
    runs: Vec<ModelRun>,
    steps: Vec<ModelRunStep>,
    tests: Vec<DataTest>,
    test_results: Vec<TestResult>,
}

/// Store for models and run bookkeeping.
#[derive(Debug, Default)]
pub struct ModelStore {
    inner: RwLock<Inner>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    /// Create a model. The qualified name must be unused and every declared
    /// dependency must reference an existing model or a `source:` token.
    pub fn create_model(&self, model: Model) -> LakegateResult<Model> {
        let mut inner = self.inner.write();
        if inner
            .models
            .iter()
            .any(|m| m.qualified_name() == model.qualified_name())
        {
            return Err(LakegateError::conflict(format!(
                "model '{}' already exists",
                model.qualified_name()
            )));
        }
        Self::validate_depends_on(&inner, &model)?;
        inner.models.push(model.clone());
        Ok(model)
    }

    /// Replace an existing model by qualified name.
    pub fn update_model(&self, model: Model) -> LakegateResult<Model> {
        let mut inner = self.inner.write();
        Self::validate_depends_on(&inner, &model)?;
        let qualified = model.qualified_name();
        let Some(slot) = inner
            .models
            .iter_mut()
            .find(|m| m.qualified_name() == qualified)
        else {
            return Err(LakegateError::not_found(format!("model '{qualified}'")));
        };
        let id = slot.id.clone();
        *slot = model.clone();
        slot.id = id;
        Ok(slot.clone())
    }

    pub fn delete_model(&self, qualified_name: &str) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        let before = inner.models.len();
        inner.models.retain(|m| m.qualified_name() != qualified_name);
        if inner.models.len() == before {
            return Err(LakegateError::not_found(format!(
                "model '{qualified_name}'"
            )));
        }
        Ok(())
    }

    pub fn get_model(&self, qualified_name: &str) -> LakegateResult<Model> {
        self.inner
            .read()
            .models
            .iter()
            .find(|m| m.qualified_name() == qualified_name)
            .cloned()
            .ok_or_else(|| LakegateError::not_found(format!("model '{qualified_name}'")))
    }

    pub fn list_models(&self) -> Vec<Model> {
        let mut models = self.inner.read().models.clone();
        models.sort_by_key(Model::qualified_name);
        models
    }

    fn validate_depends_on(inner: &Inner, model: &Model) -> LakegateResult<()> {
        for dep in &model.depends_on {
            if dep.starts_with("source:") {
                continue;
            }
            let exists = inner.models.iter().any(|m| m.qualified_name() == *dep)
                || model.qualified_name() == *dep;
            if !exists {
                return Err(LakegateError::validation(format!(
                    "model '{}' depends on unknown model '{dep}'",
                    model.qualified_name()
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Macros
    // ------------------------------------------------------------------

    pub fn create_macro(&self, definition: Macro) -> LakegateResult<Macro> {
        let mut inner = self.inner.write();
        if inner.macros.iter().any(|m| m.name == definition.name) {
            return Err(LakegateError::conflict(format!(
                "macro '{}' already exists",
                definition.name
            )));
        }
        inner.macros.push(definition.clone());
        Ok(definition)
    }

    pub fn list_macros(&self) -> Vec<Macro> {
        self.inner.read().macros.clone()
    }

    // ------------------------------------------------------------------
    // Runs and steps
    // ------------------------------------------------------------------

    pub fn insert_run(&self, run: ModelRun) -> ModelRun {
        self.inner.write().runs.push(run.clone());
        run
    }

    pub fn get_run(&self, run_id: &str) -> LakegateResult<ModelRun> {
        self.inner
            .read()
            .runs
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
            .ok_or_else(|| LakegateError::not_found(format!("run '{run_id}'")))
    }

    /// Runs, most recent first.
    pub fn list_runs(&self) -> Vec<ModelRun> {
        let mut runs = self.inner.read().runs.clone();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs
    }

    pub fn set_run_status(&self, run_id: &str, status: RunStatus) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        let Some(run) = inner.runs.iter_mut().find(|r| r.id == run_id) else {
            return Err(LakegateError::not_found(format!("run '{run_id}'")));
        };
        run.status = status;
        if matches!(
            status,
            RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled
        ) {
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn set_run_manifest(&self, run_id: &str, manifest: &CompileManifest) -> LakegateResult<()> {
        let serialized = serde_json::to_string(manifest)?;
        let mut inner = self.inner.write();
        let Some(run) = inner.runs.iter_mut().find(|r| r.id == run_id) else {
            return Err(LakegateError::not_found(format!("run '{run_id}'")));
        };
        run.compile_manifest = Some(serialized);
        Ok(())
    }

    /// Manifest of the most recent successful run, if any.
    pub fn last_successful_manifest(&self) -> Option<CompileManifest> {
        let inner = self.inner.read();
        let mut successful: Vec<&ModelRun> = inner
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Success && r.compile_manifest.is_some())
            .collect();
        successful.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        successful
            .first()
            .and_then(|r| r.compile_manifest.as_deref())
            .and_then(|json| serde_json::from_str(json).ok())
    }

    pub fn insert_step(&self, step: ModelRunStep) -> ModelRunStep {
        self.inner.write().steps.push(step.clone());
        step
    }

    /// Steps of a run in tier order, then by model name.
    pub fn list_steps(&self, run_id: &str) -> Vec<ModelRunStep> {
        let mut steps: Vec<ModelRunStep> = self
            .inner
            .read()
            .steps
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.tier.cmp(&b.tier).then(a.model_name.cmp(&b.model_name)));
        steps
    }

    pub fn update_step<F>(&self, step_id: &str, mutate: F) -> LakegateResult<()>
    where
        F: FnOnce(&mut ModelRunStep),
    {
        let mut inner = self.inner.write();
        let Some(step) = inner.steps.iter_mut().find(|s| s.id == step_id) else {
            return Err(LakegateError::not_found(format!("step '{step_id}'")));
        };
        mutate(step);
        Ok(())
    }

    pub fn set_step_status(&self, step_id: &str, status: StepStatus) -> LakegateResult<()> {
        self.update_step(step_id, |step| step.status = status)
    }

    // ------------------------------------------------------------------
    // Data tests
    // ------------------------------------------------------------------

    /// Attach a test to an existing model.
    pub fn create_test(&self, test: DataTest) -> LakegateResult<DataTest> {
        let mut inner = self.inner.write();
        if !inner
            .models
            .iter()
            .any(|m| m.qualified_name() == test.model_name)
        {
            return Err(LakegateError::not_found(format!(
                "model '{}'",
                test.model_name
            )));
        }
        inner.tests.push(test.clone());
        Ok(test)
    }

    pub fn list_tests(&self, model_name: Option<&str>) -> Vec<DataTest> {
        self.inner
            .read()
            .tests
            .iter()
            .filter(|t| model_name.is_none_or(|m| t.model_name == m))
            .cloned()
            .collect()
    }

    pub fn delete_test(&self, test_id: &str) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        let before = inner.tests.len();
        inner.tests.retain(|t| t.id != test_id);
        if inner.tests.len() == before {
            return Err(LakegateError::not_found(format!("test '{test_id}'")));
        }
        Ok(())
    }

    pub fn record_test_result(&self, result: TestResult) {
        self.inner.write().test_results.push(result);
    }

    pub fn list_test_results(&self, run_id: Option<&str>) -> Vec<TestResult> {
        self.inner
            .read()
            .test_results
            .iter()
            .filter(|r| run_id.is_none_or(|id| r.run_id == id))
            .cloned()
            .collect()
    }
}

/// Allocate a fresh step row in PENDING.
pub fn new_step(run_id: &str, model: &Model, tier: usize) -> ModelRunStep {
    ModelRunStep {
        id: Uuid::now_v7().to_string(),
        run_id: run_id.to_owned(),
        model_id: model.id.clone(),
        model_name: model.qualified_name(),
        tier,
        status: StepStatus::Pending,
        compiled_sql: None,
        compiled_hash: None,
        depends_on: Vec::new(),
        vars_used: Vec::new(),
        macros_used: Vec::new(),
        rows_affected: None,
        error_message: None,
    }
}
