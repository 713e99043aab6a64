//! Models, runs, and their status machines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Physical form a model's result is realized in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Materialization {
    View,
    Table,
    Incremental,
    Ephemeral,
    Seed,
    Snapshot,
}

impl Materialization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "VIEW",
            Self::Table => "TABLE",
            Self::Incremental => "INCREMENTAL",
            Self::Ephemeral => "EPHEMERAL",
            Self::Seed => "SEED",
            Self::Snapshot => "SNAPSHOT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VIEW" => Some(Self::View),
            "TABLE" => Some(Self::Table),
            "INCREMENTAL" => Some(Self::Incremental),
            "EPHEMERAL" => Some(Self::Ephemeral),
            "SEED" => Some(Self::Seed),
            "SNAPSHOT" => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// How an incremental model folds new rows into the existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalStrategy {
    /// `MERGE INTO ... WHEN MATCHED THEN UPDATE SET * WHEN NOT MATCHED THEN INSERT *`.
    #[default]
    Merge,
    /// DELETE matching keys, then INSERT the full source.
    DeleteInsert,
}

impl IncrementalStrategy {
    /// Parse a config value. `delete+insert` is accepted as an alias.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Some(Self::Merge),
            "delete_insert" | "delete+insert" => Some(Self::DeleteInsert),
            _ => None,
        }
    }
}

/// Policy when the source column set drifts from the incremental target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnSchemaChange {
    /// Materialize anyway (default).
    #[default]
    Ignore,
    /// Fail the step on any column drift.
    Fail,
}

impl OnSchemaChange {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Some(Self::Ignore),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Per-model configuration knobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Key columns for incremental merge / snapshot identity.
    #[serde(default)]
    pub unique_key: Vec<String>,
    /// Incremental strategy; `None` means merge.
    #[serde(default)]
    pub incremental_strategy: Option<String>,
    /// Schema-drift policy; `None` means ignore.
    #[serde(default)]
    pub on_schema_change: Option<String>,
}

/// A declared output column in a model contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractColumn {
    pub name: String,
    /// Compared case-insensitively against `information_schema.columns`.
    pub data_type: String,
    /// `false` requires the materialized column to be NOT NULL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// A model-author-declared column schema the materialized output must match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contract {
    /// Violations only fail the step when enforcement is on.
    #[serde(default)]
    pub enforce: bool,
    #[serde(default)]
    pub columns: Vec<ContractColumn>,
}

/// Freshness expectation over a materialized model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    /// Maximum tolerated age of the newest row, in seconds.
    pub max_age_seconds: i64,
    /// Timestamp column the age is measured on.
    pub loaded_at_column: String,
}

/// A named, versioned SQL transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Opaque identifier (UUIDv7 for new models).
    pub id: String,
    /// Project the model belongs to; `project_name.name` is unique.
    pub project_name: String,
    /// Model name, unique within the project.
    pub name: String,
    /// Templated SQL body.
    pub sql: String,
    pub materialization: Materialization,
    /// Declared dependencies: qualified model names or `source:<schema>.<table>`.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub config: ModelConfig,
    #[serde(default)]
    pub contract: Option<Contract>,
    #[serde(default)]
    pub freshness: Option<Freshness>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Model {
    /// Create a model with a fresh id and empty ancillary fields.
    pub fn new(
        project_name: impl Into<String>,
        name: impl Into<String>,
        sql: impl Into<String>,
        materialization: Materialization,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            project_name: project_name.into(),
            name: name.into(),
            sql: sql.into(),
            materialization,
            depends_on: Vec::new(),
            config: ModelConfig::default(),
            contract: None,
            freshness: None,
            tags: Vec::new(),
        }
    }

    /// `project.name`, the unique handle used across the DAG.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.project_name, self.name)
    }
}

/// Kind of data test attached to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TestKind {
    /// The column must contain no NULLs.
    NotNull { column: String },
    /// The column's values must be unique.
    Unique { column: String },
    /// Every value must appear in the accepted list.
    AcceptedValues { column: String, values: Vec<String> },
    /// Every value must exist in `to_relation.to_column`.
    Relationships {
        column: String,
        to_relation: String,
        to_column: String,
    },
    /// Arbitrary assertion query; passes iff it returns zero rows.
    CustomSql { sql: String },
}

impl TestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotNull { .. } => "not_null",
            Self::Unique { .. } => "unique",
            Self::AcceptedValues { .. } => "accepted_values",
            Self::Relationships { .. } => "relationships",
            Self::CustomSql { .. } => "custom_sql",
        }
    }
}

/// A data test definition attached to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTest {
    pub id: String,
    /// Qualified model name the test belongs to.
    pub model_name: String,
    pub kind: TestKind,
}

impl DataTest {
    pub fn new(model_name: impl Into<String>, kind: TestKind) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            model_name: model_name.into(),
            kind,
        }
    }
}

/// Recorded outcome of one data test execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub run_id: String,
    pub model_name: String,
    pub test_kind: String,
    pub passed: bool,
    /// Offending-row count reported by the assertion query.
    pub failing_rows: i64,
    pub error_message: Option<String>,
    pub executed_at: chrono::DateTime<chrono::Utc>,
}

/// Terminal and in-flight run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

/// Per-step states. SKIPPED marks steps in tiers that never started because
/// an earlier tier failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Skipped,
}

/// What caused a run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Schedule,
    Api,
}

/// Parameters for triggering a model run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Catalog materialized relations land in.
    pub target_catalog: String,
    /// Schema materialized relations land in.
    pub target_schema: String,
    /// Selector expression; empty selects all models.
    #[serde(default)]
    pub selector: String,
    /// Variables injected into compilation and the session.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Rebuild incremental and snapshot targets from scratch.
    #[serde(default)]
    pub full_refresh: bool,
    #[serde(default = "default_trigger")]
    pub trigger_type: TriggerType,
}

fn default_trigger() -> TriggerType {
    TriggerType::Api
}

impl RunRequest {
    pub fn new(target_catalog: impl Into<String>, target_schema: impl Into<String>) -> Self {
        Self {
            target_catalog: target_catalog.into(),
            target_schema: target_schema.into(),
            selector: String::new(),
            variables: BTreeMap::new(),
            full_refresh: false,
            trigger_type: TriggerType::Api,
        }
    }
}

/// A scheduled materialization of a selected model set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRun {
    pub id: String,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub triggered_by: String,
    pub target_catalog: String,
    pub target_schema: String,
    pub selector: String,
    pub variables: BTreeMap<String, String>,
    pub full_refresh: bool,
    /// Opaque manifest JSON; the `state:modified` selector reads the one from
    /// the last successful run.
    pub compile_manifest: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One model materialization inside a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRunStep {
    pub id: String,
    pub run_id: String,
    pub model_id: String,
    /// Qualified model name.
    pub model_name: String,
    /// Topological level; tier 0 holds the roots of the selected sub-DAG.
    pub tier: usize,
    pub status: StepStatus,
    pub compiled_sql: Option<String>,
    pub compiled_hash: Option<String>,
    pub depends_on: Vec<String>,
    pub vars_used: Vec<String>,
    pub macros_used: Vec<String>,
    pub rows_affected: Option<i64>,
    pub error_message: Option<String>,
}

/// Compile manifest persisted per run: the public contract consumed by the
/// `state:modified` selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileManifest {
    pub version: u32,
    /// Sorted by `model_name`.
    pub models: Vec<ManifestEntry>,
}

/// One model's compile record inside the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub model_name: String,
    pub compiled_hash: String,
    pub depends_on: Vec<String>,
    pub vars_used: Vec<String>,
    pub macros_used: Vec<String>,
}

impl CompileManifest {
    /// Current manifest format version.
    pub const VERSION: u32 = 1;

    /// Build a manifest from entries, sorting by model name.
    pub fn new(mut models: Vec<ManifestEntry>) -> Self {
        models.sort_by(|a, b| a.model_name.cmp(&b.model_name));
        Self {
            version: Self::VERSION,
            models,
        }
    }

    /// Look up a model's recorded hash.
    pub fn hash_for(&self, model_name: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|m| m.model_name == model_name)
            .map(|m| m.compiled_hash.as_str())
    }
}

/// A named SQL macro made available to model SQL. Macros are session-local:
/// they are re-created on every pinned connection before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macro {
    pub id: String,
    /// Macro name as referenced from SQL.
    pub name: String,
    /// Comma-separated parameter list.
    pub parameters: String,
    /// Body expression.
    pub body: String,
}

impl Macro {
    pub fn new(
        name: impl Into<String>,
        parameters: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            parameters: parameters.into(),
            body: body.into(),
        }
    }

    /// Idempotent creation DDL for a pinned connection.
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE OR REPLACE MACRO {}({}) AS ({})",
            self.name, self.parameters, self.body
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        let m = Model::new("analytics", "orders", "SELECT 1", Materialization::View);
        assert_eq!(m.qualified_name(), "analytics.orders");
    }

    #[test]
    fn test_incremental_strategy_aliases() {
        assert_eq!(
            IncrementalStrategy::parse("delete+insert"),
            Some(IncrementalStrategy::DeleteInsert)
        );
        assert_eq!(
            IncrementalStrategy::parse("delete_insert"),
            Some(IncrementalStrategy::DeleteInsert)
        );
        assert_eq!(IncrementalStrategy::parse("merge"), Some(IncrementalStrategy::Merge));
        assert_eq!(IncrementalStrategy::parse("upsert"), None);
    }

    #[test]
    fn test_manifest_sorted_by_model_name() {
        let manifest = CompileManifest::new(vec![
            ManifestEntry {
                model_name: "proj.b".into(),
                compiled_hash: "h2".into(),
                depends_on: vec![],
                vars_used: vec![],
                macros_used: vec![],
            },
            ManifestEntry {
                model_name: "proj.a".into(),
                compiled_hash: "h1".into(),
                depends_on: vec![],
                vars_used: vec![],
                macros_used: vec![],
            },
        ]);
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.models[0].model_name, "proj.a");
        assert_eq!(manifest.hash_for("proj.b"), Some("h2"));
    }

    #[test]
    fn test_macro_create_sql() {
        let m = Macro::new("cents_to_dollars", "amount", "amount / 100.0");
        assert_eq!(
            m.create_sql(),
            "CREATE OR REPLACE MACRO cents_to_dollars(amount) AS (amount / 100.0)"
        );
    }
}
