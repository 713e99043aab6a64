//! Model freshness checks.

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use lakegate_core::{LakegateResult, Model, RowSet};
use lakegate_duckdb::{quote_ident, DuckDbPool};

use crate::compile::fqn;

/// Verdict of one freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FreshnessStatus {
    Pass,
    Stale,
    /// Target missing, empty, or unreadable.
    Unknown,
}

/// Per-model freshness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessReport {
    pub model_name: String,
    pub status: FreshnessStatus,
    pub age_seconds: Option<i64>,
    pub max_age_seconds: i64,
}

/// Check every model that declares a freshness expectation against its
/// materialized target.
#[instrument(skip(pool, models))]
pub async fn check_freshness(
    pool: &DuckDbPool,
    target_catalog: &str,
    target_schema: &str,
    models: &[Model],
) -> LakegateResult<Vec<FreshnessReport>> {
    let mut reports = Vec::new();
    let conn = pool.pin().await?;

    for model in models {
        let Some(freshness) = &model.freshness else {
            continue;
        };
        let target = fqn(target_catalog, target_schema, &model.name);
        let sql = format!(
            "SELECT date_diff('second', MAX({}), CURRENT_TIMESTAMP) AS age_seconds FROM {target}",
            quote_ident(&freshness.loaded_at_column),
        );

        let (status, age_seconds) = match conn.query(&sql).await {
            Ok(rows) => match RowSet::new(rows).scalar_i64() {
                Some(age) if age <= freshness.max_age_seconds => (FreshnessStatus::Pass, Some(age)),
                Some(age) => (FreshnessStatus::Stale, Some(age)),
                None => (FreshnessStatus::Unknown, None),
            },
            Err(e) => {
                warn!(model = %model.qualified_name(), error = %e, "Freshness query failed");
                (FreshnessStatus::Unknown, None)
            }
        };

        reports.push(FreshnessReport {
            model_name: model.qualified_name(),
            status,
            age_seconds,
            max_age_seconds: freshness.max_age_seconds,
        });
    }

    Ok(reports)
}
