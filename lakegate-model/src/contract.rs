//! Contract validation.
//!
//! After materialization, the target's `information_schema.columns` shape is
//! compared against the declared contract: every column must exist, types
//! match case-insensitively, and `nullable=false` columns must be NOT NULL.
//! All violations are accumulated into one validation error. Runs on a
//! different pinned connection than the materialization itself.

use lakegate_core::{Contract, LakegateError, LakegateResult};
use lakegate_duckdb::{quote_literal, PooledConnection};
use tracing::instrument;

/// One column row as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ActualColumn {
    name: String,
    data_type: String,
    is_nullable: bool,
}

/// Validate an enforced contract against the materialized target.
#[instrument(skip(conn, contract), fields(model = %model_name))]
pub async fn validate_contract(
    conn: &PooledConnection,
    catalog: &str,
    schema: &str,
    model_name: &str,
    contract: &Contract,
) -> LakegateResult<()> {
    if !contract.enforce {
        return Ok(());
    }

    let sql = format!(
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
         WHERE table_catalog = {} AND table_schema = {} AND table_name = {} \
         ORDER BY ordinal_position",
        quote_literal(catalog),
        quote_literal(schema),
        quote_literal(model_name),
    );
    let rows = conn.query(&sql).await.map_err(LakegateError::from)?;

    let actual: Vec<ActualColumn> = rows
        .iter()
        .filter_map(|row| {
            Some(ActualColumn {
                name: row["column_name"].as_str()?.to_owned(),
                data_type: row["data_type"].as_str().unwrap_or_default().to_owned(),
                is_nullable: row["is_nullable"].as_str().unwrap_or("YES") == "YES",
            })
        })
        .collect();

    let mut violations = Vec::new();
    for declared in &contract.columns {
        let Some(found) = actual
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&declared.name))
        else {
            violations.push(format!("column '{}' is missing", declared.name));
            continue;
        };

        if !found.data_type.eq_ignore_ascii_case(&declared.data_type) {
            violations.push(format!(
                "column '{}' has type {} but the contract declares {}",
                declared.name, found.data_type, declared.data_type
            ));
        }
        if !declared.nullable && found.is_nullable {
            violations.push(format!(
                "column '{}' is nullable but the contract declares NOT NULL",
                declared.name
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(LakegateError::validation(format!(
            "contract violations on '{model_name}': {}",
            violations.join("; ")
        )))
    }
}
