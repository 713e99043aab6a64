//! Data test execution.
//!
//! Every test kind compiles to a canonical assertion query that returns
//! zero rows iff the test passes. One result is recorded per test; any
//! failure fails the owning step.

use chrono::Utc;
use tracing::instrument;

use lakegate_core::{DataTest, TestKind, TestResult};
use lakegate_duckdb::{quote_ident, quote_literal, PooledConnection};

/// Canonical assertion SQL for a test against its target relation.
pub fn assertion_sql(kind: &TestKind, target: &str) -> String {
    match kind {
        TestKind::NotNull { column } => {
            let column = quote_ident(column);
            format!("SELECT {column} FROM {target} WHERE {column} IS NULL")
        }
        TestKind::Unique { column } => {
            let column = quote_ident(column);
            format!(
                "SELECT {column}, COUNT(*) AS occurrences FROM {target} \
                 GROUP BY {column} HAVING COUNT(*) > 1"
            )
        }
        TestKind::AcceptedValues { column, values } => {
            let column = quote_ident(column);
            let list = values
                .iter()
                .map(|v| quote_literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            format!("SELECT {column} FROM {target} WHERE {column} NOT IN ({list})")
        }
        TestKind::Relationships {
            column,
            to_relation,
            to_column,
        } => {
            let column = quote_ident(column);
            let to_column = quote_ident(to_column);
            format!(
                "SELECT child.{column} FROM {target} AS child \
                 LEFT JOIN {to_relation} AS parent ON child.{column} = parent.{to_column} \
                 WHERE child.{column} IS NOT NULL AND parent.{to_column} IS NULL"
            )
        }
        TestKind::CustomSql { sql } => sql.clone(),
    }
}

/// Run one test and produce its recorded outcome. An assertion query that
/// itself errors counts as a failure with the error captured on the result.
#[instrument(skip(conn, test), fields(model = %test.model_name, kind = test.kind.as_str()))]
pub async fn execute_test(
    conn: &PooledConnection,
    test: &DataTest,
    run_id: &str,
    target: &str,
) -> TestResult {
    let sql = assertion_sql(&test.kind, target);

    let (passed, failing_rows, error_message) = match conn.query(&sql).await {
        Ok(rows) => (rows.is_empty(), rows.len() as i64, None),
        Err(e) => (false, 0, Some(e.to_string())),
    };

    TestResult {
        test_id: test.id.clone(),
        run_id: run_id.to_owned(),
        model_name: test.model_name.clone(),
        test_kind: test.kind.as_str().to_owned(),
        passed,
        failing_rows,
        error_message,
        executed_at: Utc::now(),
    }
}
