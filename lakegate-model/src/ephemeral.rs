//! Ephemeral model inlining.
//!
//! Ephemeral models never materialize. Before DAG execution their compiled
//! SQL is folded as CTEs into every downstream model, recursively, and the
//! execution graph is rewired so downstream models inherit the ephemerals'
//! own upstream dependencies.

use std::collections::{BTreeMap, BTreeSet};

use lakegate_core::{LakegateResult, Materialization, Model};

use crate::compile::CompiledModel;

/// Inline all ephemeral models into their dependents. `compiled` is mutated
/// in place: non-ephemeral entries get CTE-prefixed SQL and rewired
/// `depends_on`.
pub fn inline_ephemerals(
    models: &BTreeMap<String, Model>,
    compiled: &mut BTreeMap<String, CompiledModel>,
) -> LakegateResult<()> {
    let ephemerals: BTreeSet<String> = models
        .values()
        .filter(|m| m.materialization == Materialization::Ephemeral)
        .map(Model::qualified_name)
        .collect();
    if ephemerals.is_empty() {
        return Ok(());
    }

    let ordered = dependency_order(&ephemerals, compiled);

    let names: Vec<String> = compiled.keys().cloned().collect();
    for name in names {
        if ephemerals.contains(&name) {
            continue;
        }

        let needed = transitive_ephemerals(&name, &ephemerals, compiled);
        if needed.is_empty() {
            continue;
        }

        // CTEs in dependency order so later bodies can reference earlier
        // ones.
        let ctes: Vec<String> = ordered
            .iter()
            .filter(|e| needed.contains(*e))
            .map(|e| {
                let bare = models[e].name.clone();
                let body = compiled[e].rendered_sql.clone();
                format!("\"{bare}\" AS ({body})")
            })
            .collect();

        // Replace ephemeral dependencies with what the ephemerals depend on.
        let mut deps: BTreeSet<String> = compiled[&name]
            .depends_on
            .iter()
            .filter(|d| !ephemerals.contains(*d))
            .cloned()
            .collect();
        for eph in &needed {
            for dep in &compiled[eph].depends_on {
                if !ephemerals.contains(dep) {
                    deps.insert(dep.clone());
                }
            }
        }

        let entry = compiled.get_mut(&name).expect("known compiled model");
        entry.rendered_sql = prefix_with_ctes(&entry.rendered_sql, &ctes);
        entry.depends_on = deps.into_iter().collect();
    }

    Ok(())
}

/// All ephemerals a model pulls in, transitively.
fn transitive_ephemerals(
    name: &str,
    ephemerals: &BTreeSet<String>,
    compiled: &BTreeMap<String, CompiledModel>,
) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    let mut work: Vec<String> = compiled
        .get(name)
        .map(|c| c.depends_on.clone())
        .unwrap_or_default();

    while let Some(dep) = work.pop() {
        if ephemerals.contains(&dep) && result.insert(dep.clone()) {
            if let Some(c) = compiled.get(&dep) {
                work.extend(c.depends_on.iter().cloned());
            }
        }
    }
    result
}

/// Ephemerals ordered dependency-first among themselves.
fn dependency_order(
    ephemerals: &BTreeSet<String>,
    compiled: &BTreeMap<String, CompiledModel>,
) -> Vec<String> {
    let mut ordered = Vec::new();
    let mut visited = BTreeSet::new();

    fn visit(
        name: &str,
        ephemerals: &BTreeSet<String>,
        compiled: &BTreeMap<String, CompiledModel>,
        visited: &mut BTreeSet<String>,
        ordered: &mut Vec<String>,
    ) {
        if !visited.insert(name.to_owned()) {
            return;
        }
        if let Some(c) = compiled.get(name) {
            for dep in &c.depends_on {
                if ephemerals.contains(dep) {
                    visit(dep, ephemerals, compiled, visited, ordered);
                }
            }
        }
        ordered.push(name.to_owned());
    }

    for name in ephemerals {
        visit(name, ephemerals, compiled, &mut visited, &mut ordered);
    }
    ordered
}

/// Prepend CTEs, merging with an existing WITH clause.
fn prefix_with_ctes(sql: &str, ctes: &[String]) -> String {
    let joined = ctes.join(", ");
    let trimmed = sql.trim_start();
    if trimmed.len() >= 5 && trimmed[..5].eq_ignore_ascii_case("with ") {
        format!("WITH {joined}, {}", &trimmed[5..])
    } else {
        format!("WITH {joined} {sql}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{CompileContext, ModelCompiler};
    use lakegate_core::Materialization;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap as Map;

    fn compile_all(models: &[Model]) -> (BTreeMap<String, Model>, BTreeMap<String, CompiledModel>) {
        let compiler = ModelCompiler::new(models);
        let mut by_name = Map::new();
        let mut compiled = Map::new();
        for model in models {
            let context = CompileContext {
                target_catalog: "lake".into(),
                target_schema: "main".into(),
                vars: Map::new(),
                full_refresh: false,
                project_name: model.project_name.clone(),
                model_name: model.name.clone(),
                materialization: model.materialization,
            };
            compiled.insert(
                model.qualified_name(),
                compiler.compile(model, &context).unwrap(),
            );
            by_name.insert(model.qualified_name(), model.clone());
        }
        (by_name, compiled)
    }

    #[test]
    fn test_single_ephemeral_inlined() {
        let models = vec![
            Model::new("p", "base", "SELECT 1 AS id", Materialization::Table),
            Model::new(
                "p",
                "eph",
                "SELECT * FROM {{ ref('base') }}",
                Materialization::Ephemeral,
            ),
            Model::new(
                "p",
                "final",
                "SELECT * FROM {{ ref('eph') }}",
                Materialization::Table,
            ),
        ];
        let (by_name, mut compiled) = compile_all(&models);
        inline_ephemerals(&by_name, &mut compiled).unwrap();

        let final_model = &compiled["p.final"];
        assert_eq!(
            final_model.rendered_sql,
            "WITH \"eph\" AS (SELECT * FROM \"lake\".\"main\".\"base\") SELECT * FROM \"eph\""
        );
        // The ephemeral edge is replaced by its upstream dependency.
        assert_eq!(final_model.depends_on, vec!["p.base"]);
    }

    #[test]
    fn test_chained_ephemerals_order_dependency_first() {
        let models = vec![
            Model::new("p", "base", "SELECT 1 AS id", Materialization::Table),
            Model::new(
                "p",
                "e1",
                "SELECT * FROM {{ ref('base') }}",
                Materialization::Ephemeral,
            ),
            Model::new(
                "p",
                "e2",
                "SELECT * FROM {{ ref('e1') }}",
                Materialization::Ephemeral,
            ),
            Model::new(
                "p",
                "final",
                "SELECT * FROM {{ ref('e2') }}",
                Materialization::Table,
            ),
        ];
        let (by_name, mut compiled) = compile_all(&models);
        inline_ephemerals(&by_name, &mut compiled).unwrap();

        let sql = &compiled["p.final"].rendered_sql;
        let e1_at = sql.find("\"e1\" AS").unwrap();
        let e2_at = sql.find("\"e2\" AS").unwrap();
        assert!(e1_at < e2_at, "dependency CTE must come first: {sql}");
        assert_eq!(compiled["p.final"].depends_on, vec!["p.base"]);
    }

    #[test]
    fn test_existing_with_clause_merged() {
        let models = vec![
            Model::new("p", "eph", "SELECT 1 AS id", Materialization::Ephemeral),
            Model::new(
                "p",
                "final",
                "WITH local AS (SELECT 2) SELECT * FROM {{ ref('eph') }}, local",
                Materialization::Table,
            ),
        ];
        let (by_name, mut compiled) = compile_all(&models);
        inline_ephemerals(&by_name, &mut compiled).unwrap();

        assert_eq!(
            compiled["p.final"].rendered_sql,
            "WITH \"eph\" AS (SELECT 1 AS id), local AS (SELECT 2) SELECT * FROM \"eph\", local"
        );
    }
}
