//! The run selector language.
//!
//! Comma-separated terms, each evaluated independently, unioned, and
//! de-duplicated: `*`, `proj.name`, bare `name`, `name+`, `+name`, `+name+`,
//! `tag:<t>`, `project:<p>`, and `state:modified`. Unknown terms fail
//! validation.

use std::collections::BTreeSet;

use lakegate_core::{CompileManifest, LakegateError, LakegateResult, Model};

use crate::dag::ModelDag;

/// Inputs the selector evaluates against.
pub struct SelectionInput<'a> {
    pub models: &'a [Model],
    /// Graph over all models, for `+`-closures.
    pub dag: &'a ModelDag,
    /// Current compiled hash per qualified name.
    pub current_hashes: &'a dyn Fn(&str) -> Option<String>,
    /// Manifest of the last successful run, if any.
    pub previous_manifest: Option<&'a CompileManifest>,
}

/// Evaluate a selector expression to a set of qualified model names.
pub fn select_models(selector: &str, input: &SelectionInput<'_>) -> LakegateResult<BTreeSet<String>> {
    let mut selected = BTreeSet::new();

    let trimmed = selector.trim();
    if trimmed.is_empty() || trimmed == "*" {
        selected.extend(input.models.iter().map(Model::qualified_name));
        return Ok(selected);
    }

    for term in trimmed.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        selected.extend(evaluate_term(term, input)?);
    }

    Ok(selected)
}

fn evaluate_term(term: &str, input: &SelectionInput<'_>) -> LakegateResult<BTreeSet<String>> {
    let mut result = BTreeSet::new();

    if term == "*" {
        result.extend(input.models.iter().map(Model::qualified_name));
        return Ok(result);
    }

    if let Some(tag) = term.strip_prefix("tag:") {
        result.extend(
            input
                .models
                .iter()
                .filter(|m| m.tags.iter().any(|t| t == tag))
                .map(Model::qualified_name),
        );
        return Ok(result);
    }

    if let Some(project) = term.strip_prefix("project:") {
        result.extend(
            input
                .models
                .iter()
                .filter(|m| m.project_name == project)
                .map(Model::qualified_name),
        );
        return Ok(result);
    }

    if let Some(state) = term.strip_prefix("state:") {
        if state != "modified" {
            return Err(LakegateError::validation(format!(
                "unknown state selector 'state:{state}'"
            )));
        }
        return Ok(modified_models(input));
    }

    // Graph-direction markers.
    let upstream = term.starts_with('+');
    let downstream = term.ends_with('+');
    let name = term.trim_start_matches('+').trim_end_matches('+');
    if name.is_empty() {
        return Err(LakegateError::validation(format!(
            "malformed selector term '{term}'"
        )));
    }

    let qualified = resolve_name(name, input.models)?;
    result.insert(qualified.clone());
    if upstream {
        result.extend(input.dag.upstream_of(&qualified));
    }
    if downstream {
        result.extend(input.dag.downstream_of(&qualified));
    }
    Ok(result)
}

/// Models whose compiled hash differs from the previous manifest. Without a
/// manifest, everything counts as modified.
fn modified_models(input: &SelectionInput<'_>) -> BTreeSet<String> {
    let Some(manifest) = input.previous_manifest else {
        return input.models.iter().map(Model::qualified_name).collect();
    };

    input
        .models
        .iter()
        .map(Model::qualified_name)
        .filter(|name| {
            let current = (input.current_hashes)(name);
            match (current, manifest.hash_for(name)) {
                (Some(current), Some(previous)) => current != previous,
                // Never recorded before, or no longer compilable: modified.
                _ => true,
            }
        })
        .collect()
}

fn resolve_name(name: &str, models: &[Model]) -> LakegateResult<String> {
    if name.contains('.') {
        return models
            .iter()
            .find(|m| m.qualified_name() == name)
            .map(|m| m.qualified_name())
            .ok_or_else(|| LakegateError::validation(format!("unknown model '{name}'")));
    }

    let candidates: Vec<&Model> = models.iter().filter(|m| m.name == name).collect();
    match candidates.as_slice() {
        [] => Err(LakegateError::validation(format!("unknown model '{name}'"))),
        [unique] => Ok(unique.qualified_name()),
        _ => Err(LakegateError::validation(format!(
            "model name '{name}' is ambiguous across projects"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakegate_core::{ManifestEntry, Materialization};
    use pretty_assertions::assert_eq;

    fn models() -> Vec<Model> {
        let mut a = Model::new("p", "a", "SELECT 1", Materialization::Table);
        a.tags = vec!["nightly".into()];
        let mut b = Model::new("p", "b", "SELECT 1", Materialization::Table);
        b.depends_on = vec!["p.a".into()];
        let mut c = Model::new("p", "c", "SELECT 1", Materialization::Table);
        c.depends_on = vec!["p.b".into()];
        let d = Model::new("q", "d", "SELECT 1", Materialization::View);
        vec![a, b, c, d]
    }

    fn dag_of(models: &[Model]) -> ModelDag {
        ModelDag::build(
            models
                .iter()
                .map(|m| (m.qualified_name(), m.depends_on.clone()))
                .collect::<Vec<_>>()
                .iter()
                .map(|(n, d)| (n.as_str(), d.as_slice())),
        )
        .unwrap()
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_empty_and_star_select_all() {
        let models = models();
        let dag = dag_of(&models);
        let hashes = |_: &str| None;
        let input = SelectionInput {
            models: &models,
            dag: &dag,
            current_hashes: &hashes,
            previous_manifest: None,
        };
        assert_eq!(names(&select_models("", &input).unwrap()), vec!["p.a", "p.b", "p.c", "q.d"]);
        assert_eq!(names(&select_models("*", &input).unwrap()), vec!["p.a", "p.b", "p.c", "q.d"]);
    }

    #[test]
    fn test_graph_closures() {
        let models = models();
        let dag = dag_of(&models);
        let hashes = |_: &str| None;
        let input = SelectionInput {
            models: &models,
            dag: &dag,
            current_hashes: &hashes,
            previous_manifest: None,
        };

        assert_eq!(names(&select_models("+c", &input).unwrap()), vec!["p.a", "p.b", "p.c"]);
        assert_eq!(names(&select_models("a+", &input).unwrap()), vec!["p.a", "p.b", "p.c"]);
        assert_eq!(names(&select_models("+b+", &input).unwrap()), vec!["p.a", "p.b", "p.c"]);
        assert_eq!(names(&select_models("b", &input).unwrap()), vec!["p.b"]);
    }

    #[test]
    fn test_tag_project_and_union() {
        let models = models();
        let dag = dag_of(&models);
        let hashes = |_: &str| None;
        let input = SelectionInput {
            models: &models,
            dag: &dag,
            current_hashes: &hashes,
            previous_manifest: None,
        };

        assert_eq!(names(&select_models("tag:nightly", &input).unwrap()), vec!["p.a"]);
        assert_eq!(names(&select_models("project:q", &input).unwrap()), vec!["q.d"]);
        assert_eq!(
            names(&select_models("tag:nightly, project:q", &input).unwrap()),
            vec!["p.a", "q.d"]
        );
    }

    #[test]
    fn test_state_modified_against_manifest() {
        let models = models();
        let dag = dag_of(&models);
        let manifest = CompileManifest::new(vec![
            ManifestEntry {
                model_name: "p.a".into(),
                compiled_hash: "same".into(),
                depends_on: vec![],
                vars_used: vec![],
                macros_used: vec![],
            },
            ManifestEntry {
                model_name: "p.b".into(),
                compiled_hash: "old".into(),
                depends_on: vec![],
                vars_used: vec![],
                macros_used: vec![],
            },
        ]);
        let hashes = |name: &str| match name {
            "p.a" => Some("same".to_string()),
            "p.b" => Some("new".to_string()),
            other => Some(other.to_string()),
        };
        let input = SelectionInput {
            models: &models,
            dag: &dag,
            current_hashes: &hashes,
            previous_manifest: Some(&manifest),
        };

        // p.a unchanged; p.b changed; p.c/q.d absent from the manifest.
        assert_eq!(
            names(&select_models("state:modified", &input).unwrap()),
            vec!["p.b", "p.c", "q.d"]
        );

        // No manifest: everything is modified.
        let no_manifest = SelectionInput {
            models: &models,
            dag: &dag,
            current_hashes: &hashes,
            previous_manifest: None,
        };
        assert_eq!(
            select_models("state:modified", &no_manifest).unwrap().len(),
            4
        );
    }

    #[test]
    fn test_unknown_selectors_fail() {
        let models = models();
        let dag = dag_of(&models);
        let hashes = |_: &str| None;
        let input = SelectionInput {
            models: &models,
            dag: &dag,
            current_hashes: &hashes,
            previous_manifest: None,
        };

        assert!(select_models("state:new", &input).unwrap_err().is_validation());
        assert!(select_models("missing_model", &input).unwrap_err().is_validation());
        assert!(select_models("+", &input).unwrap_err().is_validation());
    }
}
