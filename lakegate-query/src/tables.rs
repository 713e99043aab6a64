//! Table-reference extraction.
//!
//! Walks the AST collecting every relation a statement touches. CTE names
//! are excluded; function-like sources (`read_parquet(...)`) are reported
//! with the reserved `__func__` marker so they are never matched against the
//! catalog. Identifier case is preserved.

use std::collections::HashSet;
use std::ops::ControlFlow;

use sqlparser::ast::{ObjectNamePart, Query, Statement, TableFactor, Visit, Visitor};

/// Marker prefix for function-like table sources.
pub const FUNC_SOURCE_MARKER: &str = "__func__";

struct TableRefVisitor {
    refs: Vec<String>,
    cte_names: HashSet<String>,
}

impl Visitor for TableRefVisitor {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.clone());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Table { name, args, .. } = table_factor {
            let joined = name
                .0
                .iter()
                .map(|part| match part {
                    ObjectNamePart::Identifier(ident) => ident.value.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(".");

            if args.is_some() {
                self.refs.push(format!("{FUNC_SOURCE_MARKER}{joined}"));
            } else {
                self.refs.push(joined);
            }
        }
        ControlFlow::Continue(())
    }
}

/// Extract the set of relation references from a statement, in encounter
/// order and de-duplicated.
pub fn extract_table_refs(statement: &Statement) -> Vec<String> {
    let mut visitor = TableRefVisitor {
        refs: Vec::new(),
        cte_names: HashSet::new(),
    };
    let _ = statement.visit(&mut visitor);

    let cte_names = visitor.cte_names;
    let mut seen = HashSet::new();
    visitor
        .refs
        .into_iter()
        .filter(|r| {
            // Bare references to a CTE are not real relations.
            !(!r.contains('.') && cte_names.contains(r.trim_start_matches(FUNC_SOURCE_MARKER)))
        })
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

/// Whether a reference is a function-like source.
pub fn is_func_source(reference: &str) -> bool {
    reference.starts_with(FUNC_SOURCE_MARKER)
}
