//! SQL rewriting: row-filter injection and column-mask projection.
//!
//! All rewriting happens on the parsed AST; textual substitution cannot keep
//! aliased and self-joined occurrences straight. Filters are AND-ed into the
//! WHERE clause of every occurrence of the relation, including inside
//! subqueries, CTE bodies, and set-operation branches. Masks replace
//! projection items; `SELECT *` is expanded to the catalog column list
//! first. Mask application is idempotent.

use std::collections::BTreeMap;

use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Ident, ObjectName,
    ObjectNamePart, Query, Select, SelectItem, SelectItemQualifiedWildcardKind, SetExpr,
    Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use lakegate_core::{LakegateError, LakegateResult};

/// Parse a standalone SQL expression (filter predicate or mask body).
pub fn parse_expr(sql: &str) -> LakegateResult<Expr> {
    let dialect = DuckDbDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(sql)
        .map_err(|e| LakegateError::validation(format!("expression parse error: {e}")))?;
    parser
        .parse_expr()
        .map_err(|e| LakegateError::validation(format!("expression parse error: {e}")))
}

/// Case-preserving dotted rendering of an object name.
fn object_name_text(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => ident.value.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Whether an object name refers to the target relation. Keywords and
/// identifiers compare case-insensitively; qualification must match exactly
/// as extracted.
fn name_matches(name: &ObjectName, target: &str) -> bool {
    object_name_text(name).eq_ignore_ascii_case(target)
}

/// The qualifier injected predicates and expanded columns must use for one
/// occurrence: the alias when present, the bare relation name otherwise.
fn occurrence_qualifier(name: &ObjectName, alias: Option<&Ident>) -> String {
    match alias {
        Some(a) => a.value.clone(),
        None => name
            .0
            .last()
            .map(|part| match part {
                ObjectNamePart::Identifier(ident) => ident.value.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
    }
}

/// Fold expressions into a single AND-chain, left to right.
fn and_chain(exprs: Vec<Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(|acc, e| Expr::BinaryOp {
        left: Box::new(acc),
        op: BinaryOperator::And,
        right: Box::new(e),
    })
}

/// Qualify bare column identifiers in a predicate with a relation qualifier,
/// leaving already-qualified references alone.
fn qualify_expr(expr: &mut Expr, qualifier: &str) {
    match expr {
        Expr::Identifier(ident) => {
            *expr = Expr::CompoundIdentifier(vec![Ident::new(qualifier), ident.clone()]);
        }
        Expr::CompoundIdentifier(_) => {}
        Expr::BinaryOp { left, right, .. } => {
            qualify_expr(left, qualifier);
            qualify_expr(right, qualifier);
        }
        Expr::UnaryOp { expr: inner, .. } | Expr::Nested(inner) => qualify_expr(inner, qualifier),
        Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner) => qualify_expr(inner, qualifier),
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => {
            qualify_expr(a, qualifier);
            qualify_expr(b, qualifier);
        }
        Expr::Between {
            expr: inner,
            low,
            high,
            ..
        } => {
            qualify_expr(inner, qualifier);
            qualify_expr(low, qualifier);
            qualify_expr(high, qualifier);
        }
        Expr::InList {
            expr: inner, list, ..
        } => {
            qualify_expr(inner, qualifier);
            for item in list {
                qualify_expr(item, qualifier);
            }
        }
        Expr::Like {
            expr: inner,
            pattern,
            ..
        }
        | Expr::ILike {
            expr: inner,
            pattern,
            ..
        } => {
            qualify_expr(inner, qualifier);
            qualify_expr(pattern, qualifier);
        }
        Expr::Cast { expr: inner, .. } => qualify_expr(inner, qualifier),
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(operand) = operand {
                qualify_expr(operand, qualifier);
            }
            for when in conditions {
                qualify_expr(&mut when.condition, qualifier);
                qualify_expr(&mut when.result, qualifier);
            }
            if let Some(else_result) = else_result {
                qualify_expr(else_result, qualifier);
            }
        }
        // The left operand belongs to this occurrence; the subquery has its
        // own scope.
        Expr::InSubquery { expr: inner, .. } => qualify_expr(inner, qualifier),
        Expr::Tuple(items) => {
            for item in items {
                qualify_expr(item, qualifier);
            }
        }
        Expr::Array(array) => {
            for item in &mut array.elem {
                qualify_expr(item, qualifier);
            }
        }
        Expr::AnyOp { left, right, .. } | Expr::AllOp { left, right, .. } => {
            qualify_expr(left, qualifier);
            qualify_expr(right, qualifier);
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &mut func.args {
                for arg in &mut list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                            qualify_expr(e, qualifier)
                        }
                        FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(e),
                            ..
                        } => qualify_expr(e, qualifier),
                        FunctionArg::ExprNamed {
                            arg: FunctionArgExpr::Expr(e),
                            ..
                        } => qualify_expr(e, qualifier),
                        _ => {}
                    }
                }
            }
        }
        // Anything else keeps its references as written.
        _ => {}
    }
}

/// Invoke `f` on every subquery nested inside an expression.
fn for_each_subquery(
    expr: &mut Expr,
    f: &mut dyn FnMut(&mut Query) -> LakegateResult<()>,
) -> LakegateResult<()> {
    match expr {
        Expr::Subquery(query) => f(query),
        Expr::Exists { subquery, .. } => f(subquery),
        Expr::InSubquery {
            expr: inner,
            subquery,
            ..
        } => {
            for_each_subquery(inner, f)?;
            f(subquery)
        }
        Expr::BinaryOp { left, right, .. } => {
            for_each_subquery(left, f)?;
            for_each_subquery(right, f)
        }
        Expr::UnaryOp { expr: inner, .. } | Expr::Nested(inner) => for_each_subquery(inner, f),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => for_each_subquery(inner, f),
        Expr::Between {
            expr: inner,
            low,
            high,
            ..
        } => {
            for_each_subquery(inner, f)?;
            for_each_subquery(low, f)?;
            for_each_subquery(high, f)
        }
        Expr::InList {
            expr: inner, list, ..
        } => {
            for_each_subquery(inner, f)?;
            for item in list {
                for_each_subquery(item, f)?;
            }
            Ok(())
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &mut func.args {
                for arg in &mut list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                    | FunctionArg::Named {
                        arg: FunctionArgExpr::Expr(e),
                        ..
                    }
                    | FunctionArg::ExprNamed {
                        arg: FunctionArgExpr::Expr(e),
                        ..
                    } = arg
                    {
                        for_each_subquery(e, f)?;
                    }
                }
            }
            Ok(())
        }
        Expr::Cast { expr: inner, .. } => for_each_subquery(inner, f),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Row-filter injection
// ---------------------------------------------------------------------------

/// AND the given filter expressions into the WHERE clause of every
/// occurrence of `table` in the statement. Filters must arrive in the
/// deterministic (ascending filter id) order; they collapse to one AND-chain.
pub fn inject_row_filters(
    statement: &mut Statement,
    table: &str,
    filter_sqls: &[String],
) -> LakegateResult<()> {
    if filter_sqls.is_empty() {
        return Ok(());
    }
    let parsed = filter_sqls
        .iter()
        .map(|f| parse_expr(f))
        .collect::<LakegateResult<Vec<_>>>()?;
    let combined = and_chain(parsed).expect("non-empty filter list");

    if let Statement::Query(query) = statement {
        filter_query(query, table, &combined)?;
    }
    Ok(())
}

fn filter_query(query: &mut Query, table: &str, predicate: &Expr) -> LakegateResult<()> {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            filter_query(&mut cte.query, table, predicate)?;
        }
    }
    filter_set_expr(&mut query.body, table, predicate)
}

fn filter_set_expr(body: &mut SetExpr, table: &str, predicate: &Expr) -> LakegateResult<()> {
    match body {
        SetExpr::Select(select) => filter_select(select, table, predicate),
        SetExpr::Query(query) => filter_query(query, table, predicate),
        SetExpr::SetOperation { left, right, .. } => {
            filter_set_expr(left, table, predicate)?;
            filter_set_expr(right, table, predicate)
        }
        _ => Ok(()),
    }
}

fn filter_table_factor(
    factor: &mut TableFactor,
    table: &str,
    predicate: &Expr,
) -> LakegateResult<()> {
    match factor {
        TableFactor::Derived { subquery, .. } => filter_query(subquery, table, predicate),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => filter_table_with_joins(table_with_joins, table, predicate),
        _ => Ok(()),
    }
}

fn filter_table_with_joins(
    twj: &mut TableWithJoins,
    table: &str,
    predicate: &Expr,
) -> LakegateResult<()> {
    filter_table_factor(&mut twj.relation, table, predicate)?;
    for join in &mut twj.joins {
        filter_table_factor(&mut join.relation, table, predicate)?;
    }
    Ok(())
}

fn filter_select(select: &mut Select, table: &str, predicate: &Expr) -> LakegateResult<()> {
    // Subqueries in FROM first.
    for twj in &mut select.from {
        filter_table_with_joins(twj, table, predicate)?;
    }
    // Then subqueries hiding in projections and predicates.
    for item in &mut select.projection {
        if let SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } = item {
            for_each_subquery(e, &mut |q| filter_query(q, table, predicate))?;
        }
    }
    if let Some(selection) = &mut select.selection {
        for_each_subquery(selection, &mut |q| filter_query(q, table, predicate))?;
    }

    // One predicate per occurrence of the relation in this FROM, bound to
    // the occurrence's alias.
    let mut qualifiers = Vec::new();
    for twj in &select.from {
        collect_occurrences(&twj.relation, table, &mut qualifiers);
        for join in &twj.joins {
            collect_occurrences(&join.relation, table, &mut qualifiers);
        }
    }

    let mut selection = select.selection.take();
    for qualifier in qualifiers {
        let mut bound = predicate.clone();
        qualify_expr(&mut bound, &qualifier);
        selection = Some(match selection {
            Some(existing) => Expr::BinaryOp {
                left: Box::new(existing),
                op: BinaryOperator::And,
                right: Box::new(bound),
            },
            None => bound,
        });
    }
    select.selection = selection;
    Ok(())
}

fn collect_occurrences(factor: &TableFactor, table: &str, qualifiers: &mut Vec<String>) {
    if let TableFactor::Table { name, alias, args, .. } = factor {
        if args.is_none() && name_matches(name, table) {
            qualifiers.push(occurrence_qualifier(name, alias.as_ref().map(|a| &a.name)));
        }
    }
}

// ---------------------------------------------------------------------------
// Column-mask projection
// ---------------------------------------------------------------------------

/// Masks ready for substitution: catalog-cased column name, parsed
/// expression, and the rendered text used for the idempotence check.
struct PreparedMask {
    column: String,
    expr: Expr,
    rendered: String,
}

/// Replace every top-level projection of a masked column with
/// `<mask> AS <column>`. `columns` is the table's full column list in
/// catalog order, used to expand `*` before substitution.
pub fn apply_column_masks(
    statement: &mut Statement,
    table: &str,
    masks: &BTreeMap<String, String>,
    columns: &[String],
) -> LakegateResult<()> {
    if masks.is_empty() {
        return Ok(());
    }
    let prepared = masks
        .iter()
        .map(|(column, mask_sql)| {
            let expr = parse_expr(mask_sql)?;
            let rendered = expr.to_string();
            Ok(PreparedMask {
                column: column.clone(),
                expr,
                rendered,
            })
        })
        .collect::<LakegateResult<Vec<_>>>()?;

    if let Statement::Query(query) = statement {
        mask_query(query, table, &prepared, columns)?;
    }
    Ok(())
}

fn mask_for<'a>(prepared: &'a [PreparedMask], column: &str) -> Option<&'a PreparedMask> {
    prepared.iter().find(|m| m.column.eq_ignore_ascii_case(column))
}

fn mask_query(
    query: &mut Query,
    table: &str,
    masks: &[PreparedMask],
    columns: &[String],
) -> LakegateResult<()> {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            mask_query(&mut cte.query, table, masks, columns)?;
        }
    }
    mask_set_expr(&mut query.body, table, masks, columns)
}

fn mask_set_expr(
    body: &mut SetExpr,
    table: &str,
    masks: &[PreparedMask],
    columns: &[String],
) -> LakegateResult<()> {
    match body {
        SetExpr::Select(select) => mask_select(select, table, masks, columns),
        SetExpr::Query(query) => mask_query(query, table, masks, columns),
        SetExpr::SetOperation { left, right, .. } => {
            mask_set_expr(left, table, masks, columns)?;
            mask_set_expr(right, table, masks, columns)
        }
        _ => Ok(()),
    }
}

/// One relation in a FROM clause, as needed for star expansion.
struct FromRelation {
    qualifier: String,
    is_target: bool,
}

fn mask_select(
    select: &mut Select,
    table: &str,
    masks: &[PreparedMask],
    columns: &[String],
) -> LakegateResult<()> {
    // Recurse into derived tables regardless of whether this level matches.
    for twj in &mut select.from {
        if let TableFactor::Derived { subquery, .. } = &mut twj.relation {
            mask_query(subquery, table, masks, columns)?;
        }
        for join in &mut twj.joins {
            if let TableFactor::Derived { subquery, .. } = &mut join.relation {
                mask_query(subquery, table, masks, columns)?;
            }
        }
    }

    // Relations of this FROM, in order.
    let mut relations = Vec::new();
    for twj in &select.from {
        push_relation(&twj.relation, table, &mut relations);
        for join in &twj.joins {
            push_relation(&join.relation, table, &mut relations);
        }
    }
    if !relations.iter().any(|r| r.is_target) {
        return Ok(());
    }

    let target_qualifiers: Vec<&str> = relations
        .iter()
        .filter(|r| r.is_target)
        .map(|r| r.qualifier.as_str())
        .collect();
    let single_relation = relations.len() == 1;

    let mut projection = Vec::with_capacity(select.projection.len());
    for item in std::mem::take(&mut select.projection) {
        match item {
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                match mask_for(masks, &ident.value) {
                    Some(mask) => projection.push(masked_item(mask)),
                    None => projection.push(SelectItem::UnnamedExpr(Expr::Identifier(ident))),
                }
            }
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => {
                let qualifier_matches = parts.len() >= 2
                    && target_qualifiers
                        .iter()
                        .any(|q| parts[parts.len() - 2].value.eq_ignore_ascii_case(q));
                let column = parts.last().map(|p| p.value.clone()).unwrap_or_default();
                match (qualifier_matches, mask_for(masks, &column)) {
                    (true, Some(mask)) => projection.push(masked_item(mask)),
                    _ => projection.push(SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts))),
                }
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                projection.push(rewrite_aliased_item(expr, alias, masks, &target_qualifiers));
            }
            SelectItem::Wildcard(options) => {
                for relation in &relations {
                    if relation.is_target {
                        for column in columns {
                            projection.push(expanded_column(
                                column,
                                &relation.qualifier,
                                single_relation,
                                masks,
                            ));
                        }
                    } else {
                        projection.push(SelectItem::QualifiedWildcard(
                            SelectItemQualifiedWildcardKind::ObjectName(ObjectName::from(vec![
                                Ident::new(relation.qualifier.clone()),
                            ])),
                            options.clone(),
                        ));
                    }
                }
            }
            SelectItem::QualifiedWildcard(kind, options) => {
                let expanded = match &kind {
                    SelectItemQualifiedWildcardKind::ObjectName(name) => {
                        let text = object_name_text(name);
                        target_qualifiers
                            .iter()
                            .find(|q| text.eq_ignore_ascii_case(q))
                            .map(|q| q.to_string())
                    }
                    _ => None,
                };
                match expanded {
                    Some(qualifier) => {
                        for column in columns {
                            projection.push(expanded_column(column, &qualifier, false, masks));
                        }
                    }
                    None => projection.push(SelectItem::QualifiedWildcard(kind, options)),
                }
            }
            other => projection.push(other),
        }
    }
    select.projection = projection;
    Ok(())
}

fn push_relation(factor: &TableFactor, table: &str, relations: &mut Vec<FromRelation>) {
    match factor {
        TableFactor::Table { name, alias, args, .. } => {
            relations.push(FromRelation {
                qualifier: occurrence_qualifier(name, alias.as_ref().map(|a| &a.name)),
                is_target: args.is_none() && name_matches(name, table),
            });
        }
        TableFactor::Derived { alias, .. } => {
            relations.push(FromRelation {
                qualifier: alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default(),
                is_target: false,
            });
        }
        _ => {}
    }
}

/// `<mask> AS <column>` projection item.
fn masked_item(mask: &PreparedMask) -> SelectItem {
    SelectItem::ExprWithAlias {
        expr: mask.expr.clone(),
        alias: Ident::new(mask.column.clone()),
    }
}

/// A star-expanded column: plain identifier when unmasked, masked item
/// otherwise. Multi-relation FROMs qualify unmasked columns to stay
/// unambiguous.
fn expanded_column(
    column: &str,
    qualifier: &str,
    single_relation: bool,
    masks: &[PreparedMask],
) -> SelectItem {
    match mask_for(masks, column) {
        Some(mask) => masked_item(mask),
        None if single_relation => SelectItem::UnnamedExpr(Expr::Identifier(Ident::new(column))),
        None => SelectItem::UnnamedExpr(Expr::CompoundIdentifier(vec![
            Ident::new(qualifier),
            Ident::new(column),
        ])),
    }
}

/// Aliased projections: a masked column keeps its alias but loses the raw
/// reference. Re-applying to an already-masked item is a no-op.
fn rewrite_aliased_item(
    expr: Expr,
    alias: Ident,
    masks: &[PreparedMask],
    target_qualifiers: &[&str],
) -> SelectItem {
    // Already masked: alias names the masked column and the expression is
    // the mask itself.
    if let Some(mask) = mask_for(masks, &alias.value) {
        if expr.to_string() == mask.rendered {
            return SelectItem::ExprWithAlias { expr, alias };
        }
    }

    let masked = match &expr {
        Expr::Identifier(ident) => mask_for(masks, &ident.value),
        Expr::CompoundIdentifier(parts) => {
            let qualifier_matches = parts.len() >= 2
                && target_qualifiers
                    .iter()
                    .any(|q| parts[parts.len() - 2].value.eq_ignore_ascii_case(q));
            if qualifier_matches {
                parts.last().and_then(|p| mask_for(masks, &p.value))
            } else {
                None
            }
        }
        _ => None,
    };

    match masked {
        Some(mask) => SelectItem::ExprWithAlias {
            expr: mask.expr.clone(),
            alias,
        },
        None => SelectItem::ExprWithAlias { expr, alias },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use pretty_assertions::assert_eq;

    fn filtered(sql: &str, table: &str, filters: &[&str]) -> String {
        let (mut statement, _) = classify(sql).unwrap();
        let filters: Vec<String> = filters.iter().map(|s| s.to_string()).collect();
        inject_row_filters(&mut statement, table, &filters).unwrap();
        statement.to_string()
    }

    fn masked(sql: &str, table: &str, masks: &[(&str, &str)], columns: &[&str]) -> String {
        let (mut statement, _) = classify(sql).unwrap();
        let masks: BTreeMap<String, String> = masks
            .iter()
            .map(|(c, m)| (c.to_string(), m.to_string()))
            .collect();
        let columns: Vec<String> = columns.iter().map(|s| s.to_string()).collect();
        apply_column_masks(&mut statement, table, &masks, &columns).unwrap();
        statement.to_string()
    }

    #[test]
    fn test_filter_added_to_bare_select() {
        let out = filtered("SELECT a FROM t", "t", &["x = 1"]);
        assert_eq!(out, "SELECT a FROM t WHERE t.x = 1");
    }

    #[test]
    fn test_filter_ands_with_existing_where() {
        let out = filtered("SELECT a FROM t WHERE a > 5", "t", &["x = 1"]);
        assert_eq!(out, "SELECT a FROM t WHERE a > 5 AND t.x = 1");
    }

    #[test]
    fn test_multiple_filters_single_and_chain() {
        let out = filtered("SELECT a FROM t", "t", &["x = 1", "y = 2"]);
        assert_eq!(out, "SELECT a FROM t WHERE t.x = 1 AND t.y = 2");
    }

    #[test]
    fn test_filter_respects_alias() {
        let out = filtered("SELECT o.a FROM orders AS o", "orders", &["region = 'EU'"]);
        assert_eq!(out, "SELECT o.a FROM orders AS o WHERE o.region = 'EU'");
    }

    #[test]
    fn test_filter_applied_per_self_join_occurrence() {
        let out = filtered(
            "SELECT x.a FROM t AS x JOIN t AS y ON x.id = y.id",
            "t",
            &["cls = 1"],
        );
        assert_eq!(
            out,
            "SELECT x.a FROM t AS x JOIN t AS y ON x.id = y.id WHERE x.cls = 1 AND y.cls = 1"
        );
    }

    #[test]
    fn test_filter_reaches_subquery_and_union() {
        let out = filtered(
            "SELECT * FROM (SELECT a FROM t) AS sub UNION ALL SELECT a FROM t",
            "t",
            &["x = 1"],
        );
        assert_eq!(
            out,
            "SELECT * FROM (SELECT a FROM t WHERE t.x = 1) AS sub UNION ALL SELECT a FROM t WHERE t.x = 1"
        );
    }

    #[test]
    fn test_filter_reaches_cte_body() {
        let out = filtered(
            "WITH c AS (SELECT a FROM t) SELECT * FROM c",
            "t",
            &["x = 1"],
        );
        assert_eq!(
            out,
            "WITH c AS (SELECT a FROM t WHERE t.x = 1) SELECT * FROM c"
        );
    }

    #[test]
    fn test_filter_reaches_where_subquery() {
        let out = filtered(
            "SELECT a FROM u WHERE id IN (SELECT id FROM t)",
            "t",
            &["x = 1"],
        );
        assert_eq!(
            out,
            "SELECT a FROM u WHERE id IN (SELECT id FROM t WHERE t.x = 1)"
        );
    }

    #[test]
    fn test_filter_skips_other_tables() {
        let out = filtered("SELECT a FROM other", "t", &["x = 1"]);
        assert_eq!(out, "SELECT a FROM other");
    }

    #[test]
    fn test_qualified_filter_columns_left_alone() {
        let out = filtered("SELECT a FROM t", "t", &["t.x = 1"]);
        assert_eq!(out, "SELECT a FROM t WHERE t.x = 1");
    }

    #[test]
    fn test_case_filter_qualified_per_occurrence() {
        let out = filtered(
            "SELECT x.a FROM t AS x JOIN t AS y ON x.id = y.id",
            "t",
            &["CASE WHEN region = 'EU' THEN true ELSE false END"],
        );
        assert_eq!(
            out,
            "SELECT x.a FROM t AS x JOIN t AS y ON x.id = y.id \
             WHERE CASE WHEN x.region = 'EU' THEN true ELSE false END \
             AND CASE WHEN y.region = 'EU' THEN true ELSE false END"
        );
    }

    #[test]
    fn test_in_subquery_filter_qualifies_left_operand_only() {
        let out = filtered("SELECT a FROM t", "t", &["region IN (SELECT r FROM allowed)"]);
        assert_eq!(
            out,
            "SELECT a FROM t WHERE t.region IN (SELECT r FROM allowed)"
        );
    }

    #[test]
    fn test_any_op_filter_qualified() {
        let out = filtered("SELECT a FROM t AS z", "t", &["region = ANY(allowed_regions)"]);
        assert_eq!(
            out,
            "SELECT a FROM t AS z WHERE z.region = ANY(z.allowed_regions)"
        );
    }

    #[test]
    fn test_mask_replaces_plain_projection() {
        let out = masked(
            "SELECT name, age FROM people",
            "people",
            &[("name", "md5(name)")],
            &["name", "age"],
        );
        assert_eq!(out, "SELECT md5(name) AS name, age FROM people");
    }

    #[test]
    fn test_mask_expands_star_in_catalog_order() {
        let out = masked(
            "SELECT * FROM people",
            "people",
            &[("name", "md5(name)")],
            &["id", "name", "age"],
        );
        assert_eq!(out, "SELECT id, md5(name) AS name, age FROM people");
    }

    #[test]
    fn test_mask_is_idempotent() {
        let once = masked(
            "SELECT * FROM people",
            "people",
            &[("name", "md5(name)")],
            &["id", "name", "age"],
        );
        let twice = masked(&once, "people", &[("name", "md5(name)")], &["id", "name", "age"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_mask_leaves_predicate_references() {
        let out = masked(
            "SELECT id FROM people WHERE name = 'x'",
            "people",
            &[("name", "md5(name)")],
            &["id", "name"],
        );
        assert_eq!(out, "SELECT id FROM people WHERE name = 'x'");
    }

    #[test]
    fn test_mask_qualified_projection() {
        let out = masked(
            "SELECT p.name FROM people AS p",
            "people",
            &[("name", "md5(name)")],
            &["id", "name"],
        );
        assert_eq!(out, "SELECT md5(name) AS name FROM people AS p");
    }

    #[test]
    fn test_mask_aliased_projection_keeps_alias() {
        let out = masked(
            "SELECT name AS n FROM people",
            "people",
            &[("name", "md5(name)")],
            &["id", "name"],
        );
        assert_eq!(out, "SELECT md5(name) AS n FROM people");
    }

    #[test]
    fn test_mask_qualified_wildcard() {
        let out = masked(
            "SELECT p.* FROM people AS p JOIN cities AS c ON p.city = c.id",
            "people",
            &[("name", "md5(name)")],
            &["id", "name"],
        );
        assert_eq!(
            out,
            "SELECT p.id, md5(name) AS name FROM people AS p JOIN cities AS c ON p.city = c.id"
        );
    }

    #[test]
    fn test_mask_star_with_join_keeps_other_relation_wildcard() {
        let out = masked(
            "SELECT * FROM people AS p JOIN cities AS c ON p.city = c.id",
            "people",
            &[("name", "md5(name)")],
            &["id", "name"],
        );
        assert_eq!(
            out,
            "SELECT p.id, md5(name) AS name, c.* FROM people AS p JOIN cities AS c ON p.city = c.id"
        );
    }
}
