//! Model compilation.
//!
//! Renders the restricted template language (`ref`, `source`, `var`,
//! `is_incremental`, `this`, and `{% if %}` blocks over the incremental
//! flag), records dependency/variable/macro usage, and computes the stable
//! compiled hash used by the `state:modified` selector.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use lakegate_core::{LakegateError, LakegateResult, Materialization, Model};
use lakegate_duckdb::quote_ident;
use lakegate_query::{classify, extract_table_refs, is_func_source};

/// Everything a render depends on besides the model SQL itself.
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub target_catalog: String,
    pub target_schema: String,
    pub vars: BTreeMap<String, String>,
    pub full_refresh: bool,
    pub project_name: String,
    pub model_name: String,
    pub materialization: Materialization,
}

impl CompileContext {
    /// Whether `is_incremental()` renders true.
    fn incremental(&self) -> bool {
        self.materialization == Materialization::Incremental && !self.full_refresh
    }

    /// The model's own target relation.
    fn this_relation(&self) -> String {
        fqn(&self.target_catalog, &self.target_schema, &self.model_name)
    }
}

/// Fully-qualified, identifier-quoted relation name.
pub fn fqn(catalog: &str, schema: &str, name: &str) -> String {
    format!(
        "{}.{}.{}",
        quote_ident(catalog),
        quote_ident(schema),
        quote_ident(name)
    )
}

/// Output of one model compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModel {
    pub rendered_sql: String,
    /// Sorted, de-duplicated: qualified model names and `source:` tokens.
    pub depends_on: Vec<String>,
    pub vars_used: Vec<String>,
    pub macros_used: Vec<String>,
    pub compiled_hash: String,
}

/// Fields folded into the compiled hash, serialized in declaration order
/// with the var map sorted by key.
#[derive(Serialize)]
struct HashContext<'a> {
    target_catalog: &'a str,
    target_schema: &'a str,
    project_name: &'a str,
    model_name: &'a str,
    materialization: &'a str,
    full_refresh: bool,
    vars: &'a BTreeMap<String, String>,
}

#[derive(Default)]
struct RenderState {
    refs: Vec<String>,
    sources: Vec<String>,
    vars_used: Vec<String>,
    macros_used: Vec<String>,
}

/// Compiles model SQL against the set of known models.
pub struct ModelCompiler<'a> {
    known_models: &'a [Model],
}

impl<'a> ModelCompiler<'a> {
    pub fn new(known_models: &'a [Model]) -> Self {
        Self { known_models }
    }

    /// Render a model and extract its dependency sets.
    pub fn compile(&self, model: &Model, context: &CompileContext) -> LakegateResult<CompiledModel> {
        let mut state = RenderState::default();

        let without_conditionals = resolve_conditionals(&model.sql, context.incremental())?;
        let rendered_sql = self.render_directives(&without_conditionals, context, &mut state)?;

        let mut depends_on = state.refs.clone();
        depends_on.extend(state.sources.iter().cloned());
        depends_on.extend(model.depends_on.iter().cloned());
        depends_on.extend(self.static_relation_deps(&rendered_sql)?);
        depends_on.sort();
        depends_on.dedup();
        // A model never depends on itself through its own target relation.
        depends_on.retain(|d| d != &model.qualified_name());

        let mut vars_used = state.vars_used;
        vars_used.sort();
        vars_used.dedup();
        let mut macros_used = state.macros_used;
        macros_used.sort();
        macros_used.dedup();

        let compiled_hash = compute_hash(&rendered_sql, context)?;

        Ok(CompiledModel {
            rendered_sql,
            depends_on,
            vars_used,
            macros_used,
            compiled_hash,
        })
    }

    /// Statically-extractable relation references of the rendered SQL,
    /// mapped back to model names where possible; everything else becomes a
    /// `source:` token. CTE names and function-like sources are excluded by
    /// the extractor.
    fn static_relation_deps(&self, rendered_sql: &str) -> LakegateResult<Vec<String>> {
        let (statement, _) = classify(rendered_sql)
            .map_err(|e| e.with_context("rendered model SQL"))?;
        let refs = extract_table_refs(&statement);

        let mut deps = Vec::new();
        for reference in refs {
            if is_func_source(&reference) {
                continue;
            }
            let last = reference.rsplit('.').next().unwrap_or(&reference);
            let candidates: Vec<&Model> = self
                .known_models
                .iter()
                .filter(|m| m.name == last)
                .collect();
            match candidates.as_slice() {
                [unique] => deps.push(unique.qualified_name()),
                _ => deps.push(format!("source:{reference}")),
            }
        }
        Ok(deps)
    }

    fn render_directives(
        &self,
        input: &str,
        context: &CompileContext,
        state: &mut RenderState,
    ) -> LakegateResult<String> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| LakegateError::validation("unterminated '{{' directive"))?;
            let inner = after[..end].trim();
            out.push_str(&self.render_directive(inner, context, state)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn render_directive(
        &self,
        inner: &str,
        context: &CompileContext,
        state: &mut RenderState,
    ) -> LakegateResult<String> {
        if inner == "this" {
            return Ok(context.this_relation());
        }
        if inner == "is_incremental()" {
            return Ok(if context.incremental() { "true" } else { "false" }.to_owned());
        }
        if let Some(args) = call_args(inner, "ref") {
            let args = parse_string_args(&args)?;
            let [target] = args.as_slice() else {
                return Err(LakegateError::validation(format!(
                    "ref() takes one argument, got {}",
                    args.len()
                )));
            };
            let (rendered, qualified) = self.resolve_ref(target, context)?;
            state.refs.push(qualified);
            return Ok(rendered);
        }
        if let Some(args) = call_args(inner, "source") {
            let args = parse_string_args(&args)?;
            let [schema, table] = args.as_slice() else {
                return Err(LakegateError::validation(format!(
                    "source() takes two arguments, got {}",
                    args.len()
                )));
            };
            state.sources.push(format!("source:{schema}.{table}"));
            return Ok(format!("{}.{}", quote_ident(schema), quote_ident(table)));
        }
        if let Some(args) = call_args(inner, "var") {
            return self.render_var(&args, context, state);
        }
        if let Some((module, name, args)) = macro_reference(inner) {
            state.macros_used.push(format!("{module}.{name}"));
            // Macros live session-locally under their bare name; only the
            // reference is recorded here.
            return Ok(format!("{name}({args})"));
        }

        Err(LakegateError::validation(format!(
            "unknown template directive '{{{{ {inner} }}}}'"
        )))
    }

    fn render_var(
        &self,
        args: &str,
        context: &CompileContext,
        state: &mut RenderState,
    ) -> LakegateResult<String> {
        let parts = split_args(args);
        let name = unquote(parts.first().map(String::as_str).unwrap_or("")).ok_or_else(|| {
            LakegateError::validation("var() requires a quoted variable name")
        })?;
        state.vars_used.push(name.clone());

        if let Some(value) = context.vars.get(&name) {
            return Ok(value.clone());
        }
        match parts.get(1) {
            Some(default) => Ok(unquote(default).unwrap_or_else(|| default.trim().to_owned())),
            None => Err(LakegateError::validation(format!(
                "missing required variable '{name}'"
            ))),
        }
    }

    fn resolve_ref(
        &self,
        target: &str,
        context: &CompileContext,
    ) -> LakegateResult<(String, String)> {
        let resolved = if let Some((project, name)) = target.split_once('.') {
            self.known_models
                .iter()
                .find(|m| m.project_name == project && m.name == name)
                .ok_or_else(|| {
                    LakegateError::validation(format!("ref('{target}'): unknown model"))
                })?
        } else {
            let candidates: Vec<&Model> = self
                .known_models
                .iter()
                .filter(|m| m.name == target)
                .collect();
            match candidates.as_slice() {
                [] => {
                    return Err(LakegateError::validation(format!(
                        "ref('{target}'): unknown model"
                    )));
                }
                [unique] => *unique,
                _ => {
                    return Err(LakegateError::validation(format!(
                        "ref('{target}') is ambiguous across projects; qualify it"
                    )));
                }
            }
        };

        // Ephemeral models are referenced by CTE name; they never own a
        // target relation.
        let rendered = if resolved.materialization == Materialization::Ephemeral {
            quote_ident(&resolved.name)
        } else {
            fqn(&context.target_catalog, &context.target_schema, &resolved.name)
        };
        Ok((rendered, resolved.qualified_name()))
    }
}

/// Compute the stable compiled hash.
pub fn compute_hash(rendered_sql: &str, context: &CompileContext) -> LakegateResult<String> {
    let hash_context = HashContext {
        target_catalog: &context.target_catalog,
        target_schema: &context.target_schema,
        project_name: &context.project_name,
        model_name: &context.model_name,
        materialization: context.materialization.as_str(),
        full_refresh: context.full_refresh,
        vars: &context.vars,
    };
    let canonical = serde_json::to_string(&hash_context)?;

    let mut hasher = Sha256::new();
    hasher.update(rendered_sql.as_bytes());
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Conditional blocks
// ---------------------------------------------------------------------------

/// Resolve `{% if cond %} … {% else %} … {% endif %}` blocks, innermost
/// blocks handled through recursion on the kept branch.
fn resolve_conditionals(input: &str, incremental: bool) -> LakegateResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{%") {
        out.push_str(&rest[..start]);
        let (tag, after_tag) = read_tag(&rest[start..])?;

        let Some(condition) = tag.strip_prefix("if ") else {
            return Err(LakegateError::validation(format!(
                "unexpected template tag '{{% {tag} %}}'"
            )));
        };
        let condition_value = eval_condition(condition.trim(), incremental)?;

        let (then_branch, else_branch, remainder) = split_if_block(after_tag)?;
        let kept = if condition_value { then_branch } else { else_branch };
        out.push_str(&resolve_conditionals(kept, incremental)?);
        rest = remainder;
    }
    out.push_str(rest);
    Ok(out)
}

/// Read one `{% … %}` tag starting at the input head; returns the trimmed
/// tag body and the text after the closing `%}`.
fn read_tag(input: &str) -> LakegateResult<(&str, &str)> {
    debug_assert!(input.starts_with("{%"));
    let end = input
        .find("%}")
        .ok_or_else(|| LakegateError::validation("unterminated '{%' tag"))?;
    Ok((input[2..end].trim(), &input[end + 2..]))
}

/// Split the text after `{% if … %}` into then-branch, else-branch, and the
/// remainder after `{% endif %}`, honoring nested if-blocks.
fn split_if_block(input: &str) -> LakegateResult<(&str, &str, &str)> {
    let mut depth = 0usize;
    let mut else_at: Option<usize> = None;
    let mut cursor = 0usize;

    while let Some(offset) = input[cursor..].find("{%") {
        let tag_start = cursor + offset;
        let (tag, after) = read_tag(&input[tag_start..])?;
        let after_offset = input.len() - after.len();

        if tag.starts_with("if ") || tag == "if" {
            depth += 1;
        } else if tag == "endif" {
            if depth == 0 {
                let then_end = else_at.unwrap_or(tag_start);
                let then_branch = &input[..then_end];
                let else_branch = match else_at {
                    Some(at) => {
                        // Skip past the `{% else %}` tag itself.
                        let after_else = input[at..]
                            .find("%}")
                            .map(|e| at + e + 2)
                            .unwrap_or(tag_start);
                        &input[after_else..tag_start]
                    }
                    None => "",
                };
                return Ok((then_branch, else_branch, after));
            }
            depth -= 1;
        } else if tag == "else" && depth == 0 {
            else_at = Some(tag_start);
        }

        cursor = after_offset;
    }

    Err(LakegateError::validation("missing '{% endif %}'"))
}

fn eval_condition(condition: &str, incremental: bool) -> LakegateResult<bool> {
    match condition {
        "is_incremental()" => Ok(incremental),
        "not is_incremental()" => Ok(!incremental),
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(LakegateError::validation(format!(
            "unsupported template condition '{other}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Directive argument parsing
// ---------------------------------------------------------------------------

/// If `inner` is a call of `name`, return its raw argument text.
fn call_args(inner: &str, name: &str) -> Option<String> {
    let rest = inner.strip_prefix(name)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('(')?;
    let rest = rest.strip_suffix(')')?;
    Some(rest.to_owned())
}

/// Match `module.fn(args)` macro references.
fn macro_reference(inner: &str) -> Option<(String, String, String)> {
    let open = inner.find('(')?;
    if !inner.ends_with(')') {
        return None;
    }
    let call = &inner[..open];
    let args = &inner[open + 1..inner.len() - 1];
    let (module, name) = call.split_once('.')?;

    let is_ident =
        |s: &str| -> bool {
            !s.is_empty()
                && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
    if is_ident(module.trim()) && is_ident(name.trim()) {
        Some((
            module.trim().to_owned(),
            name.trim().to_owned(),
            args.trim().to_owned(),
        ))
    } else {
        None
    }
}

/// Split argument text on top-level commas, respecting quotes.
fn split_args(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in args.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                ',' => {
                    parts.push(current.trim().to_owned());
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_owned());
    }
    parts
}

/// Parse all arguments as quoted strings.
fn parse_string_args(args: &str) -> LakegateResult<Vec<String>> {
    split_args(args)
        .iter()
        .map(|a| {
            unquote(a).ok_or_else(|| {
                LakegateError::validation(format!("expected quoted string argument, got '{a}'"))
            })
        })
        .collect()
}

/// Strip matching single or double quotes.
fn unquote(s: &str) -> Option<String> {
    let s = s.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'\'' && bytes[s.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[s.len() - 1] == b'"')
        {
            return Some(s[1..s.len() - 1].to_owned());
        }
    }
    None
}
