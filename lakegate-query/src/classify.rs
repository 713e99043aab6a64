//! Statement classification.
//!
//! One SQL string in, one classified statement out. More than one top-level
//! statement is a hard error: piggy-backed DDL behind a semicolon never
//! reaches the engine.

use sqlparser::ast::Statement;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use lakegate_core::{LakegateError, LakegateResult, Privilege};

/// Statement class as seen by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementClass {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Other,
}

impl StatementClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Ddl => "DDL",
            Self::Other => "OTHER",
        }
    }

    /// Privilege needed to execute statements of this class. DDL and OTHER
    /// have none; they are rejected by the pipeline.
    pub fn required_privilege(&self) -> Option<Privilege> {
        match self {
            Self::Select => Some(Privilege::Select),
            Self::Insert => Some(Privilege::Insert),
            Self::Update => Some(Privilege::Update),
            Self::Delete => Some(Privilege::Delete),
            Self::Ddl | Self::Other => None,
        }
    }
}

/// Keywords that mark a statement as DDL regardless of what the parser
/// produced for it.
const DDL_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "ATTACH", "DETACH", "COMMENT", "RENAME",
];

/// Parse and classify exactly one statement.
///
/// Returns the parsed statement together with its class so downstream
/// rewriting reuses the same AST.
pub fn classify(sql: &str) -> LakegateResult<(Statement, StatementClass)> {
    let dialect = DuckDbDialect {};
    let statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| LakegateError::validation(format!("SQL parse error: {e}")))?;

    let mut iter = statements.into_iter();
    let Some(statement) = iter.next() else {
        return Err(LakegateError::validation("empty SQL statement"));
    };
    if iter.next().is_some() {
        return Err(LakegateError::validation(
            "multi-statement SQL is not allowed",
        ));
    }

    let class = classify_statement(&statement);
    Ok((statement, class))
}

fn classify_statement(statement: &Statement) -> StatementClass {
    if matches!(statement, Statement::Query(_)) {
        return StatementClass::Select;
    }

    // The canonical rendering starts with the defining keyword, which is
    // stable across parser versions even where the AST variants are not.
    let rendered = statement.to_string();
    let keyword: String = rendered
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "INSERT" => StatementClass::Insert,
        // MERGE is gated by the INSERT privilege.
        "MERGE" => StatementClass::Insert,
        "UPDATE" => StatementClass::Update,
        "DELETE" => StatementClass::Delete,
        kw if DDL_KEYWORDS.contains(&kw) => StatementClass::Ddl,
        _ => StatementClass::Other,
    }
}
