//! Conversion from DuckDB values to JSON rows.

use duckdb::types::{Value, ValueRef};
use serde_json::Value as JsonValue;

/// Convert a DuckDB Value to a JSON value.
pub fn duckdb_value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(i) => JsonValue::Number(i.into()),
        Value::SmallInt(i) => JsonValue::Number(i.into()),
        Value::Int(i) => JsonValue::Number(i.into()),
        Value::BigInt(i) => JsonValue::Number(i.into()),
        // HugeInt is i128, carried as a string
        Value::HugeInt(i) => JsonValue::String(i.to_string()),
        // UHugeInt is u128, carried as a string
        Value::UHugeInt(i) => JsonValue::String(i.to_string()),
        Value::UTinyInt(i) => JsonValue::Number(i.into()),
        Value::USmallInt(i) => JsonValue::Number(i.into()),
        Value::UInt(i) => JsonValue::Number(i.into()),
        Value::UBigInt(i) => JsonValue::Number(i.into()),
        Value::Float(f) => serde_json::Number::from_f64(f as f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Double(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        // String keeps decimal precision
        Value::Decimal(d) => JsonValue::String(d.to_string()),
        Value::Text(s) => JsonValue::String(s),
        Value::Blob(bytes) => {
            JsonValue::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
        Value::Geometry(bytes) => {
            JsonValue::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
        Value::Date32(days) => {
            let date = chrono::NaiveDate::from_num_days_from_ce_opt(days + 719163);
            match date {
                Some(d) => JsonValue::String(d.to_string()),
                None => JsonValue::Null,
            }
        }
        Value::Time64(..) => JsonValue::String(format!("{:?}", value)),
        Value::Timestamp(..) => JsonValue::String(format!("{:?}", value)),
        Value::Interval { .. } => JsonValue::String(format!("{:?}", value)),
        Value::List(list) => {
            JsonValue::Array(list.into_iter().map(duckdb_value_to_json).collect())
        }
        Value::Enum(e) => JsonValue::String(e),
        Value::Struct(fields) => {
            let obj: serde_json::Map<String, JsonValue> = fields
                .iter()
                .map(|(k, v)| (k.clone(), duckdb_value_to_json(v.clone())))
                .collect();
            JsonValue::Object(obj)
        }
        Value::Array(arr) => {
            JsonValue::Array(arr.into_iter().map(duckdb_value_to_json).collect())
        }
        Value::Map(map) => {
            let obj: serde_json::Map<String, JsonValue> = map
                .iter()
                .map(|(k, v)| (format!("{:?}", k), duckdb_value_to_json(v.clone())))
                .collect();
            JsonValue::Object(obj)
        }
        Value::Union(u) => duckdb_value_to_json(*u),
        _ => JsonValue::String(format!("{:?}", value)),
    }
}

/// Convert a DuckDB ValueRef to a JSON value.
///
/// Complex types go through an owned Value first; the Arrow-based reference
/// API requires careful index handling.
pub fn duckdb_value_ref_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Boolean(b) => JsonValue::Bool(b),
        ValueRef::TinyInt(i) => JsonValue::Number(i.into()),
        ValueRef::SmallInt(i) => JsonValue::Number(i.into()),
        ValueRef::Int(i) => JsonValue::Number(i.into()),
        ValueRef::BigInt(i) => JsonValue::Number(i.into()),
        ValueRef::HugeInt(i) => JsonValue::String(i.to_string()),
        ValueRef::UHugeInt(i) => JsonValue::String(i.to_string()),
        ValueRef::UTinyInt(i) => JsonValue::Number(i.into()),
        ValueRef::USmallInt(i) => JsonValue::Number(i.into()),
        ValueRef::UInt(i) => JsonValue::Number(i.into()),
        ValueRef::UBigInt(i) => JsonValue::Number(i.into()),
        ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Double(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Decimal(d) => JsonValue::String(d.to_string()),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).to_string()),
        ValueRef::Blob(bytes) => {
            JsonValue::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
        ValueRef::Geometry(bytes) => {
            JsonValue::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
        ValueRef::Date32(days) => {
            let date = chrono::NaiveDate::from_num_days_from_ce_opt(days + 719163);
            match date {
                Some(d) => JsonValue::String(d.to_string()),
                None => JsonValue::Null,
            }
        }
        ValueRef::Time64(..) => JsonValue::String(format!("{:?}", value)),
        ValueRef::Timestamp(..) => JsonValue::String(format!("{:?}", value)),
        ValueRef::Interval { .. } => JsonValue::String(format!("{:?}", value)),
        ValueRef::List(..)
        | ValueRef::Enum(..)
        | ValueRef::Struct(..)
        | ValueRef::Array(..)
        | ValueRef::Map(..)
        | ValueRef::Union(..) => duckdb_value_to_json(value.to_owned()),
        _ => JsonValue::String(format!("{:?}", value)),
    }
}

/// Quote an identifier for DuckDB, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal for DuckDB, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(duckdb_value_to_json(Value::Null), JsonValue::Null);
        assert_eq!(duckdb_value_to_json(Value::Boolean(true)), JsonValue::Bool(true));
        assert_eq!(
            duckdb_value_to_json(Value::BigInt(42)),
            JsonValue::Number(42.into())
        );
        assert_eq!(
            duckdb_value_to_json(Value::Text("hi".into())),
            JsonValue::String("hi".into())
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("v"), "'v'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
