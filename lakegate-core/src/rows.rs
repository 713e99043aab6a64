//! Row sets returned by the gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Rows returned from an executed statement, one JSON object per row keyed
/// by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSet {
    pub rows: Vec<JsonValue>,
}

impl RowSet {
    pub fn new(rows: Vec<JsonValue>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column value of the first row, for scalar queries like
    /// `SELECT COUNT(*)`.
    pub fn scalar(&self) -> Option<&JsonValue> {
        self.rows.first().and_then(|row| match row {
            JsonValue::Object(map) => map.values().next(),
            other => Some(other),
        })
    }

    /// Scalar coerced to i64, for count queries.
    pub fn scalar_i64(&self) -> Option<i64> {
        match self.scalar()? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<Vec<JsonValue>> for RowSet {
    fn from(rows: Vec<JsonValue>) -> Self {
        Self { rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_extraction() {
        let rs = RowSet::new(vec![json!({"count": 42})]);
        assert_eq!(rs.scalar_i64(), Some(42));

        let empty = RowSet::empty();
        assert_eq!(empty.scalar_i64(), None);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_scalar_from_string_number() {
        // HugeInt counts come back as strings from the driver.
        let rs = RowSet::new(vec![json!({"count": "9000000000000000000"})]);
        assert_eq!(rs.scalar_i64(), Some(9_000_000_000_000_000_000));
    }
}
