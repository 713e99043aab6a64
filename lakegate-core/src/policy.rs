//! Row filters and column masks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::securable::GranteeType;

/// A boolean SQL expression restricting the rows a principal may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    /// Opaque identifier; multiple filters on a table combine in ascending
    /// id order.
    pub id: String,
    /// Table the filter applies to.
    pub table_id: i64,
    /// Boolean expression over the table's columns.
    pub filter_sql: String,
    /// Free-form description.
    pub description: String,
}

impl RowFilter {
    /// Create a new filter with a fresh id.
    pub fn new(table_id: i64, filter_sql: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            table_id,
            filter_sql: filter_sql.into(),
            description: description.into(),
        }
    }
}

/// Binds a row filter to a principal or group. A principal is bound if they,
/// or any group transitively containing them, appears in a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilterBinding {
    pub row_filter_id: String,
    pub principal_id: String,
    pub principal_type: GranteeType,
}

/// An expression substituted for a column in the caller's projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMask {
    /// Opaque identifier; ties between surviving masks break by ascending id.
    pub id: String,
    /// Table the mask applies to.
    pub table_id: i64,
    /// Masked column.
    pub column_name: String,
    /// Replacement expression, e.g. `md5(email)`.
    pub mask_expression: String,
}

impl ColumnMask {
    /// Create a new mask with a fresh id.
    pub fn new(
        table_id: i64,
        column_name: impl Into<String>,
        mask_expression: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            table_id,
            column_name: column_name.into(),
            mask_expression: mask_expression.into(),
        }
    }
}

/// Binds a column mask to a principal or group. `see_original=true` carves a
/// hole: that principal sees the unmasked column even when a group-wide mask
/// would otherwise apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMaskBinding {
    pub column_mask_id: String,
    pub principal_id: String,
    pub principal_type: GranteeType,
    pub see_original: bool,
}
