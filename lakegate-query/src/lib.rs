//! The Lakegate secure query pipeline.
//!
//! Statements enter as text from a named principal and leave as governed
//! SQL on the embedded engine: classified, checked against the securable
//! graph, rewritten with row filters and column masks, and audited.
//! Catalog metadata queries detour through the information-schema
//! virtualizer instead of touching physical relations.

pub mod classify;
pub mod compute;
pub mod info_schema;
pub mod pipeline;
pub mod rewrite;
pub mod tables;

pub use classify::{classify, StatementClass};
pub use compute::{ComputeExecutor, ComputeResolver, LocalPoolExecutor, PinnedExecutor};
pub use info_schema::{InfoSchemaTable, InfoSchemaVirtualizer};
pub use pipeline::{SecureQueryPipeline, SessionEngine};
pub use rewrite::{apply_column_masks, inject_row_filters, parse_expr};
pub use tables::{extract_table_refs, is_func_source, FUNC_SOURCE_MARKER};
