//! Error types for the embedded database layer.

use std::fmt;

use lakegate_core::LakegateError;

/// Result type for DuckDB operations.
pub type DuckDbResult<T> = Result<T, DuckDbError>;

/// Error type for DuckDB operations.
#[derive(Debug)]
pub enum DuckDbError {
    /// Pool error.
    Pool(String),
    /// DuckDB driver error.
    DuckDb(duckdb::Error),
    /// Configuration error.
    Config(String),
    /// Connection error.
    Connection(String),
    /// Query error.
    Query(String),
    /// Extension installation/loading error.
    Extension(String),
    /// Catalog attachment error.
    Catalog(String),
    /// Secret management error.
    Secret(String),
    /// Internal error.
    Internal(String),
}

impl DuckDbError {
    /// Create a pool error.
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create an extension error.
    pub fn extension(msg: impl Into<String>) -> Self {
        Self::Extension(msg.into())
    }

    /// Create a catalog error.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a secret error.
    pub fn secret(msg: impl Into<String>) -> Self {
        Self::Secret(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl fmt::Display for DuckDbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(msg) => write!(f, "Pool error: {}", msg),
            Self::DuckDb(e) => write!(f, "DuckDB error: {}", e),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Connection(msg) => write!(f, "Connection error: {}", msg),
            Self::Query(msg) => write!(f, "Query error: {}", msg),
            Self::Extension(msg) => write!(f, "Extension error: {}", msg),
            Self::Catalog(msg) => write!(f, "Catalog error: {}", msg),
            Self::Secret(msg) => write!(f, "Secret error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DuckDbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DuckDb(e) => Some(e),
            _ => None,
        }
    }
}

impl From<duckdb::Error> for DuckDbError {
    fn from(err: duckdb::Error) -> Self {
        Self::DuckDb(err)
    }
}

impl From<std::io::Error> for DuckDbError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<DuckDbError> for LakegateError {
    fn from(err: DuckDbError) -> Self {
        match err {
            DuckDbError::Config(msg) => LakegateError::validation(format!("config: {}", msg)),
            DuckDbError::Secret(msg) => LakegateError::validation(format!("secret: {}", msg)),
            other => LakegateError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DuckDbError::config("invalid path");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("invalid path"));
    }

    #[test]
    fn test_taxonomy_mapping() {
        let err: LakegateError = DuckDbError::query("boom").into();
        assert!(err.is_internal());

        let err: LakegateError = DuckDbError::secret("bad name").into();
        assert!(err.is_validation());
    }
}
