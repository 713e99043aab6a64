//! DuckDB configuration.

use std::path::{Path, PathBuf};

use crate::error::{DuckDbError, DuckDbResult};

/// DuckDB database path.
#[derive(Debug, Clone)]
pub enum DatabasePath {
    /// In-memory database.
    InMemory,
    /// File-based database.
    File(PathBuf),
}

impl DatabasePath {
    /// Get the path string for DuckDB.
    pub fn as_str(&self) -> &str {
        match self {
            Self::InMemory => ":memory:",
            Self::File(path) => path.to_str().unwrap_or(":memory:"),
        }
    }
}

/// DuckDB configuration for the gateway's embedded engine.
#[derive(Debug, Clone)]
pub struct DuckDbConfig {
    /// Database path.
    pub path: DatabasePath,
    /// Number of threads for parallel execution.
    pub threads: Option<usize>,
    /// Memory limit (e.g., "4GB").
    pub memory_limit: Option<String>,
    /// Enable external access (file system, network). Lakehouse tables are
    /// Parquet files, so this stays on by default.
    pub enable_external_access: bool,
    /// Temporary directory for spilling.
    pub temp_directory: Option<PathBuf>,
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self {
            path: DatabasePath::InMemory,
            threads: None,
            memory_limit: None,
            enable_external_access: true,
            temp_directory: None,
        }
    }
}

impl DuckDbConfig {
    /// Create a new in-memory configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create a configuration from a file path.
    pub fn from_path(path: impl AsRef<Path>) -> DuckDbResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            path: DatabasePath::File(path.to_path_buf()),
            ..Self::default()
        })
    }

    /// Whether this is an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.path, DatabasePath::InMemory)
    }

    /// Get the path string for DuckDB.
    pub fn path_str(&self) -> &str {
        self.path.as_str()
    }

    /// Create a builder for more complex configurations.
    pub fn builder() -> DuckDbConfigBuilder {
        DuckDbConfigBuilder::default()
    }
}

/// Builder for [`DuckDbConfig`].
#[derive(Debug, Default)]
pub struct DuckDbConfigBuilder {
    config: DuckDbConfig,
}

impl DuckDbConfigBuilder {
    /// Use an in-memory database.
    pub fn in_memory(mut self) -> Self {
        self.config.path = DatabasePath::InMemory;
        self
    }

    /// Use a file-based database.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = DatabasePath::File(path.into());
        self
    }

    /// Set the thread count.
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = Some(threads);
        self
    }

    /// Set the memory limit.
    pub fn memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.config.memory_limit = Some(limit.into());
        self
    }

    /// Enable or disable external access.
    pub fn enable_external_access(mut self, enable: bool) -> Self {
        self.config.enable_external_access = enable;
        self
    }

    /// Set the temp directory for spilling.
    pub fn temp_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_directory = Some(dir.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> DuckDbResult<DuckDbConfig> {
        if let DatabasePath::File(ref path) = self.config.path {
            if path.as_os_str().is_empty() {
                return Err(DuckDbError::config("Database path must not be empty"));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_default() {
        let config = DuckDbConfig::in_memory();
        assert!(config.is_in_memory());
        assert_eq!(config.path_str(), ":memory:");
    }

    #[test]
    fn test_builder() {
        let config = DuckDbConfig::builder()
            .in_memory()
            .threads(4)
            .memory_limit("2GB")
            .build()
            .unwrap();
        assert_eq!(config.threads, Some(4));
        assert_eq!(config.memory_limit.as_deref(), Some("2GB"));
    }

    #[test]
    fn test_empty_path_rejected() {
        let err = DuckDbConfig::builder().path("").build().unwrap_err();
        assert!(err.to_string().contains("path"));
    }
}
