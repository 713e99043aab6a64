//! Engine extension loading.
//!
//! The `postgres` extension is needed whenever a catalog's metastore is
//! backed by PostgreSQL. Installation is guarded by a mutex-protected flag
//! rather than a one-shot primitive: on transient failure the flag stays
//! unset, so the next caller retries.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::connection::DuckDbConnection;
use crate::error::{DuckDbError, DuckDbResult};

/// Tracks which engine extensions have been installed on this instance.
#[derive(Debug, Default)]
pub struct ExtensionLoader {
    postgres_installed: Mutex<bool>,
}

impl ExtensionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install and load the `postgres` extension if not already done.
    pub fn ensure_postgres(&self, conn: &DuckDbConnection) -> DuckDbResult<()> {
        let mut installed = self.postgres_installed.lock();
        if *installed {
            return Ok(());
        }

        debug!("Installing postgres extension");
        conn.execute_batch("INSTALL postgres; LOAD postgres;")
            .map_err(|e| {
                warn!(error = %e, "postgres extension install failed; will retry on next use");
                DuckDbError::extension(format!("postgres: {}", e))
            })?;

        *installed = true;
        Ok(())
    }

    /// Whether the postgres extension has been installed successfully.
    pub fn postgres_installed(&self) -> bool {
        *self.postgres_installed.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_stays_unset_until_success() {
        let loader = ExtensionLoader::new();
        assert!(!loader.postgres_installed());
    }
}
