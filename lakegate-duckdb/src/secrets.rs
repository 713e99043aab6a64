//! Storage credential secrets on the embedded engine.
//!
//! DuckDB secrets authorize the engine to read lakehouse data files from
//! object storage. Secret names are validated as identifiers; every value is
//! single-quote-escaped before it reaches the engine.

use tracing::instrument;

use lakegate_core::{
    AzureSecretSpec, GcsSecretSpec, LakegateError, LakegateResult, S3SecretSpec, SecretManager,
};

use crate::error::DuckDbError;
use crate::pool::DuckDbPool;
use crate::value::quote_literal;

/// DuckDB-backed secret management.
pub struct DuckDbSecretManager {
    pool: DuckDbPool,
}

impl DuckDbSecretManager {
    pub fn new(pool: DuckDbPool) -> Self {
        Self { pool }
    }

    fn validate_name(name: &str) -> LakegateResult<()> {
        let ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.chars().next().unwrap_or('0').is_ascii_digit();
        if ok {
            Ok(())
        } else {
            Err(LakegateError::from(DuckDbError::secret(format!(
                "invalid secret name '{name}'"
            ))))
        }
    }

    async fn run(&self, sql: &str) -> LakegateResult<()> {
        let conn = self.pool.pin().await.map_err(LakegateError::from)?;
        conn.execute_batch(sql)
            .await
            .map_err(|e| LakegateError::from(DuckDbError::secret(e.to_string())))
    }
}

#[async_trait::async_trait]
impl SecretManager for DuckDbSecretManager {
    #[instrument(skip(self, spec), fields(secret = %spec.name))]
    async fn create_s3_secret(&self, spec: &S3SecretSpec) -> LakegateResult<()> {
        Self::validate_name(&spec.name)?;

        let mut sql = format!(
            "CREATE OR REPLACE SECRET {} (TYPE S3, KEY_ID {}, SECRET {}, REGION {}",
            spec.name,
            quote_literal(&spec.key_id),
            quote_literal(&spec.secret),
            quote_literal(&spec.region),
        );
        if let Some(ref endpoint) = spec.endpoint {
            sql.push_str(&format!(", ENDPOINT {}", quote_literal(endpoint)));
        }
        if !spec.use_ssl {
            sql.push_str(", USE_SSL false");
        }
        sql.push(')');

        self.run(&sql).await
    }

    #[instrument(skip(self, spec), fields(secret = %spec.name))]
    async fn create_azure_secret(&self, spec: &AzureSecretSpec) -> LakegateResult<()> {
        Self::validate_name(&spec.name)?;

        let sql = format!(
            "CREATE OR REPLACE SECRET {} (TYPE AZURE, CONNECTION_STRING {})",
            spec.name,
            quote_literal(&spec.connection_string),
        );
        self.run(&sql).await
    }

    #[instrument(skip(self, spec), fields(secret = %spec.name))]
    async fn create_gcs_secret(&self, spec: &GcsSecretSpec) -> LakegateResult<()> {
        Self::validate_name(&spec.name)?;

        let sql = format!(
            "CREATE OR REPLACE SECRET {} (TYPE GCS, KEY_ID {}, SECRET {})",
            spec.name,
            quote_literal(&spec.key_id),
            quote_literal(&spec.secret),
        );
        self.run(&sql).await
    }

    #[instrument(skip(self))]
    async fn drop_secret(&self, name: &str) -> LakegateResult<()> {
        Self::validate_name(name)?;
        self.run(&format!("DROP SECRET IF EXISTS {name}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(DuckDbSecretManager::validate_name("prod_s3").is_ok());
        assert!(DuckDbSecretManager::validate_name("9lives").is_err());
        assert!(DuckDbSecretManager::validate_name("bad-name").is_err());
        assert!(DuckDbSecretManager::validate_name("drop table; --").is_err());
        assert!(DuckDbSecretManager::validate_name("").is_err());
    }
}
