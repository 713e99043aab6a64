//! Audit events.
//!
//! Every gateway query emits one audit row, including denials. Insert
//! failures are best-effort and never mask the query outcome.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::LakegateResult;

/// Outcome recorded on an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Allowed,
    Denied,
    Error,
}

/// One audited gateway action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub principal_name: String,
    /// Action label, e.g. the statement class or `TRIGGER_RUN`.
    pub action: String,
    pub statement_type: Option<String>,
    pub original_sql: Option<String>,
    pub rewritten_sql: Option<String>,
    pub tables_accessed: Vec<String>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub rows_returned: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Start an event for a principal and action with the current timestamp.
    pub fn new(principal_name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            principal_name: principal_name.into(),
            action: action.into(),
            statement_type: None,
            original_sql: None,
            rewritten_sql: None,
            tables_accessed: Vec::new(),
            status: AuditStatus::Allowed,
            error_message: None,
            duration_ms: None,
            rows_returned: None,
            created_at: Utc::now(),
        }
    }
}

/// Sink for audit rows.
#[async_trait::async_trait]
pub trait AuditRepository: Send + Sync {
    /// Persist one event.
    async fn insert(&self, event: AuditEvent) -> LakegateResult<()>;
}

/// In-process audit sink backed by a Vec. Used by tests and as the default
/// sink when no durable repository is wired in.
#[derive(Debug, Default)]
pub struct MemoryAuditRepository {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Most recent event, if any.
    pub fn last(&self) -> Option<AuditEvent> {
        self.events.lock().last().cloned()
    }
}

#[async_trait::async_trait]
impl AuditRepository for MemoryAuditRepository {
    async fn insert(&self, event: AuditEvent) -> LakegateResult<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_repository_records_in_order() {
        let repo = MemoryAuditRepository::new();
        repo.insert(AuditEvent::new("alice", "SELECT")).await.unwrap();
        let mut denied = AuditEvent::new("bob", "SELECT");
        denied.status = AuditStatus::Denied;
        repo.insert(denied).await.unwrap();

        let events = repo.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].principal_name, "alice");
        assert_eq!(repo.last().unwrap().status, AuditStatus::Denied);
    }
}
