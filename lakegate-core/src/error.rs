//! Error taxonomy shared across the gateway.
//!
//! Every component returns one of five tagged variants; nothing surfaces as
//! an opaque string. Callers map them onto transport semantics
//! (Validation/NotFound -> 4xx, AccessDenied -> 403, Conflict -> 409,
//! Internal -> 5xx). Wrapping preserves the variant so the taxonomy survives
//! contextual prefixes added by orchestrating layers.

use thiserror::Error;

/// Result type alias for gateway operations.
pub type LakegateResult<T> = Result<T, LakegateError>;

/// Errors surfaced by the gateway core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LakegateError {
    /// Input violates a declared precondition.
    #[error("validation: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A privilege check returned false.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Duplicate name or already-exists condition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unexpected failure from a collaborator (database, parser, encoding).
    #[error("internal: {0}")]
    Internal(String),
}

impl LakegateError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an access-denied error.
    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Prepend a contextual prefix while keeping the variant intact.
    pub fn with_context(self, prefix: &str) -> Self {
        match self {
            Self::Validation(m) => Self::Validation(format!("{prefix}: {m}")),
            Self::NotFound(m) => Self::NotFound(format!("{prefix}: {m}")),
            Self::AccessDenied(m) => Self::AccessDenied(format!("{prefix}: {m}")),
            Self::Conflict(m) => Self::Conflict(format!("{prefix}: {m}")),
            Self::Internal(m) => Self::Internal(format!("{prefix}: {m}")),
        }
    }

    /// Whether this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this is an access-denied error.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }

    /// Whether this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether this is an internal error.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<serde_json::Error> for LakegateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

/// Extension for attaching a contextual prefix to any gateway result.
pub trait ResultExt<T> {
    /// Wrap the error with a prefix, preserving its variant.
    fn context(self, prefix: &str) -> LakegateResult<T>;
}

impl<T> ResultExt<T> for LakegateResult<T> {
    fn context(self, prefix: &str) -> LakegateResult<T> {
        self.map_err(|e| e.with_context(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LakegateError::access_denied("SELECT on titanic");
        assert_eq!(err.to_string(), "access denied: SELECT on titanic");
    }

    #[test]
    fn test_context_preserves_variant() {
        let err = LakegateError::not_found("table orders");
        let wrapped = err.with_context("privilege check");
        assert!(wrapped.is_not_found());
        assert_eq!(wrapped.to_string(), "not found: privilege check: table orders");
    }

    #[test]
    fn test_result_ext() {
        let res: LakegateResult<()> = Err(LakegateError::validation("bad selector"));
        let wrapped = res.context("run trigger");
        assert!(wrapped.unwrap_err().is_validation());
    }
}
