//! Error taxonomy shared by every adapter boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failure, carried in tagged error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UpstreamUnavailable,
    Timeout,
    NotFound,
    InvalidInput,
    Conflict,
}

#[derive(Debug, Error)]
pub enum CurbsideError {
    /// Query or service call failed; the orchestrator decides whether to re-ask.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Bounded wait elapsed. Retrievable, same as an upstream failure.
    #[error("{operation} timed out after {after_secs}s")]
    Timeout { operation: String, after_secs: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before any external call was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl CurbsideError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Conflict(_) => ErrorKind::Conflict,
        }
    }

    /// Whether re-running the whole turn later may succeed.
    pub fn is_retrievable(&self) -> bool {
        matches!(self.kind(), ErrorKind::UpstreamUnavailable | ErrorKind::Timeout)
    }

    pub fn upstream(context: &str, err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(format!("{context}: {err}"))
    }
}

/// Reject identifiers that could not have come from the warehouse.
///
/// Allowed: ASCII letters, digits, `-` and `_`.
pub fn validate_identifier(label: &str, value: &str) -> Result<(), CurbsideError> {
    if value.trim().is_empty() {
        return Err(CurbsideError::InvalidInput(format!("{label} must be non-empty")));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(CurbsideError::InvalidInput(format!(
            "{label} '{value}' contains unsupported character {bad:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        assert_eq!(
            CurbsideError::UpstreamUnavailable("x".into()).kind(),
            ErrorKind::UpstreamUnavailable
        );
        assert_eq!(
            CurbsideError::Timeout { operation: "feed".into(), after_secs: 3 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(CurbsideError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(CurbsideError::InvalidInput("x".into()).kind(), ErrorKind::InvalidInput);
        assert_eq!(CurbsideError::Conflict("x".into()).kind(), ErrorKind::Conflict);
    }

    #[test]
    fn only_upstream_failures_are_retrievable() {
        assert!(CurbsideError::Timeout { operation: "forecast".into(), after_secs: 30 }.is_retrievable());
        assert!(CurbsideError::UpstreamUnavailable("503".into()).is_retrievable());
        assert!(!CurbsideError::InvalidInput("bad id".into()).is_retrievable());
        assert!(!CurbsideError::NotFound("gs://b/o".into()).is_retrievable());
    }

    #[test]
    fn timeout_message_names_operation() {
        let e = CurbsideError::Timeout { operation: "list_open_incidents".into(), after_secs: 30 };
        assert_eq!(e.to_string(), "list_open_incidents timed out after 30s");
    }

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("bus_stop_id", "stop-1").is_ok());
        assert!(validate_identifier("bus_stop_id", "A_17").is_ok());
        assert!(validate_identifier("bus_stop_id", "").is_err());
        assert!(validate_identifier("bus_stop_id", "   ").is_err());
        let err = validate_identifier("bus_stop_id", "1'; DROP TABLE").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
