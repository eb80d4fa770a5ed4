//! Tagged results returned across boundaries.
//!
//! Serialized as `{"status": "success" | "warning" | "error", ...payload}` so
//! an orchestrator can branch on `status` without parsing error strings.

use serde::Serialize;

use crate::error::{CurbsideError, ErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome<T> {
    Success {
        #[serde(flatten)]
        payload: T,
    },
    /// Completed, but something the caller should know about happened.
    Warning {
        message: String,
        #[serde(flatten)]
        payload: T,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl<T> Outcome<T> {
    pub fn success(payload: T) -> Self {
        Self::Success { payload }
    }

    pub fn warning(message: impl Into<String>, payload: T) -> Self {
        Self::Warning {
            message: message.into(),
            payload,
        }
    }

    pub fn error(err: &CurbsideError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::Success { payload } | Self::Warning { payload, .. } => Some(payload),
            Self::Error { .. } => None,
        }
    }
}

impl<T> From<Result<T, CurbsideError>> for Outcome<T> {
    fn from(r: Result<T, CurbsideError>) -> Self {
        match r {
            Ok(payload) => Self::success(payload),
            Err(e) => Self::error(&e),
        }
    }
}
