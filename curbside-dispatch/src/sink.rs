//! Where scheduling decisions are persisted.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use curbside_core::{CurbsideError, Outcome, SchedulingDecision};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// `updated` open incidents at the stop moved to `scheduled`.
    Committed { bus_stop_id: String, updated: u64 },
    /// Nothing open left at the stop: another turn got there first, or the
    /// incident was resolved. Existing maintenance details are untouched.
    AlreadyHandled { bus_stop_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub bus_stop_id: String,
    pub updated: u64,
}

impl CommitOutcome {
    pub fn bus_stop_id(&self) -> &str {
        match self {
            Self::Committed { bus_stop_id, .. } | Self::AlreadyHandled { bus_stop_id } => bus_stop_id,
        }
    }

    /// A lost race is a warning, never an error.
    pub fn to_outcome(&self) -> Outcome<CommitReport> {
        match self {
            Self::Committed { bus_stop_id, updated } => Outcome::success(CommitReport {
                bus_stop_id: bus_stop_id.clone(),
                updated: *updated,
            }),
            Self::AlreadyHandled { bus_stop_id } => Outcome::warning(
                format!("no open incident at bus stop {bus_stop_id}; nothing changed"),
                CommitReport {
                    bus_stop_id: bus_stop_id.clone(),
                    updated: 0,
                },
            ),
        }
    }
}

#[async_trait]
pub trait SchedulingSink: Send + Sync {
    /// Atomically move the stop's open incidents to `scheduled` with the
    /// decision's maintenance details. Only incidents still open are touched.
    async fn commit(&self, decision: &SchedulingDecision) -> Result<CommitOutcome, CurbsideError>;
}

#[async_trait]
impl<S: SchedulingSink + ?Sized> SchedulingSink for Arc<S> {
    async fn commit(&self, decision: &SchedulingDecision) -> Result<CommitOutcome, CurbsideError> {
        (**self).commit(decision).await
    }
}

/// Commit and fold the result into a tagged outcome.
pub async fn commit_outcome<S: SchedulingSink + ?Sized>(
    sink: &S,
    decision: &SchedulingDecision,
) -> Outcome<CommitReport> {
    match sink.commit(decision).await {
        Ok(o) => o.to_outcome(),
        Err(e) => Outcome::error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn already_handled_is_a_warning() {
        let o = CommitOutcome::AlreadyHandled { bus_stop_id: "stop-2".into() }.to_outcome();
        assert_eq!(o.status(), "warning");
        let v = serde_json::to_value(&o).unwrap();
        assert_eq!(v["bus_stop_id"], "stop-2");
        assert_eq!(v["updated"], 0);
    }

    #[test]
    fn committed_is_success() {
        let o = CommitOutcome::Committed { bus_stop_id: "stop-1".into(), updated: 2 }.to_outcome();
        assert_eq!(
            serde_json::to_value(&o).unwrap(),
            json!({"status": "success", "bus_stop_id": "stop-1", "updated": 2})
        );
    }
}
