//! One scheduling turn: feed, forecast, plan, commit.
//!
//! Every adapter call is bounded by a timeout and surfaces as a retrievable
//! `Timeout` error. There are no retries here; the caller re-runs the turn.

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use curbside_core::{
    BusinessCalendar, CurbsideError, ErrorKind, ForecastMap, MaintenancePolicy, SchedulePlan,
    SchedulingDecision,
};
use curbside_ingest::{ForecastProvider, IncidentFeed};

use crate::sink::{CommitOutcome, SchedulingSink};

/// Await `fut`, or give up after `limit`.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T, CurbsideError>
where
    F: Future<Output = Result<T, CurbsideError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r,
        Err(_) => {
            warn!(operation, after_ms = limit.as_millis() as u64, "timed out");
            Err(CurbsideError::Timeout {
                operation: operation.to_string(),
                after_secs: limit.as_secs(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    /// Dry run: decided, not committed.
    Planned,
    Committed { updated: u64 },
    /// Another turn scheduled it first.
    AlreadyHandled,
    /// Decision failed its own invariants and was not committed.
    Rejected { reason: String },
    Failed { kind: ErrorKind, message: String },
    Unscheduled { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnEntry {
    pub incident_id: String,
    pub bus_stop_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<SchedulingDecision>,
    pub state: EntryState,
}

impl TurnEntry {
    /// Tagged status, as reported to the orchestrator.
    pub fn status(&self) -> &'static str {
        match self.state {
            EntryState::Planned | EntryState::Committed { .. } => "success",
            EntryState::AlreadyHandled | EntryState::Unscheduled { .. } => "warning",
            EntryState::Rejected { .. } | EntryState::Failed { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReport {
    pub now: DateTime<FixedOffset>,
    pub dry_run: bool,
    /// Set when the forecast lookup failed and routine work was placed
    /// without ridership data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast_error: Option<String>,
    pub entries: Vec<TurnEntry>,
}

impl TurnReport {
    pub fn count(&self, status: &str) -> usize {
        self.entries.iter().filter(|e| e.status() == status).count()
    }

    pub fn decisions(&self) -> impl Iterator<Item = &SchedulingDecision> {
        self.entries.iter().filter_map(|e| e.decision.as_ref())
    }
}

pub struct SchedulingTurn<C: BusinessCalendar> {
    feed: Arc<dyn IncidentFeed>,
    forecast: Arc<dyn ForecastProvider>,
    sink: Arc<dyn SchedulingSink>,
    policy: MaintenancePolicy<C>,
    timeout: Duration,
    dry_run: bool,
}

impl<C: BusinessCalendar> SchedulingTurn<C> {
    pub fn new(
        feed: Arc<dyn IncidentFeed>,
        forecast: Arc<dyn ForecastProvider>,
        sink: Arc<dyn SchedulingSink>,
        policy: MaintenancePolicy<C>,
    ) -> Self {
        Self {
            feed,
            forecast,
            sink,
            policy,
            timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn policy(&self) -> &MaintenancePolicy<C> {
        &self.policy
    }

    /// Fetch and plan without touching the sink.
    pub async fn plan(&self, now: &DateTime<Tz>) -> Result<(SchedulePlan, Option<String>), CurbsideError> {
        let incidents = with_timeout("incident feed", self.timeout, self.feed.list_open_incidents()).await?;
        info!(count = incidents.len(), "open incidents");

        let stop_ids: Vec<String> = incidents
            .iter()
            .map(|i| i.bus_stop.id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let (forecasts, forecast_error) = if stop_ids.is_empty() {
            (ForecastMap::new(), None)
        } else {
            match with_timeout("forecast", self.timeout, self.forecast.forecast(&stop_ids)).await {
                Ok(f) => (f, None),
                Err(e) => {
                    warn!(error = %e, "forecast unavailable; routine work falls back to earliest slots");
                    (ForecastMap::new(), Some(e.to_string()))
                }
            }
        };

        Ok((self.policy.plan(&incidents, &forecasts, now), forecast_error))
    }

    /// A feed failure fails the whole turn. Everything after that is
    /// reported per incident.
    pub async fn run(&self, now: &DateTime<Tz>) -> Result<TurnReport, CurbsideError> {
        let (plan, forecast_error) = self.plan(now).await?;
        let config = self.policy.config();
        let mut entries = Vec::with_capacity(plan.decisions.len() + plan.unscheduled.len());

        for decision in plan.decisions {
            let state = if let Err(reason) =
                decision.validate(now, config.lead(), &config.hours, self.policy.calendar())
            {
                warn!(incident = %decision.incident_id, %reason, "decision rejected");
                EntryState::Rejected { reason }
            } else if self.dry_run {
                EntryState::Planned
            } else {
                match with_timeout("commit", self.timeout, self.sink.commit(&decision)).await {
                    Ok(CommitOutcome::Committed { updated, .. }) => EntryState::Committed { updated },
                    Ok(CommitOutcome::AlreadyHandled { .. }) => EntryState::AlreadyHandled,
                    Err(e) => EntryState::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                }
            };
            entries.push(TurnEntry {
                incident_id: decision.incident_id.clone(),
                bus_stop_id: decision.bus_stop.id.clone(),
                decision: Some(decision),
                state,
            });
        }

        for u in plan.unscheduled {
            entries.push(TurnEntry {
                incident_id: u.incident_id,
                bus_stop_id: u.bus_stop_id,
                decision: None,
                state: EntryState::Unscheduled { reason: u.reason },
            });
        }

        let report = TurnReport {
            now: now.fixed_offset(),
            dry_run: self.dry_run,
            forecast_error,
            entries,
        };
        info!(
            success = report.count("success"),
            warning = report.count("warning"),
            error = report.count("error"),
            dry_run = self.dry_run,
            "turn complete"
        );
        Ok(report)
    }
}
