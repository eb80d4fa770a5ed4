//! Scheduling decisions produced by the maintenance policy.
//!
//! These are the wire types handed to a scheduling sink and printed by the
//! CLI, so they are serde-ready and carry the rendered notification text.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::calendar::{BusinessCalendar, BusinessHours};
use crate::classify::{Severity, WorkKind};
use crate::incident::{BusStop, MaintenanceRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingDecision {
    pub incident_id: String,
    pub bus_stop: BusStop,
    pub severity: Severity,
    pub work: WorkKind,
    /// Local start time in the agency zone.
    pub start: DateTime<FixedOffset>,
    pub duration_minutes: i64,
    pub reason: String,
    /// Scheduled without ridership data.
    #[serde(default)]
    pub degraded: bool,
    pub notification: Notification,
}

impl SchedulingDecision {
    pub fn end(&self) -> DateTime<FixedOffset> {
        self.start + Duration::minutes(self.duration_minutes)
    }

    /// What the sink attaches to the incident row.
    pub fn maintenance_record(&self) -> MaintenanceRecord {
        MaintenanceRecord {
            scheduled_time: self.start,
            reason: self.reason.clone(),
            notification_subject: self.notification.subject.clone(),
            notification_body: self.notification.body.clone(),
        }
    }

    /// Check the timing invariants against the moment the plan was made.
    pub fn validate<Z: TimeZone, C: BusinessCalendar>(
        &self,
        now: &DateTime<Z>,
        lead: Duration,
        hours: &BusinessHours,
        calendar: &C,
    ) -> Result<(), String> {
        if self.incident_id.trim().is_empty() {
            return Err("incident_id must be non-empty".to_string());
        }
        if self.bus_stop.id.trim().is_empty() {
            return Err("bus_stop.id must be non-empty".to_string());
        }
        if self.duration_minutes <= 0 {
            return Err("duration_minutes must be positive".to_string());
        }
        if self.reason.trim().is_empty() {
            return Err("reason must be non-empty".to_string());
        }
        let earliest = now.fixed_offset() + lead;
        if self.start < earliest {
            return Err(format!(
                "start {} is earlier than now + lead ({})",
                self.start.to_rfc3339(),
                earliest.to_rfc3339()
            ));
        }
        if self.start.minute() != 0 || self.start.second() != 0 {
            return Err(format!("start {} is not on the hour", self.start.to_rfc3339()));
        }
        if self.severity == Severity::Routine
            && !hours.fits(&self.start, Duration::minutes(self.duration_minutes), calendar)
        {
            return Err(format!(
                "routine start {} is outside business hours",
                self.start.to_rfc3339()
            ));
        }
        Ok(())
    }
}

/// An incident the policy looked at but did not place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unscheduled {
    pub incident_id: String,
    pub bus_stop_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePlan {
    /// Safety first (by ridership), then routine by start.
    pub decisions: Vec<SchedulingDecision>,
    pub unscheduled: Vec<Unscheduled>,
}

impl SchedulePlan {
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty() && self.unscheduled.is_empty()
    }

    pub fn degraded_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.degraded).count()
    }

    pub fn decision_for(&self, incident_id: &str) -> Option<&SchedulingDecision> {
        self.decisions.iter().find(|d| d.incident_id == incident_id)
    }
}
