//! Maintenance scheduling policy.
//!
//! A pure function of (incidents, forecasts, now, calendar):
//! - classify each open incident as safety or routine
//! - safety work goes first, busiest stop first, at the earliest compliant hour
//! - routine work goes into the business-hours slot with the lowest forecast
//!   ridership inside the horizon
//!
//! When a stop has no usable forecast the routine search falls back to the
//! earliest valid business-hours slot and marks the decision `degraded`.

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use std::cmp::Reverse;
use tracing::{debug, warn};

use crate::calendar::{BusinessCalendar, BusinessHours};
use crate::classify::{Classification, Classifier, Severity};
use crate::decision::{Notification, SchedulePlan, SchedulingDecision, Unscheduled};
use crate::error::CurbsideError;
use crate::forecast::{current_count, full_window_load, ForecastMap, ForecastPoint};
use crate::incident::Incident;
use crate::time::{ceil_to_hour, format_local, round_start};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub lead_minutes: i64,
    pub hours: BusinessHours,
    /// How far ahead the ridership-minimising search looks.
    pub horizon_days: i64,
    /// How far ahead the no-forecast fallback looks for any valid slot.
    pub max_search_days: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            lead_minutes: 30,
            hours: BusinessHours::default(),
            horizon_days: 3,
            max_search_days: 14,
        }
    }
}

impl PolicyConfig {
    pub fn lead(&self) -> Duration {
        Duration::minutes(self.lead_minutes)
    }
}

/// A chosen routine slot.
struct Slot {
    start: DateTime<Tz>,
    /// `None` when picked without forecast data.
    load: Option<u64>,
    candidates: usize,
}

pub struct MaintenancePolicy<C: BusinessCalendar> {
    config: PolicyConfig,
    calendar: C,
    classifier: Classifier,
}

impl<C: BusinessCalendar> MaintenancePolicy<C> {
    pub fn new(config: PolicyConfig, calendar: C) -> Result<Self, CurbsideError> {
        if config.lead_minutes < 0 || config.horizon_days <= 0 || config.max_search_days <= 0 {
            return Err(CurbsideError::InvalidInput(
                "lead must be >= 0 and search windows must be positive".to_string(),
            ));
        }
        Ok(Self {
            config,
            calendar,
            classifier: Classifier::new()?,
        })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn calendar(&self) -> &C {
        &self.calendar
    }

    pub fn classify(&self, incident: &Incident) -> Classification {
        self.classifier
            .classify_report(&incident.description, incident.image.object_name())
    }

    /// Safety work ignores the calendar: the earliest hour that keeps the lead.
    pub fn safety_start(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let earliest = now.clone() + self.config.lead();
        let candidate = std::cmp::max(earliest, ceil_to_hour(now));
        round_start(&candidate, &earliest)
    }

    /// Hour-aligned starts from the first compliant hour up to `until`,
    /// keeping only those whose whole duration fits business hours.
    fn business_slots(&self, now: &DateTime<Tz>, duration: Duration, until: DateTime<Tz>) -> Vec<DateTime<Tz>> {
        let earliest = now.clone() + self.config.lead();
        let mut t = ceil_to_hour(&earliest);
        let mut out = Vec::new();
        while t < until {
            if self.config.hours.fits(&t, duration, &self.calendar) {
                out.push(t);
            }
            t += Duration::hours(1);
        }
        out
    }

    fn routine_slot(
        &self,
        series: Option<&Vec<ForecastPoint>>,
        now: &DateTime<Tz>,
        duration: Duration,
    ) -> Option<Slot> {
        let horizon_end = now.clone() + Duration::days(self.config.horizon_days);
        let candidates = self.business_slots(now, duration, horizon_end);

        if let Some(series) = series.filter(|s| !s.is_empty()) {
            let mut best: Option<(DateTime<Tz>, u64)> = None;
            let mut covered = 0usize;
            for start in &candidates {
                let end = start.clone() + duration;
                let Some(load) = full_window_load(series, start, &end) else {
                    continue;
                };
                covered += 1;
                // Strictly less keeps the earliest slot on ties.
                if best.as_ref().is_none_or(|(_, b)| load < *b) {
                    best = Some((start.clone(), load));
                }
            }
            if let Some((start, load)) = best {
                debug!(start = %start, load, candidates = covered, "routine slot selected");
                return Some(Slot {
                    start,
                    load: Some(load),
                    candidates: covered,
                });
            }
        }

        let search_end = now.clone() + Duration::days(self.config.max_search_days);
        self.business_slots(now, duration, search_end)
            .into_iter()
            .next()
            .map(|start| Slot {
                start,
                load: None,
                candidates: 0,
            })
    }

    /// Plan every incident. Non-open incidents and incidents with no valid
    /// slot end up in `unscheduled`; nothing is dropped.
    pub fn plan(&self, incidents: &[Incident], forecasts: &ForecastMap, now: &DateTime<Tz>) -> SchedulePlan {
        let mut plan = SchedulePlan::default();
        let mut safety = Vec::new();
        let mut routine = Vec::new();

        for incident in incidents {
            if !incident.is_open() {
                plan.unscheduled.push(Unscheduled {
                    incident_id: incident.id.clone(),
                    bus_stop_id: incident.bus_stop.id.clone(),
                    reason: format!("incident is {}, not open", incident.status),
                });
                continue;
            }
            let class = self.classify(incident);
            match class.severity {
                Severity::Safety => safety.push((incident, class)),
                Severity::Routine => routine.push((incident, class)),
            }
        }

        // Busiest stop first; stops without data after those with data.
        let mut safety: Vec<_> = safety
            .into_iter()
            .map(|(inc, class)| {
                let count = forecasts
                    .get(&inc.bus_stop.id)
                    .and_then(|s| current_count(s, now));
                (inc, class, count)
            })
            .collect();
        safety.sort_by_key(|(inc, _, count)| (count.is_none(), Reverse(count.unwrap_or(0)), inc.id.clone()));

        let safety_start = self.safety_start(now);
        for (incident, class, count) in safety {
            let reason = self.safety_reason(&class, count);
            plan.decisions
                .push(self.decision(incident, &class, &safety_start, reason, false));
        }

        let mut routine_decisions = Vec::new();
        for (incident, class) in routine {
            let duration = Duration::minutes(class.work.estimated_minutes());
            let series = forecasts.get(&incident.bus_stop.id);
            match self.routine_slot(series, now, duration) {
                Some(slot) => {
                    let degraded = slot.load.is_none();
                    if degraded {
                        warn!(
                            incident = %incident.id,
                            bus_stop = %incident.bus_stop.id,
                            "no usable forecast; scheduling at earliest business-hours slot"
                        );
                    }
                    let start = round_start(&slot.start, &(now.clone() + self.config.lead()));
                    let reason = self.routine_reason(&class, &slot, duration);
                    routine_decisions.push(self.decision(incident, &class, &start, reason, degraded));
                }
                None => {
                    warn!(incident = %incident.id, "no business-hours slot fits the task");
                    plan.unscheduled.push(Unscheduled {
                        incident_id: incident.id.clone(),
                        bus_stop_id: incident.bus_stop.id.clone(),
                        reason: format!(
                            "no business-hours slot within {} days fits {} ({} min)",
                            self.config.max_search_days,
                            class.work.label(),
                            duration.num_minutes()
                        ),
                    });
                }
            }
        }
        routine_decisions.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.incident_id.cmp(&b.incident_id)));
        plan.decisions.extend(routine_decisions);
        plan
    }

    fn safety_reason(&self, class: &Classification, count: Option<u32>) -> String {
        let indicator = class.indicator.as_deref().unwrap_or("hazard");
        let ridership = match count {
            Some(n) => format!("current expected ridership {n}"),
            None => "ridership forecast unavailable".to_string(),
        };
        format!(
            "Safety hazard ({indicator}): {} at the earliest hour at least {} minutes out, \
             outside normal business hours if needed; {ridership}.",
            class.work.label(),
            self.config.lead_minutes
        )
    }

    fn routine_reason(&self, class: &Classification, slot: &Slot, duration: Duration) -> String {
        let cause = class
            .indicator
            .as_deref()
            .map(|i| format!("routine issue ({i})"))
            .unwrap_or_else(|| "no hazard indicators".to_string());
        match slot.load {
            Some(load) => format!(
                "{cause}: {} in the business-hours slot with the lowest forecast ridership \
                 ({load} passengers over {} min, best of {} slots).",
                class.work.label(),
                duration.num_minutes(),
                slot.candidates
            ),
            None => format!(
                "{cause}: {} at the earliest business-hours slot; ridership forecast \
                 unavailable, timing is uncertain (degraded).",
                class.work.label()
            ),
        }
    }

    fn decision(
        &self,
        incident: &Incident,
        class: &Classification,
        start: &DateTime<Tz>,
        reason: String,
        degraded: bool,
    ) -> SchedulingDecision {
        let duration_minutes = class.work.estimated_minutes();
        let notification = notification(incident, class.severity, start, duration_minutes, &reason);
        SchedulingDecision {
            incident_id: incident.id.clone(),
            bus_stop: incident.bus_stop.clone(),
            severity: class.severity,
            work: class.work,
            start: start.fixed_offset(),
            duration_minutes,
            reason,
            degraded,
            notification,
        }
    }
}

fn notification(
    incident: &Incident,
    severity: Severity,
    start: &DateTime<Tz>,
    duration_minutes: i64,
    reason: &str,
) -> Notification {
    let prefix = if severity == Severity::Safety { "URGENT: " } else { "" };
    let subject = format!("{prefix}Bus stop {} maintenance required", incident.bus_stop.id);
    let hours = duration_minutes as f64 / 60.0;
    let body = format!(
        "Maintenance has been scheduled for bus stop {} at {}.\n\
         Start: {}\n\
         Estimated duration: {hours:.1} h\n\
         Reason: {reason}\n\
         Incident: {}\n",
        incident.bus_stop.id,
        incident.bus_stop.address,
        format_local(start),
        incident.id,
    );
    Notification { subject, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{HolidayList, WeekendsOnly};
    use crate::incident::{BusStop, IncidentStatus};
    use crate::time::parse_local_datetime;
    use chrono_tz::America::New_York;

    fn ny(local: &str) -> DateTime<Tz> {
        parse_local_datetime(local, New_York).unwrap()
    }

    fn incident(id: &str, stop: &str, description: &str) -> Incident {
        Incident::new(id, BusStop::new(stop, "1 Main St", "New York", "NY", "10001"), description)
    }

    /// Three days of 15-minute points starting 10 minutes after `now`.
    fn series(now: &DateTime<Tz>, value: impl Fn(DateTime<Tz>) -> u32) -> Vec<ForecastPoint> {
        (0..(3 * 24 * 4))
            .map(|i| {
                let t = now.clone() + Duration::minutes(10 + 15 * i);
                ForecastPoint {
                    time: t.fixed_offset(),
                    passengers: value(t),
                }
            })
            .collect()
    }

    fn policy() -> MaintenancePolicy<WeekendsOnly> {
        MaintenancePolicy::new(PolicyConfig::default(), WeekendsOnly).unwrap()
    }

    #[test]
    fn broken_glass_goes_to_next_compliant_hour() {
        let p = policy();
        let inc = incident("inc-a", "stop-A", "broken glass near entrance");
        let now = ny("2026-03-03 10:10");
        let mut fc = ForecastMap::new();
        fc.insert("stop-A".into(), series(&now, |_| 30));

        let plan = p.plan(&[inc], &fc, &now);
        let d = &plan.decisions[0];
        assert_eq!(d.severity, Severity::Safety);
        assert_eq!(d.start, ny("2026-03-03 11:00").fixed_offset());
        assert!(d.reason.contains("current expected ridership 30"));
        assert!(d.notification.subject.starts_with("URGENT: Bus stop stop-A"));
    }

    #[test]
    fn safety_rounds_up_when_nearest_hour_breaks_lead() {
        let p = policy();
        // 10:40 + 30 = 11:10, nearest hour 11:00 is too early.
        assert_eq!(p.safety_start(&ny("2026-03-03 10:40")), ny("2026-03-03 12:00"));
        // Exactly on the hour: 10:00 + 30 -> 11:00.
        assert_eq!(p.safety_start(&ny("2026-03-03 10:00")), ny("2026-03-03 11:00"));
    }

    #[test]
    fn safety_ignores_weekends_and_night() {
        let p = policy();
        let now = ny("2026-03-07 23:10"); // Saturday night
        let plan = p.plan(&[incident("inc-1", "s1", "Icy sidewalk at the stop")], &ForecastMap::new(), &now);
        let d = &plan.decisions[0];
        assert_eq!(d.start, ny("2026-03-08 00:00").fixed_offset());
        assert!(!d.degraded);
        assert!(d.reason.contains("ridership forecast unavailable"));
    }

    #[test]
    fn busier_safety_stop_goes_first() {
        let p = policy();
        let now = ny("2026-03-03 10:10");
        let mut fc = ForecastMap::new();
        fc.insert("quiet".into(), series(&now, |_| 10));
        fc.insert("busy".into(), series(&now, |_| 50));
        // Ids sort the other way round, so ordering must come from ridership.
        let incidents = vec![
            incident("inc-a", "quiet", "shattered glass panel"),
            incident("inc-b", "busy", "shattered glass panel"),
            incident("inc-c", "unknown", "shattered glass panel"),
        ];

        let plan = p.plan(&incidents, &fc, &now);
        let order: Vec<_> = plan.decisions.iter().map(|d| d.bus_stop.id.as_str()).collect();
        assert_eq!(order, vec!["busy", "quiet", "unknown"]);
    }

    #[test]
    fn routine_litter_on_tuesday_morning_picks_quietest_slot() {
        let p = policy();
        let now = ny("2026-03-03 07:45"); // Tuesday
        let quiet_from = ny("2026-03-03 13:00");
        let quiet_to = ny("2026-03-03 14:00");
        let mut fc = ForecastMap::new();
        fc.insert(
            "stop-B".into(),
            series(&now, |t| if t >= quiet_from && t < quiet_to { 2 } else { 20 }),
        );

        let plan = p.plan(&[incident("inc-b", "stop-B", "leaves and litter on bench")], &fc, &now);
        let d = &plan.decisions[0];
        assert_eq!(d.severity, Severity::Routine);
        assert_eq!(d.duration_minutes, 60);
        assert_eq!(d.start, quiet_from.fixed_offset());
        assert!(!d.degraded);
        assert!(d.reason.contains("8 passengers"));
        assert!(d.validate(&now, p.config().lead(), &p.config().hours, p.calendar()).is_ok());
    }

    #[test]
    fn flat_forecast_takes_earliest_business_slot() {
        let p = policy();
        let now = ny("2026-03-03 07:45");
        let mut fc = ForecastMap::new();
        fc.insert("stop-B".into(), series(&now, |_| 5));
        let plan = p.plan(&[incident("inc-b", "stop-B", "litter")], &fc, &now);
        // 08:00 is before now + 30 min; first whole hour after that is 09:00.
        assert_eq!(plan.decisions[0].start, ny("2026-03-03 09:00").fixed_offset());
    }

    #[test]
    fn flat_forecast_in_mid_afternoon_stays_today() {
        let p = policy();
        // The 3-day horizon ends Friday 14:20, cutting Friday's 14:00 slot short.
        let now = ny("2026-03-03 14:20");
        let mut fc = ForecastMap::new();
        fc.insert("stop-B".into(), series(&now, |_| 5));
        let plan = p.plan(&[incident("inc-b", "stop-B", "litter on bench")], &fc, &now);
        let d = &plan.decisions[0];
        assert_eq!(d.start, ny("2026-03-03 15:00").fixed_offset());
        assert!(!d.degraded);
        assert!(d.reason.contains("20 passengers"), "{}", d.reason);
    }

    #[test]
    fn graffiti_must_finish_before_close() {
        let p = policy();
        let now = ny("2026-03-03 07:45");
        // Cheapest window would start at 14:00 but 3h runs past 16:00.
        let cheap = ny("2026-03-03 14:00");
        let mut fc = ForecastMap::new();
        fc.insert("s".into(), series(&now, |t| if t >= cheap { 0 } else { 50 }));
        let plan = p.plan(&[incident("inc-g", "s", "graffiti on the shelter")], &fc, &now);
        let d = &plan.decisions[0];
        assert_eq!(d.duration_minutes, 180);
        assert!(d.end() <= ny("2026-03-03 16:00").fixed_offset() || d.start >= ny("2026-03-04 08:00").fixed_offset());
        assert!(d.validate(&now, p.config().lead(), &p.config().hours, p.calendar()).is_ok());
    }

    #[test]
    fn missing_forecast_falls_back_and_is_degraded() {
        let p = policy();
        // Friday 15:30: graffiti (3h) cannot fit today; the weekend is skipped
        // and Monday is after the spring-forward change.
        let now = ny("2026-03-06 15:30");
        let plan = p.plan(&[incident("inc-g", "s", "graffiti")], &ForecastMap::new(), &now);
        let d = &plan.decisions[0];
        assert!(d.degraded);
        assert_eq!(d.start.to_rfc3339(), "2026-03-09T08:00:00-04:00");
        assert!(d.reason.contains("degraded"));
        assert_eq!(plan.degraded_count(), 1);
    }

    #[test]
    fn holidays_are_skipped_for_routine_work() {
        let cal = HolidayList::parse(&["2026-03-03"]).unwrap();
        let p = MaintenancePolicy::new(PolicyConfig::default(), cal).unwrap();
        let now = ny("2026-03-03 07:45");
        let plan = p.plan(&[incident("inc-1", "s", "dirty bench")], &ForecastMap::new(), &now);
        assert_eq!(plan.decisions[0].start, ny("2026-03-04 08:00").fixed_offset());
    }

    #[test]
    fn impossible_task_is_reported_unscheduled() {
        let config = PolicyConfig {
            hours: BusinessHours::parse("08:00", "10:00").unwrap(),
            ..PolicyConfig::default()
        };
        let p = MaintenancePolicy::new(config, WeekendsOnly).unwrap();
        let now = ny("2026-03-03 07:45");
        let plan = p.plan(&[incident("inc-g", "s", "graffiti")], &ForecastMap::new(), &now);
        assert!(plan.decisions.is_empty());
        assert_eq!(plan.unscheduled.len(), 1);
        assert!(plan.unscheduled[0].reason.contains("graffiti removal"));
    }

    #[test]
    fn non_open_incidents_are_not_planned() {
        let p = policy();
        let now = ny("2026-03-03 07:45");
        let done = incident("inc-1", "s", "broken glass").with_status(IncidentStatus::Scheduled);
        let plan = p.plan(&[done], &ForecastMap::new(), &now);
        assert!(plan.decisions.is_empty());
        assert!(plan.unscheduled[0].reason.contains("scheduled"));
    }

    #[test]
    fn routine_output_is_ordered_by_start_then_id() {
        let p = policy();
        let now = ny("2026-03-03 07:45");
        let late = ny("2026-03-03 15:00");
        let mut fc = ForecastMap::new();
        fc.insert("late".into(), series(&now, |t| if t >= late && t < late.clone() + Duration::hours(1) { 0 } else { 9 }));
        fc.insert("flat".into(), series(&now, |_| 1));
        let incidents = vec![
            incident("inc-1", "late", "litter"),
            incident("inc-3", "flat", "litter"),
            incident("inc-2", "flat", "litter"),
        ];
        let plan = p.plan(&incidents, &fc, &now);
        let ids: Vec<_> = plan.decisions.iter().map(|d| d.incident_id.as_str()).collect();
        assert_eq!(ids, vec!["inc-2", "inc-3", "inc-1"]);
    }

    /// Every decision over a week of planning moments keeps the invariants.
    #[test]
    fn decisions_always_validate() {
        let p = policy();
        let mut now = ny("2026-03-02 00:05");
        let end = ny("2026-03-09 00:05");
        while now < end {
            let mut fc = ForecastMap::new();
            fc.insert("a".into(), series(&now, |t| (t.timestamp() / 900 % 17) as u32));
            let incidents = vec![
                incident("s1", "a", "broken glass"),
                incident("s2", "b", "heavy snow"),
                incident("r1", "a", "graffiti"),
                incident("r2", "b", "litter"),
                incident("r3", "a", "bent sign post"),
            ];
            let plan = p.plan(&incidents, &fc, &now);
            assert_eq!(plan.decisions.len(), incidents.len());
            for d in &plan.decisions {
                let lead_ok = d.start >= (now.clone() + Duration::minutes(30)).fixed_offset();
                assert!(lead_ok, "{} at {now}", d.incident_id);
                if let Err(e) = d.validate(&now, p.config().lead(), &p.config().hours, p.calendar()) {
                    panic!("{} planned at {now}: {e}", d.incident_id);
                }
            }
            now += Duration::minutes(37);
        }
    }

    /// The chosen routine slot is the earliest of the quietest slots the
    /// forecast fully covers, for planning moments across a whole week.
    #[test]
    fn routine_slot_is_the_quietest_fully_covered_one() {
        let p = policy();
        let lead = p.config().lead();
        let mut now = ny("2026-03-02 00:05");
        let end = ny("2026-03-09 00:05");
        while now < end {
            let seed = now.timestamp();
            let mut fc = ForecastMap::new();
            fc.insert("a".into(), series(&now, |t| ((t.timestamp() / 900 + seed) % 23) as u32));
            let s = &fc["a"];

            for (text, minutes) in [("litter", 60), ("graffiti", 180)] {
                let duration = Duration::minutes(minutes);
                let mut best: Option<(DateTime<Tz>, u64)> = None;
                let mut t = ceil_to_hour(&(now.clone() + lead));
                while t < now.clone() + Duration::days(3) {
                    if p.config().hours.fits(&t, duration, p.calendar()) {
                        if let Some(load) = full_window_load(s, &t, &(t.clone() + duration)) {
                            if best.as_ref().is_none_or(|(_, b)| load < *b) {
                                best = Some((t.clone(), load));
                            }
                        }
                    }
                    t += Duration::hours(1);
                }

                let plan = p.plan(&[incident("r", "a", text)], &fc, &now);
                let d = &plan.decisions[0];
                match &best {
                    Some((start, _)) => {
                        assert!(!d.degraded, "{text} at {now}");
                        assert_eq!(d.start, start.fixed_offset(), "{text} at {now}");
                    }
                    None => assert!(d.degraded, "{text} at {now}"),
                }
            }
            now += Duration::minutes(37);
        }
    }
}
