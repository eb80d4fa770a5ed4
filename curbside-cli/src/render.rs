//! Human-readable output. `--json` bypasses all of this.

use anyhow::{Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use curbside_core::time::format_local;
use curbside_core::{current_count, Classification, ForecastMap, Incident, Outcome};
use curbside_dispatch::{EntryState, TurnReport};

pub fn print_json<T: Serialize>(outcome: &Outcome<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome).context("serialize output")?);
    Ok(())
}

pub fn incidents(list: &[Incident]) {
    if list.is_empty() {
        println!("No open incidents.");
        return;
    }
    println!("{} open incident(s)\n", list.len());
    for i in list {
        println!("{}  [{}] {}", i.id, i.bus_stop.id, i.bus_stop.address);
        if !i.description.is_empty() {
            println!("    {}", i.description);
        }
        if !i.image.uri.is_empty() {
            println!("    image: {}", i.image.browser_url());
        }
    }
}

pub fn forecasts(map: &ForecastMap, now: &DateTime<Tz>) {
    for (stop, series) in map {
        if series.is_empty() {
            println!("{stop}: no forecast");
            continue;
        }
        let min = series.iter().map(|p| p.passengers).min().unwrap_or(0);
        let max = series.iter().map(|p| p.passengers).max().unwrap_or(0);
        let current = current_count(series, now)
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{stop}: {} points, now ~{current} passengers, range {min}-{max}, until {}",
            series.len(),
            series
                .last()
                .map(|p| format_local(&p.time.with_timezone(&now.timezone())))
                .unwrap_or_default()
        );
    }
}

pub fn classification(c: &Classification) {
    println!("severity:  {:?}", c.severity);
    println!("work:      {}", c.work.label());
    println!("duration:  {} min", c.work.estimated_minutes());
    if let Some(ind) = &c.indicator {
        println!("indicator: {ind}");
    }
}

pub fn turn(report: &TurnReport, tz: Tz) {
    if report.entries.is_empty() {
        println!("Nothing to schedule.");
        return;
    }
    if let Some(e) = &report.forecast_error {
        println!("! forecast unavailable ({e}); routine work placed without ridership data\n");
    }
    for entry in &report.entries {
        let state = match &entry.state {
            EntryState::Planned => "planned".to_string(),
            EntryState::Committed { updated } => format!("scheduled ({updated} updated)"),
            EntryState::AlreadyHandled => "already handled".to_string(),
            EntryState::Rejected { reason } => format!("rejected: {reason}"),
            EntryState::Failed { message, .. } => format!("failed: {message}"),
            EntryState::Unscheduled { reason } => format!("unscheduled: {reason}"),
        };
        println!("[{}] {} @ {}  {state}", entry.status(), entry.incident_id, entry.bus_stop_id);
        if let Some(d) = &entry.decision {
            let degraded = if d.degraded { "  (no forecast)" } else { "" };
            println!(
                "    {:?} / {}: {} for {}h{degraded}",
                d.severity,
                d.work.label(),
                format_local(&d.start.with_timezone(&tz)),
                d.duration_minutes as f64 / 60.0
            );
            println!("    {}", d.notification.subject);
        }
    }
    println!(
        "\n{} success, {} warning, {} error{}",
        report.count("success"),
        report.count("warning"),
        report.count("error"),
        if report.dry_run { " (dry run)" } else { "" }
    );
}
