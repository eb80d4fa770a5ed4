//! curbside-core: domain types and the maintenance scheduling policy

pub mod calendar;
pub mod classify;
pub mod decision;
pub mod error;
pub mod forecast;
pub mod incident;
pub mod outcome;
pub mod policy;
pub mod time;

pub use calendar::{
    current_time_label, is_weekend, BusinessCalendar, BusinessHours, Clock, FixedClock,
    HolidayList, SystemClock, WeekendsOnly,
};
pub use classify::{Classification, Classifier, Severity, WorkKind};
pub use decision::{Notification, SchedulePlan, SchedulingDecision, Unscheduled};
pub use error::{validate_identifier, CurbsideError, ErrorKind};
pub use forecast::{
    current_count, full_window_load, load_between, series_step, ForecastMap, ForecastPoint,
};
pub use incident::{BusStop, ImageRef, Incident, IncidentStatus, MaintenanceRecord, UsAddress};
pub use outcome::Outcome;
pub use policy::{MaintenancePolicy, PolicyConfig};
