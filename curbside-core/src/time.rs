//! Time utilities: agency-zone parsing and hour rounding.

use chrono::{DateTime, Duration, NaiveDateTime, Offset, TimeZone};
use chrono_tz::Tz;

use crate::error::CurbsideError;

/// Parse a local time like "2026-02-20 23:59" in an IANA zone like
/// "America/New_York".
pub fn parse_local_datetime(local: &str, tz: Tz) -> Result<DateTime<Tz>, CurbsideError> {
    let ndt = NaiveDateTime::parse_from_str(local.trim(), "%Y-%m-%d %H:%M")
        .map_err(|e| CurbsideError::InvalidInput(format!("invalid local datetime '{local}': {e}")))?;

    tz.from_local_datetime(&ndt).single().ok_or_else(|| {
        CurbsideError::InvalidInput(format!("ambiguous or invalid local time (DST?): {local} {tz}"))
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz, CurbsideError> {
    name.parse()
        .map_err(|_| CurbsideError::InvalidInput(format!("invalid timezone: {name}")))
}

/// Truncate to the top of the local hour.
///
/// Works on the instant plus its current offset, so an hour that contains a
/// DST transition keeps the offset in effect at `dt`.
pub fn floor_to_hour<Z: TimeZone>(dt: &DateTime<Z>) -> DateTime<Z> {
    let offset = i64::from(dt.offset().fix().local_minus_utc());
    let local_secs = dt.timestamp() + offset;
    let into_hour = local_secs.rem_euclid(3600);
    let nanos = i64::from(dt.timestamp_subsec_nanos());
    dt.clone() - Duration::seconds(into_hour) - Duration::nanoseconds(nanos)
}

pub fn ceil_to_hour<Z: TimeZone>(dt: &DateTime<Z>) -> DateTime<Z> {
    let floor = floor_to_hour(dt);
    if floor == *dt {
        floor
    } else {
        floor + Duration::hours(1)
    }
}

/// Half-past rounds up.
pub fn round_to_nearest_hour<Z: TimeZone>(dt: &DateTime<Z>) -> DateTime<Z> {
    let floor = floor_to_hour(dt);
    if dt.clone() - floor.clone() >= Duration::minutes(30) {
        floor + Duration::hours(1)
    } else {
        floor
    }
}

/// Nearest hour, unless that lands before `earliest`; then the next hour up.
pub fn round_start<Z: TimeZone>(candidate: &DateTime<Z>, earliest: &DateTime<Z>) -> DateTime<Z> {
    let nearest = round_to_nearest_hour(candidate);
    if nearest >= *earliest {
        return nearest;
    }
    let up = ceil_to_hour(candidate);
    if up >= *earliest {
        up
    } else {
        ceil_to_hour(earliest)
    }
}

/// "Tue 03 Mar 2026, 09:00AM EST".
pub fn format_local(dt: &DateTime<Tz>) -> String {
    dt.format("%a %d %b %Y, %I:%M%p %Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn ny(local: &str) -> DateTime<Tz> {
        parse_local_datetime(local, New_York).unwrap()
    }

    #[test]
    fn test_parse_new_york_local() {
        // Feb is EST (UTC-5)
        let dt = ny("2026-02-20 23:59");
        assert_eq!(dt.to_rfc3339(), "2026-02-20T23:59:00-05:00");
    }

    #[test]
    fn test_parse_rejects_garbage_and_dst_gap() {
        assert!(parse_local_datetime("tomorrow", New_York).is_err());
        // 02:30 does not exist on spring-forward day.
        assert!(parse_local_datetime("2026-03-08 02:30", New_York).is_err());
        assert!(parse_timezone("Mars/Olympus").is_err());
        assert_eq!(parse_timezone("America/New_York").unwrap(), New_York);
    }

    #[test]
    fn test_floor_and_ceil() {
        let dt = ny("2026-03-03 10:10");
        assert_eq!(floor_to_hour(&dt), ny("2026-03-03 10:00"));
        assert_eq!(ceil_to_hour(&dt), ny("2026-03-03 11:00"));
        let exact = ny("2026-03-03 10:00");
        assert_eq!(ceil_to_hour(&exact), exact);
    }

    #[test]
    fn test_nearest_hour() {
        assert_eq!(round_to_nearest_hour(&ny("2026-03-03 10:29")), ny("2026-03-03 10:00"));
        assert_eq!(round_to_nearest_hour(&ny("2026-03-03 10:30")), ny("2026-03-03 11:00"));
        assert_eq!(round_to_nearest_hour(&ny("2026-03-03 23:45")), ny("2026-03-04 00:00"));
    }

    #[test]
    fn test_round_start_never_below_earliest() {
        // now 10:40, lead 30m -> earliest 11:10; nearest of 11:10 is 11:00, too early.
        let earliest = ny("2026-03-03 11:10");
        assert_eq!(round_start(&earliest, &earliest), ny("2026-03-03 12:00"));

        // Candidate on the hour and already late enough stays put.
        let earliest = ny("2026-03-03 10:40");
        assert_eq!(round_start(&ny("2026-03-03 11:00"), &earliest), ny("2026-03-03 11:00"));
    }

    #[test]
    fn test_floor_across_fall_back() {
        // 01:30 EDT on fall-back day; the floor keeps the EDT offset.
        let dt = DateTime::parse_from_rfc3339("2026-11-01T01:30:00-04:00")
            .unwrap()
            .with_timezone(&New_York);
        let floor = floor_to_hour(&dt);
        assert_eq!(floor.to_rfc3339(), "2026-11-01T01:00:00-04:00");
    }

    #[test]
    fn test_format_local() {
        assert_eq!(format_local(&ny("2026-03-03 09:00")), "Tue 03 Mar 2026, 09:00AM EST");
    }
}
