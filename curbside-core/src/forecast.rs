//! Passenger-load forecast series.

use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub time: DateTime<FixedOffset>,
    pub passengers: u32,
}

/// bus_stop_id -> time-ordered series.
pub type ForecastMap = BTreeMap<String, Vec<ForecastPoint>>;

/// Sort a series by time in place; ties keep their original order.
pub fn sort_series(series: &mut [ForecastPoint]) {
    series.sort_by_key(|p| p.time);
}

pub fn is_time_ordered(series: &[ForecastPoint]) -> bool {
    series.windows(2).all(|w| w[0].time <= w[1].time)
}

/// Expected count right now: the first point at or after `now`.
pub fn current_count<Tz: TimeZone>(series: &[ForecastPoint], now: &DateTime<Tz>) -> Option<u32> {
    series
        .iter()
        .find(|p| p.time >= *now)
        .map(|p| p.passengers)
}

/// Sum of expected passengers in `[start, end)`, or `None` when no point
/// falls inside the window.
pub fn load_between<Tz: TimeZone>(
    series: &[ForecastPoint],
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> Option<u64> {
    let mut covered = false;
    let mut total = 0u64;
    for p in series.iter().filter(|p| p.time >= *start && p.time < *end) {
        covered = true;
        total += u64::from(p.passengers);
    }
    covered.then_some(total)
}

/// Spacing of the series: the smallest gap between consecutive points.
pub fn series_step(series: &[ForecastPoint]) -> Option<Duration> {
    series
        .windows(2)
        .map(|w| w[1].time - w[0].time)
        .filter(|d| *d > Duration::zero())
        .min()
}

/// Load over `[start, end)` only when the series covers the whole window:
/// at least one point per step. A window the forecast only partly reaches
/// (the edge of the horizon) is `None`, never a small sum.
pub fn full_window_load<Tz: TimeZone>(
    series: &[ForecastPoint],
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> Option<u64> {
    let points = series.iter().filter(|p| p.time >= *start && p.time < *end).count();
    let needed = match series_step(series) {
        Some(step) => ((end.clone() - start.clone()).num_seconds() / step.num_seconds().max(1)).max(1),
        None => 1,
    };
    if (points as i64) < needed {
        return None;
    }
    load_between(series, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(start: DateTime<FixedOffset>, values: &[u32]) -> Vec<ForecastPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| ForecastPoint {
                time: start + Duration::minutes(15 * i as i64),
                passengers: *v,
            })
            .collect()
    }

    fn t0() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-03-03T10:00:00-05:00").unwrap()
    }

    #[test]
    fn current_count_skips_past_points() {
        let s = series(t0(), &[4, 9, 12]);
        let now = t0() + Duration::minutes(5);
        assert_eq!(current_count(&s, &now), Some(9));
        assert_eq!(current_count(&s, &(t0() + Duration::hours(5))), None);
    }

    #[test]
    fn load_is_half_open_and_none_when_uncovered() {
        let s = series(t0(), &[1, 2, 3, 4, 5]);
        // [10:00, 10:30) covers the first two points only.
        assert_eq!(load_between(&s, &t0(), &(t0() + Duration::minutes(30))), Some(3));
        let later = t0() + Duration::hours(6);
        assert_eq!(load_between(&s, &later, &(later + Duration::hours(1))), None);
    }

    #[test]
    fn window_past_the_last_point_is_not_a_candidate() {
        // Eight quarter-hour points: 10:00 through 11:45.
        let s = series(t0(), &[5; 8]);
        assert_eq!(series_step(&s), Some(Duration::minutes(15)));

        let hour = Duration::hours(1);
        assert_eq!(full_window_load(&s, &t0(), &(t0() + hour)), Some(20));
        // 11:30-12:30 holds only two points.
        let edge = t0() + Duration::minutes(90);
        assert_eq!(load_between(&s, &edge, &(edge + hour)), Some(10));
        assert_eq!(full_window_load(&s, &edge, &(edge + hour)), None);
    }

    #[test]
    fn single_point_series_covers_its_window() {
        let s = series(t0(), &[7]);
        assert_eq!(series_step(&s), None);
        let end = t0() + Duration::hours(1);
        assert_eq!(full_window_load(&s, &t0(), &end), Some(7));
    }

    #[test]
    fn sort_restores_time_order() {
        let mut s = series(t0(), &[1, 2, 3]);
        s.reverse();
        assert!(!is_time_ordered(&s));
        sort_series(&mut s);
        assert!(is_time_ordered(&s));
        assert_eq!(s[0].passengers, 1);
    }
}
