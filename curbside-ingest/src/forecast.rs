//! Passenger forecast adapters.

use async_trait::async_trait;
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{error, info};

use curbside_core::forecast::sort_series;
use curbside_core::{validate_identifier, Clock, CurbsideError, ForecastMap, ForecastPoint};

use crate::warehouse::{QueryParam, WarehouseClient, WarehouseSettings};

#[async_trait]
pub trait ForecastProvider: Send + Sync {
    /// Time-ordered forecast per requested stop. Every requested id is a key,
    /// possibly with an empty series; a failed lookup fails the whole call.
    async fn forecast(&self, bus_stop_ids: &[String]) -> Result<ForecastMap, CurbsideError>;
}

#[async_trait]
impl<F: ForecastProvider + ?Sized> ForecastProvider for Arc<F> {
    async fn forecast(&self, bus_stop_ids: &[String]) -> Result<ForecastMap, CurbsideError> {
        (**self).forecast(bus_stop_ids).await
    }
}

fn check_ids(bus_stop_ids: &[String]) -> Result<(), CurbsideError> {
    for id in bus_stop_ids {
        validate_identifier("bus stop id", id)?;
    }
    Ok(())
}

/// Ridership forecast from the warehouse's time-series model.
pub struct WarehouseForecast {
    client: Arc<dyn WarehouseClient>,
    settings: WarehouseSettings,
    tz: Tz,
}

#[derive(Debug, Deserialize)]
struct ForecastRow {
    bus_stop_id: String,
    forecast_timestamp: String,
    expected_number_of_passengers: i64,
}

impl WarehouseForecast {
    pub fn new(client: Arc<dyn WarehouseClient>, settings: WarehouseSettings, tz: Tz) -> Self {
        Self { client, settings, tz }
    }

    pub fn sql(&self) -> Result<String, CurbsideError> {
        Ok(format!(
            "WITH forecast AS ( \
               SELECT bus_stop_id, forecast_timestamp, \
                 CAST(forecast_value AS INT64) AS expected_number_of_passengers \
               FROM AI.FORECAST( \
                 (SELECT bus_stop_id, event_ts, num_riders FROM {ridership} \
                    WHERE bus_stop_id IN UNNEST(@bus_stop_ids)), \
                 data_col => 'num_riders', \
                 timestamp_col => 'event_ts', \
                 model => 'TimesFM 2.0', \
                 id_cols => ['bus_stop_id'], \
                 horizon => 500, \
                 confidence_level => .8) \
             ) \
             SELECT bus_stop_id, forecast_timestamp, expected_number_of_passengers \
             FROM forecast \
             WHERE forecast_timestamp BETWEEN CURRENT_TIMESTAMP() \
               AND TIMESTAMP_ADD(CURRENT_TIMESTAMP(), INTERVAL 3 DAY)",
            ridership = self.settings.table("bus_ridership")?,
        ))
    }

    fn point(&self, row: ForecastRow) -> Result<(String, ForecastPoint), CurbsideError> {
        let time = DateTime::parse_from_rfc3339(&row.forecast_timestamp)
            .map_err(|e| CurbsideError::upstream("decode forecast_timestamp", e))?
            .with_timezone(&self.tz)
            .fixed_offset();
        // The model can dip below zero; a count cannot.
        let passengers = u32::try_from(row.expected_number_of_passengers.max(0)).unwrap_or(u32::MAX);
        Ok((row.bus_stop_id, ForecastPoint { time, passengers }))
    }
}

#[async_trait]
impl ForecastProvider for WarehouseForecast {
    async fn forecast(&self, bus_stop_ids: &[String]) -> Result<ForecastMap, CurbsideError> {
        check_ids(bus_stop_ids)?;
        info!(stops = ?bus_stop_ids, "retrieving expected number of passengers");

        let mut out: ForecastMap = bus_stop_ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        if bus_stop_ids.is_empty() {
            return Ok(out);
        }

        let sql = self.sql()?;
        let params = [QueryParam::string_array("bus_stop_ids", bus_stop_ids)];
        let result = self.client.query(&sql, &params).await.inspect_err(|e| {
            error!(error = %e, "call to retrieve bus stop ridership failed");
        })?;

        for row in result.rows {
            let row: ForecastRow = serde_json::from_value(row)
                .map_err(|e| CurbsideError::upstream("decode forecast row", e))?;
            let (id, point) = self.point(row)?;
            // Rows for stops nobody asked about are dropped.
            if let Some(series) = out.get_mut(&id) {
                series.push(point);
            }
        }
        for series in out.values_mut() {
            sort_series(series);
        }
        Ok(out)
    }
}

/// Stand-in forecast for mock mode: a point every 15 minutes from ten
/// minutes out to three days out. Values are derived from a hash of the stop
/// id and the point's slot, so they look noisy but repeat for a given clock.
pub struct SyntheticForecast {
    clock: Arc<dyn Clock>,
}

const STEP_MINUTES: i64 = 15;
const FIRST_OFFSET_MINUTES: i64 = 10;
const HORIZON_MINUTES: i64 = 3 * 24 * 60;

impl SyntheticForecast {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn hash(parts: &(impl Hash + ?Sized)) -> u64 {
        let mut h = DefaultHasher::new();
        parts.hash(&mut h);
        h.finish()
    }

    pub fn series(&self, bus_stop_id: &str, now: &DateTime<Tz>) -> Vec<ForecastPoint> {
        let base = 5 + (Self::hash(bus_stop_id) % 16) as u32; // 5..=20
        let mut t = FIRST_OFFSET_MINUTES;
        let mut out = Vec::new();
        while t < HORIZON_MINUTES {
            let time = now.clone() + Duration::minutes(t);
            let slot = time.timestamp() / (STEP_MINUTES * 60);
            let noise = 3 + (Self::hash(&(bus_stop_id, slot)) % 8) as u32; // 3..=10
            out.push(ForecastPoint {
                time: time.fixed_offset(),
                passengers: base + noise,
            });
            t += STEP_MINUTES;
        }
        out
    }
}

#[async_trait]
impl ForecastProvider for SyntheticForecast {
    async fn forecast(&self, bus_stop_ids: &[String]) -> Result<ForecastMap, CurbsideError> {
        check_ids(bus_stop_ids)?;
        let now = self.clock.now();
        Ok(bus_stop_ids
            .iter()
            .map(|id| (id.clone(), self.series(id, &now)))
            .collect())
    }
}
