//! Incident feed: the currently open incidents with their stop and report.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use curbside_core::{BusStop, CurbsideError, Incident, IncidentStatus, UsAddress};

use crate::warehouse::{WarehouseClient, WarehouseSettings};

#[async_trait]
pub trait IncidentFeed: Send + Sync {
    /// All incidents in status `open`. An empty list means there are none;
    /// a failed lookup is an `Err`.
    async fn list_open_incidents(&self) -> Result<Vec<Incident>, CurbsideError>;
}

#[async_trait]
impl<F: IncidentFeed + ?Sized> IncidentFeed for Arc<F> {
    async fn list_open_incidents(&self) -> Result<Vec<Incident>, CurbsideError> {
        (**self).list_open_incidents().await
    }
}

#[derive(Debug, Deserialize)]
struct IncidentRow {
    incident_id: String,
    bus_stop_id: String,
    status: String,
    source_image_uri: Option<String>,
    source_image_mime_type: Option<String>,
    description: Option<String>,
    address: Option<AddressRow>,
}

#[derive(Debug, Default, Deserialize)]
struct AddressRow {
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
}

fn incident_from_row(row: &Value) -> Result<Incident, CurbsideError> {
    let r: IncidentRow = serde_json::from_value(row.clone())
        .map_err(|e| CurbsideError::upstream("decode incident row", e))?;
    let status: IncidentStatus = r.status.parse().map_err(CurbsideError::UpstreamUnavailable)?;
    let addr = r.address.unwrap_or_default();
    let stop = BusStop {
        id: r.bus_stop_id,
        address: UsAddress {
            street: addr.street.unwrap_or_default(),
            city: addr.city.unwrap_or_default(),
            state: addr.state.unwrap_or_default(),
            zip: addr.zip.unwrap_or_default(),
        },
    };
    Ok(Incident::new(r.incident_id, stop, r.description.unwrap_or_default())
        .with_image(
            r.source_image_uri.unwrap_or_default(),
            r.source_image_mime_type.unwrap_or_else(|| "image/jpeg".to_string()),
        )
        .with_status(status))
}

/// Open incidents joined with their latest image report and stop address.
pub struct WarehouseIncidentFeed {
    client: Arc<dyn WarehouseClient>,
    settings: WarehouseSettings,
}

impl WarehouseIncidentFeed {
    pub fn new(client: Arc<dyn WarehouseClient>, settings: WarehouseSettings) -> Self {
        Self { client, settings }
    }

    pub fn sql(&self) -> Result<String, CurbsideError> {
        Ok(format!(
            "SELECT incidents.incident_id, incidents.bus_stop_id, incidents.status, \
                reports.uri AS source_image_uri, reports.content_type AS source_image_mime_type, \
                reports.description, bus_stops.address \
             FROM {incidents} incidents \
             JOIN {reports} reports ON incidents.open_report_id = reports.report_id \
             JOIN {stops} bus_stops ON incidents.bus_stop_id = bus_stops.bus_stop_id \
             WHERE incidents.status = 'OPEN'",
            incidents = self.settings.table("incidents")?,
            reports = self.settings.table("image_reports")?,
            stops = self.settings.table("bus_stops")?,
        ))
    }
}

#[async_trait]
impl IncidentFeed for WarehouseIncidentFeed {
    async fn list_open_incidents(&self) -> Result<Vec<Incident>, CurbsideError> {
        let sql = self.sql()?;
        let result = self.client.query(&sql, &[]).await.inspect_err(|e| {
            error!(error = %e, "call to retrieve incidents failed");
        })?;
        let incidents = result
            .rows
            .iter()
            .map(incident_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = incidents.len(), "retrieved open incidents");
        Ok(incidents)
    }
}

/// Fixed incidents for mock mode and demos.
#[derive(Debug, Clone)]
pub struct StaticIncidentFeed {
    incidents: Vec<Incident>,
}

impl StaticIncidentFeed {
    pub fn new(incidents: Vec<Incident>) -> Self {
        Self { incidents }
    }

    pub fn into_incidents(self) -> Vec<Incident> {
        self.incidents
    }

    /// Two sample reports: broken glass at stop-1, dirty and damaged at stop-2.
    pub fn samples(bucket: &str) -> Self {
        Self::new(vec![
            Incident::new(
                "incident-1",
                BusStop::new("stop-1", "123 Main", "New York", "NY", "10001"),
                "",
            )
            .with_image(format!("gs://{bucket}/sources/MA-02-broken-glass.jpg"), "image/jpeg"),
            Incident::new(
                "incident-2",
                BusStop::new("stop-2", "457 1st Street", "New York", "NY", "10002"),
                "",
            )
            .with_image(format!("gs://{bucket}/sources/MC-02-dirty-damaged.jpg"), "image/jpeg"),
        ])
    }
}

#[async_trait]
impl IncidentFeed for StaticIncidentFeed {
    async fn list_open_incidents(&self) -> Result<Vec<Incident>, CurbsideError> {
        Ok(self.incidents.iter().filter(|i| i.is_open()).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{QueryParam, QueryResult};
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeWarehouse {
        result: Result<QueryResult, String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WarehouseClient for FakeWarehouse {
        async fn query(&self, sql: &str, _params: &[QueryParam]) -> Result<QueryResult, CurbsideError> {
            self.seen.lock().unwrap().push(sql.to_string());
            self.result.clone().map_err(CurbsideError::UpstreamUnavailable)
        }
    }

    fn settings() -> WarehouseSettings {
        WarehouseSettings {
            run_project: "run-proj".into(),
            data_project: "data-proj".into(),
            ..WarehouseSettings::default()
        }
    }

    #[tokio::test]
    async fn warehouse_rows_become_incidents() {
        let fake = Arc::new(FakeWarehouse {
            result: Ok(QueryResult {
                rows: vec![json!({
                    "incident_id": "inc-7",
                    "bus_stop_id": "7",
                    "status": "OPEN",
                    "source_image_uri": "gs://my-bucket/images/PC-01.jpg",
                    "source_image_mime_type": "image/jpeg",
                    "description": "Leaves on the ground around the bench.",
                    "address": {"street": "3643 Tasmanian devil Street", "city": "Anytown", "state": "NY", "zip": "10001"}
                })],
                dml_affected_rows: None,
            }),
            seen: Mutex::new(vec![]),
        });
        let feed = WarehouseIncidentFeed::new(fake.clone(), settings());
        let incidents = feed.list_open_incidents().await.unwrap();

        assert_eq!(incidents.len(), 1);
        let inc = &incidents[0];
        assert_eq!(inc.status, IncidentStatus::Open);
        assert_eq!(inc.bus_stop.address.city, "Anytown");
        assert_eq!(inc.image.object_name(), "PC-01.jpg");

        let sql = fake.seen.lock().unwrap()[0].clone();
        assert!(sql.contains("`data-proj.bus_stop_image_processing.image_reports`"));
        assert!(sql.contains("WHERE incidents.status = 'OPEN'"));
    }

    #[tokio::test]
    async fn upstream_failure_is_an_error_not_an_empty_list() {
        let fake = Arc::new(FakeWarehouse {
            result: Err("connection reset".into()),
            seen: Mutex::new(vec![]),
        });
        let feed = WarehouseIncidentFeed::new(fake, settings());
        let err = feed.list_open_incidents().await.unwrap_err();
        assert!(err.is_retrievable());
    }

    #[tokio::test]
    async fn samples_classify_from_image_names() {
        let feed = StaticIncidentFeed::samples("demo-multimodal");
        let incidents = feed.list_open_incidents().await.unwrap();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].image.object_name(), "MA-02-broken-glass.jpg");
        assert!(incidents[1].description.is_empty());
    }
}
