//! Offline incident feed backed by a CSV export.
//!
//! Columns: incident_id, bus_stop_id, status, street, city, state, zip,
//! image_uri, image_mime_type, description

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use curbside_core::{BusStop, CurbsideError, Incident, IncidentStatus};

use crate::incidents::IncidentFeed;

#[derive(Debug, Deserialize)]
struct CsvRow {
    incident_id: String,
    bus_stop_id: String,
    status: String,
    street: String,
    city: String,
    state: String,
    zip: String,
    image_uri: String,
    #[serde(default)]
    image_mime_type: String,
    #[serde(default)]
    description: String,
}

/// Every incident in the file, whatever its status. Rows with an unknown
/// status or an empty id are skipped with a warning.
pub fn load_incidents_csv(path: impl AsRef<Path>) -> Result<Vec<Incident>, CurbsideError> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| CurbsideError::NotFound(format!("opening {}: {e}", path.display())))?;

    let mut out = Vec::new();
    for (line, result) in rdr.deserialize::<CsvRow>().enumerate() {
        let row = result.map_err(|e| CurbsideError::InvalidInput(format!("{}: {e}", path.display())))?;
        if row.incident_id.is_empty() || row.bus_stop_id.is_empty() {
            warn!(line = line + 2, "skipping row without ids");
            continue;
        }
        let status: IncidentStatus = match row.status.parse() {
            Ok(s) => s,
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping row");
                continue;
            }
        };
        let mime = if row.image_mime_type.is_empty() {
            "image/jpeg".to_string()
        } else {
            row.image_mime_type
        };
        let stop = BusStop::new(row.bus_stop_id, &row.street, &row.city, &row.state, &row.zip);
        out.push(
            Incident::new(row.incident_id, stop, row.description)
                .with_image(row.image_uri, mime)
                .with_status(status),
        );
    }
    debug!(path = %path.display(), count = out.len(), "loaded incidents csv");
    Ok(out)
}

/// Re-reads the file on every call so edits show up between turns.
#[derive(Debug, Clone)]
pub struct CsvIncidentFeed {
    path: PathBuf,
}

impl CsvIncidentFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IncidentFeed for CsvIncidentFeed {
    async fn list_open_incidents(&self) -> Result<Vec<Incident>, CurbsideError> {
        Ok(load_incidents_csv(&self.path)?
            .into_iter()
            .filter(Incident::is_open)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/incidents.csv")
    }

    #[test]
    fn test_load_fixture() {
        let incidents = load_incidents_csv(fixture()).expect("fixture should parse");
        assert_eq!(incidents.len(), 6);

        let first = &incidents[0];
        assert_eq!(first.id, "incident-101");
        assert_eq!(first.bus_stop.address.street, "123 Main");
        assert!(first.description.starts_with("Broken glass near entrance"));

        let scheduled = incidents.iter().find(|i| i.id == "incident-105").unwrap();
        assert_eq!(scheduled.status, IncidentStatus::Scheduled);
        assert_eq!(scheduled.image.mime_type, "image/png");

        let no_text = incidents.iter().find(|i| i.id == "incident-106").unwrap();
        assert!(no_text.description.is_empty());
        assert!(no_text.is_open());
    }

    #[tokio::test]
    async fn feed_only_returns_open_incidents() {
        let feed = CsvIncidentFeed::new(fixture());
        let open = feed.list_open_incidents().await.unwrap();
        assert_eq!(open.len(), 5);
        assert!(open.iter().all(|i| i.is_open()));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load_incidents_csv("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, CurbsideError::NotFound(_)));
    }
}
