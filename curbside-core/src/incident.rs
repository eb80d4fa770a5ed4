//! Bus stops and the incidents reported against them.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl fmt::Display for UsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {} {}", self.street, self.city, self.state, self.zip)
    }
}

/// Reference data; never mutated by this system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStop {
    pub id: String,
    pub address: UsAddress,
}

impl BusStop {
    pub fn new(id: impl Into<String>, street: &str, city: &str, state: &str, zip: &str) -> Self {
        Self {
            id: id.into(),
            address: UsAddress {
                street: street.to_string(),
                city: city.to_string(),
                state: state.to_string(),
                zip: zip.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Scheduled,
    /// Set by processes outside this system.
    Resolved,
}

impl FromStr for IncidentStatus {
    type Err = String;

    /// The warehouse stores statuses upper-case (`OPEN`); accept any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "scheduled" => Ok(Self::Scheduled),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown incident status: {other}")),
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Scheduled => "scheduled",
            Self::Resolved => "resolved",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Object-store URI, e.g. `gs://bucket/images/PA-02.jpg`.
    pub uri: String,
    pub mime_type: String,
}

const GCS_BROWSER_PREFIX: &str = "https://storage.mtls.cloud.google.com/";

impl ImageRef {
    pub fn new(uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Authenticated browser link for `gs://` URIs; other URIs pass through.
    pub fn browser_url(&self) -> String {
        match self.uri.strip_prefix("gs://") {
            Some(rest) => format!("{GCS_BROWSER_PREFIX}{rest}"),
            None => self.uri.clone(),
        }
    }

    /// Last path segment of the URI (`MA-02-broken-glass.jpg`).
    pub fn object_name(&self) -> &str {
        self.uri.rsplit('/').next().unwrap_or(&self.uri)
    }
}

/// Attached to an incident once it moves to `scheduled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub scheduled_time: DateTime<FixedOffset>,
    pub reason: String,
    pub notification_subject: String,
    pub notification_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub bus_stop: BusStop,
    pub status: IncidentStatus,
    /// Image-analysis report text.
    pub description: String,
    pub image: ImageRef,
    pub maintenance: Option<MaintenanceRecord>,
}

impl Incident {
    pub fn new(id: impl Into<String>, bus_stop: BusStop, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bus_stop,
            status: IncidentStatus::Open,
            description: description.into(),
            image: ImageRef::new("", "image/jpeg"),
            maintenance: None,
        }
    }

    pub fn with_image(mut self, uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        self.image = ImageRef::new(uri, mime_type);
        self
    }

    pub fn with_status(mut self, status: IncidentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == IncidentStatus::Open
    }
}
