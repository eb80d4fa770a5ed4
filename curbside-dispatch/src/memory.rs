//! In-process incident store.
//!
//! Serves as both feed and sink so a whole turn can run offline. The
//! check-and-set happens under one lock, which is what keeps two concurrent
//! turns from scheduling the same stop twice.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use curbside_core::{CurbsideError, Incident, IncidentStatus, SchedulingDecision};
use curbside_ingest::IncidentFeed;

use crate::sink::{CommitOutcome, SchedulingSink};

#[derive(Debug, Default)]
pub struct MemoryIncidentStore {
    incidents: Mutex<BTreeMap<String, Incident>>,
}

impl MemoryIncidentStore {
    pub fn new(incidents: impl IntoIterator<Item = Incident>) -> Self {
        Self {
            incidents: Mutex::new(incidents.into_iter().map(|i| (i.id.clone(), i)).collect()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Incident>>, CurbsideError> {
        self.incidents
            .lock()
            .map_err(|_| CurbsideError::UpstreamUnavailable("incident store lock poisoned".into()))
    }

    pub fn get(&self, incident_id: &str) -> Option<Incident> {
        self.lock().ok()?.get(incident_id).cloned()
    }

    /// All incidents, any status, ordered by id.
    pub fn snapshot(&self) -> Vec<Incident> {
        self.lock().map(|m| m.values().cloned().collect()).unwrap_or_default()
    }

    pub fn count_with_status(&self, status: IncidentStatus) -> usize {
        self.snapshot().iter().filter(|i| i.status == status).count()
    }

    /// Externally resolve an incident (crew finished the job).
    pub fn resolve(&self, incident_id: &str) -> Result<(), CurbsideError> {
        let mut map = self.lock()?;
        let inc = map
            .get_mut(incident_id)
            .ok_or_else(|| CurbsideError::NotFound(format!("incident {incident_id}")))?;
        inc.status = IncidentStatus::Resolved;
        Ok(())
    }
}

#[async_trait]
impl IncidentFeed for MemoryIncidentStore {
    async fn list_open_incidents(&self) -> Result<Vec<Incident>, CurbsideError> {
        Ok(self.lock()?.values().filter(|i| i.is_open()).cloned().collect())
    }
}

#[async_trait]
impl SchedulingSink for MemoryIncidentStore {
    async fn commit(&self, decision: &SchedulingDecision) -> Result<CommitOutcome, CurbsideError> {
        let bus_stop_id = decision.bus_stop.id.clone();
        let record = decision.maintenance_record();

        let mut map = self.lock()?;
        let mut updated = 0u64;
        for inc in map
            .values_mut()
            .filter(|i| i.bus_stop.id == bus_stop_id && i.is_open())
        {
            inc.status = IncidentStatus::Scheduled;
            inc.maintenance = Some(record.clone());
            updated += 1;
        }
        drop(map);

        if updated == 0 {
            warn!(bus_stop = %bus_stop_id, incident = %decision.incident_id, "no open incident to schedule");
            return Ok(CommitOutcome::AlreadyHandled { bus_stop_id });
        }
        info!(bus_stop = %bus_stop_id, updated, start = %decision.start, "maintenance scheduled");
        Ok(CommitOutcome::Committed { bus_stop_id, updated })
    }
}
