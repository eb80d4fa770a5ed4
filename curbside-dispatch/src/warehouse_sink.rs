//! Conditional update of incident rows in the warehouse.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use curbside_core::{validate_identifier, CurbsideError, SchedulingDecision};
use curbside_ingest::{QueryParam, WarehouseClient, WarehouseSettings};

use crate::sink::{CommitOutcome, SchedulingSink};

pub struct WarehouseSink {
    client: Arc<dyn WarehouseClient>,
    settings: WarehouseSettings,
}

impl WarehouseSink {
    pub fn new(client: Arc<dyn WarehouseClient>, settings: WarehouseSettings) -> Self {
        Self { client, settings }
    }

    /// The `status = 'OPEN'` predicate makes the update its own
    /// check-and-set; no read happens first.
    pub fn sql(&self) -> Result<String, CurbsideError> {
        Ok(format!(
            "UPDATE {incidents} \
             SET status = 'SCHEDULED', \
                 maintenance_details = STRUCT( \
                   @maintenance_start AS scheduled_time, \
                   @reason AS reason, \
                   @notification_subject AS notification_subject, \
                   @notification_content AS notification_body) \
             WHERE status = 'OPEN' AND bus_stop_id = @bus_stop_id",
            incidents = self.settings.table("incidents")?,
        ))
    }

    pub fn params(decision: &SchedulingDecision) -> Vec<QueryParam> {
        vec![
            QueryParam::string("bus_stop_id", decision.bus_stop.id.clone()),
            QueryParam::string("maintenance_start", decision.start.to_rfc3339()),
            QueryParam::string("reason", decision.reason.clone()),
            QueryParam::string("notification_subject", decision.notification.subject.clone()),
            QueryParam::string("notification_content", decision.notification.body.clone()),
        ]
    }
}

#[async_trait]
impl SchedulingSink for WarehouseSink {
    async fn commit(&self, decision: &SchedulingDecision) -> Result<CommitOutcome, CurbsideError> {
        validate_identifier("bus stop id", &decision.bus_stop.id)?;
        let sql = self.sql()?;
        info!(
            bus_stop = %decision.bus_stop.id,
            start = %decision.start,
            subject = %decision.notification.subject,
            "scheduling maintenance"
        );

        let result = self
            .client
            .query(&sql, &Self::params(decision))
            .await
            .inspect_err(|e| error!(error = %e, "call to update incidents failed"))?;

        let bus_stop_id = decision.bus_stop.id.clone();
        match result.dml_affected_rows {
            Some(0) => {
                warn!(bus_stop = %bus_stop_id, "no open incident left to schedule");
                Ok(CommitOutcome::AlreadyHandled { bus_stop_id })
            }
            Some(updated) => Ok(CommitOutcome::Committed { bus_stop_id, updated }),
            None => Err(CurbsideError::UpstreamUnavailable(
                "update returned no affected-row count".into(),
            )),
        }
    }
}
