//! Adapters are built once here and handed to the commands.

use anyhow::{Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use curbside_core::time::parse_local_datetime;
use curbside_core::{Clock, FixedClock, HolidayList, MaintenancePolicy, SystemClock};
use curbside_dispatch::{MemoryIncidentStore, SchedulingSink, SchedulingTurn, WarehouseSink};
use curbside_ingest::{
    load_incidents_csv, ForecastProvider, GcsObjectStore, HttpDataChat, HttpWarehouse,
    IncidentFeed, StaticIncidentFeed, SyntheticForecast, WarehouseClient, WarehouseForecast,
    WarehouseIncidentFeed,
};

use crate::config::Config;
use crate::state::access_token;

pub struct Services {
    pub tz: Tz,
    pub clock: Arc<dyn Clock>,
    pub feed: Arc<dyn IncidentFeed>,
    pub forecast: Arc<dyn ForecastProvider>,
    pub sink: Arc<dyn SchedulingSink>,
    pub timeout: Duration,
    pub mock: bool,
}

impl Services {
    /// `at` pins the clock to a local agency time ("YYYY-MM-DD HH:MM").
    pub fn build(cfg: &Config, at: Option<&str>) -> Result<Self> {
        let tz = cfg.timezone()?;
        let clock: Arc<dyn Clock> = match at {
            Some(local) => Arc::new(FixedClock(parse_local_datetime(local, tz)?)),
            None => Arc::new(SystemClock { tz }),
        };
        let timeout = Duration::from_secs(cfg.runtime.adapter_timeout_secs);

        if cfg.runtime.mock_tools {
            let incidents = match &cfg.runtime.incidents_csv {
                Some(path) => load_incidents_csv(path)
                    .with_context(|| format!("load incidents from {}", path.display()))?,
                None => StaticIncidentFeed::samples(&cfg.storage.sample_bucket).into_incidents(),
            };
            info!(count = incidents.len(), "mock mode: in-memory incident store");
            let store = Arc::new(MemoryIncidentStore::new(incidents));
            return Ok(Self {
                tz,
                forecast: Arc::new(SyntheticForecast::new(clock.clone())),
                clock,
                feed: store.clone(),
                sink: store,
                timeout,
                mock: true,
            });
        }

        let client: Arc<dyn WarehouseClient> =
            Arc::new(HttpWarehouse::new(cfg.warehouse.clone(), access_token())?);
        debug!(run_project = %cfg.warehouse.run_project, data_project = %cfg.warehouse.data_project, "warehouse client ready");
        Ok(Self {
            tz,
            clock,
            feed: Arc::new(WarehouseIncidentFeed::new(client.clone(), cfg.warehouse.clone())),
            forecast: Arc::new(WarehouseForecast::new(client.clone(), cfg.warehouse.clone(), tz)),
            sink: Arc::new(WarehouseSink::new(client, cfg.warehouse.clone())),
            timeout,
            mock: false,
        })
    }

    pub fn now(&self) -> DateTime<Tz> {
        self.clock.now()
    }

    pub fn turn(&self, cfg: &Config, dry_run: bool) -> Result<SchedulingTurn<HolidayList>> {
        let policy = MaintenancePolicy::new(cfg.policy_config()?, cfg.holidays()?)?;
        Ok(SchedulingTurn::new(self.feed.clone(), self.forecast.clone(), self.sink.clone(), policy)
            .with_timeout(self.timeout)
            .with_dry_run(dry_run))
    }
}

pub fn data_chat(cfg: &Config) -> Result<HttpDataChat> {
    Ok(HttpDataChat::new(cfg.datachat.clone(), access_token())?)
}

pub fn object_store(cfg: &Config) -> Result<GcsObjectStore> {
    Ok(GcsObjectStore::new(
        cfg.storage.base_url.clone(),
        access_token(),
        cfg.runtime.adapter_timeout_secs,
    )?)
}
