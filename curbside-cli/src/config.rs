use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use curbside_core::time::parse_timezone;
use curbside_core::{BusinessHours, HolidayList, PolicyConfig};
use curbside_ingest::{DataChatSettings, WarehouseSettings};

use crate::state::ensure_curbside_home;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub agency: AgencySection,
    pub warehouse: WarehouseSettings,
    pub datachat: DataChatSettings,
    pub storage: StorageSection,
    pub policy: PolicySection,
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgencySection {
    /// IANA zone every local time is interpreted in.
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSection {
    pub base_url: String,
    /// Bucket the mock incidents point their images at.
    pub sample_bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicySection {
    pub lead_minutes: i64,
    pub business_open: String,
    pub business_close: String,
    pub horizon_days: i64,
    pub max_search_days: i64,
    /// `YYYY-MM-DD`
    pub holidays: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeSection {
    /// Run against in-process fakes instead of cloud services.
    pub mock_tools: bool,
    pub adapter_timeout_secs: u64,
    /// Offline incident export. Used instead of the built-in samples in mock mode.
    pub incidents_csv: Option<PathBuf>,
}

impl Default for AgencySection {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_url: curbside_ingest::objects::DEFAULT_BASE_URL.to_string(),
            sample_bucket: "bus-stop-images".to_string(),
        }
    }
}

impl Default for PolicySection {
    fn default() -> Self {
        let p = PolicyConfig::default();
        Self {
            lead_minutes: p.lead_minutes,
            business_open: p.hours.open.format("%H:%M").to_string(),
            business_close: p.hours.close.format("%H:%M").to_string(),
            horizon_days: p.horizon_days,
            max_search_days: p.max_search_days,
            holidays: Vec::new(),
        }
    }
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            mock_tools: false,
            adapter_timeout_secs: 30,
            incidents_csv: None,
        }
    }
}

impl Config {
    /// Apply `CURBSIDE_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CURBSIDE_MOCK_TOOLS") {
            self.runtime.mock_tools = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("CURBSIDE_RUN_PROJECT") {
            self.warehouse.run_project = v;
        }
        if let Some(v) = lookup("CURBSIDE_DATA_PROJECT") {
            self.warehouse.data_project = v;
        }
        if let Some(v) = lookup("CURBSIDE_TIMEZONE") {
            self.agency.timezone = v;
        }
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        Ok(parse_timezone(&self.agency.timezone)?)
    }

    pub fn policy_config(&self) -> Result<PolicyConfig> {
        let p = &self.policy;
        let hours = BusinessHours::parse(&p.business_open, &p.business_close)
            .context("policy.business_open / policy.business_close")?;
        Ok(PolicyConfig {
            lead_minutes: p.lead_minutes,
            hours,
            horizon_days: p.horizon_days,
            max_search_days: p.max_search_days,
        })
    }

    pub fn holidays(&self) -> Result<HolidayList> {
        HolidayList::parse(self.policy.holidays.as_slice()).context("policy.holidays")
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_curbside_home()?.join("config.toml"))
}

pub fn load_config_from(p: &Path) -> Result<Config> {
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

/// File (or defaults) with environment overrides on top.
pub fn load_config() -> Result<Config> {
    let mut cfg = load_config_from(&config_path()?)?;
    cfg.apply_overrides(|k| std::env::var(k).ok());
    Ok(cfg)
}

pub fn save_config_to(cfg: &Config, p: &Path) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config_to(&Config::default(), &p)?;
    println!("Wrote {}", p.display());
    Ok(())
}
