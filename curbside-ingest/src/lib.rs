//! curbside-ingest: adapters for incidents, ridership forecasts, data chat and images.

pub mod datachat;
pub mod fixtures;
pub mod forecast;
pub mod incidents;
pub mod objects;
pub mod warehouse;

pub use datachat::{Answer, DataChatClient, DataChatSettings, HttpDataChat, ReplyFragment};
pub use fixtures::{load_incidents_csv, CsvIncidentFeed};
pub use forecast::{ForecastProvider, SyntheticForecast, WarehouseForecast};
pub use incidents::{IncidentFeed, StaticIncidentFeed, WarehouseIncidentFeed};
pub use objects::{GcsObjectStore, ImageBlob, ObjectStore, ObjectUri};
pub use warehouse::{HttpWarehouse, QueryParam, QueryResult, WarehouseClient, WarehouseSettings};
