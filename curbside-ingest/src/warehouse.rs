//! Data-warehouse query client.
//!
//! `HttpWarehouse` speaks the BigQuery REST `jobs.query` API. Rows come back
//! as `{"f": [{"v": ...}]}` cells next to a schema; `decode_rows` turns them
//! into JSON objects keyed by column name so adapters can deserialize them.

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use curbside_core::CurbsideError;

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const USER_AGENT: &str = "curbside/maintenance-scheduler";

/// Named query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    String { name: String, value: String },
    StringArray { name: String, values: Vec<String> },
}

impl QueryParam {
    pub fn string(name: &str, value: impl Into<String>) -> Self {
        Self::String {
            name: name.to_string(),
            value: value.into(),
        }
    }

    pub fn string_array(name: &str, values: &[String]) -> Self {
        Self::StringArray {
            name: name.to_string(),
            values: values.to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::String { name, .. } | Self::StringArray { name, .. } => name,
        }
    }

    fn to_rest(&self) -> Value {
        match self {
            Self::String { name, value } => serde_json::json!({
                "name": name,
                "parameterType": {"type": "STRING"},
                "parameterValue": {"value": value},
            }),
            Self::StringArray { name, values } => serde_json::json!({
                "name": name,
                "parameterType": {"type": "ARRAY", "arrayType": {"type": "STRING"}},
                "parameterValue": {
                    "arrayValues": values.iter().map(|v| serde_json::json!({"value": v})).collect::<Vec<_>>()
                },
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// One JSON object per row, keyed by column name.
    pub rows: Vec<Value>,
    /// Set for DML statements.
    pub dml_affected_rows: Option<u64>,
}

#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn query(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult, CurbsideError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WarehouseSettings {
    pub base_url: String,
    /// Project billed for query jobs.
    pub run_project: String,
    /// Project holding the dataset.
    pub data_project: String,
    pub dataset: String,
    pub timeout_secs: u64,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            run_project: String::new(),
            data_project: String::new(),
            dataset: "bus_stop_image_processing".to_string(),
            timeout_secs: 30,
        }
    }
}

impl WarehouseSettings {
    /// Fully-qualified, backtick-quoted table reference.
    pub fn table(&self, name: &str) -> Result<String, CurbsideError> {
        curbside_core::validate_identifier("data project", &self.data_project)?;
        curbside_core::validate_identifier("dataset", &self.dataset)?;
        Ok(format!("`{}.{}.{}`", self.data_project, self.dataset, name))
    }
}

pub struct HttpWarehouse {
    http: reqwest::Client,
    settings: WarehouseSettings,
    access_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<Value>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl HttpWarehouse {
    pub fn new(settings: WarehouseSettings, access_token: Option<String>) -> Result<Self, CurbsideError> {
        curbside_core::validate_identifier("run project", &settings.run_project)?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CurbsideError::upstream("build warehouse client", e))?;
        Ok(Self {
            http,
            settings,
            access_token,
        })
    }

    pub fn settings(&self) -> &WarehouseSettings {
        &self.settings
    }

    fn headers(&self) -> Result<HeaderMap, CurbsideError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| CurbsideError::InvalidInput("access token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl WarehouseClient for HttpWarehouse {
    async fn query(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult, CurbsideError> {
        let body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": params.iter().map(QueryParam::to_rest).collect::<Vec<_>>(),
            "timeoutMs": self.settings.timeout_secs * 1000,
            "formatOptions": {"useInt64Timestamp": true},
        });
        let url = format!(
            "{}/projects/{}/queries",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.run_project
        );
        debug!(%url, params = params.len(), "warehouse query");

        let resp = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("warehouse query", self.settings.timeout_secs, e))?;

        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            error!(%status, "warehouse query failed");
            return Err(CurbsideError::UpstreamUnavailable(format!("warehouse error: {status} {txt}")));
        }

        let out: QueryResponse = resp
            .json()
            .await
            .map_err(|e| CurbsideError::upstream("parse warehouse response", e))?;
        if out.job_complete == Some(false) {
            return Err(CurbsideError::Timeout {
                operation: "warehouse query".to_string(),
                after_secs: self.settings.timeout_secs,
            });
        }

        let fields = out.schema.map(|s| s.fields).unwrap_or_default();
        let rows = decode_rows(&fields, &out.rows)?;
        let dml_affected_rows = out.num_dml_affected_rows.and_then(|n| n.parse().ok());
        info!(rows = rows.len(), dml = ?dml_affected_rows, "warehouse query done");
        Ok(QueryResult {
            rows,
            dml_affected_rows,
        })
    }
}

pub(crate) fn transport_error(operation: &str, after_secs: u64, e: reqwest::Error) -> CurbsideError {
    if e.is_timeout() {
        CurbsideError::Timeout {
            operation: operation.to_string(),
            after_secs,
        }
    } else {
        CurbsideError::upstream(operation, e)
    }
}

/// Decode REST rows (`{"f": [{"v": ..}]}`) into column-keyed objects.
pub fn decode_rows(fields: &[Field], rows: &[Value]) -> Result<Vec<Value>, CurbsideError> {
    rows.iter().map(|row| decode_record(fields, row)).collect()
}

fn decode_record(fields: &[Field], record: &Value) -> Result<Value, CurbsideError> {
    let cells = record
        .get("f")
        .and_then(Value::as_array)
        .ok_or_else(|| CurbsideError::UpstreamUnavailable("row without cells".into()))?;
    if cells.len() != fields.len() {
        return Err(CurbsideError::UpstreamUnavailable(format!(
            "row has {} cells, schema has {} fields",
            cells.len(),
            fields.len()
        )));
    }

    let mut out = Map::new();
    for (field, cell) in fields.iter().zip(cells) {
        let v = cell.get("v").unwrap_or(&Value::Null);
        out.insert(field.name.clone(), decode_value(field, v)?);
    }
    Ok(Value::Object(out))
}

fn decode_value(field: &Field, v: &Value) -> Result<Value, CurbsideError> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    if field.mode.as_deref() == Some("REPEATED") {
        let items = v.as_array().cloned().unwrap_or_default();
        let scalar = Field {
            mode: None,
            ..field.clone()
        };
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            out.push(decode_value(&scalar, item.get("v").unwrap_or(&Value::Null))?);
        }
        return Ok(Value::Array(out));
    }

    match field.kind.as_str() {
        "RECORD" | "STRUCT" => decode_record(&field.fields, v),
        "INTEGER" | "INT64" => Ok(v
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| v.clone())),
        "FLOAT" | "FLOAT64" | "NUMERIC" => Ok(v
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| v.clone())),
        "BOOLEAN" | "BOOL" => Ok(Value::Bool(v.as_str() == Some("true"))),
        "TIMESTAMP" => {
            // Microseconds since epoch (useInt64Timestamp).
            let micros = v
                .as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| CurbsideError::UpstreamUnavailable(format!("bad timestamp in {}", field.name)))?;
            let ts = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| CurbsideError::UpstreamUnavailable(format!("timestamp out of range in {}", field.name)))?;
            Ok(Value::String(ts.to_rfc3339()))
        }
        _ => Ok(v.clone()),
    }
}
