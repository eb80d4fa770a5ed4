//! Natural-language questions against the data warehouse.
//!
//! The conversational-analytics `chat` endpoint streams a JSON array of
//! messages. Each system message carries one of: answer text, the SQL it
//! ran, or a Vega-Lite chart. We split the array incrementally and hand each
//! fragment to the caller as it arrives.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use curbside_core::{validate_identifier, CurbsideError};

use crate::warehouse::{transport_error, USER_AGENT};

pub const DEFAULT_BASE_URL: &str = "https://geminidataanalytics.googleapis.com/v1beta";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum ReplyFragment {
    Text(String),
    /// Query text the service executed.
    Query(String),
    /// Vega-Lite spec.
    Chart(Value),
}

/// Everything a streamed reply said, in order of arrival.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub queries: Vec<String>,
    pub charts: Vec<Value>,
}

impl Answer {
    pub fn from_fragments(fragments: &[ReplyFragment]) -> Self {
        let mut out = Self::default();
        for f in fragments {
            match f {
                ReplyFragment::Text(t) => {
                    if !out.text.is_empty() && !out.text.ends_with('\n') {
                        out.text.push('\n');
                    }
                    out.text.push_str(t);
                }
                ReplyFragment::Query(q) => out.queries.push(q.clone()),
                ReplyFragment::Chart(c) => out.charts.push(c.clone()),
            }
        }
        out
    }
}

#[async_trait]
pub trait DataChatClient: Send + Sync {
    /// Ask a question, streaming fragments to `on_fragment` as they arrive.
    /// `conversation` keeps follow-up questions in the same session.
    async fn ask(
        &self,
        question: &str,
        conversation: Option<&str>,
        on_fragment: &mut (dyn FnMut(ReplyFragment) + Send),
    ) -> Result<Answer, CurbsideError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataChatSettings {
    pub base_url: String,
    pub billing_project: String,
    pub location: String,
    pub data_agent_id: String,
    pub timeout_secs: u64,
}

impl Default for DataChatSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            billing_project: String::new(),
            location: "global".to_string(),
            data_agent_id: String::new(),
            timeout_secs: 120,
        }
    }
}

pub struct HttpDataChat {
    http: reqwest::Client,
    settings: DataChatSettings,
    access_token: Option<String>,
}

impl HttpDataChat {
    pub fn new(settings: DataChatSettings, access_token: Option<String>) -> Result<Self, CurbsideError> {
        validate_identifier("billing project", &settings.billing_project)?;
        validate_identifier("location", &settings.location)?;
        validate_identifier("data agent id", &settings.data_agent_id)?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CurbsideError::upstream("build datachat client", e))?;
        Ok(Self {
            http,
            settings,
            access_token,
        })
    }

    fn parent(&self) -> String {
        format!(
            "projects/{}/locations/{}",
            self.settings.billing_project, self.settings.location
        )
    }

    pub fn request_body(&self, question: &str, conversation: Option<&str>) -> Value {
        let parent = self.parent();
        let agent = format!("{parent}/dataAgents/{}", self.settings.data_agent_id);
        let messages = serde_json::json!([{"userMessage": {"text": question}}]);
        match conversation {
            Some(c) => serde_json::json!({
                "parent": parent,
                "messages": messages,
                "conversationReference": {
                    "conversation": format!("{parent}/conversations/{c}"),
                    "dataAgentContext": {"dataAgent": agent},
                },
            }),
            None => serde_json::json!({
                "parent": parent,
                "messages": messages,
                "dataAgentContext": {"dataAgent": agent},
            }),
        }
    }
}

#[async_trait]
impl DataChatClient for HttpDataChat {
    async fn ask(
        &self,
        question: &str,
        conversation: Option<&str>,
        on_fragment: &mut (dyn FnMut(ReplyFragment) + Send),
    ) -> Result<Answer, CurbsideError> {
        if question.trim().is_empty() {
            return Err(CurbsideError::InvalidInput("question must be non-empty".into()));
        }
        if let Some(c) = conversation {
            validate_identifier("conversation id", c)?;
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.access_token {
            let v = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| CurbsideError::InvalidInput("access token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, v);
        }

        let url = format!("{}/{}:chat", self.settings.base_url.trim_end_matches('/'), self.parent());
        info!(conversation = ?conversation, "asking data agent");
        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .json(&self.request_body(question, conversation))
            .send()
            .await
            .map_err(|e| transport_error("datachat request", self.settings.timeout_secs, e))?;

        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            error!(%status, "datachat request failed");
            return Err(CurbsideError::UpstreamUnavailable(format!("datachat error: {status} {txt}")));
        }

        let mut stream = resp.bytes_stream();
        let mut splitter = JsonArraySplitter::default();
        let mut fragments = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport_error("datachat stream", self.settings.timeout_secs, e))?;
            for element in splitter.push(&String::from_utf8_lossy(chunk.as_ref())) {
                let v: Value = serde_json::from_str(&element)
                    .map_err(|e| CurbsideError::upstream("parse datachat message", e))?;
                for f in fragments_of(&v) {
                    on_fragment(f.clone());
                    fragments.push(f);
                }
            }
        }

        let answer = Answer::from_fragments(&fragments);
        debug!(queries = answer.queries.len(), charts = answer.charts.len(), "datachat answer complete");
        Ok(answer)
    }
}

/// Pull reply fragments out of one streamed message.
pub fn fragments_of(message: &Value) -> Vec<ReplyFragment> {
    let Some(sys) = message.get("systemMessage") else {
        return Vec::new();
    };
    let mut out = Vec::new();

    if let Some(parts) = sys.pointer("/text/parts").and_then(Value::as_array) {
        let text: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
        if !text.is_empty() {
            out.push(ReplyFragment::Text(text.join("")));
        }
    }
    if let Some(sql) = sys.pointer("/data/generatedSql").and_then(Value::as_str) {
        out.push(ReplyFragment::Query(sql.to_string()));
    }
    if let Some(vega) = sys.pointer("/chart/result/vegaConfig") {
        out.push(ReplyFragment::Chart(vega.clone()));
    }
    out
}

/// Splits a JSON array arriving in arbitrary chunks into its top-level
/// elements. Only tracks nesting, strings and escapes; element text is
/// parsed later.
#[derive(Debug, Default)]
pub struct JsonArraySplitter {
    buf: String,
    depth: usize,
    in_string: bool,
    escaped: bool,
    started: bool,
}

impl JsonArraySplitter {
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut done = Vec::new();
        for c in chunk.chars() {
            if !self.started {
                if c == '[' {
                    self.started = true;
                }
                continue;
            }
            if self.depth == 0 {
                // Between elements: skip separators, start on an opener.
                match c {
                    '{' | '[' => {
                        self.depth = 1;
                        self.buf.push(c);
                    }
                    _ => {}
                }
                continue;
            }

            self.buf.push(c);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.in_string = false;
                }
                continue;
            }
            match c {
                '"' => self.in_string = true,
                '{' | '[' => self.depth += 1,
                '}' | ']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        done.push(std::mem::take(&mut self.buf));
                    }
                }
                _ => {}
            }
        }
        done
    }
}
