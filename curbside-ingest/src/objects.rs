//! Incident image retrieval from object storage.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use curbside_core::CurbsideError;

use crate::warehouse::{transport_error, USER_AGENT};

pub const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";

/// `gs://bucket/path/to/object`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUri {
    pub bucket: String,
    pub object: String,
}

impl ObjectUri {
    pub fn parse(uri: &str) -> Result<Self, CurbsideError> {
        let rest = uri
            .trim()
            .strip_prefix("gs://")
            .ok_or_else(|| CurbsideError::InvalidInput(format!("'{uri}' must start with gs://")))?;
        let (bucket, object) = rest
            .split_once('/')
            .filter(|(b, o)| !b.is_empty() && !o.is_empty())
            .ok_or_else(|| CurbsideError::InvalidInput(format!("'{uri}' must include a bucket and an object")))?;
        if !bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
        {
            return Err(CurbsideError::InvalidInput(format!("invalid bucket name '{bucket}'")));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    pub fn file_name(&self) -> &str {
        self.object.rsplit('/').next().unwrap_or(&self.object)
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Guess from the extension when the store does not say.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn fetch(&self, uri: &ObjectUri) -> Result<Option<ImageBlob>, CurbsideError>;
}

/// Cloud Storage JSON API, media download.
pub struct GcsObjectStore {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    timeout_secs: u64,
}

impl GcsObjectStore {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>, timeout_secs: u64) -> Result<Self, CurbsideError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CurbsideError::upstream("build storage client", e))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            access_token,
            timeout_secs,
        })
    }

    /// Object names may contain `/`; each goes out percent-encoded.
    pub fn media_url(&self, uri: &ObjectUri) -> Result<Url, CurbsideError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| CurbsideError::InvalidInput(format!("storage base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CurbsideError::InvalidInput("storage base url cannot have a path".into()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", uri.bucket.as_str(), "o", uri.object.as_str()]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn fetch(&self, uri: &ObjectUri) -> Result<Option<ImageBlob>, CurbsideError> {
        let url = self.media_url(uri)?;
        let mut req = self.http.get(url);
        if let Some(token) = &self.access_token {
            let v = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| CurbsideError::InvalidInput("access token is not a valid header value".into()))?;
            req = req.header(AUTHORIZATION, v);
        }
        info!(%uri, "downloading object");

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error("object download", self.timeout_secs, e))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            warn!(%uri, "object not found");
            return Ok(None);
        }
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(CurbsideError::UpstreamUnavailable(format!("storage error: {status} {txt}")));
        }

        let mime_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_name(uri.file_name()).to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| transport_error("object download", self.timeout_secs, e))?
            .to_vec();
        info!(%uri, size = bytes.len(), "downloaded object");
        Ok(Some(ImageBlob { bytes, mime_type }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_nested_object() {
        let u = ObjectUri::parse("gs://my-bucket-bus-stop-images/images/PA-02.jpg").unwrap();
        assert_eq!(u.bucket, "my-bucket-bus-stop-images");
        assert_eq!(u.object, "images/PA-02.jpg");
        assert_eq!(u.file_name(), "PA-02.jpg");
        assert_eq!(u.to_string(), "gs://my-bucket-bus-stop-images/images/PA-02.jpg");
    }

    #[test]
    fn rejects_malformed_uris() {
        for bad in ["https://x/y.jpg", "gs://", "gs://bucket", "gs://bucket/", "gs:///obj", "gs://Bad Bucket/x"] {
            let err = ObjectUri::parse(bad).unwrap_err();
            assert!(matches!(err, CurbsideError::InvalidInput(_)), "{bad}");
        }
    }

    #[test]
    fn media_url_encodes_object_path() {
        let store = GcsObjectStore::new(DEFAULT_BASE_URL, None, 5).unwrap();
        let u = ObjectUri::parse("gs://b/images/PA 02.jpg").unwrap();
        assert_eq!(
            store.media_url(&u).unwrap().as_str(),
            "https://storage.googleapis.com/storage/v1/b/b/o/images%2FPA%2002.jpg?alt=media"
        );
    }

    #[test]
    fn mime_guess() {
        assert_eq!(mime_from_name("a.PNG"), "image/png");
        assert_eq!(mime_from_name("a.jpg"), "image/jpeg");
        assert_eq!(mime_from_name("noext"), "image/jpeg");
    }
}
