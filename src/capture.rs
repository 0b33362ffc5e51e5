use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::fields::MultiDict;

/// One intercepted request as handed over by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    /// Seconds since the unix epoch at which the host saw the request start.
    pub timestamp_start: f64,
    pub host: String,
    pub port: u16,
    pub method: String,
    pub scheme: String,
    #[serde(default)]
    pub authority: String,
    pub path: String,
    pub http_version: String,
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: Vec<u8>,
    #[serde(default)]
    pub headers: MultiDict,
    #[serde(default)]
    pub cookies: MultiDict,
    #[serde(default)]
    pub trailers: Option<MultiDict>,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("timestamp_start {0} is not a representable point in time")]
    InvalidTimestamp(f64),
    #[error("decode captured request: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredContent {
    Bytes(Vec<u8>),
    Text(String),
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let content = Option::<StoredContent>::deserialize(deserializer)?;
    Ok(match content {
        Some(StoredContent::Bytes(bytes)) => bytes,
        Some(StoredContent::Text(text)) => text.into_bytes(),
        None => Vec::new(),
    })
}

impl CapturedRequest {
    /// Parses one JSON document describing a captured request.
    pub fn from_json(line: &str) -> Result<Self, CaptureError> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn start_time(&self) -> Result<DateTime<Utc>, CaptureError> {
        let timestamp = self.timestamp_start;
        if !timestamp.is_finite() {
            return Err(CaptureError::InvalidTimestamp(timestamp));
        }

        let secs = timestamp.floor();
        let nanos = ((timestamp - secs) * 1_000_000_000.0).round();
        // Rounding can carry a full second.
        let (secs, nanos) = if nanos >= 1_000_000_000.0 {
            (secs + 1.0, 0.0)
        } else {
            (secs, nanos)
        };
        if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
            return Err(CaptureError::InvalidTimestamp(timestamp));
        }

        DateTime::from_timestamp(secs as i64, nanos as u32)
            .ok_or(CaptureError::InvalidTimestamp(timestamp))
    }

    /// The body as text when it is valid UTF-8 without NUL characters. Text
    /// columns cannot hold NUL, so such bodies are kept as raw bytes only.
    pub fn text_content(&self) -> Option<&str> {
        std::str::from_utf8(&self.content)
            .ok()
            .filter(|text| !text.contains('\0'))
    }
}
