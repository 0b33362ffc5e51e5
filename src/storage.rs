use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{fields::FieldMap, run::RunId};

/// Generated primary key of a row in `requests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The satellite tables keyed by request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldGroup {
    Headers,
    Trailers,
    Cookies,
}

impl FieldGroup {
    pub fn table(self) -> &'static str {
        match self {
            Self::Headers => "headers",
            Self::Trailers => "trailers",
            Self::Cookies => "cookies",
        }
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Column values for one row in `requests`, minus the text body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRow<'a> {
    pub run: RunId,
    pub start_time: DateTime<Utc>,
    pub host: &'a str,
    pub port: u16,
    pub method: &'a str,
    pub scheme: &'a str,
    pub authority: &'a str,
    pub path: &'a str,
    pub http_version: &'a str,
    pub content_raw: &'a [u8],
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("postgres: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encode field values: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
}

#[async_trait]
pub trait RequestStore: Send + Sized {
    /// Connection parameters handed to [`RequestStore::connect`].
    type Config: Send + Sync;

    async fn connect(config: &Self::Config) -> Result<Self, StoreError>;

    /// Inserts the request row and returns its generated id.
    async fn insert_request(&mut self, row: &RequestRow<'_>) -> Result<RequestId, StoreError>;

    /// Sets the decoded text body of an existing request row.
    async fn update_request_content(
        &mut self,
        request: RequestId,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Writes one row per name in `fields`; returns the number of rows written.
    /// Callers never pass an empty map.
    async fn insert_fields(
        &mut self,
        group: FieldGroup,
        request: RequestId,
        fields: &FieldMap,
    ) -> Result<u64, StoreError>;

    /// Stamps the current time as the run's end time; returns the rows updated.
    async fn finish_run(&mut self, run: RunId) -> Result<u64, StoreError>;

    async fn close(self) -> Result<(), StoreError>;
}
