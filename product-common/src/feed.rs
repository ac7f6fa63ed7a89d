//! The source feed: the authoritative list of products, fetched once per Ingest run.

use std::time;

use async_trait::async_trait;
use reqwest::header;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::product::{CandidateRecord, ProductError};

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("failed to build feed client: {0}")]
    ClientError(reqwest::Error),
    #[error("feed request failed with: {0}")]
    RequestError(reqwest::Error),
    #[error("feed responded with status {0}")]
    StatusError(reqwest::StatusCode),
    #[error("feed payload is not a JSON array")]
    NotAnArray,
    #[error("feed entry {index} is malformed: {error}")]
    MalformedEntry { index: usize, error: ProductError },
    #[error("feed unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SourceFeed: Send + Sync {
    /// Fetch every candidate currently published by the feed, in feed order.
    async fn fetch_all(&self) -> Result<Vec<CandidateRecord>, FeedError>;
}

/// Parse a feed payload: a JSON array of objects that each carry a `productId`.
/// One bad element rejects the whole payload.
pub fn parse_payload(payload: Value) -> Result<Vec<CandidateRecord>, FeedError> {
    let Value::Array(entries) = payload else {
        return Err(FeedError::NotAnArray);
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            CandidateRecord::from_value(entry)
                .map_err(|error| FeedError::MalformedEntry { index, error })
        })
        .collect()
}

/// Fetches the feed over HTTP with a single GET.
pub struct HttpSourceFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpSourceFeed {
    pub fn new(url: &str, timeout: time::Duration) -> Result<Self, FeedError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .user_agent("Product Ingest")
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(FeedError::ClientError)?;

        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }
}

#[async_trait]
impl SourceFeed for HttpSourceFeed {
    async fn fetch_all(&self) -> Result<Vec<CandidateRecord>, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(FeedError::RequestError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::StatusError(status));
        }

        let payload: Value = response.json().await.map_err(FeedError::RequestError)?;
        let candidates = parse_payload(payload)?;
        debug!(url = %self.url, count = candidates.len(), "fetched source feed");

        Ok(candidates)
    }
}

/// A feed returning a fixed payload, or failing every time.
pub struct StaticSourceFeed {
    payload: Result<Value, String>,
}

impl StaticSourceFeed {
    pub fn new(payload: Value) -> Self {
        Self {
            payload: Ok(payload),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            payload: Err(reason.to_owned()),
        }
    }
}

#[async_trait]
impl SourceFeed for StaticSourceFeed {
    async fn fetch_all(&self) -> Result<Vec<CandidateRecord>, FeedError> {
        match &self.payload {
            Ok(payload) => parse_payload(payload.clone()),
            Err(reason) => Err(FeedError::Unavailable(reason.clone())),
        }
    }
}
