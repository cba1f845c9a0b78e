// src/ingest/fetcher.rs
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::USER_AGENT;
use reqwest::Client;

use crate::error::{FetchError, IngestError};
use crate::ingest::parse_and_normalize;
use crate::model::{IntelItem, SourceDescriptor};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const UA: &str = "Infopulse-Node/1.0";

/// Fetch method capability. One implementation per transport; the engine
/// only ever sees this trait.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve and normalize one enabled source. Exactly one network
    /// attempt; no retries.
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<IntelItem>, IngestError>;
    fn name(&self) -> &'static str;
}

fn ensure_rss(source: &SourceDescriptor) -> Result<(), FetchError> {
    if source.fetch_method.eq_ignore_ascii_case("rss") {
        Ok(())
    } else {
        Err(FetchError::UnsupportedMethod(source.fetch_method.clone()))
    }
}

/// HTTP GET + RSS/Atom parse.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<IntelItem>, IngestError> {
        ensure_rss(source)?;
        tracing::debug!(source = %source.id, url = %source.url, "fetching feed");

        let resp = self
            .client
            .get(&source.url)
            .header(USER_AGENT, UA)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::Transport(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: source.url.clone(),
            }
            .into());
        }

        let body = resp.text().await.map_err(FetchError::Transport)?;
        let items = parse_and_normalize(source, &body, Utc::now())?;
        tracing::debug!(source = %source.id, items = items.len(), "parsed feed");
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Serves canned payloads keyed by source id. Runs the real parse and
/// normalize path, so it stands in for the network in tests and offline runs.
#[derive(Clone, Default)]
pub struct FixtureFetcher {
    payloads: HashMap<String, String>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, source_id: &str, payload: &str) -> Self {
        self.payloads
            .insert(source_id.to_string(), payload.to_string());
        self
    }
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<IntelItem>, IngestError> {
        ensure_rss(source)?;
        let payload = self
            .payloads
            .get(&source.id)
            .ok_or_else(|| FetchError::MissingFixture(source.id.clone()))?;
        Ok(parse_and_normalize(source, payload, Utc::now())?)
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
