// tests/common/mod.rs
// Shared fixtures and instrumented fetchers for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use infopulse::engine::{EngineConfig, IngestEngine};
use infopulse::error::IngestError;
use infopulse::ingest::{parse_and_normalize, Fetcher, FixtureFetcher};
use infopulse::model::{Category, IntelItem, SourceDescriptor};
use infopulse::store::{MemoryStore, RecordStore};

pub const VULNS_RSS: &str = include_str!("../fixtures/vulns_rss.xml");
pub const AI_ATOM: &str = include_str!("../fixtures/ai_atom.xml");

/// `vulns` (CYBERSEC, two entries, one critical CVE) and `ai` (AITOOLS, one entry).
pub fn scenario_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor::rss("vulns", "https://vulns.test/feed.xml", &[Category::Cybersec]),
        SourceDescriptor::rss("ai", "https://ai.test/atom.xml", &[Category::AiTools]),
    ]
}

pub fn scenario_fetcher() -> FixtureFetcher {
    FixtureFetcher::new()
        .with_payload("vulns", VULNS_RSS)
        .with_payload("ai", AI_ATOM)
}

/// Fixture dates are years old; keep them out of the retention window.
pub fn no_retention() -> EngineConfig {
    EngineConfig {
        retention: None,
        ..EngineConfig::default()
    }
}

pub fn engine_with(
    sources: Vec<SourceDescriptor>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn RecordStore>,
    cfg: EngineConfig,
) -> Arc<IngestEngine> {
    Arc::new(IngestEngine::new(sources, fetcher, store, cfg))
}

pub fn scenario_engine() -> Arc<IngestEngine> {
    engine_with(
        scenario_sources(),
        Arc::new(scenario_fetcher()),
        Arc::new(MemoryStore::new()),
        no_retention(),
    )
}

pub fn numbered_sources(n: usize) -> Vec<SourceDescriptor> {
    (0..n)
        .map(|i| {
            SourceDescriptor::rss(
                &format!("s{i}"),
                &format!("https://s{i}.test/feed"),
                &[Category::OpenSource],
            )
        })
        .collect()
}

/// Sleeps `delay` per fetch and tracks how many fetches overlap.
#[derive(Default)]
pub struct SlowFetcher {
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl SlowFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<IntelItem>, IngestError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let xml = format!(
            "<rss><channel><item><title>Post from {id}</title>\
             <link>{url}/post</link><guid>{id}-post</guid>\
             <pubDate>Mon, 01 Apr 2024 12:00:00 +0000</pubDate></item></channel></rss>",
            id = source.id,
            url = source.url,
        );
        Ok(parse_and_normalize(source, &xml, Utc::now())?)
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}
