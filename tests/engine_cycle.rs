// tests/engine_cycle.rs
//
// End-to-end cycles over fixture feeds: counts per category, severity
// tagging, dedup across cycles, ordering, per-source failure isolation and
// retention.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use infopulse::engine::{CycleReport, EngineConfig, RefreshOutcome};
use infopulse::ingest::FixtureFetcher;
use infopulse::model::{Category, Severity, SourceDescriptor};
use infopulse::store::{MemoryStore, SqliteStore};

use common::*;

fn completed(outcome: RefreshOutcome) -> CycleReport {
    match outcome {
        RefreshOutcome::Completed(report) => report,
        RefreshOutcome::Coalesced => panic!("expected a completed cycle"),
    }
}

#[tokio::test]
async fn two_sources_populate_counts_and_severity() {
    let engine = scenario_engine();
    let report = completed(engine.refresh_now().await);

    assert_eq!(report.sources, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.inserted, 3);
    assert!(report.store_error.is_none());

    assert_eq!(engine.total_count().await, 3);
    assert_eq!(engine.category_count(Category::Cybersec).await, 2);
    assert_eq!(engine.category_count(Category::AiTools).await, 1);
    assert_eq!(engine.category_count(Category::OpenSource).await, 0);

    let cyber = engine.latest(Some(Category::Cybersec), 0).await;
    let cve = cyber
        .iter()
        .find(|i| i.title.contains("CVE-2024-3094"))
        .expect("cve record present");
    assert_eq!(cve.severity, Some(Severity::Critical));
    assert_eq!(cve.source_id, "vulns");
    assert!(cve.id.starts_with("vulns-"));
    assert_eq!(cve.summary, "Malicious code in liblzma allows remote compromise.");

    let roundup = cyber.iter().find(|i| i.title == "Patch Tuesday roundup").unwrap();
    assert_eq!(roundup.severity, None);

    let by_id = engine.by_id(&cve.id).await.expect("lookup by id");
    assert_eq!(&by_id, cve);
}

#[tokio::test]
async fn second_cycle_over_same_payload_inserts_nothing() {
    let engine = scenario_engine();
    let first = completed(engine.refresh_now().await);
    let second = completed(engine.refresh_now().await);

    assert_eq!(first.inserted, 3);
    assert_eq!(second.fetched, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(engine.total_count().await, 3);
}

#[tokio::test]
async fn latest_is_publish_descending_and_filtered() {
    let engine = scenario_engine();
    engine.refresh_now().await;

    let all = engine.latest(None, 10).await;
    let titles: Vec<&str> = all.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Patch Tuesday roundup",
            "New open-weights model released",
            "CVE-2024-3094: critical backdoor in xz utils",
        ]
    );
    assert!(all.windows(2).all(|w| w[0].published >= w[1].published));
    assert_eq!(
        all[1].published,
        Utc.with_ymd_and_hms(2024, 4, 2, 8, 30, 0).unwrap()
    );

    let top = engine.latest(None, 1).await;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].title, "Patch Tuesday roundup");

    let ai = engine.latest(Some(Category::AiTools), 10).await;
    assert_eq!(ai.len(), 1);
    assert_eq!(ai[0].url, "https://ai.test/posts/model");
    assert!(ai.iter().all(|i| i.category == Category::AiTools));
}

#[tokio::test]
async fn failing_sources_do_not_block_the_cycle() {
    let mut sources = scenario_sources();
    sources.push(SourceDescriptor::rss(
        "missing",
        "https://missing.test/feed",
        &[Category::InfosecNews],
    ));
    sources.push(SourceDescriptor::rss(
        "broken",
        "https://broken.test/feed",
        &[Category::InfosecNews],
    ));
    let fetcher = scenario_fetcher().with_payload("broken", "<rss><channel><item></channel></rss>");

    let engine = engine_with(
        sources,
        Arc::new(fetcher),
        Arc::new(MemoryStore::new()),
        no_retention(),
    );
    let report = completed(engine.refresh_now().await);

    assert_eq!(report.sources, 4);
    assert_eq!(report.failed, 2);
    assert_eq!(report.inserted, 3);
    assert_eq!(engine.category_count(Category::InfosecNews).await, 0);
}

#[tokio::test]
async fn retention_evicts_old_records_after_the_cycle() {
    let cfg = EngineConfig {
        retention: Some(chrono::Duration::days(30)),
        ..EngineConfig::default()
    };
    let engine = engine_with(
        scenario_sources(),
        Arc::new(scenario_fetcher()),
        Arc::new(MemoryStore::new()),
        cfg,
    );
    let report = completed(engine.refresh_now().await);

    // every fixture entry is from 2024
    assert_eq!(report.inserted, 3);
    assert_eq!(report.evicted, 3);
    assert_eq!(engine.total_count().await, 0);
}

#[tokio::test]
async fn sqlite_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data").join("intelligence.db");

    {
        let store = Arc::new(SqliteStore::open(&db).unwrap());
        let engine = engine_with(scenario_sources(), Arc::new(scenario_fetcher()), store, no_retention());
        let report = completed(engine.refresh_now().await);
        assert_eq!(report.inserted, 3);
    }

    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let engine = engine_with(scenario_sources(), Arc::new(scenario_fetcher()), store, no_retention());
    assert_eq!(engine.total_count().await, 3);

    // fingerprints persisted too
    let report = completed(engine.refresh_now().await);
    assert_eq!(report.inserted, 0);
    assert_eq!(engine.category_count(Category::Cybersec).await, 2);
}

#[tokio::test]
async fn queries_work_while_stopped_and_empty() {
    let engine = engine_with(
        vec![],
        Arc::new(FixtureFetcher::new()),
        Arc::new(MemoryStore::new()),
        no_retention(),
    );
    assert!(!engine.is_running());
    assert!(engine.latest(None, 0).await.is_empty());
    assert_eq!(engine.total_count().await, 0);
    assert!(engine.by_id("anything").await.is_none());
}
