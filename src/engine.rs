// src/engine.rs
//! # Ingestion Engine
//! Owns the configured sources, runs the periodic scheduler and drives each
//! cycle: a fixed pool of fetch workers feeds one aggregator, which writes a
//! single batch to the store. Query methods delegate to the store and work
//! regardless of run state.
//!
//! Lifecycle: `Stopped -> Running -> Stopped`. `stop()` lets the in-flight
//! cycle finish (no half-applied batches) and returns after drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{EngineError, FetchError, IngestError, StoreError};
use crate::ingest::{Fetcher, HttpFetcher};
use crate::model::{Category, IntelItem, SourceDescriptor};
use crate::store::{open_store, RecordStore};
use crate::telemetry;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size: the cap on simultaneous fetches.
    pub workers: usize,
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    /// `None` disables eviction.
    pub retention: Option<chrono::Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            fetch_timeout: crate::ingest::fetcher::DEFAULT_FETCH_TIMEOUT,
            retention: Some(chrono::Duration::days(DEFAULT_RETENTION_DAYS)),
        }
    }
}

impl EngineConfig {
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.workers == 0 {
            self.workers = defaults.workers;
        }
        if self.refresh_interval.is_zero() {
            self.refresh_interval = defaults.refresh_interval;
        }
        if self.fetch_timeout.is_zero() {
            self.fetch_timeout = defaults.fetch_timeout;
        }
        self
    }
}

/// Summary of one full cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Enabled sources dispatched to workers.
    pub sources: usize,
    pub failed: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub evicted: usize,
    /// Set when the batch write failed; its records were not ingested.
    pub store_error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RefreshOutcome {
    Completed(CycleReport),
    /// A cycle was already in flight; the caller waited for it instead of
    /// starting another.
    Coalesced,
}

/// One worker's result for one source.
struct SourceReport {
    source_id: String,
    outcome: Result<Vec<IntelItem>, IngestError>,
}

/// What the aggregator hands back once every source reported.
#[derive(Default)]
struct Aggregate {
    reported: usize,
    failed: usize,
    fetched: usize,
    inserted: usize,
    store_error: Option<String>,
}

struct Shared {
    sources: Arc<[SourceDescriptor]>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn RecordStore>,
    cfg: EngineConfig,
    /// Held for the whole duration of a cycle; at most one at a time.
    cycle_gate: Mutex<()>,
}

struct Running {
    cancel: CancellationToken,
    scheduler: JoinHandle<()>,
}

pub struct IngestEngine {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
    active: AtomicBool,
}

impl IngestEngine {
    pub fn new(
        sources: Vec<SourceDescriptor>,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn RecordStore>,
        cfg: EngineConfig,
    ) -> Self {
        telemetry::describe_metrics();
        Self {
            shared: Arc::new(Shared {
                sources: sources.into(),
                fetcher,
                store,
                cfg: cfg.sanitized(),
                cycle_gate: Mutex::new(()),
            }),
            running: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Production wiring: HTTP fetcher plus the configured store backend.
    /// Store initialization failure is fatal to the caller.
    pub fn from_app_config(cfg: &AppConfig) -> Result<Self, StoreError> {
        let store = open_store(cfg.store_backend, Some(&cfg.database_path))?;
        let engine_cfg = cfg.engine_config();
        let fetcher = HttpFetcher::new().with_timeout(engine_cfg.fetch_timeout);
        Ok(Self::new(
            cfg.sources.clone(),
            Arc::new(fetcher),
            store,
            engine_cfg,
        ))
    }

    /// Start the scheduler: one cycle right away, then one per period.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!(target: "ingest", "start requested but engine is already running");
            return Err(EngineError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let scheduler = tokio::spawn(run_scheduler(Arc::clone(&self.shared), cancel.clone()));
        *running = Some(Running { cancel, scheduler });
        self.active.store(true, Ordering::SeqCst);

        info!(
            target: "ingest",
            sources = self.shared.sources.len(),
            workers = self.shared.cfg.workers,
            interval_secs = self.shared.cfg.refresh_interval.as_secs(),
            "ingestion engine started"
        );
        Ok(())
    }

    /// Halt the timer, let any in-flight cycle (scheduled or manual) finish,
    /// then return. No-op when already stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running { cancel, scheduler }) = running.take() else {
            return;
        };

        cancel.cancel();
        if let Err(e) = scheduler.await {
            error!(target: "ingest", error = %e, "scheduler task ended abnormally");
        }
        // manual refreshes run outside the scheduler task
        drop(self.shared.cycle_gate.lock().await);

        self.active.store(false, Ordering::SeqCst);
        info!(target: "ingest", "ingestion engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Out-of-band cycle; does not reset the periodic timer. Works whether or
    /// not the engine is running. The cycle runs on its own task, so dropping
    /// this future never aborts a write half way.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let outcome = match shared.cycle_gate.try_lock() {
                Ok(_guard) => RefreshOutcome::Completed(shared.run_cycle().await),
                Err(_) => {
                    info!(target: "ingest", "refresh requested during a running cycle, coalescing");
                    drop(shared.cycle_gate.lock().await);
                    RefreshOutcome::Coalesced
                }
            };
            outcome
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(target: "ingest", error = %e, "manual refresh task failed");
                RefreshOutcome::Completed(CycleReport {
                    store_error: Some(e.to_string()),
                    ..CycleReport::default()
                })
            }
        }
    }

    // --- query surface: failures are logged and degrade to "no results" ---
    // Store calls may block on a lock held by a batch write, so they run on
    // the blocking pool rather than a runtime worker.

    /// Newest first. `limit <= 0` returns everything.
    pub async fn latest(&self, category: Option<Category>, limit: i64) -> Vec<IntelItem> {
        let limit = usize::try_from(limit).unwrap_or(0);
        self.query("latest", move |store| store.get_latest(category, limit))
            .await
    }

    pub async fn by_id(&self, id: &str) -> Option<IntelItem> {
        let id = id.to_string();
        self.query("by_id", move |store| store.get_by_id(&id)).await
    }

    pub async fn total_count(&self) -> usize {
        self.query("count", |store| store.count(None)).await
    }

    pub async fn category_count(&self, category: Category) -> usize {
        self.query("count", move |store| store.count(Some(category)))
            .await
    }

    async fn query<T, F>(&self, name: &'static str, f: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.shared.store);
        match tokio::task::spawn_blocking(move || f(&*store)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                error!(target: "store", error = %e, query = name, "query failed");
                T::default()
            }
            Err(e) => {
                error!(target: "store", error = %e, query = name, "query task failed");
                T::default()
            }
        }
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.shared.sources
    }
}

impl Drop for IngestEngine {
    fn drop(&mut self) {
        // can't await here; the scheduler exits after its current cycle
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

async fn run_scheduler(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.cfg.refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // first tick fires immediately: the start-up cycle
            _ = ticker.tick() => {
                match shared.cycle_gate.try_lock() {
                    Ok(_guard) => {
                        shared.run_cycle().await;
                    }
                    Err(_) => {
                        debug!(target: "ingest", "scheduled tick skipped, a cycle is already running");
                    }
                }
            }
        }
    }
    debug!(target: "ingest", "scheduler loop exited");
}

impl Shared {
    /// One full cycle. Caller must hold `cycle_gate`.
    async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let enabled: Vec<SourceDescriptor> =
            self.sources.iter().filter(|s| s.enabled).cloned().collect();
        let dispatched = enabled.len();
        info!(target: "ingest", sources = dispatched, "starting ingestion cycle");
        counter!("ingest_cycles_total").increment(1);

        // every job is queued up front; workers pull until the queue drains
        let (job_tx, job_rx) = mpsc::channel::<SourceDescriptor>(dispatched.max(1));
        for source in enabled {
            if job_tx.send(source).await.is_err() {
                break;
            }
        }
        drop(job_tx);
        let jobs = Arc::new(Mutex::new(job_rx));

        let workers = self.cfg.workers.min(dispatched).max(1);
        let (result_tx, result_rx) = mpsc::channel::<SourceReport>(workers);
        let aggregator = tokio::spawn(aggregate(
            result_rx,
            dispatched,
            Arc::clone(&self.store),
        ));

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            pool.spawn(fetch_worker(
                worker,
                Arc::clone(&jobs),
                result_tx.clone(),
                Arc::clone(&self.fetcher),
                self.cfg.fetch_timeout,
            ));
        }
        drop(result_tx);
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(target: "ingest", error = %e, "fetch worker crashed");
            }
        }

        let agg = aggregator.await.unwrap_or_else(|e| {
            error!(target: "ingest", error = %e, "aggregator crashed");
            Aggregate {
                store_error: Some(e.to_string()),
                ..Aggregate::default()
            }
        });
        if agg.reported != dispatched {
            warn!(
                target: "ingest",
                expected = dispatched,
                reported = agg.reported,
                "not every dispatched source reported"
            );
        }

        let evicted = self.apply_retention().await;

        let report = CycleReport {
            sources: dispatched,
            failed: agg.failed + dispatched.saturating_sub(agg.reported),
            fetched: agg.fetched,
            inserted: agg.inserted,
            evicted,
            store_error: agg.store_error,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        gauge!("ingest_last_cycle_ts").set(chrono::Utc::now().timestamp() as f64);
        info!(
            target: "ingest",
            sources = report.sources,
            failed = report.failed,
            fetched = report.fetched,
            inserted = report.inserted,
            evicted = report.evicted,
            elapsed_ms = report.elapsed_ms,
            "ingestion cycle finished"
        );
        report
    }

    async fn apply_retention(&self) -> usize {
        let Some(max_age) = self.cfg.retention else {
            return 0;
        };
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.evict_older_than(max_age)).await {
            Ok(Ok(n)) => {
                counter!("ingest_items_evicted_total").increment(n as u64);
                n
            }
            Ok(Err(e)) => {
                error!(target: "store", error = %e, "retention eviction failed");
                0
            }
            Err(e) => {
                error!(target: "store", error = %e, "retention task failed");
                0
            }
        }
    }
}

async fn fetch_worker(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<SourceDescriptor>>>,
    results: mpsc::Sender<SourceReport>,
    fetcher: Arc<dyn Fetcher>,
    timeout: Duration,
) {
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(source) = next else {
            break;
        };

        let t0 = Instant::now();
        let outcome = match tokio::time::timeout(timeout, fetcher.fetch(&source)).await {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout(timeout).into()),
        };
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        debug!(target: "ingest", worker, source = %source.id, ok = outcome.is_ok(), "source fetched");

        let report = SourceReport {
            source_id: source.id,
            outcome,
        };
        if results.send(report).await.is_err() {
            break;
        }
    }
}

/// Consume exactly one report per dispatched source, then write the
/// accumulated records as one batch.
async fn aggregate(
    mut results: mpsc::Receiver<SourceReport>,
    expected: usize,
    store: Arc<dyn RecordStore>,
) -> Aggregate {
    let mut agg = Aggregate::default();
    let mut records = Vec::new();

    while agg.reported < expected {
        let Some(report) = results.recv().await else {
            break;
        };
        agg.reported += 1;
        match report.outcome {
            Ok(items) => {
                info!(target: "ingest", source = %report.source_id, items = items.len(), "processed feed");
                counter!("ingest_items_fetched_total").increment(items.len() as u64);
                records.extend(items);
            }
            Err(e) => {
                agg.failed += 1;
                counter!("ingest_source_errors_total").increment(1);
                warn!(target: "ingest", source = %report.source_id, error = %e, "source failed, skipping");
            }
        }
    }

    agg.fetched = records.len();
    if records.is_empty() {
        return agg;
    }

    match tokio::task::spawn_blocking(move || store.insert_batch(&records)).await {
        Ok(Ok(n)) => {
            agg.inserted = n;
            counter!("ingest_items_inserted_total").increment(n as u64);
        }
        Ok(Err(e)) => {
            error!(target: "store", error = %e, records = agg.fetched, "batch write failed, records not ingested");
            agg.store_error = Some(e.to_string());
        }
        Err(e) => {
            error!(target: "store", error = %e, "batch write task failed");
            agg.store_error = Some(e.to_string());
        }
    }
    agg
}
