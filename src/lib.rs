// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod model;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::engine::{CycleReport, EngineConfig, IngestEngine, RefreshOutcome};
pub use crate::model::{Category, IntelItem, Severity, SourceDescriptor};
pub use crate::store::{open_store, MemoryStore, RecordStore, SqliteStore, StoreBackend};
