// src/error.rs
//! Error taxonomy. Source-level errors (`FetchError`, `ParseError`) never
//! leave a cycle; `ConfigError` and store initialization errors are fatal at
//! startup.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("INFOPULSE_CONFIG points to non-existent path {0}")]
    MissingEnvPath(PathBuf),

    #[error("no config file found (tried $INFOPULSE_CONFIG, config/infopulse.toml, config/infopulse.json)")]
    NotFound,

    #[error("invalid source `{id}`: {reason}")]
    InvalidSource { id: String, reason: String },

    #[error("duplicate source id `{0}`")]
    DuplicateSource(String),

    #[error("`{key}` = {value} is out of range (max {max})")]
    OutOfRange {
        key: &'static str,
        value: i64,
        max: i64,
    },
}

/// Transport-level failure for one source. Retried by a later cycle only.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} when fetching {url}")]
    Status { status: u16, url: String },

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("unsupported fetch method `{0}`")]
    UnsupportedMethod(String),

    #[error("no fixture payload for source `{0}`")]
    MissingFixture(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed feed xml: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("payload is neither an RSS channel nor an Atom feed")]
    NotAFeed,
}

/// Per-source failure as seen by the aggregator.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("invalid record `{id}`: {reason}")]
    InvalidRecord { id: String, reason: &'static str },

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyRunning,
}
