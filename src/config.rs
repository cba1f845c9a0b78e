// src/config.rs
//! Application configuration: store location, worker pool size, timings,
//! logging and the source list. Loaded from TOML or JSON.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::ConfigError;
use crate::model::SourceDescriptor;
use crate::store::StoreBackend;

pub const ENV_PATH: &str = "INFOPULSE_CONFIG";
const DEFAULT_TOML: &str = "config/infopulse.toml";
const DEFAULT_JSON: &str = "config/infopulse.json";

const DEFAULT_FETCH_TIMEOUT_SECS: i64 = 30;
const DEFAULT_MAX_CONCURRENT_FETCHES: i64 = 5;
const DEFAULT_REFRESH_INTERVAL_SECS: i64 = 300;
const DEFAULT_RETENTION_DAYS: i64 = 30;

pub const MAX_RETENTION_DAYS: i64 = 100 * 365;
pub const MAX_REFRESH_INTERVAL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub store_backend: StoreBackend,
    pub fetch_timeout_secs: i64,
    pub max_concurrent_fetches: i64,
    pub refresh_interval_secs: i64,
    pub retention_days: i64,
    pub log_file: Option<PathBuf>,
    pub log_json: bool,
    pub bind_addr: String,
    pub sources: Vec<SourceDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/intelligence.db"),
            store_backend: StoreBackend::default(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            log_file: None,
            log_json: false,
            bind_addr: "127.0.0.1:8080".to_string(),
            sources: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load and validate from an explicit path. Format by extension; an
    /// unknown extension tries TOML, then JSON.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse(&content, &ext).map_err(|reason| ConfigError::Format {
            path: path.to_path_buf(),
            reason,
        })?;
        cfg.normalize();
        cfg.validate()?;
        tracing::info!(
            path = %path.display(),
            sources = cfg.sources.len(),
            "configuration loaded"
        );
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $INFOPULSE_CONFIG
    /// 2) config/infopulse.toml
    /// 3) config/infopulse.json
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(ConfigError::MissingEnvPath(pb));
            }
            return Self::load_from(&pb);
        }
        for candidate in [DEFAULT_TOML, DEFAULT_JSON] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Err(ConfigError::NotFound)
    }

    /// Non-positive numeric settings fall back to their defaults.
    pub fn normalize(&mut self) {
        fn positive_or(v: &mut i64, default: i64) {
            if *v <= 0 {
                *v = default;
            }
        }
        positive_or(&mut self.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
        positive_or(&mut self.max_concurrent_fetches, DEFAULT_MAX_CONCURRENT_FETCHES);
        positive_or(&mut self.refresh_interval_secs, DEFAULT_REFRESH_INTERVAL_SECS);
        positive_or(&mut self.retention_days, DEFAULT_RETENTION_DAYS);
        for source in &mut self.sources {
            source.id = source.id.trim().to_string();
            source.url = source.url.trim().to_string();
            if source.name.trim().is_empty() {
                source.name = source.id.clone();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounded = [
            ("retention_days", self.retention_days, MAX_RETENTION_DAYS),
            (
                "refresh_interval_secs",
                self.refresh_interval_secs,
                MAX_REFRESH_INTERVAL_SECS,
            ),
        ];
        for (key, value, max) in bounded {
            if value > max {
                return Err(ConfigError::OutOfRange { key, value, max });
            }
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            let invalid = |reason: &str| ConfigError::InvalidSource {
                id: source.id.clone(),
                reason: reason.to_string(),
            };
            if source.id.is_empty() {
                return Err(invalid("empty id"));
            }
            if source.url.is_empty() {
                return Err(invalid("empty url"));
            }
            if source.categories.is_empty() {
                return Err(invalid("no categories"));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: usize::try_from(self.max_concurrent_fetches).unwrap_or(1).max(1),
            refresh_interval: secs(self.refresh_interval_secs),
            fetch_timeout: secs(self.fetch_timeout_secs),
            retention: chrono::Duration::try_days(self.retention_days.max(1)),
        }
    }
}

fn secs(v: i64) -> Duration {
    Duration::from_secs(u64::try_from(v).unwrap_or(0))
}

fn parse(s: &str, hint_ext: &str) -> Result<AppConfig, String> {
    match hint_ext {
        "toml" => toml::from_str(s).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(s).map_err(|e| e.to_string()),
        _ => toml::from_str(s).or_else(|toml_err| {
            serde_json::from_str(s)
                .map_err(|json_err| format!("not TOML ({toml_err}) nor JSON ({json_err})"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use std::env;

    const SAMPLE_TOML: &str = r#"
database_path = "/tmp/intel.db"
store_backend = "memory"
max_concurrent_fetches = 3
fetch_timeout_secs = -4

[[sources]]
id = "nvd"
name = "NVD"
url = "https://nvd.test/feed.xml"
categories = ["CYBERSEC"]

[[sources]]
id = "hf"
url = "https://hf.test/rss"
categories = ["AITOOLS", "OPENSOURCE"]
enabled = false
"#;

    #[test]
    fn toml_parses_with_defaults_and_normalization() {
        let mut cfg = parse(SAMPLE_TOML, "toml").unwrap();
        cfg.normalize();
        cfg.validate().unwrap();

        assert_eq!(cfg.store_backend, StoreBackend::Memory);
        assert_eq!(cfg.max_concurrent_fetches, 3);
        assert_eq!(cfg.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
        assert_eq!(cfg.refresh_interval_secs, DEFAULT_REFRESH_INTERVAL_SECS);
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.sources[0].fetch_method, "rss");
        assert_eq!(cfg.sources[1].name, "hf");
        assert!(!cfg.sources[1].enabled);
        assert_eq!(cfg.sources[1].primary_category(), Category::AiTools);

        let engine = cfg.engine_config();
        assert_eq!(engine.workers, 3);
        assert_eq!(engine.fetch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn json_is_accepted_without_extension_hint() {
        let json = r#"{"sources":[{"id":"a","name":"A","url":"https://a.test","categories":["INFOSEC_NEWS"]}]}"#;
        let cfg = parse(json, "").unwrap();
        assert_eq!(cfg.sources[0].categories, vec![Category::InfosecNews]);
        assert_eq!(cfg.database_path, PathBuf::from("./data/intelligence.db"));
    }

    #[test]
    fn validation_rejects_bad_sources() {
        let mut cfg = AppConfig::default();
        cfg.sources = vec![
            SourceDescriptor::rss("a", "https://a.test", &[Category::Cybersec]),
            SourceDescriptor::rss("a", "https://b.test", &[Category::Cybersec]),
        ];
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateSource(id)) if id == "a"));

        cfg.sources = vec![SourceDescriptor::rss("a", "", &[Category::Cybersec])];
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidSource { .. })));

        cfg.sources = vec![SourceDescriptor::rss("a", "https://a.test", &[])];
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidSource { .. })));
    }

    #[test]
    fn oversized_timings_are_rejected() {
        let cfg = AppConfig {
            retention_days: 200_000_000_000_000,
            ..AppConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { key: "retention_days", .. })
        ));
        // never panics, even when validation was skipped
        assert_eq!(cfg.engine_config().retention, None);

        let cfg = AppConfig {
            retention_days: MAX_RETENTION_DAYS,
            ..AppConfig::default()
        };
        cfg.validate().unwrap();
        assert_eq!(
            cfg.engine_config().retention,
            Some(chrono::Duration::days(MAX_RETENTION_DAYS))
        );

        let cfg = AppConfig {
            refresh_interval_secs: i64::MAX,
            ..AppConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { key: "refresh_interval_secs", .. })
        ));
    }

    #[test]
    fn out_of_range_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("huge.toml");
        fs::write(&p, "retention_days = 100000000").unwrap();
        assert!(matches!(
            AppConfig::load_from(&p),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn unreadable_content_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("broken.toml");
        fs::write(&p, "sources = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&p),
            Err(ConfigError::Format { .. })
        ));
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        // isolate cwd so a real config/ directory does not interfere
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_PATH);

        assert!(matches!(AppConfig::load_default(), Err(ConfigError::NotFound)));

        fs::create_dir_all("config").unwrap();
        fs::write(DEFAULT_JSON, r#"{"bind_addr":"0.0.0.0:9000"}"#).unwrap();
        assert_eq!(AppConfig::load_default().unwrap().bind_addr, "0.0.0.0:9000");

        // toml wins over json
        fs::write(DEFAULT_TOML, r#"bind_addr = "0.0.0.0:9100""#).unwrap();
        assert_eq!(AppConfig::load_default().unwrap().bind_addr, "0.0.0.0:9100");

        // env has priority
        let explicit = tmp.path().join("custom.toml");
        fs::write(&explicit, r#"bind_addr = "0.0.0.0:9200""#).unwrap();
        env::set_var(ENV_PATH, explicit.display().to_string());
        assert_eq!(AppConfig::load_default().unwrap().bind_addr, "0.0.0.0:9200");

        env::set_var(ENV_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(matches!(
            AppConfig::load_default(),
            Err(ConfigError::MissingEnvPath(_))
        ));

        env::remove_var(ENV_PATH);
        env::set_current_dir(&old).unwrap();
    }
}
