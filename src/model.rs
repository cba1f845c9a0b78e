// src/model.rs
//! Core data types: topic categories, severity tags, source descriptors and
//! the canonical intelligence record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic category a source (and therefore its records) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "CYBERSEC")]
    Cybersec,
    #[serde(rename = "AITOOLS")]
    AiTools,
    #[serde(rename = "OPENSOURCE")]
    OpenSource,
    #[serde(rename = "INFOSEC_NEWS")]
    InfosecNews,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Cybersec,
        Category::AiTools,
        Category::OpenSource,
        Category::InfosecNews,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cybersec => "CYBERSEC",
            Category::AiTools => "AITOOLS",
            Category::OpenSource => "OPENSOURCE",
            Category::InfosecNews => "INFOSEC_NEWS",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Case-insensitive; accepts `-` in place of `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace('-', "_");
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == norm)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Coarse severity for security-relevant items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Severity::Critical),
            "HIGH" => Ok(Severity::High),
            "MEDIUM" => Ok(Severity::Medium),
            "LOW" => Ok(Severity::Low),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

fn default_fetch_method() -> String {
    "rss".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_update_freq() -> u32 {
    60
}

/// Static configuration for one external feed. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    /// Display name; the id when omitted.
    #[serde(default)]
    pub name: String,
    /// Fetch endpoint.
    pub url: String,
    pub categories: Vec<Category>,
    /// Only `"rss"` is implemented.
    #[serde(default = "default_fetch_method")]
    pub fetch_method: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Suggested update interval in minutes (informational).
    #[serde(default = "default_update_freq")]
    pub update_freq_mins: u32,
}

impl SourceDescriptor {
    /// Minimal enabled RSS descriptor; handy in tests and fixtures.
    pub fn rss(id: &str, url: &str, categories: &[Category]) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            url: url.to_string(),
            categories: categories.to_vec(),
            fetch_method: default_fetch_method(),
            enabled: true,
            update_freq_mins: default_update_freq(),
        }
    }

    /// First declared category; `INFOSEC_NEWS` when none is declared.
    pub fn primary_category(&self) -> Category {
        self.categories
            .first()
            .copied()
            .unwrap_or(Category::InfosecNews)
    }
}

/// Canonical normalized record ("intelligence item").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelItem {
    pub id: String,
    pub source_id: String,
    pub category: Category,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published: DateTime<Utc>,
    pub retrieved: DateTime<Utc>,
    /// Content fingerprint; the dedup key.
    pub fingerprint: String,
    pub severity: Option<Severity>,
}
