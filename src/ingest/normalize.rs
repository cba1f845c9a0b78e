// src/ingest/normalize.rs
//! Raw entry → canonical [`IntelItem`]: summary cleanup, identifier and
//! fingerprint derivation, publish-time resolution and severity tagging.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::feed::RawEntry;
use crate::model::{IntelItem, Severity, SourceDescriptor};

/// Summary length cap in characters (marker excluded).
pub const SUMMARY_MAX_CHARS: usize = 500;
pub const TRUNCATION_MARKER: &str = "...";

// field separator for hashed tuples, so ("ab","c") and ("a","bc") differ
const SEP: u8 = 0x1f;

static RE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break regex"));
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\f\v]+").expect("whitespace regex"));
static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\n\s*").expect("blank line regex"));
static RE_CVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").expect("cve regex"));

static SEVERITY_KEYWORDS: Lazy<Vec<(Severity, Regex)>> = Lazy::new(|| {
    [
        (Severity::Critical, "critical"),
        (Severity::High, "high"),
        (Severity::Medium, "medium"),
        (Severity::Low, "low"),
    ]
    .into_iter()
    .map(|(sev, word)| {
        let re = Regex::new(&format!(r"(?i)\b{word}\b")).expect("severity regex");
        (sev, re)
    })
    .collect()
});

/// Strip markup: `<br>` → newline, drop tags, decode HTML entities,
/// collapse runs of whitespace.
pub fn strip_markup(s: &str) -> String {
    let out = RE_BREAK.replace_all(s, "\n");
    let out = RE_TAGS.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out).replace('\u{a0}', " ");
    let out = RE_WS.replace_all(&out, " ");
    let out = RE_BLANK_LINES.replace_all(&out, "\n");
    out.trim().to_string()
}

/// Cap at [`SUMMARY_MAX_CHARS`] characters, appending [`TRUNCATION_MARKER`]
/// when anything was cut.
pub fn truncate_summary(s: &str) -> String {
    if s.chars().count() <= SUMMARY_MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(SUMMARY_MAX_CHARS).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Description first, then full content, then the title.
pub fn select_summary(entry: &RawEntry, title: &str) -> String {
    [entry.description.as_deref(), entry.content.as_deref()]
        .into_iter()
        .flatten()
        .map(strip_markup)
        .find(|s| !s.is_empty())
        .map(|s| truncate_summary(&s))
        .unwrap_or_else(|| title.to_string())
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([SEP]);
        }
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Dedup key over (title, url, raw summary). Case- and whitespace-sensitive.
pub fn fingerprint(title: &str, url: &str, raw_summary: &str) -> String {
    sha256_hex(&[title.as_bytes(), url.as_bytes(), raw_summary.as_bytes()])
}

/// Record identifier, `<source>-<hash>`.
///
/// Stable across runs when the entry carries a native id. Without one the
/// hash covers the fetch time (and the entry position, so siblings from the
/// same payload stay distinct), which means the same logical entry gets a
/// new identifier on every fetch; the fingerprint still dedupes it.
pub fn derive_id(
    source_id: &str,
    native_id: Option<&str>,
    fetched_at: DateTime<Utc>,
    position: usize,
) -> String {
    let digest = match native_id {
        Some(native) => sha256_hex(&[source_id.as_bytes(), native.as_bytes()]),
        None => {
            let ts = fetched_at
                .timestamp_nanos_opt()
                .unwrap_or_else(|| fetched_at.timestamp_micros())
                .to_string();
            let pos = position.to_string();
            sha256_hex(&[source_id.as_bytes(), ts.as_bytes(), pos.as_bytes()])
        }
    };
    format!("{}-{}", source_id, &digest[..32])
}

/// RFC 2822 (RSS) or RFC 3339 (Atom); `None` when neither parses.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let odt = OffsetDateTime::parse(raw, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(raw, &Rfc3339))
        .ok()?;
    DateTime::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
}

/// Entry's own date, then its updated date, then the fetch time.
pub fn resolve_published(entry: &RawEntry, fetched_at: DateTime<Utc>) -> DateTime<Utc> {
    entry
        .published
        .as_deref()
        .and_then(parse_feed_date)
        .or_else(|| entry.updated.as_deref().and_then(parse_feed_date))
        .unwrap_or(fetched_at)
}

/// Severity only for text referencing a vulnerability identifier (CVE-YYYY-N+).
/// Keywords are checked most severe first; `MEDIUM` when none matches.
pub fn detect_severity(title: &str, summary: &str) -> Option<Severity> {
    if !RE_CVE.is_match(title) && !RE_CVE.is_match(summary) {
        return None;
    }
    let text = format!("{title} {summary}");
    let sev = SEVERITY_KEYWORDS
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(sev, _)| *sev)
        .unwrap_or(Severity::Medium);
    Some(sev)
}

/// Map raw entries of one source into canonical records. Entries with
/// neither title nor link are dropped.
pub fn normalize_entries(
    source: &SourceDescriptor,
    entries: Vec<RawEntry>,
    fetched_at: DateTime<Utc>,
) -> Vec<IntelItem> {
    let category = source.primary_category();
    let mut out = Vec::with_capacity(entries.len());

    for (position, entry) in entries.into_iter().enumerate() {
        let title = entry.title.clone().unwrap_or_default();
        let url = entry.link.clone().unwrap_or_default();
        if title.is_empty() && url.is_empty() {
            continue;
        }

        let raw_summary = entry.description.as_deref().unwrap_or_default();
        let summary = select_summary(&entry, &title);
        let severity = detect_severity(&title, &summary);

        out.push(IntelItem {
            id: derive_id(&source.id, entry.native_id.as_deref(), fetched_at, position),
            source_id: source.id.clone(),
            category,
            fingerprint: fingerprint(&title, &url, raw_summary),
            published: resolve_published(&entry, fetched_at),
            retrieved: fetched_at,
            title,
            url,
            summary,
            severity,
        });
    }

    out
}
