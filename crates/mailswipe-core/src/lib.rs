//! Core record model for the mailswipe ingestion pipeline.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "mailswipe-core";

/// Sentinel stored in every categorical field of a degraded record.
pub const UNKNOWN: &str = "unknown";

/// Lightweight handle for a discovered mailbox item, prior to full retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
}

impl ItemRef {
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// Full message retrieved for one [`ItemRef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub sender: String,
    pub recipient: String,
    /// Raw `Date` header as sent.
    pub timestamp: String,
    pub body: String,
    pub snippet: String,
    pub labels: BTreeSet<String>,
}

impl RawRecord {
    /// Parses `timestamp` as an RFC 2822 date, tolerating a trailing `(Zone)` comment.
    pub fn sent_at(&self) -> Option<DateTime<FixedOffset>> {
        let trimmed = self.timestamp.trim();
        if trimmed.is_empty() {
            return None;
        }
        let without_comment = match trimmed.rfind(" (") {
            Some(idx) if trimmed.ends_with(')') => &trimmed[..idx],
            _ => trimmed,
        };
        DateTime::parse_from_rfc2822(without_comment).ok()
    }

    /// `HH:MM` in the sender's own offset, or empty when the header does not parse.
    pub fn time_of_day(&self) -> String {
        self.sent_at()
            .map(|dt| dt.format("%H:%M").to_string())
            .unwrap_or_default()
    }
}

/// Structured output of the categorization service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Categorization {
    pub notes: String,
    pub category: String,
    pub subcategory: String,
    pub price_signal: String,
    pub target_audience: String,
    pub product_mentioned: String,
    pub retention_signal: String,
    pub funnel_stage: String,
}

impl Categorization {
    pub fn unknown() -> Self {
        Self {
            notes: UNKNOWN.to_string(),
            category: UNKNOWN.to_string(),
            subcategory: UNKNOWN.to_string(),
            price_signal: UNKNOWN.to_string(),
            target_audience: UNKNOWN.to_string(),
            product_mentioned: UNKNOWN.to_string(),
            retention_signal: UNKNOWN.to_string(),
            funnel_stage: UNKNOWN.to_string(),
        }
    }

    pub fn fields(&self) -> [&str; 8] {
        [
            &self.notes,
            &self.category,
            &self.subcategory,
            &self.price_signal,
            &self.target_audience,
            &self.product_mentioned,
            &self.retention_signal,
            &self.funnel_stage,
        ]
    }

    pub fn is_unknown(&self) -> bool {
        self.fields().iter().all(|v| *v == UNKNOWN)
    }
}

/// A [`RawRecord`] after the analysis stage.
///
/// Built only through [`EnrichedRecord::analyzed`] or [`EnrichedRecord::degraded`], so a
/// record carrying `error_detail` always has an all-`unknown` categorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub raw: RawRecord,
    #[serde(flatten)]
    pub categorization: Categorization,
    pub extracted_urls: BTreeSet<String>,
    pub error_detail: Option<String>,
}

impl EnrichedRecord {
    pub fn analyzed(
        raw: RawRecord,
        categorization: Categorization,
        extracted_urls: BTreeSet<String>,
    ) -> Self {
        Self {
            raw,
            categorization,
            extracted_urls,
            error_detail: None,
        }
    }

    pub fn degraded(
        raw: RawRecord,
        extracted_urls: BTreeSet<String>,
        error_detail: impl Into<String>,
    ) -> Self {
        let mut detail = error_detail.into();
        if detail.trim().is_empty() {
            detail = "categorization failed".to_string();
        }
        Self {
            raw,
            categorization: Categorization::unknown(),
            extracted_urls,
            error_detail: Some(detail),
        }
    }

    pub fn id(&self) -> &str {
        &self.raw.id
    }

    pub fn is_degraded(&self) -> bool {
        self.error_detail.is_some()
    }
}

/// Ids already committed to the local store when a polling phase starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownIds(HashSet<String>);

impl KnownIds {
    pub fn new(ids: HashSet<String>) -> Self {
        Self(ids)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for KnownIds {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Per-target persistence counters for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: 0,
        }
    }

    pub fn all_failed(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: total,
        }
    }

    pub fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Authenticated mailbox session handed out by an account selector.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub account_name: String,
    pub email: Option<String>,
    pub access_token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account_name", &self.account_name)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
