//! The per-cycle stages: dedup filter, detail fetch, analysis and persistence.

use std::collections::BTreeSet;

use mailswipe_adapters::{
    CategorizationRequest, Categorizer, MessageSource, BODY_PREVIEW_CHARS,
};
use mailswipe_core::{EnrichedRecord, ItemRef, KnownIds, RawRecord, SyncStats};
use mailswipe_storage::{LocalStore, RemoteReplica};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::CycleAbort;

const URL_PATTERN: &str = r#"https?://[^\s<>"{}|\\^`\[\]]+"#;

/// Drops every candidate already present in `known`, keeping discovery order.
pub fn filter(candidates: Vec<ItemRef>, known: &KnownIds) -> Vec<ItemRef> {
    candidates
        .into_iter()
        .filter(|item| !known.contains(&item.id))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub records: Vec<RawRecord>,
    pub failures: Vec<FetchFailure>,
}

/// Retrieves each ref in order. Item-scoped failures are collected; anything
/// source-scoped abandons the cycle.
pub async fn fetch_details(
    source: &dyn MessageSource,
    refs: &[ItemRef],
) -> Result<FetchBatch, CycleAbort> {
    let mut batch = FetchBatch::default();
    for (idx, item) in refs.iter().enumerate() {
        match source.get_detail(&item.id).await {
            Ok(record) => {
                debug!(id = %item.id, position = idx + 1, total = refs.len(), "fetched detail");
                batch.records.push(record);
            }
            Err(err) if err.is_item_scoped() => {
                warn!(id = %item.id, error = %err, "detail fetch failed; skipping item");
                batch.failures.push(FetchFailure {
                    id: item.id.clone(),
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(CycleAbort::Source(err)),
        }
    }
    Ok(batch)
}

/// Progress callback invoked with a 1-based index after each analyzed record.
pub type ProgressObserver<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

pub struct Analyzer<'a> {
    categorizer: &'a dyn Categorizer,
    url_pattern: Regex,
    max_body_chars: usize,
}

impl<'a> Analyzer<'a> {
    pub fn new(categorizer: &'a dyn Categorizer) -> Result<Self, regex::Error> {
        Ok(Self {
            categorizer,
            url_pattern: Regex::new(URL_PATTERN)?,
            max_body_chars: BODY_PREVIEW_CHARS,
        })
    }

    pub fn extract_urls(&self, body: &str) -> BTreeSet<String> {
        self.url_pattern
            .find_iter(body)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Never fails: a categorization error yields a degraded record.
    pub async fn analyze(&self, record: RawRecord) -> EnrichedRecord {
        let urls = self.extract_urls(&record.body);
        let request = CategorizationRequest::from_record(&record, self.max_body_chars);
        match self.categorizer.categorize(&request).await {
            Ok(categorization) => EnrichedRecord::analyzed(record, categorization, urls),
            Err(err) => {
                warn!(id = %record.id, error = %err, "categorization failed; storing degraded record");
                EnrichedRecord::degraded(record, urls, err.to_string())
            }
        }
    }

    pub async fn analyze_batch(
        &self,
        records: Vec<RawRecord>,
        progress: Option<ProgressObserver<'_>>,
    ) -> Vec<EnrichedRecord> {
        let total = records.len();
        let mut enriched = Vec::with_capacity(total);
        for (idx, record) in records.into_iter().enumerate() {
            enriched.push(self.analyze(record).await);
            if let Some(observer) = progress {
                observer(idx + 1, total);
            }
        }
        enriched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub local: SyncStats,
    pub remote: Option<SyncStats>,
}

/// Writes to the local store, then independently to the replica when one is configured.
pub async fn persist(
    records: &[EnrichedRecord],
    local: &dyn LocalStore,
    remote: Option<&dyn RemoteReplica>,
    batch_size: usize,
) -> PersistReport {
    let saved = local.upsert_batch(records).await;
    let local_stats = SyncStats {
        total: records.len(),
        succeeded: saved,
        failed: records.len().saturating_sub(saved),
    };
    info!(total = local_stats.total, succeeded = local_stats.succeeded, "local store updated");

    let remote_stats = match remote {
        Some(replica) => {
            let stats = replica.sync_batch(records, batch_size).await;
            info!(
                total = stats.total,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "remote replica synced"
            );
            Some(stats)
        }
        None => None,
    };

    PersistReport {
        local: local_stats,
        remote: remote_stats,
    }
}
