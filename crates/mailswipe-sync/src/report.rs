//! Per-cycle summaries, report files and Parquet snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use mailswipe_core::{EnrichedRecord, SyncStats};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::stages::{FetchFailure, PersistReport};

pub const CYCLE_BRIEF_FILE: &str = "cycle_brief.md";
pub const RECORDS_DELTA_FILE: &str = "records_delta.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordPreview {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub category: String,
    pub subcategory: String,
    pub funnel_stage: String,
    pub url_count: usize,
    pub degraded: bool,
}

impl From<&EnrichedRecord> for RecordPreview {
    fn from(record: &EnrichedRecord) -> Self {
        Self {
            id: record.raw.id.clone(),
            sender: record.raw.sender.clone(),
            subject: record.raw.subject.clone(),
            category: record.categorization.category.clone(),
            subcategory: record.categorization.subcategory.clone(),
            funnel_stage: record.categorization.funnel_stage.clone(),
            url_count: record.extracted_urls.len(),
            degraded: record.is_degraded(),
        }
    }
}

/// Stage counters gathered while a cycle runs.
#[derive(Debug, Clone, Default)]
pub struct CycleCounters {
    pub discovered: usize,
    pub new_items: usize,
    pub fetch_failures: Vec<FetchFailure>,
    pub persist: Option<PersistReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub cycle_no: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub discovered: usize,
    pub new_items: usize,
    pub fetch_failures: Vec<FetchFailure>,
    pub analyzed: usize,
    pub degraded: usize,
    pub local: SyncStats,
    pub remote: Option<SyncStats>,
    pub by_category: BTreeMap<String, usize>,
    pub distinct_senders: usize,
    pub preview: Vec<RecordPreview>,
}

impl CycleReport {
    /// Summarizes one cycle's output. Read-only over `records`.
    pub fn summarize(
        cycle_no: u64,
        started_at: DateTime<Utc>,
        counters: CycleCounters,
        records: &[EnrichedRecord],
        preview_count: usize,
    ) -> Self {
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        for record in records {
            *by_category.entry(record.categorization.category.clone()).or_default() += 1;
        }
        let distinct_senders = records
            .iter()
            .map(|r| r.raw.sender.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let persist = counters.persist.unwrap_or(PersistReport {
            local: SyncStats::new(0),
            remote: None,
        });

        Self {
            run_id: Uuid::new_v4(),
            cycle_no,
            started_at,
            finished_at: Utc::now(),
            discovered: counters.discovered,
            new_items: counters.new_items,
            fetch_failures: counters.fetch_failures,
            analyzed: records.len(),
            degraded: records.iter().filter(|r| r.is_degraded()).count(),
            local: persist.local,
            remote: persist.remote,
            by_category,
            distinct_senders,
            preview: records.iter().take(preview_count).map(RecordPreview::from).collect(),
        }
    }

    pub fn log_summary(&self) {
        info!(
            cycle = self.cycle_no,
            discovered = self.discovered,
            new = self.new_items,
            fetch_failures = self.fetch_failures.len(),
            analyzed = self.analyzed,
            degraded = self.degraded,
            local_saved = self.local.succeeded,
            remote_saved = self.remote.map(|s| s.succeeded),
            remote_failed = self.remote.map(|s| s.failed),
            senders = self.distinct_senders,
            "cycle summary"
        );
        for (category, count) in &self.by_category {
            info!(cycle = self.cycle_no, category = %category, count, "records by category");
        }
        for (idx, preview) in self.preview.iter().enumerate() {
            info!(
                cycle = self.cycle_no,
                rank = idx + 1,
                sender = %preview.sender,
                subject = %preview.subject,
                category = %preview.category,
                "preview"
            );
        }
    }

    pub fn render_markdown(&self) -> String {
        let remote = match self.remote {
            Some(stats) => format!("{}/{} (failed {})", stats.succeeded, stats.total, stats.failed),
            None => "disabled".to_string(),
        };
        let categories = if self.by_category.is_empty() {
            "- none".to_string()
        } else {
            self.by_category
                .iter()
                .map(|(k, v)| format!("- {}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let preview = self
            .preview
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "{}. **{}** from {} [{} / {} / {}] urls={}{}",
                    i + 1,
                    p.subject,
                    p.sender,
                    p.category,
                    p.subcategory,
                    p.funnel_stage,
                    p.url_count,
                    if p.degraded { " (degraded)" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "# Mailswipe Cycle Brief\n\n- Run ID: `{}`\n- Cycle: {}\n- Started: {}\n- Finished: {}\n- Discovered: {}\n- New: {}\n- Fetch failures: {}\n- Analyzed: {} (degraded {})\n- Local saved: {}/{}\n- Remote saved: {}\n- Distinct senders: {}\n\n## Categories\n{}\n\n## Preview\n{}\n",
            self.run_id,
            self.cycle_no,
            self.started_at,
            self.finished_at,
            self.discovered,
            self.new_items,
            self.fetch_failures.len(),
            self.analyzed,
            self.degraded,
            self.local.succeeded,
            self.local.total,
            remote,
            self.distinct_senders,
            categories,
            preview,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes the brief, the JSON delta and the Parquet snapshot under `<reports_root>/<run_id>/`.
pub async fn write_cycle_reports(
    reports_root: &Path,
    report: &CycleReport,
    records: &[EnrichedRecord],
) -> Result<PathBuf> {
    let run_dir = reports_root.join(report.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    fs::write(run_dir.join(CYCLE_BRIEF_FILE), report.render_markdown())
        .await
        .context("writing cycle_brief.md")?;

    let delta = serde_json::to_vec_pretty(&serde_json::json!({
        "cycle": report,
        "records": records,
    }))
    .context("serializing records delta")?;
    fs::write(run_dir.join(RECORDS_DELTA_FILE), delta)
        .await
        .context("writing records_delta.json")?;

    export_parquet_snapshot(&run_dir, records).await?;
    Ok(run_dir)
}

async fn export_parquet_snapshot(run_dir: &Path, records: &[EnrichedRecord]) -> Result<PathBuf> {
    let snapshot_dir = run_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let records_path = snapshot_dir.join("records.parquet");
    write_records_parquet(&records_path, records)?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        files: vec![manifest_entry("records", run_dir, &records_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_records_parquet(path: &Path, records: &[EnrichedRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("email_id", DataType::Utf8, false),
        ArrowField::new("thread_id", DataType::Utf8, false),
        ArrowField::new("sender", DataType::Utf8, false),
        ArrowField::new("subject", DataType::Utf8, false),
        ArrowField::new("sent_at", DataType::Utf8, true),
        ArrowField::new("time_of_day", DataType::Utf8, false),
        ArrowField::new("category", DataType::Utf8, false),
        ArrowField::new("subcategory", DataType::Utf8, false),
        ArrowField::new("price_signal", DataType::Utf8, false),
        ArrowField::new("funnel_stage", DataType::Utf8, false),
        ArrowField::new("url_count", DataType::UInt32, false),
        ArrowField::new("degraded", DataType::Boolean, false),
        ArrowField::new("error_detail", DataType::Utf8, true),
    ]));

    let sent_at = StringArray::from(
        records
            .iter()
            .map(|r| r.raw.sent_at().map(|dt| dt.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let time_of_day = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.raw.time_of_day()))
            .collect::<Vec<_>>(),
    );
    let url_counts = UInt32Array::from(
        records
            .iter()
            .map(|r| r.extracted_urls.len() as u32)
            .collect::<Vec<_>>(),
    );
    let degraded = BooleanArray::from(records.iter().map(|r| r.is_degraded()).collect::<Vec<_>>());
    let error_detail = StringArray::from(
        records
            .iter()
            .map(|r| r.error_detail.as_deref())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(text_column(records, |r| r.raw.id.as_str())),
            Arc::new(text_column(records, |r| r.raw.thread_id.as_str())),
            Arc::new(text_column(records, |r| r.raw.sender.as_str())),
            Arc::new(text_column(records, |r| r.raw.subject.as_str())),
            Arc::new(sent_at),
            Arc::new(time_of_day),
            Arc::new(text_column(records, |r| r.categorization.category.as_str())),
            Arc::new(text_column(records, |r| r.categorization.subcategory.as_str())),
            Arc::new(text_column(records, |r| r.categorization.price_signal.as_str())),
            Arc::new(text_column(records, |r| r.categorization.funnel_stage.as_str())),
            Arc::new(url_counts),
            Arc::new(degraded),
            Arc::new(error_detail),
        ],
    )
    .context("building records record batch")?;
    write_parquet(path, batch)
}

fn text_column(records: &[EnrichedRecord], value: impl Fn(&EnrichedRecord) -> &str) -> StringArray {
    StringArray::from(records.iter().map(|r| Some(value(r))).collect::<Vec<_>>())
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path.strip_prefix(run_dir).unwrap_or(path).display().to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// Markdown index of the most recent `runs` report directories, newest first.
pub fn report_recent_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();
    let dirs = dirs.into_iter().take(runs.max(1)).collect::<Vec<_>>();

    let mut lines = vec!["# Mailswipe Recent Cycles".to_string(), String::new()];
    for dir in dirs {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let delta_path = dir.path().join(RECORDS_DELTA_FILE);
        let brief_path = dir.path().join(CYCLE_BRIEF_FILE);
        let manifest_path = dir.path().join("snapshots").join("manifest.json");

        let delta: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&delta_path)
                .with_context(|| format!("reading {}", delta_path.display()))?,
        )
        .with_context(|| format!("parsing {}", delta_path.display()))?;
        let count = delta
            .get("records")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let cycle = delta.get("cycle");
        let finished = cycle
            .and_then(|c| c.get("finished_at"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let degraded = cycle
            .and_then(|c| c.get("degraded"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- finished: {finished}"));
        lines.push(format!("- records: {count} (degraded {degraded})"));
        lines.push(format!("- delta: `{}`", delta_path.display()));
        if brief_path.exists() {
            lines.push(format!("- brief: `{}`", brief_path.display()));
        }
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}
