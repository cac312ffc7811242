//! Ingestion pipeline orchestration: stages, reporting and the polling monitor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mailswipe_adapters::{
    AccountSelector, Categorizer, FileAccountSelector, GmailConnector, OpenAiCategorizer,
    SourceConnector, SourceError, StaticAccountSelector,
};
use mailswipe_storage::{
    HttpClient, HttpClientConfig, LocalStore, PgReplica, RemoteReplica, SqliteStore, StoreError,
};
use mailswipe_core::{EnrichedRecord, SyncStats};
use thiserror::Error;
use tracing::{info, warn};

pub mod config;
pub mod monitor;
pub mod report;
pub mod stages;

pub use config::MonitorConfig;
pub use monitor::{Monitor, MonitorExit, MonitorState};
pub use report::{report_recent_markdown, write_cycle_reports, CycleCounters, CycleReport, RecordPreview};
pub use stages::{fetch_details, filter, persist, Analyzer, FetchBatch, FetchFailure, PersistReport};

pub const CRATE_NAME: &str = "mailswipe-sync";

/// Conditions that abandon the current cycle but leave the monitor running.
#[derive(Debug, Error)]
pub enum CycleAbort {
    #[error("mailbox source failed: {0}")]
    Source(#[from] SourceError),
    #[error("loading known ids: {0}")]
    KnownIds(#[source] StoreError),
}

/// Failures that stop the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("no active mailbox account is configured")]
    NoActiveAccount,
    #[error("resolving active account: {0}")]
    Accounts(String),
    #[error("connecting to mailbox: {0}")]
    Connect(#[source] SourceError),
    #[error("compiling url pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("cycle aborted: {0}")]
    Cycle(#[from] CycleAbort),
}

/// Everything the monitor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountSelector>,
    pub connector: Arc<dyn SourceConnector>,
    pub categorizer: Arc<dyn Categorizer>,
    pub local: Arc<dyn LocalStore>,
    pub remote: Option<Arc<dyn RemoteReplica>>,
}

pub fn http_client(config: &MonitorConfig) -> Result<HttpClient> {
    HttpClient::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })
}

/// Remote replica for `config`, or `None` when remote sync is off or has no URL.
pub fn remote_replica(config: &MonitorConfig) -> Result<Option<PgReplica>> {
    if !config.remote_enabled {
        info!("remote sync disabled");
        return Ok(None);
    }
    match config.remote_url() {
        Some(url) => Ok(Some(PgReplica::new(url).context("parsing REMOTE_DATABASE_URL")?)),
        None => {
            warn!("remote sync enabled but REMOTE_DATABASE_URL is unset; continuing local-only");
            Ok(None)
        }
    }
}

/// Wires the Gmail, OpenAI, SQLite and Postgres adapters from `config`.
pub async fn production_collaborators(config: &MonitorConfig) -> Result<Collaborators> {
    let http = http_client(config)?;

    let accounts: Arc<dyn AccountSelector> = match &config.gmail_access_token {
        Some(token) => Arc::new(StaticAccountSelector::from_token("environment", token.clone())),
        None => Arc::new(FileAccountSelector::new(config.accounts_file.clone())),
    };

    let categorizer = OpenAiCategorizer::new(
        http.clone(),
        &config.openai_base_url,
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    );
    if !categorizer.is_configured() {
        warn!("OPENAI_API_KEY is unset; every record will be stored as unknown");
    }

    let local = SqliteStore::open(&config.local_db_path)
        .await
        .with_context(|| format!("opening local store {}", config.local_db_path.display()))?;
    let remote = remote_replica(config)?.map(|r| Arc::new(r) as Arc<dyn RemoteReplica>);

    Ok(Collaborators {
        accounts,
        connector: Arc::new(GmailConnector::new(http, config.gmail_api_base.clone())),
        categorizer: Arc::new(categorizer),
        local: Arc::new(local),
        remote,
    })
}

pub async fn monitor_from_config(config: MonitorConfig) -> Result<Monitor> {
    let collaborators = production_collaborators(&config).await?;
    Ok(Monitor::new(config, collaborators))
}

/// Pushes every locally committed record to the replica. Repairs rows the
/// replica missed while it was unreachable; upserts make re-sending harmless.
pub async fn backfill_remote(
    local: &SqliteStore,
    remote: &dyn RemoteReplica,
    batch_size: usize,
) -> Result<SyncStats> {
    if !remote.test_connection().await {
        bail!("remote replica unreachable; nothing was sent");
    }
    let records: Vec<EnrichedRecord> = local
        .all_records()
        .await
        .context("reading local records")?
        .into_iter()
        .map(|row| row.record)
        .collect();
    info!(total = records.len(), batch_size, "backfilling remote replica");

    let stats = remote.sync_batch(&records, batch_size).await;
    info!(succeeded = stats.succeeded, failed = stats.failed, "remote backfill finished");
    Ok(stats)
}
