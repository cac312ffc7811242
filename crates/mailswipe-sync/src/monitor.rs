//! Polling monitor: initializes once, then runs one cycle per interval until cancelled.

use std::sync::Arc;

use chrono::Utc;
use mailswipe_adapters::MessageSource;
use mailswipe_core::{EnrichedRecord, KnownIds};
use serde::Serialize;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::report::{write_cycle_reports, CycleCounters, CycleReport};
use crate::stages::{self, Analyzer, ProgressObserver};
use crate::{Collaborators, CycleAbort, MonitorConfig, MonitorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Idle,
    Initializing,
    Polling,
    NoNewItems,
    ProcessingCycle,
    Reporting,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorExit {
    pub cycles_started: u64,
    pub final_state: MonitorState,
}

pub struct Monitor {
    config: MonitorConfig,
    collaborators: Collaborators,
    state: MonitorState,
    cycles_started: u64,
}

impl Monitor {
    pub fn new(config: MonitorConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            state: MonitorState::Idle,
            cycles_started: 0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn transition(&mut self, next: MonitorState) {
        debug!(from = ?self.state, to = ?next, "monitor state");
        self.state = next;
    }

    async fn initialize(&mut self) -> Result<Box<dyn MessageSource>, MonitorError> {
        self.transition(MonitorState::Initializing);
        let session = self
            .collaborators
            .accounts
            .active_session()
            .await
            .map_err(|err| MonitorError::Accounts(format!("{err:#}")))?
            .ok_or(MonitorError::NoActiveAccount)?;
        info!(account = %session.account_name, "active account resolved");

        self.collaborators
            .connector
            .connect(&session)
            .await
            .map_err(MonitorError::Connect)
    }

    /// Runs cycles until `cancel` fires. Only an initialization failure returns an error.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<MonitorExit, MonitorError> {
        let categorizer = Arc::clone(&self.collaborators.categorizer);
        let analyzer = match Analyzer::new(categorizer.as_ref()) {
            Ok(analyzer) => analyzer,
            Err(err) => {
                self.transition(MonitorState::Stopped);
                return Err(err.into());
            }
        };
        let source = match self.initialize().await {
            Ok(source) => source,
            Err(err) => {
                self.transition(MonitorState::Stopped);
                return Err(err);
            }
        };
        info!(
            interval_secs = self.config.interval.as_secs(),
            remote = self.collaborators.remote.is_some(),
            "monitor started"
        );

        while !cancel.is_cancelled() {
            let cycle_start = Instant::now();
            self.cycles_started += 1;
            let cycle_no = self.cycles_started;

            if let Err(abort) = self.run_cycle(cycle_no, source.as_ref(), &analyzer).await {
                warn!(cycle = cycle_no, error = %abort, "cycle aborted");
            }

            self.transition(MonitorState::Sleeping);
            let deadline = cycle_start + self.config.interval;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep_until(deadline) => {}
            }
            self.transition(MonitorState::Idle);
        }

        self.transition(MonitorState::Stopped);
        info!(cycles = self.cycles_started, "monitor stopped");
        Ok(MonitorExit {
            cycles_started: self.cycles_started,
            final_state: self.state,
        })
    }

    /// Initializes and runs exactly one cycle.
    pub async fn run_once(&mut self) -> Result<CycleReport, MonitorError> {
        let categorizer = Arc::clone(&self.collaborators.categorizer);
        let analyzer = Analyzer::new(categorizer.as_ref())?;
        let result = match self.initialize().await {
            Ok(source) => {
                self.cycles_started += 1;
                let cycle_no = self.cycles_started;
                self.run_cycle(cycle_no, source.as_ref(), &analyzer)
                    .await
                    .map_err(MonitorError::from)
            }
            Err(err) => Err(err),
        };
        self.transition(MonitorState::Stopped);
        result
    }

    async fn run_cycle(
        &mut self,
        cycle_no: u64,
        source: &dyn MessageSource,
        analyzer: &Analyzer<'_>,
    ) -> Result<CycleReport, CycleAbort> {
        let span = info_span!("cycle", cycle = cycle_no);
        async {
            let started_at = Utc::now();
            self.transition(MonitorState::Polling);

            let known = KnownIds::new(
                self.collaborators
                    .local
                    .all_ids()
                    .await
                    .map_err(CycleAbort::KnownIds)?,
            );
            let discovered = source
                .list(Some(self.config.max_results), &self.config.gmail_query)
                .await?;
            let discovered_count = discovered.len();
            let fresh = stages::filter(discovered, &known);
            info!(discovered = discovered_count, known = known.len(), new = fresh.len(), "polled mailbox");

            let mut counters = CycleCounters {
                discovered: discovered_count,
                new_items: fresh.len(),
                ..CycleCounters::default()
            };

            let records: Vec<EnrichedRecord> = if fresh.is_empty() {
                self.transition(MonitorState::NoNewItems);
                Vec::new()
            } else {
                self.transition(MonitorState::ProcessingCycle);
                let batch = stages::fetch_details(source, &fresh).await?;
                counters.fetch_failures = batch.failures;

                let log_progress = |idx: usize, total: usize| debug!(idx, total, "analyzed record");
                let progress: ProgressObserver<'_> = &log_progress;
                let enriched = analyzer.analyze_batch(batch.records, Some(progress)).await;

                counters.persist = Some(
                    stages::persist(
                        &enriched,
                        self.collaborators.local.as_ref(),
                        self.collaborators.remote.as_deref(),
                        self.config.remote_batch_size,
                    )
                    .await,
                );
                enriched
            };

            self.transition(MonitorState::Reporting);
            let report = CycleReport::summarize(
                cycle_no,
                started_at,
                counters,
                &records,
                self.config.preview_count,
            );
            report.log_summary();

            if let Some(reports_root) = &self.config.reports_dir {
                if !records.is_empty() {
                    match write_cycle_reports(reports_root, &report, &records).await {
                        Ok(dir) => info!(dir = %dir.display(), "cycle reports written"),
                        Err(err) => warn!(error = %format!("{err:#}"), "writing cycle reports failed"),
                    }
                }
            }
            Ok::<CycleReport, CycleAbort>(report)
        }
        .instrument(span)
        .await
    }
}
