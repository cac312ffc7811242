#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mailswipe_adapters::{
    CategorizationRequest, CategorizeError, Categorizer, MessageSource, SourceConnector,
    SourceError, StaticAccountSelector,
};
use mailswipe_core::{Categorization, EnrichedRecord, ItemRef, RawRecord, Session, SyncStats};
use mailswipe_storage::{LocalStore, RemoteReplica, StoreError};
use mailswipe_sync::{Collaborators, MonitorConfig};
use tokio::time::Instant;

pub fn raw(id: &str) -> RawRecord {
    RawRecord {
        id: id.to_string(),
        thread_id: format!("thread-{id}"),
        subject: format!("Offer {id}"),
        sender: format!("Brand {id} <news@{id}.shop.test>"),
        recipient: "swipe@example.com".to_string(),
        timestamp: "Wed, 17 Dec 2025 10:30:00 +0100".to_string(),
        body: format!("Save 20% today: https://{id}.shop.test/sale and https://{id}.shop.test/unsub"),
        snippet: format!("Save 20% on {id}"),
        labels: ["INBOX".to_string()].into_iter().collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Item,
    Unauthorized,
}

/// Scriptable mailbox: discovery returns every item in insertion order.
#[derive(Default)]
pub struct FakeMailbox {
    items: Mutex<Vec<RawRecord>>,
    failures: Mutex<HashMap<String, FailureKind>>,
    list_outages: AtomicUsize,
    list_delay: Mutex<Duration>,
    pub list_calls: Mutex<Vec<Instant>>,
    pub detail_calls: Mutex<Vec<String>>,
}

impl FakeMailbox {
    pub fn with_items(ids: &[&str]) -> Arc<Self> {
        let mailbox = Self::default();
        *mailbox.items.lock().unwrap() = ids.iter().map(|id| raw(id)).collect();
        Arc::new(mailbox)
    }

    pub fn fail_detail(&self, id: &str, kind: FailureKind) {
        self.failures.lock().unwrap().insert(id.to_string(), kind);
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.list_outages.store(count, Ordering::SeqCst);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }

    pub fn detail_ids(&self) -> Vec<String> {
        self.detail_calls.lock().unwrap().clone()
    }
}

pub struct MailboxHandle(pub Arc<FakeMailbox>);

#[async_trait]
impl MessageSource for MailboxHandle {
    async fn list(&self, max_results: Option<usize>, _query: &str) -> Result<Vec<ItemRef>, SourceError> {
        self.0.list_calls.lock().unwrap().push(Instant::now());
        let delay = *self.0.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outages = self.0.list_outages.load(Ordering::SeqCst);
        if outages > 0 {
            self.0.list_outages.store(outages - 1, Ordering::SeqCst);
            return Err(SourceError::Unavailable("connection refused".into()));
        }
        let items = self.0.items.lock().unwrap();
        let limit = max_results.unwrap_or(usize::MAX);
        Ok(items
            .iter()
            .take(limit)
            .map(|r| ItemRef::new(r.id.clone(), r.thread_id.clone()))
            .collect())
    }

    async fn get_detail(&self, id: &str) -> Result<RawRecord, SourceError> {
        self.0.detail_calls.lock().unwrap().push(id.to_string());
        match self.0.failures.lock().unwrap().get(id) {
            Some(FailureKind::Item) => {
                return Err(SourceError::Item {
                    id: id.to_string(),
                    message: "HTTP 404".into(),
                })
            }
            Some(FailureKind::Unauthorized) => return Err(SourceError::Unauthorized("HTTP 401".into())),
            None => {}
        }
        self.0
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| SourceError::Item {
                id: id.to_string(),
                message: "not found".into(),
            })
    }
}

pub struct FakeConnector {
    mailbox: Arc<FakeMailbox>,
    refuse: bool,
}

impl FakeConnector {
    pub fn new(mailbox: Arc<FakeMailbox>) -> Self {
        Self { mailbox, refuse: false }
    }

    pub fn refusing(mailbox: Arc<FakeMailbox>) -> Self {
        Self { mailbox, refuse: true }
    }
}

#[async_trait]
impl SourceConnector for FakeConnector {
    async fn connect(&self, _session: &Session) -> Result<Box<dyn MessageSource>, SourceError> {
        if self.refuse {
            return Err(SourceError::Unauthorized("token expired".into()));
        }
        Ok(Box::new(MailboxHandle(Arc::clone(&self.mailbox))))
    }
}

pub struct FakeCategorizer {
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeCategorizer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self { fail: false, calls: AtomicUsize::new(0) })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { fail: true, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl Categorizer for FakeCategorizer {
    async fn categorize(&self, request: &CategorizationRequest) -> Result<Categorization, CategorizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CategorizeError::Malformed("upstream timed out".into()));
        }
        Ok(Categorization {
            notes: format!("teaser for {}", request.subject),
            category: "promotion".into(),
            subcategory: "seasonal".into(),
            price_signal: "20% off".into(),
            target_audience: "existing subscribers".into(),
            product_mentioned: "shoes".into(),
            retention_signal: String::new(),
            funnel_stage: "conversion".into(),
        })
    }
}

#[derive(Default)]
pub struct MemoryLocal {
    pub rows: Mutex<BTreeMap<String, EnrichedRecord>>,
    pub upserts: AtomicUsize,
}

impl MemoryLocal {
    pub fn seeded(ids: &[&str]) -> Arc<Self> {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().unwrap();
            for id in ids {
                rows.insert(id.to_string(), EnrichedRecord::analyzed(raw(id), Categorization::default(), Default::default()));
            }
        }
        Arc::new(store)
    }

    pub fn ids(&self) -> Vec<String> {
        self.rows.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl LocalStore for MemoryLocal {
    async fn all_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.rows.lock().unwrap().keys().cloned().collect())
    }

    async fn upsert(&self, record: &EnrichedRecord) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().insert(record.id().to_string(), record.clone());
        Ok(())
    }
}

pub struct FakeRemote {
    reachable: bool,
    pub received: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn reachable() -> Arc<Self> {
        Arc::new(Self { reachable: true, received: Mutex::new(Vec::new()) })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self { reachable: false, received: Mutex::new(Vec::new()) })
    }

    pub fn received_ids(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteReplica for FakeRemote {
    async fn sync_batch(&self, records: &[EnrichedRecord], _batch_size: usize) -> SyncStats {
        if !self.reachable {
            return SyncStats::all_failed(records.len());
        }
        let mut stats = SyncStats::new(records.len());
        let mut received = self.received.lock().unwrap();
        for record in records {
            received.push(record.id().to_string());
            stats.record(true);
        }
        stats
    }

    async fn test_connection(&self) -> bool {
        self.reachable
    }
}

pub fn collaborators(
    mailbox: &Arc<FakeMailbox>,
    categorizer: Arc<dyn Categorizer>,
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteReplica>>,
) -> Collaborators {
    Collaborators {
        accounts: Arc::new(StaticAccountSelector::from_token("test", "token")),
        connector: Arc::new(FakeConnector::new(Arc::clone(mailbox))),
        categorizer,
        local,
        remote,
    }
}

pub fn config_minutes(minutes: u64) -> MonitorConfig {
    MonitorConfig::default().with_interval_minutes(minutes)
}
