//! Local SQLite store: the system of record for dedup.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailswipe_core::{Categorization, EnrichedRecord, RawRecord};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row};
use tracing::warn;

use crate::StoreError;

/// Local persistence target.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Every `id` currently committed.
    async fn all_ids(&self) -> Result<HashSet<String>, StoreError>;

    /// Insert or update one record keyed by its id.
    async fn upsert(&self, record: &EnrichedRecord) -> Result<(), StoreError>;

    /// Upserts each record independently and returns how many succeeded.
    async fn upsert_batch(&self, records: &[EnrichedRecord]) -> usize {
        let mut saved = 0usize;
        for record in records {
            match self.upsert(record).await {
                Ok(()) => saved += 1,
                Err(err) => warn!(id = record.id(), error = %err, "local upsert failed"),
            }
        }
        saved
    }
}

/// A committed row, with the store's own bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: EnrichedRecord,
    pub sent_at: Option<String>,
    pub time_of_day: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalStatistics {
    pub total: u64,
    pub unique_senders: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_funnel_stage: BTreeMap<String, u64>,
}

/// Columns a text search looks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchField {
    /// Sender, subject, body and snippet.
    #[default]
    All,
    Sender,
    Subject,
    Body,
}

impl SearchField {
    fn columns(self) -> &'static [&'static str] {
        match self {
            SearchField::All => &["sender", "subject", "email_body", "snippet"],
            SearchField::Sender => &["sender"],
            SearchField::Subject => &["subject"],
            SearchField::Body => &["email_body"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderCount {
    pub sender: String,
    pub count: u64,
}

const NEWEST_FIRST: &str = "ORDER BY sent_at DESC, email_id ASC";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS emails (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email_id TEXT NOT NULL UNIQUE,
        thread_id TEXT NOT NULL,
        sender TEXT NOT NULL,
        recipient TEXT NOT NULL,
        subject TEXT NOT NULL,
        email_body TEXT NOT NULL,
        snippet TEXT NOT NULL,
        date TEXT NOT NULL,
        sent_at TEXT,
        time_of_day TEXT NOT NULL,
        notes TEXT NOT NULL,
        category TEXT NOT NULL,
        subcategory TEXT NOT NULL,
        price_signal TEXT NOT NULL,
        target_audience TEXT NOT NULL,
        product_mentioned TEXT NOT NULL,
        retention_signal TEXT NOT NULL,
        funnel_stage TEXT NOT NULL,
        urls TEXT NOT NULL,
        labels TEXT NOT NULL,
        error_detail TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_emails_sender ON emails(sender)",
    "CREATE INDEX IF NOT EXISTS idx_emails_category ON emails(category)",
    "CREATE INDEX IF NOT EXISTS idx_emails_subcategory ON emails(subcategory)",
    "CREATE INDEX IF NOT EXISTS idx_emails_funnel_stage ON emails(funnel_stage)",
    "CREATE INDEX IF NOT EXISTS idx_emails_sent_at ON emails(sent_at)",
];

const UPSERT_SQL: &str = r#"
    INSERT INTO emails (
        email_id, thread_id, sender, recipient, subject, email_body, snippet,
        date, sent_at, time_of_day, notes, category, subcategory, price_signal,
        target_audience, product_mentioned, retention_signal, funnel_stage,
        urls, labels, error_detail, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(email_id) DO UPDATE SET
        thread_id = excluded.thread_id,
        sender = excluded.sender,
        recipient = excluded.recipient,
        subject = excluded.subject,
        email_body = excluded.email_body,
        snippet = excluded.snippet,
        date = excluded.date,
        sent_at = excluded.sent_at,
        time_of_day = excluded.time_of_day,
        notes = excluded.notes,
        category = excluded.category,
        subcategory = excluded.subcategory,
        price_signal = excluded.price_signal,
        target_audience = excluded.target_audience,
        product_mentioned = excluded.product_mentioned,
        retention_signal = excluded.retention_signal,
        funnel_stage = excluded.funnel_stage,
        urls = excluded.urls,
        labels = excluded.labels,
        error_detail = excluded.error_detail,
        updated_at = excluded.updated_at
"#;

/// SQLite-backed [`LocalStore`]. Opens a fresh connection per operation.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    options: SqliteConnectOptions,
}

impl SqliteStore {
    /// Opens (creating if missing) the database file and ensures the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let store = Self { path, options };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection, StoreError> {
        Ok(self.options.connect().await?)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.connect().await?;
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&mut conn).await?;
        }
        conn.close().await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        let mut conn = self.connect().await?;
        let row = sqlx::query("SELECT * FROM emails WHERE email_id = ?")
            .bind(id)
            .fetch_optional(&mut conn)
            .await?;
        conn.close().await?;
        row.map(|row| row_to_stored(&row)).transpose()
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let mut conn = self.connect().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails")
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(count.max(0) as u64)
    }

    pub async fn statistics(&self) -> Result<LocalStatistics, StoreError> {
        let mut conn = self.connect().await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails")
            .fetch_one(&mut conn)
            .await?;
        let unique_senders: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT sender) FROM emails")
            .fetch_one(&mut conn)
            .await?;
        let by_category = grouped_counts(&mut conn, "category").await?;
        let by_funnel_stage = grouped_counts(&mut conn, "funnel_stage").await?;
        conn.close().await?;

        Ok(LocalStatistics {
            total: total.max(0) as u64,
            unique_senders: unique_senders.max(0) as u64,
            by_category,
            by_funnel_stage,
        })
    }

    /// Every committed record, newest first.
    pub async fn all_records(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query(&format!("SELECT * FROM emails {NEWEST_FIRST}"))
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;
        rows.iter().map(row_to_stored).collect()
    }

    /// Substring match (SQL `LIKE`, ASCII case-insensitive) over `field`.
    pub async fn search(&self, query: &str, field: SearchField) -> Result<Vec<StoredRecord>, StoreError> {
        let predicate = field
            .columns()
            .iter()
            .map(|column| format!("{column} LIKE ?"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!("SELECT * FROM emails WHERE {predicate} {NEWEST_FIRST}");
        let pattern = format!("%{query}%");

        let mut select = sqlx::query(&sql);
        for _ in field.columns() {
            select = select.bind(pattern.clone());
        }
        let mut conn = self.connect().await?;
        let rows = select.fetch_all(&mut conn).await?;
        conn.close().await?;
        rows.iter().map(row_to_stored).collect()
    }

    /// Records whose sender header equals `sender` exactly.
    pub async fn by_sender(&self, sender: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query(&format!("SELECT * FROM emails WHERE sender = ? {NEWEST_FIRST}"))
            .bind(sender)
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;
        rows.iter().map(row_to_stored).collect()
    }

    /// Distinct senders with their record counts, most frequent first.
    pub async fn senders(&self) -> Result<Vec<SenderCount>, StoreError> {
        let mut conn = self.connect().await?;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT sender, COUNT(*) AS n FROM emails GROUP BY sender ORDER BY n DESC, sender ASC",
        )
        .fetch_all(&mut conn)
        .await?;
        conn.close().await?;
        Ok(rows
            .into_iter()
            .map(|(sender, n)| SenderCount {
                sender,
                count: n.max(0) as u64,
            })
            .collect())
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn all_ids(&self) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.connect().await?;
        let ids: Vec<String> = sqlx::query_scalar("SELECT email_id FROM emails")
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;
        Ok(ids.into_iter().filter(|id| !id.is_empty()).collect())
    }

    async fn upsert(&self, record: &EnrichedRecord) -> Result<(), StoreError> {
        let urls = serde_json::to_string(&record.extracted_urls)?;
        let labels = serde_json::to_string(&record.raw.labels)?;
        let sent_at = record.raw.sent_at().map(|dt| dt.to_rfc3339());
        let now = Utc::now();
        let raw = &record.raw;
        let cat = &record.categorization;

        let mut conn = self.connect().await?;
        sqlx::query(UPSERT_SQL)
            .bind(&raw.id)
            .bind(&raw.thread_id)
            .bind(&raw.sender)
            .bind(&raw.recipient)
            .bind(&raw.subject)
            .bind(&raw.body)
            .bind(&raw.snippet)
            .bind(&raw.timestamp)
            .bind(sent_at)
            .bind(raw.time_of_day())
            .bind(&cat.notes)
            .bind(&cat.category)
            .bind(&cat.subcategory)
            .bind(&cat.price_signal)
            .bind(&cat.target_audience)
            .bind(&cat.product_mentioned)
            .bind(&cat.retention_signal)
            .bind(&cat.funnel_stage)
            .bind(urls)
            .bind(labels)
            .bind(&record.error_detail)
            .bind(now)
            .bind(now)
            .execute(&mut conn)
            .await?;
        conn.close().await?;
        Ok(())
    }
}

async fn grouped_counts(
    conn: &mut SqliteConnection,
    column: &'static str,
) -> Result<BTreeMap<String, u64>, StoreError> {
    let sql = format!("SELECT {column} AS key, COUNT(*) AS n FROM emails GROUP BY {column}");
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    let mut out = BTreeMap::new();
    for row in rows {
        let key: String = row.try_get("key")?;
        let n: i64 = row.try_get("n")?;
        out.insert(key, n.max(0) as u64);
    }
    Ok(out)
}

fn row_to_stored(row: &SqliteRow) -> Result<StoredRecord, StoreError> {
    let urls: String = row.try_get("urls")?;
    let labels: String = row.try_get("labels")?;
    let extracted_urls: BTreeSet<String> = serde_json::from_str(&urls)?;
    let labels: BTreeSet<String> = serde_json::from_str(&labels)?;

    let raw = RawRecord {
        id: row.try_get("email_id")?,
        thread_id: row.try_get("thread_id")?,
        subject: row.try_get("subject")?,
        sender: row.try_get("sender")?,
        recipient: row.try_get("recipient")?,
        timestamp: row.try_get("date")?,
        body: row.try_get("email_body")?,
        snippet: row.try_get("snippet")?,
        labels,
    };
    let categorization = Categorization {
        notes: row.try_get("notes")?,
        category: row.try_get("category")?,
        subcategory: row.try_get("subcategory")?,
        price_signal: row.try_get("price_signal")?,
        target_audience: row.try_get("target_audience")?,
        product_mentioned: row.try_get("product_mentioned")?,
        retention_signal: row.try_get("retention_signal")?,
        funnel_stage: row.try_get("funnel_stage")?,
    };

    Ok(StoredRecord {
        record: EnrichedRecord {
            raw,
            categorization,
            extracted_urls,
            error_detail: row.try_get("error_detail")?,
        },
        sent_at: row.try_get("sent_at")?,
        time_of_day: row.try_get("time_of_day")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
