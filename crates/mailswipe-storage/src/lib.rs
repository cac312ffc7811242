//! Persistence targets and HTTP fetch utilities for mailswipe.

use std::time::Duration;

use thiserror::Error;

pub mod http;
pub mod local;
pub mod remote;

pub use http::{
    classify_reqwest_error, classify_status, truncate_chars, BackoffPolicy, FetchError,
    HttpClient, HttpClientConfig, RetryDisposition,
};
pub use local::{LocalStatistics, LocalStore, SearchField, SenderCount, SqliteStore, StoredRecord};
pub use remote::{
    is_duplicate_key, write_in_chunks, PgReplica, RemoteReplica, RowWrite, DEFAULT_REMOTE_BATCH_SIZE,
};

pub const CRATE_NAME: &str = "mailswipe-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),
}
