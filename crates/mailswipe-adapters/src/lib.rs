//! Contracts for the pipeline's external collaborators, plus their production adapters.

use async_trait::async_trait;
use mailswipe_core::{Categorization, ItemRef, RawRecord, Session};
use mailswipe_storage::{truncate_chars, FetchError};
use serde::Serialize;
use thiserror::Error;

pub mod accounts;
pub mod gmail;
pub mod openai;

pub use accounts::{FileAccountSelector, StaticAccountSelector};
pub use gmail::{GmailConnector, GmailProfile, GmailSource};
pub use openai::OpenAiCategorizer;

pub const CRATE_NAME: &str = "mailswipe-adapters";

/// Characters of body text sent to the categorization service.
pub const BODY_PREVIEW_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("mailbox source unreachable: {0}")]
    Unavailable(String),
    #[error("mailbox rejected credentials: {0}")]
    Unauthorized(String),
    #[error("message {id} could not be retrieved: {message}")]
    Item { id: String, message: String },
}

impl SourceError {
    /// Item-scoped failures affect one message; the others affect the whole source.
    pub fn is_item_scoped(&self) -> bool {
        matches!(self, SourceError::Item { .. })
    }
}

/// Paginated discovery plus full retrieval of mailbox items.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Most recent refs first, at most `max_results` of them.
    async fn list(&self, max_results: Option<usize>, query: &str) -> Result<Vec<ItemRef>, SourceError>;

    async fn get_detail(&self, id: &str) -> Result<RawRecord, SourceError>;
}

/// Turns a session into a verified [`MessageSource`].
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self, session: &Session) -> Result<Box<dyn MessageSource>, SourceError>;
}

/// Resolves which mailbox account the pipeline runs against.
#[async_trait]
pub trait AccountSelector: Send + Sync {
    async fn active_session(&self) -> anyhow::Result<Option<Session>>;
}

#[derive(Debug, Error)]
pub enum CategorizeError {
    #[error("categorization service not configured")]
    NotConfigured,
    #[error("categorization request failed: {0}")]
    Request(#[from] FetchError),
    #[error("categorization response malformed: {0}")]
    Malformed(String),
}

/// Fields transmitted to the categorization service for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorizationRequest {
    pub sender: String,
    pub subject: String,
    pub body_preview: String,
    pub snippet: String,
}

impl CategorizationRequest {
    pub fn from_record(record: &RawRecord, max_body_chars: usize) -> Self {
        Self {
            sender: record.sender.clone(),
            subject: record.subject.clone(),
            body_preview: truncate_chars(&record.body, max_body_chars),
            snippet: record.snippet.clone(),
        }
    }
}

/// Opaque marketing categorization service.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, request: &CategorizationRequest) -> Result<Categorization, CategorizeError>;
}
