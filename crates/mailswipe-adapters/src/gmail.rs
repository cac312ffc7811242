//! Gmail REST v1 message source.

use std::collections::BTreeSet;
use std::future::Future;

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use mailswipe_core::{ItemRef, RawRecord, Session};
use mailswipe_storage::{FetchError, HttpClient};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{MessageSource, SourceConnector, SourceError};

pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Largest page the list endpoint accepts.
pub const MAX_PAGE_SIZE: usize = 500;

const GMAIL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListPage {
    #[serde(default)]
    pub messages: Vec<ItemRef>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailProfile {
    pub email_address: String,
    #[serde(default)]
    pub messages_total: u64,
    #[serde(default)]
    pub threads_total: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

/// Walks list pages until `max_results` refs are collected or no continuation token remains.
pub async fn collect_pages<F, Fut>(
    max_results: Option<usize>,
    mut fetch_page: F,
) -> Result<Vec<ItemRef>, SourceError>
where
    F: FnMut(Option<String>, usize) -> Fut,
    Fut: Future<Output = Result<MessageListPage, SourceError>>,
{
    let mut refs = Vec::new();
    let mut token: Option<String> = None;
    let mut page_no = 0usize;

    loop {
        let remaining = match max_results {
            Some(max) if refs.len() >= max => break,
            Some(max) => max - refs.len(),
            None => MAX_PAGE_SIZE,
        };
        page_no += 1;
        let page = fetch_page(token.take(), remaining.min(MAX_PAGE_SIZE)).await?;
        refs.extend(page.messages);
        debug!(page = page_no, total = refs.len(), "collected list page");

        match page.next_page_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }

    if let Some(max) = max_results {
        refs.truncate(max);
    }
    Ok(refs)
}

/// Maps a raw Gmail message into a [`RawRecord`].
pub fn parse_message(message: GmailMessage) -> Result<RawRecord, String> {
    let payload = message.payload.unwrap_or_default();

    let mut subject = String::new();
    let mut sender = String::new();
    let mut recipient = String::new();
    let mut timestamp = String::new();
    for header in &payload.headers {
        match header.name.to_ascii_lowercase().as_str() {
            "subject" => subject = header.value.clone(),
            "from" => sender = header.value.clone(),
            "to" => recipient = header.value.clone(),
            "date" => timestamp = header.value.clone(),
            _ => {}
        }
    }

    let body = extract_body(&payload)?;

    Ok(RawRecord {
        id: message.id,
        thread_id: message.thread_id,
        subject,
        sender,
        recipient,
        timestamp,
        body,
        snippet: message.snippet,
        labels: message.label_ids.into_iter().collect::<BTreeSet<_>>(),
    })
}

/// Plain text wins over HTML; nested multiparts are searched depth-first.
fn extract_body(payload: &MessagePart) -> Result<String, String> {
    if payload.parts.is_empty() {
        return decode_part(payload).map(Option::unwrap_or_default);
    }

    for mime in ["text/plain", "text/html"] {
        if let Some(part) = find_part(&payload.parts, mime) {
            if let Some(text) = decode_part(part)? {
                return Ok(text);
            }
        }
    }
    Ok(String::new())
}

fn find_part<'a>(parts: &'a [MessagePart], mime: &str) -> Option<&'a MessagePart> {
    for part in parts {
        let has_data = part.body.as_ref().and_then(|b| b.data.as_ref()).is_some();
        if part.mime_type.eq_ignore_ascii_case(mime) && has_data {
            return Some(part);
        }
        if let Some(found) = find_part(&part.parts, mime) {
            return Some(found);
        }
    }
    None
}

fn decode_part(part: &MessagePart) -> Result<Option<String>, String> {
    let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) else {
        return Ok(None);
    };
    let bytes = GMAIL_BASE64
        .decode(data.trim())
        .map_err(|e| format!("decoding {} body: {e}", part.mime_type))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

fn source_scoped(err: FetchError) -> SourceError {
    if err.is_auth_failure() {
        SourceError::Unauthorized(err.to_string())
    } else {
        SourceError::Unavailable(err.to_string())
    }
}

fn detail_error(id: &str, err: FetchError) -> SourceError {
    if err.is_auth_failure() {
        SourceError::Unauthorized(err.to_string())
    } else if err.is_connectivity() {
        SourceError::Unavailable(err.to_string())
    } else {
        SourceError::Item {
            id: id.to_string(),
            message: err.to_string(),
        }
    }
}

/// Gmail mailbox of one authenticated session.
#[derive(Debug, Clone)]
pub struct GmailSource {
    http: HttpClient,
    base_url: String,
    access_token: String,
}

impl GmailSource {
    pub fn new(http: HttpClient, base_url: &str, access_token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    pub async fn profile(&self) -> Result<GmailProfile, SourceError> {
        let url = format!("{}/users/me/profile", self.base_url);
        self.http
            .get_json(&url, Some(&self.access_token), &[])
            .await
            .map_err(source_scoped)
    }

    async fn fetch_page(
        &self,
        query: &str,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<MessageListPage, SourceError> {
        let url = format!("{}/users/me/messages", self.base_url);
        let mut params = vec![("maxResults", page_size.to_string())];
        if !query.is_empty() {
            params.push(("q", query.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        self.http
            .get_json(&url, Some(&self.access_token), &params)
            .await
            .map_err(source_scoped)
    }
}

#[async_trait]
impl MessageSource for GmailSource {
    async fn list(&self, max_results: Option<usize>, query: &str) -> Result<Vec<ItemRef>, SourceError> {
        collect_pages(max_results, |token, size| self.fetch_page(query, token, size)).await
    }

    async fn get_detail(&self, id: &str) -> Result<RawRecord, SourceError> {
        let url = format!("{}/users/me/messages/{}", self.base_url, id);
        let message: GmailMessage = self
            .http
            .get_json(&url, Some(&self.access_token), &[("format", "full".to_string())])
            .await
            .map_err(|err| detail_error(id, err))?;
        parse_message(message).map_err(|message| SourceError::Item {
            id: id.to_string(),
            message,
        })
    }
}

/// Builds a [`GmailSource`] per session and verifies it by reading the profile.
#[derive(Debug, Clone)]
pub struct GmailConnector {
    http: HttpClient,
    base_url: String,
}

impl GmailConnector {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SourceConnector for GmailConnector {
    async fn connect(&self, session: &Session) -> Result<Box<dyn MessageSource>, SourceError> {
        let source = GmailSource::new(self.http.clone(), &self.base_url, session.access_token.clone());
        let profile = source.profile().await?;
        info!(
            account = %session.account_name,
            email = %profile.email_address,
            messages = profile.messages_total,
            "connected to mailbox"
        );
        Ok(Box::new(source))
    }
}
