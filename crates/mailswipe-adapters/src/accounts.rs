//! Account selection from the accounts file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use mailswipe_core::Session;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::AccountSelector;

#[derive(Debug, Clone, Deserialize)]
pub struct AccountEntry {
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountsFile {
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
}

impl AccountsFile {
    /// First account flagged active, falling back to the first listed.
    pub fn active(&self) -> Option<&AccountEntry> {
        self.accounts
            .iter()
            .find(|account| account.active)
            .or_else(|| self.accounts.first())
    }
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(default, alias = "token")]
    access_token: Option<String>,
}

/// Token files hold either a JSON object or the bare token.
fn parse_token(contents: &str) -> Option<String> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str::<TokenFile>(trimmed)
            .ok()
            .and_then(|file| file.access_token)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
    }
    Some(trimmed.to_string())
}

#[derive(Debug, Clone)]
pub struct FileAccountSelector {
    path: PathBuf,
}

impl FileAccountSelector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> anyhow::Result<AccountsFile> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading accounts file {}", self.path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing accounts file {}", self.path.display()))
    }

    fn token_path(&self, token_file: &str) -> PathBuf {
        let candidate = Path::new(token_file);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        match self.path.parent() {
            Some(dir) => dir.join(candidate),
            None => candidate.to_path_buf(),
        }
    }
}

#[async_trait]
impl AccountSelector for FileAccountSelector {
    async fn active_session(&self) -> anyhow::Result<Option<Session>> {
        let accounts = self.load().await?;
        let Some(account) = accounts.active() else {
            warn!(path = %self.path.display(), "accounts file lists no accounts");
            return Ok(None);
        };
        let Some(token_file) = account.token_file.as_deref().filter(|f| !f.is_empty()) else {
            warn!(account = %account.name, "active account has no token file");
            return Ok(None);
        };

        let token_path = self.token_path(token_file);
        let contents = match tokio::fs::read_to_string(&token_path).await {
            Ok(contents) => contents,
            Err(err) => {
                warn!(account = %account.name, path = %token_path.display(), error = %err, "token file unreadable");
                return Ok(None);
            }
        };

        let Some(access_token) = parse_token(&contents) else {
            warn!(account = %account.name, "token file holds no access token");
            return Ok(None);
        };
        debug!(account = %account.name, "resolved active account");

        Ok(Some(Session {
            account_name: account.name.clone(),
            email: Some(account.email.clone()).filter(|email| !email.is_empty()),
            access_token,
        }))
    }
}

/// Fixed session, used when a token is supplied directly.
#[derive(Debug, Clone, Default)]
pub struct StaticAccountSelector(pub Option<Session>);

impl StaticAccountSelector {
    pub fn from_token(account_name: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self(Some(Session {
            account_name: account_name.into(),
            email: None,
            access_token: access_token.into(),
        }))
    }
}

#[async_trait]
impl AccountSelector for StaticAccountSelector {
    async fn active_session(&self) -> anyhow::Result<Option<Session>> {
        Ok(self.0.clone())
    }
}
