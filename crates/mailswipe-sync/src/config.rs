use std::path::PathBuf;
use std::time::Duration;

use mailswipe_adapters::gmail::DEFAULT_GMAIL_API_BASE;
use mailswipe_adapters::openai::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};
use mailswipe_storage::DEFAULT_REMOTE_BATCH_SIZE;

pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;
pub const DEFAULT_MAX_RESULTS: usize = 50;
pub const DEFAULT_PREVIEW_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub remote_enabled: bool,
    pub remote_database_url: Option<String>,
    pub remote_batch_size: usize,
    pub local_db_path: PathBuf,
    pub accounts_file: PathBuf,
    pub gmail_access_token: Option<String>,
    pub gmail_api_base: String,
    pub gmail_query: String,
    pub max_results: usize,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub reports_dir: Option<PathBuf>,
    pub preview_count: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_MINUTES * 60),
            remote_enabled: true,
            remote_database_url: None,
            remote_batch_size: DEFAULT_REMOTE_BATCH_SIZE,
            local_db_path: PathBuf::from("./emails.db"),
            accounts_file: PathBuf::from("./google_accounts.json"),
            gmail_access_token: None,
            gmail_api_base: DEFAULT_GMAIL_API_BASE.to_string(),
            gmail_query: String::new(),
            max_results: DEFAULT_MAX_RESULTS,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            reports_dir: None,
            preview_count: DEFAULT_PREVIEW_COUNT,
            http_timeout_secs: 20,
            user_agent: "mailswipe/0.1".to_string(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval_minutes = env_parse::<u64>("CHECK_INTERVAL_MINUTES")
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_INTERVAL_MINUTES);

        Self {
            interval: Duration::from_secs(interval_minutes * 60),
            remote_enabled: std::env::var("ENABLE_REMOTE_SYNC")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.remote_enabled),
            remote_database_url: env_string("REMOTE_DATABASE_URL"),
            remote_batch_size: env_parse::<usize>("REMOTE_BATCH_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.remote_batch_size),
            local_db_path: env_string("LOCAL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_db_path),
            accounts_file: env_string("ACCOUNTS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.accounts_file),
            gmail_access_token: env_string("GMAIL_ACCESS_TOKEN"),
            gmail_api_base: env_string("GMAIL_API_BASE").unwrap_or(defaults.gmail_api_base),
            gmail_query: std::env::var("GMAIL_QUERY").unwrap_or_default(),
            max_results: env_parse::<usize>("MAX_RESULTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_results),
            openai_api_key: env_string("OPENAI_API_KEY"),
            openai_base_url: env_string("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_model: env_string("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            reports_dir: env_string("REPORTS_DIR").map(PathBuf::from),
            preview_count: env_parse::<usize>("REPORT_PREVIEW_COUNT").unwrap_or(defaults.preview_count),
            http_timeout_secs: env_parse::<u64>("MAILSWIPE_HTTP_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: env_string("MAILSWIPE_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub fn with_interval_minutes(mut self, minutes: u64) -> Self {
        self.interval = Duration::from_secs(minutes.max(1) * 60);
        self
    }

    /// Remote sync needs both the switch and a database URL.
    pub fn remote_url(&self) -> Option<&str> {
        if self.remote_enabled {
            self.remote_database_url.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(15 * 60));
        assert_eq!(config.max_results, 50);
        assert_eq!(config.remote_batch_size, 50);
        assert_eq!(config.preview_count, 3);
        assert!(config.remote_enabled);
        assert_eq!(config.openai_model, "gpt-4o-mini");
    }

    #[test]
    fn flag_parsing_accepts_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn remote_requires_switch_and_url() {
        let mut config = MonitorConfig {
            remote_database_url: Some("postgres://localhost/mail".into()),
            ..MonitorConfig::default()
        };
        assert_eq!(config.remote_url(), Some("postgres://localhost/mail"));
        config.remote_enabled = false;
        assert_eq!(config.remote_url(), None);
    }

    #[test]
    fn interval_override_is_at_least_one_minute() {
        let config = MonitorConfig::default().with_interval_minutes(0);
        assert_eq!(config.interval, Duration::from_secs(60));
    }
}
