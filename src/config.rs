use std::path::PathBuf;
use std::time::Duration;

use crate::connectors::retry::RetryPolicy;
use crate::error::MailError;

/// Most ids the Gmail API accepts in one batchDelete or batchModify call.
pub const MAX_BULK_ITEMS: usize = 1000;
/// Most results messages.list returns per page.
pub const MAX_PAGE_SIZE: usize = 500;
pub const DEFAULT_PAGE_SIZE: usize = MAX_PAGE_SIZE;
pub const DEFAULT_MAX_PAGES: usize = 10_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_USER_ID: &str = "me";
pub const DEFAULT_CREDENTIALS_PATH: &str = "./volume/credentials.json";
pub const DEFAULT_TOKEN_CACHE_PATH: &str = "token.json";

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const GMAIL_API_BASE_ENV: &str = "MAILPRUNE_GMAIL_API_BASE";
pub const TOKEN_URL_ENV: &str = "MAILPRUNE_TOKEN_URL";

#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials_path: PathBuf,
    pub token_cache_path: PathBuf,
    pub user_id: String,
    pub batch_size: usize,
    pub page_size: usize,
    pub max_pages: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            token_cache_path: PathBuf::from(DEFAULT_TOKEN_CACHE_PATH),
            user_id: DEFAULT_USER_ID.to_string(),
            batch_size: MAX_BULK_ITEMS,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::none(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), MailError> {
        if self.batch_size == 0 || self.batch_size > MAX_BULK_ITEMS {
            return Err(MailError::Config(format!(
                "batch size must be between 1 and {MAX_BULK_ITEMS}, got {}",
                self.batch_size
            )));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(MailError::Config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.max_pages == 0 {
            return Err(MailError::Config("max pages must be at least 1".to_string()));
        }
        if self.user_id.trim().is_empty() {
            return Err(MailError::Config("user id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Reads a non-empty environment override, falling back to `default`.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn gmail_api_base() -> String {
    env_or(GMAIL_API_BASE_ENV, GMAIL_API_BASE)
        .trim_end_matches('/')
        .to_string()
}
