use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::MailError;

pub mod flow;
pub mod store;

pub use flow::ClientSecrets;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoredCredentials};

/// Full mailbox access, required for permanent deletion.
pub const GMAIL_SCOPE: &str = "https://mail.google.com/";

/// Hands out bearer tokens, reusing the credential cache, refreshing expired
/// tokens and falling back to the interactive consent flow.
pub struct Authenticator {
    secrets_path: PathBuf,
    store: Box<dyn CredentialStore>,
    current: Mutex<Option<StoredCredentials>>,
}

impl Authenticator {
    pub fn new(secrets_path: impl Into<PathBuf>, store: Box<dyn CredentialStore>) -> Self {
        Self {
            secrets_path: secrets_path.into(),
            store,
            current: Mutex::new(None),
        }
    }

    /// Loads usable credentials, refreshing or re-consenting as needed, and
    /// writes them back to the store whenever they changed.
    pub async fn authorize(&self) -> Result<StoredCredentials, MailError> {
        let cached = self.store.load()?.filter(|credentials| {
            let usable = credentials.has_scope(GMAIL_SCOPE);
            if !usable {
                warn!("cached credentials lack {GMAIL_SCOPE}; requesting consent again");
            }
            usable
        });

        let credentials = match cached {
            Some(credentials) if !credentials.is_expired() => credentials,
            Some(credentials) if credentials.can_refresh() => {
                info!("cached access token expired; refreshing");
                let refreshed = flow::refresh_credentials(&credentials).await?;
                self.store.save(&refreshed)?;
                refreshed
            }
            _ => {
                info!("no usable cached credentials; starting consent flow");
                let secrets = ClientSecrets::from_file(&self.secrets_path)?;
                let fresh = flow::run_installed_app_flow(&secrets, GMAIL_SCOPE).await?;
                self.store.save(&fresh)?;
                fresh
            }
        };

        self.remember(credentials.clone());
        Ok(credentials)
    }

    /// Access token for the next request. Refresh failures are fatal.
    pub async fn bearer_token(&self) -> Result<String, MailError> {
        let current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match current {
            Some(credentials) if !credentials.is_expired() => Ok(credentials.access_token),
            Some(credentials) if credentials.can_refresh() => {
                info!("access token expired mid-run; refreshing");
                let refreshed = flow::refresh_credentials(&credentials).await?;
                self.store.save(&refreshed)?;
                let token = refreshed.access_token.clone();
                self.remember(refreshed);
                Ok(token)
            }
            _ => Ok(self.authorize().await?.access_token),
        }
    }

    fn remember(&self, credentials: StoredCredentials) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credentials);
    }
}
