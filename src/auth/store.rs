use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MailError;

pub const TOKEN_CACHE_ENCRYPTION_KEY_ENV: &str = "MAILPRUNE_TOKEN_CACHE_KEY";
const TOKEN_CACHE_KEY_BYTES: usize = 32;
const TOKEN_CACHE_NONCE_BYTES: usize = 12;
const TOKEN_CACHE_ENVELOPE_VERSION: u8 = 1;
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// OAuth material persisted between runs, in Google's "authorized user" layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredCredentials {
    /// A token without a recorded expiry is trusted until the service rejects it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry
            .is_some_and(|expiry| expiry - Duration::seconds(EXPIRY_SKEW_SECONDS) <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.is_empty() || self.scopes.iter().any(|granted| granted == scope)
    }
}

pub trait CredentialStore {
    fn load(&self) -> Result<Option<StoredCredentials>, MailError>;

    fn save(&self, credentials: &StoredCredentials) -> Result<(), MailError>;
}

/// Keeps credentials for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Option<StoredCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: StoredCredentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
        }
    }

    pub fn snapshot(&self) -> Option<StoredCredentials> {
        self.credentials
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<StoredCredentials>, MailError> {
        Ok(self.snapshot())
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), MailError> {
        let mut guard = self
            .credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(credentials.clone());
        Ok(())
    }
}

/// JSON credential cache on disk, optionally sealed with AES-256-GCM.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    encryption_key: Option<[u8; TOKEN_CACHE_KEY_BYTES]>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encryption_key: None,
        }
    }

    pub fn with_encryption_key(mut self, key: [u8; TOKEN_CACHE_KEY_BYTES]) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Builds the store, sealing it when `MAILPRUNE_TOKEN_CACHE_KEY` is set.
    pub fn from_env(path: impl Into<PathBuf>) -> Result<Self, MailError> {
        let store = Self::new(path);
        match token_cache_encryption_key()? {
            Some(key) => Ok(store.with_encryption_key(key)),
            None => Ok(store),
        }
    }

    fn write_raw(&self, contents: &str) -> Result<(), MailError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, contents)?;
        restrict_permissions(&self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<StoredCredentials>, MailError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;

        if let Some(key) = &self.encryption_key {
            match decrypt_credentials(&raw, key) {
                Ok(credentials) => return Ok(Some(credentials)),
                Err(decrypt_error) => {
                    if let Ok(legacy) = serde_json::from_str::<StoredCredentials>(&raw) {
                        debug!("re-sealing plaintext token cache {}", self.path.display());
                        self.save(&legacy)?;
                        return Ok(Some(legacy));
                    }
                    warn!(
                        "discarding unreadable token cache {}: {decrypt_error}",
                        self.path.display()
                    );
                    return Ok(None);
                }
            }
        }

        match serde_json::from_str::<StoredCredentials>(&raw) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(_) if serde_json::from_str::<EncryptedTokenEnvelope>(&raw).is_ok() => {
                Err(MailError::Config(format!(
                    "token cache {} is encrypted; set {TOKEN_CACHE_ENCRYPTION_KEY_ENV} to read it",
                    self.path.display()
                )))
            }
            Err(error) => {
                warn!(
                    "discarding unreadable token cache {}: {error}",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), MailError> {
        let contents = match &self.encryption_key {
            Some(key) => encrypt_credentials(credentials, key)?,
            None => serde_json::to_string_pretty(credentials)?,
        };
        self.write_raw(&contents)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), MailError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), MailError> {
    Ok(())
}

fn token_cache_encryption_key() -> Result<Option<[u8; TOKEN_CACHE_KEY_BYTES]>, MailError> {
    let raw = std::env::var(TOKEN_CACHE_ENCRYPTION_KEY_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    raw.map(|value| parse_token_cache_key_hex(&value))
        .transpose()
        .map_err(|error| {
            MailError::Config(format!(
                "{TOKEN_CACHE_ENCRYPTION_KEY_ENV} must be 64 hex characters (32 bytes): {error}"
            ))
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedTokenEnvelope {
    version: u8,
    nonce_hex: String,
    ciphertext_hex: String,
}

fn encrypt_credentials(
    credentials: &StoredCredentials,
    encryption_key: &[u8; TOKEN_CACHE_KEY_BYTES],
) -> Result<String, MailError> {
    let mut plaintext = serde_json::to_vec(credentials)?;
    let key = sealing_key(encryption_key)?;

    let mut nonce_bytes = [0u8; TOKEN_CACHE_NONCE_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| MailError::Config("generate nonce for token cache".to_string()))?;

    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut plaintext,
    )
    .map_err(|_| MailError::Config("encrypt token cache".to_string()))?;

    let envelope = EncryptedTokenEnvelope {
        version: TOKEN_CACHE_ENVELOPE_VERSION,
        nonce_hex: hex_encode(&nonce_bytes),
        ciphertext_hex: hex_encode(&plaintext),
    };
    Ok(serde_json::to_string(&envelope)?)
}

fn decrypt_credentials(
    raw: &str,
    encryption_key: &[u8; TOKEN_CACHE_KEY_BYTES],
) -> Result<StoredCredentials, MailError> {
    let envelope: EncryptedTokenEnvelope = serde_json::from_str(raw)?;
    if envelope.version != TOKEN_CACHE_ENVELOPE_VERSION {
        return Err(MailError::Config(format!(
            "unsupported token envelope version {}",
            envelope.version
        )));
    }

    let nonce_bytes: [u8; TOKEN_CACHE_NONCE_BYTES] = hex_decode(&envelope.nonce_hex)?
        .try_into()
        .map_err(|_| MailError::Config("invalid nonce length in token envelope".to_string()))?;
    let mut ciphertext = hex_decode(&envelope.ciphertext_hex)?;

    let key = sealing_key(encryption_key)?;
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| MailError::Config("decrypt token cache".to_string()))?;

    Ok(serde_json::from_slice(plaintext)?)
}

fn sealing_key(encryption_key: &[u8; TOKEN_CACHE_KEY_BYTES]) -> Result<LessSafeKey, MailError> {
    let unbound = UnboundKey::new(&AES_256_GCM, encryption_key)
        .map_err(|_| MailError::Config("construct AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

pub fn parse_token_cache_key_hex(raw: &str) -> Result<[u8; TOKEN_CACHE_KEY_BYTES], MailError> {
    hex_decode(raw)?
        .try_into()
        .map_err(|_| MailError::Config("token cache key must be 32 bytes".to_string()))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

fn hex_decode(raw: &str) -> Result<Vec<u8>, MailError> {
    let bytes = raw.trim().as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(MailError::Config("hex string length must be even".to_string()));
    }

    bytes
        .chunks(2)
        .map(|pair| match (decode_hex_nibble(pair[0]), decode_hex_nibble(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(MailError::Config("invalid hex digit".to_string())),
        })
        .collect()
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
