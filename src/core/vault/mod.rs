use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use base64::Engine;
use hmac::Mac;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::automation::types::Credentials;
use crate::core::store::{CREDENTIALS_PREFIX, KvStore};

type HmacSha256 = hmac::Hmac<Sha256>;

/// Derive a 256-bit key from machine-specific identifiers.
/// HMAC-SHA256(hostname + username, "bidpilot-vault-v1"): stable across
/// restarts, tied to the local machine and user.
fn derive_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    let input = format!("{}{}", hostname, username);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"bidpilot-vault-v1")
        .expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    key
}

/// AES-256-GCM with a random 96-bit nonce; output is base64(nonce || ciphertext).
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn for_this_machine() -> Result<Self> {
        Self::from_key(&derive_key())
    }

    pub fn from_key(key: &[u8; 32]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow::anyhow!("Invalid vault key: {}", e))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() < 13 {
            return Err(anyhow::anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }
}

/// Which credential slot to use: the shared default, or one per business id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialScope {
    Default,
    Business(String),
}

impl CredentialScope {
    pub fn for_business(business_id: Option<&str>) -> Self {
        match business_id {
            Some(id) if !id.trim().is_empty() => CredentialScope::Business(id.to_string()),
            _ => CredentialScope::Default,
        }
    }

    /// Business slots live in their own namespace so that no business id,
    /// not even `default`, can address the shared slot.
    pub fn key(&self) -> String {
        match self {
            CredentialScope::Default => format!("{}default", CREDENTIALS_PREFIX),
            CredentialScope::Business(id) => {
                format!("{}{}{}", CREDENTIALS_PREFIX, BUSINESS_NAMESPACE, id)
            }
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        let name = key.strip_prefix(CREDENTIALS_PREFIX)?;
        if name == "default" {
            return Some(CredentialScope::Default);
        }
        name.strip_prefix(BUSINESS_NAMESPACE)
            .filter(|id| !id.is_empty())
            .map(|id| CredentialScope::Business(id.to_string()))
    }

    /// Short name for displays: `default` or `business <id>`.
    pub fn label(&self) -> String {
        match self {
            CredentialScope::Default => "default".to_string(),
            CredentialScope::Business(id) => format!("business {}", id),
        }
    }
}

const BUSINESS_NAMESPACE: &str = "business.";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredentials {
    pub credentials: Credentials,
    pub saved_at: i64,
    /// The slot these were read from.
    pub scope: CredentialScope,
}

#[derive(Serialize, Deserialize)]
struct SealedEntry {
    ciphertext: String,
    saved_at: i64,
}

/// Encrypted credential storage on top of the shared store.
pub struct CredentialVault {
    kv: Arc<dyn KvStore>,
    cipher: SecretCipher,
    max_age_ms: i64,
}

impl CredentialVault {
    pub fn new(kv: Arc<dyn KvStore>, cipher: SecretCipher, max_age_days: u32) -> Self {
        Self {
            kv,
            cipher,
            max_age_ms: i64::from(max_age_days) * 24 * 60 * 60 * 1000,
        }
    }

    pub async fn save(&self, scope: &CredentialScope, creds: &Credentials, now: i64) -> Result<()> {
        if !creds.is_complete() {
            anyhow::bail!("Username and password are both required");
        }
        let plaintext = serde_json::to_string(creds)?;
        let entry = SealedEntry {
            ciphertext: self.cipher.encrypt(&plaintext)?,
            saved_at: now,
        };
        self.kv
            .set(&scope.key(), serde_json::to_value(&entry)?)
            .await?;
        info!("Stored credentials under {}", scope.key());
        Ok(())
    }

    /// Returns the credentials if present and younger than the max age.
    /// Expired or unreadable entries are deleted and reported absent.
    pub async fn load(&self, scope: &CredentialScope, now: i64) -> Result<Option<StoredCredentials>> {
        let key = scope.key();
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        let entry: SealedEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Credential entry {} is malformed, removing: {}", key, e);
                self.kv.remove(&key).await?;
                return Ok(None);
            }
        };

        if now - entry.saved_at > self.max_age_ms {
            info!("Credentials under {} expired, removing", key);
            self.kv.remove(&key).await?;
            return Ok(None);
        }

        let credentials: Credentials = match self
            .cipher
            .decrypt(&entry.ciphertext)
            .and_then(|plain| {
                serde_json::from_str::<Credentials>(&plain).map_err(anyhow::Error::from)
            })
        {
            Ok(creds) => creds,
            Err(e) => {
                warn!("Credentials under {} cannot be decrypted, removing: {}", key, e);
                self.kv.remove(&key).await?;
                return Ok(None);
            }
        };

        Ok(Some(StoredCredentials {
            credentials,
            saved_at: entry.saved_at,
            scope: scope.clone(),
        }))
    }

    /// Business slot first, then the default slot.
    pub async fn resolve(&self, business_id: Option<&str>, now: i64) -> Result<Option<StoredCredentials>> {
        let scope = CredentialScope::for_business(business_id);
        if scope != CredentialScope::Default
            && let Some(found) = self.load(&scope, now).await?
        {
            return Ok(Some(found));
        }
        self.load(&CredentialScope::Default, now).await
    }

    pub async fn remove(&self, scope: &CredentialScope) -> Result<()> {
        self.kv.remove(&scope.key()).await
    }

    /// Summary for status displays; never includes the password.
    pub async fn describe(&self, now: i64) -> Result<Vec<serde_json::Value>> {
        let mut out = Vec::new();
        for key in self.kv.keys_with_prefix(CREDENTIALS_PREFIX).await? {
            let Some(scope) = CredentialScope::from_key(&key) else {
                warn!("Ignoring credential entry outside the known slots: {}", key);
                continue;
            };
            if let Some(stored) = self.load(&scope, now).await? {
                out.push(json!({
                    "scope": scope.label(),
                    "username": stored.credentials.username,
                    "savedAt": stored.saved_at,
                }));
            }
        }
        Ok(out)
    }
}
