mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::core::automation::types::{
    AuthorizationToken, AutomationRecord, RecordStatus, TabId,
};

pub const RECORD_KEY: &str = "automation.record";
pub const AUTHORIZATION_KEY: &str = "automation.authorization";
pub const ENABLED_KEY: &str = "extension.enabled";
pub const DEBUG_LOG_KEY: &str = "debug.log";
pub const OPTIONS_KEY: &str = "coordinator.config";
pub const CREDENTIALS_PREFIX: &str = "credentials.";

/// Most recent entries kept in the debug ring buffer.
pub const DEBUG_LOG_CAPACITY: usize = 50;

/// Persisted key/value store shared by every context. No transactions:
/// readers re-validate whatever they load.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebugEntry {
    pub timestamp: i64,
    #[serde(default)]
    pub tab_id: Option<TabId>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub message: String,
}

/// Runtime options editable through `updateConfiguration`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorOptions {
    pub notifications: bool,
    pub auto_login: bool,
    pub debug_mode: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            notifications: true,
            auto_login: true,
            debug_mode: false,
        }
    }
}

impl CoordinatorOptions {
    /// Shallow merge: known boolean keys in `patch` overwrite, the rest is ignored.
    pub fn merge(&mut self, patch: &Value) {
        let Some(map) = patch.as_object() else {
            return;
        };
        if let Some(v) = map.get("notifications").and_then(Value::as_bool) {
            self.notifications = v;
        }
        if let Some(v) = map.get("auto_login").and_then(Value::as_bool) {
            self.auto_login = v;
        }
        if let Some(v) = map.get("debug_mode").and_then(Value::as_bool) {
            self.debug_mode = v;
        }
    }
}

/// What a token read found. Expired tokens are deleted as part of the read.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenRead {
    Live(AuthorizationToken),
    Expired,
    Missing,
}

/// Typed repository over the raw `KvStore`: one read/write contract per key.
#[derive(Clone)]
pub struct SharedStore {
    kv: Arc<dyn KvStore>,
}

impl SharedStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn raw(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(parsed) => Ok(Some(parsed)),
                Err(e) => {
                    warn!("Discarding malformed '{}' entry: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.set(key, serde_json::to_value(value)?).await
    }

    // --- automation record ---

    pub async fn automation_record(&self) -> Result<Option<AutomationRecord>> {
        self.load(RECORD_KEY).await
    }

    pub async fn put_automation_record(&self, record: &AutomationRecord) -> Result<()> {
        self.save(RECORD_KEY, record).await
    }

    /// Rewrites the status of the current record. Returns false if there is none.
    pub async fn set_record_status(&self, status: RecordStatus) -> Result<bool> {
        match self.automation_record().await? {
            Some(mut record) => {
                record.status = status;
                self.put_automation_record(&record).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn clear_automation_record(&self) -> Result<()> {
        self.kv.remove(RECORD_KEY).await
    }

    // --- authorization token ---

    pub async fn read_authorization(&self, now: i64) -> Result<TokenRead> {
        let Some(token) = self.load::<AuthorizationToken>(AUTHORIZATION_KEY).await? else {
            return Ok(TokenRead::Missing);
        };
        if token.is_live(now) {
            Ok(TokenRead::Live(token))
        } else {
            self.kv.remove(AUTHORIZATION_KEY).await?;
            Ok(TokenRead::Expired)
        }
    }

    pub async fn put_authorization(&self, token: &AuthorizationToken) -> Result<()> {
        self.save(AUTHORIZATION_KEY, token).await
    }

    pub async fn clear_authorization(&self) -> Result<()> {
        self.kv.remove(AUTHORIZATION_KEY).await
    }

    /// Deletes the token only if it is still the one created at `timestamp`.
    /// Returns whether anything was removed.
    pub async fn clear_authorization_if(&self, timestamp: i64) -> Result<bool> {
        match self.load::<AuthorizationToken>(AUTHORIZATION_KEY).await? {
            Some(token) if token.timestamp == timestamp => {
                self.kv.remove(AUTHORIZATION_KEY).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // --- enable flag ---

    /// Missing means enabled; a failed read means disabled.
    pub async fn extension_enabled(&self) -> bool {
        match self.kv.get(ENABLED_KEY).await {
            Ok(Some(value)) => value.as_bool() != Some(false),
            Ok(None) => true,
            Err(e) => {
                warn!("Could not read enable flag, treating as disabled: {}", e);
                false
            }
        }
    }

    pub async fn set_extension_enabled(&self, enabled: bool) -> Result<()> {
        self.kv.set(ENABLED_KEY, Value::Bool(enabled)).await
    }

    // --- debug ring buffer ---

    pub async fn append_debug(&self, entry: DebugEntry) -> Result<()> {
        let mut entries = self.debug_log().await?;
        entries.push(entry);
        if entries.len() > DEBUG_LOG_CAPACITY {
            let excess = entries.len() - DEBUG_LOG_CAPACITY;
            entries.drain(..excess);
        }
        self.save(DEBUG_LOG_KEY, &entries).await
    }

    pub async fn debug_log(&self) -> Result<Vec<DebugEntry>> {
        Ok(self.load(DEBUG_LOG_KEY).await?.unwrap_or_default())
    }

    // --- coordinator options ---

    pub async fn coordinator_options(&self) -> Result<CoordinatorOptions> {
        Ok(self.load(OPTIONS_KEY).await?.unwrap_or_default())
    }

    pub async fn put_coordinator_options(&self, options: &CoordinatorOptions) -> Result<()> {
        self.save(OPTIONS_KEY, options).await
    }
}

/// In-memory `KvStore` for tests, with an injectable read failure.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<std::collections::BTreeMap<String, Value>>,
    pub fail_reads: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("storage unavailable");
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
