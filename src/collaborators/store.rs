use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

/// Key/value blob storage for JSON documents. A missing key is not an error.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// Load and decode a JSON blob. Read failures and undecodable blobs are
/// logged and reported as absent.
pub async fn load_json<T: DeserializeOwned>(store: &dyn ConfigStore, key: &str) -> Option<T> {
    let raw = match store.load(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!("Failed to read '{key}' from config store: {err:?}");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("Discarding unreadable '{key}' blob: {err}");
            None
        }
    }
}

pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn ConfigStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let serialized =
        serde_json::to_string(value).with_context(|| format!("failed to serialize '{key}'"))?;
    store
        .save(key, &serialized)
        .await
        .with_context(|| format!("failed to save '{key}'"))
}

/// Non-persistent store, used when no database is available and in tests.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
