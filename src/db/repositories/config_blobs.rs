use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::collaborators::ConfigStore;
use crate::db::Database;

impl Database {
    pub async fn get_blob(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM config_blobs WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .with_context(|| format!("failed to read config blob '{key}'"))?;
            Ok(value)
        })
        .await
    }

    pub async fn put_blob(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let now = Utc::now().to_rfc3339();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO config_blobs (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| format!("failed to write config blob '{key}'"))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ConfigStore for Database {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        self.get_blob(key).await
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.put_blob(key, value).await
    }
}
