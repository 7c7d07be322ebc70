//! Session key/value storage.
//!
//! Holds the per-session working state of the discovery workflow (messages,
//! drafts, selections). Reads and writes are best-effort: callers treat a miss
//! or a storage error as "nothing cached".

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Session entries expire after a week of inactivity.
const SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

pub const MESSAGES_KEY: &str = "messages";
pub const NARRATIVES_KEY: &str = "narratives";
pub const VOCATIONAL_STATEMENT_KEY: &str = "vocational_statement";
pub const SELECTED_SCENARIOS_KEY: &str = "selected_scenarios";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Namespaces a well-known key under a session.
pub fn session_key(session_id: Uuid, key: &str) -> String {
    format!("narrative:{session_id}:{key}")
}

/// Reads and deserializes a JSON value. Misses, storage errors and stale shapes all yield `None`.
pub async fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read '{key}' from session store: {e:#}");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring stale value under '{key}': {e}");
            None
        }
    }
}

/// Serializes and writes a JSON value, logging instead of failing.
pub async fn save_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to serialize value for '{key}': {e}");
            return;
        }
    };
    if let Err(e) = store.set(key, &raw).await {
        warn!("Failed to write '{key}' to session store: {e:#}");
    }
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        info!("Redis session store connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, SESSION_TTL_SECS as _).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
