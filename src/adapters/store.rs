use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::adapters::{AdapterError, EphemeralStore};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process ephemeral store. Expired keys are dropped when read and by
/// the periodic purge.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().expires_at > now)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

pub async fn run_store_purger(store: Arc<MemoryStore>, every: Duration) {
    info!(interval_seconds = every.as_secs(), "store purge started");
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        match store.purge_expired() {
            0 => {}
            purged => debug!(purged, remaining = store.len(), "purged expired store entries"),
        }
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn set_with_expiration(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), AdapterError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AdapterError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), AdapterError> {
        self.entries.remove(key);
        Ok(())
    }
}
