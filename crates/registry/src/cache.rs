//! In-process TTL cache for module lookups.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Thread-safe map whose entries expire after a fixed TTL.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, (V, Instant)>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        let (value, inserted_at) = entries.get(key)?;
        if inserted_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(key.into(), (value, Instant::now()));
    }
}
