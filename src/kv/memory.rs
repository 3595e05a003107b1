//! In-Process TTL Key Store
//!
//! Keys map to deadlines. `sweep_expired` removes lapsed keys and publishes
//! `expired` notifications; every TTL write publishes `expire`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use super::{expire_channel, expired_channel, KeyValueStore, KeyspaceEvent, KvError};

const NOTIFICATION_BUFFER: usize = 1024;

/// TTL key store with keyspace notifications
pub struct MemoryKeyStore {
    db_index: u32,
    entries: RwLock<HashMap<String, Instant>>,
    events: broadcast::Sender<KeyspaceEvent>,
}

impl MemoryKeyStore {
    pub fn new(db_index: u32) -> Self {
        let (events, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            db_index,
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn db_index(&self) -> u32 {
        self.db_index
    }

    fn publish(&self, channel: String, key: &str) {
        // No subscribers is fine; notifications are fire-and-forget
        let _ = self.events.send(KeyspaceEvent {
            channel,
            key: key.to_string(),
        });
    }

    /// Remove every key whose deadline has passed and notify `expired` for each
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let lapsed: Vec<String> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        for key in &lapsed {
            tracing::debug!(key = %key, "Key expired");
            self.publish(expired_channel(self.db_index), key);
        }

        lapsed
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyStore {
    async fn scan_keys(&self) -> Result<Vec<String>, KvError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(_, deadline)| **deadline > now)
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        if key.is_empty() {
            return Err(KvError::InvalidKey("empty key".to_string()));
        }
        self.entries
            .write()
            .await
            .insert(key.to_string(), Instant::now() + ttl);
        self.publish(expire_channel(self.db_index), key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    fn subscribe(&self) -> broadcast::Receiver<KeyspaceEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KeyspaceEventKind;

    #[tokio::test]
    async fn test_set_publishes_expire_and_is_scannable() {
        let store = MemoryKeyStore::new(0);
        let mut rx = store.subscribe();

        store.set_with_ttl("0:aa", Duration::from_secs(60)).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "0:aa");
        assert_eq!(event.kind(0), Some(KeyspaceEventKind::Expire));
        assert_eq!(store.scan_keys().await.unwrap(), vec!["0:aa".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_removes_lapsed_keys() {
        let store = MemoryKeyStore::new(2);
        store.set_with_ttl("short", Duration::from_millis(1)).await.unwrap();
        store.set_with_ttl("long", Duration::from_secs(60)).await.unwrap();
        let mut rx = store.subscribe();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.scan_keys().await.unwrap(), vec!["long".to_string()]);

        let lapsed = store.sweep_expired().await;
        assert_eq!(lapsed, vec!["short".to_string()]);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "short");
        assert_eq!(event.kind(2), Some(KeyspaceEventKind::Expired));
    }

    #[tokio::test]
    async fn test_delete_does_not_notify_expired() {
        let store = MemoryKeyStore::new(0);
        store.set_with_ttl("k", Duration::from_millis(1)).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.sweep_expired().await.is_empty());
    }
}
