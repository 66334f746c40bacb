//! Queue store backends
//!
//! The partitioned queue keeps all of its state in a list/hash store behind
//! the `QueueStore` trait: one FIFO list per topic, one in-flight list per
//! `(topic, consumer)`, and a hash of first-pop timestamps. The required
//! atomic head-to-tail move for `pop` is pushed into the backend.
//!
//! `RedisQueueStore` is the production backend. Its connection is obtained
//! lazily and re-used, so a store outage surfaces as per-operation errors
//! that degrade queue endpoints without taking the node down.
//! `MemoryQueueStore` mirrors the same contract for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use quorum_traits::{CoordinationError, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append to the tail of a list
    async fn push_back(&self, key: &str, message: &str) -> Result<()>;

    /// Insert at the head of a list (timeout redelivery)
    async fn push_front(&self, key: &str, message: &str) -> Result<()>;

    /// Atomically move the head of `from` to the tail of `to`
    async fn move_head_to_tail(&self, from: &str, to: &str) -> Result<Option<String>>;

    /// Remove one occurrence of `message`; returns the removal count
    async fn remove_one(&self, key: &str, message: &str) -> Result<usize>;

    /// Full contents of a list, head first
    async fn list(&self, key: &str) -> Result<Vec<String>>;

    /// Every non-empty `processing:*` key
    async fn processing_keys(&self) -> Result<Vec<String>>;

    /// Record the first-pop time of a message
    async fn set_timestamp(&self, key: &str, message: &str, epoch_secs: f64) -> Result<()>;

    /// Drop the timestamp entry of a message
    async fn delete_timestamp(&self, key: &str, message: &str) -> Result<()>;

    /// All timestamp entries under a key
    async fn timestamps(&self, key: &str) -> Result<HashMap<String, f64>>;
}

fn store_err(e: redis::RedisError) -> CoordinationError {
    CoordinationError::store_error(e.to_string())
}

/// Redis-backed queue store
pub struct RedisQueueStore {
    client: redis::Client,
    manager: tokio::sync::Mutex<Option<ConnectionManager>>,
}

impl RedisQueueStore {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client =
            redis::Client::open(format!("redis://{host}:{port}/")).map_err(store_err)?;
        Ok(Self {
            client,
            manager: tokio::sync::Mutex::new(None),
        })
    }

    /// Lazily connect; a failed attempt is retried on the next operation
    async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.manager.lock().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }
        let manager = self
            .client
            .get_tokio_connection_manager()
            .await
            .map_err(store_err)?;
        debug!("queue store connected to redis");
        *guard = Some(manager.clone());
        Ok(manager)
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn push_back(&self, key: &str, message: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.rpush(key, message).await.map_err(store_err)?;
        Ok(())
    }

    async fn push_front(&self, key: &str, message: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.lpush(key, message).await.map_err(store_err)?;
        Ok(())
    }

    async fn move_head_to_tail(&self, from: &str, to: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let moved: Option<String> = conn
            .lmove(from, to, Direction::Left, Direction::Right)
            .await
            .map_err(store_err)?;
        Ok(moved)
    }

    async fn remove_one(&self, key: &str, message: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        let removed: usize = conn.lrem(key, 1, message).await.map_err(store_err)?;
        Ok(removed)
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let items: Vec<String> = conn.lrange(key, 0, -1).await.map_err(store_err)?;
        Ok(items)
    }

    async fn processing_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.keys("processing:*").await.map_err(store_err)?;
        Ok(keys)
    }

    async fn set_timestamp(&self, key: &str, message: &str, epoch_secs: f64) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.hset(key, message, epoch_secs).await.map_err(store_err)?;
        Ok(())
    }

    async fn delete_timestamp(&self, key: &str, message: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.hdel(key, message).await.map_err(store_err)?;
        Ok(())
    }

    async fn timestamps(&self, key: &str) -> Result<HashMap<String, f64>> {
        let mut conn = self.connection().await?;
        let entries: HashMap<String, f64> = conn.hgetall(key).await.map_err(store_err)?;
        Ok(entries)
    }
}

/// In-memory queue store with redis list/hash semantics
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    hashes: Mutex<HashMap<String, HashMap<String, f64>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push_back(&self, key: &str, message: &str) -> Result<()> {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(message.to_string());
        Ok(())
    }

    async fn push_front(&self, key: &str, message: &str) -> Result<()> {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_front(message.to_string());
        Ok(())
    }

    async fn move_head_to_tail(&self, from: &str, to: &str) -> Result<Option<String>> {
        let mut lists = self.lists.lock();
        let Some(head) = lists.get_mut(from).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        if lists.get(from).is_some_and(VecDeque::is_empty) {
            lists.remove(from);
        }
        lists
            .entry(to.to_string())
            .or_default()
            .push_back(head.clone());
        Ok(Some(head))
    }

    async fn remove_one(&self, key: &str, message: &str) -> Result<usize> {
        let mut lists = self.lists.lock();
        let Some(list) = lists.get_mut(key) else {
            return Ok(0);
        };
        let removed = match list.iter().position(|m| m == message) {
            Some(at) => {
                list.remove(at);
                1
            }
            None => 0,
        };
        if list.is_empty() {
            lists.remove(key);
        }
        Ok(removed)
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .lists
            .lock()
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn processing_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .lists
            .lock()
            .iter()
            .filter(|(key, list)| key.starts_with("processing:") && !list.is_empty())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn set_timestamp(&self, key: &str, message: &str, epoch_secs: f64) -> Result<()> {
        self.hashes
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(message.to_string(), epoch_secs);
        Ok(())
    }

    async fn delete_timestamp(&self, key: &str, message: &str) -> Result<()> {
        let mut hashes = self.hashes.lock();
        if let Some(entries) = hashes.get_mut(key) {
            entries.remove(message);
            if entries.is_empty() {
                hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn timestamps(&self, key: &str) -> Result<HashMap<String, f64>> {
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let store = MemoryQueueStore::new();
        store.push_back("queue:t", "m1").await.unwrap();
        store.push_back("queue:t", "m2").await.unwrap();
        store.push_front("queue:t", "m0").await.unwrap();
        assert_eq!(store.list("queue:t").await.unwrap(), vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_move_head_to_tail() {
        let store = MemoryQueueStore::new();
        store.push_back("queue:t", "m1").await.unwrap();
        store.push_back("queue:t", "m2").await.unwrap();

        let moved = store
            .move_head_to_tail("queue:t", "processing:t:c1")
            .await
            .unwrap();
        assert_eq!(moved.as_deref(), Some("m1"));
        assert_eq!(store.list("queue:t").await.unwrap(), vec!["m2"]);
        assert_eq!(store.list("processing:t:c1").await.unwrap(), vec!["m1"]);

        let empty = store
            .move_head_to_tail("queue:absent", "processing:t:c1")
            .await
            .unwrap();
        assert!(empty.is_none());
    }

    #[tokio::test]
    async fn test_remove_one_removes_exactly_one() {
        let store = MemoryQueueStore::new();
        store.push_back("processing:t:c1", "m").await.unwrap();
        store.push_back("processing:t:c1", "m").await.unwrap();

        assert_eq!(store.remove_one("processing:t:c1", "m").await.unwrap(), 1);
        assert_eq!(store.list("processing:t:c1").await.unwrap(), vec!["m"]);
        assert_eq!(store.remove_one("processing:t:c1", "m").await.unwrap(), 1);
        assert_eq!(store.remove_one("processing:t:c1", "m").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_processing_keys_skips_drained_lists() {
        let store = MemoryQueueStore::new();
        store.push_back("processing:t:c1", "m").await.unwrap();
        store.push_back("queue:t", "m").await.unwrap();
        assert_eq!(
            store.processing_keys().await.unwrap(),
            vec!["processing:t:c1"]
        );

        store.remove_one("processing:t:c1", "m").await.unwrap();
        assert!(store.processing_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timestamp_lifecycle() {
        let store = MemoryQueueStore::new();
        store
            .set_timestamp("timestamps:t:c1", "m", 100.0)
            .await
            .unwrap();
        let entries = store.timestamps("timestamps:t:c1").await.unwrap();
        assert_eq!(entries.get("m"), Some(&100.0));

        store.delete_timestamp("timestamps:t:c1", "m").await.unwrap();
        assert!(store.timestamps("timestamps:t:c1").await.unwrap().is_empty());
    }
}
