use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};

use super::{LockKeys, LockStore};
use crate::error::StoreError;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Redis-like keyspace with millisecond expiry on the tokio clock.
#[derive(Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn get(&mut self, key: &str) -> Option<String> {
        self.live(key).map(|e| e.value.clone())
    }

    fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    fn holds(&mut self, key: &str, token: &str) -> bool {
        self.live(key).is_some_and(|e| e.value == token)
    }

    fn set(&mut self, key: &str, value: impl Into<String>, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at,
            },
        );
    }

    fn set_nx(&mut self, key: &str, value: &str, ttl: Duration) -> bool {
        if self.exists(key) {
            return false;
        }
        self.set(key, value, Some(ttl));
        true
    }

    /// INCRBY semantics: a missing key counts as zero and the expiry is kept.
    fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let current = match self.live(key) {
            Some(entry) => entry.value.parse::<i64>().map_err(|_| StoreError::Corrupted {
                key: key.to_string(),
                reason: format!("'{}' is not an integer", entry.value),
            })?,
            None => 0,
        };
        let next = current + delta;
        match self.live(key) {
            Some(entry) => entry.value = next.to_string(),
            None => self.set(key, next.to_string(), None),
        }
        Ok(next)
    }

    fn pexpire(&mut self, key: &str, ttl: Duration) -> bool {
        match self.live(key) {
            Some(entry) => {
                entry.expires_at = Instant::now().checked_add(ttl);
                true
            }
            None => false,
        }
    }

    /// Pushes the expiry out to `ttl` from now, never pulling it in.
    fn extend(&mut self, key: &str, ttl: Duration) {
        let target = Instant::now().checked_add(ttl);
        if let Some(entry) = self.live(key) {
            if let Some(at) = entry.expires_at {
                entry.expires_at = target.map(|target| target.max(at));
            }
        }
    }

    fn del(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// In-process [`LockStore`] with the same semantics as the Redis scripts.
///
/// Each operation holds the keyspace guard for its whole duration, so no
/// intermediate state is observable. Useful for tests and for locks that
/// only ever coordinate tasks of one process.
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    reachable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Current value of `key`, if present and not expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.keyspace.lock().await.get(key)
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.keyspace.lock().await.exists(key)
    }

    /// Deletes `key` outright, bypassing the protocol.
    pub async fn remove(&self, key: &str) {
        self.keyspace.lock().await.del(key);
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "memory store marked unreachable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_reachable()
    }

    async fn acquire_read(
        &self,
        keys: &LockKeys,
        token: &str,
        ttl: Duration,
        prefer_writer: bool,
    ) -> Result<bool, StoreError> {
        self.check_reachable()?;
        let mut ks = self.keyspace.lock().await;

        if prefer_writer && ks.exists(&keys.writer_intent) {
            return Ok(false);
        }
        let count = ks.incr_by(&keys.readers_count, 1)?;
        if count != 1 {
            match ks.get(&keys.lock) {
                Some(holder) if holder == token => {
                    ks.extend(&keys.lock, ttl);
                    return Ok(true);
                }
                Some(_) => {
                    ks.incr_by(&keys.readers_count, -1)?;
                    return Ok(false);
                }
                // stale count left by an expired reader group
                None => ks.set(&keys.readers_count, "1", None),
            }
        }
        if ks.set_nx(&keys.lock, token, ttl) {
            return Ok(true);
        }
        ks.incr_by(&keys.readers_count, -1)?;
        Ok(false)
    }

    async fn release_read(&self, keys: &LockKeys, token: &str) -> Result<bool, StoreError> {
        self.check_reachable()?;
        let mut ks = self.keyspace.lock().await;

        let count = ks.incr_by(&keys.readers_count, -1)?;
        if count > 0 {
            return Ok(true);
        }
        if count == 0 && ks.holds(&keys.lock, token) {
            ks.del(&keys.lock);
            ks.del(&keys.readers_count);
            return Ok(true);
        }
        if count < 0 {
            ks.del(&keys.readers_count);
        }
        Ok(false)
    }

    async fn refresh(
        &self,
        keys: &LockKeys,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_reachable()?;
        let mut ks = self.keyspace.lock().await;

        if ks.holds(&keys.lock, token) {
            return Ok(ks.pexpire(&keys.lock, ttl));
        }
        Ok(false)
    }

    async fn acquire_write(
        &self,
        keys: &LockKeys,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_reachable()?;
        let mut ks = self.keyspace.lock().await;

        ks.set(&keys.writer_intent, "1", Some(ttl));
        if ks.set_nx(&keys.lock, token, ttl) {
            ks.del(&keys.readers_count);
            ks.del(&keys.writer_intent);
            return Ok(true);
        }
        Ok(false)
    }

    async fn release_write(&self, keys: &LockKeys, token: &str) -> Result<bool, StoreError> {
        self.check_reachable()?;
        let mut ks = self.keyspace.lock().await;

        if ks.holds(&keys.lock, token) {
            ks.del(&keys.lock);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(1);

    fn keys() -> LockKeys {
        LockKeys::new("lock", "readers", "intent")
    }

    #[tokio::test]
    async fn first_reader_takes_the_record() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        assert_eq!(store.get("lock").await.as_deref(), Some("group"));
        assert_eq!(store.get("readers").await.as_deref(), Some("1"));

        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        assert_eq!(store.get("readers").await.as_deref(), Some("2"));

        assert!(store.release_read(&keys, "group").await.unwrap());
        assert!(store.exists("lock").await);
        assert!(store.release_read(&keys, "group").await.unwrap());
        assert!(!store.exists("lock").await);
        assert!(!store.exists("readers").await);
    }

    #[tokio::test]
    async fn writer_blocks_readers_and_restores_count() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_write(&keys, "w1", TTL).await.unwrap());
        assert!(!store.exists("intent").await);

        assert!(!store.acquire_read(&keys, "group", TTL, false).await.unwrap());
        assert_eq!(store.get("readers").await.as_deref(), Some("0"));

        assert!(store.release_write(&keys, "w1").await.unwrap());
        assert!(store.acquire_read(&keys, "group", TTL, false).await.unwrap());
    }

    #[tokio::test]
    async fn readers_block_writer_but_intent_remains() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        assert!(!store.acquire_write(&keys, "w1", TTL).await.unwrap());
        assert!(store.exists("intent").await);

        // prefer-writer refuses new readers, prefer-reader lets them join
        assert!(!store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        assert!(store.acquire_read(&keys, "group", TTL, false).await.unwrap());
        assert_eq!(store.get("readers").await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn other_reader_group_cannot_join() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_read(&keys, "group-a", TTL, true).await.unwrap());
        assert!(!store.acquire_read(&keys, "group-b", TTL, true).await.unwrap());
        assert_eq!(store.get("readers").await.as_deref(), Some("1"));
        assert_eq!(store.get("lock").await.as_deref(), Some("group-a"));
    }

    #[tokio::test]
    async fn stale_tokens_never_mutate_the_record() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_write(&keys, "owner", TTL).await.unwrap());
        assert!(!store.refresh(&keys, "stale", TTL).await.unwrap());
        assert!(!store.release_write(&keys, "stale").await.unwrap());
        assert_eq!(store.get("lock").await.as_deref(), Some("owner"));
        assert!(store.refresh(&keys, "owner", TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire_and_refresh_extends_them() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_write(&keys, "w1", TTL).await.unwrap());
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(store.refresh(&keys, "w1", TTL).await.unwrap());
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(store.exists("lock").await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!store.exists("lock").await);
        assert!(!store.refresh(&keys, "w1", TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn joining_reader_extends_the_lease() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.get("lock").await.as_deref(), Some("group"));

        // a shorter lease never pulls the expiry in
        assert!(store
            .acquire_read(&keys, "group", Duration::from_millis(100), true)
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.exists("lock").await);
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow_the_clock() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_write(&keys, "w1", Duration::MAX).await.unwrap());
        assert!(store.refresh(&keys, "w1", Duration::MAX).await.unwrap());
        assert!(store.release_write(&keys, "w1").await.unwrap());

        assert!(store.acquire_read(&keys, "group", Duration::MAX, true).await.unwrap());
        assert!(store.acquire_read(&keys, "group", Duration::MAX, true).await.unwrap());
        assert_eq!(store.get("readers").await.as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reader_count_is_reset_after_expiry() {
        let store = MemoryStore::new();
        let keys = keys();

        // a reader group crashes without releasing
        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        tokio::time::sleep(TTL + Duration::from_millis(1)).await;

        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        assert_eq!(store.get("readers").await.as_deref(), Some("1"));
        assert_eq!(store.get("lock").await.as_deref(), Some("group"));
    }

    #[tokio::test(start_paused = true)]
    async fn reader_release_after_writer_takeover_fails() {
        let store = MemoryStore::new();
        let keys = keys();

        assert!(store.acquire_read(&keys, "group", TTL, true).await.unwrap());
        tokio::time::sleep(TTL + Duration::from_millis(1)).await;
        assert!(store.acquire_write(&keys, "w1", TTL).await.unwrap());

        assert!(!store.release_read(&keys, "group").await.unwrap());
        assert!(!store.exists("readers").await);
        assert_eq!(store.get("lock").await.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn unreachable_store_errors() {
        let store = MemoryStore::new();
        store.set_reachable(false);
        assert!(matches!(
            store.ping().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.acquire_write(&keys(), "w1", TTL).await.is_err());

        store.set_reachable(true);
        assert!(store.ping().await.is_ok());
    }
}
