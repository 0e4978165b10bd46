//! Atomic lock protocol.
//!
//! Every mutation of the three lock keys goes through one of the five
//! operations on [`LockStore`]. Each operation is a single indivisible
//! transaction on the store side; no other code path reads and then writes
//! those keys.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Names of the three keys a lock lives in. They must not collide with unrelated data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKeys {
    /// Holds the token of the current writer or reader group.
    pub lock: String,
    /// Number of readers inside the current reader group.
    pub readers_count: String,
    /// Present while a writer is trying to acquire.
    pub writer_intent: String,
}

impl LockKeys {
    pub fn new(
        lock: impl Into<String>,
        readers_count: impl Into<String>,
        writer_intent: impl Into<String>,
    ) -> Self {
        Self {
            lock: lock.into(),
            readers_count: readers_count.into(),
            writer_intent: writer_intent.into(),
        }
    }
}

/// A key-value store able to run the lock protocol atomically.
///
/// Every operation returns `Ok(false)` when the lock state does not permit it
/// and `Err` only on transport or script failures.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Joins or founds the reader group identified by `token`.
    ///
    /// Refused while writer intent is present if `prefer_writer` is set, and
    /// whenever the lock record belongs to someone else.
    async fn acquire_read(
        &self,
        keys: &LockKeys,
        token: &str,
        ttl: Duration,
        prefer_writer: bool,
    ) -> Result<bool, StoreError>;

    /// Leaves the reader group. The last reader deletes the lock record, but
    /// only if it still holds `token`.
    async fn release_read(&self, keys: &LockKeys, token: &str) -> Result<bool, StoreError>;

    /// Extends the lease if the lock record still holds `token`.
    async fn refresh(&self, keys: &LockKeys, token: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Announces writer intent, then takes the lock record if it is free.
    async fn acquire_write(
        &self,
        keys: &LockKeys,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Deletes the lock record if it still holds `token`.
    async fn release_write(&self, keys: &LockKeys, token: &str) -> Result<bool, StoreError>;
}

/// Milliseconds for `PX`/`PEXPIRE`, never zero. Saturates instead of
/// wrapping for absurdly long leases.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
