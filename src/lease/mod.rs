use std::{fmt, time::Duration};

use crate::{
    error::StoreError,
    options::Mode,
    store::{LockKeys, LockStore},
};

mod renewer;

pub(crate) use renewer::LeaseRenewer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Reader,
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Reader => f.write_str("reader"),
            Role::Writer => f.write_str("writer"),
        }
    }
}

/// The role and token one call acquires, refreshes and releases with.
#[derive(Debug, Clone)]
pub(crate) struct Lease {
    pub(crate) role: Role,
    pub(crate) token: String,
}

impl Lease {
    pub(crate) fn reader(token: impl Into<String>) -> Self {
        Self {
            role: Role::Reader,
            token: token.into(),
        }
    }

    pub(crate) fn writer(token: impl Into<String>) -> Self {
        Self {
            role: Role::Writer,
            token: token.into(),
        }
    }

    pub(crate) async fn acquire<S: LockStore + ?Sized>(
        &self,
        store: &S,
        keys: &LockKeys,
        ttl: Duration,
        mode: Mode,
    ) -> Result<bool, StoreError> {
        match self.role {
            Role::Reader => {
                store
                    .acquire_read(keys, &self.token, ttl, mode.prefers_writer())
                    .await
            }
            Role::Writer => store.acquire_write(keys, &self.token, ttl).await,
        }
    }

    pub(crate) async fn refresh<S: LockStore + ?Sized>(
        &self,
        store: &S,
        keys: &LockKeys,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        store.refresh(keys, &self.token, ttl).await
    }

    pub(crate) async fn release<S: LockStore + ?Sized>(
        &self,
        store: &S,
        keys: &LockKeys,
    ) -> Result<bool, StoreError> {
        match self.role {
            Role::Reader => store.release_read(keys, &self.token).await,
            Role::Writer => store.release_write(keys, &self.token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const TTL: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn roles_dispatch_to_their_operations() {
        let store = MemoryStore::new();
        let keys = LockKeys::new("lock", "readers", "intent");
        let reader = Lease::reader("group");
        let writer = Lease::writer("w1");

        assert!(reader.acquire(&store, &keys, TTL, Mode::PreferWriter).await.unwrap());
        assert_eq!(store.get("readers").await.as_deref(), Some("1"));
        assert!(!writer.acquire(&store, &keys, TTL, Mode::PreferWriter).await.unwrap());

        assert!(reader.refresh(&store, &keys, TTL).await.unwrap());
        assert!(!writer.refresh(&store, &keys, TTL).await.unwrap());

        assert!(reader.release(&store, &keys).await.unwrap());
        assert!(writer.acquire(&store, &keys, TTL, Mode::PreferWriter).await.unwrap());
        assert_eq!(store.get("lock").await.as_deref(), Some("w1"));
        assert!(writer.release(&store, &keys).await.unwrap());
        assert!(!store.exists("lock").await);
    }

    #[tokio::test]
    async fn reader_mode_decides_whether_intent_blocks() {
        let store = MemoryStore::new();
        let keys = LockKeys::new("lock", "readers", "intent");
        let reader = Lease::reader("group");

        assert!(reader.acquire(&store, &keys, TTL, Mode::PreferWriter).await.unwrap());
        assert!(!Lease::writer("w1").acquire(&store, &keys, TTL, Mode::PreferWriter).await.unwrap());

        assert!(!reader.acquire(&store, &keys, TTL, Mode::PreferWriter).await.unwrap());
        assert!(reader.acquire(&store, &keys, TTL, Mode::PreferReader).await.unwrap());
    }
}
