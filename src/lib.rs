//! Distributed reader/writer lock over a shared key-value store.
//!
//! Processes that cannot share memory use a [`Locker`] to gate access to an
//! external resource: any number of readers may hold the lock together, a
//! writer holds it alone. Ownership lives in three store keys with a lease
//! TTL, so a crashed holder blocks others for at most one lease period.
//!
//! ```ignore
//! use std::{convert::Infallible, sync::Arc};
//! use kv_rwlock::{LockKeys, Locker, Options, RedisStore};
//!
//! let store = Arc::new(RedisStore::open("redis://127.0.0.1:6379/9").await?);
//! let locker = Locker::new(
//!     store,
//!     LockKeys::new("GLOBAL_LOCK", "READER_COUNT", "WRITER_INTENT"),
//!     Options::default(),
//! );
//!
//! locker
//!     .run_exclusive(|| async {
//!         // only this task, in any process, is in here
//!         Ok::<_, Infallible>(())
//!     })
//!     .await?;
//! ```

mod error;
mod lease;
mod locker;
mod options;
mod store;
mod token;
mod util;

pub use error::{BoxError, CallbackFault, LockError, StoreError};
pub use locker::Locker;
pub use options::{Mode, Options, DEFAULT_READER_TOKEN};
pub use store::{LockKeys, LockStore, MemoryStore, RedisStore};
pub use tokio_util::sync::CancellationToken;
