use std::{sync::LazyLock, time::Duration};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script, ScriptInvocation};
use tracing::trace;

use super::{ttl_millis, LockKeys, LockStore};
use crate::error::StoreError;

// KEYS = [LOCK, READERS_COUNT, WRITER_INTENT]
// ARGV = [TOKEN, TTL_MS, PREFER_WRITER]
const ACQUIRE_READ_SCRIPT: &str = r#"
if ARGV[3] == "1" and redis.call("EXISTS", KEYS[3]) == 1 then
    return 0
end
local count = redis.call("INCR", KEYS[2])
if count ~= 1 then
    local holder = redis.call("GET", KEYS[1])
    if holder == ARGV[1] then
        if redis.call("PTTL", KEYS[1]) < tonumber(ARGV[2]) then
            redis.call("PEXPIRE", KEYS[1], ARGV[2])
        end
        return 1
    end
    if holder then
        redis.call("DECR", KEYS[2])
        return 0
    end
    -- stale count left by an expired reader group
    redis.call("SET", KEYS[2], 1)
end
if redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2], "NX") then
    return 1
end
redis.call("DECR", KEYS[2])
return 0
"#;

// KEYS = [LOCK, READERS_COUNT]
// ARGV = [TOKEN]
const RELEASE_READ_SCRIPT: &str = r#"
local count = redis.call("DECR", KEYS[2])
if count > 0 then
    return 1
end
if count == 0 and redis.call("GET", KEYS[1]) == ARGV[1] then
    redis.call("DEL", KEYS[1], KEYS[2])
    return 1
end
if count < 0 then
    redis.call("DEL", KEYS[2])
end
return 0
"#;

// KEYS = [LOCK]
// ARGV = [TOKEN, TTL_MS]
const REFRESH_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

// KEYS = [LOCK, READERS_COUNT, WRITER_INTENT]
// ARGV = [TOKEN, TTL_MS]
const ACQUIRE_WRITE_SCRIPT: &str = r#"
redis.call("SET", KEYS[3], 1, "PX", ARGV[2])
if redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2], "NX") then
    redis.call("DEL", KEYS[2], KEYS[3])
    return 1
end
return 0
"#;

// KEYS = [LOCK]
// ARGV = [TOKEN]
const RELEASE_WRITE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    redis.call("DEL", KEYS[1])
    return 1
end
return 0
"#;

struct LockScripts {
    acquire_read: Script,
    release_read: Script,
    refresh: Script,
    acquire_write: Script,
    release_write: Script,
}

static SCRIPTS: LazyLock<LockScripts> = LazyLock::new(|| LockScripts {
    acquire_read: Script::new(ACQUIRE_READ_SCRIPT),
    release_read: Script::new(RELEASE_READ_SCRIPT),
    refresh: Script::new(REFRESH_SCRIPT),
    acquire_write: Script::new(ACQUIRE_WRITE_SCRIPT),
    release_write: Script::new(RELEASE_WRITE_SCRIPT),
});

/// Lock store backed by Redis Lua scripts.
///
/// Scripts are sent with `EVALSHA` and loaded on first use. A single Redis
/// primary is assumed; failover may lose a lease.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Connects to `url`, e.g. `redis://127.0.0.1:6379/9`.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::new(connection))
    }

    async fn invoke(
        &self,
        operation: &'static str,
        invocation: ScriptInvocation<'_>,
    ) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let status: i64 = invocation.invoke_async(&mut connection).await?;
        trace!(operation, status, "lock script finished");
        Ok(status == 1)
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }

    async fn acquire_read(
        &self,
        keys: &LockKeys,
        token: &str,
        ttl: Duration,
        prefer_writer: bool,
    ) -> Result<bool, StoreError> {
        let mut invocation = SCRIPTS.acquire_read.prepare_invoke();
        invocation
            .key(keys.lock.as_str())
            .key(keys.readers_count.as_str())
            .key(keys.writer_intent.as_str())
            .arg(token)
            .arg(ttl_millis(ttl))
            .arg(if prefer_writer { "1" } else { "0" });
        self.invoke("acquire_read", invocation).await
    }

    async fn release_read(&self, keys: &LockKeys, token: &str) -> Result<bool, StoreError> {
        let mut invocation = SCRIPTS.release_read.prepare_invoke();
        invocation
            .key(keys.lock.as_str())
            .key(keys.readers_count.as_str())
            .arg(token);
        self.invoke("release_read", invocation).await
    }

    async fn refresh(
        &self,
        keys: &LockKeys,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut invocation = SCRIPTS.refresh.prepare_invoke();
        invocation
            .key(keys.lock.as_str())
            .arg(token)
            .arg(ttl_millis(ttl));
        self.invoke("refresh", invocation).await
    }

    async fn acquire_write(
        &self,
        keys: &LockKeys,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut invocation = SCRIPTS.acquire_write.prepare_invoke();
        invocation
            .key(keys.lock.as_str())
            .key(keys.readers_count.as_str())
            .key(keys.writer_intent.as_str())
            .arg(token)
            .arg(ttl_millis(ttl));
        self.invoke("acquire_write", invocation).await
    }

    async fn release_write(&self, keys: &LockKeys, token: &str) -> Result<bool, StoreError> {
        let mut invocation = SCRIPTS.release_write.prepare_invoke();
        invocation.key(keys.lock.as_str()).arg(token);
        self.invoke("release_write", invocation).await
    }
}
