//! Redis lock backend
//!
//! `SET key token NX PX ttl` to acquire, Lua compare-and-delete /
//! compare-and-pexpire for release and extend. The connection manager is
//! created lazily so an unreachable Redis at startup only means "not acquired".

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use super::{LockBackend, LockError};

static RELEASE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end
        "#,
    )
});

static EXTEND_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('PEXPIRE', KEYS[1], ARGV[2])
        else
            return 0
        end
        "#,
    )
});

pub struct RedisLockBackend {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
}

impl RedisLockBackend {
    /// Parse the URL; no connection is made until first use
    pub fn new(url: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(url).map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, LockError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| LockError::Unavailable(e.to_string()))?;
        info!("Connected to Redis lock store");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX rejects 0
    (ttl.as_millis() as u64).max(1)
}

fn map_err(e: redis::RedisError) -> LockError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        LockError::Unavailable(e.to_string())
    } else {
        LockError::Backend(e.to_string())
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = RELEASE_SCRIPT
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(deleted == 1)
    }

    async fn expire_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let updated: i64 = EXTEND_SCRIPT
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(updated == 1)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisLockBackend::new("not a url").is_err());
    }
}
