//! Distributed Lock
//!
//! Cross-process mutual exclusion keyed by name:
//! - Atomic set-if-absent with expiry on a shared backend
//! - Per-acquisition owner token so only the owner can release/extend
//! - Fail closed: backend errors read as "not acquired"

mod memory;
mod redis_store;

pub use self::memory::InMemoryLockBackend;
pub use self::redis_store::RedisLockBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;

/// Errors raised by lock backends
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock backend unavailable: {0}")]
    Unavailable(String),

    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Key-value store primitives a lock needs
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Set `key = token` only if absent or expired
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Delete `key` only if it still holds `token`
    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError>;

    /// Reset the expiry of `key` only if it still holds `token`
    async fn expire_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Proof of lock ownership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub owner_token: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl LockHandle {
    /// When the backend will auto-release this lock
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Named lock over a shared backend
pub struct DistributedLock {
    backend: Arc<dyn LockBackend>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn LockBackend>, clock: Arc<dyn Clock>) -> Self {
        Self::with_prefix(backend, clock, "persona:lock:")
    }

    pub fn with_prefix(backend: Arc<dyn LockBackend>, clock: Arc<dyn Clock>, prefix: &str) -> Self {
        Self {
            backend,
            clock,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Try to take the lock. `None` means someone else holds it or the
    /// backend could not be reached.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> Option<LockHandle> {
        let token = uuid::Uuid::new_v4().to_string();
        let acquired_at = self.clock.now();

        match self.backend.set_if_absent(&self.key(name), &token, ttl).await {
            Ok(true) => {
                debug!("Lock acquired: {} ({})", name, &token[..8]);
                Some(LockHandle {
                    name: name.to_string(),
                    owner_token: token,
                    acquired_at,
                    ttl,
                })
            }
            Ok(false) => {
                debug!("Lock busy: {}", name);
                None
            }
            Err(e) => {
                warn!("Lock {} not acquired, {} backend failed: {}", name, self.backend.name(), e);
                None
            }
        }
    }

    /// Release the lock. Returns false if it had already expired or passed
    /// to another owner.
    pub async fn release(&self, handle: LockHandle) -> bool {
        match self.backend.delete_if_owner(&self.key(&handle.name), &handle.owner_token).await {
            Ok(released) => {
                if !released {
                    warn!("Lock {} was no longer owned at release", handle.name);
                }
                released
            }
            Err(e) => {
                // Store-side expiry will clean up
                warn!("Lock {} release failed: {}", handle.name, e);
                false
            }
        }
    }

    /// Push the expiry out to `now + ttl`. Only succeeds for the current owner.
    pub async fn extend(&self, handle: &mut LockHandle, ttl: Duration) -> bool {
        match self.backend.expire_if_owner(&self.key(&handle.name), &handle.owner_token, ttl).await {
            Ok(true) => {
                handle.acquired_at = self.clock.now();
                handle.ttl = ttl;
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Lock {} extend failed: {}", handle.name, e);
                false
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}
