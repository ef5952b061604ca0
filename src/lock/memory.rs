//! In-process lock backend
//!
//! Used for single-instance deployments (no `REDIS_URL`) and tests. Expiry
//! is measured with the injected clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{LockBackend, LockError};
use crate::clock::Clock;

struct Entry {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct InMemoryLockBackend {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(key) {
            if existing.expires_at > now {
                return Ok(false);
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                token: token.to_string(),
                expires_at: self.deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.token == token && entry.expires_at > now => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = self.clock.now();
        let deadline = self.deadline(ttl);
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.token == token && entry.expires_at > now => {
                entry.expires_at = deadline;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
