//! Best-effort mutual exclusion for cold cache population.
//!
//! The lock is a set-if-absent key with a short expiry holding a random
//! token. Failing to acquire it is not an error: another request is already
//! populating and the caller serves its own fetch without writing back.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use super::store::{CacheError, CacheStore};

#[derive(Clone)]
pub struct PopulationLock {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl PopulationLock {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Try to take the lock stored at `key`; `None` when someone holds it.
    pub async fn try_acquire(&self, key: String) -> Result<Option<PopulationGuard>, CacheError> {
        let token = Uuid::new_v4().to_string();
        if !self.store.set_nx_ex(&key, token.clone(), self.ttl).await? {
            debug!(key = %key, "Population lock held elsewhere");
            return Ok(None);
        }
        Ok(Some(PopulationGuard {
            store: Arc::clone(&self.store),
            key,
            token,
        }))
    }
}

/// Proof of lock ownership. Dropping without [`release`](Self::release)
/// leaves the lock to expire on its own.
pub struct PopulationGuard {
    store: Arc<dyn CacheStore>,
    key: String,
    token: String,
}

impl PopulationGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Delete the lock if this guard still owns it. Returns false when the
    /// lock had already expired and possibly been taken by someone else.
    pub async fn release(self) -> Result<bool, CacheError> {
        self.store.delete_if_equals(&self.key, &self.token).await
    }
}
