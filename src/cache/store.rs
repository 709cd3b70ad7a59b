//! Key-value store abstraction backing the feed caches.
//!
//! The operations mirror what a Redis deployment offers (lists, sorted sets,
//! string blobs, set-if-absent with expiry). Each method is one indivisible
//! mutation from the store's point of view; composite rewrites are expressed
//! as compare-and-swap primitives rather than read/modify/write sequences.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache codec error: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }
}

/// Replacement of the head element of a list, guarded by its current value.
#[derive(Debug, Clone)]
pub struct HeadSwap {
    /// Value the head must still hold for the swap to apply.
    pub expected_head: String,
    /// Elements replacing the head, newest first.
    pub replacement: Vec<String>,
    /// When the list holds at least this many elements, trim first...
    pub high_water: usize,
    /// ...down to this many.
    pub low_water: usize,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Number of elements in a list; zero when the key is absent.
    async fn list_len(&self, key: &str) -> Result<usize, CacheError>;

    /// Elements `start..=stop` of a list (index 0 is the head).
    async fn list_range(&self, key: &str, start: usize, stop: usize)
    -> Result<Vec<String>, CacheError>;

    /// Replace the whole list with `values` (head first) and set its expiry.
    async fn list_replace(
        &self,
        key: &str,
        values: Vec<String>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Atomically trim, pop the head and push the replacement if the head
    /// still equals `swap.expected_head`. Returns whether the swap applied.
    /// The key's remaining expiry is preserved.
    async fn list_swap_head(&self, key: &str, swap: HeadSwap) -> Result<bool, CacheError>;

    /// Keep only the first `keep` elements of a list.
    async fn list_truncate(&self, key: &str, keep: usize) -> Result<(), CacheError>;

    /// Number of members in a sorted set; zero when the key is absent.
    async fn sorted_len(&self, key: &str) -> Result<usize, CacheError>;

    /// Members ranked `start..=stop` by descending score.
    async fn sorted_range_desc(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, i64)>, CacheError>;

    /// Replace the whole sorted set with `members` and set its expiry.
    async fn sorted_replace(
        &self,
        key: &str,
        members: Vec<(String, i64)>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Add one member only when the sorted set already exists.
    async fn sorted_add_if_exists(
        &self,
        key: &str,
        member: String,
        score: i64,
    ) -> Result<bool, CacheError>;

    /// Keep only the `keep` highest-scored members.
    async fn sorted_truncate(&self, key: &str, keep: usize) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Set `key` only when absent. Returns whether the value was written.
    async fn set_nx_ex(&self, key: &str, value: String, ttl: Duration)
    -> Result<bool, CacheError>;

    /// Delete `key` only when it still holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError>;

    /// Reset the expiry of an existing key. Returns false when absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
