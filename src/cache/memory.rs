//! In-process [`CacheStore`] with per-key expiry.
//!
//! Used for single-node deployments (`cache.backend = "memory"`) and as the
//! cache in tests. Expiry is evaluated lazily against `tokio::time::Instant`,
//! so paused-clock tests can advance past a TTL deterministically. Every
//! [`SWEEP_EVERY`] operations the whole map is swept, so keys nobody reads
//! again do not outlive their TTL in memory.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::lock::{rw_read, rw_write};
use super::store::{CacheError, CacheStore, HeadSwap};

const SOURCE: &str = "cache::memory";

/// Operations between two sweeps of expired entries.
pub const SWEEP_EVERY: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Blob(String),
    List(VecDeque<String>),
    Sorted(Vec<(String, i64)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    operations: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining time to live of `key`, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = rw_read(&self.entries, SOURCE, "ttl");
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::backend("memory store marked unavailable"));
        }
        Ok(())
    }

    /// Run `op` against the live entry for `key` under the write lock,
    /// dropping it first if it has expired.
    fn with_entry<T>(
        &self,
        key: &str,
        op: &'static str,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, op);
        if self.operations.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            let reaped = before - entries.len();
            if reaped > 0 {
                debug!(reaped, remaining = entries.len(), "Swept expired cache entries");
            }
        } else if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        f(&mut entries)
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::backend(format!("WRONGTYPE operation against key `{key}`"))
}

fn deadline(ttl: Duration) -> Option<Instant> {
    Some(Instant::now() + ttl)
}

fn sort_desc(members: &mut [(String, i64)]) {
    members.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn list_len(&self, key: &str) -> Result<usize, CacheError> {
        self.with_entry(key, "list_len", |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items.len()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, CacheError> {
        self.with_entry(key, "list_range", |entries| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items
                .iter()
                .skip(start)
                .take(stop.saturating_sub(start).saturating_add(1))
                .cloned()
                .collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn list_replace(
        &self,
        key: &str,
        values: Vec<String>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.with_entry(key, "list_replace", |entries| {
            if values.is_empty() {
                entries.remove(key);
            } else {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(values.into_iter().collect()),
                        expires_at: deadline(ttl),
                    },
                );
            }
            Ok(())
        })
    }

    async fn list_swap_head(&self, key: &str, swap: HeadSwap) -> Result<bool, CacheError> {
        self.with_entry(key, "list_swap_head", |entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(false);
            };
            let Value::List(items) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            if items.front() != Some(&swap.expected_head) {
                return Ok(false);
            }
            if items.len() >= swap.high_water {
                items.truncate(swap.low_water.max(1));
            }
            items.pop_front();
            for value in swap.replacement.into_iter().rev() {
                items.push_front(value);
            }
            if items.is_empty() {
                entries.remove(key);
            }
            Ok(true)
        })
    }

    async fn list_truncate(&self, key: &str, keep: usize) -> Result<(), CacheError> {
        self.with_entry(key, "list_truncate", |entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(());
            };
            let Value::List(items) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            items.truncate(keep);
            if items.is_empty() {
                entries.remove(key);
            }
            Ok(())
        })
    }

    async fn sorted_len(&self, key: &str) -> Result<usize, CacheError> {
        self.with_entry(key, "sorted_len", |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::Sorted(members),
                ..
            }) => Ok(members.len()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sorted_range_desc(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, i64)>, CacheError> {
        self.with_entry(key, "sorted_range_desc", |entries| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Sorted(members),
                ..
            }) => Ok(members
                .iter()
                .skip(start)
                .take(stop.saturating_sub(start).saturating_add(1))
                .cloned()
                .collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sorted_replace(
        &self,
        key: &str,
        members: Vec<(String, i64)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.with_entry(key, "sorted_replace", |entries| {
            let mut unique: HashMap<String, i64> = HashMap::with_capacity(members.len());
            for (member, score) in members {
                unique.insert(member, score);
            }
            if unique.is_empty() {
                entries.remove(key);
                return Ok(());
            }
            let mut members: Vec<(String, i64)> = unique.into_iter().collect();
            sort_desc(&mut members);
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Sorted(members),
                    expires_at: deadline(ttl),
                },
            );
            Ok(())
        })
    }

    async fn sorted_add_if_exists(
        &self,
        key: &str,
        member: String,
        score: i64,
    ) -> Result<bool, CacheError> {
        self.with_entry(key, "sorted_add_if_exists", |entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(false);
            };
            let Value::Sorted(members) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            match members.iter_mut().find(|(existing, _)| *existing == member) {
                Some(slot) => slot.1 = score,
                None => members.push((member, score)),
            }
            sort_desc(members);
            Ok(true)
        })
    }

    async fn sorted_truncate(&self, key: &str, keep: usize) -> Result<(), CacheError> {
        self.with_entry(key, "sorted_truncate", |entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(());
            };
            let Value::Sorted(members) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            members.truncate(keep);
            if members.is_empty() {
                entries.remove(key);
            }
            Ok(())
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_entry(key, "get", |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Blob(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.with_entry(key, "set_ex", |entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Blob(value),
                    expires_at: deadline(ttl),
                },
            );
            Ok(())
        })
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.with_entry(key, "set_nx_ex", |entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Blob(value),
                    expires_at: deadline(ttl),
                },
            );
            Ok(true)
        })
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        self.with_entry(key, "delete_if_equals", |entries| {
            let matches = matches!(
                entries.get(key),
                Some(Entry { value: Value::Blob(current), .. }) if current == value
            );
            if matches {
                entries.remove(key);
            }
            Ok(matches)
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.with_entry(key, "expire", |entries| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = deadline(ttl);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.with_entry(key, "delete", |entries| {
            entries.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn values(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[tokio::test]
    async fn list_replace_and_range() {
        let store = MemoryCacheStore::new();
        store
            .list_replace("k", values(&["a", "b", "c"]), Duration::from_secs(60))
            .await
            .expect("replace");

        assert_eq!(store.list_len("k").await.expect("len"), 3);
        assert_eq!(
            store.list_range("k", 1, 5).await.expect("range"),
            values(&["b", "c"])
        );
    }

    #[tokio::test]
    async fn swap_head_requires_matching_head() {
        let store = MemoryCacheStore::new();
        store
            .list_replace("k", values(&["a", "b"]), Duration::from_secs(60))
            .await
            .expect("replace");

        let swap = HeadSwap {
            expected_head: "z".to_string(),
            replacement: values(&["x"]),
            high_water: 10,
            low_water: 6,
        };
        assert!(!store.list_swap_head("k", swap).await.expect("swap"));

        let swap = HeadSwap {
            expected_head: "a".to_string(),
            replacement: values(&["x", "y"]),
            high_water: 10,
            low_water: 6,
        };
        assert!(store.list_swap_head("k", swap).await.expect("swap"));
        assert_eq!(
            store.list_range("k", 0, 10).await.expect("range"),
            values(&["x", "y", "b"])
        );
    }

    #[tokio::test]
    async fn swap_head_trims_at_high_water() {
        let store = MemoryCacheStore::new();
        store
            .list_replace("k", values(&["a", "b", "c", "d"]), Duration::from_secs(60))
            .await
            .expect("replace");

        let swap = HeadSwap {
            expected_head: "a".to_string(),
            replacement: values(&["n"]),
            high_water: 4,
            low_water: 2,
        };
        assert!(store.list_swap_head("k", swap).await.expect("swap"));
        assert_eq!(
            store.list_range("k", 0, 10).await.expect("range"),
            values(&["n", "b"])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryCacheStore::new();
        store
            .set_ex("blob", "v".to_string(), Duration::from_secs(5))
            .await
            .expect("set");
        assert!(store.get("blob").await.expect("get").is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.get("blob").await.expect("get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_expired_keys_are_swept() {
        let store = MemoryCacheStore::new();
        store
            .set_ex("idle", "v".into(), Duration::from_secs(1))
            .await
            .expect("set");
        store
            .set_ex("busy", "v".into(), Duration::from_secs(60))
            .await
            .expect("set");
        tokio::time::advance(Duration::from_secs(2)).await;

        for _ in 0..SWEEP_EVERY {
            store.get("busy").await.expect("get");
        }

        let entries = rw_read(&store.entries, SOURCE, "test");
        assert!(!entries.contains_key("idle"));
        assert!(entries.contains_key("busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn set_nx_is_reusable_after_expiry() {
        let store = MemoryCacheStore::new();
        let ttl = Duration::from_secs(2);
        assert!(store.set_nx_ex("lock", "a".into(), ttl).await.expect("nx"));
        assert!(!store.set_nx_ex("lock", "b".into(), ttl).await.expect("nx"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.set_nx_ex("lock", "b".into(), ttl).await.expect("nx"));
    }

    #[tokio::test]
    async fn delete_if_equals_checks_value() {
        let store = MemoryCacheStore::new();
        let ttl = Duration::from_secs(2);
        store.set_ex("lock", "mine".into(), ttl).await.expect("set");
        assert!(!store.delete_if_equals("lock", "theirs").await.expect("del"));
        assert!(store.delete_if_equals("lock", "mine").await.expect("del"));
        assert!(store.get("lock").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn sorted_set_orders_by_descending_score() {
        let store = MemoryCacheStore::new();
        store
            .sorted_replace(
                "z",
                vec![("a".into(), 1), ("b".into(), 3), ("c".into(), 2)],
                Duration::from_secs(60),
            )
            .await
            .expect("replace");
        assert!(
            store
                .sorted_add_if_exists("z", "d".into(), 4)
                .await
                .expect("add")
        );
        assert!(
            !store
                .sorted_add_if_exists("missing", "d".into(), 4)
                .await
                .expect("add")
        );

        let ranked = store.sorted_range_desc("z", 0, 2).await.expect("range");
        let members: Vec<&str> = ranked.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["d", "b", "c"]);
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let store = MemoryCacheStore::new();
        store
            .set_ex("k", "v".into(), Duration::from_secs(1))
            .await
            .expect("set");
        assert!(store.list_len("k").await.is_err());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryCacheStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("k").await,
            Err(CacheError::Backend(_))
        ));
        store.set_unavailable(false);
        assert!(store.get("k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn store_recovers_from_poisoned_lock() {
        let store = MemoryCacheStore::new();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store
            .set_ex("k", "v".into(), Duration::from_secs(1))
            .await
            .expect("set after poison");
        assert_eq!(store.get("k").await.expect("get"), Some("v".to_string()));
    }
}
