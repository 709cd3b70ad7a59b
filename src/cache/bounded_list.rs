//! Per-community recency cache stored as a list of post shards.
//!
//! Element 0 of the list is the newest shard and each shard holds up to
//! `shard_size` posts, newest first, so flattening the list yields posts in
//! descending recency. New posts are folded into the head shard with a
//! guarded swap instead of rewriting the whole list.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::entities::PostRecord;

use super::codec::{decode_shard, encode_shard};
use super::config::CacheConfig;
use super::keys;
use super::store::{CacheError, CacheStore, HeadSwap};

/// Attempts made to fold a new post into the head shard before giving up.
const INSERT_ATTEMPTS: usize = 3;

/// Result of [`BoundedListCache::insert_newest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The head shard was rewritten; carries the number of shards pushed.
    Applied { shards: usize },
    /// Nothing cached for the community; the next read populates it.
    Cold,
    /// The post was already at the head of the cache.
    Duplicate,
    /// Concurrent writers kept replacing the head; the list was dropped.
    Invalidated,
}

impl InsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Cold => "cold",
            Self::Duplicate => "duplicate",
            Self::Invalidated => "invalidated",
        }
    }
}

#[derive(Clone)]
pub struct BoundedListCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl BoundedListCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Every cached post of the community, newest first.
    ///
    /// An undecodable shard drops the whole list and surfaces as a codec
    /// error, which callers treat as a miss.
    pub async fn read(&self, community_id: i64) -> Result<Vec<PostRecord>, CacheError> {
        let key = keys::time_feed(community_id);
        let shards = self.store.list_range(&key, 0, usize::MAX).await?;
        match flatten(&shards) {
            Ok(posts) => Ok(posts),
            Err(err) => {
                warn!(community_id, error = %err, "Dropping undecodable recency cache");
                self.store.delete(&key).await?;
                Err(err)
            }
        }
    }

    /// Slide the expiry of the community's list forward.
    pub async fn touch(&self, community_id: i64) -> Result<bool, CacheError> {
        self.store
            .expire(&keys::time_feed(community_id), self.config.list_ttl())
            .await
    }

    /// Replace the community's list with `posts` (newest first), chunked into
    /// shards.
    pub async fn populate(&self, community_id: i64, posts: &[PostRecord]) -> Result<(), CacheError> {
        let shards = posts
            .chunks(self.config.shard_size())
            .map(encode_shard)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            community_id,
            posts = posts.len(),
            shards = shards.len(),
            "Populating recency cache"
        );
        self.store
            .list_replace(&keys::time_feed(community_id), shards, self.config.list_ttl())
            .await
    }

    /// Fold a freshly created post into the head shard.
    ///
    /// The swap is guarded by the head's current value; a lost race re-reads
    /// the head and retries. When the list has reached the high-water mark
    /// it is cut back to the low-water mark in the same step.
    pub async fn insert_newest(&self, post: &PostRecord) -> Result<InsertOutcome, CacheError> {
        let key = keys::time_feed(post.community_id);
        for attempt in 1..=INSERT_ATTEMPTS {
            let Some(head_raw) = self.store.list_range(&key, 0, 0).await?.into_iter().next() else {
                return Ok(InsertOutcome::Cold);
            };
            let head = match decode_shard(&head_raw) {
                Ok(head) => head,
                Err(err) => {
                    warn!(community_id = post.community_id, error = %err, "Dropping undecodable head shard");
                    self.store.delete(&key).await?;
                    return Err(err);
                }
            };
            if head.iter().any(|cached| cached.post_id == post.post_id) {
                return Ok(InsertOutcome::Duplicate);
            }

            let replacement = rewrite_head_shard(post.clone(), head, self.config.shard_size())
                .iter()
                .map(|shard| encode_shard(shard))
                .collect::<Result<Vec<_>, _>>()?;
            let shards = replacement.len();
            let swap = HeadSwap {
                expected_head: head_raw,
                replacement,
                high_water: self.config.insert_high_water_shards,
                low_water: self.config.insert_low_water_shards,
            };
            if self.store.list_swap_head(&key, swap).await? {
                return Ok(InsertOutcome::Applied { shards });
            }
            debug!(
                community_id = post.community_id,
                post_id = post.post_id,
                attempt,
                "Head shard changed during insert; retrying"
            );
        }

        self.store.delete(&key).await?;
        Ok(InsertOutcome::Invalidated)
    }

    /// Cut the list back to the longest shard prefix holding at most
    /// `cap_posts` posts. Returns the number of posts removed, if any.
    pub async fn trim(&self, community_id: i64, cap_posts: usize) -> Result<Option<usize>, CacheError> {
        let key = keys::time_feed(community_id);
        let shards = self.store.list_range(&key, 0, usize::MAX).await?;
        let mut sizes = Vec::with_capacity(shards.len());
        for raw in &shards {
            sizes.push(decode_shard(raw)?.len());
        }

        let total: usize = sizes.iter().sum();
        if total <= cap_posts {
            return Ok(None);
        }

        let mut kept_posts = 0;
        let mut kept_shards = 0;
        for size in sizes {
            if kept_posts + size > cap_posts {
                break;
            }
            kept_posts += size;
            kept_shards += 1;
        }
        self.store.list_truncate(&key, kept_shards).await?;
        Ok(Some(total - kept_posts))
    }
}

fn flatten(shards: &[String]) -> Result<Vec<PostRecord>, CacheError> {
    let mut posts = Vec::new();
    for raw in shards {
        posts.extend(decode_shard(raw)?);
    }
    Ok(posts)
}

/// Prepend `post` to the head shard and re-chunk.
///
/// The first resulting shard is `post` followed by the first
/// `shard_size - 1` entries of `head`; the rest of `head` is split into
/// shards of `shard_size`.
pub(crate) fn rewrite_head_shard(
    post: PostRecord,
    head: Vec<PostRecord>,
    shard_size: usize,
) -> Vec<Vec<PostRecord>> {
    let mut merged = Vec::with_capacity(head.len() + 1);
    merged.push(post);
    merged.extend(head);
    merged
        .chunks(shard_size.max(1))
        .map(<[PostRecord]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::memory::MemoryCacheStore;

    fn post(id: i64) -> PostRecord {
        PostRecord {
            post_id: id,
            user_id: 1,
            community_id: 7,
            content: format!("post {id}"),
            star_count: 0,
            collection_count: 0,
            is_scan: false,
            last_reply_time: id,
            created_at: id,
            deleted_at: None,
        }
    }

    fn newest_first(count: i64) -> Vec<PostRecord> {
        (1..=count).rev().map(post).collect()
    }

    fn ids(posts: &[PostRecord]) -> Vec<i64> {
        posts.iter().map(|p| p.post_id).collect()
    }

    fn cache(config: CacheConfig) -> (Arc<MemoryCacheStore>, BoundedListCache) {
        let store = Arc::new(MemoryCacheStore::new());
        (store.clone(), BoundedListCache::new(store, config))
    }

    #[test]
    fn rewrite_short_head_yields_one_shard() {
        let shards = rewrite_head_shard(post(10), newest_first(5), 20);
        assert_eq!(shards.len(), 1);
        assert_eq!(ids(&shards[0]), vec![10, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn rewrite_full_head_spills_one_post() {
        let shards = rewrite_head_shard(post(100), newest_first(20), 20);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].len(), 20);
        assert_eq!(shards[0][0].post_id, 100);
        assert_eq!(ids(&shards[1]), vec![1]);
    }

    #[tokio::test]
    async fn populate_then_read_preserves_order() {
        let (store, cache) = cache(CacheConfig::default());
        cache.populate(7, &newest_first(45)).await.expect("populate");

        assert_eq!(store.list_len(&keys::time_feed(7)).await.expect("len"), 3);
        let posts = cache.read(7).await.expect("read");
        assert_eq!(ids(&posts), ids(&newest_first(45)));
    }

    #[tokio::test]
    async fn insert_into_cold_cache_is_a_no_op() {
        let (_, cache) = cache(CacheConfig::default());
        assert_eq!(
            cache.insert_newest(&post(1)).await.expect("insert"),
            InsertOutcome::Cold
        );
        assert!(cache.read(7).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn insert_prepends_to_first_page() {
        let (_, cache) = cache(CacheConfig::default());
        let old = newest_first(25);
        cache.populate(7, &old).await.expect("populate");

        let outcome = cache.insert_newest(&post(99)).await.expect("insert");
        assert_eq!(outcome, InsertOutcome::Applied { shards: 2 });

        let posts = cache.read(7).await.expect("read");
        let mut expected = vec![99];
        expected.extend(ids(&old[..19]));
        assert_eq!(ids(&posts[..20]), expected);
        assert_eq!(posts.len(), old.len() + 1);
    }

    #[tokio::test]
    async fn insert_twice_is_detected() {
        let (_, cache) = cache(CacheConfig::default());
        cache.populate(7, &newest_first(3)).await.expect("populate");
        cache.insert_newest(&post(50)).await.expect("insert");
        assert_eq!(
            cache.insert_newest(&post(50)).await.expect("insert"),
            InsertOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn insert_trims_at_high_water_mark() {
        let config = CacheConfig {
            shard_size: 2,
            insert_high_water_shards: 4,
            insert_low_water_shards: 2,
            ..Default::default()
        };
        let (store, cache) = cache(config);
        cache.populate(7, &newest_first(8)).await.expect("populate");

        cache.insert_newest(&post(9)).await.expect("insert");
        let key = keys::time_feed(7);
        // Trimmed to 2 shards, then the head shard of 2 became 2 shards.
        assert_eq!(store.list_len(&key).await.expect("len"), 3);
        assert_eq!(ids(&cache.read(7).await.expect("read")), vec![9, 8, 7, 6, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_keeps_existing_expiry() {
        let (store, cache) = cache(CacheConfig::default());
        cache.populate(7, &newest_first(3)).await.expect("populate");
        tokio::time::advance(Duration::from_secs(600)).await;

        cache.insert_newest(&post(4)).await.expect("insert");
        let ttl = store.ttl(&keys::time_feed(7)).expect("ttl");
        assert!(ttl <= Duration::from_secs(7200 - 600));
    }

    #[tokio::test]
    async fn trim_keeps_shard_prefix_within_cap() {
        let (_, cache) = cache(CacheConfig::default());
        cache.populate(7, &newest_first(250)).await.expect("populate");

        let removed = cache.trim(7, 200).await.expect("trim");
        assert_eq!(removed, Some(50));
        assert_eq!(cache.read(7).await.expect("read").len(), 200);
        assert_eq!(cache.trim(7, 200).await.expect("trim"), None);
    }

    #[tokio::test]
    async fn undecodable_list_is_dropped() {
        let (store, cache) = cache(CacheConfig::default());
        let key = keys::time_feed(7);
        store
            .list_replace(&key, vec!["not json".into()], Duration::from_secs(60))
            .await
            .expect("seed");

        assert!(matches!(cache.read(7).await, Err(CacheError::Codec(_))));
        assert_eq!(store.list_len(&key).await.expect("len"), 0);
    }
}
