//! Per-community reply-time cache stored as a sorted set.
//!
//! Members are encoded post snapshots scored by `last_reply_time`; ranks are
//! read highest score first.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::entities::PostRecord;

use super::codec::{decode_post, encode_post};
use super::config::CacheConfig;
use super::keys;
use super::store::{CacheError, CacheStore};

#[derive(Clone)]
pub struct BoundedSortedCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl BoundedSortedCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub async fn len(&self, community_id: i64) -> Result<usize, CacheError> {
        self.store.sorted_len(&keys::reply_feed(community_id)).await
    }

    /// Posts ranked `start..=stop` by descending reply time.
    pub async fn range(
        &self,
        community_id: i64,
        start: usize,
        stop: usize,
    ) -> Result<Vec<PostRecord>, CacheError> {
        let key = keys::reply_feed(community_id);
        let members = self.store.sorted_range_desc(&key, start, stop).await?;
        let decoded: Result<Vec<_>, _> = members
            .iter()
            .map(|(member, _)| decode_post(member))
            .collect();
        match decoded {
            Ok(posts) => Ok(posts),
            Err(err) => {
                warn!(community_id, error = %err, "Dropping undecodable reply cache");
                self.store.delete(&key).await?;
                Err(err)
            }
        }
    }

    pub async fn touch(&self, community_id: i64) -> Result<bool, CacheError> {
        self.store
            .expire(&keys::reply_feed(community_id), self.config.sorted_ttl())
            .await
    }

    pub async fn populate(&self, community_id: i64, posts: &[PostRecord]) -> Result<(), CacheError> {
        let members = posts
            .iter()
            .map(|post| encode_post(post).map(|member| (member, post.last_reply_time)))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(community_id, posts = members.len(), "Populating reply cache");
        self.store
            .sorted_replace(&keys::reply_feed(community_id), members, self.config.sorted_ttl())
            .await
    }

    /// Add a post to an already populated set; a cold set stays cold.
    pub async fn add_if_exists(&self, post: &PostRecord) -> Result<bool, CacheError> {
        self.store
            .sorted_add_if_exists(
                &keys::reply_feed(post.community_id),
                encode_post(post)?,
                post.last_reply_time,
            )
            .await
    }

    /// Keep the `cap` most recently replied-to posts. Returns the number of
    /// posts removed, if any.
    pub async fn trim(&self, community_id: i64, cap: usize) -> Result<Option<usize>, CacheError> {
        let key = keys::reply_feed(community_id);
        let len = self.store.sorted_len(&key).await?;
        if len <= cap {
            return Ok(None);
        }
        self.store.sorted_truncate(&key, cap).await?;
        Ok(Some(len - cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCacheStore;

    fn post(id: i64, reply: i64) -> PostRecord {
        PostRecord {
            post_id: id,
            user_id: 1,
            community_id: 3,
            content: String::new(),
            star_count: 0,
            collection_count: 0,
            is_scan: false,
            last_reply_time: reply,
            created_at: id,
            deleted_at: None,
        }
    }

    fn cache() -> BoundedSortedCache {
        BoundedSortedCache::new(Arc::new(MemoryCacheStore::new()), CacheConfig::default())
    }

    #[tokio::test]
    async fn range_orders_by_reply_time() {
        let cache = cache();
        cache
            .populate(3, &[post(1, 300), post(2, 100), post(3, 200)])
            .await
            .expect("populate");

        let ids: Vec<i64> = cache
            .range(3, 0, 10)
            .await
            .expect("range")
            .iter()
            .map(|p| p.post_id)
            .collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn add_requires_populated_set() {
        let cache = cache();
        assert!(!cache.add_if_exists(&post(9, 900)).await.expect("add"));

        cache.populate(3, &[post(1, 100)]).await.expect("populate");
        assert!(cache.add_if_exists(&post(9, 900)).await.expect("add"));
        assert_eq!(cache.range(3, 0, 0).await.expect("range")[0].post_id, 9);
    }

    #[tokio::test]
    async fn trim_drops_oldest_replies() {
        let cache = cache();
        let posts: Vec<_> = (1..=10).map(|id| post(id, id * 10)).collect();
        cache.populate(3, &posts).await.expect("populate");

        assert_eq!(cache.trim(3, 4).await.expect("trim"), Some(6));
        assert_eq!(cache.len(3).await.expect("len"), 4);
        assert_eq!(cache.range(3, 3, 3).await.expect("range")[0].post_id, 7);
    }
}
