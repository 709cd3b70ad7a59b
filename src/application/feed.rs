//! Paginated community feeds served from the read-model caches.
//!
//! Every feed read classifies the requested window against what the cache
//! holds ([`HitKind`]) and falls back to the post store for whatever the
//! cache cannot answer. Cache failures never fail a read; post store
//! failures surface as [`FeedError::Unavailable`].

use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::application::collaborators::FollowDirectory;
use crate::application::enrich::Enricher;
use crate::application::pagination::{FeedCursor, FeedWindow, HitKind, PaginationError};
use crate::application::repos::{PostsRepo, RepoError, clamp_limit};
use crate::cache::codec::{decode_popular, encode_popular};
use crate::cache::{
    BoundedListCache, BoundedSortedCache, CacheConfig, CacheError, CacheStore, PopularBlob,
    PopulationLock, TaskSpawner, keys,
};
use crate::domain::entities::{EnrichedPost, FeedPage, PopularScope, PostRecord, now_millis};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unavailable: {0}")]
    Unavailable(#[from] RepoError),
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("page numbers start at 1, got {0}")]
    InvalidPage(u32),
    #[error("invalid actor id {0}")]
    InvalidActor(i64),
}

impl From<PaginationError> for FeedError {
    fn from(err: PaginationError) -> Self {
        match err {
            PaginationError::InvalidCursor(message) => FeedError::InvalidCursor(message),
            PaginationError::InvalidPage(page) => FeedError::InvalidPage(page),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Time,
    Reply,
}

impl FeedKind {
    fn label(self) -> &'static str {
        match self {
            FeedKind::Time => "time",
            FeedKind::Reply => "reply",
        }
    }

    /// Exclusive resume bound for the posts after `post`.
    fn bound(self, post: &PostRecord) -> i64 {
        match self {
            FeedKind::Time => post.post_id,
            FeedKind::Reply => post.last_reply_time,
        }
    }

    fn cursor_after(self, post: &PostRecord) -> FeedCursor {
        match self {
            FeedKind::Time => FeedCursor::Time {
                before_post_id: post.post_id,
            },
            FeedKind::Reply => FeedCursor::Reply {
                before_reply_time: post.last_reply_time,
            },
        }
    }

    fn cursor_bound(self, cursor: FeedCursor) -> Result<i64, FeedError> {
        let bound = match self {
            FeedKind::Time => cursor.before_post_id(),
            FeedKind::Reply => cursor.before_reply_time(),
        };
        bound.ok_or_else(|| {
            FeedError::InvalidCursor(format!("cursor does not belong to the {} feed", self.label()))
        })
    }

    fn lock_key(self, community_id: i64) -> String {
        match self {
            FeedKind::Time => keys::time_population_lock(community_id),
            FeedKind::Reply => keys::reply_population_lock(community_id),
        }
    }

    fn feed_key(self, community_id: i64) -> String {
        match self {
            FeedKind::Time => keys::time_feed(community_id),
            FeedKind::Reply => keys::reply_feed(community_id),
        }
    }
}

#[derive(Clone)]
pub struct FeedService {
    posts: Arc<dyn PostsRepo>,
    store: Arc<dyn CacheStore>,
    recency: BoundedListCache,
    replies: BoundedSortedCache,
    locks: PopulationLock,
    tasks: Arc<dyn TaskSpawner>,
    enricher: Enricher,
    follows: Arc<dyn FollowDirectory>,
    config: CacheConfig,
}

impl FeedService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        store: Arc<dyn CacheStore>,
        tasks: Arc<dyn TaskSpawner>,
        enricher: Enricher,
        follows: Arc<dyn FollowDirectory>,
        config: CacheConfig,
    ) -> Self {
        Self {
            recency: BoundedListCache::new(store.clone(), config.clone()),
            replies: BoundedSortedCache::new(store.clone(), config.clone()),
            locks: PopulationLock::new(store.clone(), config.lock_ttl()),
            posts,
            store,
            tasks,
            enricher,
            follows,
            config,
        }
    }

    /// Newest posts of a community.
    #[instrument(skip(self))]
    pub async fn feed_by_time(
        &self,
        community_id: i64,
        page: u32,
        actor_id: i64,
        cursor: Option<FeedCursor>,
    ) -> Result<FeedPage, FeedError> {
        self.feed_page(FeedKind::Time, community_id, page, actor_id, cursor)
            .await
    }

    /// Posts of a community ordered by their latest reply.
    #[instrument(skip(self))]
    pub async fn feed_by_new_reply(
        &self,
        community_id: i64,
        page: u32,
        actor_id: i64,
        cursor: Option<FeedCursor>,
    ) -> Result<FeedPage, FeedError> {
        self.feed_page(FeedKind::Reply, community_id, page, actor_id, cursor)
            .await
    }

    /// Top posts by stars then collections, served from the shared
    /// popularity snapshot. A missing snapshot is rebuilt synchronously.
    #[instrument(skip(self))]
    pub async fn popular_posts(
        &self,
        scope: PopularScope,
        limit: usize,
    ) -> Result<Vec<EnrichedPost>, FeedError> {
        let started = Instant::now();
        let limit = match limit {
            0 => self.config.popular_limit,
            limit => limit.min(self.config.popular_limit),
        };

        let blob = match self.cached_popular(scope).await {
            Some(blob) => {
                record_lookup("popular", "full");
                blob
            }
            None => {
                record_lookup("popular", "empty");
                self.refresh_popular(scope).await?
            }
        };

        record_latency("popular", started);
        Ok(blob.posts.into_iter().take(limit).collect())
    }

    /// Query, enrich and store the popularity snapshot for `scope`.
    ///
    /// A failed cache write is logged; the fresh snapshot is still returned.
    pub async fn refresh_popular(&self, scope: PopularScope) -> Result<PopularBlob, RepoError> {
        let posts = self
            .posts
            .list_by_popularity(scope, self.config.popular_limit)
            .await?;
        let blob = PopularBlob {
            generated_at: now_millis(),
            posts: self.enricher.enrich(posts, 0).await,
        };

        let key = keys::popular(scope);
        let written = match encode_popular(&blob) {
            Ok(raw) => self.store.set_ex(&key, raw, self.config.popular_ttl()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(?scope, error = %err, "Failed to store popularity snapshot");
        }
        Ok(blob)
    }

    /// Newest posts of the users `actor_id` follows.
    #[instrument(skip(self))]
    pub async fn following_feed(&self, actor_id: i64, page: u32) -> Result<FeedPage, FeedError> {
        if actor_id <= 0 {
            return Err(FeedError::InvalidActor(actor_id));
        }
        let started = Instant::now();
        let window = FeedWindow::for_page(page, self.config.page_size)?;

        let followed = match self.follows.following(actor_id).await {
            Ok(followed) => followed,
            Err(err) => {
                warn!(actor_id, error = %err, "Follow lookup failed; serving empty feed");
                counter!("plaza_enrich_degraded_total", "field" => "following").increment(1);
                Vec::new()
            }
        };
        if followed.is_empty() {
            return Ok(FeedPage::empty());
        }

        let rows = self
            .posts
            .list_by_authors(&followed, window.offset, window.limit)
            .await?;
        let posts = self.enricher.enrich(rows, actor_id).await;
        record_latency("following", started);
        Ok(FeedPage {
            posts,
            cursor: None,
        })
    }

    async fn feed_page(
        &self,
        kind: FeedKind,
        community_id: i64,
        page: u32,
        actor_id: i64,
        cursor: Option<FeedCursor>,
    ) -> Result<FeedPage, FeedError> {
        if actor_id < 0 {
            return Err(FeedError::InvalidActor(actor_id));
        }
        let started = Instant::now();
        let window = FeedWindow::for_page(page, self.config.page_size)?;
        let bound = cursor.map(|cursor| kind.cursor_bound(cursor)).transpose()?;

        let rows = self.load(kind, community_id, window, bound).await?;
        let cursor = rows.last().map(|post| kind.cursor_after(post).encode());
        let posts = self.enricher.enrich(rows, actor_id).await;

        record_latency(kind.label(), started);
        Ok(FeedPage { posts, cursor })
    }

    async fn load(
        &self,
        kind: FeedKind,
        community_id: i64,
        window: FeedWindow,
        bound: Option<i64>,
    ) -> Result<Vec<PostRecord>, FeedError> {
        let (cached_len, cached) = match self.cached_window(kind, community_id, window).await {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    feed = kind.label(),
                    community_id,
                    error = %err,
                    "Feed cache unavailable; reading post store"
                );
                record_lookup(kind.label(), "error");
                return self.direct(kind, community_id, window, bound).await;
            }
        };

        let hit = HitKind::classify(cached_len, window);
        record_lookup(kind.label(), hit.as_str());
        debug!(feed = kind.label(), community_id, cached_len, hit = ?hit, "Feed cache lookup");

        match hit {
            HitKind::Full => {
                self.touch(kind, community_id).await;
                Ok(cached)
            }
            HitKind::Partial => {
                self.touch(kind, community_id).await;
                self.extend(kind, community_id, cached, window.limit).await
            }
            HitKind::Beyond => self.direct(kind, community_id, window, bound).await,
            HitKind::Empty => self.populate_and_serve(kind, community_id, window, bound).await,
        }
    }

    /// Cached length in posts plus the part of `window` the cache holds.
    async fn cached_window(
        &self,
        kind: FeedKind,
        community_id: i64,
        window: FeedWindow,
    ) -> Result<(usize, Vec<PostRecord>), CacheError> {
        match kind {
            FeedKind::Time => {
                let all = self.recency.read(community_id).await?;
                let len = all.len();
                let slice = all
                    .into_iter()
                    .skip(window.offset)
                    .take(window.limit)
                    .collect();
                Ok((len, slice))
            }
            FeedKind::Reply => {
                let len = self.replies.len(community_id).await?;
                if len <= window.offset {
                    return Ok((len, Vec::new()));
                }
                let stop = window.end().min(len) - 1;
                let slice = self.replies.range(community_id, window.offset, stop).await?;
                Ok((len, slice))
            }
        }
    }

    async fn touch(&self, kind: FeedKind, community_id: i64) {
        let touched = match kind {
            FeedKind::Time => self.recency.touch(community_id).await,
            FeedKind::Reply => self.replies.touch(community_id).await,
        };
        if let Err(err) = touched {
            warn!(feed = kind.label(), community_id, error = %err, "Failed to refresh feed cache TTL");
        }
    }

    /// Posts strictly older than `bound` from the post store.
    async fn fetch_older(
        &self,
        kind: FeedKind,
        community_id: i64,
        bound: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let limit = clamp_limit(limit);
        match kind {
            FeedKind::Time => self.posts.list_by_recency(community_id, bound, limit).await,
            FeedKind::Reply => self.posts.list_by_reply_time(community_id, bound, limit).await,
        }
    }

    /// Complete a page whose head came from a cache with posts from the
    /// store. The tail is not written back.
    async fn extend(
        &self,
        kind: FeedKind,
        community_id: i64,
        mut head: Vec<PostRecord>,
        limit: usize,
    ) -> Result<Vec<PostRecord>, FeedError> {
        let missing = limit.saturating_sub(head.len());
        if missing == 0 {
            return Ok(head);
        }
        let bound = head.last().map(|post| kind.bound(post));
        let tail = self.fetch_older(kind, community_id, bound, missing).await?;
        head.extend(tail);
        Ok(head)
    }

    /// Serve a window entirely from the store, resuming from the caller's
    /// cursor when one was given.
    async fn direct(
        &self,
        kind: FeedKind,
        community_id: i64,
        window: FeedWindow,
        bound: Option<i64>,
    ) -> Result<Vec<PostRecord>, FeedError> {
        if bound.is_some() {
            return Ok(self
                .fetch_older(kind, community_id, bound, window.limit)
                .await?);
        }
        let rows = self
            .fetch_older(kind, community_id, None, window.end())
            .await?;
        Ok(rows
            .into_iter()
            .skip(window.offset)
            .take(window.limit)
            .collect())
    }

    async fn populate_and_serve(
        &self,
        kind: FeedKind,
        community_id: i64,
        window: FeedWindow,
        bound: Option<i64>,
    ) -> Result<Vec<PostRecord>, FeedError> {
        let limit = self.config.population_limit();
        let fetched = self.fetch_older(kind, community_id, None, limit).await?;
        let complete = fetched.len() < limit;
        if !fetched.is_empty() {
            self.schedule_population(kind, community_id, fetched.clone())
                .await;
        }

        match HitKind::classify(fetched.len(), window) {
            HitKind::Full => Ok(fetched[window.offset..window.end()].to_vec()),
            HitKind::Partial => {
                let head = fetched[window.offset..].to_vec();
                if complete {
                    Ok(head)
                } else {
                    self.extend(kind, community_id, head, window.limit).await
                }
            }
            HitKind::Beyond | HitKind::Empty if complete => Ok(Vec::new()),
            HitKind::Beyond | HitKind::Empty => {
                self.direct(kind, community_id, window, bound).await
            }
        }
    }

    /// Write `posts` into the cold cache in the background, unless another
    /// request already holds the population lock.
    ///
    /// A post created between the read of `posts` and the write finds the
    /// cache cold and skips it. After writing, the task reads the newest
    /// post again and drops the cache when the head it wrote is no longer
    /// the newest; any later insert finds the cache warm and folds itself in.
    async fn schedule_population(&self, kind: FeedKind, community_id: i64, posts: Vec<PostRecord>) {
        let guard = match self.locks.try_acquire(kind.lock_key(community_id)).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                record_population(kind.label(), "lock_held");
                return;
            }
            Err(err) => {
                warn!(feed = kind.label(), community_id, error = %err, "Population lock unavailable");
                record_population(kind.label(), "lock_error");
                return;
            }
        };

        let recency = self.recency.clone();
        let replies = self.replies.clone();
        let store = self.store.clone();
        let repo = self.posts.clone();
        let task = async move {
            let written = match kind {
                FeedKind::Time => recency.populate(community_id, &posts).await,
                FeedKind::Reply => replies.populate(community_id, &posts).await,
            };
            match written {
                Ok(()) => {
                    let current = match posts.first() {
                        Some(head) => head_is_current(repo.as_ref(), kind, community_id, head).await,
                        None => Ok(true),
                    };
                    match current {
                        Ok(true) => record_population(kind.label(), "populated"),
                        Ok(false) => {
                            debug!(feed = kind.label(), community_id, "Newer post arrived during population");
                            drop_stale(store.as_ref(), kind, community_id).await;
                        }
                        Err(err) => {
                            warn!(feed = kind.label(), community_id, error = %err, "Could not confirm populated head");
                            drop_stale(store.as_ref(), kind, community_id).await;
                        }
                    }
                }
                Err(err) => {
                    warn!(feed = kind.label(), community_id, error = %err, "Feed cache population failed");
                    record_population(kind.label(), "failed");
                }
            }
            if let Err(err) = guard.release().await {
                warn!(feed = kind.label(), community_id, error = %err, "Failed to release population lock");
            }
        };
        let name = match kind {
            FeedKind::Time => "populate_time_feed",
            FeedKind::Reply => "populate_reply_feed",
        };
        self.tasks.spawn(name, task.boxed());
    }

    async fn cached_popular(&self, scope: PopularScope) -> Option<PopularBlob> {
        let key = keys::popular(scope);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(?scope, error = %err, "Popularity cache unavailable");
                return None;
            }
        };
        match decode_popular(&raw) {
            Ok(blob) => Some(blob),
            Err(err) => {
                warn!(?scope, error = %err, "Dropping undecodable popularity snapshot");
                if let Err(err) = self.store.delete(&key).await {
                    warn!(?scope, error = %err, "Failed to drop popularity snapshot");
                }
                None
            }
        }
    }
}

/// Whether `head` is still the first post of its feed in the store.
async fn head_is_current(
    posts: &dyn PostsRepo,
    kind: FeedKind,
    community_id: i64,
    head: &PostRecord,
) -> Result<bool, RepoError> {
    let newest = match kind {
        FeedKind::Time => posts.list_by_recency(community_id, None, 1).await?,
        FeedKind::Reply => posts.list_by_reply_time(community_id, None, 1).await?,
    };
    Ok(newest
        .first()
        .is_none_or(|newest| newest.post_id == head.post_id && kind.bound(newest) == kind.bound(head)))
}

async fn drop_stale(store: &dyn CacheStore, kind: FeedKind, community_id: i64) {
    if let Err(err) = store.delete(&kind.feed_key(community_id)).await {
        warn!(feed = kind.label(), community_id, error = %err, "Failed to drop stale feed cache");
    }
    record_population(kind.label(), "stale");
}

fn record_lookup(feed: &'static str, hit: &'static str) {
    counter!("plaza_feed_cache_lookup_total", "feed" => feed, "hit" => hit).increment(1);
}

fn record_population(feed: &'static str, outcome: &'static str) {
    counter!("plaza_feed_population_total", "feed" => feed, "outcome" => outcome).increment(1);
}

fn record_latency(feed: &'static str, started: Instant) {
    histogram!("plaza_feed_request_ms", "feed" => feed)
        .record(started.elapsed().as_secs_f64() * 1_000.0);
}
