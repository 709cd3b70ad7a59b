#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use plaza::application::collaborators::{
    CollaboratorError, Collaborators, CollectFlag, CommentCounter, CommunityDirectory,
    FollowDirectory, LikeCounter, UserDirectory,
};
use plaza::application::enrich::{EnrichConfig, Enricher};
use plaza::application::feed::FeedService;
use plaza::application::maintenance::CacheMaintainer;
use plaza::application::repos::{PostsRepo, RepoError};
use plaza::cache::{BackgroundTasks, CacheConfig, CacheStore, MemoryCacheStore, TaskSpawner};
use plaza::domain::entities::{CommunityInfo, NewPost, PopularScope, PostRecord, UserInfo};

pub const COMMUNITY: i64 = 1;

/// Post `id` of `community`, written by user `100 + id % 3`.
///
/// Reply times descend in the opposite direction of ids so the two feeds
/// disagree on order.
pub fn post(community_id: i64, post_id: i64) -> PostRecord {
    PostRecord {
        post_id,
        user_id: 100 + post_id % 3,
        community_id,
        content: format!("post {post_id}"),
        star_count: post_id % 7,
        collection_count: post_id % 5,
        is_scan: false,
        last_reply_time: 1_000_000 - post_id * 10,
        created_at: 1_700_000_000_000 + post_id,
        deleted_at: None,
    }
}

pub fn ids<'a>(posts: impl IntoIterator<Item = &'a PostRecord>) -> Vec<i64> {
    posts.into_iter().map(|post| post.post_id).collect()
}

#[derive(Default)]
pub struct FakePosts {
    posts: Mutex<Vec<PostRecord>>,
    next_id: AtomicI64,
    pub recency_calls: AtomicUsize,
    pub reply_calls: AtomicUsize,
    pub popularity_calls: AtomicUsize,
    pub last_limit: AtomicUsize,
    failing: AtomicBool,
}

impl FakePosts {
    pub fn with_posts(posts: Vec<PostRecord>) -> Self {
        let next_id = posts.iter().map(|post| post.post_id).max().unwrap_or(0) + 1;
        Self {
            posts: Mutex::new(posts),
            next_id: AtomicI64::new(next_id),
            ..Default::default()
        }
    }

    /// `count` posts with ids `1..=count` in `community_id`.
    pub fn community(community_id: i64, count: i64) -> Self {
        Self::with_posts((1..=count).map(|id| post(community_id, id)).collect())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn push(&self, post: PostRecord) {
        self.next_id.fetch_max(post.post_id + 1, Ordering::SeqCst);
        self.posts.lock().await.push(post);
    }

    pub fn recency_calls(&self) -> usize {
        self.recency_calls.load(Ordering::SeqCst)
    }

    pub fn reply_calls(&self) -> usize {
        self.reply_calls.load(Ordering::SeqCst)
    }

    pub fn popularity_calls(&self) -> usize {
        self.popularity_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RepoError::Timeout)
        } else {
            Ok(())
        }
    }

    async fn live(&self) -> Vec<PostRecord> {
        self.posts
            .lock()
            .await
            .iter()
            .filter(|post| post.deleted_at.is_none())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PostsRepo for FakePosts {
    async fn list_by_recency(
        &self,
        community_id: i64,
        before_post_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        self.recency_calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);
        self.check()?;
        let mut posts: Vec<_> = self
            .live()
            .await
            .into_iter()
            .filter(|post| post.community_id == community_id)
            .filter(|post| before_post_id.is_none_or(|before| post.post_id < before))
            .collect();
        posts.sort_by(|a, b| b.post_id.cmp(&a.post_id));
        posts.truncate(limit);
        Ok(posts)
    }

    async fn list_by_reply_time(
        &self,
        community_id: i64,
        before_reply_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        self.reply_calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);
        self.check()?;
        let mut posts: Vec<_> = self
            .live()
            .await
            .into_iter()
            .filter(|post| post.community_id == community_id)
            .filter(|post| before_reply_time.is_none_or(|before| post.last_reply_time < before))
            .collect();
        posts.sort_by(|a, b| {
            (b.last_reply_time, b.post_id).cmp(&(a.last_reply_time, a.post_id))
        });
        posts.truncate(limit);
        Ok(posts)
    }

    async fn list_by_popularity(
        &self,
        scope: PopularScope,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        self.popularity_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut posts: Vec<_> = self
            .live()
            .await
            .into_iter()
            .filter(|post| match scope {
                PopularScope::Global => true,
                PopularScope::Community(id) => post.community_id == id,
            })
            .collect();
        posts.sort_by(|a, b| {
            (b.star_count, b.collection_count, b.post_id).cmp(&(
                a.star_count,
                a.collection_count,
                a.post_id,
            ))
        });
        posts.truncate(limit);
        Ok(posts)
    }

    async fn list_by_authors(
        &self,
        user_ids: &[i64],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        self.check()?;
        let mut posts: Vec<_> = self
            .live()
            .await
            .into_iter()
            .filter(|post| user_ids.contains(&post.user_id))
            .collect();
        posts.sort_by(|a, b| b.post_id.cmp(&a.post_id));
        Ok(posts.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_community_ids(&self) -> Result<Vec<i64>, RepoError> {
        self.check()?;
        let ids: BTreeSet<i64> = self
            .live()
            .await
            .iter()
            .map(|post| post.community_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn insert_post(&self, post: NewPost) -> Result<PostRecord, RepoError> {
        self.check()?;
        let post_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = post.into_record(post_id, 2_000_000 + post_id);
        self.posts.lock().await.push(record.clone());
        Ok(record)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.check()
    }
}

fn unreachable(service: &'static str) -> CollaboratorError {
    CollaboratorError::transport(service, "connection refused")
}

/// Collaborator stand-in: likes = `post_id * 10`, comments = 3, viewer
/// flags true for even post ids.
#[derive(Default)]
pub struct FakeCollaborators {
    pub failing_likes: Mutex<HashSet<i64>>,
    pub failing_users: Mutex<HashSet<i64>>,
    pub following: Mutex<HashMap<i64, Vec<i64>>>,
    pub follows_down: AtomicBool,
    /// Delay before every like count answers, in milliseconds.
    pub like_delay_ms: AtomicU64,
    pub user_calls: AtomicUsize,
    pub community_calls: AtomicUsize,
    pub flag_calls: AtomicUsize,
}

impl FakeCollaborators {
    pub fn bundle(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            users: self.clone(),
            communities: self.clone(),
            likes: self.clone(),
            comments: self.clone(),
            collects: self.clone(),
            follows: self.clone(),
        }
    }
}

#[async_trait]
impl UserDirectory for FakeCollaborators {
    async fn get_user(&self, user_id: i64) -> Result<UserInfo, CollaboratorError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_users.lock().await.contains(&user_id) {
            return Err(unreachable("users"));
        }
        Ok(UserInfo {
            user_id,
            username: format!("user-{user_id}"),
            avatar: format!("https://avatars.example/{user_id}.png"),
        })
    }
}

#[async_trait]
impl CommunityDirectory for FakeCollaborators {
    async fn get_community(&self, community_id: i64) -> Result<CommunityInfo, CollaboratorError> {
        self.community_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CommunityInfo {
            community_id,
            name: format!("community-{community_id}"),
            avatar: String::new(),
        })
    }
}

#[async_trait]
impl LikeCounter for FakeCollaborators {
    async fn like_count(&self, post_id: i64) -> Result<i64, CollaboratorError> {
        let delay = self.like_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing_likes.lock().await.contains(&post_id) {
            return Err(unreachable("likes"));
        }
        Ok(post_id * 10)
    }

    async fn is_liked(&self, _actor_id: i64, post_id: i64) -> Result<bool, CollaboratorError> {
        self.flag_calls.fetch_add(1, Ordering::SeqCst);
        Ok(post_id % 2 == 0)
    }
}

#[async_trait]
impl CommentCounter for FakeCollaborators {
    async fn comment_count(&self, _post_id: i64, _actor_id: i64) -> Result<i64, CollaboratorError> {
        Ok(3)
    }
}

#[async_trait]
impl CollectFlag for FakeCollaborators {
    async fn is_collected(&self, _actor_id: i64, post_id: i64) -> Result<bool, CollaboratorError> {
        self.flag_calls.fetch_add(1, Ordering::SeqCst);
        Ok(post_id % 2 == 0)
    }
}

#[async_trait]
impl FollowDirectory for FakeCollaborators {
    async fn following(&self, actor_id: i64) -> Result<Vec<i64>, CollaboratorError> {
        if self.follows_down.load(Ordering::SeqCst) {
            return Err(unreachable("follows"));
        }
        Ok(self
            .following
            .lock()
            .await
            .get(&actor_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct Harness {
    pub posts: Arc<FakePosts>,
    pub store: Arc<MemoryCacheStore>,
    pub tasks: Arc<BackgroundTasks>,
    pub collaborators: Arc<FakeCollaborators>,
    pub feeds: FeedService,
    pub maintainer: Arc<CacheMaintainer>,
    pub config: CacheConfig,
}

impl Harness {
    pub fn new(posts: FakePosts) -> Self {
        Self::with_config(posts, CacheConfig::default())
    }

    pub fn with_config(posts: FakePosts, config: CacheConfig) -> Self {
        let posts = Arc::new(posts);
        let store = Arc::new(MemoryCacheStore::new());
        let tasks = Arc::new(BackgroundTasks::new());
        let collaborators = Arc::new(FakeCollaborators::default());

        let repo: Arc<dyn PostsRepo> = posts.clone();
        let cache: Arc<dyn CacheStore> = store.clone();
        let spawner: Arc<dyn TaskSpawner> = tasks.clone();
        let enricher = Enricher::new(collaborators.bundle(), EnrichConfig::default());
        let feeds = FeedService::new(
            repo.clone(),
            cache.clone(),
            spawner,
            enricher,
            collaborators.clone(),
            config.clone(),
        );
        let maintainer = Arc::new(CacheMaintainer::new(
            repo,
            cache,
            feeds.clone(),
            config.clone(),
        ));

        Self {
            posts,
            store,
            tasks,
            collaborators,
            feeds,
            maintainer,
            config,
        }
    }

    /// Await every background population submitted so far.
    pub async fn settle(&self) -> usize {
        self.tasks.join_all().await
    }
}
