//! Joins raw posts with author, community, counters and viewer flags.
//!
//! Author and community lookups are deduplicated across the batch. Counters
//! and viewer flags are fetched per post. All calls share one [`FanOut`] per
//! batch, and any call that fails leaves its field at the zero value.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::application::collaborators::Collaborators;
use crate::application::fanout::FanOut;
use crate::domain::entities::{CommunityInfo, EnrichedPost, PostRecord, UserInfo};

const DEFAULT_MAX_IN_FLIGHT: usize = 32;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 800;

/// Enrichment limits, resolved from the `[enrich]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// Outbound collaborator calls in flight per batch.
    pub max_in_flight: usize,
    /// Timeout of a single collaborator call.
    pub call_timeout_ms: u64,
    /// Budget for a whole batch; 0 disables it. Past the budget the batch
    /// is returned with every auxiliary field at its zero value.
    pub deadline_ms: u64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            deadline_ms: 0,
        }
    }
}

impl EnrichConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.max(1))
    }

    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_ms > 0).then(|| Duration::from_millis(self.deadline_ms))
    }
}

struct ViewerFlags {
    liked: Option<bool>,
    collected: Option<bool>,
}

struct PostFields {
    like_count: Option<i64>,
    comment_count: Option<i64>,
    viewer: Option<ViewerFlags>,
}

#[derive(Clone)]
pub struct Enricher {
    collaborators: Collaborators,
    config: EnrichConfig,
}

impl Enricher {
    pub fn new(collaborators: Collaborators, config: EnrichConfig) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    /// Enrich `posts` for `actor_id` (0 = anonymous, no viewer flags).
    ///
    /// The output has the same length and order as the input.
    #[instrument(skip(self, posts), fields(posts = posts.len()))]
    pub async fn enrich(&self, posts: Vec<PostRecord>, actor_id: i64) -> Vec<EnrichedPost> {
        if posts.is_empty() {
            return Vec::new();
        }
        let work = self.enrich_all(&posts, actor_id);
        let Some(deadline) = self.config.deadline() else {
            return work.await;
        };

        let outcome = tokio::time::timeout(deadline, work).await;
        match outcome {
            Ok(enriched) => enriched,
            Err(_) => {
                warn!(
                    deadline_ms = self.config.deadline_ms,
                    "Enrichment exceeded its deadline; returning bare posts"
                );
                degraded("batch");
                posts.into_iter().map(EnrichedPost::bare).collect()
            }
        }
    }

    async fn enrich_all(&self, posts: &[PostRecord], actor_id: i64) -> Vec<EnrichedPost> {
        let fields = self.fetch(posts, actor_id).await;
        merge(posts.to_vec(), fields)
    }

    async fn fetch(&self, posts: &[PostRecord], actor_id: i64) -> Fetched {
        let fanout = FanOut::new(self.config.max_in_flight, self.config.call_timeout());

        let user_ids: BTreeSet<i64> = posts.iter().map(|post| post.user_id).collect();
        let community_ids: BTreeSet<i64> = posts.iter().map(|post| post.community_id).collect();

        let users = join_all(user_ids.into_iter().map(|user_id| {
            let fanout = &fanout;
            async move {
                let user = fanout
                    .call("get_user", self.collaborators.users.get_user(user_id))
                    .await;
                (user_id, user)
            }
        }));
        let communities = join_all(community_ids.into_iter().map(|community_id| {
            let fanout = &fanout;
            async move {
                let community = fanout
                    .call(
                        "get_community",
                        self.collaborators.communities.get_community(community_id),
                    )
                    .await;
                (community_id, community)
            }
        }));
        let per_post = join_all(
            posts
                .iter()
                .map(|post| self.post_fields(&fanout, post.post_id, actor_id)),
        );

        let (users, communities, per_post) = futures::join!(users, communities, per_post);
        Fetched {
            users: users
                .into_iter()
                .filter_map(|(id, user)| user.map(|user| (id, user)))
                .collect(),
            communities: communities
                .into_iter()
                .filter_map(|(id, community)| community.map(|community| (id, community)))
                .collect(),
            per_post,
        }
    }

    async fn post_fields(&self, fanout: &FanOut, post_id: i64, actor_id: i64) -> PostFields {
        let likes = fanout.call("like_count", self.collaborators.likes.like_count(post_id));
        let comments = fanout.call(
            "comment_count",
            self.collaborators.comments.comment_count(post_id, actor_id),
        );

        if actor_id == 0 {
            let (like_count, comment_count) = futures::join!(likes, comments);
            return PostFields {
                like_count,
                comment_count,
                viewer: None,
            };
        }

        let liked = fanout.call(
            "is_liked",
            self.collaborators.likes.is_liked(actor_id, post_id),
        );
        let collected = fanout.call(
            "is_collected",
            self.collaborators.collects.is_collected(actor_id, post_id),
        );
        let (like_count, comment_count, liked, collected) =
            futures::join!(likes, comments, liked, collected);
        PostFields {
            like_count,
            comment_count,
            viewer: Some(ViewerFlags { liked, collected }),
        }
    }
}

struct Fetched {
    users: HashMap<i64, UserInfo>,
    communities: HashMap<i64, CommunityInfo>,
    per_post: Vec<PostFields>,
}

fn degraded(field: &'static str) {
    counter!("plaza_enrich_degraded_total", "field" => field).increment(1);
}

fn or_zero<T: Default>(value: Option<T>, field: &'static str) -> T {
    value.unwrap_or_else(|| {
        degraded(field);
        T::default()
    })
}

fn merge(posts: Vec<PostRecord>, fetched: Fetched) -> Vec<EnrichedPost> {
    let Fetched {
        users,
        communities,
        per_post,
    } = fetched;

    posts
        .into_iter()
        .zip(per_post)
        .map(|(post, fields)| {
            let author = or_zero(users.get(&post.user_id).cloned(), "author");
            let community = or_zero(communities.get(&post.community_id).cloned(), "community");
            let (is_liked, is_collected) = match fields.viewer {
                Some(flags) => (
                    Some(or_zero(flags.liked, "is_liked")),
                    Some(or_zero(flags.collected, "is_collected")),
                ),
                None => (None, None),
            };
            EnrichedPost {
                author,
                community,
                like_count: or_zero(fields.like_count, "like_count"),
                comment_count: or_zero(fields.comment_count, "comment_count"),
                is_liked,
                is_collected,
                post,
            }
        })
        .collect()
}
