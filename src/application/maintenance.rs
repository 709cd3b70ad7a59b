//! Writes that keep the feed caches in step with the post store.
//!
//! [`CacheMaintainer`] owns the incremental insert path and the two periodic
//! sweeps (popularity rebuild and trimming). Cache trouble on any of them is
//! logged and counted; only post store failures abort an operation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::application::fanout::FanOut;
use crate::application::feed::FeedService;
use crate::application::repos::{PostsRepo, RepoError};
use crate::cache::{BoundedListCache, BoundedSortedCache, CacheConfig, CacheStore, InsertOutcome};
use crate::domain::entities::{NewPost, PopularScope, PostRecord};
use crate::domain::error::DomainError;

/// Upper bound on rebuilding one community's popularity snapshot.
const REBUILD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub rebuilt: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    pub communities: usize,
    pub trimmed: usize,
    pub posts_removed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct CacheMaintainer {
    posts: Arc<dyn PostsRepo>,
    feeds: FeedService,
    recency: BoundedListCache,
    replies: BoundedSortedCache,
    config: CacheConfig,
}

impl CacheMaintainer {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        store: Arc<dyn CacheStore>,
        feeds: FeedService,
        config: CacheConfig,
    ) -> Self {
        Self {
            recency: BoundedListCache::new(store.clone(), config.clone()),
            replies: BoundedSortedCache::new(store, config.clone()),
            posts,
            feeds,
            config,
        }
    }

    /// Persist a new post, then fold it into the warm caches of its
    /// community. Cache failures after the durable write are logged only.
    #[instrument(skip(self, post), fields(community_id = post.community_id))]
    pub async fn create_post(&self, post: NewPost) -> Result<PostRecord, MaintenanceError> {
        post.validate()?;
        let record = self.posts.insert_post(post).await?;

        let outcome = match self.recency.insert_newest(&record).await {
            Ok(InsertOutcome::Invalidated) => {
                warn!(
                    post_id = record.post_id,
                    "Recency cache kept changing during insert; dropped it"
                );
                "invalidated"
            }
            Ok(outcome) => {
                debug!(post_id = record.post_id, ?outcome, "Recency cache updated");
                outcome.as_str()
            }
            Err(err) => {
                warn!(
                    post_id = record.post_id,
                    error = %err,
                    "Failed to update recency cache after insert"
                );
                "error"
            }
        };
        counter!("plaza_cache_insert_total", "feed" => "time", "outcome" => outcome).increment(1);

        let outcome = match self.replies.add_if_exists(&record).await {
            Ok(true) => "applied",
            Ok(false) => "cold",
            Err(err) => {
                warn!(
                    post_id = record.post_id,
                    error = %err,
                    "Failed to update reply cache after insert"
                );
                "error"
            }
        };
        counter!("plaza_cache_insert_total", "feed" => "reply", "outcome" => outcome).increment(1);

        Ok(record)
    }

    /// Rebuild the global snapshot and the snapshot of every community.
    #[instrument(skip(self))]
    pub async fn rebuild_popular(&self) -> Result<RebuildReport, MaintenanceError> {
        let mut report = RebuildReport::default();
        match self.feeds.refresh_popular(PopularScope::Global).await {
            Ok(_) => {
                report.rebuilt += 1;
                counter!("plaza_popular_rebuild_total", "scope" => "global", "outcome" => "ok")
                    .increment(1);
            }
            Err(err) => {
                warn!(error = %err, "Failed to rebuild global popularity snapshot");
                report.failed += 1;
                counter!("plaza_popular_rebuild_total", "scope" => "global", "outcome" => "error")
                    .increment(1);
            }
        }

        let communities = self.posts.list_community_ids().await?;
        let fanout = FanOut::new(self.config.rebuild_concurrency, REBUILD_TIMEOUT);
        let rebuilt = join_all(communities.iter().map(|&community_id| {
            fanout.call("rebuild_popular", async move {
                self.feeds
                    .refresh_popular(PopularScope::Community(community_id))
                    .await
                    .map_err(|err| format!("community {community_id}: {err}"))
            })
        }))
        .await;

        for outcome in rebuilt {
            let label = match outcome {
                Some(_) => {
                    report.rebuilt += 1;
                    "ok"
                }
                None => {
                    report.failed += 1;
                    "error"
                }
            };
            counter!("plaza_popular_rebuild_total", "scope" => "community", "outcome" => label)
                .increment(1);
        }
        info!(
            rebuilt = report.rebuilt,
            failed = report.failed,
            "Popularity snapshots rebuilt"
        );
        Ok(report)
    }

    /// Cut every community's caches back to `trim_cap_posts`.
    #[instrument(skip(self))]
    pub async fn trim_all(&self) -> Result<TrimReport, MaintenanceError> {
        let communities = self.posts.list_community_ids().await?;
        let cap = self.config.trim_cap_posts;
        let mut report = TrimReport {
            communities: communities.len(),
            ..TrimReport::default()
        };

        for community_id in communities {
            let mut removed_here = 0;
            let mut failed_here = false;

            match self.recency.trim(community_id, cap).await {
                Ok(Some(removed)) => {
                    removed_here += removed;
                    counter!("plaza_cache_trim_total", "feed" => "time").increment(1);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(community_id, error = %err, "Failed to trim recency cache");
                    failed_here = true;
                }
            }
            match self.replies.trim(community_id, cap).await {
                Ok(Some(removed)) => {
                    removed_here += removed;
                    counter!("plaza_cache_trim_total", "feed" => "reply").increment(1);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(community_id, error = %err, "Failed to trim reply cache");
                    failed_here = true;
                }
            }

            if removed_here > 0 {
                report.trimmed += 1;
                report.posts_removed += removed_here;
            }
            if failed_here {
                report.failed += 1;
            }
        }

        info!(
            communities = report.communities,
            trimmed = report.trimmed,
            posts_removed = report.posts_removed,
            failed = report.failed,
            "Feed caches trimmed"
        );
        Ok(report)
    }
}
