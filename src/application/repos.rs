//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{NewPost, PopularScope, PostRecord};

/// Upper bound applied to every list query.
pub const MAX_QUERY_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Clamp a requested row count to `1..=MAX_QUERY_LIMIT`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_QUERY_LIMIT)
}

/// The durable post store. Every query excludes deleted posts.
#[async_trait]
pub trait PostsRepo: Send + Sync {
    /// Newest posts of a community with `post_id` strictly below `before`.
    async fn list_by_recency(
        &self,
        community_id: i64,
        before_post_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError>;

    /// Posts of a community ordered by `last_reply_time DESC, post_id DESC`,
    /// strictly older than `before_reply_time`.
    async fn list_by_reply_time(
        &self,
        community_id: i64,
        before_reply_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError>;

    /// Posts ordered by `star_count DESC, collection_count DESC, post_id DESC`.
    async fn list_by_popularity(
        &self,
        scope: PopularScope,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError>;

    /// Newest posts written by any of `user_ids`.
    async fn list_by_authors(
        &self,
        user_ids: &[i64],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError>;

    /// Every community with at least one live post.
    async fn list_community_ids(&self) -> Result<Vec<i64>, RepoError>;

    async fn insert_post(&self, post: NewPost) -> Result<PostRecord, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(120), 120);
        assert_eq!(clamp_limit(10_000), MAX_QUERY_LIMIT);
    }
}
