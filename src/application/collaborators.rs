//! Contracts of the services the feed core reads from.
//!
//! Users, communities, likes, comments, collects and follows are owned by
//! other services. The feed only ever asks narrow lookup questions of them.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{CommunityInfo, UserInfo};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} unreachable: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
    #[error("{service} answered with status {status}")]
    Status { service: &'static str, status: u16 },
    #[error("{service} returned an undecodable body: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
    #[error("{service} did not answer in time")]
    Timeout { service: &'static str },
}

impl CollaboratorError {
    pub fn transport(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            service,
            message: err.to_string(),
        }
    }

    pub fn decode(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            service,
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<UserInfo, CollaboratorError>;
}

#[async_trait]
pub trait CommunityDirectory: Send + Sync {
    async fn get_community(&self, community_id: i64) -> Result<CommunityInfo, CollaboratorError>;
}

#[async_trait]
pub trait LikeCounter: Send + Sync {
    async fn like_count(&self, post_id: i64) -> Result<i64, CollaboratorError>;

    async fn is_liked(&self, actor_id: i64, post_id: i64) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait CommentCounter: Send + Sync {
    /// Comments on `post_id` visible to `actor_id` (0 for anonymous).
    async fn comment_count(&self, post_id: i64, actor_id: i64) -> Result<i64, CollaboratorError>;
}

#[async_trait]
pub trait CollectFlag: Send + Sync {
    async fn is_collected(&self, actor_id: i64, post_id: i64) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait FollowDirectory: Send + Sync {
    /// Ids of the users `actor_id` follows.
    async fn following(&self, actor_id: i64) -> Result<Vec<i64>, CollaboratorError>;
}

/// Handles to every collaborator service.
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserDirectory>,
    pub communities: Arc<dyn CommunityDirectory>,
    pub likes: Arc<dyn LikeCounter>,
    pub comments: Arc<dyn CommentCounter>,
    pub collects: Arc<dyn CollectFlag>,
    pub follows: Arc<dyn FollowDirectory>,
}
