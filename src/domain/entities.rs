//! Domain entities mirrored from persistent storage and collaborator services.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;

/// Maximum accepted length of a post body, in characters.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// A forum post as stored by the durable post store.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub post_id: i64,
    pub user_id: i64,
    pub community_id: i64,
    pub content: String,
    pub star_count: i64,
    pub collection_count: i64,
    pub is_scan: bool,
    pub last_reply_time: i64,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

/// Input for creating a post. The id and timestamps are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPost {
    pub user_id: i64,
    pub community_id: i64,
    pub content: String,
    #[serde(default)]
    pub is_scan: bool,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.user_id <= 0 {
            return Err(DomainError::validation("user_id", "must be positive"));
        }
        if self.community_id <= 0 {
            return Err(DomainError::validation("community_id", "must be positive"));
        }
        if self.content.trim().is_empty() {
            return Err(DomainError::validation("content", "must not be empty"));
        }
        if self.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(DomainError::validation(
                "content",
                format!("exceeds {MAX_CONTENT_CHARS} characters"),
            ));
        }
        Ok(())
    }

    /// Materialize the record a successful insert produces.
    pub fn into_record(self, post_id: i64, now_ms: i64) -> PostRecord {
        PostRecord {
            post_id,
            user_id: self.user_id,
            community_id: self.community_id,
            content: self.content,
            star_count: 0,
            collection_count: 0,
            is_scan: self.is_scan,
            last_reply_time: now_ms,
            created_at: now_ms,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: i64,
    pub username: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityInfo {
    pub community_id: i64,
    pub name: String,
    pub avatar: String,
}

/// A post joined with live counters and viewer-specific flags.
///
/// Never cached per viewer; built fresh on each read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedPost {
    #[serde(flatten)]
    pub post: PostRecord,
    pub author: UserInfo,
    pub community: CommunityInfo,
    pub like_count: i64,
    pub comment_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_liked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_collected: Option<bool>,
}

impl EnrichedPost {
    /// Enriched shell with every auxiliary field at its zero value.
    pub fn bare(post: PostRecord) -> Self {
        Self {
            post,
            author: UserInfo::default(),
            community: CommunityInfo::default(),
            like_count: 0,
            comment_count: 0,
            is_liked: None,
            is_collected: None,
        }
    }
}

/// Scope of a popularity ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PopularScope {
    Global,
    Community(i64),
}

impl PopularScope {
    pub fn from_community(community_id: Option<i64>) -> Self {
        match community_id {
            Some(id) if id > 0 => Self::Community(id),
            _ => Self::Global,
        }
    }
}

/// One page of a feed plus the opaque position of the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub posts: Vec<EnrichedPost>,
    pub cursor: Option<String>,
}

impl FeedPage {
    pub fn empty() -> Self {
        Self {
            posts: Vec::new(),
            cursor: None,
        }
    }
}

pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}
