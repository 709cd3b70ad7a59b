//! Page windows, cache hit classification and opaque feed cursors.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("page numbers start at 1, got {0}")]
    InvalidPage(u32),
}

/// Offset and length of a 1-based page within a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedWindow {
    pub offset: usize,
    pub limit: usize,
}

impl FeedWindow {
    pub fn for_page(page: u32, page_size: usize) -> Result<Self, PaginationError> {
        if page == 0 {
            return Err(PaginationError::InvalidPage(page));
        }
        let limit = page_size.max(1);
        let offset = (page as usize - 1).saturating_mul(limit);
        Ok(Self { offset, limit })
    }

    /// One past the last index covered by the window.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.limit)
    }
}

/// How much of a requested window a cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    /// Nothing cached for the feed.
    Empty,
    /// The whole window is cached.
    Full,
    /// The window starts inside the cache and runs past its tail.
    Partial,
    /// The window starts at or past the cached tail.
    Beyond,
}

impl HitKind {
    pub fn classify(cached_len: usize, window: FeedWindow) -> Self {
        if cached_len == 0 {
            HitKind::Empty
        } else if window.end() <= cached_len {
            HitKind::Full
        } else if window.offset < cached_len {
            HitKind::Partial
        } else {
            HitKind::Beyond
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HitKind::Empty => "empty",
            HitKind::Full => "full",
            HitKind::Partial => "partial",
            HitKind::Beyond => "beyond",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CursorKind {
    Time,
    Reply,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FeedCursorPayload {
    k: CursorKind,
    p: i64,
}

/// Resume position handed to callers with every page.
///
/// Time feeds resume below a post id, reply feeds below a reply time. Both
/// bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCursor {
    Time { before_post_id: i64 },
    Reply { before_reply_time: i64 },
}

impl FeedCursor {
    pub fn encode(&self) -> String {
        let payload = match *self {
            FeedCursor::Time { before_post_id } => FeedCursorPayload {
                k: CursorKind::Time,
                p: before_post_id,
            },
            FeedCursor::Reply { before_reply_time } => FeedCursorPayload {
                k: CursorKind::Reply,
                p: before_reply_time,
            },
        };
        let serialized =
            serde_json::to_vec(&payload).expect("serializing feed cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: FeedCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(match payload.k {
            CursorKind::Time => FeedCursor::Time {
                before_post_id: payload.p,
            },
            CursorKind::Reply => FeedCursor::Reply {
                before_reply_time: payload.p,
            },
        })
    }

    pub fn before_post_id(&self) -> Option<i64> {
        match *self {
            FeedCursor::Time { before_post_id } => Some(before_post_id),
            FeedCursor::Reply { .. } => None,
        }
    }

    pub fn before_reply_time(&self) -> Option<i64> {
        match *self {
            FeedCursor::Reply { before_reply_time } => Some(before_reply_time),
            FeedCursor::Time { .. } => None,
        }
    }
}
