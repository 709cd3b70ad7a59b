//! Serialization boundary for cached values.
//!
//! Every value written to the cache store is a tagged, versioned JSON
//! document. Decoding checks both the tag and the schema version so a value
//! written by an older or foreign writer surfaces as [`CacheError::Codec`]
//! instead of a half-populated struct.

use serde::{Deserialize, Serialize};

use crate::domain::entities::{EnrichedPost, PostRecord};

use super::store::CacheError;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
enum CachedValue {
    Post {
        v: u32,
        post: PostRecord,
    },
    Shard {
        v: u32,
        posts: Vec<PostRecord>,
    },
    Popular {
        v: u32,
        generated_at: i64,
        posts: Vec<EnrichedPost>,
    },
}

/// Snapshot of the popularity ranking shared by every viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularBlob {
    pub generated_at: i64,
    pub posts: Vec<EnrichedPost>,
}

impl CachedValue {
    fn version(&self) -> u32 {
        match self {
            CachedValue::Post { v, .. }
            | CachedValue::Shard { v, .. }
            | CachedValue::Popular { v, .. } => *v,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            CachedValue::Post { .. } => "post",
            CachedValue::Shard { .. } => "shard",
            CachedValue::Popular { .. } => "popular",
        }
    }
}

fn encode(value: &CachedValue) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|err| CacheError::codec(err.to_string()))
}

fn decode(raw: &str, expected: &'static str) -> Result<CachedValue, CacheError> {
    let value: CachedValue = serde_json::from_str(raw)
        .map_err(|err| CacheError::codec(format!("malformed {expected} entry: {err}")))?;
    if value.tag() != expected {
        return Err(CacheError::codec(format!(
            "expected {expected} entry, found {}",
            value.tag()
        )));
    }
    if value.version() != SCHEMA_VERSION {
        return Err(CacheError::codec(format!(
            "{expected} entry has schema version {}, expected {SCHEMA_VERSION}",
            value.version()
        )));
    }
    Ok(value)
}

pub fn encode_post(post: &PostRecord) -> Result<String, CacheError> {
    encode(&CachedValue::Post {
        v: SCHEMA_VERSION,
        post: post.clone(),
    })
}

pub fn decode_post(raw: &str) -> Result<PostRecord, CacheError> {
    match decode(raw, "post")? {
        CachedValue::Post { post, .. } => Ok(post),
        _ => Err(CacheError::codec("expected post entry")),
    }
}

pub fn encode_shard(posts: &[PostRecord]) -> Result<String, CacheError> {
    encode(&CachedValue::Shard {
        v: SCHEMA_VERSION,
        posts: posts.to_vec(),
    })
}

pub fn decode_shard(raw: &str) -> Result<Vec<PostRecord>, CacheError> {
    match decode(raw, "shard")? {
        CachedValue::Shard { posts, .. } => Ok(posts),
        _ => Err(CacheError::codec("expected shard entry")),
    }
}

pub fn encode_popular(blob: &PopularBlob) -> Result<String, CacheError> {
    encode(&CachedValue::Popular {
        v: SCHEMA_VERSION,
        generated_at: blob.generated_at,
        posts: blob.posts.clone(),
    })
}

pub fn decode_popular(raw: &str) -> Result<PopularBlob, CacheError> {
    match decode(raw, "popular")? {
        CachedValue::Popular {
            generated_at,
            posts,
            ..
        } => Ok(PopularBlob {
            generated_at,
            posts,
        }),
        _ => Err(CacheError::codec("expected popular entry")),
    }
}
