//! Cache key definitions.

use crate::domain::entities::PopularScope;

const PREFIX: &str = "plaza";

/// Recency list of serialized shards for one community.
pub fn time_feed(community_id: i64) -> String {
    format!("{PREFIX}:feed:time:{community_id}")
}

/// Reply-time sorted set for one community.
pub fn reply_feed(community_id: i64) -> String {
    format!("{PREFIX}:feed:reply:{community_id}")
}

/// Popularity blob, global or per community.
pub fn popular(scope: PopularScope) -> String {
    match scope {
        PopularScope::Global => format!("{PREFIX}:feed:popular:global"),
        PopularScope::Community(id) => format!("{PREFIX}:feed:popular:{id}"),
    }
}

pub fn time_population_lock(community_id: i64) -> String {
    format!("{PREFIX}:lock:time:{community_id}")
}

pub fn reply_population_lock(community_id: i64) -> String {
    format!("{PREFIX}:lock:reply:{community_id}")
}
