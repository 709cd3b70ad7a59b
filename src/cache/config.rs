//! Cache configuration.
//!
//! Sizes, water marks and TTLs for the per-community feed caches, resolved
//! from the `[cache]` section of `plaza.toml`.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_POPULATION_PAGES: usize = 6;
const DEFAULT_SHARD_SIZE: usize = 20;
const DEFAULT_LIST_TTL_SECS: u64 = 2 * 60 * 60;
const DEFAULT_SORTED_TTL_SECS: u64 = 2 * 60 * 60;
const DEFAULT_POPULAR_TTL_SECS: u64 = 60 * 60;
const DEFAULT_POPULAR_LIMIT: usize = 50;
const DEFAULT_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_INSERT_HIGH_WATER_SHARDS: usize = 10;
const DEFAULT_INSERT_LOW_WATER_SHARDS: usize = 6;
const DEFAULT_TRIM_CAP_POSTS: usize = 200;
const DEFAULT_REBUILD_CONCURRENCY: usize = 4;

/// Where the feed caches live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    #[default]
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown cache backend `{other}` (expected redis|memory)")),
        }
    }
}

/// Feed cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backing store for every feed cache.
    pub backend: CacheBackend,
    /// Connection URL used when `backend` is Redis.
    pub redis_url: Option<String>,
    /// Posts per feed page.
    pub page_size: usize,
    /// Pages fetched from the post store when a cold cache is populated.
    pub population_pages: usize,
    /// Posts per serialized shard in the recency list.
    pub shard_size: usize,
    /// Sliding TTL of the recency list.
    pub list_ttl_secs: u64,
    /// TTL of the reply-time sorted set.
    pub sorted_ttl_secs: u64,
    /// TTL of the popularity blobs.
    pub popular_ttl_secs: u64,
    /// Posts kept in each popularity blob.
    pub popular_limit: usize,
    /// Expiry of a population lock.
    pub lock_ttl_secs: u64,
    /// Shard count at which the insert path trims the recency list.
    pub insert_high_water_shards: usize,
    /// Shard count the insert path trims down to.
    pub insert_low_water_shards: usize,
    /// Posts retained per community by the trim job.
    pub trim_cap_posts: usize,
    /// Communities rebuilt concurrently by the popularity job.
    pub rebuild_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: None,
            page_size: DEFAULT_PAGE_SIZE,
            population_pages: DEFAULT_POPULATION_PAGES,
            shard_size: DEFAULT_SHARD_SIZE,
            list_ttl_secs: DEFAULT_LIST_TTL_SECS,
            sorted_ttl_secs: DEFAULT_SORTED_TTL_SECS,
            popular_ttl_secs: DEFAULT_POPULAR_TTL_SECS,
            popular_limit: DEFAULT_POPULAR_LIMIT,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            insert_high_water_shards: DEFAULT_INSERT_HIGH_WATER_SHARDS,
            insert_low_water_shards: DEFAULT_INSERT_LOW_WATER_SHARDS,
            trim_cap_posts: DEFAULT_TRIM_CAP_POSTS,
            rebuild_concurrency: DEFAULT_REBUILD_CONCURRENCY,
        }
    }
}

impl CacheConfig {
    /// Number of posts fetched when populating a cold cache.
    pub fn population_limit(&self) -> usize {
        self.page_size.max(1) * self.population_pages.max(1)
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size.max(2)
    }

    pub fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.list_ttl_secs)
    }

    pub fn sorted_ttl(&self) -> Duration {
        Duration::from_secs(self.sorted_ttl_secs)
    }

    pub fn popular_ttl(&self) -> Duration {
        Duration::from_secs(self.popular_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs.max(1))
    }

    /// Validate relationships between fields, returning the offending key.
    pub fn validate(&self) -> Result<(), (&'static str, &'static str)> {
        if self.page_size == 0 {
            return Err(("cache.page_size", "must be greater than zero"));
        }
        if self.shard_size < 2 {
            return Err(("cache.shard_size", "must be at least 2"));
        }
        if self.insert_low_water_shards == 0 {
            return Err(("cache.insert_low_water_shards", "must be greater than zero"));
        }
        if self.insert_low_water_shards >= self.insert_high_water_shards {
            return Err((
                "cache.insert_low_water_shards",
                "must be below cache.insert_high_water_shards",
            ));
        }
        if self.trim_cap_posts < self.page_size {
            return Err(("cache.trim_cap_posts", "must hold at least one page"));
        }
        if self.list_ttl_secs == 0 || self.sorted_ttl_secs == 0 || self.popular_ttl_secs == 0 {
            return Err(("cache.ttl", "TTLs must be greater than zero"));
        }
        Ok(())
    }
}
