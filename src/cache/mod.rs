//! Plaza feed caches
//!
//! Cache-resident read models for the community feeds:
//!
//! - **Recency list**: shards of the newest posts per community
//!   ([`BoundedListCache`])
//! - **Reply-time set**: posts ranked by last reply per community
//!   ([`BoundedSortedCache`])
//! - **Popularity blob**: enriched top posts, global and per community
//!
//! All of them sit on a [`CacheStore`], either Redis or [`MemoryCacheStore`].
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! page_size = 20
//! population_pages = 6
//! shard_size = 20
//! # ... see config.rs for all options
//! ```

mod bounded_list;
mod bounded_sorted;
pub mod codec;
mod config;
pub mod keys;
mod lock;
mod memory;
mod population;
mod store;
mod tasks;

pub use bounded_list::{BoundedListCache, InsertOutcome};
pub use bounded_sorted::BoundedSortedCache;
pub use codec::PopularBlob;
pub use config::{CacheBackend, CacheConfig};
pub use memory::MemoryCacheStore;
pub use population::{PopulationGuard, PopulationLock};
pub use store::{CacheError, CacheStore, HeadSwap};
pub use tasks::{BackgroundTasks, TaskSpawner};
