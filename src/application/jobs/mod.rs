mod context;
mod popular;
mod trim;

pub use context::{MaintenanceContext, ScheduleError, cron_schedule, job_failed};
pub use popular::{RebuildPopularJob, process_rebuild_popular_job};
pub use trim::{TrimCachesJob, process_trim_caches_job};
