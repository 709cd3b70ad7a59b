//! Cron job cutting over-grown feed caches back to their cap.

use apalis::prelude::*;

use super::context::{MaintenanceContext, job_failed};

/// Marker struct for the cron-triggered trim.
#[derive(Default, Debug, Clone)]
pub struct TrimCachesJob;

impl From<chrono::DateTime<chrono::Utc>> for TrimCachesJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_trim_caches_job(
    _job: TrimCachesJob,
    ctx: Data<MaintenanceContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.maintainer.trim_all().await {
        Ok(report) if report.trimmed > 0 => {
            tracing::info!(
                trimmed = report.trimmed,
                posts_removed = report.posts_removed,
                "Trimmed feed caches"
            );
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to trim feed caches");
            Err(job_failed(err))
        }
    }
}
