//! Cron job rebuilding the popularity snapshots.

use apalis::prelude::*;

use super::context::{MaintenanceContext, job_failed};

/// Marker struct for the cron-triggered popularity rebuild.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct RebuildPopularJob;

impl From<chrono::DateTime<chrono::Utc>> for RebuildPopularJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_rebuild_popular_job(
    _job: RebuildPopularJob,
    ctx: Data<MaintenanceContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.maintainer.rebuild_popular().await {
        Ok(report) if report.failed > 0 => {
            tracing::warn!(
                rebuilt = report.rebuilt,
                failed = report.failed,
                "Popularity rebuild finished with failures"
            );
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::warn!(error = %err, "Popularity rebuild failed");
            Err(job_failed(err))
        }
    }
}
