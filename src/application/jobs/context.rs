use std::{str::FromStr, sync::Arc};

use apalis::prelude::Error as ApalisError;
use apalis_cron::Schedule;
use thiserror::Error;

use crate::application::maintenance::CacheMaintainer;

/// Shared context passed to the cache maintenance workers.
#[derive(Clone)]
pub struct MaintenanceContext {
    pub maintainer: Arc<CacheMaintainer>,
}

#[derive(Debug, Error)]
#[error("invalid cron expression `{expression}`: {reason}")]
pub struct ScheduleError {
    pub expression: String,
    pub reason: String,
}

/// Parse a six-field cron expression (seconds first).
pub fn cron_schedule(expression: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(expression).map_err(|err| ScheduleError {
        expression: expression.to_string(),
        reason: err.to_string(),
    })
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_ten_minutes_parses() {
        let schedule = cron_schedule("0 */10 * * * *").expect("schedule");
        let upcoming: Vec<_> = schedule.upcoming(chrono::Utc).take(2).collect();
        assert_eq!(upcoming.len(), 2);
        assert_eq!((upcoming[1] - upcoming[0]).num_minutes(), 10);
    }

    #[test]
    fn malformed_expression_is_reported() {
        let err = cron_schedule("every hour").expect_err("invalid");
        assert_eq!(err.expression, "every hour");
    }
}
