//! Submission of fire-and-forget cache work.
//!
//! Cache population runs after the response that triggered it has been
//! assembled. Work goes through [`TaskSpawner`] so that the server can drain
//! it on shutdown and tests can await it instead of racing a detached task.

use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::tasks";

pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, name: &'static str, task: BoxFuture<'static, ()>);
}

/// Tokio-backed spawner that keeps a handle to every submitted task.
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks submitted and not yet observed as finished.
    pub fn pending(&self) -> usize {
        let handles = mutex_lock(&self.handles, SOURCE, "pending");
        handles.iter().filter(|(_, handle)| !handle.is_finished()).count()
    }

    /// Await every submitted task, including tasks submitted while waiting.
    /// Returns how many tasks were joined.
    pub async fn join_all(&self) -> usize {
        let mut joined = 0;
        loop {
            let batch: Vec<_> = {
                let mut handles = mutex_lock(&self.handles, SOURCE, "join_all");
                handles.drain(..).collect()
            };
            if batch.is_empty() {
                return joined;
            }
            for (name, handle) in batch {
                if let Err(err) = handle.await {
                    warn!(task = name, error = %err, "Background cache task failed");
                }
                joined += 1;
            }
        }
    }
}

impl TaskSpawner for BackgroundTasks {
    fn spawn(&self, name: &'static str, task: BoxFuture<'static, ()>) {
        let handle = tokio::spawn(task);
        let mut handles = mutex_lock(&self.handles, SOURCE, "spawn");
        handles.retain(|(_, handle)| !handle.is_finished());
        handles.push((name, handle));
        debug!(task = name, in_flight = handles.len(), "Spawned background cache task");
    }
}
