//! Periodic housekeeping: stalled claims, job retention and expired
//! rate-limit windows.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::content::ContentStore;
use crate::error::StageError;
use crate::jobs::types::LEASE_EXPIRED;
use crate::jobs::{JobQueue, JobState};
use crate::rate_limit::RateLimitStore;

use super::pool::fail_owners;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub requeued_jobs: usize,
    pub purged_jobs: usize,
    pub cleared_windows: usize,
}

#[derive(Clone)]
pub struct Maintenance {
    queue: JobQueue,
    rate_limits: RateLimitStore,
    content: Arc<dyn ContentStore>,
}

impl std::fmt::Debug for Maintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Maintenance")
            .field("queue", &self.queue)
            .field("rate_limits", &self.rate_limits)
            .finish_non_exhaustive()
    }
}

impl Maintenance {
    pub fn new(
        queue: JobQueue,
        rate_limits: RateLimitStore,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            queue,
            rate_limits,
            content,
        }
    }

    /// Take back jobs whose worker went away; settle owners of those out of attempts.
    pub async fn requeue_stalled(&self) -> usize {
        let jobs = match self.queue.requeue_stalled().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "stalled job sweep failed");
                return 0;
            }
        };
        let message = StageError::infrastructure(LEASE_EXPIRED).entity_message();
        for job in jobs.iter().filter(|j| j.state == JobState::Failed) {
            fail_owners(self.content.as_ref(), job, job.payload.status_target(), &message).await;
        }
        jobs.len()
    }

    pub async fn run_once(&self) -> MaintenanceReport {
        let requeued_jobs = self.requeue_stalled().await;
        let purged_jobs = match self.queue.purge().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "job purge failed");
                0
            }
        };
        let cleared_windows = self.rate_limits.sweep().await;

        let report = MaintenanceReport {
            requeued_jobs,
            purged_jobs,
            cleared_windows,
        };
        if requeued_jobs + purged_jobs + cleared_windows > 0 {
            info!(requeued_jobs, purged_jobs, cleared_windows, "maintenance pass");
        } else {
            debug!("maintenance pass, nothing to do");
        }
        report
    }

    pub fn spawn(self, interval: Duration) -> MaintenanceHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            // The first tick fires at once, so a restart recovers stalled claims immediately.
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        });
        MaintenanceHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "maintenance task panicked");
        }
    }
}
