use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use super::RefreshLockCoordinator;
use crate::config::RefreshConfig;
use crate::orchestrator::IngestionOrchestrator;
use crate::store::{Store, StoreError};
use crate::types::{Job, JobStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub dequeued: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Periodically claims a small batch of queued refresh jobs and runs them one by one.
pub struct RefreshWorker {
    store: Arc<dyn Store>,
    orchestrator: Arc<IngestionOrchestrator>,
    config: RefreshConfig,
    owner: String,
    is_running: Arc<RwLock<bool>>,
    /// Bumped on every start and stop; a loop exits once it no longer owns the current value.
    generation: AtomicU64,
}

impl RefreshWorker {
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<IngestionOrchestrator>,
        config: RefreshConfig,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
            owner: owner.into(),
            is_running: Arc::new(RwLock::new(false)),
            generation: AtomicU64::new(0),
        }
    }

    /// Claim up to one batch and process it sequentially. Bounded external load
    /// matters more here than latency.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn drain_once(&self) -> Result<DrainReport, StoreError> {
        let jobs = self
            .store
            .dequeue_jobs(self.config.drain_batch_size, Utc::now())
            .await?;

        let mut report = DrainReport {
            dequeued: jobs.len(),
            ..Default::default()
        };

        for job in jobs {
            match self.process(&job).await {
                Ok(()) => report.succeeded += 1,
                Err(reason) => {
                    report.failed += 1;
                    error!("Refresh job {} for asset {} failed: {}", job.id, job.params.asset_id, reason);
                }
            }
        }

        if report.dequeued > 0 {
            info!(
                "Drained {} refresh jobs ({} ok, {} failed)",
                report.dequeued, report.succeeded, report.failed
            );
        }
        Ok(report)
    }

    async fn process(&self, job: &Job) -> Result<(), String> {
        let params = &job.params;
        let outcome = self
            .orchestrator
            .ingest(&params.chain, params.address, params.refresh_class, &self.owner)
            .await;

        // retries are the requester's call; a failed job is never re-queued here
        let (status, reason) = match outcome {
            Ok(_) => (JobStatus::Done, None),
            Err(e) => (JobStatus::Error, Some(e.to_string())),
        };

        if let Err(e) = self
            .store
            .finish_job(job.id, status, reason.clone(), Utc::now())
            .await
        {
            warn!("Could not record outcome of job {}: {}", job.id, e);
        }

        match reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// Start the drain loop on a fixed tick. A loop left over from an earlier
    /// start exits on its next tick instead of running alongside this one.
    pub async fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let generation = {
            let mut is_running = self.is_running.write().await;
            if *is_running {
                warn!("Refresh worker is already running");
                return None;
            }
            *is_running = true;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        info!(
            "🔄 Starting refresh worker: batch {} every {}s",
            self.config.drain_batch_size,
            self.config.drain_interval.as_secs()
        );

        let worker = Arc::clone(&self);
        Some(tokio::spawn(async move {
            let mut ticker = interval(worker.config.drain_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if worker.generation.load(Ordering::SeqCst) != generation {
                    info!("Refresh worker loop {} stopped", generation);
                    break;
                }
                if let Err(e) = worker.drain_once().await {
                    error!("Queue drain failed: {}", e);
                }
            }
        }))
    }

    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("Refresh worker stop requested");
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

/// Background deletion of terminal locks past their retention window.
pub fn spawn_lock_sweeper(locks: Arc<RefreshLockCoordinator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = locks.sweep().await {
                warn!("Lock sweep failed: {}", e);
            }
        }
    })
}
