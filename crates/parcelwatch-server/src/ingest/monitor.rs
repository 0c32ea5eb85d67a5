//! Stuck-job monitor
//!
//! A worker that dies mid-pipeline leaves its job parked in a non-terminal
//! state forever. The monitor sweeps for jobs that entered a working state
//! too long ago, resets them, and reruns them from the source blob. Since
//! every run starts by clearing the job's staging rows and properties are
//! created conflict-safely, a rerun of a half-finished job converges on the
//! same end state.
//!
//! Jobs in `failed` are terminal and never picked up; reprocessing those is
//! a deliberate human action.

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::storage::Storage;

use super::config::IngestConfig;
use super::pipeline::{reset_job, UploadPipeline};

pub struct JobMonitor {
    db: PgPool,
    storage: Storage,
    config: IngestConfig,
}

impl JobMonitor {
    pub fn new(db: PgPool, storage: Storage, config: IngestConfig) -> Self {
        Self { db, storage, config }
    }

    /// Run the sweep loop on a background task for the life of the server.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.sweep_interval_secs,
                stuck_after_secs = self.config.stuck_after_secs,
                "stuck-job monitor started"
            );
            let mut ticker = tokio::time::interval(self.config.sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    error!(error = %e, "stuck-job sweep failed");
                }
            }
        })
    }

    /// Find jobs stuck in a working state and restart them.
    #[instrument(skip(self))]
    async fn sweep(&self) -> Result<usize, sqlx::Error> {
        let stuck: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT id, status FROM upload_jobs
             WHERE status NOT IN ('queued', 'complete', 'failed')
               AND started_at IS NOT NULL
               AND started_at < now() - make_interval(secs => $1)
             ORDER BY started_at ASC",
        )
        .bind(self.config.stuck_after_secs as f64)
        .fetch_all(&self.db)
        .await?;

        for (job_id, status) in &stuck {
            info!(job_id = %job_id, stuck_in = %status, "restarting stuck job");
            reset_job(&self.db, *job_id).await?;
            UploadPipeline::new(
                self.db.clone(),
                self.storage.clone(),
                self.config.clone(),
            )
            .spawn(*job_id);
        }

        if !stuck.is_empty() {
            info!(count = stuck.len(), "restarted stuck jobs");
        }
        Ok(stuck.len())
    }
}
