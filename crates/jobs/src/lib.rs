use std::{future::Future, path::Path, pin::pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use repopush_core::{config::Config, models::{ClaimedJob, JobResult}};
use repopush_db::Database;
use repopush_publish::{ProgressSink, PublishEngine};
use tokio::time::sleep;

/// Everything the worker needs, injected at construction: no ambient
/// globals, no module-level state.
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<Config>,
    pub db: Database,
    pub engine: Arc<PublishEngine>,
}

/// DB-backed progress sink for one claimed job. Progress is advisory, so
/// write failures are logged and dropped rather than failing the publish.
struct JobProgressWriter {
    db: Database,
    job_id: String,
}

#[async_trait]
impl ProgressSink for JobProgressWriter {
    async fn update(&self, step: &str, percentage: u8) {
        tracing::debug!("Job {}: {} ({}%)", self.job_id, step, percentage);
        if let Err(e) = self.db.update_progress(&self.job_id, step, percentage).await {
            tracing::warn!("Failed to write progress for job {}: {}", self.job_id, e);
        }
    }
}

/// The single background worker: claims queued jobs one at a time, runs the
/// publish engine, and guarantees each claimed job reaches a terminal status
/// with its temp archive removed.
pub struct Worker {
    ctx: JobContext,
}

impl Worker {
    pub fn new(ctx: JobContext) -> Self { Self { ctx } }

    /// Poll the job store until `shutdown` resolves. A claimed job always
    /// runs to completion; shutdown is only observed while idle.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let poll_interval = Duration::from_secs(self.ctx.config.worker.poll_interval_secs);
        let error_backoff = Duration::from_secs(self.ctx.config.worker.error_backoff_secs);
        tracing::info!("Worker started, looking for queued jobs");
        let mut shutdown = pin!(shutdown);
        loop {
            match self.ctx.db.claim_next_job().await {
                Ok(Some(job)) => {
                    if self.process(job).await {
                        // Back off harder after an unexpected failure to
                        // avoid a tight failure loop.
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = sleep(error_backoff) => {}
                        }
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to claim a job: {:?}", e);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(error_backoff) => {}
                    }
                }
            }
        }
        tracing::info!("Worker stopped");
    }

    /// Claim and process at most one job. Returns whether a job was claimed.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        match self.ctx.db.claim_next_job().await? {
            Some(job) => {
                self.process(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drive one claimed job to its terminal status. Returns true when an
    /// unexpected error escaped the engine's own handling. The temp archive
    /// is removed on every exit path, after the terminal write.
    async fn process(&self, job: ClaimedJob) -> bool {
        tracing::info!("Claimed job {} ({})", job.id, job.repo_name);
        let mut fatal = false;
        let handle = {
            let engine = self.ctx.engine.clone();
            let sink = JobProgressWriter { db: self.ctx.db.clone(), job_id: job.id.clone() };
            let ClaimedJob { access_token, archive_path, repo_name, is_private, .. } = job.clone();
            tokio::spawn(async move {
                engine
                    .publish(&access_token, Path::new(&archive_path), &repo_name, is_private, &sink)
                    .await
            })
        };
        let result = match handle.await {
            Ok(Ok(outcome)) => JobResult::ok(outcome.repo_url, outcome.repo_name),
            Ok(Err(e)) => JobResult::err(e.to_string()),
            Err(e) => {
                // A panic escaped the publish engine itself. The job still
                // reaches a terminal status and the worker survives.
                fatal = true;
                tracing::error!("Publish task for job {} died unexpectedly: {:?}", job.id, e);
                JobResult::err(format!("A fatal worker process error occurred: {e}"))
            }
        };
        match self.ctx.db.finish_job(&job.id, &result).await {
            Ok(true) => {
                let status = if result.success { "finished" } else { "failed" };
                tracing::info!("Job {} finished with status: {}", job.id, status);
            }
            Ok(false) => {
                tracing::warn!("Job {} was not processing; terminal write skipped", job.id);
            }
            Err(e) => {
                fatal = true;
                tracing::error!("Could not write terminal status for job {}: {:?}", job.id, e);
            }
        }
        remove_archive(&job.archive_path).await;
        fatal
    }
}

/// Remove an uploaded archive, retrying once as writable for files with
/// stripped permissions. Failure is logged, never escalated: publish outcome
/// is independent of cleanup success.
async fn remove_archive(path: &str) {
    let path = Path::new(path);
    if !path.exists() {
        return;
    }
    if tokio::fs::remove_file(path).await.is_ok() {
        tracing::debug!("Cleaned up temporary file {}", path.display());
        return;
    }
    let retried = (|| {
        let mut perms = std::fs::metadata(path)?.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() | 0o200);
        }
        #[cfg(not(unix))]
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
        std::fs::remove_file(path)
    })();
    match retried {
        Ok(()) => tracing::debug!("Cleaned up temporary file {}", path.display()),
        Err(e) => tracing::warn!("Could not remove temporary file {}: {}", path.display(), e),
    }
}
