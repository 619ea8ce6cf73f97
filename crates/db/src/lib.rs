use anyhow::{Context, Result, anyhow};
use repopush_core::{
    config::DbConfig,
    models::{ClaimedJob, JobProgress, JobResult, JobStatus, JobStatusView, NewJob},
};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase, sqlite::SqliteRow};
use uuid::Uuid;

/// Step text written when a job is claimed, before the engine reports anything.
const CLAIM_STEP: &str = "Preparing to process...";

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            tracing::info!(url = %config.url, "Creating database");
            Sqlite::create_database(&config.url).await.context("Failed to create database")?;
            tracing::info!("Database created");
        }
        let pool =
            SqlitePool::connect(&config.url).await.context("Failed to connect to database")?;
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) { self.pool.close().await }

    /// Insert a new job in `queued` state and return its id. Never touches
    /// the network; the submitting request returns immediately.
    pub async fn submit_job(&self, job: &NewJob) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, access_token, archive_path, repo_name, is_private)
            VALUES (?, 'queued', ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&job.access_token)
        .bind(&job.archive_path)
        .bind(&job.repo_name)
        .bind(job.is_private)
        .execute(&self.pool)
        .await
        .context("Failed to insert job")?;
        Ok(id)
    }

    /// Atomically claim the oldest queued job, transitioning it to
    /// `processing` with a freshly initialized progress record. The single
    /// UPDATE statement is what guarantees at most one worker ever holds a
    /// given job.
    pub async fn claim_next_job(&self) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing', progress_step = ?, progress_percentage = 0
            WHERE id = (SELECT id FROM jobs WHERE status = 'queued' ORDER BY rowid LIMIT 1)
            RETURNING id, access_token, archive_path, repo_name, is_private
            "#,
        )
        .bind(CLAIM_STEP)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim job")?;
        Ok(row.map(|row| ClaimedJob {
            id: row.get("id"),
            access_token: row.get("access_token"),
            archive_path: row.get("archive_path"),
            repo_name: row.get("repo_name"),
            is_private: row.get("is_private"),
        }))
    }

    /// Update the progress record of a job still in `processing`. Progress
    /// writes against terminal jobs are silently dropped, so status
    /// transitions stay monotonic no matter how late a write arrives.
    pub async fn update_progress(&self, job_id: &str, step: &str, percentage: u8) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET progress_step = ?, progress_percentage = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(step)
        .bind(percentage as i64)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("Failed to update job progress")?;
        Ok(())
    }

    /// Write the terminal status and result for a claimed job. Guarded on
    /// `processing` so the terminal write happens exactly once; returns
    /// whether this call performed it.
    pub async fn finish_job(&self, job_id: &str, result: &JobResult) -> Result<bool> {
        let status =
            if result.success { JobStatus::Finished.as_str() } else { JobStatus::Failed.as_str() };
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, result_success = ?, result_repo_url = ?, result_repo_name = ?,
                result_error = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(status)
        .bind(result.success)
        .bind(&result.repo_url)
        .bind(&result.repo_name)
        .bind(&result.error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("Failed to finish job")?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Read-only status projection for the polling client.
    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobStatusView>> {
        let row = sqlx::query(
            r#"
            SELECT status, progress_step, progress_percentage,
                   result_success, result_repo_url, result_repo_name, result_error
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job status")?;
        row.map(|row| parse_status_view(&row)).transpose()
    }
}

fn parse_status_view(row: &SqliteRow) -> Result<JobStatusView> {
    let status = row
        .get::<String, _>("status")
        .parse::<JobStatus>()
        .map_err(|()| anyhow!("Unknown job status in database"))?;
    let progress = match (
        row.get::<Option<String>, _>("progress_step"),
        row.get::<Option<i64>, _>("progress_percentage"),
    ) {
        (Some(step), Some(percentage)) => {
            Some(JobProgress { step, percentage: percentage.clamp(0, 100) as u8 })
        }
        _ => None,
    };
    let result = row.get::<Option<bool>, _>("result_success").map(|success| JobResult {
        success,
        repo_url: row.get("result_repo_url"),
        repo_name: row.get("result_repo_name"),
        error: row.get("result_error"),
    });
    Ok(JobStatusView { status, progress, result })
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn test_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect");
        sqlx::migrate!("../../migrations").run(&pool).await.expect("migrate");
        Database { pool }
    }

    fn new_job(name: &str) -> NewJob {
        NewJob {
            access_token: "token".to_string(),
            archive_path: format!("/tmp/{name}.zip"),
            repo_name: name.to_string(),
            is_private: false,
        }
    }

    #[tokio::test]
    async fn test_submit_then_query() {
        let db = test_db().await;
        let id = db.submit_job(&new_job("proj")).await.unwrap();
        let view = db.job_status(&id).await.unwrap().expect("job exists");
        assert_eq!(view.status, JobStatus::Queued);
        assert!(view.progress.is_none());
        assert!(view.result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        let db = test_db().await;
        assert!(db.job_status("no-such-job").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let db = test_db().await;
        let id = db.submit_job(&new_job("solo")).await.unwrap();
        let (a, b) = tokio::join!(db.claim_next_job(), db.claim_next_job());
        let claims = [a.unwrap(), b.unwrap()];
        assert_eq!(claims.iter().filter(|c| c.is_some()).count(), 1);
        let claimed = claims.into_iter().flatten().next().unwrap();
        assert_eq!(claimed.id, id);
        let view = db.job_status(&id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Processing);
        assert_eq!(view.progress.unwrap().percentage, 0);
    }

    #[tokio::test]
    async fn test_claim_is_fifo() {
        let db = test_db().await;
        let first = db.submit_job(&new_job("first")).await.unwrap();
        let second = db.submit_job(&new_job("second")).await.unwrap();
        assert_eq!(db.claim_next_job().await.unwrap().unwrap().id, first);
        assert_eq!(db.claim_next_job().await.unwrap().unwrap().id, second);
        assert!(db.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_write_is_exactly_once() {
        let db = test_db().await;
        let id = db.submit_job(&new_job("proj")).await.unwrap();
        // A job that was never claimed cannot be finished.
        assert!(!db.finish_job(&id, &JobResult::err("early")).await.unwrap());
        db.claim_next_job().await.unwrap().unwrap();
        assert!(db.finish_job(&id, &JobResult::ok("https://x".into(), "proj".into())).await.unwrap());
        // Second terminal write and late progress writes are dropped.
        assert!(!db.finish_job(&id, &JobResult::err("late")).await.unwrap());
        db.update_progress(&id, "stale", 10).await.unwrap();
        let view = db.job_status(&id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Finished);
        assert_eq!(view.result.unwrap().repo_name.as_deref(), Some("proj"));
        assert_ne!(view.progress.unwrap().step, "stale");
    }

    #[tokio::test]
    async fn test_progress_updates_visible_to_poller() {
        let db = test_db().await;
        let id = db.submit_job(&new_job("proj")).await.unwrap();
        db.claim_next_job().await.unwrap().unwrap();
        db.update_progress(&id, "Uploading file 3 of 10...", 35).await.unwrap();
        let view = db.job_status(&id).await.unwrap().unwrap();
        let progress = view.progress.unwrap();
        assert_eq!(progress.step, "Uploading file 3 of 10...");
        assert_eq!(progress.percentage, 35);
    }
}
