use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobproc_domain::{Job, JobCompletion, JobRepository, JobStatus};
use jobproc_errors::{codes, JobProcResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

const JOB_COLUMNS: &str = "id, name, processor_name, comment, notes, parameters, submission_time, \
     scheduled_run_time, start_time, end_time, status, error_code, error_reason";

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> JobProcResult<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            processor_name: row.try_get("processor_name")?,
            comment: row.try_get("comment")?,
            notes: row.try_get("notes")?,
            parameters: MappingHelpers::parse_parameters_sqlite(row, "parameters")?,
            submission_time: row.try_get("submission_time")?,
            scheduled_run_time: row.try_get("scheduled_run_time")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            status: row.try_get("status")?,
            error_code: row.try_get("error_code")?,
            error_reason: row.try_get("error_reason")?,
        })
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(job_name = %job.name, processor_name = %job.processor_name))]
    async fn create(&self, job: &Job) -> JobProcResult<Job> {
        let parameters = MappingHelpers::parameters_to_text(&job.parameters)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (name, processor_name, comment, notes, parameters, submission_time,
                              scheduled_run_time, start_time, end_time, status, error_code, error_reason)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&job.name)
        .bind(&job.processor_name)
        .bind(&job.comment)
        .bind(&job.notes)
        .bind(parameters)
        .bind(job.submission_time)
        .bind(job.scheduled_run_time)
        .bind(job.start_time)
        .bind(job.end_time)
        .bind(job.status)
        .bind(&job.error_code)
        .bind(&job.error_reason)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_job(&row)?;
        debug!("创建作业成功: ID {}, 名称: {}", created.id, created.name);
        Ok(created)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn find_by_id(&self, id: i64) -> JobProcResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn find_by_status(&self, status: JobStatus) -> JobProcResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY scheduled_run_time, id"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self), fields(job_id = %id, expected = %expected))]
    async fn reschedule(
        &self,
        id: i64,
        expected: JobStatus,
        run_at: DateTime<Utc>,
    ) -> JobProcResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, scheduled_run_time = ?, start_time = NULL, end_time = NULL,
                error_code = NULL, error_reason = NULL
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Scheduled)
        .bind(run_at)
        .bind(id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_running(&self, id: i64, started_at: DateTime<Utc>) -> JobProcResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, start_time = ? WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Running)
        .bind(started_at)
        .bind(id)
        .bind(JobStatus::Scheduled)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, id: i64, completion: &JobCompletion) -> JobProcResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = ?, end_time = ?, error_code = ?, error_reason = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(completion.status)
        .bind(completion.end_time)
        .bind(&completion.error_code)
        .bind(&completion.error_reason)
        .bind(id)
        .bind(JobStatus::Running)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_schedule_failed(&self, id: i64, reason: &str) -> JobProcResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = ?, notes = ?, error_code = ?, error_reason = ?, end_time = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::ScheduleFailed)
        .bind(reason)
        .bind(codes::SCHEDULE_FAILED)
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .bind(JobStatus::Scheduled)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
