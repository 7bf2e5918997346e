use async_trait::async_trait;
use jobproc_domain::{JobError, JobErrorRepository};
use jobproc_errors::JobProcResult;
use sqlx::{Row, SqlitePool};

/// 作业错误记录，只追加
pub struct SqliteJobErrorRepository {
    pool: SqlitePool,
}

impl SqliteJobErrorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_error(row: &sqlx::sqlite::SqliteRow) -> JobProcResult<JobError> {
        Ok(JobError {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            reason_code: row.try_get("reason_code")?,
            reason_string: row.try_get("reason_string")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl JobErrorRepository for SqliteJobErrorRepository {
    async fn append(&self, error: &JobError) -> JobProcResult<JobError> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_errors (job_id, reason_code, reason_string, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, job_id, reason_code, reason_string, created_at
            "#,
        )
        .bind(error.job_id)
        .bind(&error.reason_code)
        .bind(&error.reason_string)
        .bind(error.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_error(&row)
    }

    async fn find_by_job_id(&self, job_id: i64) -> JobProcResult<Vec<JobError>> {
        let rows = sqlx::query(
            "SELECT id, job_id, reason_code, reason_string, created_at \
             FROM job_errors WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_error).collect()
    }
}
