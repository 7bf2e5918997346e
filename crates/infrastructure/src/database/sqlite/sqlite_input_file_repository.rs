use async_trait::async_trait;
use jobproc_domain::{InputDataFile, InputFileRepository};
use jobproc_errors::JobProcResult;
use sqlx::{Row, SqlitePool};

pub struct SqliteInputFileRepository {
    pool: SqlitePool,
}

impl SqliteInputFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> JobProcResult<InputDataFile> {
        Ok(InputDataFile {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            file_name: row.try_get("file_name")?,
            file_path: row.try_get("file_path")?,
            file_size: row.try_get("file_size")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl InputFileRepository for SqliteInputFileRepository {
    async fn add(&self, file: &InputDataFile) -> JobProcResult<InputDataFile> {
        let row = sqlx::query(
            r#"
            INSERT INTO input_data_files (job_id, file_name, file_path, file_size, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, job_id, file_name, file_path, file_size, created_at
            "#,
        )
        .bind(file.job_id)
        .bind(&file.file_name)
        .bind(&file.file_path)
        .bind(file.file_size)
        .bind(file.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_file(&row)
    }

    async fn find_by_job_id(&self, job_id: i64) -> JobProcResult<Vec<InputDataFile>> {
        let rows = sqlx::query(
            "SELECT id, job_id, file_name, file_path, file_size, created_at \
             FROM input_data_files WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_file).collect()
    }
}
