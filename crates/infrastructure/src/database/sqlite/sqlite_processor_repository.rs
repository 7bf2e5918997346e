use async_trait::async_trait;
use jobproc_domain::{ProcessorDefinition, ProcessorRepository};
use jobproc_errors::JobProcResult;
use sqlx::{Row, SqlitePool};
use tracing::debug;

const DEFINITION_COLUMNS: &str =
    "id, processor_name, package_path, checksum, active, created_at, updated_at";

pub struct SqliteProcessorRepository {
    pool: SqlitePool,
}

impl SqliteProcessorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_definition(row: &sqlx::sqlite::SqliteRow) -> JobProcResult<ProcessorDefinition> {
        Ok(ProcessorDefinition {
            id: row.try_get("id")?,
            processor_name: row.try_get("processor_name")?,
            package_path: row.try_get("package_path")?,
            checksum: row.try_get("checksum")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ProcessorRepository for SqliteProcessorRepository {
    async fn upsert(&self, definition: &ProcessorDefinition) -> JobProcResult<ProcessorDefinition> {
        // 冲突时保留原 created_at
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO processor_definitions
                (processor_name, package_path, checksum, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(processor_name) DO UPDATE SET
                package_path = excluded.package_path,
                checksum = excluded.checksum,
                active = excluded.active,
                updated_at = excluded.updated_at
            RETURNING {DEFINITION_COLUMNS}
            "#
        ))
        .bind(&definition.processor_name)
        .bind(&definition.package_path)
        .bind(&definition.checksum)
        .bind(definition.active)
        .bind(definition.created_at)
        .bind(chrono::Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let stored = Self::row_to_definition(&row)?;
        debug!(
            "保存处理器定义: {} -> {}",
            stored.processor_name, stored.package_path
        );
        Ok(stored)
    }

    async fn find_by_name(&self, processor_name: &str) -> JobProcResult<Option<ProcessorDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM processor_definitions WHERE processor_name = ?"
        ))
        .bind(processor_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_definition).transpose()
    }

    async fn find_active_by_name(
        &self,
        processor_name: &str,
    ) -> JobProcResult<Option<ProcessorDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM processor_definitions \
             WHERE processor_name = ? AND active = 1"
        ))
        .bind(processor_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_definition).transpose()
    }

    async fn delete(&self, id: i64) -> JobProcResult<bool> {
        let result = sqlx::query("DELETE FROM processor_definitions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> JobProcResult<Vec<ProcessorDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM processor_definitions ORDER BY processor_name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_definition).collect()
    }
}
