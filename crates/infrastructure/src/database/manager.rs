use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use jobproc_config::DatabaseConfig;
use jobproc_errors::JobProcResult;

/// SQLite 连接池与表结构
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> JobProcResult<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // 每个 :memory: 连接都是独立数据库
        let max_connections = if config.url.contains(":memory:") {
            1
        } else {
            config.max_connections
        };

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1);
        if max_connections == 1 {
            // 连接被回收会丢失内存数据库
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(connect_options).await?;

        info!(url = %config.url, max_connections = max_connections, "数据库连接池已创建");
        Ok(Self { pool })
    }

    /// 内存数据库，已完成迁移
    pub async fn in_memory() -> JobProcResult<Self> {
        let manager = Self::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建表和索引（幂等）
    pub async fn migrate(&self) -> JobProcResult<()> {
        debug!("Running SQLite database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                processor_name TEXT NOT NULL,
                comment TEXT,
                notes TEXT,
                parameters TEXT NOT NULL DEFAULT '{}',
                submission_time TEXT NOT NULL,
                scheduled_run_time TEXT NOT NULL,
                start_time TEXT,
                end_time TEXT,
                status TEXT NOT NULL DEFAULT 'SCHEDULED',
                error_code TEXT,
                error_reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processor_definitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                processor_name TEXT NOT NULL UNIQUE,
                package_path TEXT NOT NULL,
                checksum TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                reason_code TEXT NOT NULL,
                reason_string TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS input_data_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_scheduled_run_time ON jobs(scheduled_run_time)",
            "CREATE INDEX IF NOT EXISTS idx_job_errors_job_id ON job_errors(job_id)",
            "CREATE INDEX IF NOT EXISTS idx_input_data_files_job_id ON input_data_files(job_id)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }

    pub async fn health_check(&self) -> JobProcResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
