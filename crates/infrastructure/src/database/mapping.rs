//! 数据库行映射辅助

use jobproc_errors::{JobProcError, JobProcResult};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub struct MappingHelpers;

impl MappingHelpers {
    /// SQLite 中 JSON 以 TEXT 保存
    pub fn parse_parameters_sqlite(
        row: &SqliteRow,
        field_name: &str,
    ) -> JobProcResult<serde_json::Value> {
        let json_str: Option<String> = row.try_get(field_name)?;
        match json_str {
            Some(s) if !s.trim().is_empty() => s
                .parse()
                .map_err(|e| JobProcError::Serialization(format!("解析参数失败: {e}"))),
            _ => Ok(serde_json::Value::Object(serde_json::Map::new())),
        }
    }

    pub fn parameters_to_text(parameters: &serde_json::Value) -> JobProcResult<String> {
        serde_json::to_string(parameters)
            .map_err(|e| JobProcError::Serialization(format!("序列化参数失败: {e}")))
    }
}
