use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use jobproc_errors::JobProcResult;

/// 触发时执行的回调
pub type TriggerCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

/// 一次性定时触发服务
///
/// 以唯一键注册回调，在不早于 `fire_at` 的时刻执行一次。
#[async_trait]
pub trait TriggerService: Send + Sync {
    /// 注册触发器；同一键已存在或服务拒绝时返回 `TriggerScheduling` 错误
    async fn schedule_at(
        &self,
        key: &str,
        fire_at: DateTime<Utc>,
        callback: TriggerCallback,
    ) -> JobProcResult<()>;

    /// 取消触发器，返回是否存在
    async fn cancel(&self, key: &str) -> JobProcResult<bool>;

    async fn pending_keys(&self) -> Vec<String>;

    /// 取消所有待触发回调并拒绝后续注册
    async fn shutdown(&self);
}

/// 作业触发器键
pub fn trigger_key(job_id: i64) -> String {
    format!("trigger-{job_id}")
}
