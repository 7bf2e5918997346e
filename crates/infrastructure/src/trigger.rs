use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use jobproc_domain::{TriggerCallback, TriggerService};
use jobproc_errors::{JobProcError, JobProcResult};

struct ScheduledTrigger {
    id: u64,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// 进程内一次性触发服务
///
/// 每个触发器是一个休眠到 `fire_at` 的任务；进程重启后不保留。
/// 关闭时未到期的触发器被中止，已到期正在执行的回调会被等待完成。
pub struct TokioTriggerService {
    triggers: Arc<DashMap<String, ScheduledTrigger>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    tasks: TaskTracker,
}

impl TokioTriggerService {
    pub fn new() -> Self {
        Self {
            triggers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            tasks: TaskTracker::new(),
        }
    }

    pub fn fire_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.triggers.get(key).map(|t| t.fire_at)
    }
}

impl Default for TokioTriggerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TriggerService for TokioTriggerService {
    async fn schedule_at(
        &self,
        key: &str,
        fire_at: DateTime<Utc>,
        callback: TriggerCallback,
    ) -> JobProcResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(JobProcError::TriggerScheduling(format!(
                "触发服务已关闭，无法注册 {key}"
            )));
        }

        match self.triggers.entry(key.to_string()) {
            Entry::Occupied(_) => Err(JobProcError::TriggerScheduling(format!(
                "触发器已存在: {key}"
            ))),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let triggers = self.triggers.clone();
                let owned_key = key.to_string();

                let handle = self.tasks.spawn(async move {
                    let delay = (fire_at - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    tokio::time::sleep(delay).await;

                    // 已被取消或替换时不执行
                    if triggers
                        .remove_if(&owned_key, |_, t| t.id == id)
                        .is_none()
                    {
                        return;
                    }
                    debug!(key = %owned_key, "触发器到期");
                    callback().await;
                });

                vacant.insert(ScheduledTrigger {
                    id,
                    fire_at,
                    handle,
                });
                debug!(key = key, fire_at = %fire_at, "触发器已注册");
                Ok(())
            }
        }
    }

    async fn cancel(&self, key: &str) -> JobProcResult<bool> {
        match self.triggers.remove(key) {
            Some((_, trigger)) => {
                trigger.handle.abort();
                debug!(key = key, "触发器已取消");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.triggers.iter().map(|t| t.key().clone()).collect();
        keys.sort();
        keys
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let keys: Vec<String> = self.triggers.iter().map(|t| t.key().clone()).collect();
        let mut cancelled = 0;
        for key in keys {
            if let Some((_, trigger)) = self.triggers.remove(&key) {
                trigger.handle.abort();
                cancelled += 1;
            }
        }

        // 已到期的回调不会被中止
        self.tasks.close();
        self.tasks.wait().await;
        info!(cancelled = cancelled, "触发服务已关闭");
    }
}
