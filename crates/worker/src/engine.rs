use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use jobproc_config::EngineConfig;
use jobproc_domain::{InputData, JobStatus, OutputData};
use jobproc_errors::{codes, JobProcError};

use crate::loader::ProcessorLoader;

/// 在途执行的可取消句柄
#[derive(Debug, Clone)]
struct ActiveExecution {
    token: CancellationToken,
    generation: u64,
}

/// 引擎状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub pool_size: usize,
    pub active_count: usize,
    pub active_job_ids: Vec<i64>,
}

/// 作业执行引擎
///
/// 并发度由信号量控制。扩容直接增加许可；缩容先回收空闲许可，
/// 不足部分记为欠额，由后台任务在在途作业归还许可时回收。
pub struct JobEngine {
    loader: Arc<ProcessorLoader>,
    semaphore: Arc<Semaphore>,
    pool_size: AtomicUsize,
    shrink_debt: Arc<AtomicUsize>,
    active_jobs: Arc<DashMap<i64, ActiveExecution>>,
    active_count: Arc<AtomicUsize>,
    next_generation: AtomicU64,
    tracker: TaskTracker,
    /// 所有执行令牌的父令牌，关闭超时时一次取消
    root_token: CancellationToken,
}

impl JobEngine {
    pub fn new(loader: Arc<ProcessorLoader>, pool_size: usize) -> Self {
        let pool_size = EngineConfig::clamp_pool_size(pool_size);
        gauge!("jobproc_engine_pool_size").set(pool_size as f64);
        info!(pool_size = pool_size, "作业引擎已创建");

        Self {
            loader,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            pool_size: AtomicUsize::new(pool_size),
            shrink_debt: Arc::new(AtomicUsize::new(0)),
            active_jobs: Arc::new(DashMap::new()),
            active_count: Arc::new(AtomicUsize::new(0)),
            next_generation: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            root_token: CancellationToken::new(),
        }
    }

    pub fn loader(&self) -> &Arc<ProcessorLoader> {
        &self.loader
    }

    /// 调整工作池大小，返回截断到 [1, 50] 后的值
    pub fn resize_pool(&self, new_size: usize) -> usize {
        let target = EngineConfig::clamp_pool_size(new_size);
        let previous = self.pool_size.swap(target, Ordering::SeqCst);

        if target > previous {
            self.grow(target - previous);
        } else if target < previous {
            self.shrink(previous - target);
        }

        gauge!("jobproc_engine_pool_size").set(target as f64);
        info!(previous = previous, pool_size = target, "工作池大小已调整");
        target
    }

    fn grow(&self, n: usize) {
        // 先抵消尚未回收的缩容欠额
        let mut owed = self.shrink_debt.load(Ordering::SeqCst);
        loop {
            let repay = owed.min(n);
            match self.shrink_debt.compare_exchange(
                owed,
                owed - repay,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.semaphore.add_permits(n - repay);
                    return;
                }
                Err(current) => owed = current,
            }
        }
    }

    fn shrink(&self, n: usize) {
        let forgotten = self.semaphore.forget_permits(n);
        let remaining = n - forgotten;
        if remaining == 0 {
            return;
        }

        self.shrink_debt.fetch_add(remaining, Ordering::SeqCst);
        let semaphore = self.semaphore.clone();
        let debt = self.shrink_debt.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(remaining = remaining, "没有运行时，缩容欠额将在下次扩容时抵消");
            return;
        };
        handle.spawn(async move {
            while debt.load(Ordering::SeqCst) > 0 {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                if debt
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
                    .is_ok()
                {
                    permit.forget();
                } else {
                    break;
                }
            }
        });
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.load(Ordering::SeqCst)
    }

    /// 正在执行（已占用工作槽）的作业数
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// 已登记的作业 id（含排队中），升序
    pub fn active_job_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.active_jobs.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            pool_size: self.pool_size(),
            active_count: self.active_count(),
            active_job_ids: self.active_job_ids(),
        }
    }

    /// 提交作业到工作池
    ///
    /// 返回前已按 `input.job_id` 登记可取消句柄；执行结束后自动注销。
    pub fn execute_async(
        &self,
        input: InputData,
        package_path: impl Into<String>,
        checksum: Option<String>,
    ) -> JoinHandle<OutputData> {
        let package_path = package_path.into();
        let job_id = input.job_id;
        let token = self.root_token.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        if let Some(id) = job_id {
            let previous = self.active_jobs.insert(
                id,
                ActiveExecution {
                    token: token.clone(),
                    generation,
                },
            );
            if previous.is_some() {
                warn!(job_id = id, "作业已有在途执行，句柄被替换");
            }
        }

        let loader = self.loader.clone();
        let semaphore = self.semaphore.clone();
        let active_count = self.active_count.clone();
        let active_jobs = self.active_jobs.clone();

        self.tracker.spawn(async move {
            let output = run_execution(
                &loader,
                semaphore,
                &active_count,
                &input,
                &package_path,
                checksum.as_deref(),
                &token,
            )
            .await;

            if let Some(id) = job_id {
                active_jobs.remove_if(&id, |_, active| active.generation == generation);
            }

            counter!(
                "jobproc_jobs_completed_total",
                "status" => output.resolved_status().as_str()
            )
            .increment(1);
            output
        })
    }

    /// 请求取消作业
    ///
    /// 存在未结束的句柄时发出中断并立即移除，返回 true。
    pub fn cancel_job(&self, job_id: i64) -> bool {
        match self.active_jobs.remove(&job_id) {
            Some((_, active)) if !active.token.is_cancelled() => {
                active.token.cancel();
                info!(job_id = job_id, "已请求取消作业");
                true
            }
            _ => false,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// 停止接收新作业并等待在途执行
    ///
    /// 排队中的作业以 FAILED 结束。超过 `grace` 后取消剩余作业并等待它们返回，
    /// 此时返回 false。返回时所有执行句柄都已产出结果。
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.semaphore.close();
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            info!("作业引擎已停止");
            return true;
        }

        warn!(
            remaining = self.active_jobs.len(),
            "等待在途作业超时，取消剩余作业"
        );
        self.root_token.cancel();
        self.tracker.wait().await;
        info!("剩余作业已取消，作业引擎已停止");
        false
    }
}

/// 占用工作槽期间计数
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_execution(
    loader: &ProcessorLoader,
    semaphore: Arc<Semaphore>,
    active_count: &AtomicUsize,
    input: &InputData,
    package_path: &str,
    checksum: Option<&str>,
    token: &CancellationToken,
) -> OutputData {
    let job_id = input.job_id;

    let _permit = tokio::select! {
        biased;
        _ = token.cancelled() => return cancelled_output(job_id),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                return OutputData::error(
                    job_id,
                    JobStatus::Failed,
                    codes::ENGINE_ERROR,
                    "作业引擎已关闭，作业未执行",
                )
            }
        },
    };
    let _active = ActiveGuard::enter(active_count);

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            info!(job_id = ?job_id, "作业执行被取消");
            cancelled_output(job_id)
        }
        output = attempt(loader, input, package_path, checksum) => output,
    }
}

async fn attempt(
    loader: &ProcessorLoader,
    input: &InputData,
    package_path: &str,
    checksum: Option<&str>,
) -> OutputData {
    let job_id = input.job_id;

    let processor = match loader
        .load(package_path, &input.processor_name, checksum)
        .await
    {
        Ok(processor) => processor,
        Err(e) => {
            warn!(
                job_id = ?job_id,
                processor_name = %input.processor_name,
                package_path = package_path,
                error = %e,
                "处理器加载失败"
            );
            return OutputData::error(job_id, JobStatus::Failed, e.error_code(), e.to_string());
        }
    };

    let estimate = match AssertUnwindSafe(processor.review_job(input))
        .catch_unwind()
        .await
    {
        Ok(Ok(estimate)) => estimate,
        Ok(Err(e)) => return failed_output(job_id, e.to_string()),
        Err(panic) => return failed_output(job_id, panic_message(panic.as_ref())),
    };

    let timeout = estimate.timeout();
    debug!(
        job_id = ?job_id,
        estimate_ms = estimate.max_time_to_process_millis,
        timeout_ms = estimate.timeout_millis(),
        "开始处理作业"
    );

    match tokio::time::timeout(
        timeout,
        AssertUnwindSafe(processor.process_job(input)).catch_unwind(),
    )
    .await
    {
        Ok(Ok(Ok(mut output))) => {
            if output.job_id.is_none() {
                output.job_id = job_id;
            }
            output
        }
        Ok(Ok(Err(e))) => failed_output(job_id, e.to_string()),
        Ok(Err(panic)) => failed_output(job_id, panic_message(panic.as_ref())),
        Err(_) => {
            let err = JobProcError::ExecutionTimeout {
                timeout_ms: estimate.timeout_millis(),
            };
            warn!(job_id = ?job_id, error = %err, "作业执行超时");
            OutputData::error(job_id, JobStatus::TimedOut, err.error_code(), err.to_string())
        }
    }
}

fn cancelled_output(job_id: Option<i64>) -> OutputData {
    let err = JobProcError::Cancelled;
    OutputData::error(job_id, JobStatus::Cancelled, err.error_code(), err.to_string())
}

fn failed_output(job_id: Option<i64>, reason: String) -> OutputData {
    warn!(job_id = ?job_id, reason = %reason, "作业执行失败");
    OutputData::error(job_id, JobStatus::Failed, codes::FAILED, reason)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("处理器发生 panic: {detail}")
}
