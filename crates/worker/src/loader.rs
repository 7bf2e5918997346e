use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use jobproc_domain::JobProcessor;
use jobproc_errors::{JobProcError, JobProcResult};

use crate::checksum::{checksum_matches, sha256_file};

/// 已打开的插件包（加载上下文）
///
/// 同一包路径下的所有处理器名共享一个上下文。
#[async_trait]
pub trait PluginPackage: Send + Sync {
    fn package_path(&self) -> &str;

    fn processor_names(&self) -> Vec<String>;

    /// 按名称解析处理器；名称未提供时返回 `Load` 错误
    fn resolve(&self, processor_name: &str) -> JobProcResult<Arc<dyn JobProcessor>>;

    /// 从缓存移除时调用
    async fn close(&self);
}

/// 插件包的打开方式
#[async_trait]
pub trait PackageBackend: Send + Sync {
    async fn open(&self, package_path: &Path) -> JobProcResult<Arc<dyn PluginPackage>>;
}

type ContextCell = Arc<OnceCell<Arc<dyn PluginPackage>>>;

/// 插件加载器
pub struct ProcessorLoader {
    backend: Arc<dyn PackageBackend>,
    contexts: DashMap<String, ContextCell>,
}

impl ProcessorLoader {
    pub fn new(backend: Arc<dyn PackageBackend>) -> Self {
        Self {
            backend,
            contexts: DashMap::new(),
        }
    }

    /// 加载处理器
    ///
    /// 提供非空摘要时先校验包内容，校验失败不会创建或缓存上下文。
    pub async fn load(
        &self,
        package_path: &str,
        processor_name: &str,
        expected_checksum: Option<&str>,
    ) -> JobProcResult<Arc<dyn JobProcessor>> {
        if let Some(expected) = expected_checksum.filter(|c| !c.trim().is_empty()) {
            self.verify_checksum(package_path, expected).await?;
        }

        let package = self.context_for(package_path).await?;
        let processor = package.resolve(processor_name)?;
        debug!(
            package_path = package_path,
            processor_name = processor_name,
            "处理器已解析"
        );
        Ok(processor)
    }

    /// 移除并释放包路径对应的上下文，不存在时无操作
    pub async fn evict(&self, package_path: &str) {
        if let Some((_, cell)) = self.contexts.remove(package_path) {
            if let Some(package) = cell.get() {
                package.close().await;
                info!(package_path = package_path, "插件上下文已释放");
            }
        }
    }

    pub fn is_cached(&self, package_path: &str) -> bool {
        self.contexts
            .get(package_path)
            .is_some_and(|cell| cell.initialized())
    }

    pub fn cached_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .contexts
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        paths.sort();
        paths
    }

    async fn verify_checksum(&self, package_path: &str, expected: &str) -> JobProcResult<()> {
        let actual = sha256_file(package_path).await?;
        if checksum_matches(expected, &actual) {
            return Ok(());
        }

        counter!("jobproc_integrity_failures_total").increment(1);
        error!(
            package_path = package_path,
            expected = expected,
            actual = %actual,
            "插件包完整性校验失败，拒绝加载"
        );
        Err(JobProcError::Integrity {
            path: package_path.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }

    /// 同一路径并发首次加载时只创建一个上下文
    async fn context_for(&self, package_path: &str) -> JobProcResult<Arc<dyn PluginPackage>> {
        let cell: ContextCell = self
            .contexts
            .entry(package_path.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                let path = Path::new(package_path);
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return Err(JobProcError::package_not_found(package_path));
                }
                let package = self.backend.open(path).await?;
                counter!("jobproc_plugin_packages_loaded_total").increment(1);
                info!(
                    package_path = package_path,
                    processors = ?package.processor_names(),
                    "插件包已加载"
                );
                Ok(package)
            })
            .await
            .cloned();

        if result.is_err() {
            // 失败的单元格不能留在缓存中
            self.contexts
                .remove_if(package_path, |_, existing| Arc::ptr_eq(existing, &cell));
        }
        result
    }
}
