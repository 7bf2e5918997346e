use std::sync::Arc;

use tracing::info;

use jobproc_domain::{ProcessorDefinition, ProcessorRepository};
use jobproc_errors::{JobProcError, JobProcResult};
use jobproc_worker::{sha256_file, ProcessorLoader};

/// 处理器注册表
///
/// 包文件被替换或注册被删除时同步释放加载器缓存。
pub struct ProcessorRegistry {
    repo: Arc<dyn ProcessorRepository>,
    loader: Arc<ProcessorLoader>,
}

impl ProcessorRegistry {
    pub fn new(repo: Arc<dyn ProcessorRepository>, loader: Arc<ProcessorLoader>) -> Self {
        Self { repo, loader }
    }

    pub fn validate_name(processor_name: &str) -> JobProcResult<()> {
        if processor_name.trim().is_empty() {
            return Err(JobProcError::validation_error("处理器名称不能为空"));
        }
        if processor_name.contains('/') || processor_name.contains('\\') || processor_name.contains("..")
        {
            return Err(JobProcError::validation_error(format!(
                "处理器名称包含非法字符: {processor_name}"
            )));
        }
        Ok(())
    }

    pub async fn register(&self, definition: ProcessorDefinition) -> JobProcResult<ProcessorDefinition> {
        Self::validate_name(&definition.processor_name)?;

        let previous = self.repo.find_by_name(&definition.processor_name).await?;
        let stored = self.repo.upsert(&definition).await?;

        if let Some(previous) = previous {
            if previous.package_path != stored.package_path {
                self.loader.evict(&previous.package_path).await;
            }
        }

        info!(
            processor_name = %stored.processor_name,
            package_path = %stored.package_path,
            "处理器已注册"
        );
        Ok(stored)
    }

    /// 包文件已写入 `package_path` 后登记，摘要由文件内容计算
    pub async fn register_package(
        &self,
        processor_name: &str,
        package_path: &str,
    ) -> JobProcResult<ProcessorDefinition> {
        Self::validate_name(processor_name)?;
        let checksum = sha256_file(package_path).await?;

        // 同一路径的新内容不能复用旧上下文
        self.loader.evict(package_path).await;

        self.register(ProcessorDefinition::new(
            processor_name.to_string(),
            package_path.to_string(),
            Some(checksum),
        ))
        .await
    }

    pub async fn remove(&self, processor_name: &str) -> JobProcResult<bool> {
        let Some(definition) = self.repo.find_by_name(processor_name).await? else {
            return Ok(false);
        };

        self.loader.evict(&definition.package_path).await;
        let deleted = self.repo.delete(definition.id).await?;
        info!(processor_name = processor_name, "处理器已删除");
        Ok(deleted)
    }

    pub async fn get(&self, processor_name: &str) -> JobProcResult<Option<ProcessorDefinition>> {
        self.repo.find_by_name(processor_name).await
    }

    pub async fn list(&self) -> JobProcResult<Vec<ProcessorDefinition>> {
        self.repo.list().await
    }
}
