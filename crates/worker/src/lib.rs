//! 插件加载与作业执行
//!
//! - [`ProcessorLoader`]：按包路径缓存插件上下文，加载前校验 SHA-256
//! - [`JobEngine`]：有界工作池，按处理器预估计算超时，支持取消

pub mod checksum;
pub mod engine;
pub mod loader;
pub mod subprocess;

pub use checksum::{checksum_matches, sha256_file};
pub use engine::{EngineStatus, JobEngine};
pub use loader::{PackageBackend, PluginPackage, ProcessorLoader};
pub use subprocess::{SubprocessBackend, SubprocessPackage, SubprocessProcessor};
