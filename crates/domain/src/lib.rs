pub mod entities;
pub mod ports;
pub mod processor;
pub mod repositories;

// SQLx 实现（仅在启用 sqlx-support feature 时编译）
#[cfg(feature = "sqlx-support")]
pub mod sqlx_impls;

pub use entities::*;
pub use jobproc_errors::{JobProcError, JobProcResult};
pub use ports::*;
pub use processor::*;
pub use repositories::*;
