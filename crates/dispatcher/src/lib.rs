pub mod admin_service;
pub mod execution_service;
pub mod job_scheduler;
pub mod processor_registry;
pub mod recovery_service;

pub use admin_service::AdminService;
pub use execution_service::{FallbackPackage, JobExecutionService, RunOutcome};
pub use job_scheduler::{JobScheduler, JobSubmission, SubmittedFile};
pub use processor_registry::ProcessorRegistry;
pub use recovery_service::{MissedJobRecovery, RecoveryReport};
