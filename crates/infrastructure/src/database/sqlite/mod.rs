pub mod sqlite_input_file_repository;
pub mod sqlite_job_error_repository;
pub mod sqlite_job_repository;
pub mod sqlite_processor_repository;

pub use sqlite_input_file_repository::SqliteInputFileRepository;
pub use sqlite_job_error_repository::SqliteJobErrorRepository;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_processor_repository::SqliteProcessorRepository;
