//! Test data builders
//!
//! Builders with sensible defaults for creating test entities.

use chrono::{DateTime, Utc};
use jobproc_domain::{Job, JobStatus, ProcessorDefinition};

/// Builder for creating test Job entities
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            job: Job {
                id: 1,
                name: "test_job".to_string(),
                processor_name: "echo".to_string(),
                comment: None,
                notes: None,
                parameters: serde_json::json!({}),
                submission_time: now,
                scheduled_run_time: now,
                start_time: None,
                end_time: None,
                status: JobStatus::Scheduled,
                error_code: None,
                error_reason: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.name = name.to_string();
        self
    }

    pub fn with_processor(mut self, processor_name: &str) -> Self {
        self.job.processor_name = processor_name.to_string();
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.job.comment = Some(comment.to_string());
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.job.parameters = parameters;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    /// Sets the run time without the "not before submission" clamp
    pub fn scheduled_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.job.scheduled_run_time = run_at;
        if run_at < self.job.submission_time {
            self.job.submission_time = run_at;
        }
        self
    }

    pub fn scheduled(self) -> Self {
        self.with_status(JobStatus::Scheduled)
    }

    pub fn running(mut self) -> Self {
        self.job.status = JobStatus::Running;
        self.job.start_time = Some(Utc::now());
        self
    }

    pub fn failed(mut self, error_code: &str) -> Self {
        let now = Utc::now();
        self.job.status = JobStatus::Failed;
        self.job.start_time = Some(now);
        self.job.end_time = Some(now);
        self.job.error_code = Some(error_code.to_string());
        self.job.error_reason = Some(format!("{error_code} during test"));
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test ProcessorDefinition entities
pub struct ProcessorDefinitionBuilder {
    definition: ProcessorDefinition,
}

impl ProcessorDefinitionBuilder {
    pub fn new(processor_name: &str, package_path: &str) -> Self {
        Self {
            definition: ProcessorDefinition::new(
                processor_name.to_string(),
                package_path.to_string(),
                None,
            ),
        }
    }

    pub fn with_checksum(mut self, checksum: &str) -> Self {
        self.definition.checksum = Some(checksum.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.definition.active = false;
        self
    }

    pub fn build(self) -> ProcessorDefinition {
        self.definition
    }
}
