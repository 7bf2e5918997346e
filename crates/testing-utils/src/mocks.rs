//! Mock implementations for repository and service traits
//!
//! In-memory implementations used by unit and integration tests without a
//! database or a real timer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobproc_domain::{
    InputDataFile, InputFileRepository, Job, JobCompletion, JobError, JobErrorRepository,
    JobRepository, JobStatus, ProcessorDefinition, ProcessorRepository, TriggerCallback,
    TriggerService,
};
use jobproc_errors::{codes, JobProcError, JobProcResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mock implementation of JobRepository for testing
#[derive(Debug, Clone)]
pub struct MockJobRepository {
    jobs: Arc<Mutex<HashMap<i64, Job>>>,
    next_id: Arc<Mutex<i64>>,
    failing_ids: Arc<Mutex<HashSet<i64>>>,
    failing_completions: Arc<Mutex<HashMap<i64, usize>>>,
    claim_after_read: Arc<Mutex<HashSet<i64>>>,
}

impl MockJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            failing_ids: Arc::new(Mutex::new(HashSet::new())),
            failing_completions: Arc::new(Mutex::new(HashMap::new())),
            claim_after_read: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let repo = Self::new();
        let mut max_id = 0;
        {
            let mut map = repo.jobs.lock().unwrap();
            for job in jobs {
                max_id = max_id.max(job.id);
                map.insert(job.id, job);
            }
        }
        *repo.next_id.lock().unwrap() = max_id + 1;
        repo
    }

    /// Make every status write for `id` fail with a database error
    pub fn fail_writes_for(&self, id: i64) {
        self.failing_ids.lock().unwrap().insert(id);
    }

    /// Make the next `times` calls to `complete` for `id` fail; other writes succeed
    pub fn fail_completions_for(&self, id: i64, times: usize) {
        self.failing_completions.lock().unwrap().insert(id, times);
    }

    /// The next `find_by_id(id)` returns the current row, then moves the job to
    /// RUNNING the way a concurrently fired trigger would
    pub fn claim_after_next_read(&self, id: i64) {
        self.claim_after_read.lock().unwrap().insert(id);
    }

    pub fn get(&self, id: i64) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn get_all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    fn check_writable(&self, id: i64) -> JobProcResult<()> {
        if self.failing_ids.lock().unwrap().contains(&id) {
            return Err(JobProcError::DatabaseOperation(format!(
                "injected failure for job {id}"
            )));
        }
        Ok(())
    }
}

impl Default for MockJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepository for MockJobRepository {
    async fn create(&self, job: &Job) -> JobProcResult<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_job = job.clone();
        new_job.id = *next_id;
        *next_id += 1;

        jobs.insert(new_job.id, new_job.clone());
        Ok(new_job)
    }

    async fn find_by_id(&self, id: i64) -> JobProcResult<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let snapshot = jobs.get(&id).cloned();

        if self.claim_after_read.lock().unwrap().remove(&id) {
            if let Some(job) = jobs.get_mut(&id).filter(|j| j.status == JobStatus::Scheduled) {
                job.status = JobStatus::Running;
                job.start_time = Some(Utc::now());
            }
        }
        Ok(snapshot)
    }

    async fn find_by_status(&self, status: JobStatus) -> JobProcResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn reschedule(
        &self,
        id: i64,
        expected: JobStatus,
        run_at: DateTime<Utc>,
    ) -> JobProcResult<bool> {
        self.check_writable(id)?;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == expected => {
                job.status = JobStatus::Scheduled;
                job.scheduled_run_time = run_at;
                job.start_time = None;
                job.end_time = None;
                job.error_code = None;
                job.error_reason = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_running(&self, id: i64, started_at: DateTime<Utc>) -> JobProcResult<bool> {
        self.check_writable(id)?;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Scheduled => {
                job.status = JobStatus::Running;
                job.start_time = Some(started_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, id: i64, completion: &JobCompletion) -> JobProcResult<bool> {
        self.check_writable(id)?;
        if let Some(remaining) = self.failing_completions.lock().unwrap().get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(JobProcError::DatabaseOperation(format!(
                    "injected completion failure for job {id}"
                )));
            }
        }
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = completion.status;
                job.end_time = Some(completion.end_time);
                job.error_code = completion.error_code.clone();
                job.error_reason = completion.error_reason.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_schedule_failed(&self, id: i64, reason: &str) -> JobProcResult<bool> {
        self.check_writable(id)?;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Scheduled => {
                job.status = JobStatus::ScheduleFailed;
                job.notes = Some(reason.to_string());
                job.error_code = Some(codes::SCHEDULE_FAILED.to_string());
                job.error_reason = Some(reason.to_string());
                job.end_time = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Mock implementation of ProcessorRepository for testing
#[derive(Debug, Clone)]
pub struct MockProcessorRepository {
    definitions: Arc<Mutex<HashMap<String, ProcessorDefinition>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockProcessorRepository {
    pub fn new() -> Self {
        Self {
            definitions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.definitions.lock().unwrap().len()
    }
}

impl Default for MockProcessorRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessorRepository for MockProcessorRepository {
    async fn upsert(&self, definition: &ProcessorDefinition) -> JobProcResult<ProcessorDefinition> {
        let mut definitions = self.definitions.lock().unwrap();
        let mut stored = definition.clone();

        match definitions.get(&definition.processor_name) {
            Some(existing) => {
                stored.id = existing.id;
                stored.created_at = existing.created_at;
            }
            None => {
                let mut next_id = self.next_id.lock().unwrap();
                stored.id = *next_id;
                *next_id += 1;
            }
        }
        stored.updated_at = Utc::now();

        definitions.insert(stored.processor_name.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_name(&self, processor_name: &str) -> JobProcResult<Option<ProcessorDefinition>> {
        Ok(self.definitions.lock().unwrap().get(processor_name).cloned())
    }

    async fn find_active_by_name(
        &self,
        processor_name: &str,
    ) -> JobProcResult<Option<ProcessorDefinition>> {
        Ok(self
            .definitions
            .lock()
            .unwrap()
            .get(processor_name)
            .filter(|d| d.active)
            .cloned())
    }

    async fn delete(&self, id: i64) -> JobProcResult<bool> {
        let mut definitions = self.definitions.lock().unwrap();
        let before = definitions.len();
        definitions.retain(|_, d| d.id != id);
        Ok(definitions.len() < before)
    }

    async fn list(&self) -> JobProcResult<Vec<ProcessorDefinition>> {
        let mut definitions: Vec<ProcessorDefinition> =
            self.definitions.lock().unwrap().values().cloned().collect();
        definitions.sort_by(|a, b| a.processor_name.cmp(&b.processor_name));
        Ok(definitions)
    }
}

/// Mock implementation of JobErrorRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockJobErrorRepository {
    errors: Arc<Mutex<Vec<JobError>>>,
}

impl MockJobErrorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn get_all_errors(&self) -> Vec<JobError> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobErrorRepository for MockJobErrorRepository {
    async fn append(&self, error: &JobError) -> JobProcResult<JobError> {
        let mut errors = self.errors.lock().unwrap();
        let mut stored = error.clone();
        stored.id = errors.len() as i64 + 1;
        errors.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_job_id(&self, job_id: i64) -> JobProcResult<Vec<JobError>> {
        Ok(self
            .errors
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }
}

/// Mock implementation of InputFileRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockInputFileRepository {
    files: Arc<Mutex<Vec<InputDataFile>>>,
}

impl MockInputFileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InputFileRepository for MockInputFileRepository {
    async fn add(&self, file: &InputDataFile) -> JobProcResult<InputDataFile> {
        let mut files = self.files.lock().unwrap();
        let mut stored = file.clone();
        stored.id = files.len() as i64 + 1;
        files.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_job_id(&self, job_id: i64) -> JobProcResult<Vec<InputDataFile>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.job_id == job_id)
            .cloned()
            .collect())
    }
}

/// Trigger service whose callbacks only run when a test fires them
#[derive(Clone, Default)]
pub struct ManualTriggerService {
    triggers: Arc<Mutex<HashMap<String, (DateTime<Utc>, TriggerCallback)>>>,
    rejection: Arc<Mutex<Option<String>>>,
    shut_down: Arc<Mutex<bool>>,
}

impl ManualTriggerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following registration with the given reason
    pub fn reject_with(&self, reason: &str) {
        *self.rejection.lock().unwrap() = Some(reason.to_string());
    }

    pub fn accept(&self) {
        *self.rejection.lock().unwrap() = None;
    }

    pub fn fire_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.triggers.lock().unwrap().get(key).map(|(at, _)| *at)
    }

    /// Run the callback registered under `key`, returning whether it existed
    pub async fn fire(&self, key: &str) -> bool {
        let entry = self.triggers.lock().unwrap().remove(key);
        match entry {
            Some((_, callback)) => {
                callback().await;
                true
            }
            None => false,
        }
    }

    /// Run every callback due at or before `now`; returns how many ran
    pub async fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<TriggerCallback> = {
            let mut triggers = self.triggers.lock().unwrap();
            let keys: Vec<String> = triggers
                .iter()
                .filter(|(_, (at, _))| *at <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| triggers.remove(key).map(|(_, callback)| callback))
                .collect()
        };

        let count = due.len();
        for callback in due {
            callback().await;
        }
        count
    }
}

#[async_trait]
impl TriggerService for ManualTriggerService {
    async fn schedule_at(
        &self,
        key: &str,
        fire_at: DateTime<Utc>,
        callback: TriggerCallback,
    ) -> JobProcResult<()> {
        if *self.shut_down.lock().unwrap() {
            return Err(JobProcError::TriggerScheduling(
                "trigger service is shut down".to_string(),
            ));
        }
        if let Some(reason) = self.rejection.lock().unwrap().clone() {
            return Err(JobProcError::TriggerScheduling(reason));
        }

        let mut triggers = self.triggers.lock().unwrap();
        if triggers.contains_key(key) {
            return Err(JobProcError::TriggerScheduling(format!(
                "trigger {key} already exists"
            )));
        }
        triggers.insert(key.to_string(), (fire_at, callback));
        Ok(())
    }

    async fn cancel(&self, key: &str) -> JobProcResult<bool> {
        Ok(self.triggers.lock().unwrap().remove(key).is_some())
    }

    async fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.triggers.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn shutdown(&self) {
        *self.shut_down.lock().unwrap() = true;
        self.triggers.lock().unwrap().clear();
    }
}
