//! In-process plugin doubles
//!
//! `FakePackageBackend` opens any existing file as a package exposing the
//! processors registered on the backend, and counts how often a loading
//! context is created.

use async_trait::async_trait;
use jobproc_domain::{InputData, JobEstimate, JobProcessor, JobStatus, OutputData};
use jobproc_errors::{JobProcError, JobProcResult};
use jobproc_worker::{PackageBackend, PluginPackage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configurable fake processor
#[derive(Debug)]
pub struct FakeProcessor {
    estimate_ms: u64,
    delay: Duration,
    output: OutputData,
    failure: Option<String>,
    panics: bool,
    review_calls: AtomicUsize,
    process_calls: AtomicUsize,
    completed: AtomicUsize,
}

impl FakeProcessor {
    /// Returns SUCCESS immediately with a 1s estimate
    pub fn new() -> Self {
        Self {
            estimate_ms: 1_000,
            delay: Duration::ZERO,
            output: OutputData::success(None),
            failure: None,
            panics: false,
            review_calls: AtomicUsize::new(0),
            process_calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn with_estimate_ms(mut self, estimate_ms: u64) -> Self {
        self.estimate_ms = estimate_ms;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_output(mut self, output: OutputData) -> Self {
        self.output = output;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.output.status = Some(status);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn review_calls(&self) -> usize {
        self.review_calls.load(Ordering::SeqCst)
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    /// Number of `process_job` calls that ran to completion
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Default for FakeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobProcessor for FakeProcessor {
    async fn review_job(&self, _input: &InputData) -> JobProcResult<JobEstimate> {
        self.review_calls.fetch_add(1, Ordering::SeqCst);
        Ok(JobEstimate::new(self.estimate_ms))
    }

    async fn process_job(&self, input: &InputData) -> JobProcResult<OutputData> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panics {
            panic!("fake processor panic");
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failure {
            return Err(JobProcError::execution_error(message.clone()));
        }

        let mut output = self.output.clone();
        output.job_id = input.job_id;
        Ok(output)
    }
}

/// Fake package backend with a context-creation counter
#[derive(Default)]
pub struct FakePackageBackend {
    processors: Mutex<HashMap<String, Arc<FakeProcessor>>>,
    open_delay: Mutex<Duration>,
    open_count: AtomicUsize,
    opened: Mutex<Vec<String>>,
    closed: Arc<Mutex<Vec<String>>>,
}

impl FakePackageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor exposed by every package this backend opens
    pub fn register(&self, name: &str, processor: FakeProcessor) -> Arc<FakeProcessor> {
        let processor = Arc::new(processor);
        self.processors
            .lock()
            .unwrap()
            .insert(name.to_string(), processor.clone());
        processor
    }

    /// Slow down context creation to widen race windows
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn opened_paths(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed_paths(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageBackend for FakePackageBackend {
    async fn open(&self, package_path: &Path) -> JobProcResult<Arc<dyn PluginPackage>> {
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let path = package_path.display().to_string();
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.opened.lock().unwrap().push(path.clone());

        Ok(Arc::new(FakePackage {
            path,
            processors: self.processors.lock().unwrap().clone(),
            closed: self.closed.clone(),
        }))
    }
}

struct FakePackage {
    path: String,
    processors: HashMap<String, Arc<FakeProcessor>>,
    closed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PluginPackage for FakePackage {
    fn package_path(&self) -> &str {
        &self.path
    }

    fn processor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.keys().cloned().collect();
        names.sort();
        names
    }

    fn resolve(&self, processor_name: &str) -> JobProcResult<Arc<dyn JobProcessor>> {
        self.processors
            .get(processor_name)
            .map(|p| p.clone() as Arc<dyn JobProcessor>)
            .ok_or_else(|| {
                JobProcError::load_error(format!("{processor_name} not found in {}", self.path))
            })
    }

    async fn close(&self) {
        self.closed.lock().unwrap().push(self.path.clone());
    }
}
