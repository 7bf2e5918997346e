#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};

    use jobproc_dispatcher::{
        AdminService, FallbackPackage, JobExecutionService, MissedJobRecovery, ProcessorRegistry,
        RunOutcome,
    };
    use jobproc_domain::{Job, JobErrorRepository, JobStatus, OutputData};
    use jobproc_errors::{codes, JobProcError};
    use jobproc_testing_utils::{
        FakePackageBackend, FakeProcessor, JobBuilder, MockInputFileRepository,
        MockJobErrorRepository, MockJobRepository, MockProcessorRepository, TestEnv,
    };
    use jobproc_worker::{JobEngine, ProcessorLoader};

    struct Fixture {
        dir: tempfile::TempDir,
        default_path: String,
        job_repo: Arc<MockJobRepository>,
        error_repo: Arc<MockJobErrorRepository>,
        backend: Arc<FakePackageBackend>,
        loader: Arc<ProcessorLoader>,
        engine: Arc<JobEngine>,
        executor: Arc<JobExecutionService>,
        registry: ProcessorRegistry,
        admin: AdminService,
    }

    async fn fixture(jobs: Vec<Job>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (default_path, _) = TestEnv::write_package(dir.path(), "echo.plugin", b"v1").await;

        let job_repo = Arc::new(MockJobRepository::with_jobs(jobs));
        let processor_repo = Arc::new(MockProcessorRepository::new());
        let error_repo = Arc::new(MockJobErrorRepository::new());
        let file_repo = Arc::new(MockInputFileRepository::new());

        let backend = Arc::new(FakePackageBackend::new());
        let loader = Arc::new(ProcessorLoader::new(backend.clone()));
        let engine = Arc::new(JobEngine::new(loader.clone(), 5));

        let fallback = FallbackPackage {
            processor_dir: dir.path().display().to_string(),
            package_extension: "plugin".to_string(),
        };
        let executor = Arc::new(JobExecutionService::new(
            job_repo.clone(),
            processor_repo.clone(),
            error_repo.clone(),
            file_repo,
            engine.clone(),
            fallback,
        ));
        let registry = ProcessorRegistry::new(processor_repo, loader.clone());
        let admin = AdminService::new(engine.clone(), job_repo.clone(), error_repo.clone());

        Fixture {
            dir,
            default_path,
            job_repo,
            error_repo,
            backend,
            loader,
            engine,
            executor,
            registry,
            admin,
        }
    }

    async fn run_to_end(executor: &JobExecutionService, job_id: i64) -> JobStatus {
        match executor.run_job(job_id).await.unwrap() {
            RunOutcome::Started(handle) => handle.await.unwrap().unwrap(),
            other => panic!("job {job_id} did not start: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_successful_job_records_times_without_errors() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        let processor = f.backend.register("echo", FakeProcessor::new());

        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Success);

        let job = f.job_repo.get(1).unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.error_code.is_none());
        let (start, end) = (job.start_time.unwrap(), job.end_time.unwrap());
        assert!(start <= end);
        assert_eq!(f.error_repo.count(), 0);
        assert_eq!(processor.process_calls(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_processor_uses_default_package_path() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        f.backend.register("echo", FakeProcessor::new());

        run_to_end(&f.executor, 1).await;
        assert_eq!(f.backend.opened_paths(), vec![f.default_path.clone()]);
    }

    #[tokio::test]
    async fn test_run_job_twice_executes_once() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        let processor = f.backend.register("echo", FakeProcessor::new());

        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Success);
        let second = f.executor.run_job(1).await.unwrap();
        assert!(matches!(second, RunOutcome::Skipped(JobStatus::Success)));
        assert_eq!(processor.process_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_claim_job_once() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        let processor = f
            .backend
            .register("echo", FakeProcessor::new().with_delay(Duration::from_millis(50)));

        let (a, b) = tokio::join!(f.executor.run_job(1), f.executor.run_job(1));
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_started()).count(), 1);

        for outcome in outcomes {
            if let RunOutcome::Started(handle) = outcome {
                assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Success);
            }
        }
        assert_eq!(processor.process_calls(), 1);
    }

    #[tokio::test]
    async fn test_run_job_ignores_missing_and_non_scheduled_jobs() {
        let f = fixture(vec![JobBuilder::new().with_id(1).running().build()]).await;
        assert!(matches!(
            f.executor.run_job(1).await.unwrap(),
            RunOutcome::Skipped(JobStatus::Running)
        ));
        assert!(matches!(f.executor.run_job(42).await.unwrap(), RunOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_processor_failures_record_one_error() {
        let jobs = vec![
            JobBuilder::new().with_id(1).with_processor("boom").build(),
            JobBuilder::new().with_id(2).with_processor("broken").build(),
        ];
        let f = fixture(jobs).await;
        TestEnv::write_package(f.dir.path(), "boom.plugin", b"boom").await;
        TestEnv::write_package(f.dir.path(), "broken.plugin", b"broken").await;
        f.backend.register("boom", FakeProcessor::new().panicking());
        f.backend.register("broken", FakeProcessor::new().failing("bad input"));

        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Failed);
        assert_eq!(run_to_end(&f.executor, 2).await, JobStatus::Failed);

        for id in [1, 2] {
            let job = f.job_repo.get(id).unwrap();
            assert_eq!(job.error_code.as_deref(), Some(codes::FAILED));
            let errors = f.error_repo.find_by_job_id(id).await.unwrap();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].reason_code, codes::FAILED);
        }
    }

    #[tokio::test]
    async fn test_missing_package_fails_with_not_found() {
        let f = fixture(vec![JobBuilder::new().with_id(1).with_processor("ghost").build()]).await;

        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Failed);
        let job = f.job_repo.get(1).unwrap();
        assert_eq!(job.error_code.as_deref(), Some(codes::NOT_FOUND));
        assert_eq!(f.backend.open_count(), 0);
    }

    #[tokio::test]
    async fn test_non_terminal_processor_status_becomes_engine_error() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        f.backend
            .register("echo", FakeProcessor::new().with_status(JobStatus::Running));

        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Failed);
        let job = f.job_repo.get(1).unwrap();
        assert_eq!(job.error_code.as_deref(), Some(codes::ENGINE_ERROR));
        assert_eq!(f.error_repo.count(), 1);
    }

    #[tokio::test]
    async fn test_processor_error_output_is_persisted() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        f.backend.register(
            "echo",
            FakeProcessor::new().with_output(OutputData::error(
                None,
                JobStatus::Failed,
                "BAD_INPUT",
                "missing column",
            )),
        );

        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Failed);
        let errors = f.error_repo.get_all_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason_code, "BAD_INPUT");
        assert_eq!(errors[0].reason_string.as_deref(), Some("missing column"));
    }

    #[tokio::test]
    async fn test_transient_completion_failures_are_retried() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        f.backend.register("echo", FakeProcessor::new());
        f.job_repo.fail_completions_for(1, 2);

        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Success);
        let job = f.job_repo.get(1).unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.end_time.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_completion_write_surfaces_error() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        f.backend
            .register("echo", FakeProcessor::new().failing("bad input"));
        f.job_repo.fail_completions_for(1, 3);

        let handle = match f.executor.run_job(1).await.unwrap() {
            RunOutcome::Started(handle) => handle,
            other => panic!("job did not start: {other:?}"),
        };
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, JobProcError::DatabaseOperation(_)));
        assert!(err.to_string().contains("FAILED"));

        // 终态未写入时不追加错误记录
        assert_eq!(f.job_repo.get(1).unwrap().status, JobStatus::Running);
        assert_eq!(f.error_repo.count(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_completion_writes() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        f.backend.register(
            "echo",
            FakeProcessor::new().with_delay(Duration::from_millis(100)),
        );

        assert!(f.executor.run_job(1).await.unwrap().is_started());
        assert!(f.executor.drain(Duration::from_secs(5)).await);

        let job = f.job_repo.get(1).unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.end_time.is_some());
    }

    #[tokio::test]
    async fn test_recovery_runs_only_overdue_jobs() {
        let now = Utc::now();
        let jobs = vec![
            JobBuilder::new()
                .with_id(1)
                .scheduled_at(now - ChronoDuration::minutes(10))
                .build(),
            JobBuilder::new()
                .with_id(2)
                .scheduled_at(now - ChronoDuration::minutes(5))
                .build(),
            JobBuilder::new()
                .with_id(3)
                .scheduled_at(now + ChronoDuration::minutes(5))
                .build(),
            JobBuilder::new().with_id(4).failed(codes::FAILED).build(),
        ];
        let f = fixture(jobs).await;
        f.backend.register("echo", FakeProcessor::new());

        let recovery = MissedJobRecovery::new(f.job_repo.clone(), f.executor.clone());
        let report = recovery.recover_missed_jobs(now).await.unwrap();

        let mut recovered = report.recovered_job_ids.clone();
        recovered.sort();
        assert_eq!(recovered, vec![1, 2]);
        assert!(report.errors.is_empty());

        let repo = f.job_repo.clone();
        let finished = TestEnv::wait_for(
            || {
                let repo = repo.clone();
                async move {
                    [1, 2]
                        .iter()
                        .all(|id| repo.get(*id).unwrap().status == JobStatus::Success)
                }
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(finished);
        assert_eq!(f.job_repo.get(3).unwrap().status, JobStatus::Scheduled);
        assert_eq!(f.job_repo.get(4).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_recovery_continues_after_failure() {
        let now = Utc::now();
        let jobs = vec![
            JobBuilder::new()
                .with_id(1)
                .scheduled_at(now - ChronoDuration::minutes(2))
                .build(),
            JobBuilder::new()
                .with_id(2)
                .scheduled_at(now - ChronoDuration::minutes(1))
                .build(),
        ];
        let f = fixture(jobs).await;
        f.backend.register("echo", FakeProcessor::new());
        f.job_repo.fail_writes_for(1);

        let recovery = MissedJobRecovery::new(f.job_repo.clone(), f.executor.clone());
        let report = recovery.recover_missed_jobs(now).await.unwrap();

        assert_eq!(report.recovered_job_ids, vec![2]);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_admin_cancel_records_single_error() {
        let f = fixture(vec![JobBuilder::new().with_id(1).build()]).await;
        f.backend.register(
            "echo",
            FakeProcessor::new()
                .with_estimate_ms(60_000)
                .with_delay(Duration::from_secs(30)),
        );

        let handle = match f.executor.run_job(1).await.unwrap() {
            RunOutcome::Started(handle) => handle,
            other => panic!("job did not start: {other:?}"),
        };

        assert!(f.admin.cancel_job(1).await.unwrap());
        assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Cancelled);

        let job = f.job_repo.get(1).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error_code.as_deref(), Some(codes::CANCELLED));

        let errors = f.error_repo.find_by_job_id(1).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason_code, codes::CANCELLED);

        assert!(!f.admin.cancel_job(1).await.unwrap());
        assert_eq!(f.error_repo.count(), 1);
    }

    #[tokio::test]
    async fn test_admin_pool_controls() {
        let f = fixture(vec![]).await;
        assert_eq!(f.admin.resize_pool(0), 1);
        assert_eq!(f.admin.resize_pool(12), 12);

        let status = f.admin.engine_status();
        assert_eq!(status.pool_size, 12);
        assert_eq!(status.active_count, 0);
        assert!(status.active_job_ids.is_empty());
        assert_eq!(f.engine.pool_size(), 12);
    }

    #[tokio::test]
    async fn test_registry_rejects_path_like_names() {
        let f = fixture(vec![]).await;
        let err = f
            .registry
            .register_package("../evil", &f.default_path)
            .await
            .unwrap_err();
        assert!(matches!(err, JobProcError::Validation(_)));
        assert!(f.registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replaced_package_is_reloaded() {
        let f = fixture(vec![
            JobBuilder::new().with_id(1).with_processor("report").build(),
            JobBuilder::new().with_id(2).with_processor("report").build(),
        ])
        .await;
        f.backend.register("report", FakeProcessor::new());
        let (path, first_checksum) =
            TestEnv::write_package(f.dir.path(), "report-pkg.plugin", b"first").await;

        let definition = f.registry.register_package("report", &path).await.unwrap();
        assert_eq!(definition.checksum.as_deref(), Some(first_checksum.as_str()));
        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Success);
        assert!(f.loader.is_cached(&path));

        let (_, second_checksum) =
            TestEnv::write_package(f.dir.path(), "report-pkg.plugin", b"second").await;
        let updated = f.registry.register_package("report", &path).await.unwrap();
        assert_eq!(updated.id, definition.id);
        assert_eq!(updated.checksum.as_deref(), Some(second_checksum.as_str()));
        assert!(!f.loader.is_cached(&path));
        assert_eq!(f.backend.closed_paths(), vec![path.clone()]);

        assert_eq!(run_to_end(&f.executor, 2).await, JobStatus::Success);
        assert_eq!(f.backend.open_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_checksum_fails_integrity_check() {
        let f = fixture(vec![JobBuilder::new().with_id(1).with_processor("report").build()]).await;
        f.backend.register("report", FakeProcessor::new());
        let (path, _) = TestEnv::write_package(f.dir.path(), "report.plugin", b"first").await;
        f.registry.register_package("report", &path).await.unwrap();

        // 文件被替换但未重新登记
        TestEnv::write_package(f.dir.path(), "report.plugin", b"tampered").await;

        assert_eq!(run_to_end(&f.executor, 1).await, JobStatus::Failed);
        let job = f.job_repo.get(1).unwrap();
        assert_eq!(job.error_code.as_deref(), Some(codes::INTEGRITY_ERROR));
        assert_eq!(f.backend.open_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_processor_evicts_context() {
        let f = fixture(vec![JobBuilder::new().with_id(1).with_processor("report").build()]).await;
        f.backend.register("report", FakeProcessor::new());
        let (path, _) = TestEnv::write_package(f.dir.path(), "report.plugin", b"pkg").await;
        f.registry.register_package("report", &path).await.unwrap();
        run_to_end(&f.executor, 1).await;
        assert!(f.loader.is_cached(&path));

        assert!(f.registry.remove("report").await.unwrap());
        assert!(!f.loader.is_cached(&path));
        assert!(f.registry.get("report").await.unwrap().is_none());
        assert!(!f.registry.remove("report").await.unwrap());
    }
}
