#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use jobproc_domain::{InputData, JobStatus};
    use jobproc_errors::codes;
    use jobproc_testing_utils::{FakePackageBackend, FakeProcessor, TestEnv};
    use jobproc_worker::{JobEngine, ProcessorLoader};

    struct Fixture {
        _dir: tempfile::TempDir,
        path: String,
        checksum: String,
        backend: Arc<FakePackageBackend>,
        engine: Arc<JobEngine>,
    }

    async fn fixture(pool_size: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (path, checksum) = TestEnv::write_package(dir.path(), "fake.plugin", b"fake").await;
        let backend = Arc::new(FakePackageBackend::new());
        let loader = Arc::new(ProcessorLoader::new(backend.clone()));
        let engine = Arc::new(JobEngine::new(loader, pool_size));
        Fixture {
            _dir: dir,
            path,
            checksum,
            backend,
            engine,
        }
    }

    fn input(job_id: i64, processor_name: &str) -> InputData {
        InputData {
            job_id: Some(job_id),
            job_name: format!("job-{job_id}"),
            processor_name: processor_name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resize_pool_clamps() {
        let f = fixture(5).await;
        assert_eq!(f.engine.pool_size(), 5);
        assert_eq!(f.engine.resize_pool(0), 1);
        assert_eq!(f.engine.pool_size(), 1);
        assert_eq!(f.engine.resize_pool(999), 50);
        assert_eq!(f.engine.pool_size(), 50);
        assert_eq!(f.engine.resize_pool(8), 8);

        let f = fixture(0).await;
        assert_eq!(f.engine.pool_size(), 1);
    }

    #[tokio::test]
    async fn test_completes_within_deadline_with_processor_status() {
        let f = fixture(5).await;
        f.backend.register(
            "echo",
            FakeProcessor::new()
                .with_estimate_ms(1_000)
                .with_delay(Duration::from_millis(50)),
        );

        let output = f
            .engine
            .execute_async(input(1, "echo"), f.path.clone(), Some(f.checksum.clone()))
            .await
            .unwrap();

        assert_eq!(output.resolved_status(), JobStatus::Success);
        assert_eq!(output.job_id, Some(1));
        assert!(f.engine.active_job_ids().is_empty());
        assert_eq!(f.engine.active_count(), 0);
    }

    #[tokio::test]
    async fn test_exceeding_one_and_a_half_estimate_times_out() {
        let f = fixture(5).await;
        let processor = f.backend.register(
            "slow",
            FakeProcessor::new()
                .with_estimate_ms(100)
                .with_delay(Duration::from_millis(1_000)),
        );

        let output = f
            .engine
            .execute_async(input(2, "slow"), f.path.clone(), None)
            .await
            .unwrap();

        assert_eq!(output.status, Some(JobStatus::TimedOut));
        assert_eq!(output.error_code.as_deref(), Some(codes::TIMED_OUT));
        assert_eq!(processor.process_calls(), 1);
        assert_eq!(processor.completed(), 0);
        assert!(f.engine.active_job_ids().is_empty());
    }

    #[tokio::test]
    async fn test_plugin_status_is_kept_below_deadline() {
        let f = fixture(5).await;
        f.backend.register(
            "picky",
            FakeProcessor::new()
                .with_estimate_ms(200)
                .with_delay(Duration::from_millis(100))
                .with_status(JobStatus::Failed),
        );

        let output = f
            .engine
            .execute_async(input(3, "picky"), f.path.clone(), None)
            .await
            .unwrap();
        assert_eq!(output.status, Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let f = fixture(5).await;
        let processor = f.backend.register(
            "long",
            FakeProcessor::new()
                .with_estimate_ms(60_000)
                .with_delay(Duration::from_secs(30)),
        );

        let handle = f
            .engine
            .execute_async(input(4, "long"), f.path.clone(), None);
        assert_eq!(f.engine.active_job_ids(), vec![4]);

        let engine = f.engine.clone();
        assert!(TestEnv::wait_for(
            || {
                let engine = engine.clone();
                async move { engine.active_count() == 1 }
            },
            Duration::from_secs(2),
        )
        .await);

        assert!(f.engine.cancel_job(4));
        assert!(!f.engine.active_job_ids().contains(&4));
        assert!(!f.engine.cancel_job(4));

        let output = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output.status, Some(JobStatus::Cancelled));
        assert_eq!(output.error_code.as_deref(), Some(codes::CANCELLED));
        assert_eq!(processor.completed(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_or_finished_job_returns_false() {
        let f = fixture(5).await;
        f.backend.register("echo", FakeProcessor::new());

        assert!(!f.engine.cancel_job(42));

        f.engine
            .execute_async(input(5, "echo"), f.path.clone(), None)
            .await
            .unwrap();
        assert!(!f.engine.cancel_job(5));
    }

    #[tokio::test]
    async fn test_load_failures_become_failed_outcomes() {
        let f = fixture(5).await;
        let processor = f.backend.register("echo", FakeProcessor::new());

        let missing = f
            .engine
            .execute_async(input(6, "echo"), "/nonexistent/echo.plugin", None)
            .await
            .unwrap();
        assert_eq!(missing.status, Some(JobStatus::Failed));
        assert_eq!(missing.error_code.as_deref(), Some(codes::NOT_FOUND));

        let tampered = f
            .engine
            .execute_async(input(7, "echo"), f.path.clone(), Some("abc123".to_string()))
            .await
            .unwrap();
        assert_eq!(tampered.status, Some(JobStatus::Failed));
        assert_eq!(tampered.error_code.as_deref(), Some(codes::INTEGRITY_ERROR));

        let unknown = f
            .engine
            .execute_async(input(8, "Unknown"), f.path.clone(), None)
            .await
            .unwrap();
        assert_eq!(unknown.error_code.as_deref(), Some(codes::LOAD_ERROR));

        assert_eq!(processor.review_calls(), 0);
    }

    #[tokio::test]
    async fn test_processor_error_and_panic_become_failed() {
        let f = fixture(2).await;
        f.backend
            .register("broken", FakeProcessor::new().failing("disk full"));
        f.backend.register("panicky", FakeProcessor::new().panicking());
        f.backend.register("echo", FakeProcessor::new());

        let broken = f
            .engine
            .execute_async(input(9, "broken"), f.path.clone(), None)
            .await
            .unwrap();
        assert_eq!(broken.status, Some(JobStatus::Failed));
        assert_eq!(broken.error_code.as_deref(), Some(codes::FAILED));
        assert!(broken.error_reason.unwrap().contains("disk full"));

        let panicked = f
            .engine
            .execute_async(input(10, "panicky"), f.path.clone(), None)
            .await
            .unwrap();
        assert_eq!(panicked.status, Some(JobStatus::Failed));

        // 引擎在 panic 之后仍可用
        let ok = f
            .engine
            .execute_async(input(11, "echo"), f.path.clone(), None)
            .await
            .unwrap();
        assert_eq!(ok.resolved_status(), JobStatus::Success);
        assert_eq!(f.engine.active_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency_and_queued_job_can_be_cancelled() {
        let f = fixture(1).await;
        f.backend.register(
            "slow",
            FakeProcessor::new()
                .with_estimate_ms(10_000)
                .with_delay(Duration::from_millis(300)),
        );

        let first = f
            .engine
            .execute_async(input(12, "slow"), f.path.clone(), None);
        let second = f
            .engine
            .execute_async(input(13, "slow"), f.path.clone(), None);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.engine.active_count(), 1);
        assert_eq!(f.engine.active_job_ids(), vec![12, 13]);

        assert!(f.engine.cancel_job(13));
        let second = second.await.unwrap();
        assert_eq!(second.status, Some(JobStatus::Cancelled));

        let first = first.await.unwrap();
        assert_eq!(first.resolved_status(), JobStatus::Success);
    }

    #[tokio::test]
    async fn test_shrink_and_grow_change_concurrency() {
        let f = fixture(3).await;
        f.backend.register(
            "slow",
            FakeProcessor::new()
                .with_estimate_ms(10_000)
                .with_delay(Duration::from_millis(200)),
        );

        f.engine.resize_pool(1);
        let a = f.engine.execute_async(input(14, "slow"), f.path.clone(), None);
        let b = f.engine.execute_async(input(15, "slow"), f.path.clone(), None);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(f.engine.active_count(), 1);

        f.engine.resize_pool(2);
        let engine = f.engine.clone();
        assert!(TestEnv::wait_for(
            || {
                let engine = engine.clone();
                async move { engine.active_count() == 2 }
            },
            Duration::from_secs(1),
        )
        .await);

        a.await.unwrap();
        b.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_and_drains_running() {
        let f = fixture(1).await;
        f.backend.register(
            "slow",
            FakeProcessor::new()
                .with_estimate_ms(10_000)
                .with_delay(Duration::from_millis(200)),
        );

        let running = f
            .engine
            .execute_async(input(16, "slow"), f.path.clone(), None);
        let queued = f
            .engine
            .execute_async(input(17, "slow"), f.path.clone(), None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(f.engine.shutdown(Duration::from_secs(5)).await);
        assert!(f.engine.is_shutdown());

        let queued = queued.await.unwrap();
        assert_eq!(queued.status, Some(JobStatus::Failed));
        assert_eq!(queued.error_code.as_deref(), Some(codes::ENGINE_ERROR));

        let running = running.await.unwrap();
        assert_eq!(running.resolved_status(), JobStatus::Success);

        let status = f.engine.status();
        assert_eq!(status.active_count, 0);
        assert!(status.active_job_ids.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_after_grace_cancels_and_waits_for_running_jobs() {
        let f = fixture(2).await;
        f.backend.register(
            "slow",
            FakeProcessor::new()
                .with_estimate_ms(60_000)
                .with_delay(Duration::from_secs(30)),
        );

        let first = f
            .engine
            .execute_async(input(18, "slow"), f.path.clone(), None);
        let anonymous = f.engine.execute_async(
            InputData {
                processor_name: "slow".to_string(),
                ..Default::default()
            },
            f.path.clone(),
            None,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!f.engine.shutdown(Duration::from_millis(50)).await);

        for handle in [first, anonymous] {
            let output = handle.await.unwrap();
            assert_eq!(output.status, Some(JobStatus::Cancelled));
            assert_eq!(output.error_code.as_deref(), Some(codes::CANCELLED));
        }
        assert_eq!(f.engine.active_count(), 0);
    }
}
