//! Test helper utilities and common testing patterns

use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }

    /// Initialize tracing once for tests that want log output
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    }

    /// Write a package file and return its path and SHA-256 checksum
    pub async fn write_package(dir: &Path, file_name: &str, contents: &[u8]) -> (String, String) {
        let path = dir.join(file_name);
        tokio::fs::write(&path, contents).await.unwrap();
        let checksum = jobproc_worker::sha256_file(&path).await.unwrap();
        (path.display().to_string(), checksum)
    }
}
