//! 子进程插件后端
//!
//! 插件包是一个可执行文件，通过标准输入输出交换 JSON：
//!
//! - `<package> describe`：输出处理器名数组
//! - `<package> review <processor>`：stdin 为 `InputData`，输出 `JobEstimate`
//! - `<package> process <processor>`：stdin 为 `InputData`，输出 `OutputData`
//!
//! Unix 上每次调用的插件进程自成一个进程组。调用结束或执行 future 被丢弃
//! （超时或取消）时整个进程组被 SIGKILL，插件派生的子进程不会残留。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use jobproc_config::EngineConfig;
use jobproc_domain::{InputData, JobEstimate, JobProcessor, OutputData};
use jobproc_errors::{JobProcError, JobProcResult};

use crate::loader::{PackageBackend, PluginPackage};

/// 单次子进程调用的结果
#[derive(Debug)]
struct CommandOutput {
    stdout: Vec<u8>,
    stderr: String,
    exit_code: i32,
    duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    describe_timeout: Duration,
    max_output_bytes: usize,
}

impl SubprocessBackend {
    pub fn new(describe_timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            describe_timeout,
            max_output_bytes,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Duration::from_secs(config.describe_timeout_seconds),
            config.max_output_bytes,
        )
    }
}

impl Default for SubprocessBackend {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[async_trait]
impl PackageBackend for SubprocessBackend {
    async fn open(&self, package_path: &Path) -> JobProcResult<Arc<dyn PluginPackage>> {
        let output = run_command(
            package_path,
            &["describe"],
            None,
            Some(self.describe_timeout),
            self.max_output_bytes,
        )
        .await
        .map_err(|e| JobProcError::load_error(format!("describe 调用失败: {e}")))?;

        if output.exit_code != 0 {
            return Err(JobProcError::load_error(format!(
                "describe 退出码 {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let processors: Vec<String> = parse_json(&output.stdout)
            .map_err(|e| JobProcError::load_error(format!("describe 输出无效: {e}")))?;

        Ok(Arc::new(SubprocessPackage {
            path: package_path.to_path_buf(),
            display_path: package_path.display().to_string(),
            processors,
            max_output_bytes: self.max_output_bytes,
        }))
    }
}

pub struct SubprocessPackage {
    path: PathBuf,
    display_path: String,
    processors: Vec<String>,
    max_output_bytes: usize,
}

#[async_trait]
impl PluginPackage for SubprocessPackage {
    fn package_path(&self) -> &str {
        &self.display_path
    }

    fn processor_names(&self) -> Vec<String> {
        self.processors.clone()
    }

    fn resolve(&self, processor_name: &str) -> JobProcResult<Arc<dyn JobProcessor>> {
        if !self.processors.iter().any(|p| p == processor_name) {
            return Err(JobProcError::load_error(format!(
                "插件包 {} 未提供处理器 {}",
                self.display_path, processor_name
            )));
        }

        Ok(Arc::new(SubprocessProcessor {
            package_path: self.path.clone(),
            processor_name: processor_name.to_string(),
            max_output_bytes: self.max_output_bytes,
        }))
    }

    async fn close(&self) {
        // 每次调用都是独立进程，没有常驻资源
        debug!(package_path = %self.display_path, "关闭子进程插件包");
    }
}

/// 通过子进程调用的处理器
pub struct SubprocessProcessor {
    package_path: PathBuf,
    processor_name: String,
    max_output_bytes: usize,
}

impl SubprocessProcessor {
    async fn invoke<T: DeserializeOwned>(&self, verb: &str, input: &InputData) -> JobProcResult<T> {
        let payload = serde_json::to_vec(input)?;
        let output = run_command(
            &self.package_path,
            &[verb, self.processor_name.as_str()],
            Some(payload),
            None,
            self.max_output_bytes,
        )
        .await?;

        debug!(
            processor_name = %self.processor_name,
            verb = verb,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "插件子进程结束"
        );

        if output.exit_code != 0 {
            return Err(JobProcError::execution_error(format!(
                "{verb} 退出码 {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        parse_json(&output.stdout)
            .map_err(|e| JobProcError::execution_error(format!("{verb} 输出无效: {e}")))
    }
}

#[async_trait]
impl JobProcessor for SubprocessProcessor {
    async fn review_job(&self, input: &InputData) -> JobProcResult<JobEstimate> {
        self.invoke("review", input).await
    }

    async fn process_job(&self, input: &InputData) -> JobProcResult<OutputData> {
        self.invoke("process", input).await
    }
}

fn parse_json<T: DeserializeOwned>(stdout: &[u8]) -> Result<T, serde_json::Error> {
    let text = String::from_utf8_lossy(stdout);
    serde_json::from_str(text.trim())
}

/// 插件进程组，释放时向整个组发送 SIGKILL
struct ProcessGroup {
    #[cfg(unix)]
    pgid: Option<nix::unistd::Pid>,
}

impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        #[cfg(unix)]
        {
            Self {
                pgid: child
                    .id()
                    .map(|pid| nix::unistd::Pid::from_raw(pid as i32)),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child;
            Self {}
        }
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};

            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "终止插件进程组失败"),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// 启动子进程，写入 stdin 后等待结束
///
/// 正常结束后清理残留的进程组成员，再收集输出；超时或 future 被丢弃时
/// `ProcessGroup` 终止整个进程组。
async fn run_command(
    program: &Path,
    args: &[&str],
    stdin_payload: Option<Vec<u8>>,
    limit: Option<Duration>,
    max_output_bytes: usize,
) -> JobProcResult<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| JobProcError::execution_error(format!("启动插件进程失败: {e}")))?;
    let mut group = ProcessGroup::of(&child);

    let stdout_task = tokio::spawn(read_stream(child.stdout.take(), max_output_bytes));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take(), max_output_bytes));

    if let (Some(payload), Some(mut stdin)) = (stdin_payload, child.stdin.take()) {
        // 进程可能不读取输入就退出
        if let Err(e) = stdin.write_all(&payload).await {
            warn!(program = %program.display(), error = %e, "写入插件 stdin 失败");
        }
        drop(stdin);
    }

    let status = match limit {
        Some(limit) => tokio::time::timeout(limit, child.wait())
            .await
            .map_err(|_| JobProcError::ExecutionTimeout {
                timeout_ms: limit.as_millis() as u64,
            })??,
        None => child.wait().await?,
    };
    // 后台子进程会一直占用输出管道
    group.kill();

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    Ok(CommandOutput {
        stdout,
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        exit_code: status.code().unwrap_or(-1),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, max_bytes: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h).take(max_bytes as u64).read_to_end(&mut buf).await;
    }
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const ECHO_PLUGIN: &str = r#"
case "$1" in
  describe) echo '["echo"]' ;;
  review) cat > /dev/null; echo '{"maxTimeToProcessMillis": 500}' ;;
  process) cat > /dev/null; echo '{"status": "SUCCESS", "outputNote": "echoed"}' ;;
  *) exit 2 ;;
esac
"#;

    #[tokio::test]
    async fn test_describe_review_and_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "echo.plugin", ECHO_PLUGIN);

        let backend = SubprocessBackend::default();
        let package = backend.open(&path).await.unwrap();
        assert_eq!(package.processor_names(), vec!["echo".to_string()]);

        let processor = package.resolve("echo").unwrap();
        let input = InputData {
            job_id: Some(1),
            job_name: "demo".to_string(),
            processor_name: "echo".to_string(),
            ..Default::default()
        };

        let estimate = processor.review_job(&input).await.unwrap();
        assert_eq!(estimate.max_time_to_process_millis, 500);

        let output = processor.process_job(&input).await.unwrap();
        assert_eq!(output.status, Some(jobproc_domain::JobStatus::Success));
        assert_eq!(output.output_note.as_deref(), Some("echoed"));
    }

    #[tokio::test]
    async fn test_background_children_do_not_hold_call_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "forking.plugin", "echo '[\"echo\"]'\nsleep 30 &");

        let package = tokio::time::timeout(
            Duration::from_secs(5),
            SubprocessBackend::default().open(&path),
        )
        .await
        .expect("describe should return once the plugin exits")
        .unwrap();
        assert_eq!(package.processor_names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_describe_timeout_returns_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "stuck.plugin", "sleep 30 &\nwait");

        let backend = SubprocessBackend::new(Duration::from_millis(200), 1024);
        let started = Instant::now();
        let err = backend.open(&path).await.err().unwrap();
        assert!(matches!(err, JobProcError::Load(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unknown_processor_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "echo.plugin", ECHO_PLUGIN);

        let package = SubprocessBackend::default().open(&path).await.unwrap();
        let err = package.resolve("com.example.Missing").err().unwrap();
        assert!(matches!(err, JobProcError::Load(_)));
    }

    #[tokio::test]
    async fn test_bad_describe_output_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "broken.plugin", "echo not-json");

        let err = SubprocessBackend::default().open(&path).await.err().unwrap();
        assert!(matches!(err, JobProcError::Load(_)));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(
            &dir,
            "failing.plugin",
            r#"
case "$1" in
  describe) echo '["boom"]' ;;
  *) cat > /dev/null; echo "kaput" >&2; exit 3 ;;
esac
"#,
        );

        let package = SubprocessBackend::default().open(&path).await.unwrap();
        let processor = package.resolve("boom").unwrap();
        let err = processor.process_job(&InputData::default()).await.unwrap_err();
        match err {
            JobProcError::Execution(msg) => assert!(msg.contains("kaput")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
