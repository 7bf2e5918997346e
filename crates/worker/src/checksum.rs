use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use jobproc_errors::{JobProcError, JobProcResult};

const CHUNK_SIZE: usize = 8 * 1024;

/// 计算文件内容的 SHA-256，返回小写十六进制
pub async fn sha256_file(path: impl AsRef<Path>) -> JobProcResult<String> {
    let path = path.as_ref();
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            JobProcError::package_not_found(path.display().to_string())
        } else {
            JobProcError::Io(e)
        }
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// 摘要比较忽略大小写和首尾空白
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
