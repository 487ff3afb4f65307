use crate::error::{AppError, AppResult};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::task;

/// 文件哈希计算器
pub struct FileHasher;

impl FileHasher {
    /// 计算SHA256哈希值
    pub fn calculate_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// 流式计算文件的SHA256（采集文件可能较大，不整体读入内存）
    pub async fn calculate_file_sha256(path: &Path) -> AppResult<String> {
        let path: PathBuf = path.to_path_buf();

        // 在后台任务中计算哈希，避免阻塞异步运行时
        task::spawn_blocking(move || -> AppResult<String> {
            let mut file = std::fs::File::open(&path)?;
            let mut hasher = Sha256::new();
            let mut buffer = vec![0u8; 64 * 1024];
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(hex::encode(hasher.finalize()))
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    }

    /// 比较两个哈希值（忽略大小写）
    pub fn matches(expected: &str, actual: &str) -> bool {
        expected.trim().eq_ignore_ascii_case(actual.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_calculate_sha256() {
        assert_eq!(FileHasher::calculate_sha256(b"hello"), HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_calculate_file_sha256() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"hello").unwrap();

        let hash = FileHasher::calculate_file_sha256(file.path()).await.unwrap();
        assert_eq!(hash, HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = FileHasher::calculate_file_sha256(Path::new("/nonexistent/csi.pcap"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[test]
    fn test_matches_ignores_case() {
        assert!(FileHasher::matches(&HELLO_SHA256.to_uppercase(), HELLO_SHA256));
        assert!(!FileHasher::matches("abc", HELLO_SHA256));
    }
}
