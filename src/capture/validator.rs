use crate::error::CaptureError;
use std::io::ErrorKind;
use std::path::Path;
use tokio::{fs, io::AsyncReadExt};

/// pcap / pcapng 文件头
const PCAP_MAGICS: [[u8; 4]; 5] = [
    [0xa1, 0xb2, 0xc3, 0xd4],
    [0xd4, 0xc3, 0xb2, 0xa1],
    [0xa1, 0xb2, 0x3c, 0x4d],
    [0x4d, 0x3c, 0xb2, 0xa1],
    [0x0a, 0x0d, 0x0d, 0x0a],
];

/// 采集输出文件验证器
pub struct OutputValidator;

impl OutputValidator {
    /// 验证采集文件存在且非空，返回文件大小
    pub async fn validate(path: &Path) -> Result<u64, CaptureError> {
        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CaptureError::EmptyOutput {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(CaptureError::Io(e)),
        };

        if !metadata.is_file() || metadata.len() == 0 {
            return Err(CaptureError::EmptyOutput {
                path: path.to_path_buf(),
            });
        }

        // 文件头不符合pcap格式时只记录日志，不阻止上传
        if !Self::has_pcap_header(path).await {
            tracing::warn!(path = %path.display(), "采集文件缺少pcap文件头");
        }

        Ok(metadata.len())
    }

    async fn has_pcap_header(path: &Path) -> bool {
        let mut header = [0u8; 4];
        let Ok(mut file) = fs::File::open(path).await else {
            return false;
        };
        match file.read_exact(&mut header).await {
            Ok(_) => PCAP_MAGICS.contains(&header),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_validate_non_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("csi.pcap");
        let mut data = vec![0xd4, 0xc3, 0xb2, 0xa1];
        data.resize(120_000, 0);
        fs::write(&path, &data).await.unwrap();

        assert_eq!(OutputValidator::validate(&path).await.unwrap(), 120_000);
        assert!(OutputValidator::has_pcap_header(&path).await);
    }

    #[tokio::test]
    async fn test_validate_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("csi.pcap");
        fs::write(&path, b"").await.unwrap();

        let err = OutputValidator::validate(&path).await.unwrap_err();
        assert!(matches!(err, CaptureError::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_validate_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = OutputValidator::validate(&dir.path().join("missing.pcap"))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_non_pcap_content_is_still_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("csi.pcap");
        fs::write(&path, b"xy").await.unwrap();

        assert_eq!(OutputValidator::validate(&path).await.unwrap(), 2);
        assert!(!OutputValidator::has_pcap_header(&path).await);
    }
}
