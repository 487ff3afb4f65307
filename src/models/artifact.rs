use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::path::PathBuf;

/// 采集任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// 常规采集
    Routine,
    /// 基准采集（监测区域无人时的参考数据）
    Baseline,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Routine, JobKind::Baseline];

    /// 文件名前缀
    pub fn file_prefix(&self) -> &'static str {
        match self {
            JobKind::Routine => "csi_data",
            JobKind::Baseline => "base_csi",
        }
    }

    /// 上传元数据中的数据类型
    pub fn data_type(&self) -> &'static str {
        match self {
            JobKind::Routine => "csi_measurement",
            JobKind::Baseline => "baseline",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Routine => "routine",
            JobKind::Baseline => "baseline",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 采集任务，创建后不可变，由采集器消费一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub kind: JobKind,
    /// 采集时长（秒）
    pub duration_secs: NonZeroU64,
    pub interface: String,
    pub port: u16,
    /// 采集工具写入的文件路径
    pub output_path: PathBuf,
    /// 任务开始时间
    pub started_at: DateTime<Utc>,
}

/// 采集产物：已确认存在且非空的采集文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub kind: JobKind,
}

impl Artifact {
    pub fn file_name(&self) -> &str {
        self.file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("capture.pcap")
    }
}
