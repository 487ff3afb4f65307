use super::{Artifact, JobKind};
use crate::config::{CaptureConfig, DeviceConfig};
use crate::error::DeliveryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;

/// 随文件一同上传的元数据，每次上传时由配置和采集产物推导
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(rename = "device_id")]
    pub device_identifier: String,
    /// 采集时长（秒）
    #[serde(rename = "collection_duration")]
    pub capture_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// 采集开始时间（Unix秒）
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csi_port: Option<u16>,
}

impl UploadMetadata {
    pub fn derive(device: &DeviceConfig, capture: &CaptureConfig, artifact: &Artifact) -> Self {
        Self {
            data_type: artifact.kind.data_type().to_string(),
            device_identifier: device.id.clone(),
            capture_duration: capture.duration_for(artifact.kind),
            channel_width: device.channel_width,
            location: device.location.clone(),
            timestamp: artifact.created_at.timestamp(),
            network_interface: Some(capture.interface.clone()),
            csi_port: Some(capture.port),
        }
    }

    /// 采集开始时间（RFC 3339）
    pub fn collection_start_time(&self) -> String {
        DateTime::<Utc>::from_timestamp(self.timestamp, 0)
            .unwrap_or_default()
            .to_rfc3339()
    }
}

/// 单次上传尝试的结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    TerminalFailure,
}

/// 单次上传尝试记录，仅在一次投递过程中存在
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub artifact: PathBuf,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub http_status: Option<u16>,
    pub detail: String,
}

/// 服务端确认信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    pub id: Option<String>,
    pub content_hash: Option<String>,
    pub name: Option<String>,
    pub message: Option<String>,
}

impl UploadReceipt {
    pub fn from_json(value: &JsonValue) -> Self {
        let text = |key: &str| -> Option<String> {
            match value.get(key)? {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        Self {
            id: text("id"),
            content_hash: text("content_hash")
                .or_else(|| text("sha256"))
                .or_else(|| text("file_hash")),
            name: text("name"),
            message: text("message"),
        }
    }
}

/// 一次投递的完整结果
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub kind: JobKind,
    pub attempts: Vec<DeliveryAttempt>,
    pub result: Result<UploadReceipt, DeliveryError>,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn last_http_status(&self) -> Option<u16> {
        self.attempts.last().and_then(|a| a.http_status)
    }
}
