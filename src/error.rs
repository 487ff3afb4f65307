use std::path::PathBuf;
use thiserror::Error;

/// 采集错误
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("采集工具执行失败 (exit={code:?}): {stderr}")]
    ToolFailed { code: Option<i32>, stderr: String },

    #[error("采集文件未生成或为空: {path}")]
    EmptyOutput { path: PathBuf },

    #[error("网络接口不可用: {interface}")]
    InterfaceUnavailable { interface: String },

    #[error("采集工具超时未退出: 已等待 {waited_secs} 秒")]
    TimedOut { waited_secs: u64 },

    #[error("启动采集工具失败: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("采集文件处理失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 上传错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("上传失败，可重试 (第 {attempt} 次, status={status:?}): {reason}")]
    RetryableFailure {
        attempt: u32,
        status: Option<u16>,
        reason: String,
    },

    #[error("上传最终失败 (共 {attempts} 次, status={last_status:?}): {reason}")]
    TerminalFailure {
        attempts: u32,
        last_status: Option<u16>,
        reason: String,
    },

    #[error("服务器拒绝认证 (共 {attempts} 次, status={status})")]
    Unauthenticated { attempts: u32, status: u16 },

    #[error("上传已取消 (已尝试 {attempts} 次)")]
    Cancelled { attempts: u32 },
}

impl DeliveryError {
    /// 已消耗的尝试次数
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::RetryableFailure { attempt, .. } => *attempt,
            DeliveryError::TerminalFailure { attempts, .. }
            | DeliveryError::Unauthenticated { attempts, .. }
            | DeliveryError::Cancelled { attempts } => *attempts,
        }
    }

    /// 最后一次响应的HTTP状态码（如有）
    pub fn http_status(&self) -> Option<u16> {
        match self {
            DeliveryError::RetryableFailure { status, .. } => *status,
            DeliveryError::TerminalFailure { last_status, .. } => *last_status,
            DeliveryError::Unauthenticated { status, .. } => Some(*status),
            DeliveryError::Cancelled { .. } => None,
        }
    }
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("缺少必要配置项: {0}")]
    MissingField(String),

    #[error("配置格式无效: {0}")]
    InvalidFormat(String),
}

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("采集错误: {0}")]
    Capture(#[from] CaptureError),

    #[error("上传错误: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP客户端错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("文件未找到: {path}")]
    FileNotFound { path: String },

    #[error("内部错误: {0}")]
    Internal(#[from] anyhow::Error),
}

/// 应用程序Result类型别名
pub type AppResult<T> = Result<T, AppError>;

/// 错误构造辅助函数
impl AppError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(ConfigError::InvalidFormat(msg.into()))
    }

    pub fn missing_field<T: Into<String>>(field: T) -> Self {
        Self::Config(ConfigError::MissingField(field.into()))
    }

    pub fn file_not_found<T: Into<String>>(path: T) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Self::Internal(anyhow::anyhow!(msg.into()))
    }
}
