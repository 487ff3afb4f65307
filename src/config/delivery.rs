use serde::{Deserialize, Serialize};

/// 上传重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大尝试次数（包含首次）
    pub max_attempts: u32,
    /// 两次尝试之间的等待时间（秒）
    pub retry_delay_secs: u64,
    /// 退避倍率，1.0 表示固定间隔
    pub backoff_multiplier: f64,
    /// 最大等待时间（秒）
    pub max_retry_delay_secs: u64,
    /// 添加随机抖动以避免多台设备同时重试
    pub jitter: bool,
    /// 4xx 是否直接判定为最终失败（默认与旧版一致：全部重试）
    pub client_errors_terminal: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
            backoff_multiplier: 1.0,
            max_retry_delay_secs: 300, // 5分钟
            jitter: false,
            client_errors_terminal: false,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("最大尝试次数必须大于0".to_string());
        }

        if self.backoff_multiplier < 1.0 {
            return Err("退避倍率不能小于1.0".to_string());
        }

        if self.max_retry_delay_secs < self.retry_delay_secs {
            return Err("最大等待时间不能小于重试间隔".to_string());
        }

        Ok(())
    }
}

/// 认证方式
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// `<header>: <key>`
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

impl AuthConfig {
    /// 用环境变量中的凭据覆盖已配置的凭据
    pub fn override_credential(&mut self, credential: String) {
        match self {
            AuthConfig::None => {}
            AuthConfig::Bearer { token } => *token = credential,
            AuthConfig::ApiKey { key, .. } => *key = credential,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            AuthConfig::None => Ok(()),
            AuthConfig::Bearer { token } if token.trim().is_empty() => {
                Err("Bearer token 不能为空".to_string())
            }
            AuthConfig::ApiKey { key, .. } if key.trim().is_empty() => {
                Err("API key 不能为空".to_string())
            }
            AuthConfig::ApiKey { header, .. } if header.trim().is_empty() => {
                Err("API key 请求头名称不能为空".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// 上传表单格式（不同部署的服务端接口不同）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadProfile {
    /// `file` + `metadata`(JSON字符串)
    MetadataJson,
    /// `file` + `device_id` / `collection_duration` / `collection_start_time` + `metadata`
    FormFields,
    /// 仅 `file`
    FileOnly,
}

/// 单个上传接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    pub profile: UploadProfile,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 常规采集上传接口
    pub routine: EndpointConfig,
    /// 基准采集注册接口
    pub baseline: EndpointConfig,
    /// 健康检查接口
    pub health_endpoint: String,
    /// 上传文件声明的MIME类型
    pub mime_type: String,
    /// 单次上传超时（秒）
    pub upload_timeout_secs: u64,
    /// 健康检查超时（秒）
    pub health_timeout_secs: u64,
    /// 同时进行的上传数上限，0 表示不限制
    pub max_concurrent_uploads: usize,
    pub auth: AuthConfig,
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            routine: EndpointConfig {
                path: "/api/v2/csi-data/upload".to_string(),
                profile: UploadProfile::FormFields,
            },
            baseline: EndpointConfig {
                path: "/api/v2/base-csi/register".to_string(),
                profile: UploadProfile::FileOnly,
            },
            health_endpoint: "/api/v2/health".to_string(),
            mime_type: "application/vnd.tcpdump.pcap".to_string(),
            upload_timeout_secs: 60,
            health_timeout_secs: 10,
            max_concurrent_uploads: 0,
            auth: AuthConfig::None,
            retry: RetryConfig::default(),
        }
    }
}

impl DeliveryConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        for (name, endpoint) in [("routine", &self.routine), ("baseline", &self.baseline)] {
            if !endpoint.path.starts_with('/') {
                return Err(format!("{} 上传路径必须以 / 开头", name));
            }
        }

        if !self.health_endpoint.starts_with('/') {
            return Err("健康检查路径必须以 / 开头".to_string());
        }

        if self.mime_type.trim().is_empty() {
            return Err("MIME类型不能为空".to_string());
        }

        if self.upload_timeout_secs == 0 || self.health_timeout_secs == 0 {
            return Err("超时时间必须大于0".to_string());
        }

        self.auth.validate()?;
        self.retry.validate()
    }
}
