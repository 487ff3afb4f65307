use crate::error::{AppError, AppResult, ConfigError};
use crate::models::JobKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod capture;
pub mod delivery;
pub mod schedule;

pub use capture::CaptureConfig;
pub use delivery::{AuthConfig, DeliveryConfig, EndpointConfig, RetryConfig, UploadProfile};
pub use schedule::{BaselineScheduleConfig, ScheduleConfig};

/// 覆盖认证凭据的环境变量
pub const CREDENTIAL_ENV: &str = "CSI_AGENT_TOKEN";

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// 设备信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub location: Option<String>,
    /// 信道带宽（MHz）
    pub channel_width: Option<u32>,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    /// 跳过TLS证书校验（仅限开发环境）
    #[serde(default)]
    pub insecure_tls: bool,
}

/// 本地存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub routine_dir: PathBuf,
    pub baseline_dir: PathBuf,
    /// 上传成功后删除本地文件
    pub delete_after_upload: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            routine_dir: PathBuf::from("data"),
            baseline_dir: PathBuf::from("data/baseline"),
            delete_after_upload: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                id: "csi-edge-device".to_string(),
                location: None,
                channel_width: Some(20),
            },
            server: ServerConfig {
                base_url: "http://localhost:8000".to_string(),
                insecure_tls: false,
            },
            capture: CaptureConfig::default(),
            delivery: DeliveryConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl StorageConfig {
    /// 任务类型对应的本地目录
    pub fn dir_for(&self, kind: JobKind) -> &Path {
        match kind {
            JobKind::Routine => &self.routine_dir,
            JobKind::Baseline => &self.baseline_dir,
        }
    }
}

impl ServerConfig {
    /// 获取完整的API URL
    pub fn api_url(&self, endpoint: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        format!("{}/{}", base, endpoint)
    }
}

/// 旧版扁平JSON配置（config/device_config.json）
#[derive(Debug, Deserialize)]
struct LegacyJsonConfig {
    server_url: Option<String>,
    device_id: Option<String>,
    location: Option<String>,
    channel_width: Option<u32>,
    network_interface: Option<String>,
    csi_port: Option<u16>,
    collection_duration: Option<u64>,
    base_duration: Option<u64>,
    collection_interval: Option<u64>,
    upload_timeout: Option<u64>,
    #[serde(default)]
    delete_after_upload: bool,
}

impl LegacyJsonConfig {
    fn into_config(self) -> AppResult<Config> {
        let base_url = self
            .server_url
            .ok_or_else(|| AppError::missing_field("server_url"))?;
        let device_id = self
            .device_id
            .ok_or_else(|| AppError::missing_field("device_id"))?;

        let mut config = Config::default();
        config.server.base_url = base_url;
        config.device = DeviceConfig {
            id: device_id,
            location: self.location,
            channel_width: self.channel_width,
        };
        if let Some(interface) = self.network_interface {
            config.capture.interface = interface;
        }
        if let Some(port) = self.csi_port {
            config.capture.port = port;
        }
        if let Some(duration) = self.collection_duration {
            config.capture.routine_duration_secs = duration;
        }
        if let Some(duration) = self.base_duration {
            config.capture.baseline_duration_secs = duration;
        }
        if let Some(interval) = self.collection_interval {
            config.schedule.routine_interval_secs = interval;
        }
        if let Some(timeout) = self.upload_timeout {
            config.delivery.upload_timeout_secs = timeout;
        }
        config.storage.delete_after_upload = self.delete_after_upload;
        Ok(config)
    }
}

impl Config {
    /// 从配置文件加载配置（.toml，或旧版 .json）
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::config(format!("读取配置文件 {} 失败: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut config = if is_json {
            let legacy: LegacyJsonConfig = serde_json::from_str(&content)
                .map_err(|e| AppError::config(format!("解析JSON配置文件失败: {}", e)))?;
            legacy.into_config()?
        } else {
            Self::from_toml_str(&content)?
        };

        if let Ok(credential) = std::env::var(CREDENTIAL_ENV) {
            if !credential.is_empty() {
                config.delivery.auth.override_credential(credential);
            }
        }

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 解析TOML配置内容
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| {
            let message = e.message().to_string();
            if message.starts_with("missing field") {
                AppError::Config(ConfigError::MissingField(message))
            } else {
                AppError::config(format!("解析配置文件失败: {}", e))
            }
        })
    }

    /// 验证配置有效性
    pub fn validate(&self) -> AppResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(AppError::missing_field("device.id"));
        }

        if self.server.base_url.is_empty() {
            return Err(AppError::missing_field("server.base_url"));
        }

        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            return Err(AppError::config(
                "server.base_url 必须以 http:// 或 https:// 开头",
            ));
        }

        if let Err(e) = self.capture.validate() {
            return Err(AppError::config(format!("采集配置无效: {}", e)));
        }

        if let Err(e) = self.delivery.validate() {
            return Err(AppError::config(format!("上传配置无效: {}", e)));
        }

        if let Err(e) = self.schedule.validate() {
            return Err(AppError::config(format!("调度配置无效: {}", e)));
        }

        if self.storage.routine_dir.as_os_str().is_empty()
            || self.storage.baseline_dir.as_os_str().is_empty()
        {
            return Err(AppError::missing_field("storage.routine_dir/baseline_dir"));
        }

        Ok(())
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::config(format!("序列化配置失败: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capture.port, 5500);
        assert_eq!(config.schedule.routine_interval_secs, 300);
        assert_eq!(config.delivery.retry.max_attempts, 3);
        assert!(!config.storage.delete_after_upload);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.server.base_url = "ftp://example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(AppError::Config(ConfigError::InvalidFormat(_)))
        ));

        config.server.base_url = "https://example.com".to_string();
        config.device.id = String::new();
        assert!(matches!(
            config.validate(),
            Err(AppError::Config(ConfigError::MissingField(_)))
        ));
    }

    #[test]
    fn test_api_url() {
        let server = ServerConfig {
            base_url: "https://csi.example.com/".to_string(),
            insecure_tls: false,
        };
        assert_eq!(
            server.api_url("/api/v2/health"),
            "https://csi.example.com/api/v2/health"
        );
        assert_eq!(
            server.api_url("api/v2/csi-data/upload"),
            "https://csi.example.com/api/v2/csi-data/upload"
        );
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("device_config.toml");

        let mut original = Config::default();
        original.device.id = "edge-42".to_string();
        original.delivery.auth = AuthConfig::ApiKey {
            key: "k".to_string(),
            header: "X-Device-Key".to_string(),
        };
        original.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.device.id, "edge-42");
        assert_eq!(loaded.delivery.auth, original.delivery.auth);
        assert_eq!(loaded.capture.port, original.capture.port);
    }

    #[test]
    fn test_minimal_toml_uses_section_defaults() {
        let config = Config::from_toml_str(
            r#"
            [device]
            id = "edge-1"

            [server]
            base_url = "http://10.0.0.5:8000"
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.interface, "wlan0");
        assert_eq!(config.delivery.routine.profile, UploadProfile::FormFields);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_section_is_missing_field() {
        let err = Config::from_toml_str("[device]\nid = \"edge-1\"\n").unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::MissingField(_))));

        let err = Config::from_toml_str("device = 3").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_legacy_json_config() {
        let file = NamedTempFile::with_suffix(".json").unwrap();
        std::fs::write(
            file.path(),
            r#"{
                "server_url": "https://csi.example.com",
                "device_id": "pi-01",
                "network_interface": "wlan1",
                "csi_port": 5600,
                "collection_duration": 30,
                "collection_interval": 120,
                "channel_width": 80,
                "location": "room-a",
                "delete_after_upload": true
            }"#,
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.device.id, "pi-01");
        assert_eq!(config.device.channel_width, Some(80));
        assert_eq!(config.capture.interface, "wlan1");
        assert_eq!(config.capture.port, 5600);
        assert_eq!(config.capture.routine_duration_secs, 30);
        assert_eq!(config.schedule.routine_interval_secs, 120);
        assert!(config.storage.delete_after_upload);
    }

    #[test]
    fn test_legacy_json_missing_device_id() {
        let file = NamedTempFile::with_suffix(".json").unwrap();
        std::fs::write(file.path(), r#"{"server_url": "https://csi.example.com"}"#).unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::MissingField(_))));
    }
}
