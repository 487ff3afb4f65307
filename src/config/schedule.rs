use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// 基准采集调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineScheduleConfig {
    pub enabled: bool,
    /// 每日执行时间（本地时间，HH:MM 或 HH:MM:SS）
    pub time_of_day: String,
    /// 开始采集前的等待时间（秒），用于确认监测区域无人
    pub settle_secs: u64,
    /// 启动后立即执行一次
    pub run_on_start: bool,
}

impl Default for BaselineScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_of_day: "03:00".to_string(),
            settle_secs: 5,
            run_on_start: false,
        }
    }
}

impl BaselineScheduleConfig {
    /// 解析每日执行时间
    pub fn parse_time_of_day(&self) -> Result<NaiveTime, String> {
        NaiveTime::parse_from_str(&self.time_of_day, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&self.time_of_day, "%H:%M"))
            .map_err(|e| format!("无法解析基准采集时间 {}: {}", self.time_of_day, e))
    }
}

/// 调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub routine_enabled: bool,
    /// 常规采集间隔（秒）
    pub routine_interval_secs: u64,
    pub baseline: BaselineScheduleConfig,
    /// 健康检查间隔（秒），不设置则不做周期检查
    pub health_check_interval_secs: Option<u64>,
    /// 服务器不健康时跳过常规采集
    pub skip_when_unhealthy: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            routine_enabled: true,
            routine_interval_secs: 300,
            baseline: BaselineScheduleConfig::default(),
            health_check_interval_secs: Some(3600),
            skip_when_unhealthy: false,
        }
    }
}

impl ScheduleConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.routine_interval_secs == 0 {
            return Err("常规采集间隔必须大于0".to_string());
        }

        if self.health_check_interval_secs == Some(0) {
            return Err("健康检查间隔必须大于0".to_string());
        }

        self.baseline.parse_time_of_day().map(|_| ())
    }
}
