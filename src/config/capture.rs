use crate::models::JobKind;
use serde::{Deserialize, Serialize};

/// 采集配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 采集工具（tcpdump 或兼容参数的程序）
    pub tool: String,
    /// 启动采集工具的前缀命令（默认 `sudo -n`，为空则直接执行）
    pub launcher: Vec<String>,
    /// 网络接口名称
    pub interface: String,
    /// CSI 数据的 UDP 端口
    pub port: u16,
    /// 常规采集时长（秒）
    pub routine_duration_secs: u64,
    /// 基准采集时长（秒）
    pub baseline_duration_secs: u64,
    /// 超过采集时长后继续等待工具退出的宽限时间（秒）
    pub grace_secs: u64,
    /// 采集前是否检查网络接口
    pub check_interface: bool,
    /// 接口检查工具
    pub probe_tool: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tool: "tcpdump".to_string(),
            launcher: vec!["sudo".to_string(), "-n".to_string()],
            interface: "wlan0".to_string(),
            port: 5500,
            routine_duration_secs: 60,
            baseline_duration_secs: 60,
            grace_secs: 30,
            check_interface: true,
            probe_tool: "ip".to_string(),
        }
    }
}

impl CaptureConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.tool.trim().is_empty() {
            return Err("采集工具不能为空".to_string());
        }

        if self.interface.trim().is_empty() {
            return Err("网络接口不能为空".to_string());
        }

        if self.port == 0 {
            return Err("CSI端口不能为0".to_string());
        }

        if self.routine_duration_secs == 0 || self.baseline_duration_secs == 0 {
            return Err("采集时长必须大于0".to_string());
        }

        Ok(())
    }

    /// 按任务类型获取采集时长
    pub fn duration_for(&self, kind: JobKind) -> u64 {
        match kind {
            JobKind::Routine => self.routine_duration_secs,
            JobKind::Baseline => self.baseline_duration_secs,
        }
    }
}
