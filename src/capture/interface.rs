use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// 网络接口状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceStatus {
    pub interface: String,
    pub available: bool,
    pub is_up: bool,
    pub error: Option<String>,
}

/// 网络接口探测（`ip link show <iface>`）
#[derive(Debug, Clone)]
pub struct InterfaceProbe {
    tool: String,
}

impl InterfaceProbe {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    /// 获取接口状态，探测失败时返回不可用
    pub async fn status(&self, interface: &str) -> InterfaceStatus {
        let unavailable = |error: String| InterfaceStatus {
            interface: interface.to_string(),
            available: false,
            is_up: false,
            error: Some(error),
        };

        let output = Command::new(&self.tool)
            .args(["link", "show", interface])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(PROBE_TIMEOUT, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(interface, tool = %self.tool, error = %e, "接口检查命令执行失败");
                return unavailable(e.to_string());
            }
            Err(_) => {
                warn!(interface, "接口检查超时");
                return unavailable("接口检查超时".to_string());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(interface, stderr = %stderr, "接口不存在");
            return unavailable(stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        InterfaceStatus {
            interface: interface.to_string(),
            available: true,
            is_up: Self::parse_is_up(&stdout),
            error: None,
        }
    }

    /// 接口是否存在
    pub async fn is_available(&self, interface: &str) -> bool {
        self.status(interface).await.available
    }

    /// 解析 `ip link show` 首行的标志位，例如 `<BROADCAST,MULTICAST,UP,LOWER_UP>`
    fn parse_is_up(output: &str) -> bool {
        let Some(first_line) = output.lines().next() else {
            return false;
        };
        let flags = first_line
            .split_once('<')
            .and_then(|(_, rest)| rest.split_once('>'))
            .map(|(flags, _)| flags)
            .unwrap_or_default();
        flags.split(',').any(|flag| flag == "UP")
    }
}
