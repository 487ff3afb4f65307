pub mod interface;
pub mod runner;
pub mod validator;

pub use interface::{InterfaceProbe, InterfaceStatus};
pub use runner::CaptureRunner;
pub use validator::OutputValidator;

use crate::error::CaptureError;
use crate::models::{Artifact, CaptureJob};

/// 采集器抽象接口
#[async_trait::async_trait]
pub trait Capturer: Send + Sync {
    /// 执行一次限时采集，成功时返回已验证的产物
    async fn capture(&self, job: CaptureJob) -> Result<Artifact, CaptureError>;

    /// 尽力检查网络接口是否可用
    async fn check_interface_available(&self, interface: &str) -> bool;
}
