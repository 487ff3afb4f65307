use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 注册停止信号（SIGINT、SIGTERM），收到任一信号时取消 `cancel`。
///
/// 信号处理在返回前已注册完毕，systemd 的 SIGTERM 不会再直接终止进程，
/// 正在进行的采集与上传按取消流程收尾。
#[cfg(unix)]
pub fn shutdown_on_signal(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("收到中断信号，正在停止..."),
            _ = terminate.recv() => info!("收到终止信号，正在停止..."),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    }))
}

#[cfg(not(unix))]
pub fn shutdown_on_signal(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("收到中断信号，正在停止...");
                    cancel.cancel();
                }
            }
            _ = cancel.cancelled() => {}
        }
    }))
}
