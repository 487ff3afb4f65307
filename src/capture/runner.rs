use super::{Capturer, InterfaceProbe, OutputValidator};
use crate::{
    config::CaptureConfig,
    error::CaptureError,
    models::{Artifact, CaptureJob},
};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::{fs, time::timeout};
use tracing::{debug, error, info, warn};

/// stderr 保留的最大字符数
const STDERR_PREVIEW_CHARS: usize = 2000;
/// 超时后 SIGTERM 到 SIGKILL 之间的等待时间
const KILL_GRACE: Duration = Duration::from_secs(3);
/// 工具退出后读取剩余 stderr 的上限
const STDERR_DRAIN: Duration = Duration::from_secs(2);

/// 基于 tcpdump 的采集执行器
#[derive(Debug, Clone)]
pub struct CaptureRunner {
    tool: String,
    launcher: Vec<String>,
    grace: Duration,
    probe: InterfaceProbe,
}

impl CaptureRunner {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            tool: config.tool.clone(),
            launcher: config.launcher.clone(),
            grace: Duration::from_secs(config.grace_secs),
            probe: InterfaceProbe::new(config.probe_tool.clone()),
        }
    }

    /// 构造采集命令: `[launcher..] tcpdump -i <iface> -w <file> -G <secs> -W 1 udp port <port>`
    pub fn command_line(&self, job: &CaptureJob) -> Vec<String> {
        let mut argv: Vec<String> = self.launcher.clone();
        argv.push(self.tool.clone());
        argv.extend([
            "-i".to_string(),
            job.interface.clone(),
            "-w".to_string(),
            job.output_path.display().to_string(),
            "-G".to_string(),
            job.duration_secs.to_string(),
            "-W".to_string(),
            "1".to_string(),
            format!("udp port {}", job.port),
        ]);
        argv
    }

    /// 第一步：运行采集工具并检查退出码
    async fn run_tool(&self, job: &CaptureJob) -> Result<(), CaptureError> {
        let argv = self.command_line(job);
        info!(command = %argv.join(" "), "执行采集命令");

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // 独立进程组，终端的 Ctrl+C 不会中断正在写入的采集
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(CaptureError::Spawn)?;
        // process_group(0) 使子进程的 pid 即为进程组 id
        let pgid = child.id();
        let mut stderr_reader = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        let limit = Duration::from_secs(job.duration_secs.get()) + self.grace;
        let status = match timeout(limit, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                terminate(&mut child, pgid).await;
                if let Some(reader) = stderr_reader.take() {
                    reader.abort();
                }
                error!(
                    path = %job.output_path.display(),
                    waited_secs = limit.as_secs(),
                    "采集工具超时，已终止"
                );
                return Err(CaptureError::TimedOut {
                    waited_secs: limit.as_secs(),
                });
            }
        };

        let stderr = match stderr_reader {
            Some(mut reader) => {
                let drained = timeout(STDERR_DRAIN, &mut reader).await;
                match drained {
                    Ok(Ok(buf)) => buf,
                    _ => {
                        reader.abort();
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            let stderr = stderr
                .chars()
                .take(STDERR_PREVIEW_CHARS)
                .collect::<String>()
                .trim()
                .to_string();
            error!(code = ?status.code(), stderr = %stderr, "采集工具执行失败");
            return Err(CaptureError::ToolFailed {
                code: status.code(),
                stderr,
            });
        }

        debug!(path = %job.output_path.display(), "采集工具正常退出");
        Ok(())
    }
}

/// 终止超时的采集：先向整个进程组发送 SIGTERM，宽限期后发送 SIGKILL。
///
/// 通过 sudo 启动时 tcpdump 属于 root，只能由 sudo 转发 SIGTERM 结束；
/// 因此必须先发 SIGTERM，SIGKILL 只能保证清理同一用户的进程。
async fn terminate(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        signal_group(pgid, libc::SIGTERM);
        if timeout(KILL_GRACE, child.wait()).await.is_err() {
            warn!(pgid, "采集进程未响应 SIGTERM，发送 SIGKILL");
        }
        signal_group(pgid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pgid;

    let _ = child.kill().await;
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg 只发送信号，不涉及内存访问
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, signal, error = %err, "向采集进程组发送信号失败");
        }
    }
}

#[async_trait::async_trait]
impl Capturer for CaptureRunner {
    async fn capture(&self, job: CaptureJob) -> Result<Artifact, CaptureError> {
        if let Some(parent) = job.output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!(
            kind = %job.kind,
            interface = %job.interface,
            port = job.port,
            duration_secs = job.duration_secs.get(),
            "开始采集CSI数据"
        );

        self.run_tool(&job).await?;

        // 第二步：退出码为0不代表文件可用，必须单独验证输出文件
        let size_bytes = match OutputValidator::validate(&job.output_path).await {
            Ok(size) => size,
            Err(e) => {
                error!(path = %job.output_path.display(), error = %e, "采集文件未生成或为空");
                return Err(e);
            }
        };

        info!(
            path = %job.output_path.display(),
            size = size_bytes,
            "CSI数据采集完成"
        );

        Ok(Artifact {
            file_path: job.output_path,
            size_bytes,
            created_at: job.started_at,
            kind: job.kind,
        })
    }

    async fn check_interface_available(&self, interface: &str) -> bool {
        self.probe.is_available(interface).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::JobKind;
    use chrono::Utc;
    use std::num::NonZeroU64;
    use std::path::Path;
    use tempfile::TempDir;

    /// 用 sh 执行的模拟采集脚本，参数与 tcpdump 相同（$4 为输出文件）
    fn fake_runner(dir: &Path, script: &str) -> CaptureRunner {
        let script_path = dir.join("fake_tcpdump.sh");
        std::fs::write(&script_path, script).unwrap();
        CaptureRunner::new(&CaptureConfig {
            tool: script_path.display().to_string(),
            launcher: vec!["sh".to_string()],
            grace_secs: 5,
            ..Default::default()
        })
    }

    fn job(dir: &Path, duration_secs: u64) -> CaptureJob {
        CaptureJob {
            kind: JobKind::Routine,
            duration_secs: NonZeroU64::new(duration_secs).unwrap(),
            interface: "wlan0".to_string(),
            port: 5500,
            output_path: dir.join("data").join("csi_data_test.pcap.part"),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_command_line() {
        let runner = CaptureRunner::new(&CaptureConfig::default());
        let job = CaptureJob {
            kind: JobKind::Routine,
            duration_secs: NonZeroU64::new(60).unwrap(),
            interface: "wlan0".to_string(),
            port: 5500,
            output_path: "data/csi.pcap".into(),
            started_at: Utc::now(),
        };
        assert_eq!(
            runner.command_line(&job),
            vec![
                "sudo", "-n", "tcpdump", "-i", "wlan0", "-w", "data/csi.pcap", "-G", "60", "-W",
                "1", "udp port 5500"
            ]
        );
    }

    #[tokio::test]
    async fn test_successful_capture_produces_artifact() {
        let dir = TempDir::new().unwrap();
        let runner = fake_runner(dir.path(), "head -c 120000 /dev/zero > \"$4\"\n");
        let job = job(dir.path(), 60);
        let started_at = job.started_at;

        let artifact = runner.capture(job).await.unwrap();
        assert_eq!(artifact.size_bytes, 120_000);
        assert_eq!(std::fs::metadata(&artifact.file_path).unwrap().len(), 120_000);
        assert_eq!(artifact.created_at, started_at);
        assert_eq!(artifact.kind, JobKind::Routine);
    }

    #[tokio::test]
    async fn test_tool_receives_interface_port_and_duration() {
        let dir = TempDir::new().unwrap();
        let runner = fake_runner(dir.path(), "echo \"$@\" > \"$4\"\n");
        let job = job(dir.path(), 60);
        let expected = format!(
            "-i wlan0 -w {} -G 60 -W 1 udp port 5500",
            job.output_path.display()
        );

        let artifact = runner.capture(job).await.unwrap();
        let recorded = std::fs::read_to_string(&artifact.file_path).unwrap();
        assert_eq!(recorded.trim(), expected);
    }

    #[tokio::test]
    async fn test_zero_byte_output_is_empty_output() {
        let dir = TempDir::new().unwrap();
        let runner = fake_runner(dir.path(), ": > \"$4\"\nexit 0\n");

        let err = runner.capture(job(dir.path(), 60)).await.unwrap_err();
        assert!(matches!(err, CaptureError::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_missing_output_is_empty_output() {
        let dir = TempDir::new().unwrap();
        let runner = fake_runner(dir.path(), "exit 0\n");

        let err = runner.capture(job(dir.path(), 60)).await.unwrap_err();
        assert!(matches!(err, CaptureError::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_tool_failed() {
        let dir = TempDir::new().unwrap();
        let runner = fake_runner(
            dir.path(),
            "head -c 100 /dev/zero > \"$4\"\necho 'wlan0: No such device exists' >&2\nexit 1\n",
        );

        let err = runner.capture(job(dir.path(), 60)).await.unwrap_err();
        match err {
            CaptureError::ToolFailed { code, stderr } => {
                assert_eq!(code, Some(1));
                assert!(stderr.contains("No such device"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hung_tool_times_out() {
        let dir = TempDir::new().unwrap();
        let script_path = dir.path().join("hang.sh");
        std::fs::write(&script_path, "sleep 30\n").unwrap();
        let runner = CaptureRunner::new(&CaptureConfig {
            tool: script_path.display().to_string(),
            launcher: vec!["sh".to_string()],
            grace_secs: 0,
            ..Default::default()
        });

        let err = runner.capture(job(dir.path(), 1)).await.unwrap_err();
        assert!(matches!(err, CaptureError::TimedOut { waited_secs: 1 }));
    }

    #[tokio::test]
    async fn test_timeout_stops_grandchild_processes() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("still_running");
        let script_path = dir.path().join("slow.sh");
        std::fs::write(
            &script_path,
            format!("sleep 3\necho alive > '{}'\n", marker.display()),
        )
        .unwrap();
        // 与 sudo 相同，启动器自身不 exec，而是 fork 出真正的工具进程
        let runner = CaptureRunner::new(&CaptureConfig {
            tool: script_path.display().to_string(),
            launcher: vec![
                "sh".to_string(),
                "-c".to_string(),
                "sh \"$0\" \"$@\"; :".to_string(),
            ],
            grace_secs: 0,
            ..Default::default()
        });

        let err = runner.capture(job(dir.path(), 1)).await.unwrap_err();
        assert!(matches!(err, CaptureError::TimedOut { waited_secs: 1 }));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!marker.exists(), "capture tool kept running after timeout");
    }

    #[tokio::test]
    async fn test_missing_tool_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let runner = CaptureRunner::new(&CaptureConfig {
            tool: "unused".to_string(),
            launcher: vec!["/nonexistent/launcher".to_string()],
            ..Default::default()
        });

        let err = runner.capture(job(dir.path(), 60)).await.unwrap_err();
        assert!(matches!(err, CaptureError::Spawn(_)));
    }
}
