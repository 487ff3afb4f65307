/*
 * CSI Edge Agent - WiFi CSI collection and delivery agent
 * Copyright (c) 2024 CSI Edge Agent Project
 *
 * This work is licensed under CC BY-NC-SA 4.0
 * https://creativecommons.org/licenses/by-nc-sa/4.0/
 */

use clap::{Parser, Subcommand, ValueEnum};
use csi_edge_agent::{
    capture::{CaptureRunner, InterfaceProbe},
    config::Config,
    error::{AppError, AppResult},
    models::JobKind,
    services::{CycleReport, DeliveryClient, JobScheduler, SchedulerContext, shutdown_on_signal},
    storage::LocalArtifactStore,
};
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "csi-agent", version, about = "WiFi CSI 数据采集与上传代理")]
struct Cli {
    /// 配置文件路径（.toml，或旧版 .json）
    #[arg(
        short,
        long,
        env = "CSI_AGENT_CONFIG",
        default_value = "config/device_config.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 执行一次常规采集并上传
    Collect,
    /// 执行一次基准采集并上传
    Baseline,
    /// 按计划持续运行，直到收到 SIGINT 或 SIGTERM
    Schedule,
    /// 检查服务器与网络接口状态
    Health,
    /// 重新上传本地保留的文件
    Resend {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = KindArg::Routine)]
        kind: KindArg,
    },
    /// 重新上传指定类型最新的本地文件
    ResendLatest {
        #[arg(long, value_enum)]
        kind: KindArg,
    },
    /// 写出默认配置文件
    InitConfig {
        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Routine,
    Baseline,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Routine => JobKind::Routine,
            KindArg::Baseline => JobKind::Baseline,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "csi_edge_agent=info,csi_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AppResult<bool> {
    if let Command::InitConfig { force } = cli.command {
        if cli.config.exists() && !force {
            tracing::warn!("配置文件已存在: {}（使用 --force 覆盖）", cli.config.display());
            return Ok(false);
        }
        Config::default().save_to_file(&cli.config)?;
        tracing::info!("已写出默认配置: {}", cli.config.display());
        return Ok(true);
    }

    // 配置错误在启动时即为致命错误
    let config = Config::from_file(&cli.config)?;
    tracing::info!(
        device_id = %config.device.id,
        server = %config.server.base_url,
        "已加载配置文件: {}",
        cli.config.display()
    );

    let delivery = Arc::new(DeliveryClient::new(&config.server, &config.delivery)?);
    let scheduler = JobScheduler::new(SchedulerContext {
        capturer: Arc::new(CaptureRunner::new(&config.capture)),
        store: Arc::new(LocalArtifactStore::from_config(&config.storage)),
        delivery: delivery.clone(),
        config,
    });

    let cancel = CancellationToken::new();
    shutdown_on_signal(cancel.clone())
        .map_err(|e| AppError::internal(format!("注册停止信号失败: {}", e)))?;

    match cli.command {
        Command::Collect => Ok(report(scheduler.run_cycle(JobKind::Routine, &cancel).await)),
        Command::Baseline => Ok(report(scheduler.run_cycle(JobKind::Baseline, &cancel).await)),
        Command::Schedule => {
            scheduler.run(cancel).await?;
            Ok(true)
        }
        Command::Health => {
            let capture = &scheduler.context().config.capture;
            let status = InterfaceProbe::new(capture.probe_tool.clone())
                .status(&capture.interface)
                .await;
            tracing::info!(
                interface = %status.interface,
                available = status.available,
                is_up = status.is_up,
                error = status.error.as_deref().unwrap_or(""),
                "网络接口状态"
            );
            Ok(delivery.health_check().await)
        }
        Command::Resend { file, kind } => Ok(report(
            scheduler.resend(kind.into(), &file, &cancel).await?,
        )),
        Command::ResendLatest { kind } => Ok(report(
            scheduler.resend_latest(kind.into(), &cancel).await?,
        )),
        Command::InitConfig { .. } => Ok(true),
    }
}

fn report(report: CycleReport) -> bool {
    let path = report
        .artifact
        .as_ref()
        .map(|a| a.file_path.display().to_string())
        .unwrap_or_default();
    if report.is_success() {
        tracing::info!(kind = %report.kind, path = %path, "完成: {:?}", report.outcome);
    } else {
        tracing::error!(kind = %report.kind, path = %path, "未完成: {:?}", report.outcome);
    }
    report.is_success()
}
