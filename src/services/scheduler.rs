use super::DeliveryClient;
use crate::{
    capture::Capturer,
    config::Config,
    error::{AppError, AppResult, CaptureError, DeliveryError},
    models::{Artifact, CaptureJob, DeliveryOutcome, JobKind, UploadMetadata},
    storage::{ArtifactStore, FileHasher},
};
use chrono::{DateTime, Local, NaiveTime, TimeDelta, TimeZone, Utc};
use std::{
    num::NonZeroU64,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    task::JoinSet,
    time::{Instant, Interval, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// 调度器上下文：配置与各协作组件
pub struct SchedulerContext {
    pub config: Config,
    pub capturer: Arc<dyn Capturer>,
    pub store: Arc<dyn ArtifactStore>,
    pub delivery: Arc<DeliveryClient>,
}

/// 一次采集上传周期的结果
#[derive(Debug)]
pub enum CycleOutcome {
    /// 已上传
    Delivered { attempts: u32, deleted: bool },
    /// 采集失败，没有产物
    CaptureFailed(CaptureError),
    /// 上传失败，产物保留在本地
    DeliveryFailed(DeliveryError),
    /// 本地存储操作失败
    StorageFailed(String),
    /// 前置条件不满足，未采集
    Skipped(String),
    /// 同类型任务仍在运行
    Busy,
    /// 开始采集前被取消
    Cancelled,
}

/// 周期报告
#[derive(Debug)]
pub struct CycleReport {
    pub kind: JobKind,
    pub cycle_id: Uuid,
    pub artifact: Option<Artifact>,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Delivered { .. })
    }
}

/// 每种任务类型的运行标记（Idle / Running）
#[derive(Debug, Default)]
struct RunningSlots {
    routine: AtomicBool,
    baseline: AtomicBool,
}

impl RunningSlots {
    fn slot(&self, kind: JobKind) -> &AtomicBool {
        match kind {
            JobKind::Routine => &self.routine,
            JobKind::Baseline => &self.baseline,
        }
    }
}

/// 持有期间该类型处于 Running，释放时回到 Idle
struct RunningGuard {
    slots: Arc<RunningSlots>,
    kind: JobKind,
}

impl RunningGuard {
    fn try_acquire(slots: &Arc<RunningSlots>, kind: JobKind) -> Option<Self> {
        slots
            .slot(kind)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                slots: slots.clone(),
                kind,
            })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.slots.slot(self.kind).store(false, Ordering::Release);
    }
}

/// 采集任务调度器
#[derive(Clone)]
pub struct JobScheduler {
    ctx: Arc<SchedulerContext>,
    running: Arc<RunningSlots>,
}

impl JobScheduler {
    pub fn new(ctx: SchedulerContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            running: Arc::new(RunningSlots::default()),
        }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.running.slot(kind).load(Ordering::Acquire)
    }

    /// 执行一次完整周期：采集 → 保存 → 上传 → 按配置删除或保留
    pub async fn run_cycle(&self, kind: JobKind, cancel: &CancellationToken) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", kind = %kind, cycle_id = %cycle_id);

        let Some(_guard) = RunningGuard::try_acquire(&self.running, kind) else {
            warn!(kind = %kind, "上一次同类型任务仍在运行，跳过本次触发");
            return CycleReport {
                kind,
                cycle_id,
                artifact: None,
                outcome: CycleOutcome::Busy,
            };
        };

        let (artifact, outcome) = self.execute_cycle(kind, cancel).instrument(span).await;
        CycleReport {
            kind,
            cycle_id,
            artifact,
            outcome,
        }
    }

    async fn execute_cycle(
        &self,
        kind: JobKind,
        cancel: &CancellationToken,
    ) -> (Option<Artifact>, CycleOutcome) {
        let config = &self.ctx.config;

        if config.capture.check_interface
            && !self
                .ctx
                .capturer
                .check_interface_available(&config.capture.interface)
                .await
        {
            let err = CaptureError::InterfaceUnavailable {
                interface: config.capture.interface.clone(),
            };
            warn!(error = %err, "网络接口不可用，跳过本次采集");
            return (None, CycleOutcome::Skipped(err.to_string()));
        }

        if kind == JobKind::Routine
            && config.schedule.skip_when_unhealthy
            && !self.ctx.delivery.health_check().await
        {
            warn!("服务器健康检查失败，跳过本次常规采集");
            return (None, CycleOutcome::Skipped("服务器不健康".to_string()));
        }

        if kind == JobKind::Baseline && config.schedule.baseline.settle_secs > 0 {
            let settle = config.schedule.baseline.settle_secs;
            info!("基准采集将在 {} 秒后开始，请确保监测区域无人", settle);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("基准采集在开始前被取消");
                    return (None, CycleOutcome::Cancelled);
                }
                _ = tokio::time::sleep(Duration::from_secs(settle)) => {}
            }
        }

        let Some(duration_secs) = NonZeroU64::new(config.capture.duration_for(kind)) else {
            return (None, CycleOutcome::Skipped("采集时长为0".to_string()));
        };

        let started_at = Utc::now();
        let output_path = match self.ctx.store.allocate(kind, started_at).await {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "分配采集文件失败");
                return (None, CycleOutcome::StorageFailed(e.to_string()));
            }
        };
        let job = CaptureJob {
            kind,
            duration_secs,
            interface: config.capture.interface.clone(),
            port: config.capture.port,
            output_path: output_path.clone(),
            started_at,
        };

        let captured = match self.ctx.capturer.capture(job).await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(path = %output_path.display(), error = %e, "采集失败，本周期结束");
                if let Err(discard_err) = self.ctx.store.discard_staged(&output_path).await {
                    warn!(path = %output_path.display(), error = %discard_err, "清理暂存文件失败");
                }
                return (None, CycleOutcome::CaptureFailed(e));
            }
        };

        let artifact = match self.ctx.store.persist(captured).await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(path = %output_path.display(), error = %e, "保存采集文件失败");
                return (None, CycleOutcome::StorageFailed(e.to_string()));
            }
        };

        let outcome = self.deliver_and_settle(&artifact, cancel).await;
        (Some(artifact), outcome)
    }

    /// 上传产物，成功后按配置删除，失败则保留
    async fn deliver_and_settle(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> CycleOutcome {
        let config = &self.ctx.config;
        let metadata = UploadMetadata::derive(&config.device, &config.capture, artifact);
        let outcome: DeliveryOutcome = self.ctx.delivery.deliver(artifact, &metadata, cancel).await;
        let attempts = outcome.attempt_count();

        match outcome.result {
            Ok(_) => {
                let mut deleted = false;
                if config.storage.delete_after_upload {
                    match self.ctx.store.delete(artifact).await {
                        Ok(()) => deleted = true,
                        Err(e) => {
                            warn!(path = %artifact.file_path.display(), error = %e, "删除已上传文件失败")
                        }
                    }
                } else {
                    info!(path = %artifact.file_path.display(), "已上传，文件保留在本地");
                }
                CycleOutcome::Delivered { attempts, deleted }
            }
            Err(e) => {
                warn!(
                    path = %artifact.file_path.display(),
                    attempts,
                    status = ?e.http_status(),
                    "上传未完成，文件已保留，可使用 resend 手动重传"
                );
                CycleOutcome::DeliveryFailed(e)
            }
        }
    }

    /// 手动重传本地已保留的文件
    pub async fn resend(
        &self,
        kind: JobKind,
        path: &Path,
        cancel: &CancellationToken,
    ) -> AppResult<CycleReport> {
        let artifact = self.ctx.store.open(kind, path).await?;
        Ok(self.resend_artifact(artifact, cancel).await)
    }

    /// 重传指定类型最新的本地文件
    pub async fn resend_latest(
        &self,
        kind: JobKind,
        cancel: &CancellationToken,
    ) -> AppResult<CycleReport> {
        let artifact = self.ctx.store.most_recent(kind).await?.ok_or_else(|| {
            AppError::file_not_found(format!(
                "{} 中没有可重传的 {} 文件",
                self.ctx.config.storage.dir_for(kind).display(),
                kind
            ))
        })?;
        info!(path = %artifact.file_path.display(), "找到最新的本地文件");
        Ok(self.resend_artifact(artifact, cancel).await)
    }

    async fn resend_artifact(&self, artifact: Artifact, cancel: &CancellationToken) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("resend", kind = %artifact.kind, cycle_id = %cycle_id);
        match FileHasher::calculate_file_sha256(&artifact.file_path).await {
            Ok(sha256) => info!(
                path = %artifact.file_path.display(),
                size = artifact.size_bytes,
                sha256 = %sha256,
                "准备重传本地文件"
            ),
            Err(e) => warn!(path = %artifact.file_path.display(), error = %e, "计算文件哈希失败"),
        }
        let outcome = self.deliver_and_settle(&artifact, cancel).instrument(span).await;
        CycleReport {
            kind: artifact.kind,
            cycle_id,
            artifact: Some(artifact),
            outcome,
        }
    }

    /// 记录本地保留的未上传文件
    async fn log_retained(&self) {
        for kind in JobKind::ALL {
            match self.ctx.store.list_retained(kind).await {
                Ok(retained) if !retained.is_empty() => {
                    info!(
                        kind = %kind,
                        count = retained.len(),
                        oldest = %retained[0].file_path.display(),
                        "本地保留有采集文件"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(kind = %kind, error = %e, "列出本地采集文件失败"),
            }
        }
    }

    fn spawn_cycle(&self, tasks: &mut JoinSet<()>, kind: JobKind, cancel: &CancellationToken) {
        let scheduler = self.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let report = scheduler.run_cycle(kind, &cancel).await;
            if report.is_success() {
                info!(kind = %kind, cycle_id = %report.cycle_id, "周期完成");
            }
        });
    }

    fn spawn_health_check(&self, tasks: &mut JoinSet<()>) {
        let delivery = self.ctx.delivery.clone();
        tasks.spawn(async move {
            delivery.health_check().await;
        });
    }

    /// 持续运行，直到取消；取消后等待进行中的任务结束
    pub async fn run(&self, cancel: CancellationToken) -> AppResult<()> {
        let schedule = &self.ctx.config.schedule;
        let baseline_at = if schedule.baseline.enabled {
            Some(schedule.baseline.parse_time_of_day().map_err(AppError::config)?)
        } else {
            None
        };

        info!(
            routine_enabled = schedule.routine_enabled,
            routine_interval_secs = schedule.routine_interval_secs,
            baseline_at = ?baseline_at,
            "调度器启动"
        );
        self.log_retained().await;

        let mut routine_ticker = schedule
            .routine_enabled
            .then(|| periodic(schedule.routine_interval_secs));
        let mut health_ticker = schedule.health_check_interval_secs.map(periodic);
        let mut next_baseline = baseline_at.map(baseline_deadline);

        let mut tasks: JoinSet<()> = JoinSet::new();
        if baseline_at.is_some() && schedule.baseline.run_on_start {
            self.spawn_cycle(&mut tasks, JobKind::Baseline, &cancel);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick(&mut routine_ticker) => {
                    self.spawn_cycle(&mut tasks, JobKind::Routine, &cancel);
                }
                _ = sleep_until(next_baseline) => {
                    self.spawn_cycle(&mut tasks, JobKind::Baseline, &cancel);
                    next_baseline = baseline_at.map(baseline_deadline);
                }
                _ = tick(&mut health_ticker) => {
                    self.spawn_health_check(&mut tasks);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "调度任务异常退出");
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "收到停止信号，等待进行中的任务完成");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "调度任务异常退出");
            }
        }
        info!("调度器已停止");
        Ok(())
    }
}

fn periodic(secs: u64) -> Interval {
    let mut ticker = interval(Duration::from_secs(secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn baseline_deadline(at: NaiveTime) -> Instant {
    let now = Local::now();
    let next = next_daily_run(&now, at);
    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
    info!(next = %next, "下一次基准采集时间");
    Instant::now() + wait
}

/// 计算严格晚于 `now` 的下一个每日执行时刻
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..=2 {
        let Some(date) = today.checked_add_days(chrono::Days::new(offset)) else {
            continue;
        };
        // 夏令时跳过的时刻不存在，顺延到下一天
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            if candidate > *now {
                return candidate;
            }
        }
    }
    now.clone() + TimeDelta::days(1)
}
