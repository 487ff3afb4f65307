use super::ArtifactStore;
use crate::{
    config::StorageConfig,
    error::{AppError, AppResult},
    models::{Artifact, JobKind},
};
use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// 采集文件扩展名
pub const ARTIFACT_EXTENSION: &str = "pcap";
/// 采集进行中的暂存后缀
pub const STAGED_SUFFIX: &str = ".part";

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_SUFFIX: u32 = 1000;

/// 本地文件系统存储实现
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    routine_dir: PathBuf,
    baseline_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(routine_dir: impl Into<PathBuf>, baseline_dir: impl Into<PathBuf>) -> Self {
        Self {
            routine_dir: routine_dir.into(),
            baseline_dir: baseline_dir.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.routine_dir.clone(), config.baseline_dir.clone())
    }

    /// 任务类型对应的目录
    pub fn dir_for(&self, kind: JobKind) -> &Path {
        match kind {
            JobKind::Routine => &self.routine_dir,
            JobKind::Baseline => &self.baseline_dir,
        }
    }

    /// 生成文件名主干: `<前缀>_<YYYYmmdd_HHMMSS_mmm>[_n]`，时间戳为设备本地时间
    fn file_stem(kind: JobKind, now: DateTime<Utc>, suffix: u32) -> String {
        let local = now.with_timezone(&Local);
        let stamp = format!(
            "{}_{:03}",
            local.format(STAMP_FORMAT),
            local.timestamp_subsec_millis()
        );
        if suffix == 0 {
            format!("{}_{}", kind.file_prefix(), stamp)
        } else {
            format!("{}_{}_{}", kind.file_prefix(), stamp, suffix)
        }
    }

    /// 从文件名解析采集时间（本地时间）
    fn parse_created_at(kind: JobKind, file_name: &str) -> Option<DateTime<Utc>> {
        let rest = file_name.strip_prefix(kind.file_prefix())?.strip_prefix('_')?;
        let stamp = rest.get(..15)?;
        let millis: i64 = rest.get(16..19)?.parse().ok()?;
        let naive = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
        let local = naive.and_local_timezone(Local).earliest()?;
        Some(local.with_timezone(&Utc) + TimeDelta::milliseconds(millis))
    }

    /// 同一毫秒内重名时追加的序号，没有序号时为0
    fn name_suffix(kind: JobKind, file_name: &str) -> u32 {
        file_name
            .strip_prefix(kind.file_prefix())
            .and_then(|rest| rest.get(20..))
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix(&format!(".{}", ARTIFACT_EXTENSION)))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    fn is_artifact_name(kind: JobKind, file_name: &str) -> bool {
        file_name.starts_with(&format!("{}_", kind.file_prefix()))
            && file_name.ends_with(&format!(".{}", ARTIFACT_EXTENSION))
    }

    /// 读取磁盘上的文件并构造产物，空文件不会被视为产物
    async fn load_artifact(kind: JobKind, path: PathBuf) -> AppResult<Option<Artifact>> {
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() || metadata.len() == 0 {
            return Ok(None);
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let created_at = match Self::parse_created_at(kind, file_name) {
            Some(t) => t,
            None => metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        };

        Ok(Some(Artifact {
            file_path: path,
            size_bytes: metadata.len(),
            created_at,
            kind,
        }))
    }
}

#[async_trait::async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn allocate(&self, kind: JobKind, now: DateTime<Utc>) -> AppResult<PathBuf> {
        let dir = self.dir_for(kind);
        fs::create_dir_all(dir).await?;

        for suffix in 0..MAX_NAME_SUFFIX {
            let stem = Self::file_stem(kind, now, suffix);
            let final_path = dir.join(format!("{}.{}", stem, ARTIFACT_EXTENSION));
            if fs::try_exists(&final_path).await? {
                continue;
            }

            let staged = dir.join(format!("{}.{}{}", stem, ARTIFACT_EXTENSION, STAGED_SUFFIX));
            // create_new 保证同一路径只会被分配一次
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staged)
                .await
            {
                Ok(_) => {
                    debug!(path = %staged.display(), "分配采集暂存文件");
                    return Ok(staged);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::internal(format!(
            "无法在 {} 中分配不重名的采集文件",
            dir.display()
        )))
    }

    async fn persist(&self, artifact: Artifact) -> AppResult<Artifact> {
        let file_name = artifact.file_name().to_string();
        let Some(final_name) = file_name.strip_suffix(STAGED_SUFFIX) else {
            if !fs::try_exists(&artifact.file_path).await? {
                return Err(AppError::file_not_found(artifact.file_path.display().to_string()));
            }
            return Ok(artifact);
        };

        let final_path = artifact.file_path.with_file_name(final_name);
        fs::rename(&artifact.file_path, &final_path).await?;
        info!(
            kind = %artifact.kind,
            path = %final_path.display(),
            size = artifact.size_bytes,
            "采集产物已保存"
        );

        Ok(Artifact {
            file_path: final_path,
            ..artifact
        })
    }

    async fn most_recent(&self, kind: JobKind) -> AppResult<Option<Artifact>> {
        Ok(self.list_retained(kind).await?.pop())
    }

    async fn list_retained(&self, kind: JobKind) -> AppResult<Vec<Artifact>> {
        let dir = self.dir_for(kind);
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !Self::is_artifact_name(kind, name) {
                continue;
            }
            if let Some(artifact) = Self::load_artifact(kind, entry.path()).await? {
                artifacts.push(artifact);
            }
        }

        artifacts.sort_by(|a, b| {
            (a.created_at, Self::name_suffix(kind, a.file_name()))
                .cmp(&(b.created_at, Self::name_suffix(kind, b.file_name())))
        });
        Ok(artifacts)
    }

    async fn open(&self, kind: JobKind, path: &Path) -> AppResult<Artifact> {
        Self::load_artifact(kind, path.to_path_buf())
            .await?
            .ok_or_else(|| AppError::file_not_found(path.display().to_string()))
    }

    async fn delete(&self, artifact: &Artifact) -> AppResult<()> {
        match fs::remove_file(&artifact.file_path).await {
            Ok(()) => {
                info!(path = %artifact.file_path.display(), "已删除本地采集文件");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %artifact.file_path.display(), "采集文件已不存在，跳过删除");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_staged(&self, path: &Path) -> AppResult<()> {
        let is_staged = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(STAGED_SUFFIX));
        if !is_staged {
            warn!(path = %path.display(), "拒绝清理非暂存文件");
            return Ok(());
        }

        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalArtifactStore {
        LocalArtifactStore::new(dir.path().join("data"), dir.path().join("data/baseline"))
    }

    async fn capture_into(path: &Path, bytes: usize, kind: JobKind) -> Artifact {
        fs::write(path, vec![0xd4u8; bytes]).await.unwrap();
        Artifact {
            file_path: path.to_path_buf(),
            size_bytes: bytes as u64,
            created_at: Utc::now(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_allocate_names_encode_kind_and_time() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let now = Local.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap().with_timezone(&Utc);

        let routine = store.allocate(JobKind::Routine, now).await.unwrap();
        let baseline = store.allocate(JobKind::Baseline, now).await.unwrap();

        assert_eq!(
            routine.file_name().unwrap(),
            "csi_data_20250301_083000_000.pcap.part"
        );
        assert_eq!(
            baseline.file_name().unwrap(),
            "base_csi_20250301_083000_000.pcap.part"
        );
        assert!(baseline.starts_with(dir.path().join("data/baseline")));
    }

    #[tokio::test]
    async fn test_successive_jobs_never_collide() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let t = Local.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap().with_timezone(&Utc);

        let first = store.allocate(JobKind::Routine, t).await.unwrap();
        let next_second = store
            .allocate(JobKind::Routine, t + TimeDelta::seconds(1))
            .await
            .unwrap();
        assert_ne!(first, next_second);

        // 同一时刻的重复分配追加序号
        let mut names = HashSet::new();
        for _ in 0..5 {
            let path = store.allocate(JobKind::Routine, t).await.unwrap();
            assert!(names.insert(path));
        }
        assert!(!names.contains(&first));
    }

    #[tokio::test]
    async fn test_persist_promotes_staged_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let staged = store.allocate(JobKind::Routine, Utc::now()).await.unwrap();
        let artifact = capture_into(&staged, 128, JobKind::Routine).await;

        let persisted = store.persist(artifact).await.unwrap();
        assert!(!staged.exists());
        assert!(persisted.file_path.exists());
        assert_eq!(persisted.file_path.extension().unwrap(), "pcap");
        assert_eq!(persisted.size_bytes, 128);
    }

    #[tokio::test]
    async fn test_most_recent_selects_latest_of_kind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let t = Local.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap().with_timezone(&Utc);

        for offset in [0, 86_400, 172_800] {
            let staged = store
                .allocate(JobKind::Baseline, t + TimeDelta::seconds(offset))
                .await
                .unwrap();
            let artifact = capture_into(&staged, 64, JobKind::Baseline).await;
            store.persist(artifact).await.unwrap();
        }
        // 未完成的暂存文件与其他类型不参与选择
        store
            .allocate(JobKind::Baseline, t + TimeDelta::days(10))
            .await
            .unwrap();
        let routine = store.allocate(JobKind::Routine, t).await.unwrap();
        store
            .persist(capture_into(&routine, 10, JobKind::Routine).await)
            .await
            .unwrap();

        let latest = store.most_recent(JobKind::Baseline).await.unwrap().unwrap();
        assert_eq!(latest.file_name(), "base_csi_20250303_030000_000.pcap");
        assert_eq!(latest.created_at, t + TimeDelta::days(2));
        assert_eq!(latest.kind, JobKind::Baseline);

        let retained = store.list_retained(JobKind::Baseline).await.unwrap();
        assert_eq!(retained.len(), 3);
    }

    #[tokio::test]
    async fn test_most_recent_orders_collision_suffix_numerically() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let t = Local.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap().with_timezone(&Utc);

        for _ in 0..12 {
            let staged = store.allocate(JobKind::Routine, t).await.unwrap();
            store
                .persist(capture_into(&staged, 16, JobKind::Routine).await)
                .await
                .unwrap();
        }

        let retained = store.list_retained(JobKind::Routine).await.unwrap();
        assert_eq!(retained.len(), 12);
        assert_eq!(retained[0].file_name(), "csi_data_20250301_083000_000.pcap");
        assert_eq!(retained[2].file_name(), "csi_data_20250301_083000_000_2.pcap");
        assert_eq!(retained[10].file_name(), "csi_data_20250301_083000_000_10.pcap");

        let latest = store.most_recent(JobKind::Routine).await.unwrap().unwrap();
        assert_eq!(latest.file_name(), "csi_data_20250301_083000_000_11.pcap");
    }

    #[test]
    fn test_file_names_use_local_time() {
        let local = Local.with_ymd_and_hms(2025, 7, 15, 21, 5, 9).unwrap();
        let stem = LocalArtifactStore::file_stem(JobKind::Baseline, local.with_timezone(&Utc), 0);
        assert_eq!(stem, "base_csi_20250715_210509_000");
        assert_eq!(
            LocalArtifactStore::parse_created_at(JobKind::Baseline, &format!("{}.pcap", stem)),
            Some(local.with_timezone(&Utc))
        );
        assert_eq!(
            LocalArtifactStore::name_suffix(JobKind::Baseline, &format!("{}_7.pcap", stem)),
            7
        );
        assert_eq!(
            LocalArtifactStore::name_suffix(JobKind::Baseline, &format!("{}.pcap", stem)),
            0
        );
    }

    #[tokio::test]
    async fn test_most_recent_empty_directory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.most_recent(JobKind::Routine).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_byte_files_are_not_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(dir.path().join("data")).await.unwrap();
        fs::write(dir.path().join("data/csi_data_20250301_083000_000.pcap"), b"")
            .await
            .unwrap();

        assert!(store.list_retained(JobKind::Routine).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let staged = store.allocate(JobKind::Routine, Utc::now()).await.unwrap();
        let artifact = store
            .persist(capture_into(&staged, 32, JobKind::Routine).await)
            .await
            .unwrap();

        store.delete(&artifact).await.unwrap();
        assert!(!artifact.file_path.exists());
        store.delete(&artifact).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_existing_artifact() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(dir.path().join("data")).await.unwrap();
        let path = dir.path().join("data/csi_data_20250301_083000_000.pcap");
        fs::write(&path, vec![1u8; 42]).await.unwrap();

        let artifact = store.open(JobKind::Routine, &path).await.unwrap();
        assert_eq!(artifact.size_bytes, 42);
        assert_eq!(
            artifact.created_at,
            Local.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap().with_timezone(&Utc)
        );

        let missing = dir.path().join("data/missing.pcap");
        let err = store.open(JobKind::Routine, &missing).await.unwrap_err();
        assert!(matches!(err, AppError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_discard_staged_only_removes_part_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let staged = store.allocate(JobKind::Routine, Utc::now()).await.unwrap();
        store.discard_staged(&staged).await.unwrap();
        assert!(!staged.exists());
        store.discard_staged(&staged).await.unwrap();

        let kept = dir.path().join("data/keep.pcap");
        fs::write(&kept, b"x").await.unwrap();
        store.discard_staged(&kept).await.unwrap();
        assert!(kept.exists());
    }

    #[test]
    fn test_parse_created_at() {
        let parsed =
            LocalArtifactStore::parse_created_at(JobKind::Routine, "csi_data_20250301_083000_250_2.pcap")
                .unwrap();
        assert_eq!(
            parsed,
            Local.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap().with_timezone(&Utc) + TimeDelta::milliseconds(250)
        );
        assert!(LocalArtifactStore::parse_created_at(JobKind::Baseline, "csi_data_x.pcap").is_none());
    }
}
