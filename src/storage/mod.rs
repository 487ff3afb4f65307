pub mod hasher;
pub mod local;

pub use hasher::FileHasher;
pub use local::LocalArtifactStore;

use crate::error::AppResult;
use crate::models::{Artifact, JobKind};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// 采集产物存储抽象接口
#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 为新任务分配暂存文件路径（文件名包含任务类型与时间戳，保证不重名）
    async fn allocate(&self, kind: JobKind, now: DateTime<Utc>) -> AppResult<PathBuf>;

    /// 将采集完成的文件登记为正式产物
    async fn persist(&self, artifact: Artifact) -> AppResult<Artifact>;

    /// 获取指定类型最新的产物
    async fn most_recent(&self, kind: JobKind) -> AppResult<Option<Artifact>>;

    /// 列出本地保留的产物（按时间从旧到新）
    async fn list_retained(&self, kind: JobKind) -> AppResult<Vec<Artifact>>;

    /// 打开已存在的产物文件（用于手动重传），文件不存在或为空时返回错误
    async fn open(&self, kind: JobKind, path: &Path) -> AppResult<Artifact>;

    /// 删除产物，文件已不存在时视为成功
    async fn delete(&self, artifact: &Artifact) -> AppResult<()>;

    /// 清理采集失败留下的暂存文件
    async fn discard_staged(&self, path: &Path) -> AppResult<()>;
}
