use super::{
    retry::{AttemptResult, RetryDecision, RetryPolicy},
    transport::{HttpTransport, UploadRequest, UploadTransport},
};
use crate::{
    config::{DeliveryConfig, ServerConfig, UploadProfile},
    error::{AppResult, DeliveryError},
    models::{
        Artifact, DeliveryAttempt, DeliveryOutcome, JobKind, UploadMetadata, UploadReceipt,
    },
    storage::FileHasher,
};
use bytes::Bytes;
use serde_json::Value as JsonValue;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const BODY_PREVIEW_CHARS: usize = 200;

/// 采集数据上传客户端
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn UploadTransport>,
    server: ServerConfig,
    config: DeliveryConfig,
    policy: RetryPolicy,
    /// 跨任务类型的上传并发限制
    upload_slots: Option<Arc<Semaphore>>,
}

impl DeliveryClient {
    /// 创建使用 HTTP 通道的客户端
    pub fn new(server: &ServerConfig, config: &DeliveryConfig) -> AppResult<Self> {
        let transport = HttpTransport::new(server.insecure_tls)?;
        Ok(Self::with_transport(Arc::new(transport), server, config))
    }

    pub fn with_transport(
        transport: Arc<dyn UploadTransport>,
        server: &ServerConfig,
        config: &DeliveryConfig,
    ) -> Self {
        let upload_slots = (config.max_concurrent_uploads > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_uploads)));

        Self {
            transport,
            server: server.clone(),
            config: config.clone(),
            policy: RetryPolicy::from_config(&config.retry),
            upload_slots,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 按部署配置构造上传请求
    pub fn build_request(
        &self,
        artifact: &Artifact,
        metadata: &UploadMetadata,
        file_bytes: Bytes,
    ) -> AppResult<UploadRequest> {
        let endpoint = match artifact.kind {
            JobKind::Routine => &self.config.routine,
            JobKind::Baseline => &self.config.baseline,
        };

        let mut fields: Vec<(String, String)> = Vec::new();
        match endpoint.profile {
            UploadProfile::MetadataJson => {
                fields.push(("metadata".to_string(), serde_json::to_string(metadata)?));
            }
            UploadProfile::FormFields => {
                fields.push(("device_id".to_string(), metadata.device_identifier.clone()));
                fields.push((
                    "collection_duration".to_string(),
                    metadata.capture_duration.to_string(),
                ));
                fields.push((
                    "collection_start_time".to_string(),
                    metadata.collection_start_time(),
                ));
                fields.push(("metadata".to_string(), serde_json::to_string(metadata)?));
            }
            UploadProfile::FileOnly => {}
        }

        Ok(UploadRequest {
            url: self.server.api_url(&endpoint.path),
            file_name: artifact.file_name().to_string(),
            file_bytes,
            mime_type: self.config.mime_type.clone(),
            fields,
            auth: self.config.auth.clone(),
            timeout: Duration::from_secs(self.config.upload_timeout_secs),
        })
    }

    /// 上传采集产物，按重试策略重试，直到成功、放弃或被取消
    pub async fn deliver(
        &self,
        artifact: &Artifact,
        metadata: &UploadMetadata,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let path = artifact.file_path.display().to_string();
        let give_up = |attempts: Vec<DeliveryAttempt>, error: DeliveryError| DeliveryOutcome {
            kind: artifact.kind,
            attempts,
            result: Err(error),
        };

        let file_bytes = match tokio::fs::read(&artifact.file_path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                error!(path = %path, error = %e, "读取待上传文件失败");
                return give_up(
                    Vec::new(),
                    DeliveryError::TerminalFailure {
                        attempts: 0,
                        last_status: None,
                        reason: format!("读取文件失败: {}", e),
                    },
                );
            }
        };
        let local_hash = FileHasher::calculate_sha256(&file_bytes);

        let request = match self.build_request(artifact, metadata, file_bytes) {
            Ok(request) => request,
            Err(e) => {
                error!(path = %path, error = %e, "构造上传请求失败");
                return give_up(
                    Vec::new(),
                    DeliveryError::TerminalFailure {
                        attempts: 0,
                        last_status: None,
                        reason: e.to_string(),
                    },
                );
            }
        };

        let _permit = match &self.upload_slots {
            Some(slots) => tokio::select! {
                permit = slots.clone().acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => {
                    return give_up(Vec::new(), DeliveryError::Cancelled { attempts: 0 });
                }
            },
            None => None,
        };

        info!(
            path = %path,
            url = %request.url,
            size = artifact.size_bytes,
            "开始上传采集数据"
        );

        let mut history: Vec<AttemptResult> = Vec::new();
        let mut attempts: Vec<DeliveryAttempt> = Vec::new();
        loop {
            let attempt_number = history.len() as u32 + 1;
            info!(
                path = %path,
                "上传第 {}/{} 次尝试",
                attempt_number, self.policy.max_attempts
            );

            let (result, receipt) = self.attempt_once(&request).await;
            attempts.push(DeliveryAttempt {
                artifact: artifact.file_path.clone(),
                attempt_number,
                outcome: self.policy.classify(&result),
                http_status: result.http_status(),
                detail: result.describe(),
            });
            history.push(result);

            match self.policy.decide(&history) {
                RetryDecision::Succeeded => {
                    let receipt = receipt.unwrap_or_default();
                    if let Some(remote_hash) = &receipt.content_hash {
                        if !FileHasher::matches(remote_hash, &local_hash) {
                            warn!(
                                path = %path,
                                local = %local_hash,
                                remote = %remote_hash,
                                "服务器返回的文件哈希与本地不一致"
                            );
                        }
                    }
                    info!(
                        path = %path,
                        attempts = attempt_number,
                        id = receipt.id.as_deref().unwrap_or("N/A"),
                        "上传成功"
                    );
                    return DeliveryOutcome {
                        kind: artifact.kind,
                        attempts,
                        result: Ok(receipt),
                    };
                }
                RetryDecision::GiveUp(err) => {
                    error!(
                        path = %path,
                        attempts = attempt_number,
                        status = ?err.http_status(),
                        error = %err,
                        "上传失败，文件保留在本地以便手动重传"
                    );
                    return give_up(attempts, err);
                }
                RetryDecision::Retry { delay } => {
                    let delay = self.policy.with_jitter(delay);
                    let failure = DeliveryError::RetryableFailure {
                        attempt: attempt_number,
                        status: history.last().and_then(AttemptResult::http_status),
                        reason: history.last().map(AttemptResult::describe).unwrap_or_default(),
                    };
                    warn!(
                        path = %path,
                        attempt = attempt_number,
                        status = ?failure.http_status(),
                        error = %failure,
                        "{:.1}秒后重试",
                        delay.as_secs_f64()
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            warn!(path = %path, attempts = attempt_number, "上传重试已取消，文件保留在本地");
                            return give_up(
                                attempts,
                                DeliveryError::Cancelled { attempts: attempt_number },
                            );
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// 单次上传尝试
    async fn attempt_once(&self, request: &UploadRequest) -> (AttemptResult, Option<UploadReceipt>) {
        let response = match self.transport.post_multipart(request).await {
            Ok(response) => response,
            Err(e) => return (AttemptResult::NetworkError(e.to_string()), None),
        };

        if !response.is_success() {
            let body_preview = response
                .body
                .chars()
                .take(BODY_PREVIEW_CHARS)
                .collect::<String>();
            return (
                AttemptResult::HttpStatus {
                    status: response.status,
                    body_preview,
                },
                None,
            );
        }

        match serde_json::from_str::<JsonValue>(&response.body) {
            Ok(json) => {
                debug!(response = %json, "服务器确认信息");
                (
                    AttemptResult::Delivered {
                        status: response.status,
                    },
                    Some(UploadReceipt::from_json(&json)),
                )
            }
            Err(e) => (
                AttemptResult::InvalidResponse {
                    status: response.status,
                    reason: e.to_string(),
                },
                None,
            ),
        }
    }

    /// 服务器健康检查（仅供参考，不影响已采集文件的上传）
    pub async fn health_check(&self) -> bool {
        let url = self.server.api_url(&self.config.health_endpoint);
        let timeout = Duration::from_secs(self.config.health_timeout_secs);

        match self.transport.get(&url, &self.config.auth, timeout).await {
            Ok(response) if response.status == 200 => {
                info!("服务器健康检查正常");
                true
            }
            Ok(response) => {
                let preview = response
                    .body
                    .chars()
                    .take(BODY_PREVIEW_CHARS)
                    .collect::<String>();
                warn!(status = response.status, body = %preview, "服务器健康检查失败");
                false
            }
            Err(e) => {
                warn!(url = %url, error = %e, "服务器健康检查失败");
                false
            }
        }
    }
}
