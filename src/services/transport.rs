use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
};
use bytes::Bytes;
use reqwest::{
    Client, RequestBuilder,
    multipart::{Form, Part},
};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// 待发送的 multipart 上传请求
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url: String,
    pub file_name: String,
    pub file_bytes: Bytes,
    pub mime_type: String,
    pub fields: Vec<(String, String)>,
    pub auth: AuthConfig,
    pub timeout: Duration,
}

/// HTTP 响应（状态码 + 文本）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 网络层错误，一律视为可重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("请求超时: {0}")]
    Timeout(String),

    #[error("连接失败: {0}")]
    Connect(String),

    #[error("请求发送失败: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// 上传通道抽象接口
#[async_trait::async_trait]
pub trait UploadTransport: Send + Sync {
    /// 发送 multipart/form-data POST
    async fn post_multipart(
        &self,
        request: &UploadRequest,
    ) -> Result<TransportResponse, TransportError>;

    /// 发送 GET（用于健康检查）
    async fn get(
        &self,
        url: &str,
        auth: &AuthConfig,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// 基于 reqwest 的 HTTP 实现
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(insecure_tls: bool) -> AppResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .map_err(|e| AppError::config(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self { client })
    }

    fn with_auth(builder: RequestBuilder, auth: &AuthConfig) -> RequestBuilder {
        match auth {
            AuthConfig::None => builder,
            AuthConfig::Bearer { token } => builder.bearer_auth(token),
            AuthConfig::ApiKey { key, header } => builder.header(header.as_str(), key.as_str()),
        }
    }

    async fn read_response(
        response: reqwest::Response,
    ) -> Result<TransportResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, len = body.len(), "收到服务器响应");
        Ok(TransportResponse { status, body })
    }
}

#[async_trait::async_trait]
impl UploadTransport for HttpTransport {
    async fn post_multipart(
        &self,
        request: &UploadRequest,
    ) -> Result<TransportResponse, TransportError> {
        let part = Part::stream(request.file_bytes.clone())
            .file_name(request.file_name.clone())
            .mime_str(&request.mime_type)
            .map_err(|e| TransportError::Request(format!("设置文件MIME类型失败: {}", e)))?;

        let mut form = Form::new().part("file", part);
        for (name, value) in &request.fields {
            form = form.text(name.clone(), value.clone());
        }

        let builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .multipart(form);
        let response = Self::with_auth(builder, &request.auth).send().await?;
        Self::read_response(response).await
    }

    async fn get(
        &self,
        url: &str,
        auth: &AuthConfig,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let builder = self.client.get(url).timeout(timeout);
        let response = Self::with_auth(builder, auth).send().await?;
        Self::read_response(response).await
    }
}
