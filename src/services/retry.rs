use crate::{config::RetryConfig, error::DeliveryError, models::AttemptOutcome};
use std::time::Duration;

/// 单次上传尝试的原始结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// 2xx 且响应体可解析
    Delivered { status: u16 },
    /// 网络层错误（连接被拒绝、超时等）
    NetworkError(String),
    /// 非 2xx 响应
    HttpStatus { status: u16, body_preview: String },
    /// 2xx 但响应体无法解析
    InvalidResponse { status: u16, reason: String },
}

impl AttemptResult {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AttemptResult::Delivered { status }
            | AttemptResult::HttpStatus { status, .. }
            | AttemptResult::InvalidResponse { status, .. } => Some(*status),
            AttemptResult::NetworkError(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AttemptResult::Delivered { status } => format!("HTTP {}", status),
            AttemptResult::NetworkError(reason) => reason.clone(),
            AttemptResult::HttpStatus {
                status,
                body_preview,
            } => format!("HTTP {}: {}", status, body_preview),
            AttemptResult::InvalidResponse { status, reason } => {
                format!("HTTP {} 响应无法解析: {}", status, reason)
            }
        }
    }
}

/// 重试决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待后再次尝试
    Retry { delay: Duration },
    /// 上传成功，停止
    Succeeded,
    /// 放弃，产物保留在本地
    GiveUp(DeliveryError),
}

/// 上传重试策略（纯函数，不做IO也不休眠）
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
    pub client_errors_terminal: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.retry_delay_secs),
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            max_delay: Duration::from_secs(config.max_retry_delay_secs),
            jitter: config.jitter,
            client_errors_terminal: config.client_errors_terminal,
        }
    }

    /// 对单次尝试结果分类
    pub fn classify(&self, result: &AttemptResult) -> AttemptOutcome {
        match result {
            AttemptResult::Delivered { .. } => AttemptOutcome::Success,
            AttemptResult::HttpStatus { status, .. }
                if self.client_errors_terminal && is_permanent_client_error(*status) =>
            {
                AttemptOutcome::TerminalFailure
            }
            _ => AttemptOutcome::RetryableFailure,
        }
    }

    /// 根据目前为止的全部尝试结果决定下一步
    pub fn decide(&self, history: &[AttemptResult]) -> RetryDecision {
        let Some(last) = history.last() else {
            return RetryDecision::Retry {
                delay: Duration::ZERO,
            };
        };
        let attempts = history.len() as u32;

        match self.classify(last) {
            AttemptOutcome::Success => RetryDecision::Succeeded,
            AttemptOutcome::TerminalFailure => RetryDecision::GiveUp(final_error(attempts, last)),
            AttemptOutcome::RetryableFailure if attempts >= self.max_attempts => {
                RetryDecision::GiveUp(final_error(attempts, last))
            }
            AttemptOutcome::RetryableFailure => RetryDecision::Retry {
                delay: self.delay_for(attempts),
            },
        }
    }

    /// 第 `failed_attempts` 次失败后的等待时间: base * multiplier^(n-1)，不超过上限
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// 在等待时间上增加最多10%的随机抖动
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let jitter_range = delay.as_secs_f64() * 0.1;
        delay + Duration::from_secs_f64(rand::random::<f64>() * jitter_range)
    }
}

/// 不会因重试而改变结果的 4xx（408/429 除外）
fn is_permanent_client_error(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

fn final_error(attempts: u32, last: &AttemptResult) -> DeliveryError {
    match last.http_status() {
        Some(status @ (401 | 403)) => DeliveryError::Unauthenticated { attempts, status },
        last_status => DeliveryError::TerminalFailure {
            attempts,
            last_status,
            reason: last.describe(),
        },
    }
}
