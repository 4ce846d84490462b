use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("API error: {0}")]
    ApiError(String),

    /// 网络抖动、限流等可重试错误
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// 服务端明确返回失败，不再重试
    #[error("Provider reported failure: {0}")]
    FatalProvider(String),

    #[error("Job {job_ref} did not finish within {timeout_secs:.1}s")]
    PollTimeout { job_ref: String, timeout_secs: f64 },

    #[error("Downloaded clip failed integrity check: {0}")]
    FetchIntegrity(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Composition error: {0}")]
    Composition(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Environment variable error: {0}")]
    EnvError(String),

    #[error("FFmpeg error: {0}")]
    FfmpegError(String),
}

impl VideoError {
    /// 是否值得按退避策略重试
    pub fn is_retryable(&self) -> bool {
        match self {
            VideoError::TransientProvider(_) => true,
            VideoError::HttpError(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            }
            _ => false,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            VideoError::TransientProvider(_) | VideoError::HttpError(_) => {
                FailureKind::TransientProvider
            }
            VideoError::FatalProvider(_) | VideoError::ApiError(_) | VideoError::JsonError(_) => {
                FailureKind::FatalProvider
            }
            VideoError::PollTimeout { .. } => FailureKind::PollTimeout,
            VideoError::FetchIntegrity(_) => FailureKind::FetchIntegrity,
            VideoError::Cancelled(_) => FailureKind::Cancelled,
            VideoError::FfmpegError(_) => FailureKind::Sync,
            VideoError::Composition(_) => FailureKind::Composition,
            VideoError::ConfigError(_) | VideoError::IoError(_) | VideoError::EnvError(_) => {
                FailureKind::Internal
            }
        }
    }
}

/// 写入 RunResult 的单场景失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientProvider,
    FatalProvider,
    PollTimeout,
    FetchIntegrity,
    Cancelled,
    Sync,
    Composition,
    Internal,
}

pub type Result<T> = std::result::Result<T, VideoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(VideoError::TransientProvider("rate limited".into()).is_retryable());
        assert!(!VideoError::FatalProvider("content policy".into()).is_retryable());
        assert!(!VideoError::FetchIntegrity("empty".into()).is_retryable());
    }

    #[test]
    fn timeout_maps_to_poll_timeout_kind() {
        let err = VideoError::PollTimeout {
            job_ref: "task-1".into(),
            timeout_secs: 600.0,
        };
        assert_eq!(err.kind(), FailureKind::PollTimeout);
        assert!(err.to_string().contains("task-1"));
    }
}
