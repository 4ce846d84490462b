use crate::error::{Result, VideoError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 某个场景失败后，整个运行如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// 各场景独立完成，最终报告混合结果
    #[default]
    BestEffort,
    /// 第一次失败后停止提交新场景
    AbortOnFirstFailure,
}

/// 中止时对已经在轮询中的任务的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelMode {
    /// 已提交的任务继续跑完
    #[default]
    Finish,
    /// 在下一次轮询时取消
    Cancel,
}

/// 失败场景在时间线上的表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailedScenePolicy {
    #[default]
    Placeholder,
    Halt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 包括第一次在内的最大尝试次数
    pub max_attempts: usize,
    /// 退避基数（毫秒），第 n 次重试前约等待 base^n * 2，带随机抖动
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    pub submit_retry: RetryConfig,
    /// 下载校验失败时的最大尝试次数
    pub fetch_attempts: usize,
    pub failure_policy: FailurePolicy,
    pub cancel_mode: CancelMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            poll_interval_ms: 10_000,
            poll_timeout_secs: 600,
            submit_retry: RetryConfig::default(),
            fetch_attempts: 3,
            failure_policy: FailurePolicy::default(),
            cancel_mode: CancelMode::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 时长容差（秒）
    pub epsilon: f64,
    /// 最低播放速度，低于它就改为冻结末帧
    pub min_speed_factor: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            min_speed_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    pub width: u32,
    pub height: u32,
    /// 背景音轨相对旁白的音量
    pub background_level: f64,
    pub failed_scene_policy: FailedScenePolicy,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
            background_level: 0.075,
            failed_scene_policy: FailedScenePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub voice: String,
    /// 已上传的产品参考图 URL，仅用于 include_product 的场景
    pub reference_image_url: Option<String>,
    /// 失败场景占位用的静态图，缺省为黑屏
    pub placeholder_image: Option<PathBuf>,
    pub background_track: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub sync: SyncConfig,
    pub compose: ComposeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            voice: "nova".to_string(),
            reference_image_url: None,
            placeholder_image: None,
            background_track: None,
            scheduler: SchedulerConfig::default(),
            sync: SyncConfig::default(),
            compose: ComposeConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.max_concurrency == 0 {
            return Err(VideoError::ConfigError(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if s.poll_interval_ms == 0 || s.poll_timeout_secs == 0 {
            return Err(VideoError::ConfigError(
                "poll interval and poll timeout must be positive".to_string(),
            ));
        }
        if s.submit_retry.max_attempts == 0 || s.fetch_attempts == 0 {
            return Err(VideoError::ConfigError(
                "retry caps must allow at least one attempt".to_string(),
            ));
        }
        if !(self.sync.epsilon > 0.0) {
            return Err(VideoError::ConfigError(format!(
                "sync epsilon must be positive, got {}",
                self.sync.epsilon
            )));
        }
        if !(self.sync.min_speed_factor > 0.0 && self.sync.min_speed_factor <= 1.0) {
            return Err(VideoError::ConfigError(format!(
                "min_speed_factor must be in (0, 1], got {}",
                self.sync.min_speed_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.compose.background_level) {
            return Err(VideoError::ConfigError(format!(
                "background_level must be in [0, 1], got {}",
                self.compose.background_level
            )));
        }
        Ok(())
    }

    pub fn narration_dir(&self) -> PathBuf {
        self.output_dir.join("narration")
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.output_dir.join("clips")
    }

    pub fn synced_dir(&self) -> PathBuf {
        self.output_dir.join("synced")
    }
}
