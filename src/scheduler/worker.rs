use crate::api::{ProviderStatus, VideoProvider};
use crate::config::{CancelMode, FailurePolicy, SchedulerConfig};
use crate::error::{Result, VideoError};
use crate::scene::{Job, JobStatus, Scene, SceneStatus};
use crate::video::ClipFetcher;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 单个场景的最终结果
#[derive(Debug)]
pub struct SceneOutcome {
    pub scene: Scene,
    pub error: Option<VideoError>,
}

/// 一个 worker 独占一个场景：提交 → 轮询 → 下载
pub(crate) struct SceneWorker {
    pub(crate) provider: Arc<dyn VideoProvider>,
    pub(crate) fetcher: ClipFetcher,
    pub(crate) config: SchedulerConfig,
    pub(crate) reference_image_url: Option<String>,
    /// 中止信号：置位后不再提交
    pub(crate) abort: CancellationToken,
}

impl SceneWorker {
    /// CancelMode::Cancel 时在轮询中响应中止，否则跑完
    fn in_flight_token(&self) -> Option<&CancellationToken> {
        match self.config.cancel_mode {
            CancelMode::Cancel => Some(&self.abort),
            CancelMode::Finish => None,
        }
    }

    pub(crate) async fn run(&self, mut scene: Scene) -> SceneOutcome {
        let index = scene.index;
        match self.drive(&mut scene).await {
            Ok(()) => {
                scene.status = SceneStatus::Ready;
                info!(scene = index, "Scene completed");
                SceneOutcome { scene, error: None }
            }
            Err(e) => {
                scene.status = SceneStatus::Failed;
                if self.config.failure_policy == FailurePolicy::AbortOnFirstFailure
                    && !matches!(e, VideoError::Cancelled(_))
                {
                    // 先置位再释放并发名额，保证之后不会有新的提交
                    self.abort.cancel();
                    warn!(scene = index, "Scene failed, aborting remaining scenes: {}", e);
                } else {
                    warn!(scene = index, "Scene failed: {}", e);
                }
                SceneOutcome {
                    scene,
                    error: Some(e),
                }
            }
        }
    }

    async fn drive(&self, scene: &mut Scene) -> Result<()> {
        let reference = if scene.include_product {
            self.reference_image_url.as_deref()
        } else {
            None
        };

        let (job_ref, attempts) = self.submit(scene.index, &scene.visual_prompt, reference).await?;
        scene.job = Some(Job::new(job_ref, attempts));
        scene.status = SceneStatus::Submitted;

        let job = self.poll_until_terminal(scene).await?;

        let never = CancellationToken::new();
        let cancel = self.in_flight_token().unwrap_or(&never);
        let clip = self.fetcher.fetch(&job, scene.index, cancel).await?;
        scene.clip_path = Some(clip);
        Ok(())
    }

    /// 可重试错误按指数退避重试，返回任务引用和尝试次数
    async fn submit(
        &self,
        index: usize,
        prompt: &str,
        reference: Option<&str>,
    ) -> Result<(String, u32)> {
        let retry = &self.config.submit_retry;
        let strategy = ExponentialBackoff::from_millis(retry.initial_backoff_ms.max(1))
            .factor(2)
            .max_delay(Duration::from_millis(retry.max_backoff_ms))
            .map(jitter)
            .take(retry.max_attempts.saturating_sub(1));

        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let provider = &self.provider;
        let abort = &self.abort;
        let max_attempts = retry.max_attempts;

        let job_ref = Retry::spawn(strategy, move || async move {
            if abort.is_cancelled() {
                return Err(RetryError::Permanent(VideoError::Cancelled(format!(
                    "scene {} not submitted after abort",
                    index
                ))));
            }
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            match provider.submit(prompt, reference).await {
                Ok(job_ref) => Ok(job_ref),
                Err(e) if e.is_retryable() => {
                    warn!(
                        scene = index,
                        "Submission attempt {}/{} failed, will retry: {}", attempt, max_attempts, e
                    );
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(e) => Err(RetryError::Permanent(e)),
            }
        })
        .await?;

        let attempts = attempts.load(Ordering::SeqCst);
        info!(scene = index, "Submitted job {} after {} attempt(s)", job_ref, attempts);
        Ok((job_ref, attempts))
    }

    /// 轮询状态机：睡一个间隔 → 检查取消和超时 → 查询
    async fn poll_until_terminal(&self, scene: &mut Scene) -> Result<Job> {
        let index = scene.index;
        let interval = self.config.poll_interval();
        let timeout = self.config.poll_timeout();
        let deadline = Instant::now() + timeout;
        scene.status = SceneStatus::Polling;

        let job = scene
            .job
            .as_mut()
            .ok_or_else(|| VideoError::ApiError(format!("scene {} has no job", index)))?;
        let mut polls = 0u32;

        loop {
            tokio::time::sleep(interval).await;

            if self.in_flight_token().is_some_and(|t| t.is_cancelled()) {
                return Err(VideoError::Cancelled(format!(
                    "job {} cancelled while polling",
                    job.provider_ref
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                job.status = JobStatus::TimedOut;
                return Err(VideoError::PollTimeout {
                    job_ref: job.provider_ref.clone(),
                    timeout_secs: timeout.as_secs_f64(),
                });
            }

            polls += 1;
            job.last_poll_at = Some(Utc::now());
            let status = match tokio::time::timeout(
                deadline - now,
                self.provider.poll(&job.provider_ref),
            )
            .await
            {
                Ok(status) => status,
                Err(_) => {
                    job.status = JobStatus::TimedOut;
                    return Err(VideoError::PollTimeout {
                        job_ref: job.provider_ref.clone(),
                        timeout_secs: timeout.as_secs_f64(),
                    });
                }
            };

            match status {
                Ok(ProviderStatus::Pending) => job.status = JobStatus::Pending,
                Ok(ProviderStatus::Running) => job.status = JobStatus::Running,
                Ok(ProviderStatus::Succeeded { artifact_url }) => {
                    job.status = JobStatus::Succeeded;
                    job.artifact_url = Some(artifact_url);
                    info!(scene = index, "Job {} succeeded after {} polls", job.provider_ref, polls);
                    return Ok(job.clone());
                }
                Ok(ProviderStatus::Failed { reason }) => {
                    job.status = JobStatus::Failed;
                    return Err(VideoError::FatalProvider(reason));
                }
                Err(e) if e.is_retryable() => {
                    warn!(scene = index, "Failed to get job status, will poll again: {}", e);
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    return Err(e);
                }
            }
        }
    }
}
