mod worker;

pub use worker::SceneOutcome;

use crate::api::VideoProvider;
use crate::config::SchedulerConfig;
use crate::error::{FailureKind, VideoError};
use crate::scene::{RunResult, Scene, SceneFailure, SceneStatus};
use crate::video::ClipFetcher;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use worker::SceneWorker;

/// 第一阶段的结果：按 index 排好序的场景和部分 RunResult
#[derive(Debug)]
pub struct SchedulerReport {
    pub scenes: Vec<Scene>,
    pub result: RunResult,
    /// 是否因失败中止
    pub aborted: bool,
}

/// 有界并发地为每个场景提交、轮询并下载视频
pub struct Scheduler {
    provider: Arc<dyn VideoProvider>,
    fetcher: ClipFetcher,
    config: SchedulerConfig,
    reference_image_url: Option<String>,
}

impl Scheduler {
    pub fn new(provider: Arc<dyn VideoProvider>, fetcher: ClipFetcher, config: SchedulerConfig) -> Self {
        Self {
            provider,
            fetcher,
            config,
            reference_image_url: None,
        }
    }

    pub fn with_reference_image(mut self, url: Option<String>) -> Self {
        self.reference_image_url = url;
        self
    }

    /// 任一 worker 结束就立即放入下一个待处理场景；结果按 index 归并
    pub async fn submit_all(&self, scenes: Vec<Scene>, max_concurrency: usize) -> SchedulerReport {
        let total = scenes.len();
        let max_concurrency = max_concurrency.max(1);
        info!(
            "Scheduling {} scenes with at most {} in flight",
            total, max_concurrency
        );

        let abort = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(max_concurrency));
        let worker = Arc::new(SceneWorker {
            provider: self.provider.clone(),
            fetcher: self.fetcher.clone(),
            config: self.config.clone(),
            reference_image_url: self.reference_image_url.clone(),
            abort: abort.clone(),
        });

        // worker 异常退出时用原始场景兜底，保证每个 index 都有结果
        let mut outcomes: BTreeMap<usize, SceneOutcome> = BTreeMap::new();
        let mut originals: BTreeMap<usize, Scene> = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for scene in scenes {
            let permit = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };

            let permit = match permit {
                Some(p) if !abort.is_cancelled() => p,
                _ => {
                    let index = scene.index;
                    let mut scene = scene;
                    scene.status = SceneStatus::Failed;
                    outcomes.insert(
                        index,
                        SceneOutcome {
                            scene,
                            error: Some(VideoError::Cancelled(format!(
                                "scene {} not started after abort",
                                index
                            ))),
                        },
                    );
                    continue;
                }
            };

            originals.insert(scene.index, scene.clone());
            let worker = worker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.run(scene).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    outcomes.insert(outcome.scene.index, outcome);
                }
                Err(e) => error!("Scene worker terminated abnormally: {}", e),
            }
        }

        let mut result = RunResult::default();
        let mut ordered = Vec::with_capacity(total);
        for (index, outcome) in outcomes {
            match &outcome.error {
                None => result.record_success(index),
                Some(e) => result.record_failure(index, SceneFailure::from(e)),
            }
            ordered.push(outcome.scene);
        }

        for (index, mut scene) in originals {
            if result.succeeded.contains(&index) || result.failed.contains_key(&index) {
                continue;
            }
            scene.status = SceneStatus::Failed;
            result.record_failure(
                index,
                SceneFailure {
                    kind: FailureKind::Internal,
                    message: format!("worker for scene {} did not report a result", index),
                },
            );
            ordered.push(scene);
        }
        ordered.sort_by_key(|s| s.index);

        let aborted = abort.is_cancelled();
        if aborted {
            warn!(
                "Run aborted: {} succeeded, {} failed or cancelled",
                result.succeeded.len(),
                result.failed.len()
            );
        } else {
            info!(
                "Generated {}/{} clips",
                result.succeeded.len(),
                total
            );
        }

        SchedulerReport {
            scenes: ordered,
            result,
            aborted,
        }
    }
}
