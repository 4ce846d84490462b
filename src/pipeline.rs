use crate::api::{NarrationProvider, VideoProvider};
use crate::config::{FailedScenePolicy, PipelineConfig};
use crate::error::{FailureKind, Result, VideoError};
use crate::narration::NarrationStore;
use crate::scene::{RunResult, Scene, SceneFailure, SceneStatus, Script, Timeline, TimelineSlot};
use crate::scheduler::Scheduler;
use crate::video::{ClipFetcher, Compositor, MediaTool, SyncEngine};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 旁白 → 并发生成片段 → 屏障 → 时长对齐 → 合成
pub struct Pipeline {
    config: PipelineConfig,
    narrator: Arc<dyn NarrationProvider>,
    video: Arc<dyn VideoProvider>,
    media: Arc<dyn MediaTool>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        narrator: Arc<dyn NarrationProvider>,
        video: Arc<dyn VideoProvider>,
        media: Arc<dyn MediaTool>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            narrator,
            video,
            media,
        })
    }

    pub async fn run(&self, script: Script, output_path: &Path) -> Result<RunResult> {
        let output_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(output_dir).await?;

        let script_path = output_dir.join("script.json");
        tokio::fs::write(&script_path, serde_json::to_string_pretty(&script)?).await?;

        let mut scenes = script.into_scenes();
        if scenes.is_empty() {
            return Err(VideoError::ConfigError("script has no scenes".to_string()));
        }
        let scene_count = scenes.len();

        info!("Step 1/4: Generating narration for {} scenes...", scene_count);
        let narration = NarrationStore::synthesize_all(
            self.narrator.as_ref(),
            self.media.as_ref(),
            &scenes,
            &self.config.voice,
            &self.config.narration_dir(),
        )
        .await?;
        for scene in scenes.iter_mut() {
            if let Some(asset) = narration.get(scene.index) {
                scene.narration_duration = asset.duration;
            }
        }
        info!("Narration duration: {:.2} seconds", narration.total_duration());

        info!("Step 2/4: Generating B-roll clips...");
        let fetcher = ClipFetcher::new(
            self.video.clone(),
            self.media.clone(),
            self.config.clips_dir(),
            self.config.scheduler.fetch_attempts,
        );
        let scheduler = Scheduler::new(self.video.clone(), fetcher, self.config.scheduler.clone())
            .with_reference_image(self.config.reference_image_url.clone());
        let report = scheduler
            .submit_all(scenes, self.config.scheduler.max_concurrency)
            .await;

        // 屏障：所有场景都已到达终态
        let mut result = report.result;
        result.total_duration = narration.total_duration();
        log_failures(&result);

        if report.aborted {
            warn!("Run aborted after a scene failure, skipping composition");
            self.write_report(&result).await;
            return Ok(result);
        }
        if result.succeeded.is_empty() {
            return Err(self.no_output(&result).await);
        }
        if !result.failed.is_empty()
            && self.config.compose.failed_scene_policy == FailedScenePolicy::Halt
        {
            warn!("Halting: {} scene(s) failed", result.failed.len());
            self.write_report(&result).await;
            return Ok(result);
        }

        info!("Step 3/4: Synchronizing clips to narration...");
        let timeline = match self.build_timeline(&report.scenes, &narration, &mut result).await? {
            Some(timeline) => timeline,
            None => {
                self.write_report(&result).await;
                return Ok(result);
            }
        };
        if result.succeeded.is_empty() {
            return Err(self.no_output(&result).await);
        }

        info!("Step 4/4: Composing final video...");
        let compositor = Compositor::new(self.media.clone(), self.config.compose.clone());
        let composed = compositor
            .compose(
                &timeline,
                &narration,
                self.config.background_track.as_deref(),
                output_path,
            )
            .await;

        match composed {
            Ok(path) => {
                result.output_path = Some(path);
                result.total_duration = timeline.total_duration();
                self.write_report(&result).await;
                Ok(result)
            }
            Err(e) => {
                self.write_report(&result).await;
                Err(e)
            }
        }
    }

    /// 严格按 index 顺序构建时间线；None 表示按策略停止
    async fn build_timeline(
        &self,
        scenes: &[Scene],
        narration: &NarrationStore,
        result: &mut RunResult,
    ) -> Result<Option<Timeline>> {
        let sync = SyncEngine::new(
            self.media.clone(),
            self.config.sync.clone(),
            self.config.synced_dir(),
        );
        let mut timeline = Timeline::new();

        for scene in scenes {
            let asset = narration.get(scene.index).ok_or_else(|| {
                VideoError::Composition(format!("no narration for scene {}", scene.index))
            })?;

            let synced = match (&scene.status, &scene.clip_path) {
                (SceneStatus::Ready, Some(clip)) => {
                    match sync.synchronize(clip, asset.duration).await {
                        Ok(path) => Some(path),
                        Err(e) => {
                            warn!(scene = scene.index, "Failed to synchronize clip: {}", e);
                            result.record_failure(
                                scene.index,
                                SceneFailure {
                                    kind: FailureKind::Sync,
                                    message: e.to_string(),
                                },
                            );
                            None
                        }
                    }
                }
                _ => None,
            };

            let slot = match synced {
                Some(clip) => TimelineSlot {
                    index: scene.index,
                    clip,
                    duration: asset.duration,
                    placeholder: false,
                },
                None => {
                    if self.config.compose.failed_scene_policy == FailedScenePolicy::Halt {
                        return Ok(None);
                    }
                    let clip = self
                        .config
                        .synced_dir()
                        .join(format!("placeholder_{:02}.mp4", scene.index));
                    tokio::fs::create_dir_all(self.config.synced_dir()).await?;
                    self.media
                        .still(
                            self.config.placeholder_image.as_deref(),
                            asset.duration,
                            &clip,
                        )
                        .await
                        .map_err(|e| {
                            VideoError::Composition(format!(
                                "placeholder for scene {}: {}",
                                scene.index, e
                            ))
                        })?;
                    info!(scene = scene.index, "Using placeholder for failed scene");
                    TimelineSlot {
                        index: scene.index,
                        clip,
                        duration: asset.duration,
                        placeholder: true,
                    }
                }
            };
            timeline.push(slot)?;
        }

        Ok(Some(timeline))
    }

    async fn no_output(&self, result: &RunResult) -> VideoError {
        self.write_report(result).await;
        let failed: Vec<String> = result.failed.keys().map(|i| i.to_string()).collect();
        VideoError::Composition(format!(
            "no scenes succeeded (failed: {})",
            failed.join(", ")
        ))
    }

    async fn write_report(&self, result: &RunResult) {
        let path = self.config.output_dir.join("run_result.json");
        let written = match serde_json::to_string_pretty(result) {
            Ok(json) => tokio::fs::write(&path, json).await.map_err(VideoError::from),
            Err(e) => Err(VideoError::from(e)),
        };
        if let Err(e) = written {
            error!("Failed to write run report {}: {}", path.display(), e);
        }
    }
}

fn log_failures(result: &RunResult) {
    for (index, failure) in &result.failed {
        warn!(
            scene = *index,
            "Scene failed ({:?}): {}", failure.kind, failure.message
        );
    }
}
