#![allow(dead_code)]

use async_trait::async_trait;
use broll_video::api::{
    Narration, NarrationProvider, ProviderStatus, ScriptWriter, VideoProvider,
};
use broll_video::config::{PipelineConfig, SchedulerConfig};
use broll_video::error::{Result, VideoError};
use broll_video::scene::{Scene, Script, ScriptScene};
use broll_video::video::MediaTool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// 假媒体文件：内容即时长
pub fn media_bytes(duration: f64) -> Vec<u8> {
    format!("fake-media:{}", duration).into_bytes()
}

pub async fn write_media(path: &Path, duration: f64) {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(path, media_bytes(duration)).await.unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaOp {
    Trim { input: PathBuf, duration: f64 },
    Speed { input: PathBuf, speed: f64 },
    Freeze { input: PathBuf, speed: f64, hold: f64 },
    Still { output: PathBuf, duration: f64 },
    Mux { video: PathBuf, audio: PathBuf, duration: f64 },
    Concat { inputs: Vec<PathBuf>, output: PathBuf },
    Overlay { track: PathBuf, level: f64, duration: f64 },
}

/// 不依赖 ffmpeg 的 MediaTool，时长写在文件内容里
#[derive(Default)]
pub struct FakeMedia {
    ops: Mutex<Vec<MediaOp>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<MediaOp> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: MediaOp) {
        self.ops.lock().unwrap().push(op);
    }

    pub async fn duration_of(path: &Path) -> Result<f64> {
        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&bytes);
        text.strip_prefix("fake-media:")
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| *d > 0.0)
            .ok_or_else(|| VideoError::FfmpegError(format!("cannot decode {}", path.display())))
    }
}

#[async_trait]
impl MediaTool for FakeMedia {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        Self::duration_of(path).await
    }

    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> Result<()> {
        let actual = Self::duration_of(input).await?;
        self.record(MediaOp::Trim {
            input: input.to_path_buf(),
            duration,
        });
        write_media(output, actual.min(duration)).await;
        Ok(())
    }

    async fn change_speed(&self, input: &Path, speed: f64, output: &Path) -> Result<()> {
        let actual = Self::duration_of(input).await?;
        self.record(MediaOp::Speed {
            input: input.to_path_buf(),
            speed,
        });
        write_media(output, actual / speed).await;
        Ok(())
    }

    async fn freeze_extend(
        &self,
        input: &Path,
        speed: f64,
        hold: f64,
        output: &Path,
    ) -> Result<()> {
        let actual = Self::duration_of(input).await?;
        self.record(MediaOp::Freeze {
            input: input.to_path_buf(),
            speed,
            hold,
        });
        write_media(output, actual / speed + hold).await;
        Ok(())
    }

    async fn still(&self, _image: Option<&Path>, duration: f64, output: &Path) -> Result<()> {
        self.record(MediaOp::Still {
            output: output.to_path_buf(),
            duration,
        });
        write_media(output, duration).await;
        Ok(())
    }

    async fn mux_audio(
        &self,
        video: &Path,
        audio: &Path,
        duration: f64,
        output: &Path,
    ) -> Result<()> {
        Self::duration_of(video).await?;
        Self::duration_of(audio).await?;
        self.record(MediaOp::Mux {
            video: video.to_path_buf(),
            audio: audio.to_path_buf(),
            duration,
        });
        write_media(output, duration).await;
        Ok(())
    }

    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut total = 0.0;
        for input in inputs {
            total += Self::duration_of(input).await?;
        }
        self.record(MediaOp::Concat {
            inputs: inputs.to_vec(),
            output: output.to_path_buf(),
        });
        write_media(output, total).await;
        Ok(())
    }

    async fn overlay_track(
        &self,
        video: &Path,
        track: &Path,
        level: f64,
        duration: f64,
        output: &Path,
    ) -> Result<()> {
        Self::duration_of(video).await?;
        self.record(MediaOp::Overlay {
            track: track.to_path_buf(),
            level,
            duration,
        });
        write_media(output, duration).await;
        Ok(())
    }
}

/// 旁白时长按文本查表，默认 4 秒
#[derive(Default)]
pub struct FakeNarrator {
    durations: HashMap<String, f64>,
    calls: AtomicUsize,
}

impl FakeNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, text: &str, duration: f64) -> Self {
        self.durations.insert(text.to_string(), duration);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NarrationProvider for FakeNarrator {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Narration> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let duration = self.durations.get(text).copied().unwrap_or(4.0);
        Ok(Narration {
            audio: media_bytes(duration),
            duration,
        })
    }
}

/// 单个场景在假服务端上的剧本
#[derive(Debug, Clone)]
pub struct ScenePlan {
    /// 前 N 次提交返回可重试错误
    pub transient_submits: usize,
    pub fatal_submit: bool,
    /// 第几次轮询到达终态，None 为永不结束
    pub polls_until_done: Option<u32>,
    /// 终态是失败
    pub fails: bool,
    pub clip_secs: f64,
    /// 前 N 次下载返回损坏数据
    pub corrupt_downloads: usize,
    /// 前 N 次下载返回空内容
    pub empty_downloads: usize,
}

impl Default for ScenePlan {
    fn default() -> Self {
        Self {
            transient_submits: 0,
            fatal_submit: false,
            polls_until_done: Some(2),
            fails: false,
            clip_secs: 10.0,
            corrupt_downloads: 0,
            empty_downloads: 0,
        }
    }
}

impl ScenePlan {
    pub fn succeed_after(polls: u32) -> Self {
        Self {
            polls_until_done: Some(polls),
            ..Self::default()
        }
    }

    pub fn fail_after(polls: u32) -> Self {
        Self {
            polls_until_done: Some(polls),
            fails: true,
            ..Self::default()
        }
    }

    pub fn never() -> Self {
        Self {
            polls_until_done: None,
            ..Self::default()
        }
    }

    pub fn clip(mut self, secs: f64) -> Self {
        self.clip_secs = secs;
        self
    }
}

#[derive(Debug)]
struct JobState {
    prompt: String,
    polls: u32,
    done: bool,
}

#[derive(Default)]
struct ProviderState {
    plans: HashMap<String, ScenePlan>,
    submit_calls: HashMap<String, usize>,
    download_calls: HashMap<String, usize>,
    jobs: HashMap<String, JobState>,
    submissions: Vec<(String, Instant)>,
    completions: Vec<String>,
}

/// 可编排的视频服务端，记录提交与并发情况
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    next_job: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(self, prompt: &str, plan: ScenePlan) -> Self {
        self.state
            .lock()
            .unwrap()
            .plans
            .insert(prompt.to_string(), plan);
        self
    }

    fn plan_for(&self, prompt: &str) -> ScenePlan {
        self.state
            .lock()
            .unwrap()
            .plans
            .get(prompt)
            .cloned()
            .unwrap_or_default()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// 成功受理的提交（prompt, 时间）
    pub fn submissions(&self) -> Vec<(String, Instant)> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn submitted_prompts(&self) -> Vec<String> {
        self.submissions().into_iter().map(|(p, _)| p).collect()
    }

    pub fn download_calls(&self, prompt: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .download_calls
            .get(prompt)
            .copied()
            .unwrap_or(0)
    }

    pub fn submit_calls(&self, prompt: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .submit_calls
            .get(prompt)
            .copied()
            .unwrap_or(0)
    }

    /// 到达终态的顺序
    pub fn completions(&self) -> Vec<String> {
        self.state.lock().unwrap().completions.clone()
    }
}

#[async_trait]
impl VideoProvider for FakeProvider {
    async fn submit(&self, prompt: &str, _reference_image: Option<&str>) -> Result<String> {
        let plan = self.plan_for(prompt);
        let mut state = self.state.lock().unwrap();
        let calls = state.submit_calls.entry(prompt.to_string()).or_insert(0);
        *calls += 1;

        if plan.fatal_submit {
            return Err(VideoError::FatalProvider("prompt rejected".to_string()));
        }
        if *calls <= plan.transient_submits {
            return Err(VideoError::TransientProvider("rate limited".to_string()));
        }

        let job_ref = format!("job-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        state.jobs.insert(
            job_ref.clone(),
            JobState {
                prompt: prompt.to_string(),
                polls: 0,
                done: false,
            },
        );
        state.submissions.push((prompt.to_string(), Instant::now()));
        drop(state);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        Ok(job_ref)
    }

    async fn poll(&self, job_ref: &str) -> Result<ProviderStatus> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let prompt = match state.jobs.get(job_ref) {
            Some(job) => job.prompt.clone(),
            None => return Err(VideoError::FatalProvider(format!("unknown job {}", job_ref))),
        };
        let plan = state.plans.get(&prompt).cloned().unwrap_or_default();

        let job = state.jobs.get_mut(job_ref).expect("job exists");
        job.polls += 1;
        let reached = plan.polls_until_done.is_some_and(|n| job.polls >= n);
        if !reached {
            return Ok(ProviderStatus::Running);
        }
        if !job.done {
            job.done = true;
            state.completions.push(prompt.clone());
            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        if plan.fails {
            Ok(ProviderStatus::Failed {
                reason: "generation failed".to_string(),
            })
        } else {
            Ok(ProviderStatus::Succeeded {
                artifact_url: format!("mem://{}", prompt),
            })
        }
    }

    async fn download(&self, artifact_url: &str) -> Result<Vec<u8>> {
        let prompt = artifact_url.trim_start_matches("mem://").to_string();
        let plan = self.plan_for(&prompt);
        let mut state = self.state.lock().unwrap();
        let calls = state.download_calls.entry(prompt).or_insert(0);
        *calls += 1;

        if *calls <= plan.empty_downloads {
            return Ok(Vec::new());
        }
        if *calls <= plan.empty_downloads + plan.corrupt_downloads {
            return Ok(b"\x00\x01garbage".to_vec());
        }
        Ok(media_bytes(plan.clip_secs))
    }
}

/// 按模板首行生成脚本；模板含 "broken" 时报错
#[derive(Default)]
pub struct FakeWriter {
    calls: AtomicUsize,
}

impl FakeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptWriter for FakeWriter {
    async fn write_script(&self, topic: &str, num_scenes: usize, template: &str) -> Result<Script> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let style = template.lines().next().unwrap_or_default().trim().to_string();
        if style.contains("broken") {
            return Err(VideoError::ApiError(format!("model refused template {}", style)));
        }
        Ok(Script {
            scenes: (0..num_scenes)
                .map(|i| ScriptScene {
                    narration: format!("{} {} line {}", style, topic, i),
                    video_prompt: prompt(i),
                    image_prompt: None,
                    include_product: false,
                })
                .collect(),
            music_prompt: None,
        })
    }
}

pub fn prompt(index: usize) -> String {
    format!("scene-{}", index)
}

pub fn narration_text(index: usize) -> String {
    format!("narration line {}", index)
}

pub fn script(n: usize) -> Script {
    Script {
        scenes: (0..n)
            .map(|i| ScriptScene {
                narration: narration_text(i),
                video_prompt: prompt(i),
                image_prompt: None,
                include_product: false,
            })
            .collect(),
        music_prompt: None,
    }
}

pub fn scenes(n: usize) -> Vec<Scene> {
    script(n).into_scenes()
}

/// 测试用的短轮询配置
pub fn fast_scheduler() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.poll_interval_ms = 1000;
    config.poll_timeout_secs = 60;
    config.submit_retry.initial_backoff_ms = 10;
    config.submit_retry.max_backoff_ms = 100;
    config
}

pub fn pipeline_config(output_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        output_dir: output_dir.to_path_buf(),
        scheduler: fast_scheduler(),
        ..PipelineConfig::default()
    }
}
