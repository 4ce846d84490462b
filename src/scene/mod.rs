use crate::error::{FailureKind, VideoError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// 脚本中的一个分镜
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptScene {
    /// 旁白文本
    pub narration: String,
    /// 视频生成提示词
    pub video_prompt: String,
    #[serde(default)]
    pub image_prompt: Option<String>,
    /// 是否使用产品参考图做图生视频
    #[serde(default)]
    pub include_product: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub scenes: Vec<ScriptScene>,
    #[serde(default, rename = "musicGenerationPrompt")]
    pub music_prompt: Option<String>,
}

impl Script {
    /// 按脚本顺序生成场景，index 即身份
    pub fn into_scenes(self) -> Vec<Scene> {
        self.scenes
            .into_iter()
            .enumerate()
            .map(|(i, s)| Scene::new(i, s.narration, s.video_prompt, s.include_product))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneStatus {
    Pending,
    Submitted,
    Polling,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// 服务端的一个异步生成任务，只属于一个场景
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub provider_ref: String,
    pub submitted_at: DateTime<Utc>,
    pub status: JobStatus,
    /// 提交尝试次数
    pub attempt_count: u32,
    pub last_poll_at: Option<DateTime<Utc>>,
    /// 成功后服务端给出的产物地址
    pub artifact_url: Option<String>,
}

impl Job {
    pub fn new(provider_ref: String, attempt_count: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider_ref,
            submitted_at: Utc::now(),
            status: JobStatus::Pending,
            attempt_count,
            last_poll_at: None,
            artifact_url: None,
        }
    }
}

/// 成片中的一个旁白单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub index: usize,
    pub narration_text: String,
    pub visual_prompt: String,
    pub include_product: bool,
    /// 旁白实测时长（秒）
    pub narration_duration: f64,
    pub status: SceneStatus,
    pub clip_path: Option<PathBuf>,
    pub job: Option<Job>,
}

impl Scene {
    pub fn new(
        index: usize,
        narration_text: String,
        visual_prompt: String,
        include_product: bool,
    ) -> Self {
        Self {
            index,
            narration_text,
            visual_prompt,
            include_product,
            narration_duration: 0.0,
            status: SceneStatus::Pending,
            clip_path: None,
            job: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&VideoError> for SceneFailure {
    fn from(err: &VideoError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimelineSlot {
    pub index: usize,
    pub clip: PathBuf,
    /// 该槽位的时长，等于旁白时长
    pub duration: f64,
    pub placeholder: bool,
}

/// 已对齐时长的片段序列，slots[i] 对应 Scene[i]
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    slots: Vec<TimelineSlot>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只接受按 index 连续追加，保证无空洞
    pub fn push(&mut self, slot: TimelineSlot) -> crate::error::Result<()> {
        if slot.index != self.slots.len() {
            return Err(VideoError::Composition(format!(
                "timeline slot {} appended at position {}",
                slot.index,
                self.slots.len()
            )));
        }
        self.slots.push(slot);
        Ok(())
    }

    pub fn slots(&self) -> &[TimelineSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.slots.iter().map(|s| s.duration).sum()
    }
}

/// 一次运行的汇总结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub succeeded: BTreeSet<usize>,
    pub failed: BTreeMap<usize, SceneFailure>,
    pub output_path: Option<PathBuf>,
    pub total_duration: f64,
}

impl RunResult {
    pub fn record_success(&mut self, index: usize) {
        self.failed.remove(&index);
        self.succeeded.insert(index);
    }

    pub fn record_failure(&mut self, index: usize, failure: SceneFailure) {
        self.succeeded.remove(&index);
        self.failed.insert(index, failure);
    }

    pub fn failed_indices(&self) -> BTreeSet<usize> {
        self.failed.keys().copied().collect()
    }

    pub fn scene_count(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// succeeded 与 failed 互斥且覆盖 0..n
    pub fn covers(&self, n: usize) -> bool {
        self.scene_count() == n
            && (0..n).all(|i| self.succeeded.contains(&i) != self.failed.contains_key(&i))
    }

    pub fn is_success(&self) -> bool {
        self.output_path.is_some()
    }
}
