use crate::api::{NarrationProvider, ScriptWriter, VideoProvider};
use crate::config::PipelineConfig;
use crate::error::{Result, VideoError};
use crate::pipeline::Pipeline;
use crate::scene::RunResult;
use crate::video::MediaTool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// prompts 目录下的一个模板文件
#[derive(Debug, Clone)]
pub struct PromptFile {
    /// 文件名去掉扩展名，也用作输出子目录名
    pub name: String,
    pub path: PathBuf,
}

/// 列出目录下所有 .txt 模板，按文件名排序
pub async fn discover_prompts(dir: &Path) -> Result<Vec<PromptFile>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        VideoError::ConfigError(format!("Prompts directory {}: {}", dir.display(), e))
    })?;

    let mut prompts = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            prompts.push(PromptFile {
                name: stem.to_string_lossy().into_owned(),
                path,
            });
        }
    }

    if prompts.is_empty() {
        return Err(VideoError::ConfigError(format!(
            "No prompt files found in {}",
            dir.display()
        )));
    }
    prompts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(prompts)
}

/// 默认成片路径：<dir>/final_<prompt>_<时间戳>.mp4
pub fn default_output_path(dir: &Path, prompt_name: &str) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("final_{}_{}.mp4", prompt_name, timestamp))
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub prompt: String,
    pub result: std::result::Result<RunResult, String>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(result) if result.is_success())
    }
}

/// 按模板名排序的批量结果
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(BatchOutcome::succeeded)
    }
}

/// 每个模板一条独立流水线，并行运行，输出各自写入 <output_dir>/<模板名>/
pub struct BatchRunner {
    config: PipelineConfig,
    writer: Arc<dyn ScriptWriter>,
    narrator: Arc<dyn NarrationProvider>,
    video: Arc<dyn VideoProvider>,
    media: Arc<dyn MediaTool>,
    topic: String,
    num_scenes: usize,
}

impl BatchRunner {
    pub fn new(
        config: PipelineConfig,
        writer: Arc<dyn ScriptWriter>,
        narrator: Arc<dyn NarrationProvider>,
        video: Arc<dyn VideoProvider>,
        media: Arc<dyn MediaTool>,
        topic: String,
        num_scenes: usize,
    ) -> Self {
        Self {
            config,
            writer,
            narrator,
            video,
            media,
            topic,
            num_scenes,
        }
    }

    pub async fn run_all(&self, prompts: Vec<PromptFile>) -> BatchReport {
        info!("Generating videos for {} prompts in parallel", prompts.len());

        let mut tasks = JoinSet::new();
        for prompt in prompts {
            let job = PromptJob {
                config: self.config.clone(),
                writer: self.writer.clone(),
                narrator: self.narrator.clone(),
                video: self.video.clone(),
                media: self.media.clone(),
                topic: self.topic.clone(),
                num_scenes: self.num_scenes,
            };
            tasks.spawn(async move {
                let name = prompt.name.clone();
                (name, job.run(prompt).await)
            });
        }

        let mut report = BatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((prompt, Ok(result))) => {
                    match &result.output_path {
                        Some(path) => info!("Success for {}: {}", prompt, path.display()),
                        None => error!("Generation for {} produced no video", prompt),
                    }
                    report.outcomes.push(BatchOutcome {
                        prompt,
                        result: Ok(result),
                    });
                }
                Ok((prompt, Err(e))) => {
                    error!("Generation failed for {}: {}", prompt, e);
                    report.outcomes.push(BatchOutcome {
                        prompt,
                        result: Err(e.to_string()),
                    });
                }
                Err(e) => error!("Prompt task terminated abnormally: {}", e),
            }
        }
        report.outcomes.sort_by(|a, b| a.prompt.cmp(&b.prompt));

        info!(
            "Completed {}/{} videos",
            report.succeeded_count(),
            report.outcomes.len()
        );
        report
    }
}

struct PromptJob {
    config: PipelineConfig,
    writer: Arc<dyn ScriptWriter>,
    narrator: Arc<dyn NarrationProvider>,
    video: Arc<dyn VideoProvider>,
    media: Arc<dyn MediaTool>,
    topic: String,
    num_scenes: usize,
}

impl PromptJob {
    async fn run(self, prompt: PromptFile) -> Result<RunResult> {
        let template = tokio::fs::read_to_string(&prompt.path).await?;
        let script = self
            .writer
            .write_script(&self.topic, self.num_scenes, &template)
            .await?;

        let mut config = self.config;
        config.output_dir = config.output_dir.join(&prompt.name);
        let output = default_output_path(&config.output_dir, &prompt.name);

        let pipeline = Pipeline::new(config, self.narrator, self.video, self.media)?;
        pipeline.run(script, &output).await
    }
}
