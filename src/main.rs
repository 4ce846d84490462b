use anyhow::{bail, Context};
use broll_video::api::{
    is_known_voice, random_voice, ElevenLabsClient, KieClient, NarrationProvider, OpenAiClient,
    ScriptWriter, StillImageProvider, VideoProvider, ELEVEN_LABS_DEFAULT_VOICE, OPENAI_VOICES,
};
use broll_video::batch::{default_output_path, discover_prompts, BatchReport, BatchRunner};
use broll_video::config::{CancelMode, FailedScenePolicy, FailurePolicy, PipelineConfig};
use broll_video::video::{Ffmpeg, MediaTool};
use broll_video::{Pipeline, RunResult, Script};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_TEMPLATE: &str = "Write a {num_scenes}-scene vertical B-roll video script about {topic}. \
Each scene has a short spoken narration (about 30 words) and a visual prompt describing camera \
motion and action for a video generation model.";

#[derive(Parser, Debug)]
#[command(name = "broll-video")]
#[command(about = "Generate a narrated vertical B-roll video from a topic", long_about = None)]
struct Args {
    /// Topic/description for the video
    topic: Option<String>,

    /// Generate one video per template in --prompts-dir, in parallel
    #[arg(long)]
    all_prompts: bool,

    /// Directory scanned by --all-prompts
    #[arg(long, default_value = "prompts")]
    prompts_dir: PathBuf,

    /// Use an existing script JSON instead of generating one
    #[arg(long)]
    script: Option<PathBuf>,

    /// Number of scenes to generate
    #[arg(long, default_value_t = 5)]
    scenes: usize,

    /// TTS voice (OpenAI voice name, or ElevenLabs voice_id with --eleven-labs)
    #[arg(long)]
    voice: Option<String>,

    /// Use ElevenLabs for narration instead of OpenAI
    #[arg(long)]
    eleven_labs: bool,

    /// Pipeline configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Final video path (defaults to <output-dir>/final_<prompt>_<timestamp>.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Prompt template file with {topic} and {num_scenes} placeholders
    #[arg(long, default_value = "prompts/default_prompt.txt")]
    prompt_file: PathBuf,

    /// Maximum number of scenes generated in parallel
    #[arg(long)]
    max_workers: Option<usize>,

    /// Seconds between job status checks
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Seconds before a job is considered timed out
    #[arg(long)]
    poll_timeout: Option<u64>,

    /// Submission attempts per scene
    #[arg(long)]
    submit_attempts: Option<usize>,

    /// Download attempts per clip
    #[arg(long)]
    fetch_attempts: Option<usize>,

    /// Stop submitting new scenes after the first failure
    #[arg(long)]
    abort_on_failure: bool,

    /// With --abort-on-failure, also cancel jobs that are already polling
    #[arg(long)]
    cancel_in_flight: bool,

    /// Do not compose if any scene failed (default: use a placeholder)
    #[arg(long)]
    halt_on_failed_scene: bool,

    /// Hosted product image URL for image-to-video scenes
    #[arg(long)]
    reference_image_url: Option<String>,

    /// Local product image (dry run source and failed-scene placeholder)
    #[arg(long)]
    product_image: Option<PathBuf>,

    /// Render clips from the product image instead of calling the video API
    #[arg(long)]
    dry_run: bool,

    /// Background audio track mixed under the narration
    #[arg(long)]
    background_track: Option<PathBuf>,

    /// Background track level (0.0-1.0)
    #[arg(long)]
    music_volume: Option<f64>,
}

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| {
        format!(
            "{} not found. Please set it as an environment variable or in a .env file",
            name
        )
    })
}

/// 未指定时 ElevenLabs 用默认 voice_id，OpenAI 随机挑选
fn resolve_voice(requested: Option<&str>, eleven_labs: bool) -> String {
    match requested {
        Some(voice) => {
            if !eleven_labs && !is_known_voice(voice) {
                warn!(
                    "'{}' is not a known OpenAI voice ({}), using it anyway",
                    voice,
                    OPENAI_VOICES.join(", ")
                );
            }
            voice.to_string()
        }
        None if eleven_labs => ELEVEN_LABS_DEFAULT_VOICE.to_string(),
        None => {
            let voice = random_voice();
            info!("Using random OpenAI voice: {}", voice);
            voice.to_string()
        }
    }
}

async fn build_config(args: &Args) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .await
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    // 配置文件里的音色视为显式指定
    let configured = args
        .voice
        .clone()
        .or_else(|| args.config.as_ref().map(|_| config.voice.clone()));
    config.voice = resolve_voice(configured.as_deref(), args.eleven_labs);
    if let Some(n) = args.max_workers {
        config.scheduler.max_concurrency = n;
    }
    if let Some(secs) = args.poll_interval {
        config.scheduler.poll_interval_ms = secs.saturating_mul(1000);
    }
    if let Some(secs) = args.poll_timeout {
        config.scheduler.poll_timeout_secs = secs;
    }
    if let Some(n) = args.submit_attempts {
        config.scheduler.submit_retry.max_attempts = n;
    }
    if let Some(n) = args.fetch_attempts {
        config.scheduler.fetch_attempts = n;
    }
    if args.abort_on_failure {
        config.scheduler.failure_policy = FailurePolicy::AbortOnFirstFailure;
    }
    if args.cancel_in_flight {
        config.scheduler.cancel_mode = CancelMode::Cancel;
    }
    if args.halt_on_failed_scene {
        config.compose.failed_scene_policy = FailedScenePolicy::Halt;
    }
    if let Some(url) = &args.reference_image_url {
        config.reference_image_url = Some(url.clone());
    }
    if let Some(image) = &args.product_image {
        config.placeholder_image = Some(image.clone());
    }
    if let Some(track) = &args.background_track {
        config.background_track = Some(track.clone());
    }
    if let Some(level) = args.music_volume {
        config.compose.background_level = level;
    }

    config.validate()?;
    Ok(config)
}

async fn load_script(args: &Args, media: &Arc<dyn MediaTool>) -> anyhow::Result<Script> {
    if let Some(path) = &args.script {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read script: {}", path.display()))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("Invalid script JSON: {}", path.display()));
    }

    let Some(topic) = &args.topic else {
        bail!("Either a topic or --script must be provided");
    };

    let template = match tokio::fs::read_to_string(&args.prompt_file).await {
        Ok(text) => text,
        Err(_) => {
            warn!(
                "Prompt template {} not found, using built-in template",
                args.prompt_file.display()
            );
            DEFAULT_TEMPLATE.to_string()
        }
    };

    let writer = OpenAiClient::new(require_env("OPENAI_API_KEY")?, media.clone())?;
    Ok(writer.write_script(topic, args.scenes, &template).await?)
}

fn print_batch_summary(report: &BatchReport) {
    info!("Batch results:");
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(result) => match &result.output_path {
                Some(path) if result.is_success() => {
                    info!("  OK   {}: {}", outcome.prompt, path.display())
                }
                _ => info!(
                    "  FAIL {}: scenes failed {:?}, no video",
                    outcome.prompt,
                    result.failed_indices()
                ),
            },
            Err(e) => info!("  FAIL {}: {}", outcome.prompt, e),
        }
    }
    info!(
        "Completed {}/{} videos",
        report.succeeded_count(),
        report.outcomes.len()
    );
}

async fn run_all_prompts(
    args: &Args,
    config: PipelineConfig,
    narrator: Arc<dyn NarrationProvider>,
    video: Arc<dyn VideoProvider>,
    media: Arc<dyn MediaTool>,
) -> anyhow::Result<()> {
    if args.script.is_some() {
        bail!("--all-prompts generates its own scripts and cannot be combined with --script");
    }
    let prompts = discover_prompts(&args.prompts_dir).await?;
    let topic = args
        .topic
        .clone()
        .unwrap_or_else(|| "premium product".to_string());
    let writer: Arc<dyn ScriptWriter> =
        Arc::new(OpenAiClient::new(require_env("OPENAI_API_KEY")?, media.clone())?);

    let runner = BatchRunner::new(config, writer, narrator, video, media, topic, args.scenes);
    let report = runner.run_all(prompts).await;
    print_batch_summary(&report);

    if !report.all_succeeded() {
        error!("Some videos failed to generate");
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(result: &RunResult) {
    info!(
        "Scenes succeeded: {:?}, failed: {:?}",
        result.succeeded,
        result.failed_indices()
    );
    for (index, failure) in &result.failed {
        info!("  scene {}: {:?} - {}", index, failure.kind, failure.message);
    }
    if let Some(path) = &result.output_path {
        info!(
            "Final video: {} ({:.2}s)",
            path.display(),
            result.total_duration
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    // 加载环境变量
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = build_config(&args).await?;

    let media: Arc<dyn MediaTool> =
        Arc::new(Ffmpeg::new(config.compose.width, config.compose.height));

    let narrator: Arc<dyn NarrationProvider> = if args.eleven_labs {
        Arc::new(ElevenLabsClient::new(
            require_env("ELEVEN_LABS_API_KEY")?,
            media.clone(),
        )?)
    } else {
        Arc::new(OpenAiClient::new(require_env("OPENAI_API_KEY")?, media.clone())?)
    };

    let video: Arc<dyn VideoProvider> = if args.dry_run {
        let Some(image) = args.product_image.clone() else {
            bail!("--dry-run requires --product-image");
        };
        info!("DRY RUN: clips are rendered from {}", image.display());
        Arc::new(StillImageProvider::new(
            media.clone(),
            image,
            config.output_dir.join("stills"),
        ))
    } else {
        Arc::new(KieClient::new(require_env("KIE_AI_API_KEY")?)?)
    };

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .context("Failed to create output directory")?;

    if args.all_prompts {
        return run_all_prompts(&args, config, narrator, video, media).await;
    }

    let script = load_script(&args, &media).await?;
    let output = args.output.clone().unwrap_or_else(|| {
        let prompt_name = args
            .prompt_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        default_output_path(&config.output_dir, &prompt_name)
    });

    info!("Starting B-roll video generation ({} scenes)...", script.scenes.len());
    let pipeline = Pipeline::new(config, narrator, video, media)?;

    match pipeline.run(script, &output).await {
        Ok(result) => {
            print_summary(&result);
            if !result.is_success() {
                error!("Video generation finished without an output file");
                std::process::exit(1);
            }
            info!("Video generation completed successfully!");
            Ok(())
        }
        Err(e) => {
            error!("Video generation failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_voice_is_kept_even_if_unknown() {
        assert_eq!(resolve_voice(Some("onyx"), false), "onyx");
        assert_eq!(resolve_voice(Some("my-custom-voice"), false), "my-custom-voice");
        assert_eq!(resolve_voice(Some("abc123"), true), "abc123");
    }

    #[test]
    fn missing_voice_defaults_per_provider() {
        assert_eq!(resolve_voice(None, true), ELEVEN_LABS_DEFAULT_VOICE);
        assert!(is_known_voice(&resolve_voice(None, false)));
    }

    #[tokio::test]
    async fn huge_poll_interval_saturates() {
        let args = Args::try_parse_from([
            "broll-video",
            "topic",
            "--poll-interval",
            "18446744073709551615",
        ])
        .unwrap();

        let config = build_config(&args).await.unwrap();

        assert_eq!(config.scheduler.poll_interval_ms, u64::MAX);
    }

    #[test]
    fn all_prompts_flags_parse() {
        let args =
            Args::try_parse_from(["broll-video", "--all-prompts", "--prompts-dir", "templates"])
                .unwrap();
        assert!(args.all_prompts);
        assert_eq!(args.prompts_dir, PathBuf::from("templates"));
        assert!(args.topic.is_none());
    }
}
