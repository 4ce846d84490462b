use crate::error::{Result, VideoError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// 外部媒体处理能力：测时长、裁剪、变速、拼接、混音
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// 测量时长；无法解码时返回错误
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// 从开头保留 duration 秒
    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> Result<()>;

    /// speed < 1 为慢放
    async fn change_speed(&self, input: &Path, speed: f64, output: &Path) -> Result<()>;

    /// 按 speed 播放后冻结末帧 hold 秒
    async fn freeze_extend(&self, input: &Path, speed: f64, hold: f64, output: &Path)
        -> Result<()>;

    /// 静态画面片段，image 为空时为黑屏
    async fn still(&self, image: Option<&Path>, duration: f64, output: &Path) -> Result<()>;

    /// 把旁白铺到视频上，输出长度严格为 duration
    async fn mux_audio(&self, video: &Path, audio: &Path, duration: f64, output: &Path)
        -> Result<()>;

    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// 背景音轨循环/截断到 duration，并以 level 音量混入
    async fn overlay_track(
        &self,
        video: &Path,
        track: &Path,
        level: f64,
        duration: f64,
        output: &Path,
    ) -> Result<()>;
}

/// 基于 ffmpeg / ffprobe 子进程的实现
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    width: u32,
    height: u32,
    probe_timeout: Duration,
}

impl Ffmpeg {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            probe_timeout: Duration::from_secs(10),
        }
    }

    /// 缩放并居中裁剪到竖屏尺寸
    fn frame_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps=30",
            w = self.width,
            h = self.height
        )
    }

    /// 末帧冻结补足，画面短于旁白时不会提前结束
    fn mux_video_filter(&self, duration: f64) -> String {
        format!(
            "{},tpad=stop_mode=clone:stop_duration={}",
            self.frame_filter(),
            secs(duration)
        )
    }

    async fn run(&self, args: Vec<String>, what: &str) -> Result<()> {
        debug!("ffmpeg {}", args.join(" "));

        let output = Command::new("ffmpeg")
            .arg("-y")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| VideoError::FfmpegError(format!("Failed to run FFmpeg: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(VideoError::FfmpegError(format!("FFmpeg {} failed: {}", what, error)));
        }
        Ok(())
    }
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn secs(value: f64) -> String {
    format!("{:.3}", value)
}

/// concat demuxer 清单，单引号需要转义
pub(crate) fn concat_manifest(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'", p.to_string_lossy().replace('\'', "'\\''")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = tokio::time::timeout(
            self.probe_timeout,
            Command::new("ffprobe")
                .kill_on_drop(true)
                .args([
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ])
                .arg(path)
                .output(),
        )
        .await
        .map_err(|_| VideoError::FfmpegError(format!("ffprobe timed out on {}", path.display())))?
        .map_err(|e| VideoError::FfmpegError(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(VideoError::FfmpegError(format!(
                "ffprobe could not read {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = text.trim().parse().map_err(|_| {
            VideoError::FfmpegError(format!(
                "Failed to parse duration '{}' for {}",
                text.trim(),
                path.display()
            ))
        })?;
        if duration <= 0.0 {
            return Err(VideoError::FfmpegError(format!(
                "Non-positive duration {} for {}",
                duration,
                path.display()
            )));
        }
        Ok(duration)
    }

    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> Result<()> {
        self.run(
            vec![
                "-i".into(),
                arg(input),
                "-t".into(),
                secs(duration),
                "-an".into(),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "medium".into(),
                "-crf".into(),
                "23".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                arg(output),
            ],
            "trim",
        )
        .await
    }

    async fn change_speed(&self, input: &Path, speed: f64, output: &Path) -> Result<()> {
        self.run(
            vec![
                "-i".into(),
                arg(input),
                "-vf".into(),
                format!("setpts={:.6}*PTS", 1.0 / speed),
                "-an".into(),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "medium".into(),
                "-crf".into(),
                "23".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                arg(output),
            ],
            "speed change",
        )
        .await
    }

    async fn freeze_extend(
        &self,
        input: &Path,
        speed: f64,
        hold: f64,
        output: &Path,
    ) -> Result<()> {
        self.run(
            vec![
                "-i".into(),
                arg(input),
                "-vf".into(),
                format!(
                    "setpts={:.6}*PTS,tpad=stop_mode=clone:stop_duration={}",
                    1.0 / speed,
                    secs(hold)
                ),
                "-an".into(),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "medium".into(),
                "-crf".into(),
                "23".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                arg(output),
            ],
            "freeze extend",
        )
        .await
    }

    async fn still(&self, image: Option<&Path>, duration: f64, output: &Path) -> Result<()> {
        let mut args: Vec<String> = match image {
            Some(image) => vec![
                "-loop".into(),
                "1".into(),
                "-i".into(),
                arg(image),
                "-vf".into(),
                self.frame_filter(),
            ],
            None => vec![
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                format!("color=c=black:s={}x{}:r=30", self.width, self.height),
            ],
        };
        let encode: [String; 8] = [
            "-t".into(),
            secs(duration),
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-an".into(),
            arg(output),
        ];
        args.extend(encode);
        self.run(args, "still render").await
    }

    async fn mux_audio(
        &self,
        video: &Path,
        audio: &Path,
        duration: f64,
        output: &Path,
    ) -> Result<()> {
        // 画面和声音都补齐后用 -t 截断，槽位边界与旁白一致
        self.run(
            vec![
                "-i".into(),
                arg(video),
                "-i".into(),
                arg(audio),
                "-map".into(),
                "0:v:0".into(),
                "-map".into(),
                "1:a:0".into(),
                "-vf".into(),
                self.mux_video_filter(duration),
                "-af".into(),
                "apad".into(),
                "-t".into(),
                secs(duration),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "medium".into(),
                "-crf".into(),
                "23".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                "-c:a".into(),
                "aac".into(),
                "-ar".into(),
                "44100".into(),
                "-ac".into(),
                "2".into(),
                arg(output),
            ],
            "audio mux",
        )
        .await
    }

    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        info!("Concatenating {} segments...", inputs.len());

        let mut absolute = Vec::with_capacity(inputs.len());
        for input in inputs {
            absolute.push(tokio::fs::canonicalize(input).await?);
        }

        let manifest = output.with_extension("concat.txt");
        tokio::fs::write(&manifest, concat_manifest(&absolute)).await?;

        let result = self
            .run(
                vec![
                    "-f".into(),
                    "concat".into(),
                    "-safe".into(),
                    "0".into(),
                    "-i".into(),
                    arg(&manifest),
                    "-c".into(),
                    "copy".into(),
                    arg(output),
                ],
                "concat",
            )
            .await;

        tokio::fs::remove_file(&manifest).await.ok();
        result
    }

    async fn overlay_track(
        &self,
        video: &Path,
        track: &Path,
        level: f64,
        duration: f64,
        output: &Path,
    ) -> Result<()> {
        self.run(
            vec![
                "-i".into(),
                arg(video),
                "-stream_loop".into(),
                "-1".into(),
                "-i".into(),
                arg(track),
                "-filter_complex".into(),
                format!(
                    "[1:a]volume={}[bg];[0:a][bg]amix=inputs=2:duration=first:dropout_transition=2[a]",
                    level
                ),
                "-map".into(),
                "0:v:0".into(),
                "-map".into(),
                "[a]".into(),
                "-t".into(),
                secs(duration),
                "-c:v".into(),
                "copy".into(),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                "192k".into(),
                arg(output),
            ],
            "background overlay",
        )
        .await
    }
}
