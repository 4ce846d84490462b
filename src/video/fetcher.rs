use super::MediaTool;
use crate::api::VideoProvider;
use crate::error::{Result, VideoError};
use crate::scene::{Job, JobStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 下载成功任务的产物并校验
#[derive(Clone)]
pub struct ClipFetcher {
    provider: Arc<dyn VideoProvider>,
    media: Arc<dyn MediaTool>,
    clips_dir: PathBuf,
    max_attempts: usize,
}

impl ClipFetcher {
    pub fn new(
        provider: Arc<dyn VideoProvider>,
        media: Arc<dyn MediaTool>,
        clips_dir: PathBuf,
        max_attempts: usize,
    ) -> Self {
        Self {
            provider,
            media,
            clips_dir,
            max_attempts: max_attempts.max(1),
        }
    }

    /// 每个场景独占一个目标文件
    pub fn destination(&self, index: usize) -> PathBuf {
        self.clips_dir.join(format!("scene_{:02}.mp4", index))
    }

    fn partial_path(&self, index: usize) -> PathBuf {
        self.clips_dir.join(format!("scene_{:02}.part.mp4", index))
    }

    pub async fn fetch(
        &self,
        job: &Job,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let url = match (&job.status, &job.artifact_url) {
            (JobStatus::Succeeded, Some(url)) => url.clone(),
            _ => {
                return Err(VideoError::FetchIntegrity(format!(
                    "job {} has no downloadable artifact (status {:?})",
                    job.provider_ref, job.status
                )))
            }
        };

        tokio::fs::create_dir_all(&self.clips_dir).await?;
        let partial = self.partial_path(index);
        let destination = self.destination(index);

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                remove_quietly(&partial).await;
                return Err(VideoError::Cancelled(format!(
                    "download for scene {} cancelled",
                    index
                )));
            }

            match self.download_once(&url, &partial).await {
                Ok(duration) => {
                    tokio::fs::rename(&partial, &destination).await?;
                    info!(
                        scene = index,
                        "Saved clip {} ({:.2}s)",
                        destination.display(),
                        duration
                    );
                    return Ok(destination);
                }
                Err(e) => {
                    remove_quietly(&partial).await;
                    warn!(
                        scene = index,
                        "Download attempt {}/{} failed: {}", attempt, self.max_attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(VideoError::FetchIntegrity(format!(
            "scene {} artifact unusable after {} attempts: {}",
            index,
            self.max_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// 下载到临时文件，返回实测时长
    async fn download_once(&self, url: &str, partial: &Path) -> Result<f64> {
        let bytes = self.provider.download(url).await?;
        if bytes.is_empty() {
            return Err(VideoError::FetchIntegrity("zero-byte download".to_string()));
        }
        tokio::fs::write(partial, &bytes).await?;

        self.media
            .probe_duration(partial)
            .await
            .map_err(|e| VideoError::FetchIntegrity(format!("not a decodable media file: {}", e)))
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial download {}: {}", path.display(), e);
        }
    }
}
