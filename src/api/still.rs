use super::{ProviderStatus, VideoProvider};
use crate::error::{Result, VideoError};
use crate::video::MediaTool;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// 试运行用：不调用生成接口，直接把产品图渲染成固定时长的片段
#[derive(Clone)]
pub struct StillImageProvider {
    media: Arc<dyn MediaTool>,
    image: PathBuf,
    work_dir: PathBuf,
    duration: f64,
}

impl StillImageProvider {
    pub fn new(media: Arc<dyn MediaTool>, image: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            media,
            image,
            work_dir,
            duration: 10.0,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }
}

#[async_trait]
impl VideoProvider for StillImageProvider {
    async fn submit(&self, prompt: &str, _reference_image: Option<&str>) -> Result<String> {
        if tokio::fs::metadata(&self.image).await.is_err() {
            return Err(VideoError::FatalProvider(format!(
                "Image not found: {}",
                self.image.display()
            )));
        }
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let output = self
            .work_dir
            .join(format!("still_{}.mp4", uuid::Uuid::new_v4()));
        info!(
            "Dry run: rendering {:.0}s still for prompt: {:.60}",
            self.duration, prompt
        );
        self.media
            .still(Some(self.image.as_path()), self.duration, &output)
            .await
            .map_err(|e| VideoError::FatalProvider(e.to_string()))?;

        Ok(output.to_string_lossy().into_owned())
    }

    async fn poll(&self, job_ref: &str) -> Result<ProviderStatus> {
        if tokio::fs::metadata(job_ref).await.is_ok() {
            Ok(ProviderStatus::Succeeded {
                artifact_url: job_ref.to_string(),
            })
        } else {
            Ok(ProviderStatus::Failed {
                reason: format!("rendered still {} is missing", job_ref),
            })
        }
    }

    async fn download(&self, artifact_url: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(artifact_url).await?)
    }
}
