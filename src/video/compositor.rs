use super::MediaTool;
use crate::config::ComposeConfig;
use crate::error::{Result, VideoError};
use crate::narration::NarrationStore;
use crate::scene::Timeline;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// 按场景顺序拼接片段并混入旁白与背景音
#[derive(Clone)]
pub struct Compositor {
    media: Arc<dyn MediaTool>,
    config: ComposeConfig,
}

impl Compositor {
    pub fn new(media: Arc<dyn MediaTool>, config: ComposeConfig) -> Self {
        Self { media, config }
    }

    /// 单次确定性合成，任何失败都视为整次运行失败
    pub async fn compose(
        &self,
        timeline: &Timeline,
        narration: &NarrationStore,
        background_track: Option<&Path>,
        output_path: &Path,
    ) -> Result<PathBuf> {
        if timeline.is_empty() {
            return Err(VideoError::Composition("timeline is empty".to_string()));
        }
        if timeline.len() != narration.len() {
            return Err(VideoError::Composition(format!(
                "timeline has {} slots but {} narration assets",
                timeline.len(),
                narration.len()
            )));
        }

        let parent = output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        // 临时目录随 drop 清理，失败路径同样适用
        let work_dir = tempfile::Builder::new()
            .prefix(".compose-")
            .tempdir_in(parent)?;

        let result = self
            .compose_in(timeline, narration, background_track, output_path, work_dir.path())
            .await;

        if let Err(e) = &result {
            error!("Composition failed: {}", e);
            tokio::fs::remove_file(output_path).await.ok();
        }
        result.map_err(|e| match e {
            VideoError::Composition(_) => e,
            other => VideoError::Composition(other.to_string()),
        })?;

        info!(
            "Final video created: {} ({:.2}s, {} scenes)",
            output_path.display(),
            timeline.total_duration(),
            timeline.len()
        );
        Ok(output_path.to_path_buf())
    }

    async fn compose_in(
        &self,
        timeline: &Timeline,
        narration: &NarrationStore,
        background_track: Option<&Path>,
        output_path: &Path,
        work_dir: &Path,
    ) -> Result<()> {
        let mut segments = Vec::with_capacity(timeline.len());

        for (position, slot) in timeline.slots().iter().enumerate() {
            if slot.index != position {
                return Err(VideoError::Composition(format!(
                    "slot {} found at timeline position {}",
                    slot.index, position
                )));
            }
            let asset = narration.get(slot.index).ok_or_else(|| {
                VideoError::Composition(format!("no narration for scene {}", slot.index))
            })?;

            let segment = work_dir.join(format!("segment_{:02}.mp4", slot.index));
            self.media
                .mux_audio(&slot.clip, &asset.path, slot.duration, &segment)
                .await?;
            info!(
                scene = slot.index,
                "Muxed segment {}/{} ({:.2}s{})",
                position + 1,
                timeline.len(),
                slot.duration,
                if slot.placeholder { ", placeholder" } else { "" }
            );
            segments.push(segment);
        }

        match background_track {
            Some(track) => {
                let merged = work_dir.join("merged.mp4");
                self.media.concatenate(&segments, &merged).await?;

                info!(
                    "Mixing background track {} (level {})",
                    track.display(),
                    self.config.background_level
                );
                self.media
                    .overlay_track(
                        &merged,
                        track,
                        self.config.background_level,
                        timeline.total_duration(),
                        output_path,
                    )
                    .await?;
            }
            None => {
                self.media.concatenate(&segments, output_path).await?;
            }
        }
        Ok(())
    }
}
