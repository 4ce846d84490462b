use crate::api::NarrationProvider;
use crate::error::Result;
use crate::scene::Scene;
use crate::video::MediaTool;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 单个场景的旁白音频与实测时长
#[derive(Debug, Clone)]
pub struct NarrationAsset {
    pub index: usize,
    pub path: PathBuf,
    pub duration: f64,
}

/// 旁白资产，生成后只读
#[derive(Debug, Clone, Default)]
pub struct NarrationStore {
    assets: Vec<NarrationAsset>,
}

/// 文件名带上 (voice, text) 的摘要，内容变化时不会误用旧音频
pub fn narration_file_name(index: usize, text: &str, voice: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(voice.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("narration_{:02}_{}.mp3", index, &digest[..16])
}

impl NarrationStore {
    pub fn from_assets(mut assets: Vec<NarrationAsset>) -> Self {
        assets.sort_by_key(|a| a.index);
        Self { assets }
    }

    /// 为每个场景生成旁白（同一文本和音色的文件直接复用）
    pub async fn synthesize_all(
        provider: &dyn NarrationProvider,
        media: &dyn MediaTool,
        scenes: &[Scene],
        voice: &str,
        dir: &Path,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let mut assets = Vec::with_capacity(scenes.len());
        for scene in scenes {
            let path = dir.join(narration_file_name(scene.index, &scene.narration_text, voice));

            if tokio::fs::metadata(&path).await.is_ok() {
                match media.probe_duration(&path).await {
                    Ok(duration) => {
                        info!(scene = scene.index, "Narration already exists, skipping...");
                        assets.push(NarrationAsset {
                            index: scene.index,
                            path,
                            duration,
                        });
                        continue;
                    }
                    Err(e) => warn!(
                        scene = scene.index,
                        "Existing narration unreadable, regenerating: {}", e
                    ),
                }
            }

            let narration = provider.synthesize(&scene.narration_text, voice).await?;
            tokio::fs::write(&path, &narration.audio).await?;
            info!(
                scene = scene.index,
                "Narration saved to: {} ({:.2}s)",
                path.display(),
                narration.duration
            );
            assets.push(NarrationAsset {
                index: scene.index,
                path,
                duration: narration.duration,
            });
        }

        Ok(Self::from_assets(assets))
    }

    pub fn get(&self, index: usize) -> Option<&NarrationAsset> {
        self.assets.get(index).filter(|a| a.index == index)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.assets.iter().map(|a| a.duration).sum()
    }
}
