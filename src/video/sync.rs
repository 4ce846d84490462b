use super::MediaTool;
use crate::config::SyncConfig;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// 片段时长与旁白时长的对齐方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncPlan {
    /// 已在容差内，不处理
    PassThrough,
    /// 从尾部截断到目标时长
    Trim { target: f64 },
    /// 以 speed 慢放
    Stretch { speed: f64 },
    /// 以最低速度慢放后冻结末帧 hold 秒
    FreezeExtend { speed: f64, hold: f64 },
}

impl SyncPlan {
    pub fn for_durations(actual: f64, target: f64, config: &SyncConfig) -> Self {
        if (actual - target).abs() <= config.epsilon {
            return SyncPlan::PassThrough;
        }
        if actual > target {
            return SyncPlan::Trim { target };
        }

        let speed = actual / target;
        if speed >= config.min_speed_factor {
            SyncPlan::Stretch { speed }
        } else {
            let speed = config.min_speed_factor;
            SyncPlan::FreezeExtend {
                speed,
                hold: target - actual / speed,
            }
        }
    }

    /// 按计划处理后的理论时长
    pub fn resulting_duration(&self, actual: f64) -> f64 {
        match *self {
            SyncPlan::PassThrough => actual,
            SyncPlan::Trim { target } => target.min(actual),
            SyncPlan::Stretch { speed } => actual / speed,
            SyncPlan::FreezeExtend { speed, hold } => actual / speed + hold,
        }
    }
}

/// 把片段时长对齐到旁白时长
#[derive(Clone)]
pub struct SyncEngine {
    media: Arc<dyn MediaTool>,
    config: SyncConfig,
    output_dir: PathBuf,
}

impl SyncEngine {
    pub fn new(media: Arc<dyn MediaTool>, config: SyncConfig, output_dir: PathBuf) -> Self {
        Self {
            media,
            config,
            output_dir,
        }
    }

    /// 输出时长恒为 target_duration（± epsilon）；已对齐的片段原样返回
    pub async fn synchronize(&self, clip_path: &Path, target_duration: f64) -> Result<PathBuf> {
        let actual = self.media.probe_duration(clip_path).await?;
        let plan = SyncPlan::for_durations(actual, target_duration, &self.config);

        if plan == SyncPlan::PassThrough {
            info!(
                "Clip {} already matches {:.2}s (actual {:.2}s)",
                clip_path.display(),
                target_duration,
                actual
            );
            return Ok(clip_path.to_path_buf());
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_path(clip_path);

        match plan {
            SyncPlan::Trim { target } => {
                info!("Trimming {} ({:.2}s -> {:.2}s)", clip_path.display(), actual, target);
                self.media.trim(clip_path, target, &output).await?;
            }
            SyncPlan::Stretch { speed } => {
                info!(
                    "Slowing down {} ({:.2}s -> {:.2}s, speed {:.2}x)",
                    clip_path.display(),
                    actual,
                    target_duration,
                    speed
                );
                self.media.change_speed(clip_path, speed, &output).await?;
            }
            SyncPlan::FreezeExtend { speed, hold } => {
                warn!(
                    "Clip {} needs {:.2}x to reach {:.2}s, below floor {:.2}x; holding last frame for {:.2}s",
                    clip_path.display(),
                    actual / target_duration,
                    target_duration,
                    speed,
                    hold
                );
                self.media.freeze_extend(clip_path, speed, hold, &output).await?;
            }
            SyncPlan::PassThrough => return Ok(clip_path.to_path_buf()),
        }

        let synced = self.media.probe_duration(&output).await?;
        if (synced - target_duration).abs() > self.config.epsilon {
            warn!(
                "Synced clip {} is {:.3}s, target {:.3}s (tolerance {:.3}s)",
                output.display(),
                synced,
                target_duration,
                self.config.epsilon
            );
        }
        Ok(output)
    }

    fn output_path(&self, clip_path: &Path) -> PathBuf {
        let stem = clip_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());
        self.output_dir.join(format!("{}_synced.mp4", stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        SyncConfig {
            epsilon: 0.1,
            min_speed_factor: 0.5,
        }
    }

    #[test]
    fn longer_clip_is_trimmed() {
        let plan = SyncPlan::for_durations(8.0, 5.0, &config());
        assert_eq!(plan, SyncPlan::Trim { target: 5.0 });
        assert_eq!(plan.resulting_duration(8.0), 5.0);
    }

    #[test]
    fn shorter_clip_within_floor_is_stretched() {
        let plan = SyncPlan::for_durations(3.0, 5.0, &config());
        match plan {
            SyncPlan::Stretch { speed } => assert!((speed - 0.6).abs() < 1e-9),
            other => panic!("expected stretch, got {:?}", other),
        }
        assert!((plan.resulting_duration(3.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_mismatch_freezes_last_frame() {
        let plan = SyncPlan::for_durations(1.0, 5.0, &config());
        assert_eq!(
            plan,
            SyncPlan::FreezeExtend {
                speed: 0.5,
                hold: 3.0
            }
        );
        assert!((plan.resulting_duration(1.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn within_epsilon_passes_through() {
        assert_eq!(
            SyncPlan::for_durations(5.05, 5.0, &config()),
            SyncPlan::PassThrough
        );
        assert_eq!(
            SyncPlan::for_durations(4.95, 5.0, &config()),
            SyncPlan::PassThrough
        );
    }

    #[test]
    fn exact_floor_speed_still_stretches() {
        let plan = SyncPlan::for_durations(2.5, 5.0, &config());
        assert_eq!(plan, SyncPlan::Stretch { speed: 0.5 });
    }
}
