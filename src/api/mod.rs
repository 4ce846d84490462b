mod elevenlabs;
mod kie;
mod openai;
mod still;

pub use elevenlabs::{ElevenLabsClient, DEFAULT_VOICE_ID as ELEVEN_LABS_DEFAULT_VOICE};
pub use kie::KieClient;
pub use openai::{is_known_voice, random_voice, OpenAiClient, OPENAI_VOICES};
pub use still::StillImageProvider;

use crate::error::Result;
use crate::scene::Script;
use async_trait::async_trait;

/// 服务端任务的一次查询结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStatus {
    Pending,
    Running,
    Succeeded { artifact_url: String },
    Failed { reason: String },
}

/// 一段合成好的旁白音频
#[derive(Debug, Clone)]
pub struct Narration {
    pub audio: Vec<u8>,
    pub duration: f64,
}

#[async_trait]
pub trait NarrationProvider: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Narration>;
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// 提交生成任务，返回服务端任务引用
    async fn submit(&self, prompt: &str, reference_image: Option<&str>) -> Result<String>;

    async fn poll(&self, job_ref: &str) -> Result<ProviderStatus>;

    async fn download(&self, artifact_url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ScriptWriter: Send + Sync {
    async fn write_script(&self, topic: &str, num_scenes: usize, template: &str)
        -> Result<Script>;
}

/// 模板里的 {topic} / {num_scenes} 直接做文本替换，避免和 JSON 花括号冲突
pub fn render_prompt_template(template: &str, topic: &str, num_scenes: usize) -> String {
    template
        .replace("{topic}", topic)
        .replace("{num_scenes}", &num_scenes.to_string())
}

/// 去掉模型回复里可能带的 markdown 代码块标记
pub(crate) fn strip_code_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// 把音频写入临时文件后用 ffprobe 测时长
pub(crate) async fn measure_audio(
    tool: &dyn crate::video::MediaTool,
    audio: &[u8],
    extension: &str,
) -> Result<f64> {
    let file = tempfile::Builder::new()
        .prefix("narration-")
        .suffix(&format!(".{}", extension))
        .tempfile()?;
    tokio::fs::write(file.path(), audio).await?;
    tool.probe_duration(file.path()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_placeholders_are_replaced() {
        let rendered = render_prompt_template(
            r#"Write {num_scenes} scenes about {topic}. Return {"scenes": []}"#,
            "cold brew",
            5,
        );
        assert_eq!(
            rendered,
            r#"Write 5 scenes about cold brew. Return {"scenes": []}"#
        );
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  [1] "), "[1]");
    }
}
