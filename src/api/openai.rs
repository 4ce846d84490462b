use super::{measure_audio, render_prompt_template, strip_code_fences};
use super::{Narration, NarrationProvider, ScriptWriter};
use crate::error::{Result, VideoError};
use crate::scene::Script;
use crate::video::MediaTool;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const OPENAI_CHAT_API: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_TTS_API: &str = "https://api.openai.com/v1/audio/speech";

/// tts-1 支持的音色
pub const OPENAI_VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// 未指定音色时随机挑一个
pub fn random_voice() -> &'static str {
    OPENAI_VOICES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("nova")
}

pub fn is_known_voice(voice: &str) -> bool {
    OPENAI_VOICES.contains(&voice)
}

/// OpenAI 客户端：脚本生成 + TTS
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    client: Client,
    media: Arc<dyn MediaTool>,
}

impl OpenAiClient {
    pub fn new(api_key: String, media: Arc<dyn MediaTool>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            api_key,
            client,
            media,
        })
    }
}

/// 解析模型返回的脚本并校验场景数量
pub(crate) fn parse_script(content: &str, num_scenes: usize) -> Result<Script> {
    let script: Script = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| VideoError::ApiError(format!("Failed to parse script JSON: {}", e)))?;

    if script.scenes.len() != num_scenes {
        return Err(VideoError::ApiError(format!(
            "Script generated {} scenes, but {} were requested",
            script.scenes.len(),
            num_scenes
        )));
    }
    Ok(script)
}

#[async_trait]
impl ScriptWriter for OpenAiClient {
    async fn write_script(
        &self,
        topic: &str,
        num_scenes: usize,
        template: &str,
    ) -> Result<Script> {
        info!("Generating B-roll script for topic: {}", topic);

        let prompt = format!(
            r#"{}

Respond with ONLY a JSON object of the form:
{{"scenes": [{{"narration": "...", "video_prompt": "...", "image_prompt": "...", "include_product": false}}], "musicGenerationPrompt": "..."}}
Generate exactly {} scenes."#,
            render_prompt_template(template, topic, num_scenes),
            num_scenes
        );

        let request_body = json!({
            "model": "gpt-4o-mini",
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(OPENAI_CHAT_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(VideoError::ApiError(format!(
                "OpenAI chat API error: {}",
                error_text
            )));
        }

        let response_json: serde_json::Value = response.json().await?;
        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| VideoError::ApiError("Failed to extract generated text".to_string()))?;

        let script = parse_script(content, num_scenes)?;
        info!("Script generated with {} scenes", script.scenes.len());
        Ok(script)
    }
}

#[async_trait]
impl NarrationProvider for OpenAiClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Narration> {
        info!("Synthesizing narration with OpenAI voice '{}' ({} chars)", voice, text.len());

        let response = self
            .client
            .post(OPENAI_TTS_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": "tts-1",
                "voice": voice,
                "input": text
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(VideoError::ApiError(format!("TTS API error: {}", error_text)));
        }

        let audio = response.bytes().await?.to_vec();
        let duration = measure_audio(self.media.as_ref(), &audio, "mp3").await?;
        Ok(Narration { audio, duration })
    }
}
