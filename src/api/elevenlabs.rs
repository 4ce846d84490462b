use super::{measure_audio, Narration, NarrationProvider};
use crate::error::{Result, VideoError};
use crate::video::MediaTool;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const ELEVEN_LABS_TTS_API: &str = "https://api.elevenlabs.io/v1/text-to-speech";

pub const DEFAULT_VOICE_ID: &str = "RXtWW6etvimS8QJ5nhVk";

#[derive(Clone)]
pub struct ElevenLabsClient {
    api_key: String,
    client: Client,
    media: Arc<dyn MediaTool>,
}

impl ElevenLabsClient {
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

#[async_trait]
impl NarrationProvider for ElevenLabsClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Narration> {
        info!("Synthesizing narration with ElevenLabs voice_id '{}'", voice);

        let response = self
            .client
            .post(format!("{}/{}", ELEVEN_LABS_TTS_API, voice))
            .query(&[("output_format", "mp3_44100_128")])
            .header("xi-api-key", &self.api_key)
            .json(&json!({
                "text": text,
                "model_id": "eleven_multilingual_v2"
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(VideoError::ApiError(format!(
                "ElevenLabs API error: {}",
                error_text
            )));
        }

        let audio = response.bytes().await?.to_vec();
        let duration = measure_audio(self.media.as_ref(), &audio, "mp3").await?;
        Ok(Narration { audio, duration })
    }
}
