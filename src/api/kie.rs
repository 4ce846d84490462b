use super::{ProviderStatus, VideoProvider};
use crate::error::{Result, VideoError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const KIE_CREATE_TASK_API: &str = "https://api.kie.ai/api/v1/jobs/createTask";
const KIE_RECORD_INFO_API: &str = "https://api.kie.ai/api/v1/jobs/recordInfo";

/// Kie AI 的 Sora 2 视频生成客户端
#[derive(Debug, Clone)]
pub struct KieClient {
    api_key: String,
    client: Client,
    aspect_ratio: String,
    n_frames: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default, alias = "msg")]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskData {
    #[serde(rename = "taskId")]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordInfo {
    state: Option<String>,
    #[serde(rename = "resultJson")]
    result_json: Option<String>,
    #[serde(rename = "failMsg")]
    fail_msg: Option<String>,
    #[serde(rename = "failCode")]
    fail_code: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ResultUrls {
    #[serde(rename = "resultUrls", default)]
    result_urls: Vec<String>,
}

impl KieClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            api_key,
            client,
            aspect_ratio: "portrait".to_string(),
            n_frames: "10".to_string(),
        })
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

/// 429 和 5xx 视为可重试，其余 HTTP 错误直接失败
fn http_failure(status: StatusCode, body: &str) -> VideoError {
    let message = format!("HTTP {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        VideoError::TransientProvider(message)
    } else {
        VideoError::FatalProvider(message)
    }
}

fn api_failure(code: i64, message: Option<String>) -> VideoError {
    let message = format!(
        "Kie API code {}: {}",
        code,
        message.unwrap_or_else(|| "Unknown error".to_string())
    );
    match code {
        429 | 455 | 500 | 503 => VideoError::TransientProvider(message),
        _ => VideoError::FatalProvider(message),
    }
}

fn parse_record(info: RecordInfo) -> Result<ProviderStatus> {
    let state = info.state.unwrap_or_default();
    match state.as_str() {
        "success" => {
            let raw = info.result_json.unwrap_or_else(|| "{}".to_string());
            let parsed: ResultUrls = serde_json::from_str(&raw).map_err(|e| {
                VideoError::FatalProvider(format!("Failed to parse resultJson {}: {}", raw, e))
            })?;
            match parsed.result_urls.into_iter().next() {
                Some(artifact_url) => Ok(ProviderStatus::Succeeded { artifact_url }),
                None => Ok(ProviderStatus::Failed {
                    reason: "No video URLs found in task result".to_string(),
                }),
            }
        }
        "fail" => {
            let code = info
                .fail_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            let msg = info.fail_msg.unwrap_or_else(|| "Unknown error".to_string());
            Ok(ProviderStatus::Failed {
                reason: format!("{} (code: {})", msg, code),
            })
        }
        "generating" => Ok(ProviderStatus::Running),
        _ => Ok(ProviderStatus::Pending),
    }
}

#[async_trait]
impl VideoProvider for KieClient {
    async fn submit(&self, prompt: &str, reference_image: Option<&str>) -> Result<String> {
        // 有参考图时走图生视频
        let (model, input) = match reference_image {
            Some(url) => (
                "sora-2-image-to-video",
                json!({
                    "prompt": prompt,
                    "image_urls": [url],
                    "aspect_ratio": self.aspect_ratio,
                    "n_frames": self.n_frames,
                    "remove_watermark": true
                }),
            ),
            None => (
                "sora-2-text-to-video",
                json!({
                    "prompt": prompt,
                    "aspect_ratio": self.aspect_ratio,
                    "n_frames": self.n_frames,
                    "remove_watermark": true
                }),
            ),
        };

        let response = self
            .client
            .post(KIE_CREATE_TASK_API)
            .header("Authorization", self.auth())
            .json(&json!({ "model": model, "input": input }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(http_failure(status, &error_text));
        }

        let envelope: ApiEnvelope<CreateTaskData> = response.json().await?;
        if envelope.code != 200 {
            return Err(api_failure(envelope.code, envelope.message));
        }

        let task_id = envelope
            .data
            .and_then(|d| d.task_id)
            .ok_or_else(|| VideoError::FatalProvider("No taskId returned from API".to_string()))?;

        info!("Video generation task submitted: {} ({})", task_id, model);
        Ok(task_id)
    }

    async fn poll(&self, job_ref: &str) -> Result<ProviderStatus> {
        let response = self
            .client
            .get(KIE_RECORD_INFO_API)
            .header("Authorization", self.auth())
            .query(&[("taskId", job_ref)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(http_failure(status, &error_text));
        }

        let envelope: ApiEnvelope<RecordInfo> = response.json().await?;
        if envelope.code != 200 {
            return Err(api_failure(envelope.code, envelope.message));
        }

        let info = envelope
            .data
            .ok_or_else(|| VideoError::TransientProvider("Empty task record".to_string()))?;
        debug!("Task {} state: {:?}", job_ref, info.state);
        parse_record(info)
    }

    async fn download(&self, artifact_url: &str) -> Result<Vec<u8>> {
        info!("Downloading video from: {}", artifact_url);
        let response = self.client.get(artifact_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(http_failure(status, &error_text));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
