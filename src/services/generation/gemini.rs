use crate::core::catalog::TaskKey;
use crate::core::config::GenerationConfig;
use crate::core::error::GenerationError;
use crate::core::media::ImageData;
use crate::core::state::{CharacterAttributes, ReferenceSheet};
use crate::services::generation::prompts::{part_prompt, reference_prompt};
use crate::services::generation::ImageGenerator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

impl GeminiConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
        }
    }
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/".to_string()
}

// --- Wire types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn image(image: &ImageData) -> Self {
        Self {
            text: None,
            inline_data: Some(GeminiInlineData {
                mime_type: image.mime_type().to_string(),
                data: image.to_base64(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(alias = "inline_data")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Deserialize, Debug)]
struct GeminiApiError {
    message: String,
}

/// Pulls the first inline image out of a `generateContent` response body.
fn extract_image(body: &str) -> Result<ImageData, GenerationError> {
    let response: GeminiResponse = serde_json::from_str(body).map_err(|e| {
        GenerationError::InvalidData(format!("failed to parse Gemini response: {}", e))
    })?;

    if let Some(err) = response.error {
        return Err(GenerationError::Api(err.message));
    }

    let candidate = response
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| GenerationError::InvalidData("response has no candidates".to_string()))?;

    let inline = candidate
        .content
        .into_iter()
        .flat_map(|content| content.parts)
        .find_map(|part| part.inline_data);

    match inline {
        Some(data) => ImageData::from_base64(&data.mime_type, &data.data)
            .map_err(|e| GenerationError::InvalidData(format!("invalid image payload: {}", e))),
        None => Err(GenerationError::NoImage(
            candidate
                .finish_reason
                .unwrap_or_else(|| "UNKNOWN".to_string()),
        )),
    }
}

// --- Client ---

pub struct GeminiImageClient {
    api_key: String,
    endpoint: Url,
    client: reqwest::Client,
    retry_count: usize,
    retry_delay: Duration,
}

impl GeminiImageClient {
    pub fn new(config: GeminiConfig, generation: &GenerationConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join(&format!("models/{}:generateContent", config.model)))
            .with_context(|| format!("Invalid Gemini base URL: {}", config.base_url))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(generation.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            api_key: config.api_key,
            endpoint,
            client,
            retry_count: generation.retry_count,
            retry_delay: Duration::from_secs(generation.retry_delay_seconds),
        })
    }

    async fn generate_image(&self, parts: Vec<GeminiPart>) -> Result<ImageData, GenerationError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GeminiGenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            },
        };

        let attempts = self.retry_count + 1;
        let mut last_error = GenerationError::Request("no attempt made".to_string());

        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(
                    "Gemini image generation failed (attempt {}/{}), retrying...",
                    attempt + 1,
                    attempts
                );
                sleep(self.retry_delay).await;
            }

            match self.try_generate(&request).await {
                Ok(image) => return Ok(image),
                Err(e) => {
                    warn!("Gemini image generation error: {}", e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn try_generate(&self, request: &GeminiRequest) -> Result<ImageData, GenerationError> {
        debug!("POST {}", self.endpoint);
        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Api(format!("{}: {}", status, body)));
        }

        extract_image(&body)
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageClient {
    async fn generate_reference(
        &self,
        attributes: &CharacterAttributes,
    ) -> Result<ReferenceSheet, GenerationError> {
        let image = self
            .generate_image(vec![GeminiPart::text(reference_prompt(attributes))])
            .await?;
        Ok(ReferenceSheet {
            image,
            generated_at: Utc::now(),
        })
    }

    async fn generate_part(
        &self,
        _attributes: &CharacterAttributes,
        key: TaskKey,
        reference: &ReferenceSheet,
    ) -> Result<ImageData, GenerationError> {
        self.generate_image(vec![
            GeminiPart::text(part_prompt(key)),
            GeminiPart::image(&reference.image),
        ])
        .await
    }
}
