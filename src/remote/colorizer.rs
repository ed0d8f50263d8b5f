/// Generative colorization
///
/// Sends the grayscale raster plus a restoration prompt to a Gemini
/// `generateContent` endpoint configured for image output, then picks the
/// first inline image out of the first candidate.
///
/// "No image came back" is `Ok(None)`: the run still succeeds with the
/// original image only. Anything that stops the call itself is a `ModelError`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

use crate::config::{Credential, ModelConfig};
use crate::geo::GeoPoint;
use crate::imaging::{CodecError, ImageArtifact, RasterImage};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("model response is not valid JSON: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error("inline image data is not valid base64: {0}")]
    InlineData(#[from] base64::DecodeError),

    #[error("could not prepare source image: {0}")]
    SourceImage(#[from] CodecError),
}

/// Turns a historical raster into a colorized one
pub trait Colorizer: Send + Sync {
    fn colorize(
        &self,
        image: &RasterImage,
        point: GeoPoint,
    ) -> impl Future<Output = Result<Option<ImageArtifact>, ModelError>> + Send;
}

/// Restoration instruction, grounded with the clicked coordinates
pub fn restoration_prompt(point: GeoPoint) -> String {
    format!(
        "A photorealistic colorization of a black and white aerial image from the 1950s. \
         The scene is a landscape near latitude {} and longitude {}. \
         The colorization should be realistic, with natural-looking colors for the vegetation, soil, and water. \
         The lighting should be consistent with the input image.",
        point.latitude, point.longitude
    )
}

// ========== Wire types ==========

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentRequest {
    /// Prompt text followed by the source image, asking for text+image output
    pub fn new(prompt: String, image_png: &[u8]) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: Some(prompt),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(Blob {
                            mime_type: "image/png".to_string(),
                            data: STANDARD.encode(image_png),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            },
        }
    }
}

/// First inline image of the first candidate, decoded
///
/// Later candidates are never consulted.
pub fn first_inline_image(response: &GenerateContentResponse) -> Result<Option<ImageArtifact>, ModelError> {
    let Some(candidate) = response.candidates.first() else {
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            tracing::warn!("model returned no candidates (blocked: {})", reason);
        }
        return Ok(None);
    };

    let blob = candidate
        .content
        .iter()
        .flat_map(|content| content.parts.iter())
        .find_map(|part| part.inline_data.as_ref());

    match blob {
        Some(blob) => {
            let bytes = STANDARD.decode(blob.data.as_bytes())?;
            Ok(Some(ImageArtifact::new(bytes, blob.mime_type.clone())))
        }
        None => {
            tracing::warn!(
                "model response has no image part (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            );
            Ok(None)
        }
    }
}

/// Gemini REST client
pub struct GeminiColorizer {
    client: reqwest::Client,
    url: String,
    api_key: Credential,
}

impl GeminiColorizer {
    pub fn new(client: reqwest::Client, config: &ModelConfig) -> Self {
        Self {
            client,
            url: generate_content_url(&config.endpoint, &config.model_id),
            api_key: config.api_key.clone(),
        }
    }
}

impl Colorizer for GeminiColorizer {
    async fn colorize(&self, image: &RasterImage, point: GeoPoint) -> Result<Option<ImageArtifact>, ModelError> {
        let request = GenerateContentRequest::new(restoration_prompt(point), &image.to_png()?);
        tracing::debug!("submitting {}x{} raster to {}", image.width(), image.height(), self.url);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", self.api_key.expose())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        read_generate_response(status, &body)
    }
}

pub fn generate_content_url(endpoint: &str, model_id: &str) -> String {
    format!("{}/v1beta/models/{}:generateContent", endpoint, model_id)
}

/// Map an HTTP response to the extracted image (or the soft failure)
pub fn read_generate_response(status: StatusCode, body: &[u8]) -> Result<Option<ImageArtifact>, ModelError> {
    if !status.is_success() {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| String::from_utf8_lossy(body).trim().chars().take(300).collect());
        return Err(ModelError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let response: GenerateContentResponse = serde_json::from_slice(body)?;
    first_inline_image(&response)
}
