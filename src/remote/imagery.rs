/// Historical imagery retrieval
///
/// Requests a PNG of the collection mosaic clipped to a bounding box from the
/// Earth Engine `image:computePixels` REST method. One attempt per call; there
/// is no retry and no timeout beyond the HTTP client's defaults.

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use super::auth::AccessTokens;
use crate::config::ImageryConfig;
use crate::geo::BoundingBox;
use crate::imaging::ImageArtifact;

/// Ground distance covered by one output pixel, in meters
pub const PIXEL_SCALE_M: f64 = 1.0;

/// Output raster format requested from the service
pub const OUTPUT_FORMAT: &str = "PNG";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("imagery service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not authorize with Earth Engine: {0}")]
    Auth(String),

    #[error("imagery service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("imagery service returned an empty payload")]
    EmptyPayload,

    #[error("imagery service returned non-image content type `{0}`")]
    UnexpectedContentType(String),

    #[error("imagery service returned an unreadable response: {0}")]
    MalformedResponse(String),
}

/// Source of clipped rasters for a bounding box
pub trait ImageryFetcher: Send + Sync {
    fn fetch(&self, bbox: BoundingBox) -> impl Future<Output = Result<ImageArtifact, FetchError>> + Send;
}

/// HTTP client shared by every Earth Engine and tile request
pub fn http_client() -> Result<reqwest::Client, FetchError> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Earth Engine REST client
pub struct EarthEngineFetcher {
    client: reqwest::Client,
    url: String,
    collection_id: String,
    tokens: Arc<AccessTokens>,
}

impl EarthEngineFetcher {
    pub fn new(client: reqwest::Client, config: &ImageryConfig, tokens: Arc<AccessTokens>) -> Self {
        Self {
            client,
            url: compute_pixels_url(&config.endpoint, &config.project),
            collection_id: config.collection_id.clone(),
            tokens,
        }
    }
}

impl ImageryFetcher for EarthEngineFetcher {
    async fn fetch(&self, bbox: BoundingBox) -> Result<ImageArtifact, FetchError> {
        let body = compute_pixels_request(&self.collection_id, &bbox, PIXEL_SCALE_M);
        tracing::debug!("requesting {} mosaic for {:?}", self.collection_id, bbox);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.tokens.bearer().await?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.rejected().await;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        let artifact = read_raster_response(status, content_type.as_deref(), &bytes)?;
        tracing::debug!("received {} bytes of {}", artifact.bytes.len(), artifact.mime_type);
        Ok(artifact)
    }
}

pub fn compute_pixels_url(endpoint: &str, project: &str) -> String {
    format!("{}/v1/projects/{}/image:computePixels", endpoint, project)
}

/// Request body: the collection mosaic clipped and scaled to `bbox`
///
/// Expression graph equivalent of
/// `ImageCollection(id).mosaic().clipToBoundsAndScale(Rectangle(bbox), scale)`.
pub fn compute_pixels_request(collection_id: &str, bbox: &BoundingBox, scale: f64) -> Value {
    let mosaic = mosaic_expression(collection_id);
    let region = invocation(
        "GeometryConstructors.Rectangle",
        json!({ "coordinates": { "constantValue": bbox.to_wsen() } }),
    );
    let clipped = invocation(
        "Image.clipToBoundsAndScale",
        json!({
            "input": mosaic,
            "geometry": region,
            "scale": { "constantValue": scale },
        }),
    );

    json!({
        "expression": {
            "result": "0",
            "values": { "0": clipped },
        },
        "fileFormat": OUTPUT_FORMAT,
    })
}

/// `ImageCollection(id).mosaic()` as an expression node
pub fn mosaic_expression(collection_id: &str) -> Value {
    let collection = invocation("ImageCollection.load", json!({ "id": { "constantValue": collection_id } }));
    invocation("ImageCollection.mosaic", json!({ "collection": collection }))
}

fn invocation(function_name: &str, arguments: Value) -> Value {
    json!({
        "functionInvocationValue": {
            "functionName": function_name,
            "arguments": arguments,
        }
    })
}

/// Turn an HTTP response into an artifact or a `FetchError`
///
/// An area with no coverage still comes back as a valid (blank) PNG and is
/// not an error here.
pub fn read_raster_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<ImageArtifact, FetchError> {
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            message: service_error_message(body),
        });
    }

    if body.is_empty() {
        return Err(FetchError::EmptyPayload);
    }

    let mime_type = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .unwrap_or_else(|| "image/png".to_string());
    if !mime_type.starts_with("image/") && mime_type != "application/octet-stream" {
        return Err(FetchError::UnexpectedContentType(mime_type));
    }

    let mime_type = if mime_type.starts_with("image/") {
        mime_type
    } else {
        "image/png".to_string()
    };

    Ok(ImageArtifact::new(body.to_vec(), mime_type))
}

/// Pull `error.message` out of a Google API error body, else the raw text
pub(crate) fn service_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                "no error details".to_string()
            } else {
                text.chars().take(300).collect()
            }
        })
}
