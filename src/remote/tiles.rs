/// Map tile retrieval
///
/// Two XYZ layers feed the map:
/// - the basemap, from a URL template (OpenStreetMap by default)
/// - the historical imagery, served by an Earth Engine map created once from
///   the collection mosaic, the REST form of `getMapId`

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::auth::AccessTokens;
use super::imagery::{mosaic_expression, read_raster_response, service_error_message, FetchError};
use crate::config::{BasemapConfig, ImageryConfig};

/// Address of one 256 px Web Mercator tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileLayer {
    Basemap,
    Historical,
}

#[derive(Debug, Deserialize)]
struct MapResponse {
    name: String,
}

/// Fetches tile bytes for both map layers
pub struct TileClient {
    client: reqwest::Client,
    basemap_template: String,
    endpoint: String,
    maps_url: String,
    collection_id: String,
    tokens: Arc<AccessTokens>,
    /// `projects/{project}/maps/{id}` once created
    historical_map: OnceCell<String>,
}

impl TileClient {
    pub fn new(
        client: reqwest::Client,
        basemap: &BasemapConfig,
        imagery: &ImageryConfig,
        tokens: Arc<AccessTokens>,
    ) -> Self {
        Self {
            client,
            basemap_template: basemap.url_template.clone(),
            endpoint: imagery.endpoint.clone(),
            maps_url: format!("{}/v1/projects/{}/maps", imagery.endpoint, imagery.project),
            collection_id: imagery.collection_id.clone(),
            tokens,
            historical_map: OnceCell::new(),
        }
    }

    /// Encoded image bytes of one tile
    pub async fn fetch(&self, layer: TileLayer, tile: TileId) -> Result<Vec<u8>, FetchError> {
        let request = match layer {
            TileLayer::Basemap => self.client.get(template_url(&self.basemap_template, tile)),
            TileLayer::Historical => {
                let map = self.historical_map().await?;
                self.client
                    .get(historical_tile_url(&self.endpoint, map, tile))
                    .bearer_auth(self.tokens.bearer().await?)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if layer == TileLayer::Historical && status == StatusCode::UNAUTHORIZED {
            self.tokens.rejected().await;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        Ok(read_raster_response(status, content_type.as_deref(), &body)?.bytes)
    }

    /// Create the historical map on first use; a failed attempt is retried by the next tile
    async fn historical_map(&self) -> Result<&str, FetchError> {
        let name = self
            .historical_map
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(&self.maps_url)
                    .bearer_auth(self.tokens.bearer().await?)
                    .json(&create_map_request(&self.collection_id))
                    .send()
                    .await?;

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED {
                    self.tokens.rejected().await;
                }
                let body = response.bytes().await?;
                let name = read_map_response(status, &body)?;
                tracing::info!("historical imagery tiles served from {}", name);
                Ok::<_, FetchError>(name)
            })
            .await?;
        Ok(name.as_str())
    }
}

/// Substitute `{z}`, `{x}` and `{y}` in an XYZ template
pub fn template_url(template: &str, tile: TileId) -> String {
    template
        .replace("{z}", &tile.zoom.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
}

pub fn historical_tile_url(endpoint: &str, map_name: &str, tile: TileId) -> String {
    format!("{}/v1/{}/tiles/{}", endpoint, map_name, tile)
}

/// Body of `maps.create` for the collection mosaic, default visualization
pub fn create_map_request(collection_id: &str) -> Value {
    json!({
        "expression": {
            "result": "0",
            "values": { "0": mosaic_expression(collection_id) },
        },
        "fileFormat": "PNG",
    })
}

fn read_map_response(status: StatusCode, body: &[u8]) -> Result<String, FetchError> {
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            message: service_error_message(body),
        });
    }
    serde_json::from_slice::<MapResponse>(body)
        .map(|map| map.name)
        .map_err(|err| FetchError::MalformedResponse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILE: TileId = TileId { zoom: 14, x: 2_633, y: 6_342 };

    #[test]
    fn test_basemap_template_substitution() {
        assert_eq!(
            template_url("https://tile.openstreetmap.org/{z}/{x}/{y}.png", TILE),
            "https://tile.openstreetmap.org/14/2633/6342.png"
        );
    }

    #[test]
    fn test_historical_tiles_live_under_map_name() {
        assert_eq!(
            historical_tile_url("https://earthengine.googleapis.com", "projects/demo/maps/abc-123", TILE),
            "https://earthengine.googleapis.com/v1/projects/demo/maps/abc-123/tiles/14/2633/6342"
        );
    }

    #[test]
    fn test_map_request_is_collection_mosaic() {
        let body = create_map_request("projects/x/assets/hist");
        assert_eq!(body["fileFormat"], "PNG");

        let mosaic = &body["expression"]["values"]["0"]["functionInvocationValue"];
        assert_eq!(mosaic["functionName"], "ImageCollection.mosaic");
        assert_eq!(
            mosaic["arguments"]["collection"]["functionInvocationValue"]["arguments"]["id"]["constantValue"],
            "projects/x/assets/hist"
        );
    }

    #[test]
    fn test_map_response_yields_name() {
        let name = read_map_response(StatusCode::OK, br#"{"name": "projects/demo/maps/abc-123"}"#).unwrap();
        assert_eq!(name, "projects/demo/maps/abc-123");

        assert!(matches!(
            read_map_response(StatusCode::OK, b"{}"),
            Err(FetchError::MalformedResponse(_))
        ));
        match read_map_response(StatusCode::FORBIDDEN, br#"{"error": {"message": "Not signed up."}}"#) {
            Err(FetchError::Status { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "Not signed up.");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
