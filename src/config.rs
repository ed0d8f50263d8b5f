/// Process configuration, read once from the environment at startup
///
/// Earth Engine is authorized either with an OAuth refresh token (from the
/// environment or the credentials file written by `earthengine authenticate`)
/// or with a fixed access token. Fixed tokens expire after about an hour.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_EE_ENDPOINT: &str = "https://earthengine.googleapis.com";
const DEFAULT_EE_PROJECT: &str = "georeason-app-demo";
const DEFAULT_COLLECTION: &str = "projects/wlfw-um/assets/historical-imagery/conus-west";
const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_MODEL_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
const DEFAULT_BASEMAP: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error(
        "no Earth Engine credentials: set EE_REFRESH_TOKEN with EE_CLIENT_ID and EE_CLIENT_SECRET, \
         run `earthengine authenticate`, or set EE_ACCESS_TOKEN (expires after about an hour)"
    )]
    NoEarthEngineCredentials,

    #[error("environment variable {key} has an invalid value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Secret passed opaquely to the remote clients; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// How Earth Engine requests are authorized
#[derive(Debug, Clone, PartialEq)]
pub enum EarthEngineAuth {
    /// Exchanged for short-lived access tokens as they expire
    RefreshToken {
        token_endpoint: String,
        client_id: String,
        client_secret: Credential,
        refresh_token: Credential,
    },
    /// Used as-is until the service rejects it
    AccessToken(Credential),
}

/// Earth Engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct ImageryConfig {
    pub endpoint: String,
    pub project: String,
    pub collection_id: String,
    pub auth: EarthEngineAuth,
}

/// Generative model settings
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model_id: String,
    pub api_key: Credential,
}

/// Map background settings
#[derive(Debug, Clone, PartialEq)]
pub struct BasemapConfig {
    /// XYZ template with `{z}`, `{x}` and `{y}` placeholders
    pub url_template: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub imagery: ImageryConfig,
    pub model: ModelConfig,
    pub basemap: BasemapConfig,
}

impl AppConfig {
    /// Load from the process environment
    ///
    /// The `earthengine` credentials file is only consulted when neither
    /// `EE_REFRESH_TOKEN` nor `EE_ACCESS_TOKEN` is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let stored = if env("EE_REFRESH_TOKEN").is_some() || env("EE_ACCESS_TOKEN").is_some() {
            StoredCredentials::default()
        } else {
            let path = env("EE_CREDENTIALS_FILE")
                .map(PathBuf::from)
                .or_else(default_credentials_path);
            path.map(|p| StoredCredentials::load(&p)).unwrap_or_default()
        };

        Self::from_lookup(|key| env(key).or_else(|| stored.get(key)))
    }

    /// Load through an arbitrary key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let auth = match (get("EE_REFRESH_TOKEN"), get("EE_ACCESS_TOKEN")) {
            (Some(refresh_token), _) => EarthEngineAuth::RefreshToken {
                token_endpoint: endpoint(get("EE_TOKEN_ENDPOINT"), DEFAULT_TOKEN_ENDPOINT, "EE_TOKEN_ENDPOINT")?,
                client_id: get("EE_CLIENT_ID").ok_or(ConfigError::Missing("EE_CLIENT_ID"))?,
                client_secret: Credential::new(
                    get("EE_CLIENT_SECRET").ok_or(ConfigError::Missing("EE_CLIENT_SECRET"))?,
                ),
                refresh_token: Credential::new(refresh_token),
            },
            (None, Some(access_token)) => EarthEngineAuth::AccessToken(Credential::new(access_token)),
            (None, None) => return Err(ConfigError::NoEarthEngineCredentials),
        };

        let api_key = get("GEMINI_API_KEY")
            .or_else(|| get("GOOGLE_API_KEY"))
            .ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;

        let imagery = ImageryConfig {
            endpoint: endpoint(get("EE_API_ENDPOINT"), DEFAULT_EE_ENDPOINT, "EE_API_ENDPOINT")?,
            project: get("EE_PROJECT").unwrap_or_else(|| DEFAULT_EE_PROJECT.to_string()),
            collection_id: get("EE_COLLECTION_ID").unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            auth,
        };

        let model = ModelConfig {
            endpoint: endpoint(get("GEMINI_API_ENDPOINT"), DEFAULT_MODEL_ENDPOINT, "GEMINI_API_ENDPOINT")?,
            model_id: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: Credential::new(api_key),
        };

        let basemap = BasemapConfig {
            url_template: tile_template(get("BASEMAP_TILE_URL"))?,
        };

        Ok(Self { imagery, model, basemap })
    }
}

/// Normalize a REST root: must be http(s), no trailing slash
fn endpoint(value: Option<String>, default: &str, key: &'static str) -> Result<String, ConfigError> {
    let value = value.unwrap_or_else(|| default.to_string());
    if !(value.starts_with("https://") || value.starts_with("http://")) {
        return Err(ConfigError::Invalid {
            key,
            reason: format!("`{}` is not an http(s) URL", value),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn tile_template(value: Option<String>) -> Result<String, ConfigError> {
    let value = endpoint(value, DEFAULT_BASEMAP, "BASEMAP_TILE_URL")?;
    for placeholder in ["{z}", "{x}", "{y}"] {
        if !value.contains(placeholder) {
            return Err(ConfigError::Invalid {
                key: "BASEMAP_TILE_URL",
                reason: format!("`{}` has no {} placeholder", value, placeholder),
            });
        }
    }
    Ok(value)
}

/// Where `earthengine authenticate` stores its refresh token
fn default_credentials_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("earthengine").join("credentials"))
}

/// Refresh-token fields of the Earth Engine credentials file
#[derive(Debug, Default, Deserialize)]
struct StoredCredentials {
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl StoredCredentials {
    /// Missing or unreadable files yield no credentials
    fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).unwrap_or_else(|err| {
                tracing::warn!("ignoring malformed credentials file {}: {}", path.display(), err);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Answer for the environment key the field stands in for
    fn get(&self, key: &str) -> Option<String> {
        match key {
            "EE_REFRESH_TOKEN" => self.refresh_token.clone(),
            "EE_CLIENT_ID" => self.client_id.clone(),
            "EE_CLIENT_SECRET" => self.client_secret.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_fill_in_optional_values() {
        let config = AppConfig::from_lookup(lookup(&[
            ("EE_ACCESS_TOKEN", "ya29.token"),
            ("GEMINI_API_KEY", "key-123"),
        ]))
        .unwrap();

        assert_eq!(config.imagery.endpoint, DEFAULT_EE_ENDPOINT);
        assert_eq!(config.imagery.project, "georeason-app-demo");
        assert_eq!(config.imagery.collection_id, DEFAULT_COLLECTION);
        assert_eq!(
            config.imagery.auth,
            EarthEngineAuth::AccessToken(Credential::new("ya29.token"))
        );
        assert_eq!(config.model.model_id, "gemini-2.5-flash-image-preview");
        assert_eq!(config.model.api_key.expose(), "key-123");
        assert_eq!(config.basemap.url_template, DEFAULT_BASEMAP);
    }

    #[test]
    fn test_missing_credentials_are_reported() {
        assert_eq!(
            AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "k")])),
            Err(ConfigError::NoEarthEngineCredentials)
        );
        assert_eq!(
            AppConfig::from_lookup(lookup(&[("EE_ACCESS_TOKEN", "t"), ("GEMINI_API_KEY", "  ")])),
            Err(ConfigError::Missing("GEMINI_API_KEY"))
        );
    }

    #[test]
    fn test_refresh_token_wins_over_access_token() {
        let config = AppConfig::from_lookup(lookup(&[
            ("EE_REFRESH_TOKEN", "1//refresh"),
            ("EE_CLIENT_ID", "client.apps.googleusercontent.com"),
            ("EE_CLIENT_SECRET", "shh"),
            ("EE_ACCESS_TOKEN", "ya29.stale"),
            ("GEMINI_API_KEY", "k"),
        ]))
        .unwrap();

        match config.imagery.auth {
            EarthEngineAuth::RefreshToken {
                token_endpoint,
                client_id,
                client_secret,
                refresh_token,
            } => {
                assert_eq!(token_endpoint, DEFAULT_TOKEN_ENDPOINT);
                assert_eq!(client_id, "client.apps.googleusercontent.com");
                assert_eq!(client_secret.expose(), "shh");
                assert_eq!(refresh_token.expose(), "1//refresh");
            }
            other => panic!("unexpected auth: {:?}", other),
        }
    }

    #[test]
    fn test_refresh_token_needs_client() {
        assert_eq!(
            AppConfig::from_lookup(lookup(&[("EE_REFRESH_TOKEN", "r"), ("GEMINI_API_KEY", "k")])),
            Err(ConfigError::Missing("EE_CLIENT_ID"))
        );
        assert_eq!(
            AppConfig::from_lookup(lookup(&[
                ("EE_REFRESH_TOKEN", "r"),
                ("EE_CLIENT_ID", "c"),
                ("GEMINI_API_KEY", "k"),
            ])),
            Err(ConfigError::Missing("EE_CLIENT_SECRET"))
        );
    }

    #[test]
    fn test_stored_credentials_stand_in_for_env() {
        let stored = StoredCredentials::parse(
            r#"{"client_id": "cid", "client_secret": "csecret", "refresh_token": "1//stored", "scopes": []}"#,
        )
        .unwrap();
        let env = lookup(&[("GEMINI_API_KEY", "k")]);

        let config = AppConfig::from_lookup(|key| env(key).or_else(|| stored.get(key))).unwrap();
        assert!(matches!(
            config.imagery.auth,
            EarthEngineAuth::RefreshToken { ref client_id, .. } if client_id == "cid"
        ));
        assert_eq!(stored.get("GEMINI_API_KEY"), None);
    }

    #[test]
    fn test_unreadable_credentials_file_is_empty() {
        let stored = StoredCredentials::load(Path::new("/nonexistent/earthengine/credentials"));
        assert!(stored.get("EE_REFRESH_TOKEN").is_none());
        assert!(StoredCredentials::parse("not json").is_err());
    }

    #[test]
    fn test_google_api_key_fallback_and_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("EE_ACCESS_TOKEN", "t"),
            ("GOOGLE_API_KEY", "fallback"),
            ("EE_API_ENDPOINT", "http://localhost:9000/"),
            ("GEMINI_MODEL", "other-model"),
            ("BASEMAP_TILE_URL", "http://localhost:8080/{z}/{x}/{y}.png"),
        ]))
        .unwrap();

        assert_eq!(config.model.api_key.expose(), "fallback");
        assert_eq!(config.imagery.endpoint, "http://localhost:9000");
        assert_eq!(config.model.model_id, "other-model");
        assert_eq!(config.basemap.url_template, "http://localhost:8080/{z}/{x}/{y}.png");
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("EE_ACCESS_TOKEN", "t"),
            ("GEMINI_API_KEY", "k"),
            ("GEMINI_API_ENDPOINT", "ftp://nope"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GEMINI_API_ENDPOINT", .. }));

        let err = AppConfig::from_lookup(lookup(&[
            ("EE_ACCESS_TOKEN", "t"),
            ("GEMINI_API_KEY", "k"),
            ("BASEMAP_TILE_URL", "https://tiles.example/{z}/{x}.png"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BASEMAP_TILE_URL", .. }));
    }

    #[test]
    fn test_credentials_are_redacted_in_debug() {
        let credential = Credential::new("super-secret");
        assert_eq!(format!("{:?}", credential), "Credential(<redacted>)");
    }
}
