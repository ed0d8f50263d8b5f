/// Earth Engine access tokens
///
/// A refresh-token source trades the refresh token for an access token at the
/// OAuth endpoint and keeps it until shortly before it expires. A fixed
/// access token is handed out until the service rejects it.

use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::imagery::{service_error_message, FetchError};
use crate::config::{Credential, EarthEngineAuth};

/// Tokens this close to expiry are refreshed before use
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn usable_at(&self, now: Instant) -> bool {
        now + EXPIRY_MARGIN < self.expires_at
    }
}

/// Hands out bearer tokens for Earth Engine requests
pub struct AccessTokens {
    client: reqwest::Client,
    auth: EarthEngineAuth,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokens {
    pub fn new(client: reqwest::Client, auth: EarthEngineAuth) -> Self {
        Self {
            client,
            auth,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, refreshing it first when needed
    pub async fn bearer(&self) -> Result<String, FetchError> {
        let (token_endpoint, client_id, client_secret, refresh_token) = match &self.auth {
            EarthEngineAuth::AccessToken(token) => return Ok(token.expose().to_string()),
            EarthEngineAuth::RefreshToken {
                token_endpoint,
                client_id,
                client_secret,
                refresh_token,
            } => (token_endpoint, client_id, client_secret, refresh_token),
        };

        // Held across the refresh so concurrent callers wait for one exchange
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.usable_at(Instant::now())) {
            return Ok(token.token.clone());
        }

        let token = self
            .exchange(token_endpoint, client_id, client_secret, refresh_token)
            .await?;
        *cached = Some(token.clone());
        Ok(token.token)
    }

    /// Forget the cached token after the service answered 401
    pub async fn rejected(&self) {
        match &self.auth {
            EarthEngineAuth::AccessToken(_) => tracing::warn!(
                "Earth Engine rejected EE_ACCESS_TOKEN; access tokens expire after about an hour. \
                 Restart with a fresh token or configure EE_REFRESH_TOKEN"
            ),
            EarthEngineAuth::RefreshToken { .. } => {
                tracing::info!("Earth Engine rejected the access token, refreshing on next request");
                *self.cached.lock().await = None;
            }
        }
    }

    async fn exchange(
        &self,
        token_endpoint: &str,
        client_id: &str,
        client_secret: &Credential,
        refresh_token: &Credential,
    ) -> Result<CachedToken, FetchError> {
        let response = self
            .client
            .post(token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id),
                ("client_secret", client_secret.expose()),
                ("refresh_token", refresh_token.expose()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        let token = read_token_response(status, &body, Instant::now())?;
        tracing::debug!("refreshed Earth Engine access token");
        Ok(token)
    }
}

fn read_token_response(
    status: reqwest::StatusCode,
    body: &[u8],
    now: Instant,
) -> Result<CachedToken, FetchError> {
    if !status.is_success() {
        return Err(FetchError::Auth(format!(
            "token endpoint returned HTTP {}: {}",
            status.as_u16(),
            token_error_message(body)
        )));
    }

    let response: TokenResponse = serde_json::from_slice(body)
        .map_err(|err| FetchError::Auth(format!("unreadable token response: {}", err)))?;
    let lifetime = response
        .expires_in
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_LIFETIME);

    Ok(CachedToken {
        token: response.access_token,
        expires_at: now + lifetime,
    })
}

/// OAuth errors use `error_description`; fall back to the Google API shape
fn token_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error_description"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| service_error_message(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn refresh_auth() -> EarthEngineAuth {
        EarthEngineAuth::RefreshToken {
            token_endpoint: "http://127.0.0.1:9/token".to_string(),
            client_id: "cid".to_string(),
            client_secret: Credential::new("secret"),
            refresh_token: Credential::new("1//refresh"),
        }
    }

    #[tokio::test]
    async fn test_fixed_token_is_returned_as_is() {
        let tokens = AccessTokens::new(
            reqwest::Client::new(),
            EarthEngineAuth::AccessToken(Credential::new("ya29.fixed")),
        );
        assert_eq!(tokens.bearer().await.unwrap(), "ya29.fixed");
        tokens.rejected().await;
        assert_eq!(tokens.bearer().await.unwrap(), "ya29.fixed");
    }

    #[tokio::test]
    async fn test_cached_token_is_reused_until_rejected() {
        let tokens = AccessTokens::new(reqwest::Client::new(), refresh_auth());
        *tokens.cached.lock().await = Some(CachedToken {
            token: "ya29.cached".to_string(),
            expires_at: Instant::now() + Duration::from_secs(1800),
        });

        assert_eq!(tokens.bearer().await.unwrap(), "ya29.cached");

        tokens.rejected().await;
        assert!(tokens.cached.lock().await.is_none());
    }

    #[test]
    fn test_token_near_expiry_is_not_usable() {
        let now = Instant::now();
        let token = CachedToken {
            token: "t".to_string(),
            expires_at: now + Duration::from_secs(30),
        };
        assert!(!token.usable_at(now));

        let fresh = CachedToken {
            token: "t".to_string(),
            expires_at: now + Duration::from_secs(120),
        };
        assert!(fresh.usable_at(now));
    }

    #[test]
    fn test_token_response_sets_expiry() {
        let now = Instant::now();
        let token = read_token_response(
            StatusCode::OK,
            br#"{"access_token": "ya29.new", "expires_in": 3599, "token_type": "Bearer"}"#,
            now,
        )
        .unwrap();
        assert_eq!(token.token, "ya29.new");
        assert_eq!(token.expires_at, now + Duration::from_secs(3599));

        let no_expiry = read_token_response(StatusCode::OK, br#"{"access_token": "t"}"#, now).unwrap();
        assert_eq!(no_expiry.expires_at, now + DEFAULT_LIFETIME);
    }

    #[test]
    fn test_token_errors_carry_oauth_description() {
        let body = br#"{"error": "invalid_grant", "error_description": "Token has been expired or revoked."}"#;
        match read_token_response(StatusCode::BAD_REQUEST, body, Instant::now()) {
            Err(FetchError::Auth(message)) => {
                assert_eq!(message, "token endpoint returned HTTP 400: Token has been expired or revoked.");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(matches!(
            read_token_response(StatusCode::OK, b"<html>", Instant::now()),
            Err(FetchError::Auth(_))
        ));
    }
}
