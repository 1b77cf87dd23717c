//! OAuth bearer token lifecycle.
//!
//! The manager holds at most one application-only token obtained through the
//! client-credentials grant. Reads are shared; refreshes are serialized so
//! that callers racing on an expired token trigger a single exchange.

use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, TokenResponse, TokenUrl,
};
use radar_core::{ConfigError, CoreError, RedditApiError, SearchConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Lifetime assumed when the auth endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub expires_at: SystemTime,
}

impl Token {
    /// Builds a token whose expiry already has the safety margin removed.
    /// The margin never exceeds half of the server-granted lifetime.
    pub fn new(value: String, lifetime: Duration, safety_margin: Duration) -> Self {
        let margin = safety_margin.min(lifetime / 2);
        Self {
            value,
            expires_at: SystemTime::now() + lifetime.saturating_sub(margin),
        }
    }

    pub fn is_valid(&self) -> bool {
        SystemTime::now() < self.expires_at
    }
}

#[derive(Debug)]
pub struct TokenManager {
    oauth_client: Option<BasicClient>,
    http_client: Client,
    safety_margin: Duration,
    token: RwLock<Option<Token>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(config: &SearchConfig, http_client: Client) -> Result<Self, CoreError> {
        let oauth_client = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => {
                let auth_url = AuthUrl::new(config.auth_url.clone()).map_err(|_| {
                    ConfigError::InvalidValue {
                        field: "auth_url".to_string(),
                        value: config.auth_url.clone(),
                    }
                })?;
                let token_url = TokenUrl::new(config.token_url.clone()).map_err(|_| {
                    ConfigError::InvalidValue {
                        field: "token_url".to_string(),
                        value: config.token_url.clone(),
                    }
                })?;

                Some(BasicClient::new(
                    ClientId::new(id.clone()),
                    Some(ClientSecret::new(secret.clone())),
                    auth_url,
                    Some(token_url),
                ))
            }
            _ => {
                debug!("No Reddit client credentials configured");
                None
            }
        };

        Ok(Self {
            oauth_client,
            http_client,
            safety_margin: config.token_safety_margin,
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.oauth_client.is_some()
    }

    /// The held token if it is still valid. Never touches the network.
    pub async fn cached_token(&self) -> Option<Token> {
        self.token
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_valid())
            .cloned()
    }

    /// Returns a valid token, exchanging credentials when none is held or
    /// the held one has expired.
    pub async fn get_token(&self) -> Result<Token, CoreError> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let token = self.exchange().await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    /// One search cycle's worth of authentication: the first exchange plus
    /// at most one retry.
    pub async fn ensure_token(&self) -> Result<Token, CoreError> {
        match self.get_token().await {
            Ok(token) => Ok(token),
            Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })) => {
                warn!("Token exchange failed ({}), retrying once", reason);
                self.get_token().await
            }
            Err(e) => Err(e),
        }
    }

    /// Drops the held token so the next `get_token` refreshes. Called when
    /// the upstream answers 401.
    pub async fn invalidate(&self) {
        let mut token = self.token.write().await;
        if token.take().is_some() {
            info!("Invalidated Reddit access token after authorization failure");
        }
    }

    pub async fn set_token(&self, token: Token) {
        *self.token.write().await = Some(token);
    }

    async fn exchange(&self) -> Result<Token, CoreError> {
        let client = self
            .oauth_client
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "client_id/client_secret".to_string(),
            })?;

        debug!("Requesting application-only Reddit token");
        let http_client = self.http_client.clone();
        let response = client
            .exchange_client_credentials()
            .request_async(|request| send_oauth_request(http_client, request))
            .await
            .map_err(|e| {
                CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                    reason: e.to_string(),
                })
            })?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let token = Token::new(
            response.access_token().secret().to_string(),
            lifetime,
            self.safety_margin,
        );

        info!("Obtained Reddit access token valid for {:?}", lifetime);
        Ok(token)
    }
}

/// Sends the token exchange through the shared client so the configured
/// user agent and timeouts apply to it as well.
async fn send_oauth_request(
    client: Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let response = client
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(config: &SearchConfig) -> TokenManager {
        TokenManager::new(config, Client::new()).unwrap()
    }

    #[test]
    fn test_token_expiry_includes_safety_margin() {
        let token = Token::new(
            "abc".to_string(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        let remaining = token
            .expires_at
            .duration_since(SystemTime::now())
            .unwrap_or_default();

        assert!(token.is_valid());
        assert!(remaining <= Duration::from_secs(3540));
        assert!(remaining > Duration::from_secs(3500));
    }

    #[test]
    fn test_short_lived_token_keeps_half_its_lifetime() {
        let token = Token::new(
            "abc".to_string(),
            Duration::from_secs(60),
            Duration::from_secs(600),
        );
        assert!(token.is_valid());
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let manager = manager(&SearchConfig::default());
        assert!(!manager.has_credentials());

        let result = manager.get_token().await;
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::MissingField { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cached_token_and_invalidation() {
        let manager = manager(&SearchConfig::default());
        assert!(manager.cached_token().await.is_none());

        let token = Token::new(
            "held".to_string(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        manager.set_token(token.clone()).await;

        // A valid held token is served without any credentials configured
        assert_eq!(manager.get_token().await.unwrap(), token);

        manager.invalidate().await;
        assert!(manager.cached_token().await.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_not_served() {
        let manager = manager(&SearchConfig::default());
        manager
            .set_token(Token {
                value: "stale".to_string(),
                expires_at: SystemTime::now() - Duration::from_secs(1),
            })
            .await;

        assert!(manager.cached_token().await.is_none());
        assert!(manager.get_token().await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_auth_endpoint_fails_authentication() {
        let config = SearchConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            token_url: "http://127.0.0.1:9/api/v1/access_token".to_string(),
            ..Default::default()
        };
        let manager = manager(&config);

        let result = manager.ensure_token().await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(
                RedditApiError::AuthenticationFailed { .. }
            ))
        ));
    }
}
