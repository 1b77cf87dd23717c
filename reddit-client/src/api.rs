use crate::metrics::{ApiMetrics, MetricsCollector, RequestMetrics};
use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use crate::token::TokenManager;
use radar_core::{ConfigError, CoreError, RedditApiError, SearchConfig};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// Retry-After assumed when a 429 carries no usable header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Listing { community: String },
    Thread { community: String, post_id: String },
    Search,
}

impl RequestKind {
    pub fn family(&self) -> &'static str {
        match self {
            RequestKind::Listing { .. } => "listing",
            RequestKind::Thread { .. } => "thread",
            RequestKind::Search => "search",
        }
    }
}

/// A single GET against the upstream, relative to whichever host serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub kind: RequestKind,
    pub endpoint: String,
    pub params: Vec<(String, String)>,
}

impl UpstreamRequest {
    pub fn listing(community: &str, sort: &str, limit: u32, timeframe: Option<&str>) -> Self {
        let mut params = vec![("limit".to_string(), limit.to_string())];
        if let Some(t) = timeframe {
            params.push(("t".to_string(), t.to_string()));
        }

        Self {
            kind: RequestKind::Listing {
                community: community.to_string(),
            },
            endpoint: format!("/r/{}/{}.json", community, sort),
            params,
        }
    }

    pub fn thread(community: &str, post_id: &str, limit: u32, depth: u32, sort: &str) -> Self {
        Self {
            kind: RequestKind::Thread {
                community: community.to_string(),
                post_id: post_id.to_string(),
            },
            endpoint: format!("/r/{}/comments/{}.json", community, post_id),
            params: vec![
                ("limit".to_string(), limit.to_string()),
                ("depth".to_string(), depth.to_string()),
                ("sort".to_string(), sort.to_string()),
            ],
        }
    }

    pub fn search(query: &str, limit: u32) -> Self {
        Self {
            kind: RequestKind::Search,
            endpoint: "/search.json".to_string(),
            params: vec![
                ("q".to_string(), query.to_string()),
                ("type".to_string(), "comment".to_string()),
                ("sort".to_string(), "relevance".to_string()),
                ("limit".to_string(), limit.to_string()),
            ],
        }
    }

    /// Short human-readable name used in logs.
    pub fn label(&self) -> String {
        match &self.kind {
            RequestKind::Listing { community } => format!("r/{} listing", community),
            RequestKind::Thread { community, post_id } => {
                format!("r/{} thread {}", community, post_id)
            }
            RequestKind::Search => "full-text search".to_string(),
        }
    }

    pub fn community(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::Listing { community } | RequestKind::Thread { community, .. } => {
                Some(community)
            }
            RequestKind::Search => None,
        }
    }
}

/// Where comments come from. The HTTP client is the production source;
/// tests substitute in-memory ones.
pub trait UpstreamSource: Send + Sync + 'static {
    /// Called once per search before any fetch.
    fn prepare(&self) -> impl Future<Output = Result<(), CoreError>> + Send {
        async { Ok(()) }
    }

    fn fetch_json(
        &self,
        request: &UpstreamRequest,
    ) -> impl Future<Output = Result<Value, CoreError>> + Send;
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    token_manager: Arc<TokenManager>,
    rate_limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    oauth_base: Url,
    public_base: Url,
    request_timeout: Duration,
}

impl RedditApiClient {
    pub fn new(config: &SearchConfig) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .build()?;

        let token_manager = Arc::new(TokenManager::new(config, http_client.clone())?);
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::reddit_oauth()));
        let metrics = Arc::new(MetricsCollector::new());

        Ok(Self {
            http_client,
            token_manager,
            rate_limiter,
            metrics,
            oauth_base: parse_base("oauth_api_base", &config.oauth_api_base)?,
            public_base: parse_base("public_api_base", &config.public_api_base)?,
            request_timeout: config.request_timeout,
        })
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.token_manager
    }

    fn build_url(&self, base: &Url, request: &UpstreamRequest) -> Result<Url, CoreError> {
        let mut url = base.join(&request.endpoint).map_err(|e| {
            CoreError::InvalidInput {
                message: format!("invalid endpoint {}: {}", request.endpoint, e),
            }
        })?;
        url.query_pairs_mut()
            .extend_pairs(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .append_pair("raw_json", "1");
        Ok(url)
    }

    /// Sends the request, attaching the held bearer token when there is one
    /// and falling back to the public host otherwise.
    pub async fn make_request(&self, request: &UpstreamRequest) -> Result<Response, CoreError> {
        let token = self.token_manager.cached_token().await;
        let base = if token.is_some() {
            &self.oauth_base
        } else {
            &self.public_base
        };
        let url = self.build_url(base, request)?;

        let _permit = self.rate_limiter.acquire_permit().await?;
        debug!("Acquired rate limit permit for {}", request.label());

        let mut request_builder = self
            .http_client
            .get(url.clone())
            .timeout(self.request_timeout);
        if let Some(token) = &token {
            request_builder = request_builder.bearer_auth(&token.value);
        }

        let start_time = Instant::now();
        debug!("Making Reddit API request: GET {}", url.path());
        let outcome = request_builder.send().await;
        let response_time = start_time.elapsed();

        let result = match outcome {
            Ok(response) => self.classify(request, response).await,
            Err(e) => {
                error!("Network error for {}: {}", request.label(), e);
                if e.is_timeout() {
                    Err(CoreError::RedditApi(RedditApiError::RequestTimeout))
                } else {
                    Err(CoreError::Network(e))
                }
            }
        };

        self.metrics
            .record_request(RequestMetrics {
                endpoint: request.kind.family().to_string(),
                status_code: match &result {
                    Ok(response) => Some(response.status().as_u16()),
                    Err(e) => status_of(e),
                },
                response_time,
                success: result.is_ok(),
                rate_limited: matches!(&result, Err(e) if e.is_rate_limited()),
                error_type: result.as_ref().err().map(error_type),
            })
            .await;

        result
    }

    async fn classify(
        &self,
        request: &UpstreamRequest,
        response: Response,
    ) -> Result<Response, CoreError> {
        let status = response.status();
        if status.is_success() {
            debug!("Request successful: {} for {}", status, request.label());
            return Ok(response);
        }

        warn!("Request failed with status: {} for {}", status, request.label());

        let error = match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                warn!("Rate limited, retry after {} seconds", retry_after);
                RedditApiError::RateLimitExceeded { retry_after }
            }
            StatusCode::UNAUTHORIZED => {
                self.token_manager.invalidate().await;
                RedditApiError::InvalidToken
            }
            StatusCode::FORBIDDEN => RedditApiError::Forbidden {
                resource: request.endpoint.clone(),
            },
            StatusCode::NOT_FOUND => match &request.kind {
                RequestKind::Listing { community } => RedditApiError::SubredditNotFound {
                    subreddit: community.clone(),
                },
                _ => RedditApiError::InvalidResponse {
                    details: "Resource not found".to_string(),
                },
            },
            s if s.is_server_error() => RedditApiError::ServerError {
                status_code: s.as_u16(),
            },
            s => RedditApiError::EndpointUnavailable {
                endpoint: request.endpoint.clone(),
                status_code: s.as_u16(),
            },
        };

        Err(CoreError::RedditApi(error))
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.get_rate_limit_status().await
    }
}

impl UpstreamSource for RedditApiClient {
    async fn prepare(&self) -> Result<(), CoreError> {
        let token = self.token_manager.ensure_token().await?;
        debug!("Using Reddit token expiring at {:?}", token.expires_at);
        Ok(())
    }

    async fn fetch_json(&self, request: &UpstreamRequest) -> Result<Value, CoreError> {
        let response = self.make_request(request).await?;

        let json: Value = response.json().await.map_err(|e| {
            error!("Failed to parse response for {}: {}", request.label(), e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse {}", request.label()),
            })
        })?;

        info!("Fetched {}", request.label());
        Ok(json)
    }
}

fn parse_base(field: &str, value: &str) -> Result<Url, CoreError> {
    Url::parse(value).map_err(|_| {
        CoreError::Config(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        })
    })
}

fn status_of(error: &CoreError) -> Option<u16> {
    match error {
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { .. }) => Some(429),
        CoreError::RedditApi(RedditApiError::InvalidToken) => Some(401),
        CoreError::RedditApi(RedditApiError::Forbidden { .. }) => Some(403),
        CoreError::RedditApi(RedditApiError::SubredditNotFound { .. }) => Some(404),
        CoreError::RedditApi(RedditApiError::ServerError { status_code })
        | CoreError::RedditApi(RedditApiError::EndpointUnavailable { status_code, .. }) => {
            Some(*status_code)
        }
        _ => None,
    }
}

fn error_type(error: &CoreError) -> String {
    match error {
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { .. }) => "rate_limited",
        CoreError::RedditApi(RedditApiError::InvalidToken) => "unauthorized",
        CoreError::RedditApi(RedditApiError::Forbidden { .. }) => "forbidden",
        CoreError::RedditApi(RedditApiError::SubredditNotFound { .. }) => "not_found",
        CoreError::RedditApi(RedditApiError::ServerError { .. }) => "server_error",
        CoreError::RedditApi(RedditApiError::RequestTimeout) => "timeout",
        CoreError::Network(_) => "network_error",
        _ => "other",
    }
    .to_string()
}
