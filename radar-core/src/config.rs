//! Search configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. Every setting has a safe default, so an empty
//! environment yields a working (unauthenticated) configuration.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const ENV_CLIENT_ID: &str = "REDDIT_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "REDDIT_CLIENT_SECRET";
pub const ENV_USER_AGENT: &str = "REDDIT_USER_AGENT";
pub const ENV_COMMUNITIES: &str = "RADAR_COMMUNITIES";
pub const ENV_CACHE_TTL_SECS: &str = "RADAR_CACHE_TTL_SECS";
pub const ENV_CACHE_CAPACITY: &str = "RADAR_CACHE_CAPACITY";
pub const ENV_COLLECTION_TIMEOUT_MS: &str = "RADAR_COLLECTION_TIMEOUT_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "RADAR_REQUEST_TIMEOUT_MS";
pub const ENV_BATCH_SIZE: &str = "RADAR_BATCH_SIZE";
pub const ENV_ALLOW_UNAUTHENTICATED: &str = "RADAR_ALLOW_UNAUTHENTICATED";

const DEFAULT_COMMUNITIES: [&str; 8] = [
    "programming",
    "rust",
    "golang",
    "python",
    "webdev",
    "technology",
    "learnprogramming",
    "cscareerquestions",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub auth_url: String,
    pub token_url: String,
    pub oauth_api_base: String,
    pub public_api_base: String,
    pub communities: Vec<String>,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub collection_timeout: Duration,
    /// Added to the collection timeout to form the hard upper bound.
    pub safety_grace: Duration,
    pub request_timeout: Duration,
    pub token_safety_margin: Duration,
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub posts_per_community: u32,
    pub listing_sort: String,
    pub listing_timeframe: Option<String>,
    pub thread_comment_limit: u32,
    pub thread_depth: u32,
    pub thread_sort: String,
    pub search_limit: u32,
    pub allow_unauthenticated: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: "comment-radar/0.1".to_string(),
            auth_url: "https://www.reddit.com/api/v1/authorize".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            oauth_api_base: "https://oauth.reddit.com".to_string(),
            public_api_base: "https://www.reddit.com".to_string(),
            communities: DEFAULT_COMMUNITIES.iter().map(|c| c.to_string()).collect(),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 500,
            collection_timeout: Duration::from_millis(8000),
            safety_grace: Duration::from_millis(2000),
            request_timeout: Duration::from_millis(4000),
            token_safety_margin: Duration::from_secs(60),
            batch_size: 3,
            inter_batch_delay: Duration::from_millis(250),
            posts_per_community: 3,
            listing_sort: "hot".to_string(),
            listing_timeframe: None,
            thread_comment_limit: 100,
            thread_depth: 8,
            thread_sort: "top".to_string(),
            search_limit: 50,
            allow_unauthenticated: true,
        }
    }
}

/// On-disk shape; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    client_id: Option<String>,
    client_secret: Option<String>,
    user_agent: Option<String>,
    token_url: Option<String>,
    oauth_api_base: Option<String>,
    public_api_base: Option<String>,
    communities: Option<Vec<String>>,
    cache_ttl_secs: Option<u64>,
    cache_capacity: Option<u64>,
    collection_timeout_ms: Option<u64>,
    safety_grace_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    token_safety_margin_secs: Option<u64>,
    batch_size: Option<usize>,
    inter_batch_delay_ms: Option<u64>,
    posts_per_community: Option<u32>,
    listing_sort: Option<String>,
    listing_timeframe: Option<String>,
    thread_comment_limit: Option<u32>,
    thread_depth: Option<u32>,
    thread_sort: Option<String>,
    search_limit: Option<u32>,
    allow_unauthenticated: Option<bool>,
}

impl SearchConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    })?;
                debug!("Loaded configuration file {}", path.display());
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(contents)?;
        let mut config = Self::default();

        config.client_id = file.client_id.or(config.client_id);
        config.client_secret = file.client_secret.or(config.client_secret);
        if let Some(v) = file.user_agent {
            config.user_agent = v;
        }
        if let Some(v) = file.token_url {
            config.token_url = v;
        }
        if let Some(v) = file.oauth_api_base {
            config.oauth_api_base = v;
        }
        if let Some(v) = file.public_api_base {
            config.public_api_base = v;
        }
        if let Some(v) = file.communities {
            config.communities = v;
        }
        if let Some(v) = file.cache_ttl_secs {
            config.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.cache_capacity {
            config.cache_capacity = v;
        }
        if let Some(v) = file.collection_timeout_ms {
            config.collection_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.safety_grace_ms {
            config.safety_grace = Duration::from_millis(v);
        }
        if let Some(v) = file.request_timeout_ms {
            config.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.token_safety_margin_secs {
            config.token_safety_margin = Duration::from_secs(v);
        }
        if let Some(v) = file.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = file.inter_batch_delay_ms {
            config.inter_batch_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.posts_per_community {
            config.posts_per_community = v;
        }
        if let Some(v) = file.listing_sort {
            config.listing_sort = v;
        }
        config.listing_timeframe = file.listing_timeframe.or(config.listing_timeframe);
        if let Some(v) = file.thread_comment_limit {
            config.thread_comment_limit = v;
        }
        if let Some(v) = file.thread_depth {
            config.thread_depth = v;
        }
        if let Some(v) = file.thread_sort {
            config.thread_sort = v;
        }
        if let Some(v) = file.search_limit {
            config.search_limit = v;
        }
        if let Some(v) = file.allow_unauthenticated {
            config.allow_unauthenticated = v;
        }

        Ok(config)
    }

    /// Overrides from environment-style variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty(ENV_CLIENT_ID) {
            self.client_id = Some(v);
        }
        if let Some(v) = non_empty(ENV_CLIENT_SECRET) {
            self.client_secret = Some(v);
        }
        if let Some(v) = non_empty(ENV_USER_AGENT) {
            self.user_agent = v;
        }
        if let Some(v) = non_empty(ENV_COMMUNITIES) {
            self.communities = v
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = non_empty(ENV_CACHE_TTL_SECS) {
            self.cache_ttl = Duration::from_secs(parse_value(ENV_CACHE_TTL_SECS, &v)?);
        }
        if let Some(v) = non_empty(ENV_CACHE_CAPACITY) {
            self.cache_capacity = parse_value(ENV_CACHE_CAPACITY, &v)?;
        }
        if let Some(v) = non_empty(ENV_COLLECTION_TIMEOUT_MS) {
            self.collection_timeout =
                Duration::from_millis(parse_value(ENV_COLLECTION_TIMEOUT_MS, &v)?);
        }
        if let Some(v) = non_empty(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout = Duration::from_millis(parse_value(ENV_REQUEST_TIMEOUT_MS, &v)?);
        }
        if let Some(v) = non_empty(ENV_BATCH_SIZE) {
            self.batch_size = parse_value(ENV_BATCH_SIZE, &v)?;
        }
        if let Some(v) = non_empty(ENV_ALLOW_UNAUTHENTICATED) {
            self.allow_unauthenticated = parse_value(ENV_ALLOW_UNAUTHENTICATED, &v)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "batch_size must be at least 1".to_string(),
            });
        }
        if self.posts_per_community == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "posts_per_community must be at least 1".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed {
                reason: "request_timeout must be greater than zero".to_string(),
            });
        }
        if self.communities.is_empty() {
            return Err(ConfigError::MissingField {
                field: "communities".to_string(),
            });
        }
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

fn parse_value<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.has_credentials());
        assert_eq!(config.batch_size, 3);
        assert!(config.request_timeout < config.collection_timeout);
    }

    #[test]
    fn test_toml_overrides() {
        let config = SearchConfig::from_toml_str(
            r#"
            client_id = "abc"
            client_secret = "shh"
            communities = ["rust", "golang"]
            cache_ttl_secs = 60
            collection_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert!(config.has_credentials());
        assert_eq!(config.communities, vec!["rust", "golang"]);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.collection_timeout, Duration::from_millis(1500));
        assert_eq!(config.batch_size, 3);
    }

    #[test]
    fn test_unknown_toml_key_is_rejected() {
        let result = SearchConfig::from_toml_str("batch = 4");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_CLIENT_ID, "id"),
            (ENV_CLIENT_SECRET, "secret"),
            (ENV_COMMUNITIES, "rust, golang ,,python"),
            (ENV_BATCH_SIZE, "5"),
            (ENV_ALLOW_UNAUTHENTICATED, "false"),
        ]);

        let mut config = SearchConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.client_id.as_deref(), Some("id"));
        assert_eq!(config.communities, vec!["rust", "golang", "python"]);
        assert_eq!(config.batch_size, 5);
        assert!(!config.allow_unauthenticated);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = SearchConfig::default();
        let result = config.apply_env(|key| {
            (key == ENV_CACHE_TTL_SECS).then(|| "five minutes".to_string())
        });

        match result {
            Err(ConfigError::InvalidValue { field, value }) => {
                assert_eq!(field, ENV_CACHE_TTL_SECS);
                assert_eq!(value, "five minutes");
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_failures() {
        let config = SearchConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));

        let config = SearchConfig {
            communities: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { .. })
        ));
    }
}
