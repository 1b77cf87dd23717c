use crate::error::*;
use tracing::{error, warn};

/// Logging and presentation helpers shared by the pipeline and the CLI.
pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    /// Short stable code used in log lines.
    fn error_code(&self) -> &'static str;
    /// One line suitable for a terminal user.
    fn user_friendly_message(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("{} [{}]", self, self.error_code());
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("{} [{}]", self, self.error_code());
        self
    }

    fn error_code(&self) -> &'static str {
        match self {
            CoreError::RedditApi(e) => reddit_error_code(e),
            CoreError::Config(e) => e.error_code(),
            CoreError::Io(_) => "IO",
            CoreError::Serialization(_) => "SERIALIZATION",
            CoreError::Network(e) if e.is_timeout() => "NETWORK_TIMEOUT",
            CoreError::Network(_) => "NETWORK",
            CoreError::InvalidInput { .. } => "INVALID_INPUT",
            CoreError::Timeout { .. } => "TIMEOUT",
            CoreError::Internal { .. } => "INTERNAL",
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. }) => {
                "Reddit rejected the app credentials. Check REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET."
                    .to_string()
            }
            CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after }) => format!(
                "Reddit is rate limiting this client. Wait {} seconds before searching again.",
                retry_after
            ),
            CoreError::RedditApi(_) => {
                "Reddit did not answer as expected. Results may be incomplete.".to_string()
            }
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Could not reach Reddit. Check the network connection.".to_string()
            }
            CoreError::Timeout { millis } => {
                format!("Reddit did not answer within {} ms.", millis)
            }
            CoreError::InvalidInput { message } => format!("Invalid input: {}", message),
            _ => format!("Search failed: {}", self),
        }
    }
}

fn reddit_error_code(error: &RedditApiError) -> &'static str {
    match error {
        RedditApiError::AuthenticationFailed { .. } => "REDDIT_AUTH_FAILED",
        RedditApiError::RateLimitExceeded { .. } => "REDDIT_RATE_LIMIT",
        RedditApiError::Forbidden { .. } => "REDDIT_FORBIDDEN",
        RedditApiError::SubredditNotFound { .. } => "REDDIT_SUBREDDIT_NOT_FOUND",
        RedditApiError::InvalidToken => "REDDIT_INVALID_TOKEN",
        RedditApiError::EndpointUnavailable { .. } => "REDDIT_ENDPOINT_UNAVAILABLE",
        RedditApiError::RequestTimeout => "REDDIT_TIMEOUT",
        RedditApiError::InvalidResponse { .. } => "REDDIT_INVALID_RESPONSE",
        RedditApiError::ServerError { .. } => "REDDIT_SERVER_ERROR",
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("{} [{}]", self, self.error_code());
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("{} [{}]", self, self.error_code());
        self
    }

    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND",
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD",
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED",
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Config file '{}' does not exist.", path)
            }
            ConfigError::MissingField { field } => {
                format!("Setting '{}' is required.", field)
            }
            ConfigError::InvalidValue { field, value } => {
                format!("Setting '{}' cannot be '{}'.", field, value)
            }
            ConfigError::ValidationFailed { reason } => format!("Invalid settings: {}", reason),
            ConfigError::Parse(e) => format!("Config file is not valid TOML: {}", e.message()),
        }
    }
}

/// Logs a fan-out source that failed. The search carries on without it, so
/// this is a warning.
pub fn report_source_failure(source: &str, error: &CoreError) {
    warn!(
        "Source {} contributed no comments ({}): {}",
        source,
        error.error_code(),
        error
    );
}
