pub mod api;
pub mod extract;
pub mod fetcher;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod token;


pub use api::{RedditApiClient, RequestKind, UpstreamRequest, UpstreamSource};
pub use extract::{extract_comments, extract_post_ids};
pub use fetcher::{BatchFetcher, FanoutSummary};
pub use metrics::{ApiMetrics, MetricsCollector};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use retry::RetryConfig;
pub use token::{Token, TokenManager};
