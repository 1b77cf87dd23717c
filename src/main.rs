use clap::Parser;
use radar_core::{Comment, ErrorExt, FilterMode, SearchConfig, SearchRequest};
use search_engine::{SearchOrchestrator, SearchOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "comment_radar=info,search_engine=info,reddit_client=info";
const BODY_PREVIEW_CHARS: usize = 80;

#[derive(Parser)]
#[command(
    name = "comment-radar",
    about = "Search and rank Reddit comments across communities"
)]
struct Opts {
    /// TOML file with search settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// all, keyword, community or author
    #[arg(long, default_value = "all")]
    mode: FilterMode,

    /// Maximum number of comments to print (1-100)
    #[arg(long, default_value_t = 10)]
    limit: usize,

    /// Collection timeout; defaults to the configured value
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long, default_value_t = 0)]
    page: u32,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Words to search for; may be empty
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    let config = SearchConfig::load(opts.config.as_deref()).map_err(|e| {
        e.log_error();
        anyhow::anyhow!(e.user_friendly_message())
    })?;
    let collection_timeout = opts
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(config.collection_timeout);

    tracing::info!(
        "Searching {} communities ({})",
        config.communities.len(),
        if config.has_credentials() {
            "authenticated"
        } else {
            "public endpoints"
        }
    );

    let orchestrator = SearchOrchestrator::from_config(config).map_err(|e| {
        e.log_error();
        anyhow::anyhow!(e.user_friendly_message())
    })?;
    let request = SearchRequest::new(
        opts.query.join(" "),
        opts.mode,
        opts.limit,
        collection_timeout,
        opts.page,
    );

    let outcome = orchestrator.search(&request).await;

    let metrics = orchestrator.source().get_metrics().await;
    tracing::debug!(
        "Upstream requests: {} total, {} ok, {} failed, {} rate limited, avg {:?}",
        metrics.total_requests,
        metrics.successful_requests,
        metrics.failed_requests,
        metrics.rate_limited_requests,
        metrics.average_response_time
    );

    let limiter = orchestrator.source().get_rate_limit_status().await;
    if limiter.is_near_limit() {
        tracing::warn!(
            "Rate limit budget {:.0}% used; further searches this minute may be throttled",
            limiter.utilization_percentage()
        );
    } else {
        tracing::debug!(
            "Rate limit budget: {}/{} tokens left",
            limiter.available_tokens,
            limiter.max_tokens
        );
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_table(&outcome);
    }

    Ok(())
}

fn print_table(outcome: &SearchOutcome) {
    println!(
        "{} comments ({:?}, {} ms)",
        outcome.comments.len(),
        outcome.source,
        outcome.elapsed.as_millis()
    );
    println!(
        "{:>3}  {:>8}  {:>6}  {:<18}  {:<18}  {}",
        "#", "score", "votes", "community", "author", "comment"
    );

    for (index, comment) in outcome.comments.iter().enumerate() {
        println!(
            "{:>3}  {:>8.2}  {:>6}  {:<18}  {:<18}  {}",
            index + 1,
            comment.rank_score.unwrap_or_default(),
            comment.upvote_count,
            truncate(&format!("r/{}", comment.community), 18),
            truncate(&comment.author, 18),
            preview(comment)
        );
    }
}

fn preview(comment: &Comment) -> String {
    let flat = comment.body.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&flat, BODY_PREVIEW_CHARS)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}
