//! One search, end to end.
//!
//! Cache lookup, token check, a two-stage fan-out running in its own task,
//! a deadline-bounded collect, scoring, and the cache write. Whenever live
//! retrieval produces nothing the fallback pool is scored instead.

use crate::cache::{CacheKey, ResultCache};
use crate::fallback::fallback_comments;
use crate::scoring::{community_name, ParsedQuery, ScoringEngine};
use radar_core::{
    report_source_failure, Comment, CoreError, ErrorExt, FilterMode, SearchConfig, SearchRequest,
};
use reddit_client::{
    extract_comments, extract_post_ids, BatchFetcher, FanoutSummary, RedditApiClient,
    RequestKind, RetryConfig, UpstreamRequest, UpstreamSource,
};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{sleep_until, timeout_at};
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Listings carry stickied and comment-less posts that get skipped.
const LISTING_SLACK: usize = 2;
const MAX_LISTING_LIMIT: usize = 100;
/// Stand-in deadline for collection timeouts too large to add to an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Cache,
    Live,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub search_id: Uuid,
    pub source: ResultSource,
    pub comments: Vec<Comment>,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectEnd {
    /// Every fetch finished before the deadline.
    Complete,
    /// The collection timeout fired first.
    Deadline,
    /// The safety bound fired; should not happen in practice.
    SafetyBound,
}

/// The requests of one search: stage one is fixed up front, stage two is
/// derived from the listings stage one returns.
#[derive(Debug, Clone)]
struct FanoutPlan {
    stage_one: Vec<UpstreamRequest>,
    skip: usize,
    take: usize,
    thread_limit: u32,
    thread_depth: u32,
    thread_sort: String,
}

impl FanoutPlan {
    fn build(config: &SearchConfig, request: &SearchRequest) -> Self {
        let take = config.posts_per_community as usize;
        let skip = request.page() as usize * take;
        let listing_limit = (skip + take + LISTING_SLACK).min(MAX_LISTING_LIMIT) as u32;
        let query = request.query().trim();

        let communities: Vec<String> = match request.filter_mode() {
            FilterMode::Community if !query.is_empty() => {
                vec![community_name(query).to_lowercase()]
            }
            _ => config.communities.clone(),
        };

        let mut stage_one = Vec::new();

        // Full-text search has no page cursor here, so only the first page uses it
        if request.page() == 0 && !query.is_empty() {
            match request.filter_mode() {
                FilterMode::All | FilterMode::Keyword
                    if !ParsedQuery::parse(query).is_empty() =>
                {
                    stage_one.push(UpstreamRequest::search(query, config.search_limit));
                }
                FilterMode::Author => {
                    stage_one.push(UpstreamRequest::search(
                        &format!("author:{}", query),
                        config.search_limit,
                    ));
                }
                _ => {}
            }
        }

        stage_one.extend(
            communities
                .iter()
                .filter(|community| is_valid_community(community))
                .map(|community| {
                    UpstreamRequest::listing(
                        community,
                        &config.listing_sort,
                        listing_limit,
                        config.listing_timeframe.as_deref(),
                    )
                }),
        );

        Self {
            stage_one,
            skip,
            take,
            thread_limit: config.thread_comment_limit,
            thread_depth: config.thread_depth,
            thread_sort: config.thread_sort.clone(),
        }
    }

    fn thread(&self, community: &str, post_id: &str) -> UpstreamRequest {
        UpstreamRequest::thread(
            community,
            post_id,
            self.thread_limit,
            self.thread_depth,
            &self.thread_sort,
        )
    }
}

fn is_valid_community(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 21
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub struct SearchOrchestrator<S: UpstreamSource> {
    source: Arc<S>,
    config: Arc<SearchConfig>,
    cache: ResultCache,
    scoring: ScoringEngine,
}

impl SearchOrchestrator<RedditApiClient> {
    /// Orchestrator over the live Reddit API.
    pub fn from_config(config: SearchConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let client = RedditApiClient::new(&config)?;
        Ok(Self::new(Arc::new(client), config))
    }
}

impl<S: UpstreamSource> SearchOrchestrator<S> {
    pub fn new(source: Arc<S>, config: SearchConfig) -> Self {
        let cache = ResultCache::new(config.cache_ttl, config.cache_capacity);
        Self {
            source,
            config: Arc::new(config),
            cache,
            scoring: ScoringEngine::default(),
        }
    }

    pub fn with_scoring(mut self, scoring: ScoringEngine) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Ranked comments for the query, at most `result_limit` of them.
    ///
    /// Never fails: upstream problems degrade to fewer live results or, when
    /// nothing at all was collected, to the scored fallback pool.
    pub async fn search_comments(
        &self,
        query: &str,
        filter_mode: FilterMode,
        result_limit: usize,
        collection_timeout_ms: u64,
        page: u32,
    ) -> Vec<Comment> {
        let request = SearchRequest::new(
            query,
            filter_mode,
            result_limit,
            Duration::from_millis(collection_timeout_ms),
            page,
        );
        self.search(&request).await.comments
    }

    /// Same as `search_comments`, also reporting where the results came from.
    pub async fn search(&self, request: &SearchRequest) -> SearchOutcome {
        let search_id = Uuid::new_v4();
        let span = info_span!(
            "search",
            id = %search_id,
            mode = %request.filter_mode(),
            page = request.page()
        );

        self.run(search_id, request).instrument(span).await
    }

    async fn run(&self, search_id: Uuid, request: &SearchRequest) -> SearchOutcome {
        let started = Instant::now();
        let key = CacheKey::new(request.query(), request.filter_mode(), request.page());

        if let Some(cached) = self.cache.get(&key) {
            info!("Cache hit with {} comments", cached.len());
            return self.outcome(search_id, ResultSource::Cache, cached, request, started);
        }

        // Both deadlines count from the start of the call, token step included
        let primary = deadline_after(started, request.collection_timeout());
        let safety = deadline_after(primary, self.config.safety_grace);

        let prepared = match timeout_at(safety.into(), self.source.prepare()).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout {
                millis: (safety - started).as_millis() as u64,
            }),
        };
        if let Err(e) = prepared {
            if !self.config.allow_unauthenticated {
                e.log_warn();
                return self.fallback(search_id, request, started);
            }
            if e.is_unauthorized() || matches!(e, CoreError::Config(_)) {
                debug!("Continuing unauthenticated: {}", e);
            } else {
                warn!("Continuing unauthenticated after token failure: {}", e);
            }
        }

        let collected = self.collect(request, primary, safety).await;
        if collected.is_empty() {
            info!("Live retrieval produced no comments");
            return self.fallback(search_id, request, started);
        }

        let ranked = self.scoring.rank(collected, request);
        self.cache.put(key, ranked.clone());
        self.outcome(search_id, ResultSource::Live, ranked, request, started)
    }

    /// Runs the fan-out in a background task and gathers what arrives before
    /// the primary deadline. Fetches still in flight are left to finish on
    /// their own; their results are discarded.
    async fn collect(
        &self,
        request: &SearchRequest,
        primary: Instant,
        safety: Instant,
    ) -> Vec<Comment> {
        let plan = FanoutPlan::build(&self.config, request);
        if plan.stage_one.is_empty() {
            debug!("Nothing to fetch for this query");
            return Vec::new();
        }

        let window = primary.saturating_duration_since(Instant::now());
        let fetcher = BatchFetcher::new(
            self.config.batch_size,
            self.config.inter_batch_delay,
            self.config.request_timeout,
            RetryConfig::reddit().within_window(window),
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Comment>>();
        let fanout = run_fanout(Arc::clone(&self.source), fetcher, plan, tx);
        // Detached: the task winds down once the receiver is gone
        tokio::spawn(fanout.instrument(Span::current()));

        let mut collected: Vec<Comment> = Vec::new();
        let gather = async {
            let deadline = sleep_until(primary.into());
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut deadline => break CollectEnd::Deadline,
                    batch = rx.recv() => match batch {
                        Some(comments) => collected.extend(comments),
                        None => break CollectEnd::Complete,
                    },
                }
            }
        };

        let end = timeout_at(safety.into(), gather)
            .await
            .unwrap_or(CollectEnd::SafetyBound);

        // Anything already delivered when the deadline fired still counts
        while let Ok(comments) = rx.try_recv() {
            collected.extend(comments);
        }
        drop(rx);

        match end {
            CollectEnd::Complete => debug!("Fan-out completed within {:?}", window),
            CollectEnd::Deadline => info!(
                "Collection timeout of {:?} reached with {} comments",
                request.collection_timeout(),
                collected.len()
            ),
            CollectEnd::SafetyBound => warn!(
                "Safety bound of {:?} reached",
                request.collection_timeout() + self.config.safety_grace
            ),
        }

        collected
    }

    /// Scores the fallback pool under the request's own filter rules.
    fn fallback(&self, search_id: Uuid, request: &SearchRequest, started: Instant) -> SearchOutcome {
        let mut ranked = self.scoring.rank(fallback_comments(), request);

        // Free text has no inclusion rule beyond a positive score, so an
        // unmatched query falls back to the recency ordering of the pool
        if ranked.is_empty() && request.filter_mode() == FilterMode::All {
            let unfiltered = SearchRequest::new(
                "",
                FilterMode::All,
                request.result_limit(),
                request.collection_timeout(),
                request.page(),
            );
            ranked = self.scoring.rank(fallback_comments(), &unfiltered);
        }

        warn!("Serving {} fallback comments", ranked.len());
        self.outcome(search_id, ResultSource::Fallback, ranked, request, started)
    }

    fn outcome(
        &self,
        search_id: Uuid,
        source: ResultSource,
        mut comments: Vec<Comment>,
        request: &SearchRequest,
        started: Instant,
    ) -> SearchOutcome {
        comments.truncate(request.result_limit());
        let elapsed = started.elapsed();
        info!(
            "Returning {} comments from {:?} in {:?}",
            comments.len(),
            source,
            elapsed
        );

        SearchOutcome {
            search_id,
            source,
            comments,
            elapsed,
        }
    }
}

fn deadline_after(from: Instant, after: Duration) -> Instant {
    from.checked_add(after).unwrap_or_else(|| from + FAR_FUTURE)
}

/// Both fan-out stages. Extracted comments go to the collector as soon as
/// each response is parsed.
async fn run_fanout<S: UpstreamSource>(
    source: Arc<S>,
    fetcher: BatchFetcher,
    plan: FanoutPlan,
    tx: UnboundedSender<Vec<Comment>>,
) -> FanoutSummary {
    let mut threads: Vec<UpstreamRequest> = Vec::new();

    let mut summary = fetcher
        .fetch_batched(source.as_ref(), plan.stage_one.clone(), |request, result| {
            let json = match result {
                Ok(json) => json,
                Err(e) => {
                    report_source_failure(&request.label(), &e);
                    return keep_going(&tx);
                }
            };

            match &request.kind {
                RequestKind::Listing { community } => {
                    let post_ids = extract_post_ids(&json, plan.skip, plan.take);
                    debug!("{} selected {} posts", request.label(), post_ids.len());
                    threads.extend(post_ids.iter().map(|id| plan.thread(community, id)));
                    keep_going(&tx)
                }
                _ => forward(&tx, request, extract_comments(&json, request.community())),
            }
        })
        .await;

    if !summary.stopped_early && !tx.is_closed() && !threads.is_empty() {
        let stage_two = fetcher
            .fetch_batched(source.as_ref(), threads, |request, result| match result {
                Ok(json) => forward(&tx, request, extract_comments(&json, request.community())),
                Err(e) => {
                    report_source_failure(&request.label(), &e);
                    keep_going(&tx)
                }
            })
            .await;
        summary.merge(&stage_two);
    }

    info!(
        "Fan-out finished: {} requested, {} succeeded, {} failed, {} rate limited, {} timed out, {} retried{}",
        summary.requested,
        summary.succeeded,
        summary.failed,
        summary.rate_limited,
        summary.timed_out,
        summary.retried,
        if summary.stopped_early { ", stopped early" } else { "" }
    );
    summary
}

fn keep_going(tx: &UnboundedSender<Vec<Comment>>) -> ControlFlow<()> {
    if tx.is_closed() {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

fn forward(
    tx: &UnboundedSender<Vec<Comment>>,
    request: &UpstreamRequest,
    comments: Vec<Comment>,
) -> ControlFlow<()> {
    if comments.is_empty() {
        return keep_going(tx);
    }

    debug!("{} yielded {} comments", request.label(), comments.len());
    match tx.send(comments) {
        Ok(()) => ControlFlow::Continue(()),
        Err(_) => {
            debug!("Collector is gone, stopping fan-out");
            ControlFlow::Break(())
        }
    }
}
