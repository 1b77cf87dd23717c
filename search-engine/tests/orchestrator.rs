use radar_core::{Comment, CoreError, FilterMode, RedditApiError, SearchConfig, SearchRequest};
use reddit_client::{UpstreamRequest, UpstreamSource};
use search_engine::scoring::term_variations;
use search_engine::{fallback_comments, ResultSource, ScoringEngine, SearchOrchestrator};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
enum Route {
    Json(Value),
    Delay(Duration, Value),
    Error(u16),
    /// 429 for the first `times` calls, then the payload.
    Limited { times: usize, then: Value },
}

struct FakeSource {
    routes: HashMap<String, Route>,
    fallback_route: Route,
    fail_prepare: bool,
    prepare_delay: Option<Duration>,
    calls: AtomicUsize,
    per_endpoint: Mutex<HashMap<String, usize>>,
}

impl FakeSource {
    fn new(routes: Vec<(&str, Route)>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|(endpoint, route)| (endpoint.to_string(), route))
                .collect(),
            fallback_route: Route::Error(404),
            fail_prepare: false,
            prepare_delay: None,
            calls: AtomicUsize::new(0),
            per_endpoint: Mutex::new(HashMap::new()),
        }
    }

    fn everything(route: Route) -> Self {
        let mut source = Self::new(vec![]);
        source.fallback_route = route;
        source
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn calls_to(&self, endpoint: &str) -> usize {
        self.per_endpoint
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }
}

impl UpstreamSource for FakeSource {
    async fn prepare(&self) -> Result<(), CoreError> {
        if let Some(delay) = self.prepare_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_prepare {
            return Err(CoreError::RedditApi(
                RedditApiError::AuthenticationFailed {
                    reason: "rejected".to_string(),
                },
            ));
        }
        Ok(())
    }

    async fn fetch_json(&self, request: &UpstreamRequest) -> Result<Value, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let call = {
            let mut per_endpoint = self.per_endpoint.lock().unwrap();
            let count = per_endpoint.entry(request.endpoint.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let route = self
            .routes
            .get(&request.endpoint)
            .cloned()
            .unwrap_or_else(|| self.fallback_route.clone());

        match route {
            Route::Json(value) => Ok(value),
            Route::Delay(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Route::Error(status_code) => Err(CoreError::RedditApi(RedditApiError::ServerError {
                status_code,
            })),
            Route::Limited { times, .. } if call <= times => Err(CoreError::RedditApi(
                RedditApiError::RateLimitExceeded { retry_after: 0 },
            )),
            Route::Limited { then, .. } => Ok(then),
        }
    }
}

fn listing(post_ids: &[&str]) -> Value {
    let children: Vec<Value> = post_ids
        .iter()
        .map(|id| json!({"kind": "t3", "data": {"id": id, "num_comments": 10}}))
        .collect();
    json!({"kind": "Listing", "data": {"children": children}})
}

fn comment_node(id: &str, community: &str, body: &str, score: i64) -> Value {
    json!({
        "kind": "t1",
        "data": {
            "id": id,
            "author": format!("user_{}", id),
            "body": body,
            "subreddit": community,
            "score": score,
            "created_utc": 1_700_000_000.0,
            "replies": ""
        }
    })
}

fn thread(community: &str, comments: Vec<Value>) -> Value {
    json!([
        {"kind": "Listing", "data": {"children": [
            {"kind": "t3", "data": {"id": "post", "subreddit": community}}
        ]}},
        {"kind": "Listing", "data": {"children": comments}}
    ])
}

/// Ten comments with mixed overlap against "rust go".
fn varied_thread(community: &str) -> Value {
    let comments = (0..10)
        .map(|i| {
            let body = match i % 4 {
                0 => "rust borrow checker saved me today",
                1 => "go routines everywhere in this service",
                2 => "rust and go side by side in production",
                _ => "unrelated chatter about lunch",
            };
            comment_node(&format!("{}_{}", community, i), community, body, 10 + i)
        })
        .collect();
    thread(community, comments)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("search_engine=debug,reddit_client=debug")
        .try_init();
}

fn test_config(communities: &[&str]) -> SearchConfig {
    SearchConfig {
        communities: communities.iter().map(|c| c.to_string()).collect(),
        posts_per_community: 1,
        inter_batch_delay: Duration::from_millis(0),
        request_timeout: Duration::from_millis(300),
        safety_grace: Duration::from_millis(200),
        ..Default::default()
    }
}

fn ids(comments: &[Comment]) -> Vec<&str> {
    comments.iter().map(|c| c.id.as_str()).collect()
}

fn assert_unique(comments: &[Comment]) {
    let unique: HashSet<&str> = comments.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(unique.len(), comments.len(), "duplicate ids in {:?}", ids(comments));
}

fn assert_sorted(comments: &[Comment]) {
    for pair in comments.windows(2) {
        let (a, b) = (pair[0].rank_score.unwrap(), pair[1].rank_score.unwrap());
        assert!(
            a > b || (a == b && pair[0].upvote_count >= pair[1].upvote_count),
            "results out of order: {:?}",
            ids(comments)
        );
    }
}

#[tokio::test]
async fn test_rust_go_with_one_slow_community() {
    init_tracing();
    let source = Arc::new(FakeSource::new(vec![
        ("/search.json", Route::Error(500)),
        ("/r/rust/hot.json", Route::Json(listing(&["r1"]))),
        ("/r/rust/comments/r1.json", Route::Json(varied_thread("rust"))),
        ("/r/golang/hot.json", Route::Json(listing(&["g1"]))),
        ("/r/golang/comments/g1.json", Route::Json(varied_thread("golang"))),
        (
            "/r/slowsub/hot.json",
            Route::Delay(Duration::from_secs(2), listing(&["s1"])),
        ),
        (
            "/r/slowsub/comments/s1.json",
            Route::Json(varied_thread("slowsub")),
        ),
    ]));
    let orchestrator =
        SearchOrchestrator::new(source.clone(), test_config(&["rust", "golang", "slowsub"]));

    let request = SearchRequest::new("rust go", FilterMode::All, 5, Duration::from_secs(3), 0);
    let outcome = orchestrator.search(&request).await;

    assert_eq!(outcome.source, ResultSource::Live);
    assert_eq!(outcome.comments.len(), 5);
    assert_unique(&outcome.comments);
    assert_sorted(&outcome.comments);
    assert!(outcome
        .comments
        .iter()
        .all(|c| c.community == "rust" || c.community == "golang"));
    assert_eq!(source.calls_to("/r/slowsub/comments/s1.json"), 0);
}

#[tokio::test]
async fn test_community_mode_only_returns_that_community() {
    let comments = vec![
        comment_node("p1", "programming", "first take", 5),
        comment_node("p2", "Programming", "second take", 50),
        comment_node("x1", "rust", "crossposted", 500),
        comment_node("p3", "programming", "third take", 20),
    ];
    let source = Arc::new(FakeSource::new(vec![
        ("/r/programming/hot.json", Route::Json(listing(&["p"]))),
        (
            "/r/programming/comments/p.json",
            Route::Json(thread("programming", comments)),
        ),
    ]));
    let orchestrator = SearchOrchestrator::new(source.clone(), test_config(&["rust", "golang"]));

    let results = orchestrator
        .search_comments("programming", FilterMode::Community, 10, 2000, 0)
        .await;

    assert_eq!(ids(&results), vec!["p2", "p3", "p1"]);
    assert!(results
        .iter()
        .all(|c| c.community.eq_ignore_ascii_case("programming")));
    assert!(results
        .iter()
        .all(|c| c.rank_score == Some(c.upvote_count as f64)));
    assert_eq!(source.calls_to("/r/rust/hot.json"), 0);
}

#[tokio::test]
async fn test_all_sources_failing_serves_scored_fallback() {
    let source = Arc::new(FakeSource::everything(Route::Error(500)));
    let orchestrator =
        SearchOrchestrator::new(source, test_config(&["rust", "golang", "python"]));

    let request = SearchRequest::new("rust", FilterMode::All, 10, Duration::from_secs(2), 0);
    let outcome = orchestrator.search(&request).await;

    let expected = ScoringEngine::default().rank(fallback_comments(), &request);
    assert_eq!(outcome.source, ResultSource::Fallback);
    assert!(!outcome.comments.is_empty());
    assert_eq!(ids(&outcome.comments), ids(&expected));

    // Fallback results are never cached
    let again = orchestrator.search(&request).await;
    assert_eq!(again.source, ResultSource::Fallback);
}

#[tokio::test]
async fn test_fallback_keeps_keyword_rule() {
    let source = Arc::new(FakeSource::everything(Route::Error(503)));
    let orchestrator = SearchOrchestrator::new(source, test_config(&["rust", "golang"]));

    let request = SearchRequest::new("borrow", FilterMode::Keyword, 5, Duration::from_millis(500), 0);
    let outcome = orchestrator.search(&request).await;
    assert_eq!(outcome.source, ResultSource::Fallback);
    assert!(!outcome.comments.is_empty());
    let variations = term_variations("borrow");
    for comment in &outcome.comments {
        let body = comment.body.to_lowercase();
        assert!(
            variations.iter().any(|v| body.contains(v.as_str())),
            "{} has no variation of the query",
            comment.id
        );
    }

    // Nothing in the pool mentions it, so nothing is served
    let unmatched = SearchRequest::new("zzyzx", FilterMode::Keyword, 5, Duration::from_millis(500), 0);
    let outcome = orchestrator.search(&unmatched).await;
    assert_eq!(outcome.source, ResultSource::Fallback);
    assert!(outcome.comments.is_empty());
}

#[tokio::test]
async fn test_fallback_keeps_community_rule() {
    let source = Arc::new(FakeSource::everything(Route::Error(500)));
    let orchestrator = SearchOrchestrator::new(source, test_config(&["rust"]));

    let results = orchestrator
        .search_comments("r/rust", FilterMode::Community, 5, 500, 0)
        .await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|c| c.community == "rust"));

    let results = orchestrator
        .search_comments("haskell", FilterMode::Community, 5, 500, 0)
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_unmatched_free_text_fallback_is_ordered_by_recency() {
    let source = Arc::new(FakeSource::everything(Route::Error(503)));
    let orchestrator = SearchOrchestrator::new(source, test_config(&["rust"]));

    let results = orchestrator
        .search_comments("zzyzx", FilterMode::All, 3, 500, 0)
        .await;
    assert_eq!(results.len(), 3);
    assert_sorted(&results);
}

#[tokio::test]
async fn test_slow_token_step_is_bounded() {
    let mut fake = FakeSource::everything(Route::Json(listing(&[])));
    fake.prepare_delay = Some(Duration::from_secs(3));
    let source = Arc::new(fake);
    let config = test_config(&["rust"]);
    let bound = config.safety_grace + Duration::from_millis(500);
    let orchestrator = SearchOrchestrator::new(source, config);

    let started = Instant::now();
    let outcome = orchestrator
        .search(&SearchRequest::new("rust", FilterMode::All, 5, Duration::ZERO, 0))
        .await;

    assert!(started.elapsed() < bound, "took {:?}", started.elapsed());
    assert_eq!(outcome.source, ResultSource::Fallback);
}

#[tokio::test]
async fn test_slow_token_step_without_public_access_falls_back() {
    let mut fake = FakeSource::everything(Route::Json(listing(&["r1"])));
    fake.prepare_delay = Some(Duration::from_secs(3));
    let source = Arc::new(fake);
    let mut config = test_config(&["rust"]);
    config.allow_unauthenticated = false;
    let orchestrator = SearchOrchestrator::new(source.clone(), config);

    let started = Instant::now();
    let outcome = orchestrator
        .search(&SearchRequest::new("rust", FilterMode::All, 5, Duration::from_millis(100), 0))
        .await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(outcome.source, ResultSource::Fallback);
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_zero_timeout_returns_fallback_within_bound() {
    init_tracing();
    let source = Arc::new(FakeSource::everything(Route::Delay(
        Duration::from_secs(5),
        listing(&["late"]),
    )));
    let config = test_config(&["rust", "golang", "python"]);
    let bound = config.safety_grace + Duration::from_millis(500);
    let orchestrator = SearchOrchestrator::new(source, config);

    let started = Instant::now();
    let outcome = orchestrator
        .search(&SearchRequest::new(
            "rust",
            FilterMode::All,
            5,
            Duration::ZERO,
            0,
        ))
        .await;

    assert!(started.elapsed() < bound);
    assert_eq!(outcome.source, ResultSource::Fallback);
    assert!(!outcome.comments.is_empty());
}

#[tokio::test]
async fn test_cache_serves_repeat_and_smaller_limit() {
    let source = Arc::new(FakeSource::new(vec![
        ("/search.json", Route::Error(500)),
        ("/r/rust/hot.json", Route::Json(listing(&["r1"]))),
        ("/r/rust/comments/r1.json", Route::Json(varied_thread("rust"))),
    ]));
    let orchestrator = SearchOrchestrator::new(source.clone(), test_config(&["rust"]));

    let first = orchestrator
        .search(&SearchRequest::new("rust", FilterMode::Keyword, 10, Duration::from_secs(2), 0))
        .await;
    assert_eq!(first.source, ResultSource::Live);
    let calls_after_first = source.calls();

    let repeat = orchestrator
        .search(&SearchRequest::new("  RUST ", FilterMode::Keyword, 10, Duration::from_secs(2), 0))
        .await;
    assert_eq!(repeat.source, ResultSource::Cache);
    assert_eq!(ids(&repeat.comments), ids(&first.comments));

    let smaller = orchestrator
        .search(&SearchRequest::new("rust", FilterMode::Keyword, 2, Duration::from_secs(2), 0))
        .await;
    assert_eq!(smaller.source, ResultSource::Cache);
    assert_eq!(ids(&smaller.comments), ids(&first.comments)[..2].to_vec());

    assert_eq!(source.calls(), calls_after_first);
}

#[tokio::test]
async fn test_duplicate_comments_across_sources_are_merged() {
    let shared = vec![
        comment_node("dup", "rust", "rust everywhere", 40),
        comment_node("own", "rust", "rust only here", 10),
    ];
    let source = Arc::new(FakeSource::new(vec![
        ("/search.json", Route::Json(thread("rust", shared.clone())[1].clone())),
        ("/r/rust/hot.json", Route::Json(listing(&["a", "b"]))),
        ("/r/rust/comments/a.json", Route::Json(thread("rust", shared.clone()))),
        ("/r/rust/comments/b.json", Route::Json(thread("rust", shared))),
    ]));
    let mut config = test_config(&["rust"]);
    config.posts_per_community = 2;
    let orchestrator = SearchOrchestrator::new(source, config);

    let results = orchestrator
        .search_comments("rust", FilterMode::All, 50, 2000, 0)
        .await;

    assert_eq!(results.len(), 2);
    assert_unique(&results);
}

#[tokio::test]
async fn test_keyword_results_contain_a_term_variation() {
    let comments = vec![
        comment_node("a", "rust", "I keep borrowing from the standard library", 3),
        comment_node("b", "rust", "The borrow checker is strict", 8),
        comment_node("c", "rust", "Lifetimes are confusing", 30),
        comment_node("d", "rust", "Nothing to see", 1),
    ];
    let source = Arc::new(FakeSource::new(vec![
        ("/search.json", Route::Error(500)),
        ("/r/rust/hot.json", Route::Json(listing(&["r1"]))),
        ("/r/rust/comments/r1.json", Route::Json(thread("rust", comments))),
    ]));
    let orchestrator = SearchOrchestrator::new(source, test_config(&["rust"]));

    let results = orchestrator
        .search_comments("borrow", FilterMode::Keyword, 10, 2000, 0)
        .await;

    let variations = term_variations("borrow");
    assert_eq!(results.len(), 2);
    for comment in &results {
        let body = comment.body.to_lowercase();
        assert!(variations.iter().any(|v| body.contains(v.as_str())));
    }
}

#[tokio::test]
async fn test_rate_limited_listing_is_retried() {
    let source = Arc::new(FakeSource::new(vec![
        ("/search.json", Route::Error(500)),
        (
            "/r/rust/hot.json",
            Route::Limited {
                times: 1,
                then: listing(&["r1"]),
            },
        ),
        ("/r/rust/comments/r1.json", Route::Json(varied_thread("rust"))),
    ]));
    let orchestrator = SearchOrchestrator::new(source.clone(), test_config(&["rust"]));

    let outcome = orchestrator
        .search(&SearchRequest::new("rust", FilterMode::All, 5, Duration::from_secs(3), 0))
        .await;

    assert_eq!(outcome.source, ResultSource::Live);
    assert_eq!(source.calls_to("/r/rust/hot.json"), 2);
    assert!(!outcome.comments.is_empty());
}

#[tokio::test]
async fn test_auth_failure_without_public_access_falls_back() {
    let mut fake = FakeSource::everything(Route::Json(listing(&[])));
    fake.fail_prepare = true;
    let source = Arc::new(fake);

    let mut config = test_config(&["rust"]);
    config.allow_unauthenticated = false;
    let orchestrator = SearchOrchestrator::new(source.clone(), config);

    let outcome = orchestrator
        .search(&SearchRequest::new("rust", FilterMode::All, 5, Duration::from_secs(1), 0))
        .await;

    assert_eq!(outcome.source, ResultSource::Fallback);
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_live_data_without_matches_is_empty_not_fallback() {
    let comments = vec![comment_node("a", "rust", "completely unrelated text", 3)];
    let source = Arc::new(FakeSource::new(vec![
        ("/search.json", Route::Json(json!({"kind": "Listing", "data": {"children": []}}))),
        ("/r/rust/hot.json", Route::Json(listing(&["r1"]))),
        ("/r/rust/comments/r1.json", Route::Json(thread("rust", comments))),
    ]));
    let orchestrator = SearchOrchestrator::new(source, test_config(&["rust"]));

    let outcome = orchestrator
        .search(&SearchRequest::new("haskell", FilterMode::Keyword, 5, Duration::from_secs(2), 0))
        .await;

    assert_eq!(outcome.source, ResultSource::Live);
    assert!(outcome.comments.is_empty());
}
