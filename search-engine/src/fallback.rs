use chrono::{Duration, Utc};
use radar_core::Comment;

struct Seed {
    community: &'static str,
    author: &'static str,
    body: &'static str,
    upvotes: i64,
    awards: u32,
    hours_ago: i64,
}

const SEEDS: [Seed; 10] = [
    Seed {
        community: "programming",
        author: "dev_marisol",
        body: "Boring code is a feature. Six months from now nobody, including you, will remember the clever trick, but everyone will have to debug it.",
        upvotes: 412,
        awards: 3,
        hours_ago: 5,
    },
    Seed {
        community: "rust",
        author: "ferris_fan",
        body: "The borrow checker stopped feeling like a fight once I started designing data ownership up front instead of sprinkling clones until it compiled.",
        upvotes: 389,
        awards: 2,
        hours_ago: 9,
    },
    Seed {
        community: "golang",
        author: "gopher_ken",
        body: "Go's standard library is the real selling point. net/http, encoding/json and testing cover most services without pulling in a single dependency.",
        upvotes: 276,
        awards: 1,
        hours_ago: 14,
    },
    Seed {
        community: "programming",
        author: "polyglot_pat",
        body: "We rewrote a hot path from Go to Rust and cut p99 latency in half, but honestly most of the win came from fixing the allocation pattern, not the language.",
        upvotes: 530,
        awards: 4,
        hours_ago: 20,
    },
    Seed {
        community: "python",
        author: "snake_charmer",
        body: "Type hints plus a strict checker in CI caught more bugs in our Python codebase than the last year of code review did.",
        upvotes: 198,
        awards: 0,
        hours_ago: 30,
    },
    Seed {
        community: "webdev",
        author: "css_whisperer",
        body: "Before reaching for a new frontend framework, measure. Most slow pages I audit are shipping megabytes of unused JavaScript and unoptimized images.",
        upvotes: 254,
        awards: 1,
        hours_ago: 7,
    },
    Seed {
        community: "technology",
        author: "circuit_sage",
        body: "Every product announcement is AI-first now, yet the features people actually use are search that works and sync that doesn't lose data.",
        upvotes: 167,
        awards: 0,
        hours_ago: 40,
    },
    Seed {
        community: "learnprogramming",
        author: "patient_mentor",
        body: "Build something small that you will actually use. Finishing a tiny project teaches more than starting five tutorials.",
        upvotes: 621,
        awards: 5,
        hours_ago: 60,
    },
    Seed {
        community: "rust",
        author: "async_ada",
        body: "Tokio's select! is great until you forget that the losing branches get dropped. Make sure every future you race is cancellation safe.",
        upvotes: 143,
        awards: 1,
        hours_ago: 3,
    },
    Seed {
        community: "golang",
        author: "chan_surfer",
        body: "Goroutines are cheap, but unbounded ones are not. A buffered channel used as a semaphore keeps fan-out from melting the upstream API.",
        upvotes: 221,
        awards: 2,
        hours_ago: 12,
    },
];

/// A small fixed pool of comments served when live retrieval yields
/// nothing. Timestamps are relative to the call so age scoring behaves the
/// same as for live data.
pub fn fallback_comments() -> Vec<Comment> {
    let now = Utc::now();

    SEEDS
        .iter()
        .enumerate()
        .map(|(index, seed)| Comment {
            id: format!("fallback_{:02}", index + 1),
            author: seed.author.to_string(),
            body: seed.body.to_string(),
            community: seed.community.to_string(),
            upvote_count: seed.upvotes,
            award_count: seed.awards,
            created_at: now - Duration::hours(seed.hours_ago),
            permalink: None,
            match_score: None,
            rank_score: None,
        })
        .collect()
}
