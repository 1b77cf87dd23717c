use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const MIN_RESULT_LIMIT: usize = 1;
pub const MAX_RESULT_LIMIT: usize = 100;

const DELETED_SENTINELS: [&str; 2] = ["[deleted]", "[removed]"];
const MODERATION_BOTS: [&str; 1] = ["automoderator"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub body: String,
    pub community: String,
    pub upvote_count: i64,
    pub award_count: u32,
    pub created_at: DateTime<Utc>,
    pub permalink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub match_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rank_score: Option<f64>,
}

impl Comment {
    /// Whether the comment may appear in a result set at all: every text
    /// field is present and neither body nor author is a removal marker or
    /// a moderation bot.
    pub fn is_displayable(&self) -> bool {
        !self.id.is_empty()
            && !self.community.trim().is_empty()
            && is_displayable_body(&self.body)
            && is_displayable_author(&self.author)
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.created_at).num_seconds().max(0);
        seconds as f64 / 3600.0
    }
}

pub fn is_displayable_body(body: &str) -> bool {
    let trimmed = body.trim();
    !trimmed.is_empty() && !DELETED_SENTINELS.contains(&trimmed)
}

pub fn is_displayable_author(author: &str) -> bool {
    let trimmed = author.trim();
    if trimmed.is_empty() || DELETED_SENTINELS.contains(&trimmed) {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !MODERATION_BOTS.contains(&lowered.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    All,
    Keyword,
    Community,
    Author,
}

impl FilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::All => "all",
            FilterMode::Keyword => "keyword",
            FilterMode::Community => "community",
            FilterMode::Author => "author",
        }
    }

    /// Community and author filters rank by votes instead of text relevance.
    pub fn uses_text_scoring(&self) -> bool {
        matches!(self, FilterMode::All | FilterMode::Keyword)
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(FilterMode::All),
            "keyword" => Ok(FilterMode::Keyword),
            "community" | "subreddit" => Ok(FilterMode::Community),
            "author" => Ok(FilterMode::Author),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown filter mode '{}'", other),
            }),
        }
    }
}

/// One search, fixed for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    query: String,
    filter_mode: FilterMode,
    result_limit: usize,
    collection_timeout: Duration,
    page: u32,
}

impl SearchRequest {
    pub fn new(
        query: impl Into<String>,
        filter_mode: FilterMode,
        result_limit: usize,
        collection_timeout: Duration,
        page: u32,
    ) -> Self {
        Self {
            query: query.into(),
            filter_mode,
            result_limit: result_limit.clamp(MIN_RESULT_LIMIT, MAX_RESULT_LIMIT),
            collection_timeout,
            page,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.filter_mode
    }

    pub fn result_limit(&self) -> usize {
        self.result_limit
    }

    pub fn collection_timeout(&self) -> Duration {
        self.collection_timeout
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    /// Lower-cased query with runs of whitespace collapsed.
    pub fn normalized_query(&self) -> String {
        normalize_query(&self.query)
    }

    pub fn has_query(&self) -> bool {
        !self.query.trim().is_empty()
    }
}

pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
