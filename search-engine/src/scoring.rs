//! Relevance scoring and ranking.
//!
//! Free-text modes score the comment body against a parsed query whose
//! terms are expanded into a few naive variations (plural toggles and
//! common affixes). Community and author modes bypass text scoring and
//! rank by votes.

use chrono::{DateTime, Utc};
use radar_core::{normalize_query, Comment, FilterMode, SearchRequest};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Terms (and variations) shorter than this are ignored.
pub const MIN_TERM_LEN: usize = 2;

const PREFIXES: [&str; 2] = ["re", "un"];
const SUFFIXES: [&str; 2] = ["ing", "ed"];

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringWeights {
    /// Per whole-word occurrence of any variation.
    pub exact: f64,
    /// Flat bonus per variation found anywhere in the text.
    pub partial: f64,
    /// Applied to the signed `ln(1 + |upvotes|)`.
    pub upvotes: f64,
    pub awards: f64,
    /// Applied to `ln(1 + body length)`.
    pub length: f64,
    /// Per hour of age; negative so newer comments rank higher.
    pub age: f64,
    pub max_age_hours: f64,
    /// Divided by the smallest token distance between two distinct terms.
    pub proximity: f64,
    /// Per hour of age when the query is empty.
    pub recency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            exact: 10.0,
            partial: 3.0,
            upvotes: 1.5,
            awards: 2.0,
            length: 0.5,
            age: -0.005,
            max_age_hours: 720.0,
            proximity: 5.0,
            recency: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub term: String,
    pub variations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    normalized: String,
    terms: Vec<QueryTerm>,
}

impl ParsedQuery {
    pub fn parse(query: &str) -> Self {
        let normalized = normalize_query(query);
        let mut seen = HashSet::new();

        let terms = normalized
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|word| word.chars().count() >= MIN_TERM_LEN)
            .filter(|word| seen.insert(word.to_string()))
            .map(|word| QueryTerm {
                term: word.to_string(),
                variations: term_variations(word),
            })
            .collect();

        Self { normalized, terms }
    }

    /// Lower-cased query with whitespace collapsed, before term filtering.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    /// True when nothing usable for text scoring survived parsing.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Literal term plus naive inflections, in a stable order without
/// duplicates.
pub fn term_variations(term: &str) -> Vec<String> {
    let term = term.to_lowercase();
    let mut variations = vec![term.clone()];

    // Plural and singular
    if let Some(stem) = term.strip_suffix("ies") {
        variations.push(format!("{}y", stem));
    } else if let Some(stem) = term.strip_suffix("es") {
        variations.push(stem.to_string());
        variations.push(format!("{}e", stem));
    } else if let Some(stem) = term.strip_suffix('s').filter(|_| !term.ends_with("ss")) {
        variations.push(stem.to_string());
    } else if let Some(stem) = term
        .strip_suffix('y')
        .filter(|stem| !stem.ends_with(['a', 'e', 'i', 'o', 'u']))
    {
        variations.push(format!("{}ies", stem));
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|end| term.ends_with(end)) {
        variations.push(format!("{}es", term));
    } else {
        variations.push(format!("{}s", term));
    }

    for prefix in PREFIXES {
        match term.strip_prefix(prefix) {
            Some(rest) if rest.len() >= MIN_TERM_LEN + 1 => variations.push(rest.to_string()),
            _ => variations.push(format!("{}{}", prefix, term)),
        }
    }

    for suffix in SUFFIXES {
        match term.strip_suffix(suffix) {
            Some(rest) if rest.len() >= MIN_TERM_LEN + 1 => variations.push(rest.to_string()),
            _ => variations.push(format!("{}{}", term, suffix)),
        }
    }

    let mut seen = HashSet::new();
    variations.retain(|v| v.chars().count() >= MIN_TERM_LEN && seen.insert(v.clone()));
    variations
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn signed_ln(value: i64) -> f64 {
    let magnitude = (value.unsigned_abs() as f64).ln_1p();
    if value < 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Strips the optional `r/` prefix users type in front of community names.
pub(crate) fn community_name(query: &str) -> &str {
    let trimmed = query.trim();
    trimmed
        .strip_prefix("/r/")
        .or_else(|| trimmed.strip_prefix("r/"))
        .unwrap_or(trimmed)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    /// Text relevance alone (term matches plus proximity).
    pub relevance: f64,
    /// The value results are ordered by.
    pub total: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct TextMatch {
    exact: usize,
    partial: usize,
    proximity: Option<usize>,
}

impl TextMatch {
    fn is_hit(&self) -> bool {
        self.exact > 0 || self.partial > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score of `comment` under `mode`, or 0.0 when it would be excluded.
    pub fn score(&self, comment: &Comment, query: &ParsedQuery, mode: FilterMode) -> f64 {
        self.score_at(comment, query, mode, Utc::now())
    }

    pub fn score_at(
        &self,
        comment: &Comment,
        query: &ParsedQuery,
        mode: FilterMode,
        now: DateTime<Utc>,
    ) -> f64 {
        self.evaluate(comment, query, mode, now)
            .map_or(0.0, |score| score.total)
    }

    /// Applies the inclusion rule for `mode` and scores what passes.
    pub fn evaluate(
        &self,
        comment: &Comment,
        query: &ParsedQuery,
        mode: FilterMode,
        now: DateTime<Utc>,
    ) -> Option<ScoreBreakdown> {
        let raw = query.normalized();
        let votes = comment.upvote_count as f64;

        match mode {
            _ if raw.is_empty() => Some(self.recency_score(comment, now)),
            FilterMode::Community => community_name(&comment.community)
                .eq_ignore_ascii_case(community_name(raw))
                .then_some(ScoreBreakdown {
                    relevance: 1.0,
                    total: votes,
                }),
            FilterMode::Author => comment
                .author
                .to_lowercase()
                .contains(raw)
                .then_some(ScoreBreakdown {
                    relevance: 1.0,
                    total: votes,
                }),
            _ if query.is_empty() => Some(self.recency_score(comment, now)),
            FilterMode::All | FilterMode::Keyword => {
                let body = self.match_text(&comment.body, query);
                let metadata = if mode == FilterMode::All {
                    self.metadata_hits(comment, query)
                } else {
                    0
                };
                if !body.is_hit() && metadata == 0 {
                    return None;
                }

                let relevance = body.exact as f64 * self.weights.exact
                    + (body.partial + metadata) as f64 * self.weights.partial
                    + body
                        .proximity
                        .map_or(0.0, |distance| self.weights.proximity / distance as f64);

                let age = comment.age_hours(now).min(self.weights.max_age_hours);
                let total = relevance
                    + signed_ln(comment.upvote_count) * self.weights.upvotes
                    + comment.award_count as f64 * self.weights.awards
                    + (comment.body.chars().count() as f64).ln_1p() * self.weights.length
                    + age * self.weights.age;

                (total > 0.0).then_some(ScoreBreakdown { relevance, total })
            }
        }
    }

    fn recency_score(&self, comment: &Comment, now: DateTime<Utc>) -> ScoreBreakdown {
        ScoreBreakdown {
            relevance: 0.0,
            total: comment.upvote_count as f64 - comment.age_hours(now) * self.weights.recency,
        }
    }

    fn match_text(&self, text: &str, query: &ParsedQuery) -> TextMatch {
        let lowered = text.to_lowercase();
        let tokens = tokenize(&lowered);
        let mut result = TextMatch::default();

        // Term index for every token position that matches one
        let mut positions: Vec<(usize, usize)> = Vec::new();

        for (term_index, term) in query.terms().iter().enumerate() {
            let variations: HashSet<&str> = term.variations.iter().map(String::as_str).collect();

            result.partial += term
                .variations
                .iter()
                .filter(|v| lowered.contains(v.as_str()))
                .count();

            for (position, token) in tokens.iter().enumerate() {
                if variations.contains(token.as_str()) {
                    result.exact += 1;
                    positions.push((position, term_index));
                }
            }
        }

        if query.terms().len() > 1 {
            result.proximity = closest_distinct_terms(positions);
        }
        result
    }

    fn metadata_hits(&self, comment: &Comment, query: &ParsedQuery) -> usize {
        let community = comment.community.to_lowercase();
        let author = comment.author.to_lowercase();

        query
            .terms()
            .iter()
            .filter(|term| {
                term.variations
                    .iter()
                    .any(|v| community.contains(v.as_str()) || author.contains(v.as_str()))
            })
            .count()
    }

    /// Filters, deduplicates, scores and orders `comments` for `request`.
    /// The first occurrence of an id wins.
    pub fn rank(&self, comments: Vec<Comment>, request: &SearchRequest) -> Vec<Comment> {
        self.rank_at(comments, request, Utc::now())
    }

    pub fn rank_at(
        &self,
        comments: Vec<Comment>,
        request: &SearchRequest,
        now: DateTime<Utc>,
    ) -> Vec<Comment> {
        let query = ParsedQuery::parse(request.query());
        let mode = request.filter_mode();
        let mut seen = HashSet::new();

        let mut ranked: Vec<Comment> = comments
            .into_iter()
            .filter(Comment::is_displayable)
            .filter_map(|mut comment| {
                let score = self.evaluate(&comment, &query, mode, now)?;
                comment.match_score = Some(score.relevance);
                comment.rank_score = Some(score.total);
                Some(comment)
            })
            .filter(|comment| seen.insert(comment.id.clone()))
            .collect();

        ranked.sort_by(compare_ranked);
        ranked
    }
}

/// Smallest gap between two matches of different terms.
fn closest_distinct_terms(mut positions: Vec<(usize, usize)>) -> Option<usize> {
    positions.sort_unstable();

    let mut last_seen: HashMap<usize, usize> = HashMap::new();
    let mut best: Option<usize> = None;

    for (position, term) in positions {
        for (&other, &other_position) in &last_seen {
            if other != term {
                let distance = (position - other_position).max(1);
                best = Some(best.map_or(distance, |b| b.min(distance)));
            }
        }
        last_seen.insert(term, position);
    }

    best
}

fn compare_ranked(a: &Comment, b: &Comment) -> Ordering {
    let a_score = a.rank_score.unwrap_or(f64::NEG_INFINITY);
    let b_score = b.rank_score.unwrap_or(f64::NEG_INFINITY);

    b_score
        .total_cmp(&a_score)
        .then_with(|| b.upvote_count.cmp(&a.upvote_count))
}
