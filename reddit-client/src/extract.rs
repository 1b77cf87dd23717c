//! Flattening of Reddit comment trees.
//!
//! Responses are read through small, partial views over `serde_json::Value`
//! rather than full schemas: every field access tolerates absence or a wrong
//! type, and a malformed branch contributes nothing instead of failing the
//! whole thread.

use chrono::{DateTime, TimeZone, Utc};
use radar_core::{is_displayable_author, is_displayable_body, Comment};
use serde_json::Value;

const COMMENT_KIND: &str = "t1";
const POST_KIND: &str = "t3";
const LISTING_KIND: &str = "Listing";
const PERMALINK_HOST: &str = "https://www.reddit.com";

/// Children of a `Listing` object, or nothing when the shape is off.
fn listing_children(listing: &Value) -> &[Value] {
    listing
        .get("data")
        .and_then(|data| data.get("children"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

/// The fields of a `t1` node that a `Comment` is built from.
#[derive(Debug)]
struct CommentView<'a> {
    id: &'a str,
    author: &'a str,
    body: &'a str,
    subreddit: Option<&'a str>,
    score: i64,
    awards: u32,
    created_utc: Option<f64>,
    permalink: Option<&'a str>,
}

impl<'a> CommentView<'a> {
    fn from_data(data: &'a Value) -> Option<Self> {
        let id = str_field(data, "id").filter(|id| !id.is_empty())?;

        Some(Self {
            id,
            author: str_field(data, "author").unwrap_or_default(),
            body: str_field(data, "body").unwrap_or_default(),
            subreddit: str_field(data, "subreddit").filter(|s| !s.is_empty()),
            score: data
                .get("score")
                .and_then(Value::as_i64)
                .or_else(|| data.get("ups").and_then(Value::as_i64))
                .unwrap_or(0),
            awards: data
                .get("total_awards_received")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
            created_utc: data.get("created_utc").and_then(Value::as_f64),
            permalink: str_field(data, "permalink"),
        })
    }

    fn into_comment(self, fallback_community: Option<&str>) -> Option<Comment> {
        if !is_displayable_body(self.body) || !is_displayable_author(self.author) {
            return None;
        }
        let community = self.subreddit.or(fallback_community)?;

        Some(Comment {
            id: self.id.to_string(),
            author: self.author.to_string(),
            body: self.body.to_string(),
            community: community.to_string(),
            upvote_count: self.score,
            award_count: self.awards,
            created_at: self.created_utc.and_then(timestamp).unwrap_or_else(Utc::now),
            permalink: self.permalink.map(absolute_permalink),
            match_score: None,
            rank_score: None,
        })
    }
}

fn timestamp(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    Utc.timestamp_opt(secs as i64, 0).single()
}

fn absolute_permalink(permalink: &str) -> String {
    if permalink.starts_with('/') {
        format!("{}{}", PERMALINK_HOST, permalink)
    } else {
        permalink.to_string()
    }
}

/// Flattens one upstream response into comments, in document order.
///
/// Accepts either a thread response (a two-element array of the post
/// listing and the comment forest) or a flat listing such as a full-text
/// search result. `community` is used for comments that do not carry their
/// own subreddit name.
pub fn extract_comments(response: &Value, community: Option<&str>) -> Vec<Comment> {
    let (forest, post_community) = match response {
        Value::Array(parts) => {
            let post_community = parts
                .first()
                .map(listing_children)
                .and_then(|children| children.first())
                .and_then(|post| post.get("data"))
                .and_then(|data| str_field(data, "subreddit"));
            match parts.get(1) {
                Some(forest) => (forest, post_community),
                None => return Vec::new(),
            }
        }
        Value::Object(_) => (response, None),
        _ => return Vec::new(),
    };

    let fallback = community.or(post_community);
    let mut comments = Vec::new();

    // Explicit stack so arbitrarily deep reply chains cannot exhaust the
    // call stack. Children are pushed in reverse to keep pre-order.
    let mut stack: Vec<&Value> = listing_children(forest).iter().rev().collect();

    while let Some(node) = stack.pop() {
        let kind = str_field(node, "kind").unwrap_or_default();
        let Some(data) = node.get("data") else {
            continue;
        };

        match kind {
            COMMENT_KIND => {
                if let Some(comment) =
                    CommentView::from_data(data).and_then(|view| view.into_comment(fallback))
                {
                    comments.push(comment);
                }

                // Replies are walked even when the parent itself was dropped
                if let Some(replies) = data.get("replies").filter(|r| r.is_object()) {
                    stack.extend(listing_children(replies).iter().rev());
                }
            }
            LISTING_KIND => stack.extend(listing_children(node).iter().rev()),
            _ => {}
        }
    }

    comments
}

/// Post ids from a subreddit listing, skipping stickied posts and posts
/// without comments, then applying the page window.
pub fn extract_post_ids(listing: &Value, skip: usize, take: usize) -> Vec<String> {
    listing_children(listing)
        .iter()
        .filter(|child| str_field(child, "kind") == Some(POST_KIND))
        .filter_map(|child| child.get("data"))
        .filter(|data| !data.get("stickied").and_then(Value::as_bool).unwrap_or(false))
        .filter(|data| {
            data.get("num_comments")
                .and_then(Value::as_u64)
                .map_or(true, |n| n > 0)
        })
        .filter_map(|data| str_field(data, "id"))
        .filter(|id| !id.is_empty())
        .skip(skip)
        .take(take)
        .map(str::to_string)
        .collect()
}
