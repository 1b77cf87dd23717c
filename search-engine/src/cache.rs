use moka::sync::Cache;
use radar_core::{normalize_query, Comment, FilterMode};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Hash of the normalized query, filter mode and page. Differently spaced
/// or cased spellings of one query share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn new(query: &str, filter_mode: FilterMode, page: u32) -> Self {
        let mut hasher = DefaultHasher::new();
        normalize_query(query).hash(&mut hasher);
        filter_mode.hash(&mut hasher);
        page.hash(&mut hasher);
        Self(hasher.finish())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    comments: Arc<Vec<Comment>>,
}

/// Scored result lists, kept for a fixed TTL and bounded in size.
///
/// Expiry is lazy: a read past the TTL misses, and the stale entry stays
/// until the next `put` for its key overwrites it. Capacity is the only
/// reason an entry is evicted.
#[derive(Clone)]
pub struct ResultCache {
    entries: Cache<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .build();
        Self { entries, ttl }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<Comment>> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            debug!("Cache entry {:?} expired", key);
            return None;
        }
        Some(entry.comments.as_ref().clone())
    }

    /// Stores `comments`, replacing any earlier entry for `key`.
    pub fn put(&self, key: CacheKey, comments: Vec<Comment>) {
        self.entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                comments: Arc::new(comments),
            },
        );
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
