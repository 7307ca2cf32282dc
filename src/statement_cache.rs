//! Statement caching
//!
//! Prepared statements are kept per connection, keyed by their SQL text, so
//! running the same SQL again skips the allocate/prepare/describe round
//! trips. A cached entry is leased to one user at a time: a second user of
//! the same SQL while the first still holds it gets a miss and prepares its
//! own handle.
//!
//! Whatever leaves the cache (evicted, replaced or refused) is handed back to
//! the caller, which owns releasing the server handle.

use indexmap::IndexMap;
use std::time::Instant;

/// Wrapper for a cached statement with usage tracking
#[derive(Debug)]
struct CachedStatement<T> {
    statement: T,
    /// Leased to a running query
    in_use: bool,
    last_used: Instant,
}

impl<T> CachedStatement<T> {
    fn new(statement: T, in_use: bool) -> Self {
        Self {
            statement,
            in_use,
            last_used: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

/// Client-side statement cache using LRU eviction
#[derive(Debug)]
pub struct StatementCache<T> {
    /// The cache using IndexMap for O(1) lookup + LRU ordering
    cache: IndexMap<String, CachedStatement<T>>,
    /// Maximum number of statements to cache
    max_size: usize,
}

impl<T: Clone> StatementCache<T> {
    /// Create a new statement cache with the given maximum size
    ///
    /// A size of 0 disables caching.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: IndexMap::with_capacity(max_size),
            max_size,
        }
    }

    /// Lease the statement cached for `sql`
    ///
    /// Returns `None` on a miss or while the entry is leased elsewhere.
    pub fn get(&mut self, sql: &str) -> Option<T> {
        if self.max_size == 0 {
            return None;
        }

        let cached = match self.cache.get_mut(sql) {
            Some(cached) => cached,
            None => {
                tracing::trace!(sql = sql, "statement cache miss");
                return None;
            }
        };
        cached.touch();
        if cached.in_use {
            tracing::trace!(sql = sql, "statement cache hit but in use");
            return None;
        }
        cached.in_use = true;
        tracing::trace!(sql = sql, "statement cache hit");
        Some(cached.statement.clone())
    }

    /// Store a freshly prepared statement, leased when `in_use` is set
    ///
    /// Returns the statement that no longer has a place in the cache: the
    /// evicted LRU entry, the entry replaced for the same SQL, or `statement`
    /// itself when the cache is disabled or every entry is leased.
    pub fn put(&mut self, sql: String, statement: T, in_use: bool) -> Option<T> {
        if self.max_size == 0 {
            return Some(statement);
        }

        if let Some(cached) = self.cache.get_mut(&sql) {
            if cached.in_use {
                // The leased handle stays; the newcomer is surplus
                return Some(statement);
            }
            tracing::trace!(sql = sql, "replacing cache entry");
            let old = std::mem::replace(cached, CachedStatement::new(statement, in_use));
            return Some(old.statement);
        }

        let mut evicted = None;
        if self.cache.len() >= self.max_size {
            match self.evict_lru() {
                Some(statement) => evicted = Some(statement),
                None => {
                    tracing::warn!("statement cache full and all statements in use");
                    return Some(statement);
                }
            }
        }

        tracing::trace!(sql = sql, "adding statement to cache");
        self.cache.insert(sql, CachedStatement::new(statement, in_use));
        evicted
    }

    /// Give a leased statement back
    pub fn return_statement(&mut self, sql: &str) {
        if let Some(cached) = self.cache.get_mut(sql) {
            cached.in_use = false;
            tracing::trace!(sql = sql, "statement returned to cache");
        }
    }

    /// Forget the statement cached for `sql`
    pub fn remove(&mut self, sql: &str) -> Option<T> {
        self.cache.shift_remove(sql).map(|cached| cached.statement)
    }

    /// Empty the cache, returning every statement it held
    pub fn clear(&mut self) -> Vec<T> {
        let drained: Vec<T> = self.cache.drain(..).map(|(_, c)| c.statement).collect();
        if !drained.is_empty() {
            tracing::debug!(statements = drained.len(), "statement cache cleared");
        }
        drained
    }

    /// Get the current number of cached statements
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Get the maximum cache size
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Evict the least recently used entry that is not leased
    fn evict_lru(&mut self) -> Option<T> {
        let lru_key = self
            .cache
            .iter()
            .filter(|(_, cached)| !cached.in_use)
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(key, _)| key.clone())?;

        let cached = self.cache.shift_remove(&lru_key)?;
        tracing::trace!(sql = lru_key, "evicted LRU statement from cache");
        Some(cached.statement)
    }
}
