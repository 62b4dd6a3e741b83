//! Response cache keyed by a prompt fingerprint.
//!
//! The cache is an optimization only: the loop behaves the same whether or
//! not it ever hits. Entries carry a TTL and are never returned once it has
//! passed. When the cache is full, expired entries are purged in one batch
//! and then the least recently used live entry is evicted.

use crate::prompt::AssembledPrompt;
use botloom_core::provider::{ModelResponse, PromptMessage, SamplingParams};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Lowercase hex SHA-256 of a model request's canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: &'a [PromptMessage],
    sampling: &'a SamplingParams,
}

impl Fingerprint {
    /// Fingerprint of a prompt sent to `model` with `sampling`.
    pub fn compute(
        model: &str,
        prompt: &AssembledPrompt,
        sampling: &SamplingParams,
    ) -> botloom_core::Result<Self> {
        let canonical = serde_json::to_vec(&CanonicalRequest {
            model,
            system: &prompt.system,
            messages: &prompt.messages,
            sampling,
        })?;
        Ok(Self(format!("{:x}", Sha256::digest(&canonical))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Live entries evicted for capacity
    pub evictions: u64,
    /// Entries removed because their TTL passed
    pub expirations: u64,
}

struct Entry {
    response: ModelResponse,
    expires_at: Instant,
    last_used: u64,
}

struct Inner {
    entries: HashMap<Fingerprint, Entry>,
    tick: u64,
    stats: CacheStats,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - self.entries.len();
        self.stats.expirations += purged as u64;
        purged
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(fp, _)| fp.clone());
        if let Some(fp) = victim {
            self.entries.remove(&fp);
            self.stats.evictions += 1;
            debug!(fingerprint = %fp, "Evicted least recently used response");
        }
    }
}

/// Bounded LRU cache of model responses with per-entry TTL.
pub struct ResponseCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ResponseCache {
    /// A cache holding at most `capacity` entries. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a live entry and mark it recently used.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ModelResponse> {
        let now = Instant::now();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let tick = guard.next_tick();
        let inner = &mut *guard;

        let live = inner
            .entries
            .get(fingerprint)
            .map(|entry| entry.expires_at > now);
        match live {
            Some(true) => {
                inner.stats.hits += 1;
                inner.entries.get_mut(fingerprint).map(|entry| {
                    entry.last_used = tick;
                    entry.response.clone()
                })
            }
            Some(false) => {
                inner.entries.remove(fingerprint);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                None
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Store a response for `ttl`. Replaces any entry with the same fingerprint.
    pub fn put(&self, fingerprint: Fingerprint, response: ModelResponse, ttl: Duration) {
        if self.capacity == 0 {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let tick = inner.next_tick();
        inner.entries.insert(
            fingerprint,
            Entry {
                response,
                expires_at: now + ttl,
                last_used: tick,
            },
        );

        if inner.entries.len() > self.capacity {
            inner.purge_expired(now);
            while inner.entries.len() > self.capacity {
                inner.evict_lru();
            }
        }
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.purge_expired(Instant::now())
    }

    /// Entries currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{PromptBudget, assemble};
    use crate::token::HeuristicCounter;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint(s.to_string())
    }

    fn response(text: &str) -> ModelResponse {
        ModelResponse::text("m", text)
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let prompt =
            assemble(&HeuristicCounter, "Sys", &[], &[], PromptBudget::default()).unwrap();
        let sampling = SamplingParams::default();
        let a = Fingerprint::compute("gpt", &prompt, &sampling).unwrap();
        let b = Fingerprint::compute("gpt", &prompt, &sampling).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let other_model = Fingerprint::compute("gpt-2", &prompt, &sampling).unwrap();
        assert_ne!(a, other_model);

        let hotter = SamplingParams {
            temperature: 1.2,
            ..SamplingParams::default()
        };
        assert_ne!(a, Fingerprint::compute("gpt", &prompt, &hotter).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn hit_before_ttl_miss_after() {
        let cache = ResponseCache::new(4);
        cache.put(fp("a"), response("4"), Duration::from_secs(10));
        assert_eq!(cache.get(&fp("a")), Some(response("4")));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get(&fp("a")), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_used() {
        let cache = ResponseCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.put(fp("a"), response("a"), ttl);
        cache.put(fp("b"), response("b"), ttl);
        // Touch "a" so "b" becomes the LRU entry
        assert!(cache.get(&fp("a")).is_some());
        cache.put(fp("c"), response("c"), ttl);

        assert!(cache.get(&fp("a")).is_some());
        assert!(cache.get(&fp("b")).is_none());
        assert!(cache.get(&fp("c")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_go_before_live_ones() {
        let cache = ResponseCache::new(2);
        cache.put(fp("old"), response("old"), Duration::from_secs(1));
        cache.put(fp("live"), response("live"), Duration::from_secs(60));
        // Make "live" the LRU entry
        assert!(cache.get(&fp("old")).is_some());
        tokio::time::advance(Duration::from_secs(2)).await;

        cache.put(fp("new"), response("new"), Duration::from_secs(60));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fp("live")).is_some());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_in_batch() {
        let cache = ResponseCache::new(8);
        cache.put(fp("a"), response("a"), Duration::from_secs(1));
        cache.put(fp("b"), response("b"), Duration::from_secs(1));
        cache.put(fp("c"), response("c"), Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = ResponseCache::new(0);
        cache.put(fp("a"), response("a"), Duration::from_secs(60));
        assert!(cache.get(&fp("a")).is_none());
    }

    #[test]
    fn put_replaces_existing() {
        let cache = ResponseCache::new(2);
        cache.put(fp("a"), response("one"), Duration::from_secs(60));
        cache.put(fp("a"), response("two"), Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fp("a")), Some(response("two")));
    }
}
