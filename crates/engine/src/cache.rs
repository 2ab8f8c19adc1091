//! Content-addressed cache for deterministic completion requests.
//!
//! Only requests with an explicit temperature of zero are cached. Keys are the
//! SHA-256 of a canonical JSON encoding of `{model, messages, temperature}`.
//! Expiry is lazy (checked on lookup); when the cache is full the
//! oldest-inserted entry is evicted first.
//!
//! The cache never fails a caller: anything that goes wrong while computing a
//! key is logged and treated as a miss.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::{CacheKey, ChatMessage, Clock, Completion, CompletionRequest, ModelName, Timestamp, Usage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Maximum number of live entries.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3_600,
            max_entries: 1_000,
        }
    }
}

/// A cached provider answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub content: String,
    pub usage: Usage,
    pub model: ModelName,
    pub cached_at: Timestamp,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Returns `true` once `ttl` has fully elapsed since `cached_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.cached_at.plus(self.ttl)
    }
}

/// Counters since construction (or the last [`RequestCache::clear`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Keys in insertion order, oldest first.
    order: VecDeque<CacheKey>,
}

impl CacheState {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(entry)
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: Option<f32>,
}

/// Computes the cache key for a request shape.
///
/// Identical `(model, messages, temperature)` always yields the same key.
pub fn fingerprint(
    model: &ModelName,
    messages: &[ChatMessage],
    temperature: Option<f32>,
) -> Option<CacheKey> {
    // -0.0 and 0.0 must share a key.
    let temperature = temperature.map(|t| if t == 0.0 { 0.0 } else { t });
    let input = FingerprintInput {
        model: model.as_str(),
        messages,
        temperature,
    };
    match serde_json::to_vec(&input) {
        Ok(bytes) => CacheKey::new(hex::encode(Sha256::digest(&bytes))),
        Err(e) => {
            warn!(error = %e, "Failed to serialise request fingerprint; treating as miss");
            None
        }
    }
}

fn is_deterministic(temperature: Option<f32>) -> bool {
    temperature == Some(0.0)
}

/// Request cache shared by every provider call of one orchestrator.
#[derive(Debug)]
pub struct RequestCache {
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl RequestCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries.max(1),
            clock,
            enabled: AtomicBool::new(config.enabled),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Resumes caching. Entries stored before [`disable`](Self::disable) are
    /// served again if still fresh.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Suspends lookups and stores without dropping entries.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Looks up a fresh entry for a deterministic request.
    pub fn get(
        &self,
        model: &ModelName,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Option<CacheEntry> {
        if !self.is_enabled() || !is_deterministic(temperature) {
            return None;
        }
        let Some(key) = fingerprint(model, messages, temperature) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let now = self.clock.now();
        let mut state = self.lock();
        let expired = state.entries.get(&key).map(|entry| entry.is_expired(now));
        let hit = match expired {
            Some(true) => {
                debug!(key = %key, "Cache entry expired");
                state.remove(&key);
                None
            }
            Some(false) => state.entries.get(&key).cloned(),
            None => None,
        };
        drop(state);
        match &hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Stores a provider answer. Returns `false` (and stores nothing) when
    /// caching is disabled or the request is not deterministic.
    pub fn set(
        &self,
        model: &ModelName,
        messages: &[ChatMessage],
        temperature: Option<f32>,
        content: impl Into<String>,
        usage: Usage,
    ) -> bool {
        if !self.is_enabled() || !is_deterministic(temperature) {
            return false;
        }
        let Some(key) = fingerprint(model, messages, temperature) else {
            return false;
        };
        let entry = CacheEntry {
            key: key.clone(),
            content: content.into(),
            usage,
            model: model.clone(),
            cached_at: self.clock.now(),
            ttl: self.ttl,
        };

        let mut state = self.lock();
        state.remove(&key);
        state.entries.insert(key.clone(), entry);
        state.order.push_back(key);
        while state.entries.len() > self.max_entries {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %oldest, "Evicted oldest cache entry");
        }
        true
    }

    /// [`get`](Self::get) for a whole request, rebuilt as a cached [`Completion`].
    pub fn get_completion(&self, request: &CompletionRequest) -> Option<Completion> {
        self.get(&request.model, &request.messages, request.temperature)
            .map(|entry| Completion {
                content: entry.content,
                model: entry.model,
                usage: entry.usage,
                cached: true,
            })
    }

    /// [`set`](Self::set) for a whole request and its provider answer.
    pub fn set_completion(&self, request: &CompletionRequest, completion: &Completion) -> bool {
        self.set(
            &request.model,
            &request.messages,
            request.temperature,
            completion.content.clone(),
            completion.usage,
        )
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let CacheState { entries, order } = &mut *state;
        order.retain(|k| entries.contains_key(k));
        before - entries.len()
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ManualClock;

    fn model() -> ModelName {
        ModelName::new("gpt-4o-mini").unwrap()
    }

    fn msgs(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::system("be terse"), ChatMessage::user(text)]
    }

    fn cache(ttl_secs: u64, max_entries: usize) -> (RequestCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = CacheConfig {
            enabled: true,
            ttl_secs,
            max_entries,
        };
        (RequestCache::new(&config, clock.clone()), clock)
    }

    #[test]
    fn test_fingerprint_is_stable_and_discriminating() {
        let a = fingerprint(&model(), &msgs("hi"), Some(0.0)).unwrap();
        let b = fingerprint(&model(), &msgs("hi"), Some(0.0)).unwrap();
        let c = fingerprint(&model(), &msgs("hello"), Some(0.0)).unwrap();
        let d = fingerprint(&model(), &msgs("hi"), Some(0.7)).unwrap();
        let e = fingerprint(&model(), &msgs("hi"), Some(-0.0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, e);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_hit_before_ttl_and_miss_after() {
        let (cache, clock) = cache(60, 10);
        assert!(cache.set(&model(), &msgs("hi"), Some(0.0), "answer", Usage::new(3, 4)));

        clock.advance(Duration::from_secs(59));
        let hit = cache.get(&model(), &msgs("hi"), Some(0.0)).unwrap();
        assert_eq!(hit.content, "answer");
        assert_eq!(hit.usage, Usage::new(3, 4));

        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&model(), &msgs("hi"), Some(0.0)).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_non_deterministic_requests_are_never_cached() {
        let (cache, _) = cache(60, 10);
        cache.set(&model(), &msgs("hi"), Some(0.0), "answer", Usage::default());

        assert!(cache.get(&model(), &msgs("hi"), Some(0.7)).is_none());
        assert!(cache.get(&model(), &msgs("hi"), None).is_none());
        assert!(!cache.set(&model(), &msgs("x"), Some(0.7), "a", Usage::default()));
        assert!(!cache.set(&model(), &msgs("x"), None, "a", Usage::default()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_inserted() {
        let (cache, _) = cache(60, 2);
        cache.set(&model(), &msgs("one"), Some(0.0), "1", Usage::default());
        cache.set(&model(), &msgs("two"), Some(0.0), "2", Usage::default());
        // A lookup does not refresh insertion order.
        assert!(cache.get(&model(), &msgs("one"), Some(0.0)).is_some());
        cache.set(&model(), &msgs("three"), Some(0.0), "3", Usage::default());

        assert!(cache.get(&model(), &msgs("one"), Some(0.0)).is_none());
        assert!(cache.get(&model(), &msgs("two"), Some(0.0)).is_some());
        assert!(cache.get(&model(), &msgs("three"), Some(0.0)).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_disable_keeps_entries() {
        let (cache, _) = cache(60, 10);
        cache.set(&model(), &msgs("hi"), Some(0.0), "answer", Usage::default());
        cache.disable();
        assert!(cache.get(&model(), &msgs("hi"), Some(0.0)).is_none());
        assert!(!cache.set(&model(), &msgs("new"), Some(0.0), "n", Usage::default()));
        cache.enable();
        assert!(cache.get(&model(), &msgs("hi"), Some(0.0)).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prune_and_clear() {
        let (cache, clock) = cache(10, 10);
        cache.set(&model(), &msgs("old"), Some(0.0), "o", Usage::default());
        clock.advance(Duration::from_secs(5));
        cache.set(&model(), &msgs("new"), Some(0.0), "n", Usage::default());
        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.prune_expired(), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_completion_helpers_mark_hits_as_cached() {
        let (cache, _) = cache(60, 10);
        let request = CompletionRequest::new(model(), msgs("hi")).with_temperature(0.0);
        let completion = Completion {
            content: "answer".into(),
            model: model(),
            usage: Usage::new(1, 2),
            cached: false,
        };
        assert!(cache.set_completion(&request, &completion));
        let hit = cache.get_completion(&request).unwrap();
        assert!(hit.cached);
        assert_eq!(hit.content, "answer");
    }
}
