//! NUT-19 response cache
//!
//! Successful responses for cached endpoints are replayed for an
//! identical retry. Purely an optimisation: a miss and a hit are
//! indistinguishable to callers.
//!
//! <https://github.com/cashubtc/nuts/blob/main/19.md>

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use bitcoin_hashes::{sha256, Hash};

use crate::nuts::nut19;

/// default ttl when the mint announces caching without one
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// bounds, eviction kicks in beyond either
const MAX_ENTRIES: usize = 256;
const MAX_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct CacheKey {
    method: String,
    path: String,
    body_hash: [u8; 32],
}

impl CacheKey {
    fn new(method: &str, path: &str, body: &[u8]) -> Self {
        Self {
            method: method.to_owned(),
            path: path.to_owned(),
            body_hash: sha256::Hash::hash(body).to_byte_array(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    response: String,
    stored_at: Instant,
    ttl: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    bytes: usize,
}

/// Cache of successful mint responses keyed by `(method, path, sha256(body))`
#[derive(Debug, Default)]
pub struct ResponseCache {
    settings: RwLock<nut19::Settings>,
    inner: Mutex<Inner>,
}

impl ResponseCache {
    pub fn new(settings: nut19::Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Replace the announced settings (a fresh /v1/info pull); cached
    /// entries for endpoints that are no longer announced die on lookup.
    pub fn set_settings(&self, settings: nut19::Settings) {
        *self.settings.write().expect("cache settings lock") = settings;
    }

    fn is_cached_endpoint(&self, method: &str, path: &str) -> bool {
        let settings = self.settings.read().expect("cache settings lock");
        settings.cached_endpoints.iter().any(|e| {
            let m = match e.method {
                nut19::Method::Get => "GET",
                nut19::Method::Post => "POST",
            };
            m == method && e.path == path
        })
    }

    fn ttl(&self) -> Duration {
        self.settings
            .read()
            .expect("cache settings lock")
            .ttl
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL)
    }

    pub fn get(&self, method: &str, path: &str, body: &[u8]) -> Option<String> {
        if !self.is_cached_endpoint(method, path) {
            return None;
        }

        let key = CacheKey::new(method, path, body);
        let mut inner = self.inner.lock().expect("cache lock");

        let expired = match inner.entries.get(&key) {
            Some(entry) => entry.stored_at.elapsed() >= entry.ttl,
            None => return None,
        };

        if expired {
            if let Some(old) = inner.entries.remove(&key) {
                inner.bytes -= old.response.len();
            }
            return None;
        }

        inner.entries.get(&key).map(|e| e.response.clone())
    }

    /// Store a successful response. Errors are never cached.
    pub fn put(&self, method: &str, path: &str, body: &[u8], response: &str) {
        if !self.is_cached_endpoint(method, path) {
            return;
        }

        let key = CacheKey::new(method, path, body);
        let mut inner = self.inner.lock().expect("cache lock");

        if let Some(old) = inner.entries.remove(&key) {
            inner.bytes -= old.response.len();
        }

        inner.bytes += response.len();
        inner.entries.insert(
            key,
            Entry {
                response: response.to_owned(),
                stored_at: Instant::now(),
                ttl: self.ttl(),
            },
        );

        Self::evict(&mut inner);
    }

    fn evict(inner: &mut Inner) {
        // drop expired first
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.stored_at.elapsed() >= e.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            if let Some(e) = inner.entries.remove(&k) {
                inner.bytes -= e.response.len();
            }
        }

        // then oldest until back under bounds
        while inner.entries.len() > MAX_ENTRIES || inner.bytes > MAX_BYTES {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    if let Some(e) = inner.entries.remove(&k) {
                        inner.bytes -= e.response.len();
                    }
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(ttl: Option<u64>) -> nut19::Settings {
        nut19::Settings {
            ttl,
            cached_endpoints: vec![
                nut19::CachedEndpoint::new(nut19::Method::Post, "/v1/swap"),
                nut19::CachedEndpoint::new(nut19::Method::Post, "/v1/mint/bolt11"),
            ],
        }
    }

    #[test]
    fn test_hit_requires_same_key() {
        let cache = ResponseCache::new(settings(Some(300)));

        cache.put("POST", "/v1/swap", b"{\"inputs\":[1]}", "{\"ok\":1}");

        assert_eq!(
            cache.get("POST", "/v1/swap", b"{\"inputs\":[1]}").as_deref(),
            Some("{\"ok\":1}")
        );
        // different body, different key
        assert!(cache.get("POST", "/v1/swap", b"{\"inputs\":[2]}").is_none());
        // different path
        assert!(cache
            .get("POST", "/v1/mint/bolt11", b"{\"inputs\":[1]}")
            .is_none());
    }

    #[test]
    fn test_uncached_endpoint_is_passthrough() {
        let cache = ResponseCache::new(settings(Some(300)));

        cache.put("POST", "/v1/checkstate", b"x", "resp");
        assert!(cache.get("POST", "/v1/checkstate", b"x").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ResponseCache::new(settings(Some(0)));

        cache.put("POST", "/v1/swap", b"b", "resp");
        // ttl zero: expired on arrival
        assert!(cache.get("POST", "/v1/swap", b"b").is_none());
    }

    #[test]
    fn test_entry_bound_eviction() {
        let cache = ResponseCache::new(settings(Some(3600)));

        for i in 0..(MAX_ENTRIES + 10) {
            let body = format!("body-{}", i);
            cache.put("POST", "/v1/swap", body.as_bytes(), "resp");
        }
        assert!(cache.len() <= MAX_ENTRIES);
    }
}
