//! Fingerprint cache - content-addressed responses with lazy TTL expiry
//!
//! Keys are SHA-256 digests over the routing hint and the ordered
//! `role|text` pairs of a conversation, plus a digest of any attached image. Entries expire on read: a lookup that
//! finds an entry older than the TTL removes it and reports a miss.

use chrono::{DateTime, Utc};
use lfr_llm::Turn;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Deterministic digest identifying a conversation for a given backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest of `routing_hint + "\n" + join("\n", role|text[|sha256(image)])`.
    pub fn compute(turns: &[Turn], routing_hint: &str) -> Self {
        let body = turns
            .iter()
            .map(|t| match &t.image {
                Some(image) => format!(
                    "{}|{}|{}",
                    t.role.as_str(),
                    t.text,
                    hex::encode(Sha256::digest(image.as_bytes()))
                ),
                None => format!("{}|{}", t.role.as_str(), t.text),
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut hasher = Sha256::new();
        if !routing_hint.is_empty() {
            hasher.update(routing_hint.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(body.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        // A timestamp in the future (clock step) counts as fresh.
        let age = (now - self.cached_at).to_std().unwrap_or(Duration::ZERO);
        age > ttl
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub max_entries: Option<usize>,
}

/// In-memory response cache shared by all requests.
///
/// Unbounded unless built with [`FingerprintCache::bounded`]; entries that are
/// never looked up again stay until they are overwritten or evicted by the bound.
#[derive(Debug)]
pub struct FingerprintCache<V> {
    entries: RwLock<HashMap<Fingerprint, CacheEntry<V>>>,
    max_entries: Option<usize>,
}

impl<V: Clone> FingerprintCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: None,
        }
    }

    /// Cache that evicts its oldest entry once `max_entries` is reached
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: Some(max_entries.max(1)),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint, ttl: Duration) -> Option<V> {
        self.get_at(fingerprint, ttl, Utc::now())
    }

    /// Lookup as of `now`; an expired entry is removed.
    pub fn get_at(&self, fingerprint: &Fingerprint, ttl: Duration, now: DateTime<Utc>) -> Option<V> {
        {
            let entries = self.entries.read();
            match entries.get(fingerprint) {
                None => return None,
                Some(entry) if !entry.expired(ttl, now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // Another writer may have refreshed the entry between the two locks.
        match entries.get(fingerprint) {
            Some(entry) if !entry.expired(ttl, now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(fingerprint);
                tracing::debug!(fingerprint = %fingerprint, "cache entry expired");
                None
            }
            None => None,
        }
    }

    pub fn put(&self, fingerprint: Fingerprint, value: V) {
        self.put_at(fingerprint, value, Utc::now());
    }

    /// Store as of `now`; last write wins.
    pub fn put_at(&self, fingerprint: Fingerprint, value: V, now: DateTime<Utc>) {
        let mut entries = self.entries.write();

        if let Some(max) = self.max_entries {
            if entries.len() >= max && !entries.contains_key(&fingerprint) {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.cached_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            fingerprint,
            CacheEntry {
                value,
                cached_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.len(),
            max_entries: self.max_entries,
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<V: Clone> Default for FingerprintCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn turns() -> Vec<Turn> {
        vec![Turn::system("be terse"), Turn::user("hello")]
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::compute(&turns(), "llama3.2:latest");
        let b = Fingerprint::compute(&turns(), "llama3.2:latest");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_hint() {
        let local = Fingerprint::compute(&turns(), "llama3.2:latest");
        let cloud = Fingerprint::compute(&turns(), "cloud");
        assert_ne!(local, cloud);
    }

    #[test]
    fn test_fingerprint_matches_reference_layout() {
        let mut hasher = Sha256::new();
        hasher.update(b"cloud\nsystem|be terse\nuser|hello");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(Fingerprint::compute(&turns(), "cloud").as_str(), expected);
    }

    #[test]
    fn test_fingerprint_covers_images() {
        let plain = vec![Turn::user("what is this?")];
        let first = vec![Turn::user("what is this?").with_image("aGVsbG8=")];
        let second = vec![Turn::user("what is this?").with_image("d29ybGQ=")];

        let plain_key = Fingerprint::compute(&plain, "m");
        let first_key = Fingerprint::compute(&first, "m");
        let second_key = Fingerprint::compute(&second, "m");

        assert_ne!(plain_key, first_key);
        assert_ne!(first_key, second_key);
        assert_eq!(first_key, Fingerprint::compute(&first, "m"));
    }

    #[test]
    fn test_ttl_boundary() {
        let cache = FingerprintCache::new();
        let key = Fingerprint::compute(&turns(), "m");
        let ttl = Duration::from_secs(300);
        let t0 = Utc::now();

        cache.put_at(key.clone(), "answer".to_string(), t0);

        let before = t0 + chrono::Duration::seconds(299);
        assert_eq!(cache.get_at(&key, ttl, before).as_deref(), Some("answer"));

        let after = t0 + chrono::Duration::seconds(301);
        assert_eq!(cache.get_at(&key, ttl, after), None);
        assert!(cache.is_empty(), "expired entry should be evicted on read");
    }

    #[test]
    fn test_last_write_wins() {
        let cache = FingerprintCache::new();
        let key = Fingerprint::compute(&turns(), "m");
        cache.put(key.clone(), 1);
        cache.put(key.clone(), 2);
        assert_eq!(cache.get(&key, Duration::from_secs(60)), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_bounded_cache_evicts_oldest() {
        let cache = FingerprintCache::bounded(2);
        let t0 = Utc::now();
        let k1 = Fingerprint::compute(&[Turn::user("1")], "m");
        let k2 = Fingerprint::compute(&[Turn::user("2")], "m");
        let k3 = Fingerprint::compute(&[Turn::user("3")], "m");

        cache.put_at(k1.clone(), 1, t0);
        cache.put_at(k2.clone(), 2, t0 + chrono::Duration::seconds(1));
        cache.put_at(k3.clone(), 3, t0 + chrono::Duration::seconds(2));

        let ttl = Duration::from_secs(3600);
        assert_eq!(cache.get_at(&k1, ttl, t0), None);
        assert_eq!(cache.get_at(&k3, ttl, t0), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(FingerprintCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let key = Fingerprint::compute(&[Turn::user(format!("q{}", i % 4))], "m");
                    for n in 0..100 {
                        cache.put(key.clone(), n);
                        let _ = cache.get(&key, Duration::from_secs(60));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 4);
    }
}
