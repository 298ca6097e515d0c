//! Credential-keyed cache for connection-level resources.
//!
//! The cache is owned by whoever creates connections (normally the
//! [`ConnectionFactory`](super::ConnectionFactory)) and is keyed by a
//! [`CredentialFingerprint`]: a SHA-256 digest over the endpoint and the
//! credentials, so two identical credential sets always map to the same entry
//! while the secret itself is never stored in the key.
//!
//! Eviction is explicit: entries leave the cache when the capacity is exceeded
//! (least recently used first), when they have been idle longer than the
//! optional TTL, or when [`CredentialCache::evict`] / [`CredentialCache::clear`]
//! is called.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Deterministic fingerprint of an endpoint plus credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialFingerprint(String);

impl CredentialFingerprint {
    /// Compute a fingerprint from an ordered list of parts.
    ///
    /// Parts are length-prefixed before hashing so that `["ab", "c"]` and
    /// `["a", "bc"]` do not collide.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            let part = part.as_ref();
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hex representation of the fingerprint
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs.
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

struct CacheEntry<V> {
    value: V,
    last_used: Instant,
}

/// Bounded cache with LRU and idle-TTL eviction.
pub struct CredentialCache<V> {
    capacity: usize,
    ttl: Option<Duration>,
    entries: Mutex<HashMap<CredentialFingerprint, CacheEntry<V>>>,
}

impl<V: Clone> CredentialCache<V> {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Expire entries that have not been used for `ttl`
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Look up an entry, refreshing its last-used time
    pub fn get(&self, key: &CredentialFingerprint) -> Option<V> {
        let mut entries = self.entries.lock();
        self.lookup(&mut entries, key, Instant::now())
    }

    /// Insert an entry, evicting expired and least recently used entries
    pub fn insert(&self, key: CredentialFingerprint, value: V) {
        let mut entries = self.entries.lock();
        self.store(&mut entries, key, value, Instant::now());
    }

    /// Return the cached value or create, cache and return a new one.
    ///
    /// The cache stays locked while `create` runs, so concurrent callers for
    /// the same key share a single value.
    pub fn get_or_try_insert_with<E, F>(&self, key: CredentialFingerprint, create: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if let Some(value) = self.lookup(&mut entries, &key, now) {
            return Ok(value);
        }
        let value = create()?;
        self.store(&mut entries, key, value.clone(), now);
        Ok(value)
    }

    fn lookup(
        &self,
        entries: &mut HashMap<CredentialFingerprint, CacheEntry<V>>,
        key: &CredentialFingerprint,
        now: Instant,
    ) -> Option<V> {
        if let Some(entry) = entries.get(key) {
            if self.is_expired(entry, now) {
                entries.remove(key);
                return None;
            }
        }

        entries.get_mut(key).map(|entry| {
            entry.last_used = now;
            entry.value.clone()
        })
    }

    fn store(
        &self,
        entries: &mut HashMap<CredentialFingerprint, CacheEntry<V>>,
        key: CredentialFingerprint,
        value: V,
        now: Instant,
    ) {
        if let Some(ttl) = self.ttl {
            entries.retain(|_, entry| now.duration_since(entry.last_used) < ttl);
        }

        while entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(oldest) => {
                    entries.remove(&oldest);
                }
                None => break,
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                last_used: now,
            },
        );
    }

    /// Remove one entry
    pub fn evict(&self, key: &CredentialFingerprint) -> Option<V> {
        self.entries.lock().remove(key).map(|entry| entry.value)
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Remove and return all entries
    pub fn drain(&self) -> Vec<V> {
        self.entries
            .lock()
            .drain()
            .map(|(_, entry)| entry.value)
            .collect()
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        self.ttl
            .map(|ttl| now.duration_since(entry.last_used) >= ttl)
            .unwrap_or(false)
    }
}

impl<V> fmt::Debug for CredentialCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("len", &self.entries.lock().len())
            .finish()
    }
}
