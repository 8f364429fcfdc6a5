//! Content cache for raw fetched pages
//!
//! Keys are the SHA-256 of the URL. Only successful fetches are stored. A disabled
//! cache is a [`NoCache`], which always misses.

mod entry;
mod file_cache;

pub use entry::CacheEntry;
pub use file_cache::FileCache;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;

/// Hex SHA-256 of a URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_url(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Occupancy of the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub expired: u64,
    pub total_bytes: u64,
}

/// Keyed TTL store of raw payloads
#[async_trait]
pub trait ContentCache: Send + Sync + fmt::Debug {
    /// Returns the payload if present and not expired
    async fn get(&self, key: &CacheKey) -> io::Result<Option<String>>;

    async fn put(&self, key: &CacheKey, payload: &str) -> io::Result<()>;

    /// Removes every entry; returns how many were removed
    async fn clear(&self) -> io::Result<usize>;

    async fn stats(&self) -> io::Result<CacheStats>;
}

/// Cache used when caching is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl ContentCache for NoCache {
    async fn get(&self, _key: &CacheKey) -> io::Result<Option<String>> {
        Ok(None)
    }

    async fn put(&self, _key: &CacheKey, _payload: &str) -> io::Result<()> {
        Ok(())
    }

    async fn clear(&self) -> io::Result<usize> {
        Ok(0)
    }

    async fn stats(&self) -> io::Result<CacheStats> {
        Ok(CacheStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_sha256_hex() {
        let key = CacheKey::for_url("https://zhongchou.modian.com/item/1.html");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, CacheKey::for_url("https://zhongchou.modian.com/item/1.html"));
        assert_ne!(key, CacheKey::for_url("https://zhongchou.modian.com/item/2.html"));
    }

    #[tokio::test]
    async fn test_no_cache_always_misses() {
        let cache = NoCache;
        let key = CacheKey::for_url("https://example.com");
        cache.put(&key, "payload").await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
    }
}
