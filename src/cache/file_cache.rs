//! Directory-backed content cache

use crate::cache::{CacheEntry, CacheKey, CacheStats, ContentCache};
use crate::clock::SharedClock;
use async_trait::async_trait;
use chrono::Duration;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

const ENTRY_EXTENSION: &str = "cache";

/// One file per key under `dir`
///
/// Writes go to a uniquely named temp file in the same directory and are then
/// renamed over the entry, so a reader sees either the old or the new entry.
/// Expired entries are left on disk until overwritten or cleared.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
    clock: SharedClock,
}

impl FileCache {
    /// Opens (and creates if needed) a cache directory
    pub async fn open(
        dir: impl Into<PathBuf>,
        ttl: Duration,
        clock: SharedClock,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir, ttl, clock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.as_str(), ENTRY_EXTENSION))
    }

    fn is_entry(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION)
    }
}

#[async_trait]
impl ContentCache for FileCache {
    async fn get(&self, key: &CacheKey) -> io::Result<Option<String>> {
        let raw = match fs::read_to_string(self.entry_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(entry) = CacheEntry::decode(&raw) else {
            tracing::warn!(key = %key, "Ignoring malformed cache entry");
            return Ok(None);
        };

        if entry.is_expired(self.clock.now(), self.ttl) {
            tracing::debug!(key = %key, "Cache entry expired");
            return Ok(None);
        }

        Ok(Some(entry.payload))
    }

    async fn put(&self, key: &CacheKey, payload: &str) -> io::Result<()> {
        let entry = CacheEntry::new(payload, self.clock.now());
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", key.as_str(), uuid::Uuid::new_v4()));

        fs::write(&tmp, entry.encode()).await?;
        if let Err(e) = fs::rename(&tmp, self.entry_path(key)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn clear(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if Self::is_entry(&path) {
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        tracing::info!(removed, dir = %self.dir.display(), "Cleared content cache");
        Ok(removed)
    }

    async fn stats(&self) -> io::Result<CacheStats> {
        let mut stats = CacheStats::default();
        let now = self.clock.now();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if !Self::is_entry(&path) {
                continue;
            }
            stats.entries += 1;
            stats.total_bytes += item.metadata().await?.len();

            if let Ok(raw) = fs::read_to_string(&path).await {
                match CacheEntry::decode(&raw) {
                    Some(entry) if entry.is_expired(now, self.ttl) => stats.expired += 1,
                    Some(_) => {}
                    None => stats.expired += 1,
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_cache(clock: &ManualClock) -> (TempDir, FileCache) {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::open(dir.path(), Duration::hours(24), Arc::new(clock.clone()))
            .await
            .unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn test_get_after_put_within_ttl() {
        let clock = ManualClock::default();
        let (_dir, cache) = create_test_cache(&clock).await;
        let key = CacheKey::for_url("https://example.com/item/1.html");

        cache.put(&key, "<html>payload</html>").await.unwrap();
        clock.advance(Duration::hours(23));

        assert_eq!(
            cache.get(&key).await.unwrap().as_deref(),
            Some("<html>payload</html>")
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let clock = ManualClock::default();
        let (_dir, cache) = create_test_cache(&clock).await;
        let key = CacheKey::for_url("https://example.com/item/1.html");

        cache.put(&key, "payload").await.unwrap();
        clock.advance(Duration::hours(24));

        assert_eq!(cache.get(&key).await.unwrap(), None);
        // expired entries are not swept
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_miss() {
        let clock = ManualClock::default();
        let (_dir, cache) = create_test_cache(&clock).await;
        let key = CacheKey::for_url("https://example.com/never-stored");
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let clock = ManualClock::default();
        let (_dir, cache) = create_test_cache(&clock).await;
        let key = CacheKey::for_url("https://example.com/a");

        cache.put(&key, "first").await.unwrap();
        cache.put(&key, "second").await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("second"));
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let clock = ManualClock::default();
        let (dir, cache) = create_test_cache(&clock).await;

        cache.put(&CacheKey::for_url("https://a"), "aaaa").await.unwrap();
        cache.put(&CacheKey::for_url("https://b"), "bb").await.unwrap();
        clock.advance(Duration::hours(30));
        cache.put(&CacheKey::for_url("https://c"), "c").await.unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "keep me").unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.expired, 2);
        assert!(stats.total_bytes > 7);

        assert_eq!(cache.clear().await.unwrap(), 3);
        assert_eq!(cache.stats().await.unwrap().entries, 0);
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_concurrent_puts_never_tear() {
        let clock = ManualClock::default();
        let (_dir, cache) = create_test_cache(&clock).await;
        let cache = Arc::new(cache);
        let key = CacheKey::for_url("https://example.com/hot");
        let big_a = "a".repeat(64 * 1024);
        let big_b = "b".repeat(64 * 1024);

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let payload = if i % 2 == 0 { big_a.clone() } else { big_b.clone() };
            handles.push(tokio::spawn(async move {
                cache.put(&key, &payload).await.unwrap();
                cache.get(&key).await.unwrap()
            }));
        }

        for handle in handles {
            let seen = handle.await.unwrap().unwrap();
            assert!(seen == big_a || seen == big_b);
        }
    }
}
