//! On-disk cache entry format
//!
//! An entry file is a single RFC 3339 header line holding `stored_at`, followed by
//! the raw payload bytes.

use chrono::{DateTime, Duration, Utc};

/// A cached payload with the time it was stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: String,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(payload: impl Into<String>, stored_at: DateTime<Utc>) -> Self {
        Self {
            payload: payload.into(),
            stored_at,
        }
    }

    /// An entry is a hit only while `now < stored_at + ttl`
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now >= self.stored_at + ttl
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.stored_at
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.payload.len() + 40);
        out.push_str(&self.stored_at.to_rfc3339());
        out.push('\n');
        out.push_str(&self.payload);
        out
    }

    /// Parses an entry file; returns None for a missing or malformed header
    pub fn decode(raw: &str) -> Option<Self> {
        let (header, payload) = raw.split_once('\n')?;
        let stored_at = DateTime::parse_from_rfc3339(header.trim_end_matches('\r'))
            .ok()?
            .with_timezone(&Utc);
        Some(Self {
            payload: payload.to_string(),
            stored_at,
        })
    }
}
