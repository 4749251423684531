use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::fetch::ApiResponse;

/// Key/value storage for fetched toggle payloads, shared by all evaluations of a [crate::Client].
///
/// Implementations must be safe to use from several threads at once.
pub trait Cache: Send + Sync {
    /// Returns the entry stored under `key`, or None if there is none or it has expired.
    fn get(&self, key: &str) -> Option<Arc<ApiResponse>>;

    /// Stores `value` under `key`. A `ttl` of None (or zero) never expires.
    fn set(&self, key: &str, value: Arc<ApiResponse>, ttl: Option<Duration>);

    /// Returns true if an entry is stored under `key`, whether or not it has expired.
    fn has(&self, key: &str) -> bool;

    fn delete(&self, key: &str);

    fn clear(&self);
}

struct Entry {
    value: Arc<ApiResponse>,
    ttl: Option<Duration>,
    stored_at: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) if ttl == Duration::zero() => false,
            Some(ttl) => now - self.stored_at >= ttl,
        }
    }
}

/// The default [Cache]: a process-local map with per-entry expiry.
///
/// Expired entries are only removed when they are read.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Arc<ApiResponse>> {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("toggle cache lock poisoned: {}", e);
                return None;
            }
        };

        let expired = entries.get(key)?.is_expired(now);
        if expired {
            debug!("Cache entry {} expired", key);
            let _ = entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    fn set_at(&self, key: &str, value: Arc<ApiResponse>, ttl: Option<Duration>, now: DateTime<Utc>) {
        match self.entries.write() {
            Ok(mut entries) => {
                let _ = entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        ttl,
                        stored_at: now,
                    },
                );
            }
            Err(e) => warn!("toggle cache lock poisoned: {}", e),
        }
    }
}

impl Cache for InMemoryCache {
    fn get(&self, key: &str) -> Option<Arc<ApiResponse>> {
        self.get_at(key, Utc::now())
    }

    fn set(&self, key: &str, value: Arc<ApiResponse>, ttl: Option<Duration>) {
        self.set_at(key, value, ttl, Utc::now())
    }

    fn has(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    fn delete(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            let _ = entries.remove(key);
        }
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}
