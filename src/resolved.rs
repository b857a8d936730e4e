// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUrlEntry {
    pub event_id: String,
    pub url: String,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedUrlEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.resolved_at < window
    }
}

/// Playable URLs keyed by event id, each with its own freshness window.
///
/// Entries are replaced whole, so a reader racing a writer on the same key
/// sees either the old or the new entry.
#[derive(Debug)]
pub struct ResolvedUrlCache {
    entries: DashMap<String, ResolvedUrlEntry>,
    freshness: Duration,
}

impl ResolvedUrlCache {
    pub fn new(freshness: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            freshness,
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Returns the URL only while the entry is younger than the freshness window.
    pub fn get(&self, event_id: &str, now: DateTime<Utc>) -> Option<String> {
        self.entries
            .get(event_id)
            .filter(|entry| entry.is_fresh(now, self.freshness))
            .map(|entry| entry.url.clone())
    }

    pub fn put(&self, event_id: &str, url: String, now: DateTime<Utc>) {
        self.entries.insert(
            event_id.to_string(),
            ResolvedUrlEntry {
                event_id: event_id.to_string(),
                url,
                resolved_at: now,
            },
        );
    }

    pub fn evict(&self, event_id: &str) -> bool {
        self.entries.remove(event_id).is_some()
    }

    /// Drops entries that are stale or whose event is no longer listed.
    /// Returns how many were removed.
    pub fn evict_outside(&self, live_ids: &HashSet<&str>, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, entry| {
            live_ids.contains(id.as_str()) && entry.is_fresh(now, self.freshness)
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies the current contents, ordered by event id, for persistence.
    pub fn entries(&self) -> Vec<ResolvedUrlEntry> {
        let mut entries: Vec<ResolvedUrlEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        entries
    }

    pub fn restore(&self, entries: Vec<ResolvedUrlEntry>) {
        for entry in entries {
            self.entries.insert(entry.event_id.clone(), entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn hit_inside_window_miss_at_and_after() {
        let window = Duration::minutes(30);
        let cache = ResolvedUrlCache::new(window);
        cache.put("A", "https://cdn/a.ts".to_string(), t0());

        assert_eq!(cache.get("A", t0()).as_deref(), Some("https://cdn/a.ts"));
        assert_eq!(
            cache.get("A", t0() + window - Duration::seconds(1)).as_deref(),
            Some("https://cdn/a.ts")
        );
        assert_eq!(cache.get("A", t0() + window), None);
        assert_eq!(cache.get("A", t0() + window + Duration::seconds(1)), None);
        assert_eq!(cache.get("B", t0()), None);
    }

    #[test]
    fn put_replaces_and_evict_removes() {
        let cache = ResolvedUrlCache::new(Duration::minutes(30));
        cache.put("A", "https://cdn/old.ts".to_string(), t0());
        cache.put("A", "https://cdn/new.ts".to_string(), t0());
        assert_eq!(cache.get("A", t0()).as_deref(), Some("https://cdn/new.ts"));
        assert_eq!(cache.len(), 1);

        assert!(cache.evict("A"));
        assert!(!cache.evict("A"));
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_outside_drops_unlisted_and_stale() {
        let window = Duration::minutes(30);
        let cache = ResolvedUrlCache::new(window);
        cache.put("live", "https://cdn/1.ts".to_string(), t0());
        cache.put("gone", "https://cdn/2.ts".to_string(), t0());
        cache.put("stale", "https://cdn/3.ts".to_string(), t0() - window);

        let live: HashSet<&str> = ["live", "stale"].into_iter().collect();
        assert_eq!(cache.evict_outside(&live, t0()), 2);
        assert_eq!(cache.entries().len(), 1);
        assert_eq!(cache.get("live", t0()).as_deref(), Some("https://cdn/1.ts"));
    }

    #[test]
    fn entries_and_restore() {
        let cache = ResolvedUrlCache::new(Duration::minutes(30));
        cache.put("b", "https://cdn/b.ts".to_string(), t0());
        cache.put("a", "https://cdn/a.ts".to_string(), t0());
        let entries = cache.entries();
        assert_eq!(entries[0].event_id, "a");

        let restored = ResolvedUrlCache::new(Duration::minutes(30));
        restored.restore(entries.clone());
        assert_eq!(restored.entries(), entries);
    }

    #[tokio::test]
    async fn concurrent_readers_never_see_partial_values() {
        let cache = Arc::new(ResolvedUrlCache::new(Duration::hours(1)));
        cache.put("A", "https://cdn/v0.ts".to_string(), t0());

        let writer = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for i in 0..500 {
                    cache.put("A", format!("https://cdn/v{}.ts", i), t0());
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let url = cache.get("A", t0()).unwrap();
                    assert!(url.starts_with("https://cdn/v") && url.ends_with(".ts"));
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
