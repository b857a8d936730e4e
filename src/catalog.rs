// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

//! The published catalog.
//!
//! [`CatalogStore`] owns one [`CatalogSnapshot`] behind an `Arc`. Publishing
//! swaps the `Arc`; readers clone it and render without holding any lock, so
//! a refresh never blocks a reader and a reader never sees a half-built
//! catalog.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::FeedError;
use crate::event::Event;

/// Immutable view of the catalog produced by one successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub events: Vec<Event>,
    pub last_refreshed_at: DateTime<Utc>,
    pub refresh_generation: u64,
}

impl CatalogSnapshot {
    pub fn new(events: Vec<Event>, last_refreshed_at: DateTime<Utc>, refresh_generation: u64) -> Self {
        Self {
            events,
            last_refreshed_at,
            refresh_generation,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events still valid at `now`, in snapshot order.
    pub fn live_events(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |event| !event.is_expired(now))
    }
}

#[derive(Debug)]
pub struct CatalogStore {
    current: RwLock<Option<Arc<CatalogSnapshot>>>,
    generation_tx: watch::Sender<u64>,
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogStore {
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            current: RwLock::new(None),
            generation_tx,
        }
    }

    /// Replaces the current snapshot in one step.
    pub fn publish(&self, snapshot: CatalogSnapshot) -> Arc<CatalogSnapshot> {
        let generation = snapshot.refresh_generation;
        let snapshot = Arc::new(snapshot);
        *self.current.write() = Some(Arc::clone(&snapshot));
        self.generation_tx.send_replace(generation);
        snapshot
    }

    /// The latest snapshot, or [`FeedError::NotReady`] before the first publish.
    pub fn current(&self) -> Result<Arc<CatalogSnapshot>, FeedError> {
        self.current.read().clone().ok_or(FeedError::NotReady)
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    /// Generation of the current snapshot, 0 before the first publish.
    pub fn generation(&self) -> u64 {
        self.current
            .read()
            .as_ref()
            .map(|s| s.refresh_generation)
            .unwrap_or(0)
    }

    /// Notified with the new generation after every publish.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Sport, channel_id_for};
    use chrono::{Duration, TimeZone};

    fn event(id: &str, ends_at: Option<DateTime<Utc>>) -> Event {
        Event {
            id: id.to_string(),
            channel_id: channel_id_for(id, None),
            title: id.to_string(),
            sport: Sport::Nfl,
            logo_url: None,
            tag: None,
            starts_at: None,
            ends_at,
            stream_ref: id.to_string(),
        }
    }

    #[test]
    fn not_ready_until_first_publish() {
        let store = CatalogStore::new();
        assert_eq!(store.current().unwrap_err(), FeedError::NotReady);
        assert!(!store.is_initialized());

        let now = Utc::now();
        store.publish(CatalogSnapshot::new(Vec::new(), now, 1));
        let snapshot = store.current().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn publish_replaces_whole_snapshot() {
        let store = CatalogStore::new();
        let now = Utc::now();
        store.publish(CatalogSnapshot::new(vec![event("A", None), event("B", None)], now, 1));
        let held = store.current().unwrap();

        store.publish(CatalogSnapshot::new(vec![event("C", None)], now, 2));

        assert_eq!(held.len(), 2);
        let current = store.current().unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current.events[0].id, "C");
        assert_eq!(current.refresh_generation, 2);
    }

    #[test]
    fn live_events_skip_expired() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let snapshot = CatalogSnapshot::new(
            vec![
                event("past", Some(now - Duration::minutes(1))),
                event("open", None),
                event("future", Some(now + Duration::hours(1))),
            ],
            now - Duration::hours(2),
            3,
        );
        let ids: Vec<&str> = snapshot.live_events(now).map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["open", "future"]);
    }

    #[tokio::test]
    async fn subscribers_see_new_generation() {
        let store = CatalogStore::new();
        let mut rx = store.subscribe();
        store.publish(CatalogSnapshot::new(Vec::new(), Utc::now(), 7));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 7);
    }
}
