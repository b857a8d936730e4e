// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::upstream::RawEvent;

/// Leagues that may appear in a published catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sport {
    Nba,
    Nfl,
    Mlb,
    Nhl,
}

impl Sport {
    pub const ALL: [Sport; 4] = [Sport::Nba, Sport::Nfl, Sport::Mlb, Sport::Nhl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Nba => "NBA",
            Sport::Nfl => "NFL",
            Sport::Mlb => "MLB",
            Sport::Nhl => "NHL",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Sport::ALL
            .into_iter()
            .find(|sport| sport.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unsupported sport: {}", s))
    }
}

/// One live contest as published in a catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Identity shared by the playlist `tvg-id` and the guide channel id.
    pub channel_id: String,
    pub title: String,
    pub sport: Sport,
    pub logo_url: Option<String>,
    pub tag: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Opaque upstream reference used to resolve a playable URL.
    pub stream_ref: String,
}

impl Event {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    /// Events without an end time never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| expires <= now)
    }
}

/// Stable channel id derived from the title and start time, so that players
/// keep their channel mapping across refreshes and restarts.
pub fn channel_id_for(title: &str, starts_at: Option<i64>) -> String {
    const MODULUS: u128 = 10_000_000_000;

    let base = format!("{}_{}", title, starts_at.unwrap_or(0));
    let digest = Sha256::digest(base.as_bytes());
    let value = digest
        .iter()
        .fold(0u128, |acc, byte| (acc * 256 + u128::from(*byte)) % MODULUS);
    value.to_string()
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.filter(|s| *s > 0)
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Converts raw upstream records into catalog events.
#[derive(Debug, Clone)]
pub struct Normalizer {
    sports: Vec<Sport>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Sport::ALL.to_vec())
    }
}

impl Normalizer {
    pub fn new(sports: Vec<Sport>) -> Self {
        Self { sports }
    }

    fn map(&self, raw: &RawEvent) -> Option<Event> {
        let Some(id) = raw.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) else {
            debug!("Dropping catalog record without an id: {:?}", raw.name);
            return None;
        };

        let title = raw.name.as_deref().unwrap_or_default().trim();
        if title.is_empty() {
            debug!("Dropping event {} with missing name", id);
            return None;
        }

        let sport_name = raw
            .category_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&raw.category);
        let sport = match sport_name.parse::<Sport>() {
            Ok(sport) if self.sports.contains(&sport) => sport,
            _ => {
                debug!("Dropping event {} ({}) outside whitelist", id, sport_name);
                return None;
            }
        };

        Some(Event {
            id: id.to_string(),
            channel_id: channel_id_for(title, raw.starts_at),
            title: title.to_string(),
            sport,
            logo_url: raw.poster.clone().filter(|p| !p.is_empty()),
            tag: raw.tag.clone().filter(|t| !t.is_empty()),
            starts_at: timestamp(raw.starts_at),
            ends_at: timestamp(raw.ends_at),
            stream_ref: id.to_string(),
        })
    }

    /// Maps, filters and de-duplicates a batch. The result is ordered by start
    /// time then id, so the same input and `now` always give the same output.
    pub fn normalize(&self, raw_events: &[RawEvent], now: DateTime<Utc>) -> Vec<Event> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut events: Vec<Event> = Vec::new();

        for event in raw_events.iter().filter_map(|raw| self.map(raw)) {
            if event.is_expired(now) {
                debug!("Dropping expired event {} ({})", event.id, event.title);
                continue;
            }
            // Later records for the same id replace earlier ones.
            match positions.get(&event.id) {
                Some(&index) => events[index] = event,
                None => {
                    positions.insert(event.id.clone(), events.len());
                    events.push(event);
                }
            }
        }

        events.sort_by(|a, b| {
            a.starts_at
                .cmp(&b.starts_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        events
    }
}

/// Normalizes against the full sport whitelist.
pub fn normalize(raw_events: &[RawEvent], now: DateTime<Utc>) -> Vec<Event> {
    Normalizer::default().normalize(raw_events, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap()
    }

    fn raw(id: &str, name: &str, category: &str, starts: i64, ends: i64) -> RawEvent {
        RawEvent {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            category: category.to_string(),
            category_name: None,
            poster: Some(format!("https://img.example/{}.png", id)),
            tag: None,
            starts_at: Some(starts),
            ends_at: Some(ends),
        }
    }

    #[test]
    fn whitelist_and_expiry_scenario() {
        let t = now().timestamp();
        let batch = vec![
            raw("A", "Lakers vs Celtics", "NBA", t - 600, t + 7200),
            raw("B", "Final", "Tennis", t - 600, t + 7200),
            raw("C", "Yankees vs Red Sox", "MLB", t - 10800, t - 60),
        ];

        let events = normalize(&batch, now());
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["A"]);
        assert_eq!(events[0].sport, Sport::Nba);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let t = now().timestamp();
        let events = normalize(&[raw("A", "Game", "NHL", t - 60, t)], now());
        assert!(events.is_empty());
    }

    #[test]
    fn output_is_sorted_and_deterministic() {
        let t = now().timestamp();
        let batch = vec![
            raw("3", "Late", "NFL", t + 3600, t + 9000),
            raw("2", "Early B", "NHL", t + 60, t + 9000),
            raw("1", "Early A", "NBA", t + 60, t + 9000),
        ];

        let first = normalize(&batch, now());
        let second = normalize(&batch, now());
        assert_eq!(first, second);
        let ids: Vec<&str> = first.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn duplicate_ids_keep_latest_record() {
        let t = now().timestamp();
        let batch = vec![
            raw("7", "Old title", "NBA", t, t + 3600),
            raw("8", "Other", "NBA", t, t + 3600),
            raw("7", "New title", "NBA", t, t + 3600),
        ];

        let events = normalize(&batch, now());
        assert_eq!(events.len(), 2);
        let seven = events.iter().find(|e| e.id == "7").unwrap();
        assert_eq!(seven.title, "New title");
    }

    #[test]
    fn category_name_overrides_parent_and_matches_case_insensitively() {
        let t = now().timestamp();
        let mut event = raw("1", "Game", "Basketball", t, t + 3600);
        event.category_name = Some("nba".to_string());
        let events = normalize(&[event], now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sport, Sport::Nba);
    }

    #[test]
    fn missing_title_or_disabled_sport_is_dropped() {
        let t = now().timestamp();
        let batch = vec![
            raw("1", "   ", "NBA", t, t + 3600),
            raw("2", "Hockey", "NHL", t, t + 3600),
        ];
        let normalizer = Normalizer::new(vec![Sport::Nba]);
        assert!(normalizer.normalize(&batch, now()).is_empty());
    }

    #[test]
    fn records_without_id_or_name_are_skipped() {
        let t = now().timestamp();
        let mut no_id = raw("", "Orphan", "NBA", t, t + 3600);
        no_id.id = None;
        let mut null_name = raw("2", "", "NBA", t, t + 3600);
        null_name.name = None;
        let batch = vec![no_id, null_name, raw("3", "Kept", "NBA", t, t + 3600)];

        let events = normalize(&batch, now());
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
    }

    #[test]
    fn events_without_end_never_expire() {
        let mut event = raw("1", "Open ended", "MLB", 0, 0);
        event.starts_at = None;
        event.ends_at = None;
        let events = normalize(&[event], now());
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_at.is_none());
        assert!(!events[0].is_expired(now()));
    }

    #[test]
    fn channel_id_is_stable_decimal() {
        let a = channel_id_for("Lakers vs Celtics", Some(1_740_852_000));
        let b = channel_id_for("Lakers vs Celtics", Some(1_740_852_000));
        let c = channel_id_for("Lakers vs Celtics", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.len() <= 10);
        assert!(a.chars().all(|ch| ch.is_ascii_digit()));
        assert_eq!(c, channel_id_for("Lakers vs Celtics", Some(0)));
    }

    #[test]
    fn sport_parsing() {
        assert_eq!("mlb".parse::<Sport>().unwrap(), Sport::Mlb);
        assert_eq!(" NFL ".parse::<Sport>().unwrap(), Sport::Nfl);
        assert!("Soccer".parse::<Sport>().is_err());
        assert_eq!(Sport::Nhl.to_string(), "NHL");
    }
}
