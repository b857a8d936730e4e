// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

//! Background refresh of the catalog.
//!
//! A cycle moves `Idle -> Refreshing -> Published | Failed -> Idle`. Only
//! one cycle runs at a time; a trigger that arrives while a cycle is running
//! is dropped, not queued. A failed cycle leaves the published catalog as it
//! was and does not move the next scheduled tick forward.
//!
//! Between catalog refreshes a lighter pass re-resolves stream URLs every half
//! freshness window, so a URL is always renewed before it goes stale.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogSnapshot, CatalogStore};
use crate::config::{Config, UnresolvedPolicy};
use crate::error::{ResolutionFailure, UpstreamError};
use crate::event::{Normalizer, Sport};
use crate::persist::PersistenceAdapter;
use crate::resolved::ResolvedUrlCache;
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing,
    Published,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStatus {
    pub state: RefreshState,
    /// Terminal state of the most recent completed cycle.
    pub last_result: Option<RefreshState>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set when the upstream rejected the token; cleared by the next success.
    pub auth_failed: bool,
    pub cycles: u64,
    pub failures: u64,
}

/// Summary of a published cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub generation: u64,
    pub events: usize,
    /// URLs served from the cache without an upstream call.
    pub reused: usize,
    /// URLs resolved during this cycle.
    pub resolved: usize,
    /// Events kept without a URL (guide only).
    pub unresolved: usize,
    /// Events removed because their URL could not be resolved.
    pub dropped: usize,
    pub evicted: usize,
}

/// Summary of a URL renewal pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalReport {
    pub renewed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(CycleReport),
    /// Another cycle was already running.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub interval: Duration,
    pub unresolved_policy: UnresolvedPolicy,
    pub sports: Vec<Sport>,
    pub auth_token: Option<String>,
}

impl RefreshSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.refresh_interval(),
            unresolved_policy: config.refresh.unresolved_policy,
            sports: config.feed.sports.clone(),
            auth_token: config.auth_token(),
        }
    }
}

pub struct RefreshScheduler {
    client: Arc<dyn UpstreamClient>,
    catalog: Arc<CatalogStore>,
    resolved: Arc<ResolvedUrlCache>,
    persistence: Option<PersistenceAdapter>,
    normalizer: Normalizer,
    settings: RefreshSettings,
    /// Period of the URL renewal pass, and how far ahead a cached URL must
    /// stay fresh to be reused.
    url_renewal: chrono::Duration,
    cycle_lock: Mutex<()>,
    status: RwLock<RefreshStatus>,
}

enum Trigger {
    Catalog,
    Urls,
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("interval", &self.settings.interval)
            .field("unresolved_policy", &self.settings.unresolved_policy)
            .field("status", &*self.status.read())
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        catalog: Arc<CatalogStore>,
        resolved: Arc<ResolvedUrlCache>,
        settings: RefreshSettings,
    ) -> Self {
        let url_renewal = resolved.freshness() / 2;
        Self {
            client,
            catalog,
            resolved,
            url_renewal,
            persistence: None,
            normalizer: Normalizer::new(settings.sports.clone()),
            settings,
            cycle_lock: Mutex::new(()),
            status: RwLock::new(RefreshStatus::default()),
        }
    }

    pub fn with_persistence(mut self, persistence: PersistenceAdapter) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.read().clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.status.read().state == RefreshState::Refreshing
    }

    /// True unless the cached URL stays fresh until the next renewal pass.
    fn needs_url(&self, event_id: &str, now: DateTime<Utc>) -> bool {
        self.resolved.get(event_id, now + self.url_renewal).is_none()
    }

    fn transition(&self, state: RefreshState) {
        let mut status = self.status.write();
        debug!("Refresh state {:?} -> {:?}", status.state, state);
        status.state = state;
    }

    /// Runs one cycle unless one is already in progress.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, UpstreamError> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Refresh already in progress, skipping trigger");
            return Ok(CycleOutcome::Coalesced);
        };

        self.transition(RefreshState::Refreshing);
        {
            let mut status = self.status.write();
            status.last_attempt_at = Some(now);
            status.cycles += 1;
        }

        let result = self.refresh(now).await;

        match &result {
            Ok(report) => {
                self.transition(RefreshState::Published);
                let mut status = self.status.write();
                status.last_result = Some(RefreshState::Published);
                status.last_success_at = Some(now);
                status.last_error = None;
                status.auth_failed = false;
                info!(
                    "Published catalog generation {}: {} events ({} cached URLs, {} resolved, {} unresolved, {} dropped, {} evicted)",
                    report.generation,
                    report.events,
                    report.reused,
                    report.resolved,
                    report.unresolved,
                    report.dropped,
                    report.evicted
                );
            }
            Err(e) => {
                match e {
                    UpstreamError::Auth(_) => error!(
                        "Catalog refresh rejected by upstream, keeping previous catalog; check the auth token: {}",
                        e
                    ),
                    UpstreamError::Format(_) => error!(
                        "Catalog refresh got an unexpected payload, keeping previous catalog; the upstream API may have changed: {}",
                        e
                    ),
                    UpstreamError::Unavailable(_) => {
                        warn!("Catalog refresh failed, keeping previous catalog: {}", e)
                    }
                }
                self.transition(RefreshState::Failed);
                let mut status = self.status.write();
                status.last_result = Some(RefreshState::Failed);
                status.last_error = Some(e.to_string());
                status.auth_failed = e.is_auth();
                status.failures += 1;
            }
        }

        self.transition(RefreshState::Idle);
        result.map(CycleOutcome::Published)
    }

    async fn refresh(&self, now: DateTime<Utc>) -> Result<CycleReport, UpstreamError> {
        let token = self.settings.auth_token.as_deref();

        info!("Fetching event catalog from upstream...");
        let raw_events = self.client.fetch_catalog(token).await?;
        let events = self.normalizer.normalize(&raw_events, now);
        debug!(
            "Normalized {} of {} catalog records",
            events.len(),
            raw_events.len()
        );

        let mut report = CycleReport::default();
        let mut kept = Vec::with_capacity(events.len());

        for event in events {
            if !self.needs_url(&event.id, now) {
                report.reused += 1;
                kept.push(event);
                continue;
            }

            match self.client.resolve_url(&event.stream_ref, token).await {
                Ok(url) => {
                    debug!("Resolved stream for {} ('{}')", event.id, event.title);
                    self.resolved.put(&event.id, url, now);
                    report.resolved += 1;
                    kept.push(event);
                }
                Err(source) => {
                    let failure = ResolutionFailure {
                        event_id: event.id.clone(),
                        source,
                    };
                    match self.settings.unresolved_policy {
                        UnresolvedPolicy::GuideOnly => {
                            warn!("{}; listing '{}' in the guide only", failure, event.title);
                            report.unresolved += 1;
                            kept.push(event);
                        }
                        UnresolvedPolicy::Drop => {
                            warn!("{}; dropping '{}'", failure, event.title);
                            report.dropped += 1;
                        }
                    }
                }
            }
        }

        report.generation = self.catalog.generation() + 1;
        report.events = kept.len();

        let snapshot = self
            .catalog
            .publish(CatalogSnapshot::new(kept, now, report.generation));

        let live_ids: HashSet<&str> = snapshot.events.iter().map(|e| e.id.as_str()).collect();
        report.evicted = self.resolved.evict_outside(&live_ids, now);

        if let Some(persistence) = &self.persistence
            && let Err(e) = persistence.save(&snapshot, &self.resolved.entries()).await
        {
            warn!("Failed to persist catalog, continuing with in-memory state: {:#}", e);
        }

        Ok(report)
    }

    /// Re-resolves URLs for the published catalog's live events that would go
    /// stale before the next pass. The catalog itself is not fetched. Returns
    /// `None` when a refresh is already running or nothing is published yet.
    pub async fn renew_urls(&self, now: DateTime<Utc>) -> Option<RenewalReport> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Refresh in progress, skipping URL renewal");
            return None;
        };
        let Ok(snapshot) = self.catalog.current() else {
            debug!("No catalog published yet, skipping URL renewal");
            return None;
        };

        let token = self.settings.auth_token.as_deref();
        let mut report = RenewalReport::default();

        for event in snapshot.live_events(now) {
            if !self.needs_url(&event.id, now) {
                continue;
            }
            match self.client.resolve_url(&event.stream_ref, token).await {
                Ok(url) => {
                    self.resolved.put(&event.id, url, now);
                    report.renewed += 1;
                }
                Err(source) => {
                    let failure = ResolutionFailure {
                        event_id: event.id.clone(),
                        source,
                    };
                    warn!("{}; will retry on the next pass", failure);
                    report.failed += 1;
                }
            }
        }

        if report.renewed > 0 {
            info!(
                "Renewed {} stream URLs ({} failed)",
                report.renewed, report.failed
            );
            if let Some(persistence) = &self.persistence
                && let Err(e) = persistence.save(&snapshot, &self.resolved.entries()).await
            {
                warn!("Failed to persist renewed URLs: {:#}", e);
            }
        }

        Some(report)
    }

    /// Runs a cycle now, for manual refresh requests.
    pub async fn refresh_now(&self) -> Result<CycleOutcome, UpstreamError> {
        self.run_cycle(Utc::now()).await
    }

    async fn fire(&self, trigger: Trigger) {
        match trigger {
            Trigger::Catalog => {
                // Failures are logged and recorded in the status.
                let _ = self.run_cycle(Utc::now()).await;
            }
            Trigger::Urls => {
                self.renew_urls(Utc::now()).await;
            }
        }
    }

    fn abandon_cycle(&self) {
        let mut status = self.status.write();
        if status.state == RefreshState::Refreshing {
            status.state = RefreshState::Idle;
            status.last_result = Some(RefreshState::Failed);
            status.last_error = Some("refresh abandoned at shutdown".to_string());
        }
    }

    /// Refreshes immediately, then on every interval tick until `shutdown` fires.
    /// URL renewal passes run in between. A cycle still running at shutdown is
    /// abandoned; persisted state is only ever replaced whole, so this cannot
    /// leave a partial record behind.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let renewal = self
            .url_renewal
            .to_std()
            .unwrap_or_default()
            .max(Duration::from_secs(1));
        let mut url_ticker = tokio::time::interval_at(Instant::now() + renewal, renewal);
        url_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Scheduler started. Refreshing catalog every {} seconds, stream URLs every {} seconds.",
            self.settings.interval.as_secs(),
            renewal.as_secs()
        );

        loop {
            let trigger = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => Trigger::Catalog,
                _ = url_ticker.tick() => Trigger::Urls,
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested during refresh, abandoning cycle");
                    self.abandon_cycle();
                    break;
                }
                _ = self.fire(trigger) => {}
            }
        }

        info!("Scheduler stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}
