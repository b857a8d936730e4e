// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

//! Read side of the relay: renders the published catalog as a playlist and a
//! guide, and reports status. Nothing here touches the network.

pub mod guide;
pub mod playlist;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::catalog::CatalogStore;
use crate::error::FeedError;
use crate::resolved::ResolvedUrlCache;
use crate::scheduler::{RefreshScheduler, RefreshState};

pub use guide::render_guide;
pub use playlist::render_playlist;

pub const PLAYLIST_FILE: &str = "playlist.m3u";
pub const GUIDE_FILE: &str = "epg.xml";

#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub initialized: bool,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub event_count: usize,
    pub generation: u64,
    pub state: Option<RefreshState>,
    pub last_error: Option<String>,
    pub auth_failed: bool,
}

#[derive(Debug, Clone)]
pub struct FeedService {
    catalog: Arc<CatalogStore>,
    resolved: Arc<ResolvedUrlCache>,
    generator_name: String,
    scheduler: Option<Arc<RefreshScheduler>>,
}

impl FeedService {
    pub fn new(
        catalog: Arc<CatalogStore>,
        resolved: Arc<ResolvedUrlCache>,
        generator_name: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            resolved,
            generator_name: generator_name.into(),
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<RefreshScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn render_playlist(&self) -> Result<Vec<u8>, FeedError> {
        self.render_playlist_at(Utc::now())
    }

    pub fn render_playlist_at(&self, now: DateTime<Utc>) -> Result<Vec<u8>, FeedError> {
        let snapshot = self.catalog.current()?;
        Ok(render_playlist(&snapshot, &self.resolved, now).into_bytes())
    }

    pub fn render_guide(&self) -> Result<Vec<u8>, FeedError> {
        self.render_guide_at(Utc::now())
    }

    pub fn render_guide_at(&self, now: DateTime<Utc>) -> Result<Vec<u8>, FeedError> {
        let snapshot = self.catalog.current()?;
        Ok(render_guide(&snapshot, &self.generator_name, now).into_bytes())
    }

    pub fn status(&self) -> FeedStatus {
        let snapshot = self.catalog.current().ok();
        let refresh = self.scheduler.as_ref().map(|s| s.status());

        FeedStatus {
            initialized: snapshot.is_some(),
            last_refreshed_at: snapshot.as_ref().map(|s| s.last_refreshed_at),
            event_count: snapshot.as_ref().map(|s| s.len()).unwrap_or(0),
            generation: snapshot.as_ref().map(|s| s.refresh_generation).unwrap_or(0),
            state: refresh.as_ref().map(|r| r.state),
            last_error: refresh.as_ref().and_then(|r| r.last_error.clone()),
            auth_failed: refresh.as_ref().is_some_and(|r| r.auth_failed),
        }
    }

    /// Writes both feeds into `dir`, each replaced atomically.
    pub async fn export(&self, dir: &Path) -> Result<()> {
        let now = Utc::now();
        let playlist = self.render_playlist_at(now)?;
        let guide = self.render_guide_at(now)?;

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        write_atomic(&dir.join(PLAYLIST_FILE), &playlist).await?;
        write_atomic(&dir.join(GUIDE_FILE), &guide).await?;

        info!("Exported feeds to {}", dir.display());
        Ok(())
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}
