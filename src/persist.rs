// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::{debug, info, warn};

use crate::catalog::CatalogSnapshot;
use crate::resolved::ResolvedUrlEntry;

const CATALOG_FILE: &str = "catalog.json";
const RESOLVED_FILE: &str = "resolved_urls.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub created_at: DateTime<Utc>,
    pub generation: u64,
}

impl CacheMetadata {
    pub fn new(generation: u64) -> Self {
        Self {
            created_at: Utc::now(),
            generation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub metadata: CacheMetadata,
    pub data: T,
}

impl<T> CachedData<T> {
    pub fn new(data: T, metadata: CacheMetadata) -> Self {
        Self { metadata, data }
    }
}

/// State recovered from disk at startup.
#[derive(Debug, Default)]
pub struct PersistedState {
    pub snapshot: Option<CatalogSnapshot>,
    pub resolved: Vec<ResolvedUrlEntry>,
}

/// Stores the last published catalog and the resolved URL cache as two
/// independent JSON records in a data directory.
#[derive(Debug, Clone)]
pub struct PersistenceAdapter {
    data_dir: PathBuf,
}

impl PersistenceAdapter {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILE)
    }

    fn resolved_path(&self) -> PathBuf {
        self.data_dir.join(RESOLVED_FILE)
    }

    /// Writes both records. Each file is written to a temporary sibling and
    /// renamed into place, so a reader or a crash never sees a partial file.
    pub async fn save(
        &self,
        snapshot: &CatalogSnapshot,
        resolved: &[ResolvedUrlEntry],
    ) -> Result<()> {
        async_fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| {
                format!("Failed to create data directory: {}", self.data_dir.display())
            })?;

        let metadata = CacheMetadata::new(snapshot.refresh_generation);
        write_record(
            &self.catalog_path(),
            &CachedData::new(snapshot, metadata.clone()),
        )
        .await?;
        write_record(&self.resolved_path(), &CachedData::new(resolved, metadata)).await?;

        debug!(
            "Saved catalog generation {} ({} events, {} resolved URLs) to {}",
            snapshot.refresh_generation,
            snapshot.len(),
            resolved.len(),
            self.data_dir.display()
        );
        Ok(())
    }

    /// Loads whatever is on disk. Missing or unreadable records come back as
    /// absent/empty; they are logged, not returned as errors.
    pub async fn load(&self) -> PersistedState {
        let snapshot = match read_record::<CatalogSnapshot>(&self.catalog_path()).await {
            Ok(Some(cached)) => {
                info!(
                    "Loaded catalog generation {} ({} events) from disk",
                    cached.data.refresh_generation,
                    cached.data.len()
                );
                Some(cached.data)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable catalog cache: {:#}", e);
                None
            }
        };

        let resolved = match read_record::<Vec<ResolvedUrlEntry>>(&self.resolved_path()).await {
            Ok(Some(cached)) => {
                info!("Loaded {} resolved URLs from disk", cached.data.len());
                cached.data
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Ignoring unreadable resolved URL cache: {:#}", e);
                Vec::new()
            }
        };

        PersistedState { snapshot, resolved }
    }

    pub async fn clear(&self) -> Result<()> {
        for path in [self.catalog_path(), self.resolved_path()] {
            if async_fs::try_exists(&path).await.unwrap_or(false) {
                async_fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to remove cache file: {}", path.display()))?;
            }
        }
        Ok(())
    }
}

async fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let content =
        serde_json::to_string_pretty(record).with_context(|| "Failed to serialize cache data")?;

    let tmp_path = path.with_extension("json.tmp");
    async_fs::write(&tmp_path, content)
        .await
        .with_context(|| format!("Failed to write cache file: {}", tmp_path.display()))?;
    async_fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move cache file into place: {}", path.display()))?;
    Ok(())
}

async fn read_record<T>(path: &Path) -> Result<Option<CachedData<T>>>
where
    T: for<'de> Deserialize<'de>,
{
    if !async_fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }

    let content = async_fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read cache file: {}", path.display()))?;

    let cached: CachedData<T> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse cache JSON: {}", path.display()))?;

    Ok(Some(cached))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Sport, channel_id_for};
    use chrono::TimeZone;

    fn snapshot() -> CatalogSnapshot {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        CatalogSnapshot::new(
            vec![Event {
                id: "101".to_string(),
                channel_id: channel_id_for("Lakers vs Celtics", Some(1_740_852_000)),
                title: "Lakers vs Celtics".to_string(),
                sport: Sport::Nba,
                logo_url: Some("https://img/1.png".to_string()),
                tag: Some("ESPN".to_string()),
                starts_at: Some(at),
                ends_at: None,
                stream_ref: "101".to_string(),
            }],
            at,
            4,
        )
    }

    #[tokio::test]
    async fn empty_directory_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = PersistenceAdapter::new(dir.path().join("missing"));
        let state = adapter.load().await;
        assert!(state.snapshot.is_none());
        assert!(state.resolved.is_empty());
    }

    #[tokio::test]
    async fn saved_state_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = PersistenceAdapter::new(dir.path());
        let snapshot = snapshot();
        let resolved = vec![ResolvedUrlEntry {
            event_id: "101".to_string(),
            url: "https://cdn/101.ts".to_string(),
            resolved_at: snapshot.last_refreshed_at,
        }];

        adapter.save(&snapshot, &resolved).await.unwrap();
        let state = adapter.load().await;

        assert_eq!(state.snapshot.as_ref(), Some(&snapshot));
        assert_eq!(state.resolved, resolved);
        assert!(!dir.path().join("catalog.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_record_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = PersistenceAdapter::new(dir.path());
        adapter.save(&snapshot(), &[]).await.unwrap();
        std::fs::write(dir.path().join("catalog.json"), "{not json").unwrap();

        let state = adapter.load().await;
        assert!(state.snapshot.is_none());
        assert!(state.resolved.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_records() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = PersistenceAdapter::new(dir.path());
        adapter.save(&snapshot(), &[]).await.unwrap();
        adapter.clear().await.unwrap();
        assert!(adapter.load().await.snapshot.is_none());
    }
}
