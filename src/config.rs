// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::event::Sport;

/// Environment variable that overrides `upstream.auth_token`.
pub const AUTH_TOKEN_ENV: &str = "PPV_AUTH_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub refresh: RefreshConfig,
    pub cache: CacheConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub catalog_url: String,
    /// Detail endpoint; `{stream_id}` is replaced with the event's stream reference.
    pub stream_url_template: String,
    pub auth_token: Option<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    pub unresolved_policy: UnresolvedPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub data_dir: Option<PathBuf>,
    pub url_freshness_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub sports: Vec<Sport>,
    pub generator_name: String,
    pub output_dir: Option<PathBuf>,
}

/// What a refresh does with an event whose stream could not be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Keep the event in the catalog: it appears in the guide but not the playlist.
    #[default]
    GuideOnly,
    /// Remove the event from the published catalog.
    Drop,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            catalog_url: "https://ppv.wtf/api/streams".to_string(),
            stream_url_template: "https://ppvs.su/api/streams/{stream_id}".to_string(),
            auth_token: None,
            user_agent: "PlexRelay/1.0".to_string(),
            timeout_secs: 15,
        }
    }
}

impl UpstreamConfig {
    /// Per-request timeout; a zero in the file is treated as one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10800,
            unresolved_policy: UnresolvedPolicy::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            url_freshness_secs: 3600,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            sports: Sport::ALL.to_vec(),
            generator_name: "PlexRelay".to_string(),
            output_dir: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Config {
        if !path.as_ref().exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Could not load config file, using defaults: {:#}", e);
            Self::default()
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("plexrelay").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh.interval_secs == 0 {
            anyhow::bail!("refresh.interval_secs must be greater than zero");
        }
        if self.cache.url_freshness_secs == 0 {
            anyhow::bail!("cache.url_freshness_secs must be greater than zero");
        }
        if self.cache.url_freshness_secs >= self.refresh.interval_secs {
            anyhow::bail!(
                "cache.url_freshness_secs ({}) must be shorter than refresh.interval_secs ({})",
                self.cache.url_freshness_secs,
                self.refresh.interval_secs
            );
        }
        if !self.upstream.stream_url_template.contains("{stream_id}") {
            anyhow::bail!("upstream.stream_url_template must contain {{stream_id}}");
        }
        url::Url::parse(&self.upstream.catalog_url)
            .with_context(|| format!("Invalid catalog URL: {}", self.upstream.catalog_url))?;
        Ok(())
    }

    /// The token passed to the upstream, preferring the environment over the file.
    pub fn auth_token(&self) -> Option<String> {
        std::env::var(AUTH_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.upstream.auth_token.clone())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache.data_dir {
            return Ok(dir.clone());
        }
        Ok(dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))?
            .join("plexrelay"))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }

    pub fn url_freshness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache.url_freshness_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.refresh.interval_secs, 10800);
        assert_eq!(config.feed.sports.len(), 4);
        assert_eq!(config.refresh.unresolved_policy, UnresolvedPolicy::GuideOnly);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [refresh]
            unresolved_policy = "drop"

            [feed]
            sports = ["NBA", "NHL"]
            "#,
        )
        .unwrap();
        assert_eq!(config.refresh.unresolved_policy, UnresolvedPolicy::Drop);
        assert_eq!(config.feed.sports, vec![Sport::Nba, Sport::Nhl]);
        assert_eq!(config.cache.url_freshness_secs, 3600);
        assert_eq!(config.upstream.timeout(), Duration::from_secs(15));
    }

    #[test]
    fn freshness_must_be_shorter_than_interval() {
        let mut config = Config::default();
        config.cache.url_freshness_secs = config.refresh.interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.feed.generator_name = "Test".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.feed.generator_name, "Test");
    }
}
