// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Value = Deserialize::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(D::Error::custom("Expected string, number, or null")),
    }
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Value = Deserialize::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("Invalid timestamp: {}", s))),
        _ => Err(D::Error::custom("Expected timestamp, string, or null")),
    }
}

/// One stream record from the catalog listing, with its parent category attached.
///
/// Identity and name are optional here so that one incomplete record does not
/// fail the whole listing; the normalizer skips such records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Name of the enclosing category in the listing.
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub starts_at: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub ends_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    streams: Vec<RawCategory>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCategory {
    #[serde(default)]
    category: String,
    #[serde(default)]
    streams: Vec<RawEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamDetailResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<StreamDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamDetail {
    #[serde(default)]
    vip_mpegts: Option<String>,
}

/// Flattens a catalog response body into its stream records, in listing order.
pub fn parse_catalog(body: &str) -> Result<Vec<RawEvent>, UpstreamError> {
    let response: CatalogResponse = serde_json::from_str(body)?;
    if !response.success {
        return Err(UpstreamError::Format(
            "catalog response indicated failure".to_string(),
        ));
    }

    Ok(response
        .streams
        .into_iter()
        .flat_map(|category| {
            let name = category.category;
            category.streams.into_iter().map(move |mut event| {
                event.category = name.clone();
                event
            })
        })
        .collect())
}

/// Extracts the playable URL from a stream detail response body.
pub fn parse_stream_detail(body: &str) -> Result<String, UpstreamError> {
    let response: StreamDetailResponse = serde_json::from_str(body)?;
    if !response.success {
        return Err(UpstreamError::Format(
            "stream detail response indicated failure".to_string(),
        ));
    }

    let url = response
        .data
        .and_then(|d| d.vip_mpegts)
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| UpstreamError::Format("'vip_mpegts' missing from response".to_string()))?;

    url::Url::parse(&url)
        .map_err(|e| UpstreamError::Format(format!("invalid stream URL {}: {}", url, e)))?;
    Ok(url)
}

/// Narrow interface to the event provider. Implementations do not retry.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_catalog(&self, auth_token: Option<&str>) -> Result<Vec<RawEvent>, UpstreamError>;

    async fn resolve_url(
        &self,
        stream_ref: &str,
        auth_token: Option<&str>,
    ) -> Result<String, UpstreamError>;
}

/// HTTP client for the PPV streams API.
#[derive(Debug, Clone)]
pub struct PpvClient {
    client: Client,
    catalog_url: String,
    stream_url_template: String,
}

impl PpvClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(config.timeout())
                .user_agent(config.user_agent.clone())
                .build()?,
            catalog_url: config.catalog_url.clone(),
            stream_url_template: config.stream_url_template.clone(),
        })
    }

    fn stream_url(&self, stream_ref: &str) -> String {
        self.stream_url_template.replace("{stream_id}", stream_ref)
    }

    async fn get_text(&self, url: &str, auth_token: Option<&str>) -> Result<String, UpstreamError> {
        let token = auth_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamError::Auth("no auth token configured".to_string()))?;

        debug!("Requesting: {}", url);

        let response = self.client.get(url).header("Auth", token).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UpstreamError::Auth(format!("HTTP {} from {}", status, url)));
        }
        if !status.is_success() {
            return Err(UpstreamError::Unavailable(format!(
                "HTTP request failed with status: {}",
                status
            )));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(UpstreamError::Format("Empty response from server".to_string()));
        }
        Ok(body)
    }
}

#[async_trait]
impl UpstreamClient for PpvClient {
    async fn fetch_catalog(&self, auth_token: Option<&str>) -> Result<Vec<RawEvent>, UpstreamError> {
        let body = self.get_text(&self.catalog_url, auth_token).await?;
        let events = parse_catalog(&body).inspect_err(|e| {
            warn!("Catalog response from {} did not parse: {}", self.catalog_url, e);
        })?;
        debug!("Fetched {} catalog records", events.len());
        Ok(events)
    }

    async fn resolve_url(
        &self,
        stream_ref: &str,
        auth_token: Option<&str>,
    ) -> Result<String, UpstreamError> {
        let url = self.stream_url(stream_ref);
        let body = self.get_text(&url, auth_token).await?;
        parse_stream_detail(&body)
    }
}
