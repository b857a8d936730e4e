// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use thiserror::Error;

/// Failures reported by an [`crate::upstream::UpstreamClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Transport failure, timeout or a non-success HTTP status.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    /// Credentials were missing or rejected.
    #[error("upstream rejected credentials: {0}")]
    Auth(String),
    /// The response could not be parsed into the expected shape.
    #[error("unexpected upstream payload: {0}")]
    Format(String),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Auth(_) => "auth",
            Self::Format(_) => "format",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Format(e.to_string());
        }
        if let Some(status) = e.status()
            && (status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN)
        {
            return Self::Auth(status.to_string());
        }
        Self::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e.to_string())
    }
}

/// A single event whose stream reference could not be turned into a URL.
#[derive(Debug, Clone, Error)]
#[error("failed to resolve stream for event {event_id}: {source}")]
pub struct ResolutionFailure {
    pub event_id: String,
    #[source]
    pub source: UpstreamError,
}

/// Errors surfaced to feed consumers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// No snapshot has been published yet; callers should answer 503 rather
    /// than serve an empty feed.
    #[error("catalog not yet initialized")]
    NotReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_failure_names_event() {
        let failure = ResolutionFailure {
            event_id: "42".to_string(),
            source: UpstreamError::Unavailable("timed out".to_string()),
        };
        let msg = failure.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn kinds() {
        assert_eq!(UpstreamError::Auth(String::new()).kind(), "auth");
        assert!(UpstreamError::Auth(String::new()).is_auth());
        assert!(!UpstreamError::Format(String::new()).is_auth());
    }
}
