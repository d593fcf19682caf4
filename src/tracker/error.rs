//! Error types for the issue tracker client.
//!
//! Every HTTP-level variant keeps the response status and raw body so a failed
//! dispatch can be diagnosed from the log alone.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised while talking to the issue tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// HTTP 401, or 403 without an exhausted rate limit.
    #[error("authentication failed (status {status}): {body}")]
    Unauthorized { status: u16, body: String },

    /// The API quota is exhausted. `reset_at` comes from `x-ratelimit-reset`.
    #[error("rate limited (status {status}), resets at {}", fmt_reset(.reset_at))]
    RateLimited {
        status: u16,
        reset_at: Option<DateTime<Utc>>,
        body: String,
    },

    #[error("not found (status {status}): {body}")]
    NotFound { status: u16, body: String },

    /// Any other non-success status, or GraphQL-level errors (reported as status 200).
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to parse tracker response: {0}")]
    Parse(String),
}

impl TrackerError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TrackerError::Unauthorized { status, .. }
            | TrackerError::RateLimited { status, .. }
            | TrackerError::NotFound { status, .. }
            | TrackerError::Api { status, .. } => Some(*status),
            TrackerError::Network(e) => e.status().map(|s| s.as_u16()),
            TrackerError::Parse(_) => None,
        }
    }
}

fn fmt_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    reset_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "an unknown time".to_string())
}
