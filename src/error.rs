//! Error taxonomy for the harvest pipeline.
//!
//! None of these are fatal to the daemon loop. Fetch and probe failures turn
//! into "nothing from this page/candidate"; configuration failures drop the
//! offending source at load time.

use thiserror::Error;

/// Failure of a single listing-page request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not decode body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            FetchError::Timeout { url }
        } else if err.is_body() || err.is_decode() {
            FetchError::Body { url, source: err }
        } else {
            FetchError::Transport { url, source: err }
        }
    }
}

/// Why a candidate was not confirmed live.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("probe timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("redirected with HTTP {0}")]
    Redirect(u16),
    #[error("marker not found in response body")]
    MarkerMissing,
    #[error("could not build probe client: {0}")]
    Client(String),
    #[error("probe task aborted")]
    Aborted,
}

impl ProbeFailure {
    /// Short label used for per-cycle failure counts.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeFailure::Timeout => "timeout",
            ProbeFailure::Transport(_) => "transport",
            ProbeFailure::Redirect(_) => "redirect",
            ProbeFailure::MarkerMissing => "marker_missing",
            ProbeFailure::Client(_) => "client",
            ProbeFailure::Aborted => "aborted",
        }
    }
}

/// A source descriptor that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("source '{source_name}': unknown parser '{parser}'")]
    UnknownParser { source_name: String, parser: String },
    #[error("source '{source_name}': pages must be a positive integer or \"auto\", got {value}")]
    InvalidPages { source_name: String, value: String },
    #[error("source '{source_name}': delay must be a non-negative number of seconds, got {value}")]
    InvalidDelay { source_name: String, value: String },
    #[error("source '{source_name}': url '{url}' is not an http(s) url")]
    InvalidUrl { source_name: String, url: String },
    #[error("source '{source_name}': table parser needs distinct ip and port columns")]
    InvalidTableLayout { source_name: String },
}
