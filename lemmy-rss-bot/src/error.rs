//! Typed error taxonomy.
//!
//! Variants that another module needs to match on (to decide whether a
//! failure is transient, a data-integrity violation, or something to
//! surface verbatim to an operator) are `thiserror`-derived here.
//! Everything else stays as `anyhow::Error` with `.context(...)` at the
//! call site.

use thiserror::Error;

/// Errors raised by the persistence layer (4.A).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remove_feed requires at least one of community_key or feed_url")]
    NoSelector,

    #[error("update_feed_url matched {matched} feeds for community_key {community_key:?}, expected exactly 1")]
    AmbiguousSelector {
        community_key: String,
        matched: u64,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Errors raised by the remote API client (4.B).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transient failure calling {operation}: {source}")]
    Transient {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} failed with status {status}: {body}")]
    Api {
        operation: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("no cached token and no password supplied for identity {identity}")]
    NoCredentials { identity: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// True for network-layer problems (timeout/connect/DNS) as opposed to
    /// an HTTP-level rejection, per the class-5 "connection-class error"
    /// distinction in the error handling design.
    pub fn is_connection_class(&self) -> bool {
        match self {
            ClientError::Transient { source, .. } => {
                source.is_connect() || source.is_timeout()
            }
            ClientError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Errors raised by the feed fetcher (4.C).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("feed fetch for {url} failed with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to parse feed body from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: feed_rs::parser::ParseFeedError,
    },
}
