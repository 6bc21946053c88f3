//! 4.C Feed fetcher — conditional GET plus feed-XML parsing.
//!
//! Every failure mode (network, non-recoverable status, parse error) is
//! treated identically by the caller: the feed is skipped this cycle and
//! its validators are left untouched. This module only distinguishes them
//! for logging.

use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::{header, Client, StatusCode};

use crate::error::FetchError;

const USER_AGENT: &str = "Lemmy RSSBot";
const TIMEOUT: Duration = Duration::from_secs(30);

/// One syndication entry as surfaced to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub url: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
}

/// Validators carried forward between polls of the same feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validators {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

/// Result of one fetch attempt. `entries` is empty both for a genuine 304
/// and for any failure; `validators` is always the value the caller should
/// persist (the fresh ones on success, the prior ones otherwise).
pub struct FetchOutcome {
    pub entries: Vec<FeedEntry>,
    pub validators: Validators,
}

pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder().timeout(TIMEOUT).user_agent(USER_AGENT).build()
}

/// Fetch and parse one feed, honoring the prior validators. Failures are
/// swallowed into a `FetchOutcome` carrying the prior validators unchanged
/// and no entries; the cause is returned alongside for the caller to log.
pub async fn fetch_feed(
    client: &Client,
    feed_url: &str,
    prior: &Validators,
) -> FetchOutcome {
    match fetch_feed_inner(client, feed_url, prior).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(url = feed_url, error = %err, "feed fetch failed, skipping this cycle");
            FetchOutcome {
                entries: Vec::new(),
                validators: prior.clone(),
            }
        }
    }
}

async fn fetch_feed_inner(
    client: &Client,
    feed_url: &str,
    prior: &Validators,
) -> Result<FetchOutcome, FetchError> {
    let mut request = client.get(feed_url);
    if let Some(last_modified) = &prior.last_modified {
        request = request.header(header::IF_MODIFIED_SINCE, last_modified);
    }
    if let Some(etag) = &prior.etag {
        request = request.header(header::IF_NONE_MATCH, etag);
    }

    let response = request
        .send()
        .await
        .map_err(|source| FetchError::Network {
            url: feed_url.to_string(),
            source,
        })?;

    if response.status() == StatusCode::NOT_MODIFIED {
        return Ok(FetchOutcome {
            entries: Vec::new(),
            validators: prior.clone(),
        });
    }

    if !response.status().is_success() {
        return Err(FetchError::Status {
            url: feed_url.to_string(),
            status: response.status(),
        });
    }

    let fresh_validators = Validators {
        last_modified: response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| prior.last_modified.clone()),
        etag: response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| prior.etag.clone()),
    };

    let body = response
        .bytes()
        .await
        .map_err(|source| FetchError::Network {
            url: feed_url.to_string(),
            source,
        })?;

    let parsed = parser::parse(body.as_ref()).map_err(|source| FetchError::Parse {
        url: feed_url.to_string(),
        source,
    })?;

    let entries = parsed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.links.first()?.href.clone();
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let published_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);
            Some(FeedEntry {
                url,
                title,
                published_at: published_at.into(),
            })
        })
        .collect();

    Ok(FetchOutcome {
        entries,
        validators: fresh_validators,
    })
}
