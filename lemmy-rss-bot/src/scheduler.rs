//! 4.F Scheduler / main loop — orchestrates fetch → stage → publish →
//! reschedule for every due feed, and runs the command processor during
//! its idle sleep.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use common::Settings;

use crate::cadence;
use crate::client::{ClientMap, CreatePostOptions};
use crate::commands;
use crate::error::ClientError;
use crate::fetcher::{self, Validators};
use crate::normalize;
use crate::persistence::{Feed, Store};

/// Articles older than this are never staged; a feed that has gone stale
/// for a while shouldn't dump its entire backlog the moment it wakes up.
const POST_WINDOW: ChronoDuration = ChronoDuration::days(3);

const SLEEP_SLICE: std::time::Duration = std::time::Duration::from_secs(60);

/// Runs forever. The caller (`main`) races this against `ctrl_c()`.
pub async fn run(store: Arc<dyn Store>, clients: ClientMap, settings: Arc<Settings>) -> anyhow::Result<()> {
    let http = fetcher::build_client()?;

    loop {
        if let Err(err) = run_once(&store, &clients, &settings, &http).await {
            let connection_class = err
                .chain()
                .filter_map(|cause| cause.downcast_ref::<ClientError>())
                .any(|e| e.is_connection_class());

            if connection_class {
                tracing::warn!(error = %err, "connection-class error in outer loop, retrying in 60s");
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                continue;
            }

            tracing::error!(error = %err, "unexpected error in outer loop, aborting");
            return Err(err);
        }
    }
}

/// Run a single outer iteration: sleep to the earliest due feed (running the
/// command processor on each slice), then process every due feed in turn.
/// Exposed for tests that want to drive one iteration deterministically.
pub async fn run_once(
    store: &Arc<dyn Store>,
    clients: &ClientMap,
    settings: &Arc<Settings>,
    http: &reqwest::Client,
) -> anyhow::Result<()> {
    let feeds = store.list_feeds().await?;
    let now = Utc::now();

    let wake = feeds
        .iter()
        .filter_map(|f| f.next_check_at)
        .min()
        .unwrap_or(now + cadence::MIN);

    sleep_until(wake, store, clients, settings).await;
    for (identity, client) in clients {
        commands::process_identity(client.as_ref(), *identity, store.as_ref(), settings).await;
    }

    let feeds = store.list_feeds().await?;
    let now = Utc::now();
    let mut visited_origins: HashSet<String> = HashSet::new();

    for feed in &feeds {
        if let Some(next) = feed.next_check_at {
            if next > now {
                continue;
            }
        }

        let origin = url::Url::parse(&feed.feed_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        if let Some(host) = &origin {
            if visited_origins.contains(host) {
                continue;
            }
            visited_origins.insert(host.clone());
        }

        let Some(client) = clients.get(&feed.bot_identity) else {
            tracing::error!(feed_id = feed.id, identity = %feed.bot_identity, "no client for feed's bot identity");
            continue;
        };

        if let Err(err) = process_feed(store.as_ref(), feed, client.as_ref(), http).await {
            tracing::warn!(feed_id = feed.id, error = %err, "error processing feed, will retry next cycle");
        }
    }

    Ok(())
}

async fn sleep_until(
    wake: chrono::DateTime<Utc>,
    store: &Arc<dyn Store>,
    clients: &ClientMap,
    settings: &Arc<Settings>,
) {
    loop {
        let now = Utc::now();
        if now >= wake {
            return;
        }
        let remaining = wake - now;
        let slice = remaining
            .to_std()
            .unwrap_or(SLEEP_SLICE)
            .min(SLEEP_SLICE);
        tokio::time::sleep(slice).await;

        for (identity, client) in clients {
            commands::process_identity(client.as_ref(), *identity, store.as_ref(), settings).await;
        }
    }
}

async fn process_feed(
    store: &dyn Store,
    feed: &Feed,
    client: &dyn crate::client::PublishClient,
    http: &reqwest::Client,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let had_backlog = store.get_earliest_unposted(feed.id).await?.is_some();

    let validators = if !had_backlog {
        let prior = Validators {
            last_modified: feed.last_modified.clone(),
            etag: feed.etag.clone(),
        };
        let outcome = fetcher::fetch_feed(http, &feed.feed_url, &prior).await;

        let mut entries = outcome.entries;
        entries.sort_by_key(|e| e.published_at);

        for entry in entries {
            if normalize::is_blacklisted(&entry.title) {
                tracing::debug!(url = %entry.url, "dropping blacklisted entry");
                continue;
            }
            if store.get_article_by_url(&entry.url).await?.is_some() {
                continue;
            }
            if now - entry.published_at > POST_WINDOW {
                continue;
            }
            let headline = normalize::normalize_headline(&entry.title);
            store
                .add_article(feed.id, &entry.url, &headline, entry.published_at, None)
                .await?;
        }

        outcome.validators
    } else {
        Validators {
            last_modified: feed.last_modified.clone(),
            etag: feed.etag.clone(),
        }
    };

    if let Some(article) = store.get_earliest_unposted(feed.id).await? {
        // Late-arriving normalization: the blacklist/trim pipeline may have
        // changed since this article was staged.
        let headline = normalize::normalize_headline(&article.headline);
        let opts = CreatePostOptions {
            community_id: feed.community_id,
            title: headline,
            url: article.article_url.clone(),
            body: None,
        };
        match client.create_post(opts).await {
            Ok(remote_post_id) => {
                store.set_article_post_id(article.id, remote_post_id).await?;
            }
            Err(err) => {
                tracing::warn!(article_id = article.id, error = %err, "publish failed, will retry next cycle");
            }
        }
    }

    let still_unposted = store.get_earliest_unposted(feed.id).await?.is_some();
    let next_check_at = if still_unposted {
        now + cadence::MIN
    } else {
        // Whether or not a fetch happened this cycle, the store already
        // reflects either the freshly staged entries or the prior backlog,
        // so the same query serves both cases of 4.E's input.
        let timestamps = store.get_recent_article_timestamps(feed.id, 20).await?;
        cadence::next_check_at(&timestamps, now)
    };

    store
        .update_feed_validators(feed.id, validators.last_modified.as_deref(), validators.etag.as_deref(), next_check_at)
        .await?;

    Ok(())
}
