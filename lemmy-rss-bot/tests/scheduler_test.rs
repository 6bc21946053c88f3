//! Exercises the scheduler's per-origin politeness throttle (seed suite
//! scenario 6): two feeds sharing a hostname, both due, only one fetched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{BotIdentity, Settings};
use lemmy_rss_bot::client::{
    ClientMap, CreateCommunityOptions, CreatePostOptions, Moderator, PrivateMessage, PublishClient,
    ResolvedCommunity,
};
use lemmy_rss_bot::error::ClientError;
use lemmy_rss_bot::fetcher;
use lemmy_rss_bot::persistence::{SqliteStore, Store};
use lemmy_rss_bot::scheduler;

/// A client with no unread mail and no posts to make; exists only so the
/// scheduler has something to multiplex the command processor against
/// without reaching the network.
struct IdleClient;

#[async_trait]
impl PublishClient for IdleClient {
    async fn create_post(&self, _opts: CreatePostOptions) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn create_community(&self, _opts: CreateCommunityOptions) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn fetch_community_id(&self, _community_key: &str) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn fetch_user_id(&self, _actor_identifier: &str) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn resolve_community(&self, _community_key: &str) -> Result<Option<ResolvedCommunity>, ClientError> {
        Ok(None)
    }

    async fn fetch_community_moderators(&self, _community_key: &str) -> Result<Vec<Moderator>, ClientError> {
        Ok(vec![])
    }

    async fn appoint_mod(&self, _community_id: i64, _person_id: i64, _added: bool) -> Result<(), ClientError> {
        Ok(())
    }

    async fn subscribe_to_community(&self, _community_id: i64, _follow: bool) -> Result<(), ClientError> {
        Ok(())
    }

    async fn list_private_messages(&self, _unread_only: bool) -> Result<Vec<PrivateMessage>, ClientError> {
        Ok(vec![])
    }

    async fn mark_private_message_read(&self, _id: i64) -> Result<(), ClientError> {
        Ok(())
    }

    async fn send_private_message(&self, _recipient_id: i64, _content: &str) -> Result<(), ClientError> {
        Ok(())
    }
}

async fn memory_store() -> Arc<dyn Store> {
    let pool = common::init_db_pool("sqlite::memory:").await.unwrap();
    common::run_migrations(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

#[tokio::test]
async fn only_one_feed_per_shared_hostname_is_fetched_per_iteration() {
    let mut mock_server = mockito::Server::new_async().await;
    let host = mock_server.url();

    let mock = mock_server
        .mock("GET", mockito::Matcher::Any)
        .with_status(200)
        .with_body(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>f</title></channel></rss>"#,
        )
        .expect(1)
        .create_async()
        .await;

    let store = memory_store().await;
    let due = Some(Utc::now() - Duration::minutes(1));

    let feed_a = store
        .add_feed(&format!("{host}/a.xml"), "a", 1, BotIdentity::Bot)
        .await
        .unwrap();
    store
        .update_feed_validators(feed_a.id, None, None, due.unwrap())
        .await
        .unwrap();

    let feed_b = store
        .add_feed(&format!("{host}/b.xml"), "b", 2, BotIdentity::Bot)
        .await
        .unwrap();
    store
        .update_feed_validators(feed_b.id, None, None, due.unwrap())
        .await
        .unwrap();

    let mut clients: ClientMap = HashMap::new();
    for identity in BotIdentity::ALL {
        clients.insert(identity, Arc::new(IdleClient) as Arc<dyn PublishClient>);
    }

    let settings = Arc::new(Settings {
        lemmy_server: "unused.example.com".to_string(),
        free_bot: "free".to_string(),
        paywall_bot: "paywall".to_string(),
        bot_bot: "bot".to_string(),
        additional_mods: vec![],
        default_community: "news".to_string(),
        request_delay_secs: 0,
        database_path: "unused".to_string(),
        log_dir: "unused".to_string(),
    });

    let http = fetcher::build_client().unwrap();
    scheduler::run_once(&store, &clients, &settings, &http).await.unwrap();

    mock.assert_async().await;

    let feeds = store.list_feeds().await.unwrap();
    let untouched: Vec<_> = feeds.iter().filter(|f| f.next_check_at == due).collect();
    assert_eq!(untouched.len(), 1, "exactly one feed should remain untouched this cycle");
}

/// A client whose `create_post` always fails, used to exercise seed suite
/// scenario 4: a publish failure leaves the article unposted and reschedules
/// the feed to drain the backlog quickly.
struct FailingPublishClient;

#[async_trait]
impl PublishClient for FailingPublishClient {
    async fn create_post(&self, _opts: CreatePostOptions) -> Result<i64, ClientError> {
        Err(ClientError::Api {
            operation: "post",
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        })
    }

    async fn create_community(&self, _opts: CreateCommunityOptions) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn fetch_community_id(&self, _community_key: &str) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn fetch_user_id(&self, _actor_identifier: &str) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn resolve_community(&self, _community_key: &str) -> Result<Option<ResolvedCommunity>, ClientError> {
        Ok(None)
    }

    async fn fetch_community_moderators(&self, _community_key: &str) -> Result<Vec<Moderator>, ClientError> {
        Ok(vec![])
    }

    async fn appoint_mod(&self, _community_id: i64, _person_id: i64, _added: bool) -> Result<(), ClientError> {
        Ok(())
    }

    async fn subscribe_to_community(&self, _community_id: i64, _follow: bool) -> Result<(), ClientError> {
        Ok(())
    }

    async fn list_private_messages(&self, _unread_only: bool) -> Result<Vec<PrivateMessage>, ClientError> {
        Ok(vec![])
    }

    async fn mark_private_message_read(&self, _id: i64) -> Result<(), ClientError> {
        Ok(())
    }

    async fn send_private_message(&self, _recipient_id: i64, _content: &str) -> Result<(), ClientError> {
        Ok(())
    }
}

#[tokio::test]
async fn publish_failure_leaves_article_unposted_and_reschedules_quickly() {
    let mut mock_server = mockito::Server::new_async().await;
    let host = mock_server.url();

    let mock = mock_server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_body(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>f</title>
<item><title>New post</title><link>http://example.com/new</link></item>
</channel></rss>"#,
        )
        .create_async()
        .await;

    let store = memory_store().await;
    let feed = store
        .add_feed(&format!("{host}/feed.xml"), "foo", 1, BotIdentity::Bot)
        .await
        .unwrap();
    store
        .update_feed_validators(feed.id, None, None, Utc::now() - Duration::minutes(1))
        .await
        .unwrap();

    let mut clients: ClientMap = HashMap::new();
    for identity in BotIdentity::ALL {
        clients.insert(identity, Arc::new(FailingPublishClient) as Arc<dyn PublishClient>);
    }

    let settings = Arc::new(Settings {
        lemmy_server: "unused.example.com".to_string(),
        free_bot: "free".to_string(),
        paywall_bot: "paywall".to_string(),
        bot_bot: "bot".to_string(),
        additional_mods: vec![],
        default_community: "news".to_string(),
        request_delay_secs: 0,
        database_path: "unused".to_string(),
        log_dir: "unused".to_string(),
    });

    let http = fetcher::build_client().unwrap();
    let before = Utc::now();
    scheduler::run_once(&store, &clients, &settings, &http).await.unwrap();

    mock.assert_async().await;

    let article = store
        .get_article_by_url("http://example.com/new")
        .await
        .unwrap()
        .expect("article should be staged even though publish failed");
    assert!(article.remote_post_id.is_none());

    let feeds = store.list_feeds().await.unwrap();
    let next_check_at = feeds[0].next_check_at.unwrap();
    assert!(next_check_at <= before + Duration::minutes(5) + Duration::seconds(5));
}
