//! Exercises the command processor (4.G) against a stub `PublishClient`,
//! covering scenario 5 of the seed suite: a moderator adding a feed and
//! listing it back in the same message.

use std::sync::Arc;

use async_trait::async_trait;
use common::{BotIdentity, Settings};
use lemmy_rss_bot::client::{
    CreateCommunityOptions, CreatePostOptions, Moderator, PrivateMessage, PublishClient,
    ResolvedCommunity,
};
use lemmy_rss_bot::commands::process_identity;
use lemmy_rss_bot::error::ClientError;
use lemmy_rss_bot::persistence::{SqliteStore, Store};
use tokio::sync::Mutex;

const SENDER_ID: i64 = 42;

struct StubClient {
    messages: Mutex<Vec<PrivateMessage>>,
    moderators: Vec<Moderator>,
    community_id: i64,
    sent: Mutex<Vec<(i64, String)>>,
    marked_read: Mutex<Vec<i64>>,
}

#[async_trait]
impl PublishClient for StubClient {
    async fn create_post(&self, _opts: CreatePostOptions) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn create_community(&self, _opts: CreateCommunityOptions) -> Result<i64, ClientError> {
        Ok(1)
    }

    async fn fetch_community_id(&self, _community_key: &str) -> Result<i64, ClientError> {
        Ok(self.community_id)
    }

    async fn fetch_user_id(&self, _actor_identifier: &str) -> Result<i64, ClientError> {
        Ok(SENDER_ID)
    }

    async fn resolve_community(
        &self,
        _community_key: &str,
    ) -> Result<Option<ResolvedCommunity>, ClientError> {
        Ok(Some(ResolvedCommunity {
            community_id: self.community_id,
        }))
    }

    async fn fetch_community_moderators(
        &self,
        _community_key: &str,
    ) -> Result<Vec<Moderator>, ClientError> {
        Ok(self.moderators.clone())
    }

    async fn appoint_mod(&self, _community_id: i64, _person_id: i64, _added: bool) -> Result<(), ClientError> {
        Ok(())
    }

    async fn subscribe_to_community(&self, _community_id: i64, _follow: bool) -> Result<(), ClientError> {
        Ok(())
    }

    async fn list_private_messages(&self, _unread_only: bool) -> Result<Vec<PrivateMessage>, ClientError> {
        Ok(self.messages.lock().await.clone())
    }

    async fn mark_private_message_read(&self, id: i64) -> Result<(), ClientError> {
        self.marked_read.lock().await.push(id);
        self.messages.lock().await.retain(|m| m.id != id);
        Ok(())
    }

    async fn send_private_message(&self, recipient_id: i64, content: &str) -> Result<(), ClientError> {
        self.sent.lock().await.push((recipient_id, content.to_string()));
        Ok(())
    }
}

async fn memory_store() -> SqliteStore {
    let pool = common::init_db_pool("sqlite::memory:").await.unwrap();
    common::run_migrations(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn test_settings() -> Settings {
    Settings {
        lemmy_server: "lemmy.example.com".to_string(),
        free_bot: "free".to_string(),
        paywall_bot: "paywall".to_string(),
        bot_bot: "bot".to_string(),
        additional_mods: vec![],
        default_community: "news".to_string(),
        request_delay_secs: 0,
        database_path: "unused".to_string(),
        log_dir: "unused".to_string(),
    }
}

#[tokio::test]
async fn add_then_list_in_one_message_from_a_moderator() {
    let store = memory_store().await;
    let settings = test_settings();

    let client = StubClient {
        messages: Mutex::new(vec![PrivateMessage {
            id: 1,
            creator_id: SENDER_ID,
            content: "/add http://x/rss foo\n/list foo".to_string(),
        }]),
        moderators: vec![Moderator {
            person_id: SENDER_ID,
            actor_id: "https://lemmy.example.com/u/mod".to_string(),
        }],
        community_id: 7,
        sent: Mutex::new(Vec::new()),
        marked_read: Mutex::new(Vec::new()),
    };

    process_identity(&client, BotIdentity::Paywall, &store, &settings).await;

    let feeds = store.list_feeds().await.unwrap();
    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].feed_url, "http://x/rss");
    assert_eq!(feeds[0].community_key, "foo@lemmy.example.com");
    assert_eq!(
        feeds[0].bot_identity,
        BotIdentity::Paywall,
        "feed should be published under whichever identity's inbox received /add"
    );

    let sent = client.sent.lock().await;
    assert_eq!(sent.len(), 1);
    let (recipient, body) = &sent[0];
    assert_eq!(*recipient, SENDER_ID);
    assert!(body.contains("> /add http://x/rss foo"));
    assert!(body.contains("> /list foo"));
    assert!(body.contains("Added http://x/rss to foo@lemmy.example.com"));
    assert!(body.contains("Feeds active for !foo@lemmy.example.com:"));
    assert!(body.contains("* http://x/rss"));

    assert_eq!(*client.marked_read.lock().await, vec![1]);
}

#[tokio::test]
async fn non_moderator_is_rejected() {
    let store = memory_store().await;
    let settings = test_settings();

    let client = StubClient {
        messages: Mutex::new(vec![PrivateMessage {
            id: 2,
            creator_id: 999,
            content: "/add http://x/rss foo".to_string(),
        }]),
        moderators: vec![Moderator {
            person_id: SENDER_ID,
            actor_id: "https://lemmy.example.com/u/mod".to_string(),
        }],
        community_id: 7,
        sent: Mutex::new(Vec::new()),
        marked_read: Mutex::new(Vec::new()),
    };

    process_identity(&client, BotIdentity::Bot, &store, &settings).await;

    assert!(store.list_feeds().await.unwrap().is_empty());
    let sent = client.sent.lock().await;
    assert!(sent[0].1.contains("must be a moderator"));
}
