//! 4.B Remote API client — one authenticated session per `(server, identity)`
//! pair, backed by `reqwest` against the publishing server's v3 REST surface.
//!
//! A client owns its own rate-limit gate and token cache path; nothing here
//! is shared across identities (see `ClientMap`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ClientError;

const RATE_LIMIT_RETRY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct CreatePostOptions {
    pub community_id: i64,
    pub title: String,
    pub url: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCommunityOptions {
    pub name: String,
    pub title: String,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub posting_restricted_to_mods: bool,
}

impl CreateCommunityOptions {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            icon: None,
            description: None,
            posting_restricted_to_mods: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommunity {
    pub community_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Moderator {
    pub person_id: i64,
    pub actor_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrivateMessage {
    pub id: i64,
    pub creator_id: i64,
    pub content: String,
}

/// The persisted per-identity token cache, `{ "jwt": "<string>" }`.
#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    jwt: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username_or_email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    jwt: Option<String>,
}

/// The operations the scheduler and command processor depend on. A trait so
/// tests can substitute a stub in place of a live server.
#[async_trait]
pub trait PublishClient: Send + Sync {
    async fn create_post(&self, opts: CreatePostOptions) -> Result<i64, ClientError>;
    async fn create_community(&self, opts: CreateCommunityOptions) -> Result<i64, ClientError>;
    async fn fetch_community_id(&self, community_key: &str) -> Result<i64, ClientError>;
    async fn fetch_user_id(&self, actor_identifier: &str) -> Result<i64, ClientError>;
    async fn resolve_community(
        &self,
        community_key: &str,
    ) -> Result<Option<ResolvedCommunity>, ClientError>;
    async fn fetch_community_moderators(
        &self,
        community_key: &str,
    ) -> Result<Vec<Moderator>, ClientError>;
    async fn appoint_mod(&self, community_id: i64, person_id: i64, added: bool) -> Result<(), ClientError>;
    async fn subscribe_to_community(&self, community_id: i64, follow: bool) -> Result<(), ClientError>;
    async fn list_private_messages(
        &self,
        unread_only: bool,
    ) -> Result<Vec<PrivateMessage>, ClientError>;
    async fn mark_private_message_read(&self, id: i64) -> Result<(), ClientError>;
    async fn send_private_message(&self, recipient_id: i64, content: &str) -> Result<(), ClientError>;
}

/// One authenticated session against the publishing server.
pub struct LemmyClient {
    http: Client,
    server: String,
    username: String,
    token_path: PathBuf,
    jwt: Mutex<Option<String>>,
    request_delay: Duration,
    last_call: Mutex<Option<std::time::Instant>>,
}

impl LemmyClient {
    /// Construct a client for one identity, reading its cached token from
    /// `token_path` if present. Does not touch the network.
    pub fn new(server: impl Into<String>, username: impl Into<String>, token_path: PathBuf, request_delay: Duration) -> Self {
        let jwt = read_cached_token(&token_path);
        Self {
            http: Client::new(),
            server: server.into(),
            username: username.into(),
            token_path,
            jwt: Mutex::new(jwt),
            request_delay,
            last_call: Mutex::new(None),
        }
    }

    fn base_url(&self) -> String {
        format!("https://{}/api/v3", self.server)
    }

    /// Wait out the configured minimum delay since the last outbound call.
    async fn throttle(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.request_delay {
                tokio::time::sleep(self.request_delay - elapsed).await;
            }
        }
        *last_call = Some(std::time::Instant::now());
    }

    /// Ensure a JWT is present, prompting interactively for a password and
    /// logging in if the cache is empty.
    async fn ensure_token(&self) -> Result<String, ClientError> {
        {
            let cached = self.jwt.lock().await;
            if let Some(token) = cached.as_ref() {
                return Ok(token.clone());
            }
        }
        self.login_interactive().await
    }

    async fn login_interactive(&self) -> Result<String, ClientError> {
        let prompt = format!("Password for {} on {}: ", self.username, self.server);
        let password = rpassword::prompt_password(prompt)?;
        if password.is_empty() {
            return Err(ClientError::NoCredentials {
                identity: self.username.clone(),
            });
        }

        let url = format!("{}/user/login", self.base_url());
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest {
                username_or_email: &self.username,
                password: &password,
            })
            .send()
            .await
            .map_err(|source| ClientError::Transient {
                operation: "user/login",
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                operation: "user/login",
                status,
                body,
            });
        }

        let parsed: LoginResponse = response.json().await?;
        let jwt = parsed.jwt.ok_or(ClientError::NoCredentials {
            identity: self.username.clone(),
        })?;

        self.persist_token(&jwt).await?;
        *self.jwt.lock().await = Some(jwt.clone());
        Ok(jwt)
    }

    async fn persist_token(&self, jwt: &str) -> Result<(), ClientError> {
        let contents = serde_json::to_vec(&TokenFile { jwt: jwt.to_string() })?;
        tokio::fs::write(&self.token_path, contents).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.token_path, perms)?;
        }

        Ok(())
    }

    /// Invalidate the cached token so the next call re-authenticates.
    async fn invalidate_token(&self) {
        *self.jwt.lock().await = None;
    }

    /// Perform one authenticated request, retrying the login once on a 401
    /// and retrying indefinitely on 429/503.
    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &'static str,
        build: impl Fn(&Client, &str, &str) -> reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        loop {
            self.throttle().await;
            let jwt = self.ensure_token().await?;
            let url = self.base_url();
            let request = build(&self.http, &url, &jwt);

            let response = request.send().await.map_err(|source| ClientError::Transient {
                operation,
                source,
            })?;

            match response.status() {
                StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                    tracing::warn!(operation, "rate limited, retrying in 60s");
                    tokio::time::sleep(RATE_LIMIT_RETRY).await;
                    continue;
                }
                StatusCode::UNAUTHORIZED => {
                    self.invalidate_token().await;
                    continue;
                }
                status if status.is_success() => {
                    return response.json().await.map_err(ClientError::from);
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ClientError::Api {
                        operation,
                        status,
                        body,
                    });
                }
            }
        }
    }
}

fn read_cached_token(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let parsed: TokenFile = serde_json::from_str(&contents).ok()?;
    Some(parsed.jwt)
}

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    community_id: i64,
    name: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    auth: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostResponseEnvelope {
    post_view: PostView,
}

#[derive(Debug, Deserialize)]
struct PostView {
    post: PostIdEnvelope,
}

#[derive(Debug, Deserialize)]
struct PostIdEnvelope {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CommunityResponseEnvelope {
    community_view: CommunityView,
}

#[derive(Debug, Deserialize)]
struct CommunityView {
    community: CommunityIdEnvelope,
}

#[derive(Debug, Deserialize)]
struct CommunityIdEnvelope {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ResolveObjectResponse {
    community: Option<CommunityView>,
}

#[derive(Debug, Deserialize)]
struct PersonResponseEnvelope {
    person_view: PersonView,
}

#[derive(Debug, Deserialize)]
struct PersonView {
    person: PersonIdEnvelope,
}

#[derive(Debug, Deserialize)]
struct PersonIdEnvelope {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ModeratorListResponse {
    moderators: Vec<CommunityModeratorView>,
}

#[derive(Debug, Deserialize)]
struct CommunityModeratorView {
    moderator: PersonActorEnvelope,
}

#[derive(Debug, Deserialize)]
struct PersonActorEnvelope {
    id: i64,
    actor_id: String,
}

#[derive(Debug, Deserialize)]
struct PrivateMessagesResponse {
    private_messages: Vec<PrivateMessageView>,
}

#[derive(Debug, Deserialize)]
struct PrivateMessageView {
    private_message: PrivateMessageFields,
}

#[derive(Debug, Deserialize)]
struct PrivateMessageFields {
    id: i64,
    creator_id: i64,
    content: String,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[async_trait]
impl PublishClient for LemmyClient {
    async fn create_post(&self, opts: CreatePostOptions) -> Result<i64, ClientError> {
        let resp: PostResponseEnvelope = self
            .call("post", |http, base, jwt| {
                http.post(format!("{base}/post")).bearer_auth(jwt).json(&CreatePostRequest {
                    community_id: opts.community_id,
                    name: &opts.title,
                    url: &opts.url,
                    body: opts.body.as_deref(),
                    auth: jwt,
                })
            })
            .await?;
        Ok(resp.post_view.post.id)
    }

    async fn create_community(&self, opts: CreateCommunityOptions) -> Result<i64, ClientError> {
        let resp: CommunityResponseEnvelope = self
            .call("community", |http, base, jwt| {
                http.post(format!("{base}/community")).bearer_auth(jwt).json(&opts)
            })
            .await?;
        Ok(resp.community_view.community.id)
    }

    async fn fetch_community_id(&self, community_key: &str) -> Result<i64, ClientError> {
        let key = community_key.to_string();
        let resp: CommunityResponseEnvelope = self
            .call("community", |http, base, jwt| {
                http.get(format!("{base}/community"))
                    .bearer_auth(jwt)
                    .query(&[("name", key.as_str())])
            })
            .await?;
        Ok(resp.community_view.community.id)
    }

    async fn fetch_user_id(&self, actor_identifier: &str) -> Result<i64, ClientError> {
        let actor = actor_identifier.to_string();
        let resp: PersonResponseEnvelope = self
            .call("user", |http, base, jwt| {
                http.get(format!("{base}/user"))
                    .bearer_auth(jwt)
                    .query(&[("username", actor.as_str())])
            })
            .await?;
        Ok(resp.person_view.person.id)
    }

    async fn resolve_community(
        &self,
        community_key: &str,
    ) -> Result<Option<ResolvedCommunity>, ClientError> {
        let q = community_key.to_string();
        let resp: ResolveObjectResponse = self
            .call("resolve_object", |http, base, jwt| {
                http.get(format!("{base}/resolve_object"))
                    .bearer_auth(jwt)
                    .query(&[("q", q.as_str())])
            })
            .await?;
        Ok(resp.community.map(|c| ResolvedCommunity {
            community_id: c.community.id,
        }))
    }

    async fn fetch_community_moderators(
        &self,
        community_key: &str,
    ) -> Result<Vec<Moderator>, ClientError> {
        let key = community_key.to_string();
        let resp: ModeratorListResponse = self
            .call("community/mod", |http, base, jwt| {
                http.get(format!("{base}/community"))
                    .bearer_auth(jwt)
                    .query(&[("name", key.as_str())])
            })
            .await?;
        Ok(resp
            .moderators
            .into_iter()
            .map(|m| Moderator {
                person_id: m.moderator.id,
                actor_id: m.moderator.actor_id,
            })
            .collect())
    }

    async fn appoint_mod(&self, community_id: i64, person_id: i64, added: bool) -> Result<(), ClientError> {
        let _: Empty = self
            .call("community/mod", |http, base, jwt| {
                http.post(format!("{base}/community/mod")).bearer_auth(jwt).json(&serde_json::json!({
                    "community_id": community_id,
                    "person_id": person_id,
                    "added": added,
                }))
            })
            .await?;
        Ok(())
    }

    async fn subscribe_to_community(&self, community_id: i64, follow: bool) -> Result<(), ClientError> {
        let _: Empty = self
            .call("community/follow", |http, base, jwt| {
                http.post(format!("{base}/community/follow")).bearer_auth(jwt).json(&serde_json::json!({
                    "community_id": community_id,
                    "follow": follow,
                }))
            })
            .await?;
        Ok(())
    }

    async fn list_private_messages(
        &self,
        unread_only: bool,
    ) -> Result<Vec<PrivateMessage>, ClientError> {
        // Paginated as a restartable lazy sequence: keep pulling pages until
        // one comes back empty, rather than trusting a total count upfront.
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let resp: PrivateMessagesResponse = self
                .call("private_message/list", |http, base, jwt| {
                    http.get(format!("{base}/private_message/list"))
                        .bearer_auth(jwt)
                        .query(&[
                            ("unread_only", unread_only.to_string()),
                            ("page", page.to_string()),
                            ("limit", "20".to_string()),
                        ])
                })
                .await?;

            if resp.private_messages.is_empty() {
                break;
            }

            let page_len = resp.private_messages.len();
            all.extend(resp.private_messages.into_iter().map(|m| PrivateMessage {
                id: m.private_message.id,
                creator_id: m.private_message.creator_id,
                content: m.private_message.content,
            }));

            if page_len < 20 {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn mark_private_message_read(&self, id: i64) -> Result<(), ClientError> {
        let _: Empty = self
            .call("private_message/mark_as_read", |http, base, jwt| {
                http.post(format!("{base}/private_message/mark_as_read"))
                    .bearer_auth(jwt)
                    .json(&serde_json::json!({
                        "private_message_id": id,
                        "read": true,
                    }))
            })
            .await?;
        Ok(())
    }

    async fn send_private_message(&self, recipient_id: i64, content: &str) -> Result<(), ClientError> {
        let body = content.to_string();
        let _: Empty = self
            .call("private_message", |http, base, jwt| {
                http.post(format!("{base}/private_message")).bearer_auth(jwt).json(&serde_json::json!({
                    "content": body,
                    "recipient_id": recipient_id,
                }))
            })
            .await?;
        Ok(())
    }
}

/// Multiplexes the three bot identities against their own client, none of
/// which share mutable state. Held as `dyn PublishClient` rather than the
/// concrete `LemmyClient` so tests can substitute a stub.
pub type ClientMap = std::collections::HashMap<common::BotIdentity, Arc<dyn PublishClient>>;
