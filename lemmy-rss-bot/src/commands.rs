//! 4.G Command processor — parses administrative commands out of direct
//! messages and mutates the persistence layer on behalf of community
//! moderators.

use common::{BotIdentity, Settings};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::client::{PrivateMessage, PublishClient};
use crate::persistence::Store;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add { rss_url: String, community: String },
    Delete { rss_url: String, community: String },
    List { community: String },
    Help,
    Unknown(String),
}

// Matches a `/word` that starts a line or follows whitespace, so a slash
// inside a URL argument (e.g. `http://x/rss`) is never mistaken for the
// start of another command.
static COMMAND_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)/(\w+)").unwrap());

const HELP_TEXT: &str = "Commands:\n\
    /add <rss_url> <community>[@<instance>]\n\
    /delete <rss_url> <community>[@<instance>]\n\
    /list <community>[@<instance>]\n\
    /help";

/// Scan a message body line by line for `/word` commands. A line may hold
/// more than one command; each one's argument list runs from right after
/// its word up to the next `/word` (or end of line). Text before the first
/// `/word` on a line is discarded.
fn parse_commands(body: &str) -> Vec<(String, Command)> {
    body.lines()
        .flat_map(|line| {
            let trimmed = line.trim();
            let starts: Vec<usize> = COMMAND_WORD
                .captures_iter(trimmed)
                .map(|cap| cap.get(1).unwrap().start() - 1)
                .collect();

            starts
                .iter()
                .enumerate()
                .map(|(i, &start)| {
                    let end = starts.get(i + 1).copied().unwrap_or(trimmed.len());
                    let segment = trimmed[start..end].trim();
                    let word_end = segment.find(char::is_whitespace).unwrap_or(segment.len());
                    let word = segment[1..word_end].to_ascii_lowercase();
                    let arg_str = segment[word_end..].trim();
                    let args: Vec<&str> = arg_str.split_whitespace().collect();
                    let command = match word.as_str() {
                        "add" if args.len() >= 2 => Command::Add {
                            rss_url: args[0].to_string(),
                            community: args[1].to_string(),
                        },
                        "delete" if args.len() >= 2 => Command::Delete {
                            rss_url: args[0].to_string(),
                            community: args[1].to_string(),
                        },
                        "list" if !args.is_empty() => Command::List {
                            community: args[0].to_string(),
                        },
                        "help" => Command::Help,
                        _ => Command::Unknown(segment.to_string()),
                    };
                    (segment.to_string(), command)
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Append `@default_instance` to a community identifier that omits one.
fn with_default_instance(community: &str, default_instance: &str) -> String {
    if community.contains('@') {
        community.to_string()
    } else {
        format!("{community}@{default_instance}")
    }
}

async fn sender_is_moderator(
    client: &dyn PublishClient,
    community_key: &str,
    creator_id: i64,
) -> Result<bool, crate::error::ClientError> {
    let moderators = client.fetch_community_moderators(community_key).await?;
    Ok(moderators.iter().any(|m| m.person_id == creator_id))
}

async fn execute(
    command: &Command,
    message: &PrivateMessage,
    client: &dyn PublishClient,
    identity: BotIdentity,
    store: &dyn Store,
    settings: &Settings,
) -> String {
    match command {
        Command::Add { rss_url, community } => {
            let community_key = with_default_instance(community, &settings.lemmy_server);

            let resolved = match client.resolve_community(&community_key).await {
                Ok(Some(r)) => r,
                Ok(None) => return format!("Unknown community {community_key}"),
                Err(err) => return format!("Failed to resolve {community_key}: {err}"),
            };

            match sender_is_moderator(client, &community_key, message.creator_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return format!("You must be a moderator of {community_key} to add a feed there")
                }
                Err(err) => return format!("Failed to check moderator status: {err}"),
            }

            // The feed posts under whichever identity's inbox received the
            // /add command.
            match store
                .add_feed(rss_url, &community_key, resolved.community_id, identity)
                .await
            {
                Ok(_) => format!("Added {rss_url} to {community_key}"),
                Err(err) => format!("Failed to add feed: {err}"),
            }
        }
        Command::Delete { rss_url, community } => {
            let community_key = with_default_instance(community, &settings.lemmy_server);

            match sender_is_moderator(client, &community_key, message.creator_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return format!(
                        "You must be a moderator of {community_key} to delete a feed there"
                    )
                }
                Err(err) => return format!("Failed to check moderator status: {err}"),
            }

            match store
                .remove_feed(Some(&community_key), Some(rss_url))
                .await
            {
                Ok(removed) => format!("Removed {removed} feed(s) matching {rss_url} from {community_key}"),
                Err(err) => format!("Failed to remove feed: {err}"),
            }
        }
        Command::List { community } => {
            let community_key = with_default_instance(community, &settings.lemmy_server);
            match store.list_feeds().await {
                Ok(feeds) => {
                    let matching: Vec<&str> = feeds
                        .iter()
                        .filter(|f| f.community_key == community_key)
                        .map(|f| f.feed_url.as_str())
                        .collect();
                    if matching.is_empty() {
                        format!("No feeds active for !{community_key}")
                    } else {
                        let mut out = format!("Feeds active for !{community_key}:\n");
                        for url in matching {
                            out.push_str("* ");
                            out.push_str(url);
                            out.push('\n');
                        }
                        out.trim_end().to_string()
                    }
                }
                Err(err) => format!("Failed to list feeds: {err}"),
            }
        }
        Command::Help => HELP_TEXT.to_string(),
        Command::Unknown(line) => format!("Unknown command: {line}"),
    }
}

/// Fetch unread DMs for one identity, dispatch every command found in each,
/// send back an aggregated reply, and mark the message read. Each
/// per-message failure is swallowed into an error note rather than
/// aborting the whole batch.
pub async fn process_identity(
    client: &dyn PublishClient,
    identity: BotIdentity,
    store: &dyn Store,
    settings: &Settings,
) {
    let messages = match client.list_private_messages(true).await {
        Ok(messages) => messages,
        Err(err) => {
            tracing::warn!(error = %err, "failed to list private messages");
            return;
        }
    };

    for message in messages {
        let commands = parse_commands(&message.content);
        let mut blocks = Vec::with_capacity(commands.len());

        for (line, command) in &commands {
            let result = execute(command, &message, client, identity, store, settings).await;
            blocks.push(format!("> {line}\n{result}"));
        }

        if blocks.is_empty() {
            blocks.push(format!("> {}", message.content.trim()));
            blocks.push(HELP_TEXT.to_string());
        }

        let response = blocks.join("\n\n");
        if let Err(err) = client.send_private_message(message.creator_id, &response).await {
            tracing::warn!(error = %err, "failed to send command response");
        }
        if let Err(err) = client.mark_private_message_read(message.id).await {
            tracing::warn!(error = %err, "failed to mark private message read");
        }
    }
}
