/*!
common/src/lib.rs

Shared configuration, bot identities and DB helper functions for the
feed-to-community republishing bot.

This file provides:
- `Settings`, loaded from the two-file dotenv scheme (`.env.default` + `.env`)
- `BotIdentity`, the small enumerated set of publishing identities
- Helpers to initialize and migrate a SQLite database
*/

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The small enumerated set of accounts the bot may publish as.
///
/// A feed's `bot_identity` column selects one of these; the scheduler
/// multiplexes a map of identity -> API client over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BotIdentity {
    Free,
    Paywall,
    Bot,
}

impl BotIdentity {
    pub const ALL: [BotIdentity; 3] = [BotIdentity::Free, BotIdentity::Paywall, BotIdentity::Bot];

    /// The environment variable that names this identity's account username.
    pub fn env_var(self) -> &'static str {
        match self {
            BotIdentity::Free => "LEMMY_FREE_BOT",
            BotIdentity::Paywall => "LEMMY_PAYWALL_BOT",
            BotIdentity::Bot => "LEMMY_BOT_BOT",
        }
    }

    /// The filename fragment used for this identity's cached token file.
    pub fn slug(self) -> &'static str {
        match self {
            BotIdentity::Free => "free",
            BotIdentity::Paywall => "paywall",
            BotIdentity::Bot => "bot",
        }
    }
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown bot identity: {0}")]
pub struct UnknownBotIdentity(String);

impl FromStr for BotIdentity {
    type Err = UnknownBotIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(BotIdentity::Free),
            "paywall" => Ok(BotIdentity::Paywall),
            "bot" => Ok(BotIdentity::Bot),
            other => Err(UnknownBotIdentity(other.to_string())),
        }
    }
}

/// Top-level runtime configuration, assembled from the two-file dotenv
/// scheme described in the external-interfaces section: `.env.default`
/// supplies baseline values, an optional `.env` overrides them, and the
/// real process environment always wins over both.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Hostname of the publishing server (e.g. `lemmy.example.com`).
    pub lemmy_server: String,
    /// Account usernames for each bot identity.
    pub free_bot: String,
    pub paywall_bot: String,
    pub bot_bot: String,
    /// `user@instance` accounts appointed as moderators of every newly
    /// created community.
    pub additional_mods: Vec<String>,
    /// Default community key used when a command omits one.
    pub default_community: String,
    /// Minimum number of seconds between outbound calls, per client.
    pub request_delay_secs: u64,
    /// Path to the SQLite database file.
    pub database_path: String,
    /// Directory for rotating log files.
    pub log_dir: String,
}

impl Settings {
    /// Load `.env` then `.env.default` (each layered beneath whatever is
    /// already present in the process environment), then read the
    /// recognized options into a typed struct.
    pub fn load() -> Result<Self> {
        // `from_filename` only fills in variables that are unset, so the
        // first file loaded wins ties over the second. To get the desired
        // precedence (real env > .env > .env.default) .env must be loaded
        // before .env.default.
        let _ = dotenvy::from_filename(".env");
        let _ = dotenvy::from_filename(".env.default");
        Self::from_env()
    }

    fn from_env() -> Result<Self> {
        let lemmy_server =
            std::env::var("LEMMY_SERVER").context("LEMMY_SERVER must be set")?;
        let free_bot = std::env::var("LEMMY_FREE_BOT").context("LEMMY_FREE_BOT must be set")?;
        let paywall_bot =
            std::env::var("LEMMY_PAYWALL_BOT").context("LEMMY_PAYWALL_BOT must be set")?;
        let bot_bot = std::env::var("LEMMY_BOT_BOT").context("LEMMY_BOT_BOT must be set")?;

        let additional_mods = std::env::var("LEMMY_ADDITIONAL_MODS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let default_community =
            std::env::var("LEMMY_COMMUNITY").context("LEMMY_COMMUNITY must be set")?;

        let request_delay_secs = std::env::var("REQUEST_DELAY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/rssbot.db".to_string());

        let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());

        Ok(Self {
            lemmy_server,
            free_bot,
            paywall_bot,
            bot_bot,
            additional_mods,
            default_community,
            request_delay_secs,
            database_path,
            log_dir,
        })
    }

    /// The configured account username for a given bot identity.
    pub fn username(&self, identity: BotIdentity) -> &str {
        match identity {
            BotIdentity::Free => &self.free_bot,
            BotIdentity::Paywall => &self.paywall_bot,
            BotIdentity::Bot => &self.bot_bot,
        }
    }
}

/// Run SQL migrations using sqlx's migration macro.
///
/// Expects a `migrations` directory at the workspace root containing SQL
/// migration files, packaged alongside the binary.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("Failed to run sqlx migrations")?;

    Ok(())
}

/// Initialize a SQLite connection pool, creating the parent directory and
/// the database file itself if either is missing.
///
/// Defaults are conservative for a long-running, low-throughput agent:
/// - max_connections: 5
/// - WAL journal mode, so the scheduler's writes and an operator's
///   read-only inspection don't block each other
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    let is_memory = path.starts_with("sqlite:");

    if !is_memory {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create DB parent directory: {}", parent.display())
                })?;
            }
        }
    }

    let connect_str = if is_memory {
        path.to_string()
    } else {
        format!("sqlite://{}", path)
    };

    let options = SqliteConnectOptions::from_str(&connect_str)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    // A shared in-memory database only stays alive as long as one
    // connection to it is open, so cap the pool at a single connection
    // rather than risking each pooled connection opening its own empty DB.
    let max_connections = if is_memory { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
