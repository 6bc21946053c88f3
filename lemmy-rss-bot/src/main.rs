//! lemmy-rss-bot - single-binary entrypoint.
//!
//! Loads settings, wires up logging, the database pool and migrations, one
//! `LemmyClient` per bot identity, and runs the scheduler until SIGINT.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use common::{init_db_pool, run_migrations, BotIdentity, Settings};
use tracing::{error, info};

use lemmy_rss_bot::client::{ClientMap, LemmyClient};
use lemmy_rss_bot::persistence::{SqliteStore, Store};
use lemmy_rss_bot::scheduler;

#[derive(Parser, Debug)]
#[command(name = "lemmy-rss-bot", about = "Adaptive feed-to-community republishing bot")]
struct Args {
    /// Directory holding per-identity cached session tokens.
    #[arg(long, default_value = "data/tokens")]
    token_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = Settings::load()?;
    let _log_guards = lemmy_rss_bot::logging::init(&settings.log_dir)?;
    info!("lemmy-rss-bot starting up");

    let db_pool = init_db_pool(&settings.database_path).await?;
    run_migrations(&db_pool).await?;
    info!(path = %settings.database_path, "database ready");

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db_pool));

    tokio::fs::create_dir_all(&args.token_dir).await?;
    let request_delay = Duration::from_secs(settings.request_delay_secs);
    let mut clients: ClientMap = HashMap::new();
    for identity in BotIdentity::ALL {
        let token_path = args.token_dir.join(format!("{}.json", identity.slug()));
        let client = LemmyClient::new(
            settings.lemmy_server.clone(),
            settings.username(identity).to_string(),
            token_path,
            request_delay,
        );
        clients.insert(identity, Arc::new(client) as Arc<dyn lemmy_rss_bot::client::PublishClient>);
    }

    let settings = Arc::new(settings);

    tokio::select! {
        result = scheduler::run(store, clients, settings) => {
            if let Err(err) = result {
                error!(error = %err, "scheduler exited with an error");
                return Err(err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    info!("shutdown complete");
    Ok(())
}
