//! railwatch - follow one session's rail activation from the terminal.
//!
//! Connects the realtime channel for a username and reconciles the rail list
//! until every provider has settled (or forever with `--follow`).

use anyhow::Context;
use clap::Parser;
use railwatch_client::ws::listener;
use railwatch_client::{
    logging, ApiClient, ConnectionManager, EventKind, HistoryStore, RailStatusTracker, SyncConfig,
    TransportEvent,
};

#[derive(Parser, Debug)]
#[command(name = "railwatch")]
#[command(about = "Track payment rail activation for one session")]
struct Args {
    /// Username whose status channel to follow
    username: String,

    /// Bearer token for the status API
    #[arg(long, env = "RAILWATCH_API_TOKEN")]
    token: Option<String>,

    /// Keep running after every provider has settled
    #[arg(long)]
    follow: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();
    let config = SyncConfig::from_env().context("invalid configuration")?;

    let api = ApiClient::new()
        .with_base_url(config.api_base_url.clone())
        .with_bearer_token(args.token.clone());
    let manager = ConnectionManager::new(config.clone());
    let transport = manager
        .acquire(&args.username)
        .context("cannot build channel URL")?;

    let lifecycle = listener(|event| match event {
        TransportEvent::Connect => tracing::info!("Channel connected"),
        TransportEvent::Disconnect { code, reason, clean } => {
            tracing::info!("Channel closed (code {:?}, clean: {}): {}", code, clean, reason)
        }
        TransportEvent::Error { message } => tracing::warn!("Channel error: {}", message),
        TransportEvent::MaxReconnectAttempts => {
            tracing::error!("Gave up reconnecting; polling continues without push hints")
        }
        _ => {}
    });
    for kind in [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Error,
        EventKind::MaxReconnectAttempts,
    ] {
        transport.on(kind, &lifecycle);
    }

    let history = HistoryStore::new();
    history.attach(&transport);
    transport.connect();

    let tracker = RailStatusTracker::new(api, transport.clone(), config.poll_interval);
    if let Err(e) = tracker.refresh().await {
        tracing::warn!("Initial rail fetch failed: {}", e.user_message());
    }
    tracker.start_tracking();

    let mut updates = tracker.subscribe();
    loop {
        for provider in tracker.providers() {
            println!("{:<32} {:?}", provider.display_name, provider.status);
        }
        if tracker.all_settled() && !args.follow {
            println!("All providers settled.");
            break;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    tracker.stop_tracking();
    history.detach();
    manager.clear();
    Ok(())
}
