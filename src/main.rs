// ABOUTME: Headless listen binary: connects to the relay and logs the reconstructed stream.
// ABOUTME: Initializes logging and config, then runs until ctrl-c.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use huddle::client::{ClientEvent, RelayClient};
use huddle::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "huddle")]
#[command(about = "Relay client: listen to the reconstructed message stream")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "huddle.toml")]
    config: PathBuf,

    /// Override the relay WebSocket URL
    #[arg(long)]
    url: Option<String>,

    /// Override the announced username
    #[arg(long)]
    username: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)?;
    if let Some(url) = cli.url {
        config.relay.url = url;
    }
    if let Some(username) = cli.username {
        config.relay.username = username;
    }

    tracing::info!(
        url = %config.relay.url,
        username = %config.relay.username,
        channels = ?config.relay.channels,
        "starting huddle listener"
    );

    let client = RelayClient::new(config);
    let mut events = client.subscribe();
    client.connect().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Delivery(msg)) => {
                    tracing::info!(from = %msg.from, to = %msg.to, "{}", msg.content);
                }
                Ok(ClientEvent::LinkChanged(state)) => {
                    tracing::info!(state = ?state, "link state changed");
                }
                Ok(ClientEvent::PresenceChanged) => {
                    let online = client.online_users().await.len();
                    tracing::debug!(online, "presence updated");
                }
                Ok(ClientEvent::Error(error)) => {
                    tracing::warn!("{error}");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await;
    tracing::info!("listener stopped");
    Ok(())
}
