use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{ChatClient, ClientConfig, GatewayPhase};
use shared::domain::{ChannelId, MessageId};
use tracing::info;
use url::Url;

mod config;

#[derive(Parser, Debug)]
#[command(name = "ferrocord", about = "Headless chat client")]
struct Args {
    /// Path to the TOML settings file.
    #[arg(long, default_value = "ferrocord.toml")]
    config: PathBuf,
    /// Auth token; overrides the settings file and environment.
    #[arg(long)]
    token: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut settings = config::load_settings(&args.config);
    if let Some(token) = args.token {
        settings.token = token;
    }
    if settings.token.is_empty() {
        bail!("no auth token configured; set FERROCORD_TOKEN or pass --token");
    }
    Url::parse(&settings.rest_base_url)
        .with_context(|| format!("invalid rest_base_url '{}'", settings.rest_base_url))?;
    Url::parse(&settings.gateway_url)
        .with_context(|| format!("invalid gateway_url '{}'", settings.gateway_url))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    let client = ChatClient::new(
        ClientConfig {
            token: settings.token,
            rest_base_url: settings.rest_base_url,
            gateway_url: settings.gateway_url,
            cdn_base_url: settings.cdn_base_url,
        },
        runtime.handle().clone(),
    );
    client.connect();
    info!("connecting to gateway");

    run_consumer_loop(&client);

    info!("gateway disconnected; exiting");
    Ok(())
}

/// Drains the task queue at a fixed cadence and prints messages as they land
/// in the session, until the gateway connection ends.
fn run_consumer_loop(client: &Arc<ChatClient>) {
    let mut printed: HashMap<ChannelId, HashSet<MessageId>> = HashMap::new();

    loop {
        client.process_tasks();

        client.with_state(|state| {
            for (channel_id, messages) in &state.messages {
                let seen = printed.entry(channel_id.clone()).or_default();
                for message in messages {
                    if seen.insert(message.id.clone()) {
                        println!(
                            "[{}] {}: {}",
                            channel_id, message.author.username, message.content
                        );
                    }
                }
            }
        });

        // `connect` was already called, so Disconnected here means the
        // connection failed or ended; there is no reconnect.
        if client.gateway_phase() == GatewayPhase::Disconnected {
            break;
        }

        thread::sleep(Duration::from_millis(16));
    }
}
