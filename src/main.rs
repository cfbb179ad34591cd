use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use vervids_relay::config::RelayConfig;
use vervids_relay::relay::start_server;
use vervids_relay::state::RelayState;

/// Local HTTP relay that runs `vervids` commands for the panel.
#[derive(Debug, Parser)]
#[command(name = "vervids-relay", author, version, about)]
struct Cli {
    /// Interface to bind (overrides relay.json)
    #[arg(long, env = "VERVIDS_RELAY_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides relay.json)
    #[arg(long, short, env = "VERVIDS_RELAY_PORT")]
    port: Option<u16>,

    /// Allow-listed command prefix
    #[arg(long, env = "VERVIDS_RELAY_PREFIX")]
    prefix: Option<String>,

    /// Command started detached instead of awaited
    #[arg(long, env = "VERVIDS_RELAY_BACKGROUND_COMMAND")]
    background_command: Option<String>,

    /// Foreground command timeout in seconds
    #[arg(long, env = "VERVIDS_RELAY_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Per-stream output cap in bytes
    #[arg(long, env = "VERVIDS_RELAY_MAX_OUTPUT_BYTES")]
    max_output_bytes: Option<usize>,
}

impl Cli {
    fn apply(self, mut config: RelayConfig) -> RelayConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(prefix) = self.prefix {
            config.command_prefix = prefix;
        }
        if let Some(cmd) = self.background_command {
            config.background_command = cmd;
        }
        if let Some(secs) = self.timeout_secs {
            config.exec_timeout_secs = secs;
        }
        if let Some(bytes) = self.max_output_bytes {
            config.max_output_bytes = bytes;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    vervids_relay::init_tracing("info");

    let config = Cli::parse().apply(RelayConfig::load());
    anyhow::ensure!(
        !config.command_prefix.trim().is_empty(),
        "command prefix must not be empty"
    );
    tracing::info!(
        bind = %config.bind_addr(),
        prefix = %config.command_prefix,
        background = %config.background_command,
        timeout_secs = config.exec_timeout_secs,
        "starting vervids relay"
    );

    let state = Arc::new(RelayState::new(config));
    start_server(state, shutdown_signal())
        .await
        .map_err(anyhow::Error::msg)
        .context("relay server stopped with error")?;

    tracing::info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
