//! MetroSync companion client entry point.
//!
//! ```text
//! metrosync-client discover [--seconds N]
//! metrosync-client control --host H [--port P] <play|pause|next|previous>
//! metrosync-client monitor --host H [--port P]
//! ```
//!
//! Configuration comes from `client.toml` (see
//! `infrastructure::storage::config`); flags override it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::time::{self, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use metrosync_client::application::remote_control::RemoteControlUseCase;
use metrosync_client::infrastructure::{
    discovery::{DiscoveryEvent, DiscoveryService, MdnsBrowser},
    network::{ConnectionConfig, SyncSession},
    storage::config::{load_config, load_config_from, ClientConfig},
};
use metrosync_core::{PlaybackAction, SessionState};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "metrosync-client",
    about = "Discover a MetroSync phone on the LAN and control its playback",
    version
)]
struct Cli {
    /// Path to `client.toml`.  Defaults to the platform config directory.
    #[arg(long, global = true, env = "METROSYNC_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Identity sent as `deviceId` with every command.
    #[arg(long, global = true, env = "METROSYNC_DEVICE_ID")]
    device_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Browse the LAN for phones and print what is found.
    Discover {
        /// How long to browse before printing the final device list.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Connect, send one command, print the resulting playback state.
    Control {
        #[arg(long, env = "METROSYNC_HOST")]
        host: String,
        /// Defaults to `[network] default_port`.
        #[arg(long, env = "METROSYNC_PORT")]
        port: Option<u16>,
        /// One of play, pause, next, previous.
        #[arg(value_parser = parse_action)]
        action: PlaybackAction,
    },
    /// Connect and print every playback state until Ctrl+C or the phone
    /// disconnects.
    Monitor {
        #[arg(long, env = "METROSYNC_HOST")]
        host: String,
        #[arg(long, env = "METROSYNC_PORT")]
        port: Option<u16>,
    },
}

fn parse_action(s: &str) -> Result<PlaybackAction, String> {
    s.parse()
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    let (mut config, config_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (ClientConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("falling back to default configuration: {e}");
    }
    if let Some(device_id) = cli.device_id {
        config.client.device_id = device_id;
    }

    info!("MetroSync client starting as {:?}", config.client.device_id);

    match cli.command {
        Command::Discover { seconds } => discover(&config, Duration::from_secs(seconds)).await,
        Command::Control { host, port, action } => {
            let port = port.unwrap_or(config.network.default_port);
            control(&config, &host, port, action).await
        }
        Command::Monitor { host, port } => {
            let port = port.unwrap_or(config.network.default_port);
            monitor(&config, &host, port).await
        }
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

async fn discover(config: &ClientConfig, duration: Duration) -> anyhow::Result<()> {
    if !config.discovery.enabled {
        bail!("discovery is disabled in the configuration ([discovery] enabled = false)");
    }

    let browser = MdnsBrowser::new().context("failed to start the mDNS daemon")?;
    let discovery = DiscoveryService::new(Arc::new(browser), config.discovery.service_type.clone());
    let mut events = discovery
        .start_discovery()
        .await
        .context("failed to start browsing")?;

    let deadline = Instant::now() + duration;
    loop {
        match time::timeout_at(deadline, events.recv()).await {
            Ok(Some(DiscoveryEvent::DeviceFound(r))) => {
                println!("+ {}  {}:{}  ({})", r.device_name, r.host, r.port, r.device_id);
            }
            Ok(Some(DiscoveryEvent::DeviceLost(r))) => println!("- {}", r.device_id),
            Ok(None) | Err(_) => break,
        }
    }

    let devices = discovery.snapshot();
    discovery.stop_discovery().await;

    println!("{} device(s) found", devices.len());
    for r in devices {
        println!("  {}  {}:{}", r.device_name, r.host, r.port);
    }
    Ok(())
}

async fn control(
    config: &ClientConfig,
    host: &str,
    port: u16,
    action: PlaybackAction,
) -> anyhow::Result<()> {
    let remote = connect(config, host, port).await?;
    let mut state = remote.state();

    let sent = match action {
        PlaybackAction::Play => remote.play().await,
        PlaybackAction::Pause => remote.pause().await,
        PlaybackAction::Next => remote.next().await,
        PlaybackAction::Previous => remote.previous().await,
    }
    .with_context(|| format!("failed to send {action}"))?;
    info!("sent {} at {}", sent.action, sent.timestamp);

    // The phone answers a command with a fresh snapshot.
    match time::timeout(Duration::from_secs(2), state.changed()).await {
        Ok(Ok(())) => print_state(&state.borrow_and_update()),
        _ => println!("no playback state received"),
    }

    remote.release().await;
    Ok(())
}

async fn monitor(config: &ClientConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let remote = connect(config, host, port).await?;
    let mut state = remote.state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C; disconnecting");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                if !snapshot.connected {
                    println!("phone disconnected");
                    break;
                }
                print_state(&snapshot);
            }
        }
    }

    remote.release().await;
    Ok(())
}

async fn connect(
    config: &ClientConfig,
    host: &str,
    port: u16,
) -> anyhow::Result<RemoteControlUseCase> {
    let session = Arc::new(SyncSession::new(ConnectionConfig {
        connect_timeout: config.network.connect_timeout(),
    }));
    let remote = RemoteControlUseCase::new(session, config.client.device_id.clone());
    remote
        .connect_to(host, port)
        .await
        .with_context(|| format!("could not connect to {host}:{port}"))?;
    Ok(remote)
}

fn print_state(state: &SessionState) {
    let playback = &state.last_known_playback_state;
    let status = if playback.is_playing { "playing" } else { "paused" };
    match &playback.current_song {
        Some(song) => println!("[{status}] {} - {} ({})", song.artist, song.title, song.id),
        None => println!("[{status}] nothing queued"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_parses_action_case_insensitively() {
        let cli = Cli::parse_from(["metrosync-client", "control", "--host", "10.0.0.2", "NeXt"]);

        match cli.command {
            Command::Control { host, port, action } => {
                assert_eq!(host, "10.0.0.2");
                assert_eq!(port, None);
                assert_eq!(action, PlaybackAction::Next);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_control_rejects_unknown_action() {
        let result = Cli::try_parse_from(["metrosync-client", "control", "--host", "h", "rewind"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_discover_default_duration() {
        let cli = Cli::parse_from(["metrosync-client", "discover"]);
        assert!(matches!(cli.command, Command::Discover { seconds: 5 }));
    }

    #[test]
    fn test_global_device_id_flag() {
        let cli = Cli::parse_from([
            "metrosync-client",
            "monitor",
            "--host",
            "h",
            "--port",
            "9000",
            "--device-id",
            "wrist",
        ]);

        assert_eq!(cli.device_id.as_deref(), Some("wrist"));
        assert!(matches!(cli.command, Command::Monitor { port: Some(9000), .. }));
    }
}
