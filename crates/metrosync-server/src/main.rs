//! MetroSync server entry point (phone role).
//!
//! Wires the in-memory playback engine to the TCP listener, advertises the
//! service over mDNS, and runs until Ctrl+C.
//!
//! ```text
//! main()
//!  └─ load server.toml, apply CLI overrides
//!  └─ InMemoryPlaybackEngine ─> PlaybackControlUseCase
//!  └─ SyncServer::bind()
//!  └─ ServiceAdvertiser::start()   (unless --no-advertise)
//!  └─ SyncServer::run(running)     until Ctrl+C clears `running`
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use metrosync_server::application::playback_control::PlaybackControlUseCase;
use metrosync_server::infrastructure::{
    engine::{in_memory::demo_queue, InMemoryPlaybackEngine},
    network::{advertiser::Advertisement, ServiceAdvertiser, SyncServer},
    storage::config::{load_config, load_config_from, ServerConfig},
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// MetroSync phone-side server.
#[derive(Debug, Parser)]
#[command(
    name = "metrosync-server",
    about = "Accepts MetroSync companions and lets them control playback",
    version
)]
struct Cli {
    /// Path to `server.toml`.  Defaults to the platform config directory.
    #[arg(long, env = "METROSYNC_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port to listen on.  Overrides `[network] port`.
    #[arg(long, env = "METROSYNC_PORT")]
    port: Option<u16>,

    /// IP address to bind.  Overrides `[network] bind_address`.
    #[arg(long, env = "METROSYNC_BIND")]
    bind: Option<String>,

    /// Advertised instance name.  Overrides `[advertise] service_name`.
    #[arg(long, env = "METROSYNC_NAME")]
    name: Option<String>,

    /// Do not advertise over mDNS.
    #[arg(long)]
    no_advertise: bool,
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(bind) = self.bind {
            config.network.bind_address = bind;
        }
        if let Some(name) = self.name {
            config.advertise.service_name = name;
        }
        if self.no_advertise {
            config.advertise.enabled = false;
        }
    }
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
        Err(e) => (ServerConfig::default(), Some(e)),
    };

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("falling back to default configuration: {e}");
    }
    cli.apply(&mut config);

    info!("MetroSync server starting");

    // ── Engine and listener ───────────────────────────────────────────────────
    let engine = Arc::new(InMemoryPlaybackEngine::with_queue(demo_queue()));
    let control = Arc::new(PlaybackControlUseCase::new(engine));
    let addr = config
        .network
        .socket_addr()
        .context("invalid [network] configuration")?;
    let server = SyncServer::bind(addr, control)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    let port = server.local_addr()?.port();

    // ── mDNS advertisement ────────────────────────────────────────────────────
    let advertiser = if config.advertise.enabled {
        let ad = Advertisement {
            service_type: config.advertise.service_type.clone(),
            service_name: config.advertise.service_name.clone(),
            port,
            ip: config.advertise.advertise_ip.clone(),
        };
        match ServiceAdvertiser::start(&ad) {
            Ok(advertiser) => Some(advertiser),
            Err(e) => {
                error!("mDNS advertisement failed; companions must connect by address: {e}");
                None
            }
        }
    } else {
        info!("mDNS advertisement disabled");
        None
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    server.run(running).await;

    if let Some(advertiser) = advertiser {
        if let Err(e) = advertiser.stop() {
            warn!("failed to withdraw advertisement: {e}");
        }
    }

    info!("MetroSync server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_leave_config_untouched() {
        let mut config = ServerConfig::default();

        Cli::parse_from(["metrosync-server"]).apply(&mut config);

        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_flags_override_config() {
        // Arrange
        let mut config = ServerConfig::default();
        let cli = Cli::parse_from([
            "metrosync-server",
            "--port",
            "9000",
            "--name",
            "Kitchen",
            "--no-advertise",
        ]);

        // Act
        cli.apply(&mut config);

        // Assert
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.advertise.service_name, "Kitchen");
        assert!(!config.advertise.enabled);
        assert_eq!(config.network.bind_address, "0.0.0.0");
    }
}
