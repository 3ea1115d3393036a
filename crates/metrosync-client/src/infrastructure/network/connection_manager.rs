//! ConnectionManager: owns the single TCP connection slot of a client.
//!
//! # State machine
//!
//! ```text
//! Idle ──connect──> Connecting ──ok──> Connected ──disconnect──> Disconnecting ──> Idle
//!   ^                   │                  │
//!   └──── error ────────┘                  └──── EOF / I/O error ────────────> Idle
//! ```
//!
//! - `connect` fails fast with [`ConnectionError::Busy`] unless the slot is
//!   `Idle`; it never queues.
//! - `disconnect` is idempotent and safe from any state.
//! - The read pump runs on its own Tokio task.  When it sees end-of-stream or
//!   a transport error it performs the same teardown as `disconnect`, so no
//!   half-open session is ever left behind.
//! - No reconnect is attempted here; retry policy belongs to the caller.
//!
//! # Generations
//!
//! Every state change that invalidates the current socket bumps a
//! generation counter.  A read pump (or an in-flight connect) only touches
//! the slot if the generation it was started with is still current, so a
//! stale pump can never tear down a newer connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrosync_core::ConnectionStatus;
use thiserror::Error;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use super::sync_session::{run_read_pump, PumpExit, SessionPublisher};

/// Write half of the active socket, serialised so frames never interleave.
pub(crate) type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// Errors reported by [`ConnectionManager::connect`].  None of them are fatal
/// to the process; the slot is back in `Idle` whenever one is returned
/// (except `Busy`, which leaves the existing connection untouched).
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A connection is already being established or is active.
    #[error("connection slot is busy ({status:?}); disconnect first")]
    Busy { status: ConnectionStatus },

    /// The peer actively refused the connection.
    #[error("connection to {addr} refused: {source}")]
    Refused {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connect did not complete within the configured timeout.
    #[error("connection to {addr} timed out after {timeout:?}")]
    TimedOut { addr: String, timeout: Duration },

    /// The host could not be resolved or reached.
    #[error("could not reach {addr}: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// `disconnect` was called while the connect was in flight.
    #[error("connection attempt to {addr} was cancelled")]
    Aborted { addr: String },
}

/// Configuration for the connection slot.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on the TCP connect (including host resolution).
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything that belongs to one established connection.
struct ActiveLink {
    writer: SharedWriter,
    device_id: Option<String>,
    shutdown: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl ActiveLink {
    /// Stops the read pump and closes the socket.
    ///
    /// `await_pump` must be `false` when called from the pump task itself.
    async fn close(mut self, await_pump: bool) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if await_pump {
            if let Some(pump) = self.pump.take() {
                if let Err(e) = pump.await {
                    if !e.is_cancelled() {
                        warn!("read pump ended abnormally: {e}");
                    }
                }
            }
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("socket shutdown: {e}");
        }
    }
}

#[derive(Default)]
struct Slot {
    status: ConnectionStatus,
    generation: u64,
    link: Option<ActiveLink>,
}

/// State shared between the manager and its read pump task.
struct Shared {
    slot: Mutex<Slot>,
    publisher: SessionPublisher,
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the slot to `Idle` after a failed connect, if still current.
    fn abandon_attempt(&self, generation: u64) {
        let mut slot = self.lock_slot();
        if slot.generation == generation && slot.status == ConnectionStatus::Connecting {
            slot.status = ConnectionStatus::Idle;
            self.publisher.reset();
        }
    }

    /// Final step of every teardown: `Disconnecting → Idle`, state cleared.
    fn finish_teardown(&self) {
        let mut slot = self.lock_slot();
        slot.status = ConnectionStatus::Idle;
        self.publisher.reset();
    }

    /// Called by the read pump task when it stops.
    async fn on_pump_exit(&self, generation: u64, exit: PumpExit) {
        let link = {
            let mut slot = self.lock_slot();
            if slot.generation != generation || slot.status != ConnectionStatus::Connected {
                // Explicit disconnect (or drop) already owns the teardown.
                return;
            }
            slot.generation += 1;
            slot.status = ConnectionStatus::Disconnecting;
            self.publisher.set_status(ConnectionStatus::Disconnecting);
            slot.link.take()
        };

        match exit {
            PumpExit::EndOfStream => info!("peer closed the connection"),
            PumpExit::Failed(e) => warn!("connection lost: {e}"),
            PumpExit::Cancelled => debug!("read pump cancelled"),
        }

        if let Some(link) = link {
            link.close(false).await;
        }
        self.finish_teardown();
    }
}

/// Owns exactly one outbound connection at a time.
///
/// Cheap observers are available through [`ConnectionManager::publisher`];
/// all mutation goes through `connect` / `disconnect` and the read pump.
pub struct ConnectionManager {
    config: ConnectionConfig,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Creates a manager in the `Idle` state.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                publisher: SessionPublisher::new(),
            }),
        }
    }

    /// Current lifecycle state of the slot.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock_slot().status
    }

    /// The observable session state and status channels.
    pub fn publisher(&self) -> &SessionPublisher {
        &self.shared.publisher
    }

    /// Opens a TCP connection to `host:port` and starts the read pump.
    ///
    /// `device_id` becomes `SessionState::active_device_id`; an empty string
    /// leaves it unset.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Busy`] if the slot is not `Idle`.
    /// - [`ConnectionError::Refused`], [`ConnectionError::TimedOut`], or
    ///   [`ConnectionError::Unreachable`] if the socket cannot be opened.
    /// - [`ConnectionError::Aborted`] if `disconnect` ran while connecting.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        device_id: &str,
    ) -> Result<(), ConnectionError> {
        let addr = format!("{host}:{port}");
        let generation = {
            let mut slot = self.shared.lock_slot();
            if slot.status.is_busy() {
                warn!("connect to {addr} refused: slot is {:?}", slot.status);
                return Err(ConnectionError::Busy {
                    status: slot.status,
                });
            }
            slot.generation += 1;
            slot.status = ConnectionStatus::Connecting;
            self.shared.publisher.set_status(ConnectionStatus::Connecting);
            slot.generation
        };

        info!("connecting to {addr} (device {device_id:?})");
        let timeout = self.config.connect_timeout;
        let stream = match time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.shared.abandon_attempt(generation);
                let err = classify_connect_error(addr, source);
                warn!("{err}");
                return Err(err);
            }
            Err(_) => {
                self.shared.abandon_attempt(generation);
                warn!("connection to {addr} timed out after {timeout:?}");
                return Err(ConnectionError::TimedOut { addr, timeout });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle on {addr}: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        let device_id = (!device_id.is_empty()).then(|| device_id.to_string());

        let mut slot = self.shared.lock_slot();
        if slot.generation != generation || slot.status != ConnectionStatus::Connecting {
            info!("connection to {addr} completed after being cancelled; closing it");
            return Err(ConnectionError::Aborted { addr });
        }

        slot.status = ConnectionStatus::Connected;
        self.shared.publisher.publish_connected(device_id.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let pump = tokio::spawn(async move {
            let exit = run_read_pump(BufReader::new(read_half), &shared.publisher, shutdown_rx).await;
            shared.on_pump_exit(generation, exit).await;
        });

        slot.link = Some(ActiveLink {
            writer: Arc::new(tokio::sync::Mutex::new(write_half)),
            device_id,
            shutdown: Some(shutdown_tx),
            pump: Some(pump),
        });
        drop(slot);

        info!("connected to {addr}");
        Ok(())
    }

    /// Closes the active connection (if any), stops the read pump, and
    /// resets the session state to defaults.
    ///
    /// Idempotent: calling it while `Idle` or already `Disconnecting` is a
    /// no-op.  Calling it while `Connecting` cancels the attempt.
    pub async fn disconnect(&self) {
        let link = {
            let mut slot = self.shared.lock_slot();
            match slot.status {
                ConnectionStatus::Idle | ConnectionStatus::Disconnecting => return,
                ConnectionStatus::Connecting => {
                    slot.generation += 1;
                    slot.status = ConnectionStatus::Idle;
                    self.shared.publisher.reset();
                    info!("pending connection attempt cancelled");
                    return;
                }
                ConnectionStatus::Connected => {
                    slot.generation += 1;
                    slot.status = ConnectionStatus::Disconnecting;
                    self.shared.publisher.set_status(ConnectionStatus::Disconnecting);
                    slot.link.take()
                }
            }
        };

        if let Some(link) = link {
            link.close(true).await;
        }
        self.shared.finish_teardown();
        info!("disconnected");
    }

    /// Returns the writer and sender id of the active connection, if any.
    pub(crate) fn active_writer(&self) -> Option<(SharedWriter, Option<String>)> {
        let slot = self.shared.lock_slot();
        if slot.status != ConnectionStatus::Connected {
            return None;
        }
        slot.link
            .as_ref()
            .map(|link| (Arc::clone(&link.writer), link.device_id.clone()))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut slot = self.shared.lock_slot();
        slot.generation += 1;
        if let Some(mut link) = slot.link.take() {
            if let Some(tx) = link.shutdown.take() {
                let _ = tx.send(());
            }
        }
        slot.status = ConnectionStatus::Idle;
        self.shared.publisher.reset();
    }
}

fn classify_connect_error(addr: String, source: std::io::Error) -> ConnectionError {
    match source.kind() {
        std::io::ErrorKind::ConnectionRefused => ConnectionError::Refused { addr, source },
        _ => ConnectionError::Unreachable { addr, source },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
