//! SyncServer: TCP accept loop and per-peer sessions for the phone role.
//!
//! # Per-peer session
//!
//! ```text
//!            ┌── reader task ── read_frame ─> decode ─> PlaybackControlUseCase
//! TcpStream ─┤                                              │ new snapshot
//!            └── writer task <── broadcast::Receiver <──────┘ (all peers)
//! ```
//!
//! - The writer sends the current snapshot first, then every snapshot
//!   published on the broadcast channel.  A writer that lags behind skips to
//!   the engine's current snapshot; states are last-write-wins, so nothing is
//!   lost by dropping intermediate ones.
//! - Decode errors and non-command messages are per-frame: logged, dropped.
//! - A framing error, EOF, or write failure ends only that peer's session.
//! - Engine errors are logged; the peer stays connected.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use metrosync_core::{
    decode_message, encode_message, read_frame, write_frame, CodecError, PlaybackState,
    SyncMessage,
};
use thiserror::Error;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::{broadcast, watch},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::application::{
    manage_peers::{PeerId, PeerInfo, PeerRegistry},
    playback_control::PlaybackControlUseCase,
};

/// How often the accept loop re-checks the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Snapshots buffered per peer before it is considered lagging.
const STATE_CHANNEL_CAPACITY: usize = 32;

/// Error type for the server listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read the listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Why a state snapshot could not be delivered to a peer.
#[derive(Debug, Error)]
enum SendError {
    #[error("failed to encode state: {0}")]
    Encode(#[from] CodecError),
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
}

type SharedPeers = Arc<Mutex<PeerRegistry>>;

fn lock_peers(peers: &SharedPeers) -> MutexGuard<'_, PeerRegistry> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pushes playback snapshots to every connected peer.
///
/// Obtained from [`SyncServer::publisher`]; used by the host application when
/// the engine changes on its own (a track ends, a phone-side button press).
#[derive(Clone)]
pub struct StatePublisher {
    tx: broadcast::Sender<PlaybackState>,
}

impl StatePublisher {
    /// Broadcasts `state`.  Returns the number of peers it was queued for.
    pub fn publish(&self, state: PlaybackState) -> usize {
        self.tx.send(state).unwrap_or(0)
    }
}

/// The phone-side MetroSync server.
pub struct SyncServer {
    listener: TcpListener,
    control: Arc<PlaybackControlUseCase>,
    peers: SharedPeers,
    states: broadcast::Sender<PlaybackState>,
}

impl SyncServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        control: Arc<PlaybackControlUseCase>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        let (states, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Ok(Self {
            listener,
            control,
            peers: Arc::new(Mutex::new(PeerRegistry::new())),
            states,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    pub fn publisher(&self) -> StatePublisher {
        StatePublisher {
            tx: self.states.clone(),
        }
    }

    /// Snapshot of the peer registry.
    pub fn connected_peers(&self) -> Vec<PeerInfo> {
        lock_peers(&self.peers).all()
    }

    /// Accepts peers until `running` is cleared, then closes every open
    /// peer session.
    pub async fn run(&self, running: Arc<AtomicBool>) {
        let local = self
            .listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string());
        info!("MetroSync server listening on {local}");

        let (closing_tx, closing_rx) = watch::channel(false);

        while running.load(Ordering::Relaxed) {
            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let id = lock_peers(&self.peers).register(addr);
                    info!("peer {id} connected from {addr}");
                    let session = PeerSession {
                        id,
                        addr,
                        control: Arc::clone(&self.control),
                        peers: Arc::clone(&self.peers),
                        states: self.states.clone(),
                    };
                    tokio::spawn(session.run(stream, closing_rx.clone()));
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }

        info!("shutdown flag set; closing {} peer(s)", lock_peers(&self.peers).len());
        closing_tx.send_replace(true);
    }
}

/// Everything one peer's tasks need.
struct PeerSession {
    id: PeerId,
    addr: SocketAddr,
    control: Arc<PlaybackControlUseCase>,
    peers: SharedPeers,
    states: broadcast::Sender<PlaybackState>,
}

impl PeerSession {
    async fn run(self, stream: TcpStream, mut closing: watch::Receiver<bool>) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("peer {}: could not disable Nagle: {e}", self.id);
        }
        let (read_half, write_half) = stream.into_split();

        // Subscribe before the initial snapshot so no later state is missed.
        let state_rx = self.states.subscribe();
        let mut writer = tokio::spawn(write_states(
            self.id,
            write_half,
            state_rx,
            Arc::clone(&self.control),
        ));
        let mut reader = tokio::spawn(read_commands(
            self.id,
            read_half,
            Arc::clone(&self.control),
            Arc::clone(&self.peers),
            self.states.clone(),
        ));

        tokio::select! {
            _ = &mut reader => debug!("peer {}: reader ended", self.id),
            _ = &mut writer => debug!("peer {}: writer ended", self.id),
            _ = closing.wait_for(|closing| *closing) => debug!("peer {}: server closing", self.id),
        }
        reader.abort();
        writer.abort();

        let info = lock_peers(&self.peers).remove(self.id);
        let commands = info.map_or(0, |p| p.commands_received);
        info!("peer {} ({}) disconnected after {commands} command(s)", self.id, self.addr);
    }
}

/// Read pump: decodes commands and dispatches them.
async fn read_commands(
    id: PeerId,
    read_half: OwnedReadHalf,
    control: Arc<PlaybackControlUseCase>,
    peers: SharedPeers,
    states: broadcast::Sender<PlaybackState>,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        let payload = match read_frame(&mut reader).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!("peer {id}: end of stream");
                return;
            }
            Err(e) => {
                warn!("peer {id}: closing connection: {e}");
                return;
            }
        };

        let command = match decode_message(&payload) {
            Ok(SyncMessage::PlaybackCommand(command)) => command,
            Ok(other) => {
                debug!("peer {id}: ignoring inbound {}", other.kind());
                continue;
            }
            Err(e) => {
                warn!("peer {id}: dropping undecodable frame: {e}");
                continue;
            }
        };

        lock_peers(&peers).record_command(id, &command.device_id);
        match control.handle_command(&command).await {
            Ok(state) => {
                let _ = states.send(state);
            }
            Err(e) => warn!("peer {id}: {} failed: {e}", command.action),
        }
    }
}

/// Writer: initial snapshot, then every broadcast snapshot.
async fn write_states(
    id: PeerId,
    mut write_half: OwnedWriteHalf,
    mut state_rx: broadcast::Receiver<PlaybackState>,
    control: Arc<PlaybackControlUseCase>,
) {
    match control.snapshot().await {
        Ok(state) => {
            if let Err(e) = send_state(&mut write_half, state).await {
                debug!("peer {id}: initial snapshot not sent: {e}");
                return;
            }
        }
        Err(e) => warn!("peer {id}: no initial snapshot: {e}"),
    }

    loop {
        let state = match state_rx.recv().await {
            Ok(state) => state,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("peer {id}: lagged by {skipped} snapshot(s); resyncing");
                match control.snapshot().await {
                    Ok(state) => state,
                    Err(e) => {
                        warn!("peer {id}: resync snapshot failed: {e}");
                        continue;
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let Err(e) = send_state(&mut write_half, state).await {
            debug!("peer {id}: {e}");
            break;
        }
    }

    let _ = write_half.shutdown().await;
}

async fn send_state(
    write_half: &mut OwnedWriteHalf,
    state: PlaybackState,
) -> Result<(), SendError> {
    let payload = encode_message(&SyncMessage::PlaybackState(state))?;
    write_frame(write_half, payload.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::engine::{in_memory::demo_queue, InMemoryPlaybackEngine};
    use metrosync_core::{encode_frame, PlaybackAction, PlaybackCommand};

    async fn start() -> (Arc<SyncServer>, SocketAddr, Arc<AtomicBool>) {
        let engine = Arc::new(InMemoryPlaybackEngine::with_queue(demo_queue()));
        let control = Arc::new(PlaybackControlUseCase::new(engine));
        let server = Arc::new(
            SyncServer::bind("127.0.0.1:0".parse().unwrap(), control)
                .await
                .unwrap(),
        );
        let addr = server.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let (s, r) = (Arc::clone(&server), Arc::clone(&running));
        tokio::spawn(async move { s.run(r).await });
        (server, addr, running)
    }

    async fn next_state(reader: &mut BufReader<TcpStream>) -> PlaybackState {
        let payload = timeout(Duration::from_secs(5), read_frame(reader))
            .await
            .expect("timed out")
            .expect("frame error")
            .expect("unexpected EOF");
        match decode_message(&payload).unwrap() {
            SyncMessage::PlaybackState(state) => state,
            other => panic!("expected state, got {other:?}"),
        }
    }

    fn command_frame(action: PlaybackAction) -> Vec<u8> {
        let msg = SyncMessage::PlaybackCommand(PlaybackCommand {
            device_id: "watch1".to_string(),
            action,
            timestamp: 1,
        });
        encode_frame(encode_message(&msg).unwrap().as_bytes())
    }

    #[tokio::test]
    async fn test_send_state_reports_write_failure() {
        // Arrange: a write half that has already been shut down
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (_read_half, mut write_half) = client.unwrap().into_split();
        write_half.shutdown().await.unwrap();

        // Act
        let result = send_state(&mut write_half, PlaybackState::default()).await;

        // Assert
        assert!(matches!(result, Err(SendError::Write(_))));
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let engine = Arc::new(InMemoryPlaybackEngine::new());
        let control = Arc::new(PlaybackControlUseCase::new(engine));

        let result = SyncServer::bind(addr, control).await;

        assert!(matches!(result, Err(ServerError::BindFailed { .. })));
    }

    #[tokio::test]
    async fn test_peer_receives_initial_snapshot() {
        let (_server, addr, _running) = start().await;

        let mut phone = BufReader::new(TcpStream::connect(addr).await.unwrap());

        assert_eq!(next_state(&mut phone).await, PlaybackState::default());
    }

    #[tokio::test]
    async fn test_command_is_applied_and_state_returned() {
        // Arrange
        let (server, addr, _running) = start().await;
        let mut watch = BufReader::new(TcpStream::connect(addr).await.unwrap());
        next_state(&mut watch).await;

        // Act
        watch
            .get_mut()
            .write_all(&command_frame(PlaybackAction::Play))
            .await
            .unwrap();

        // Assert
        let state = next_state(&mut watch).await;
        assert!(state.is_playing);
        assert_eq!(state.current_song.unwrap().id, "demo-1");
        let peers = server.connected_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].device_id.as_deref(), Some("watch1"));
        assert_eq!(peers[0].commands_received, 1);
    }

    #[tokio::test]
    async fn test_garbage_frame_does_not_close_peer() {
        let (_server, addr, _running) = start().await;
        let mut watch = BufReader::new(TcpStream::connect(addr).await.unwrap());
        next_state(&mut watch).await;

        let mut bytes = encode_frame(b"{\"Nope\":1}");
        bytes.extend(command_frame(PlaybackAction::Next));
        watch.get_mut().write_all(&bytes).await.unwrap();

        let state = next_state(&mut watch).await;
        assert_eq!(state.current_song.unwrap().id, "demo-1");
    }

    #[tokio::test]
    async fn test_publisher_reaches_connected_peer() {
        let (server, addr, _running) = start().await;
        let mut watch = BufReader::new(TcpStream::connect(addr).await.unwrap());
        next_state(&mut watch).await;

        let pushed = PlaybackState {
            is_playing: true,
            current_song: None,
        };
        assert_eq!(server.publisher().publish(pushed.clone()), 1);

        assert_eq!(next_state(&mut watch).await, pushed);
    }

    #[tokio::test]
    async fn test_desync_closes_only_that_peer() {
        // Arrange
        let (server, addr, _running) = start().await;
        let mut good = BufReader::new(TcpStream::connect(addr).await.unwrap());
        let mut bad = BufReader::new(TcpStream::connect(addr).await.unwrap());
        next_state(&mut good).await;
        next_state(&mut bad).await;

        // Act
        bad.get_mut().write_all(b"abc\n").await.unwrap();

        // Assert: the bad peer sees EOF, the good one still gets updates
        let eof = timeout(Duration::from_secs(5), read_frame(&mut bad)).await.unwrap();
        assert!(matches!(eof, Ok(None)) || eof.is_err());
        good.get_mut()
            .write_all(&command_frame(PlaybackAction::Play))
            .await
            .unwrap();
        assert!(next_state(&mut good).await.is_playing);
        timeout(Duration::from_secs(5), async {
            while server.connected_peers().len() != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("bad peer was not removed");
    }

    #[tokio::test]
    async fn test_clearing_running_closes_peers() {
        let (_server, addr, running) = start().await;
        let mut watch = BufReader::new(TcpStream::connect(addr).await.unwrap());
        next_state(&mut watch).await;

        running.store(false, Ordering::Relaxed);

        let end = timeout(Duration::from_secs(5), read_frame(&mut watch)).await.unwrap();
        assert!(matches!(end, Ok(None)) || end.is_err());
    }
}
