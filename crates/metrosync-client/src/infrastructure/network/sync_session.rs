//! SyncSession: the protocol engine running above the connection slot.
//!
//! The session owns three concerns:
//!
//! - the **observable state** (`SessionState` and `ConnectionStatus`), held in
//!   `tokio::sync::watch` channels and always replaced wholesale so readers
//!   never see a torn update;
//! - the **read pump**, which decodes inbound frames and folds every
//!   `PlaybackState` into the snapshot;
//! - **outbound commands**, stamped with the active device id and the current
//!   wall-clock time in milliseconds.
//!
//! Inbound frames that fail to decode are logged and dropped; the connection
//! stays open.  A framing error is fatal to the connection.

use std::time::{SystemTime, UNIX_EPOCH};

use metrosync_core::{
    decode_message, encode_message, read_frame, write_frame, CodecError, ConnectionStatus,
    FrameError, PlaybackAction, PlaybackCommand, PlaybackState, SessionState, SyncMessage,
    UNKNOWN_DEVICE_ID,
};
use thiserror::Error;
use tokio::{
    io::AsyncBufRead,
    sync::{oneshot, watch},
};
use tracing::{debug, trace, warn};

use super::connection_manager::{ConnectionConfig, ConnectionError, ConnectionManager};

/// Errors returned by [`SyncSession::send_command`].
#[derive(Debug, Error)]
pub enum CommandError {
    /// There is no open connection to send on.
    #[error("not connected")]
    NotConnected,

    /// The command could not be serialised.
    #[error("failed to encode command: {0}")]
    Encode(#[from] CodecError),

    /// The socket write failed.  The connection is left to the read pump to
    /// tear down if the peer is really gone.
    #[error("failed to write command: {0}")]
    Write(#[source] std::io::Error),
}

// ── State publication ─────────────────────────────────────────────────────────

/// Publishes session snapshots and connection status by replacement.
pub struct SessionPublisher {
    session_tx: watch::Sender<SessionState>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl SessionPublisher {
    pub(crate) fn new() -> Self {
        let (session_tx, _) = watch::channel(SessionState::default());
        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            session_tx,
            status_tx,
        }
    }

    /// Subscribes to session snapshots.  The receiver starts at the current
    /// value.
    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session_tx.subscribe()
    }

    /// Subscribes to connection status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Clone of the current session snapshot.
    pub fn session(&self) -> SessionState {
        self.session_tx.borrow().clone()
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    pub(crate) fn publish_connected(&self, device_id: Option<String>) {
        self.session_tx
            .send_replace(SessionState::connected_to(device_id));
        self.status_tx.send_replace(ConnectionStatus::Connected);
    }

    pub(crate) fn publish_playback(&self, playback: PlaybackState) {
        let next = self.session_tx.borrow().with_playback(playback);
        self.session_tx.send_replace(next);
    }

    /// Clears the session to defaults and marks the slot `Idle`.
    pub(crate) fn reset(&self) {
        self.session_tx.send_replace(SessionState::default());
        self.status_tx.send_replace(ConnectionStatus::Idle);
    }
}

// ── Read pump ─────────────────────────────────────────────────────────────────

/// Why a read pump stopped.
#[derive(Debug)]
pub(crate) enum PumpExit {
    /// The shutdown signal fired.
    Cancelled,
    /// The peer closed the stream on a frame boundary.
    EndOfStream,
    /// The stream failed or desynchronised.
    Failed(FrameError),
}

/// What the pump did with one inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    StateApplied,
    CommandIgnored,
    Dropped,
}

/// Applies one inbound payload to the published session state.
pub(crate) fn apply_frame(payload: &[u8], publisher: &SessionPublisher) -> FrameOutcome {
    match decode_message(payload) {
        Ok(SyncMessage::PlaybackState(state)) => {
            trace!(
                "playback state: playing={} song={:?}",
                state.is_playing,
                state.current_song.as_ref().map(|s| s.title.as_str())
            );
            publisher.publish_playback(state);
            FrameOutcome::StateApplied
        }
        Ok(SyncMessage::PlaybackCommand(cmd)) => {
            debug!("ignoring inbound PlaybackCommand {} from {:?}", cmd.action, cmd.device_id);
            FrameOutcome::CommandIgnored
        }
        Err(e) => {
            warn!("dropping undecodable frame ({} bytes): {e}", payload.len());
            FrameOutcome::Dropped
        }
    }
}

/// Reads frames until end-of-stream, a framing error, or `shutdown` fires.
pub(crate) async fn run_read_pump<R>(
    mut reader: R,
    publisher: &SessionPublisher,
    mut shutdown: oneshot::Receiver<()>,
) -> PumpExit
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut shutdown => return PumpExit::Cancelled,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(payload)) => {
                apply_frame(&payload, publisher);
            }
            Ok(None) => return PumpExit::EndOfStream,
            Err(e) => return PumpExit::Failed(e),
        }
    }
}

// ── Session façade ────────────────────────────────────────────────────────────

/// The companion's synchronisation session with one phone.
pub struct SyncSession {
    manager: ConnectionManager,
}

impl SyncSession {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            manager: ConnectionManager::new(config),
        }
    }

    /// See [`ConnectionManager::connect`].
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        device_id: &str,
    ) -> Result<(), ConnectionError> {
        self.manager.connect(host, port, device_id).await
    }

    /// See [`ConnectionManager::disconnect`].
    pub async fn disconnect(&self) {
        self.manager.disconnect().await
    }

    /// Frames and writes a `PlaybackCommand` for `action`.
    ///
    /// The command carries the active device id (or `"unknown"` when none is
    /// set) and the current time in milliseconds.  Returns the command that
    /// was sent.
    pub async fn send_command(
        &self,
        action: PlaybackAction,
    ) -> Result<PlaybackCommand, CommandError> {
        let (writer, device_id) = self
            .manager
            .active_writer()
            .ok_or(CommandError::NotConnected)?;

        let command = PlaybackCommand {
            device_id: device_id.unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string()),
            action,
            timestamp: current_timestamp_ms(),
        };
        let payload = encode_message(&SyncMessage::PlaybackCommand(command.clone()))?;

        let mut writer = writer.lock().await;
        write_frame(&mut *writer, payload.as_bytes())
            .await
            .map_err(|e| {
                warn!("failed to send {action}: {e}");
                CommandError::Write(e)
            })?;

        debug!("sent {action} as {:?}", command.device_id);
        Ok(command)
    }

    /// Subscribes to session snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.manager.publisher().subscribe_session()
    }

    /// Subscribes to connection status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.manager.publisher().subscribe_status()
    }

    /// Current session snapshot.
    pub fn state(&self) -> SessionState {
        self.manager.publisher().session()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use metrosync_core::{encode_message_frame, SongInfo};
    use tokio::io::BufReader;

    fn state_frame(is_playing: bool, title: &str) -> Vec<u8> {
        encode_message_frame(&SyncMessage::PlaybackState(PlaybackState {
            is_playing,
            current_song: Some(SongInfo {
                id: "s1".to_string(),
                title: title.to_string(),
                artist: "Artist".to_string(),
            }),
        }))
        .unwrap()
    }

    fn connected_publisher() -> SessionPublisher {
        let publisher = SessionPublisher::new();
        publisher.publish_connected(Some("phone".to_string()));
        publisher
    }

    // ── apply_frame ───────────────────────────────────────────────────────────

    #[test]
    fn test_apply_state_updates_snapshot_and_keeps_connection_fields() {
        // Arrange
        let publisher = connected_publisher();
        let payload = br#"{"PlaybackState":{"isPlaying":true,"currentSong":{"id":"1","title":"A","artist":"B"}}}"#;

        // Act
        let outcome = apply_frame(payload, &publisher);

        // Assert
        assert_eq!(outcome, FrameOutcome::StateApplied);
        let session = publisher.session();
        assert!(session.connected);
        assert_eq!(session.active_device_id.as_deref(), Some("phone"));
        assert!(session.last_known_playback_state.is_playing);
        assert_eq!(
            session
                .last_known_playback_state
                .current_song
                .map(|s| s.title),
            Some("A".to_string())
        );
    }

    #[test]
    fn test_apply_inbound_command_is_ignored() {
        let publisher = connected_publisher();
        let before = publisher.session();

        let outcome = apply_frame(
            br#"{"PlaybackCommand":{"deviceId":"x","action":"PLAY","timestamp":1}}"#,
            &publisher,
        );

        assert_eq!(outcome, FrameOutcome::CommandIgnored);
        assert_eq!(publisher.session(), before);
    }

    #[test]
    fn test_apply_garbage_is_dropped_without_state_change() {
        let publisher = connected_publisher();
        let before = publisher.session();

        assert_eq!(apply_frame(b"not json", &publisher), FrameOutcome::Dropped);
        assert_eq!(apply_frame(br#"{"Other":{}}"#, &publisher), FrameOutcome::Dropped);
        assert_eq!(publisher.session(), before);
    }

    #[test]
    fn test_reset_clears_session_and_status() {
        let publisher = connected_publisher();
        publisher.publish_playback(PlaybackState {
            is_playing: true,
            current_song: None,
        });

        publisher.reset();

        assert_eq!(publisher.session(), SessionState::default());
        assert_eq!(*publisher.subscribe_status().borrow(), ConnectionStatus::Idle);
    }

    // ── run_read_pump ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_pump_applies_states_in_order_then_reports_eof() {
        // Arrange: two states followed by a clean close
        let mut bytes = state_frame(true, "First");
        bytes.extend(state_frame(false, "Second"));
        let publisher = connected_publisher();
        let (_keep, shutdown) = oneshot::channel();

        // Act
        let exit = run_read_pump(BufReader::new(&bytes[..]), &publisher, shutdown).await;

        // Assert: last state wins
        assert!(matches!(exit, PumpExit::EndOfStream));
        let playback = publisher.session().last_known_playback_state;
        assert!(!playback.is_playing);
        assert_eq!(playback.current_song.map(|s| s.title), Some("Second".to_string()));
    }

    #[tokio::test]
    async fn test_pump_reassembles_frame_split_across_reads() {
        // Arrange: the phone's writes arrive in arbitrary TCP segments
        let bytes = state_frame(true, "Split");
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        let mock = tokio_test::io::Builder::new()
            .read(&bytes[..1])
            .read(&head[1..])
            .read(tail)
            .build();
        let publisher = connected_publisher();
        let (_keep, shutdown) = oneshot::channel();

        // Act
        let exit = run_read_pump(BufReader::new(mock), &publisher, shutdown).await;

        // Assert
        assert!(matches!(exit, PumpExit::EndOfStream));
        let playback = publisher.session().last_known_playback_state;
        assert_eq!(playback.current_song.map(|s| s.title), Some("Split".to_string()));
    }

    #[tokio::test]
    async fn test_pump_skips_undecodable_frame_and_continues() {
        let mut bytes = b"3\nxyz\n".to_vec();
        bytes.extend(state_frame(true, "After"));
        let publisher = connected_publisher();
        let (_keep, shutdown) = oneshot::channel();

        let exit = run_read_pump(BufReader::new(&bytes[..]), &publisher, shutdown).await;

        assert!(matches!(exit, PumpExit::EndOfStream));
        assert!(publisher.session().last_known_playback_state.is_playing);
    }

    #[tokio::test]
    async fn test_pump_fails_on_desync() {
        let publisher = connected_publisher();
        let (_keep, shutdown) = oneshot::channel();

        let exit = run_read_pump(BufReader::new(&b"abc\n"[..]), &publisher, shutdown).await;

        assert!(matches!(
            exit,
            PumpExit::Failed(FrameError::InvalidLength { .. })
        ));
    }

    #[tokio::test]
    async fn test_pump_stops_on_shutdown_signal() {
        // Arrange: a stream that never yields data
        let (_client, server) = tokio::io::duplex(64);
        let publisher = connected_publisher();
        let (tx, shutdown) = oneshot::channel();

        // Act
        tx.send(()).unwrap();
        let exit = run_read_pump(BufReader::new(server), &publisher, shutdown).await;

        // Assert
        assert!(matches!(exit, PumpExit::Cancelled));
    }

    // ── SyncSession ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_command_without_connection_is_not_connected() {
        let session = SyncSession::new(ConnectionConfig::default());

        let result = session.send_command(PlaybackAction::Play).await;

        assert!(matches!(result, Err(CommandError::NotConnected)));
    }

    #[test]
    fn test_timestamp_is_after_2020() {
        assert!(current_timestamp_ms() > 1_577_836_800_000);
    }
}
