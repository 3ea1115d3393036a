//! RemoteControlUseCase: the UI-facing entry point for driving a phone.
//!
//! The connection slot itself refuses a second `connect` while busy.  This
//! use case is where "selecting a new phone supersedes the old one" lives:
//! it always disconnects before connecting, so at most one session exists.

use std::sync::{Arc, Mutex, PoisonError};

use metrosync_core::{DeviceRecord, PlaybackAction, PlaybackCommand, SessionState};
use tokio::sync::watch;
use tracing::info;

use crate::infrastructure::network::{CommandError, ConnectionError, SyncSession};

/// Drives one phone at a time on behalf of the UI.
pub struct RemoteControlUseCase {
    session: Arc<SyncSession>,
    /// Identity of this companion, sent as `deviceId` on every command.
    device_id: String,
    selected: Mutex<Option<DeviceRecord>>,
}

impl RemoteControlUseCase {
    pub fn new(session: Arc<SyncSession>, device_id: impl Into<String>) -> Self {
        Self {
            session,
            device_id: device_id.into(),
            selected: Mutex::new(None),
        }
    }

    /// Closes any active session and connects to `record`.
    ///
    /// # Errors
    ///
    /// Propagates the [`ConnectionError`] from the new connect; the previous
    /// session is closed either way.
    pub async fn select_device(&self, record: &DeviceRecord) -> Result<(), ConnectionError> {
        info!("selecting {} ({}:{})", record.device_name, record.host, record.port);
        self.connect_to(&record.host, record.port).await?;
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }

    /// Closes any active session and connects to `host:port` directly.
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<(), ConnectionError> {
        self.release().await;
        self.session.connect(host, port, &self.device_id).await
    }

    /// Closes the active session, if any.
    pub async fn release(&self) {
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.session.disconnect().await;
    }

    /// The phone chosen by the last successful [`Self::select_device`].
    pub fn selected_device(&self) -> Option<DeviceRecord> {
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn play(&self) -> Result<PlaybackCommand, CommandError> {
        self.session.send_command(PlaybackAction::Play).await
    }

    pub async fn pause(&self) -> Result<PlaybackCommand, CommandError> {
        self.session.send_command(PlaybackAction::Pause).await
    }

    pub async fn next(&self) -> Result<PlaybackCommand, CommandError> {
        self.session.send_command(PlaybackAction::Next).await
    }

    pub async fn previous(&self) -> Result<PlaybackCommand, CommandError> {
        self.session.send_command(PlaybackAction::Previous).await
    }

    /// Session snapshots for the UI.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }
}
