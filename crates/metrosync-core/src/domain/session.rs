//! Session state shared between the connection layer and its observers.

use serde::{Deserialize, Serialize};

use crate::protocol::messages::PlaybackState;

/// Lifecycle of the single connection slot owned by a client.
///
/// ```text
/// Idle ──connect──> Connecting ──ok──> Connected ──disconnect──> Disconnecting ──> Idle
///   ^                   │                  │
///   └──── error ────────┘                  └── I/O error / EOF ──> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionStatus {
    /// Returns `true` if a new `connect` must be refused in this state.
    pub fn is_busy(self) -> bool {
        !matches!(self, ConnectionStatus::Idle)
    }
}

/// Observable snapshot of one client's sync session.
///
/// Published by replacement: observers receive whole snapshots and never see
/// a record being mutated in place.  Reset to [`SessionState::default`] on
/// every disconnect, explicit or implicit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub connected: bool,
    pub active_device_id: Option<String>,
    pub last_known_playback_state: PlaybackState,
}

impl SessionState {
    /// State right after a successful connect: connected, no playback data yet.
    pub fn connected_to(device_id: Option<String>) -> Self {
        Self {
            connected: true,
            active_device_id: device_id,
            last_known_playback_state: PlaybackState::default(),
        }
    }

    /// Returns a copy of this state with `playback` as the last known snapshot.
    pub fn with_playback(&self, playback: PlaybackState) -> Self {
        Self {
            last_known_playback_state: playback,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::SongInfo;

    #[test]
    fn test_default_session_is_disconnected_and_empty() {
        let state = SessionState::default();
        assert!(!state.connected);
        assert!(state.active_device_id.is_none());
        assert_eq!(state.last_known_playback_state, PlaybackState::default());
    }

    #[test]
    fn test_with_playback_replaces_only_playback() {
        // Arrange
        let state = SessionState::connected_to(Some("phone@10.0.0.2:45678".to_string()));
        let playback = PlaybackState {
            is_playing: true,
            current_song: Some(SongInfo {
                id: "s1".to_string(),
                title: "T".to_string(),
                artist: "A".to_string(),
            }),
        };

        // Act
        let next = state.with_playback(playback.clone());

        // Assert
        assert!(next.connected);
        assert_eq!(next.active_device_id, state.active_device_id);
        assert_eq!(next.last_known_playback_state, playback);
    }

    #[test]
    fn test_only_idle_accepts_new_connections() {
        assert!(!ConnectionStatus::Idle.is_busy());
        assert!(ConnectionStatus::Connecting.is_busy());
        assert!(ConnectionStatus::Connected.is_busy());
        assert!(ConnectionStatus::Disconnecting.is_busy());
    }
}
