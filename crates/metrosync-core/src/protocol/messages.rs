//! All MetroSync protocol message types and the service constants shared by
//! both ends of the protocol.
//!
//! The wire carries exactly two message kinds, each serialised as a JSON
//! object with a single top-level key naming the kind:
//!
//! ```json
//! {"PlaybackCommand":{"deviceId":"watch1","action":"PLAY","timestamp":1700000000000}}
//! {"PlaybackState":{"isPlaying":true,"currentSong":{"id":"s1","title":"T","artist":"A"}}}
//! ```
//!
//! Field names are camelCase on the wire and snake_case in Rust; the
//! `#[serde(rename_all = "camelCase")]` attribute bridges the two.
//!
//! # Leniency
//!
//! Every field except `action` carries `#[serde(default)]`, so a peer built
//! against an older or newer schema that omits a field still decodes.  The
//! protocol has no version field, which makes this leniency the only
//! compatibility mechanism between independently released phone and watch
//! builds.

use serde::{Deserialize, Serialize};

// ── Service constants ─────────────────────────────────────────────────────────

/// Service type advertised and browsed on the local network.
///
/// Changing this value breaks interoperability with every deployed peer.
pub const SERVICE_TYPE: &str = "_metrosync._tcp.";

/// Qualifies a DNS-SD service type with the mDNS `local.` domain.
///
/// ```rust
/// use metrosync_core::{mdns_service_type, SERVICE_TYPE};
///
/// assert_eq!(mdns_service_type(SERVICE_TYPE), "_metrosync._tcp.local.");
/// ```
pub fn mdns_service_type(service_type: &str) -> String {
    if service_type.ends_with("local.") {
        service_type.to_string()
    } else {
        format!("{service_type}local.")
    }
}

/// Default instance name advertised by the phone.
pub const DEFAULT_SERVICE_NAME: &str = "MetroSync";

/// Default TCP port the phone listens on.
///
/// Changing this value breaks interoperability with every deployed peer.
pub const DEFAULT_PORT: u16 = 45678;

/// `deviceId` placed in outbound commands when no active device id is set.
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

// ── Payload structs ───────────────────────────────────────────────────────────

/// Metadata for the song currently loaded in the phone's player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongInfo {
    /// Library identifier of the song.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Display artist.
    pub artist: String,
}

/// The phone's player snapshot at the moment it was sent.
///
/// Not versioned: each received snapshot fully replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackState {
    /// `true` while audio is playing.
    pub is_playing: bool,
    /// The loaded song, or `None` (`null` on the wire) when nothing is loaded.
    pub current_song: Option<SongInfo>,
}

/// One of the four remote-control actions a companion can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackAction {
    Play,
    Pause,
    Next,
    Previous,
}

impl PlaybackAction {
    /// All actions in declaration order.
    pub const ALL: [PlaybackAction; 4] = [
        PlaybackAction::Play,
        PlaybackAction::Pause,
        PlaybackAction::Next,
        PlaybackAction::Previous,
    ];

    /// Returns the wire spelling of the action (`"PLAY"`, `"PAUSE"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackAction::Play => "PLAY",
            PlaybackAction::Pause => "PAUSE",
            PlaybackAction::Next => "NEXT",
            PlaybackAction::Previous => "PREVIOUS",
        }
    }
}

impl std::fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlaybackAction {
    type Err = String;

    /// Parses an action case-insensitively (`"play"`, `"PLAY"`, `"Play"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlaybackAction::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown playback action: {s:?}"))
    }
}

/// A remote-control request sent by the companion.
///
/// `device_id` identifies the *sender* so that a server with several
/// connected companions can attribute the command.  `timestamp` is
/// informational only and never used for conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackCommand {
    #[serde(default)]
    pub device_id: String,
    pub action: PlaybackAction,
    /// Milliseconds since the Unix epoch at the time the command was issued.
    #[serde(default)]
    pub timestamp: i64,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Top-level enum covering every message that can appear in a frame.
///
/// Serde's default (externally tagged) enum representation produces exactly
/// the wire shape: `{"PlaybackCommand": {...}}` / `{"PlaybackState": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    PlaybackCommand(PlaybackCommand),
    PlaybackState(PlaybackState),
}

impl SyncMessage {
    /// Returns the top-level JSON key identifying this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::PlaybackCommand(_) => "PlaybackCommand",
            SyncMessage::PlaybackState(_) => "PlaybackState",
        }
    }
}

impl From<PlaybackCommand> for SyncMessage {
    fn from(command: PlaybackCommand) -> Self {
        SyncMessage::PlaybackCommand(command)
    }
}

impl From<PlaybackState> for SyncMessage {
    fn from(state: PlaybackState) -> Self {
        SyncMessage::PlaybackState(state)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
