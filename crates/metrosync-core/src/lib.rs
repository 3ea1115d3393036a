//! # metrosync-core
//!
//! Shared library for MetroSync containing the wire protocol (message types,
//! JSON codec, length-prefix framer), the service constants both ends agree
//! on, and the pure domain types for discovered devices and session state.
//!
//! This crate is used by both the companion (client) and phone (server)
//! applications.  It never opens a socket: the framer is written against the
//! generic `tokio::io` traits so it works over a TCP stream, a pipe, or a
//! scripted test stream alike.
//!
//! # Architecture overview
//!
//! MetroSync lets a wrist-worn companion discover a phone on the local
//! network, connect to it, and remote-control its playback engine:
//!
//! ```text
//! Discovery ──> DeviceRecord ──> connect(host, port) ──> read pump
//!                                                          │
//!   Framer (length line + JSON line) <── Codec <───────────┘
//! ```
//!
//! - **`protocol`** – How bytes travel over the network.  Each frame is a
//!   decimal length line followed by a JSON payload line; the payload is one
//!   of two tagged messages (`PlaybackCommand`, `PlaybackState`).
//!
//! - **`domain`** – Pure state with no I/O: the deduplicated set of
//!   discovered devices and the per-client session snapshot.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `metrosync_core::PlaybackState` instead of the full module path.
pub use domain::device::{Advertisement, DeviceChange, DeviceRecord, DeviceRegistry, ResolveError};
pub use domain::session::{ConnectionStatus, SessionState};
pub use protocol::codec::{decode_message, encode_message, encode_message_frame, CodecError};
pub use protocol::framing::{encode_frame, read_frame, write_frame, FrameError, MAX_FRAME_LEN};
pub use protocol::messages::{
    mdns_service_type, PlaybackAction, PlaybackCommand, PlaybackState, SongInfo, SyncMessage,
    DEFAULT_PORT, DEFAULT_SERVICE_NAME, SERVICE_TYPE, UNKNOWN_DEVICE_ID,
};
