//! metrosync-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does metrosync-client do?
//!
//! The *client* is the wrist-worn companion.  It never plays audio itself; it
//! finds a phone on the local network and drives the phone's player:
//!
//! 1. Browses for `_metrosync._tcp.` advertisements and keeps a deduplicated
//!    list of phones (`infrastructure::discovery`).
//! 2. Opens exactly one TCP connection at a time to the chosen phone
//!    (`infrastructure::network::connection_manager`).
//! 3. Runs a read pump that decodes `PlaybackState` frames into an observable
//!    session snapshot, and frames outbound `PlaybackCommand`s
//!    (`infrastructure::network::sync_session`).
//! 4. Exposes play/pause/next/previous to the UI layer through the
//!    remote-control use case (`application::remote_control`).

/// Application layer: use cases for the companion.
pub mod application;

/// Infrastructure layer: discovery, network, and configuration storage.
pub mod infrastructure;
