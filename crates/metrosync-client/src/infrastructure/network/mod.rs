//! Network infrastructure for the client application.
//!
//! # Sub-modules
//!
//! - **`connection_manager`** – Owns the single connection slot: the
//!   `Idle → Connecting → Connected → Disconnecting → Idle` state machine,
//!   the TCP socket, and the background read pump task.  A read pump that
//!   hits end-of-stream or an I/O error tears the slot down exactly as an
//!   explicit `disconnect()` would.
//!
//! - **`sync_session`** – The protocol engine above the slot: the read pump
//!   that turns `PlaybackState` frames into session snapshots, outbound
//!   command framing, and the observable `SessionState`.

pub mod connection_manager;
pub mod sync_session;

pub use connection_manager::{ConnectionConfig, ConnectionError, ConnectionManager};
pub use sync_session::{CommandError, SessionPublisher, SyncSession};
