//! Application layer use cases for the server (phone) role.
//!
//! Use cases here depend only on traits and `metrosync_core` types; the
//! engine, sockets, and mDNS daemon are injected from `infrastructure`.
//!
//! # Sub-modules
//!
//! - **`playback_control`** – The `PlaybackEngine` collaborator trait and the
//!   use case that maps an inbound `PlaybackCommand` onto it, returning the
//!   snapshot to fan out.
//!
//! - **`manage_peers`** – In-memory registry of connected companions:
//!   address, last attributed `deviceId`, command count.

pub mod manage_peers;
pub mod playback_control;
