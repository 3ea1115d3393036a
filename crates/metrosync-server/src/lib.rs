//! metrosync-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The server is the phone side of MetroSync: it advertises
//! `_metrosync._tcp.` over mDNS, accepts any number of companions, applies
//! their `PlaybackCommand`s to a `PlaybackEngine`, and pushes every resulting
//! `PlaybackState` to all of them.

pub mod application;
pub mod infrastructure;
